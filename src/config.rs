use std::path::PathBuf;

use crate::calendar::Calendar;
use crate::mailer::MailConfig;
use crate::slots::SlotPlan;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("BOOKER_UTC_OFFSET_MINUTES out of range: {0}")]
    Offset(i32),
    #[error("impossible slot plan: start hour {start_hour}, {slots_per_day} slots of {granularity_hours}h, horizon {horizon_days} days")]
    SlotPlan {
        horizon_days: u32,
        start_hour: u32,
        slots_per_day: u32,
        granularity_hours: u32,
    },
}

/// Server configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// Password for visitor sessions.
    pub password: String,
    /// Password for sessions whose user name is a registered admin.
    pub admin_password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub calendar: Calendar,
    pub plan: SlotPlan,
    /// `None` disables "new request" mail.
    pub mail: Option<MailConfig>,
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key).and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default        |
    /// |-----------------------------|----------------|
    /// | `BOOKER_BIND`               | `0.0.0.0`      |
    /// | `BOOKER_PORT`               | `5433`         |
    /// | `BOOKER_DATA_DIR`           | `./data`       |
    /// | `BOOKER_PASSWORD`           | `booker`       |
    /// | `BOOKER_ADMIN_PASSWORD`     | `booker-admin` |
    /// | `BOOKER_MAX_CONNECTIONS`    | `256`          |
    /// | `BOOKER_COMPACT_THRESHOLD`  | `1000`         |
    /// | `BOOKER_METRICS_PORT`       | unset          |
    /// | `BOOKER_TLS_CERT`           | unset          |
    /// | `BOOKER_TLS_KEY`            | unset          |
    /// | `BOOKER_UTC_OFFSET_MINUTES` | `180`          |
    /// | `BOOKER_HORIZON_DAYS`       | `14`           |
    /// | `BOOKER_START_HOUR`         | `10`           |
    /// | `BOOKER_SLOTS_PER_DAY`      | `11`           |
    /// | `BOOKER_GRANULARITY_HOURS`  | `1`            |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let offset_minutes: i32 = parsed(&lookup, "BOOKER_UTC_OFFSET_MINUTES", 180);
        let calendar =
            Calendar::with_offset_minutes(offset_minutes).ok_or(ConfigError::Offset(offset_minutes))?;

        let horizon_days = parsed(&lookup, "BOOKER_HORIZON_DAYS", 14);
        let start_hour = parsed(&lookup, "BOOKER_START_HOUR", 10);
        let slots_per_day = parsed(&lookup, "BOOKER_SLOTS_PER_DAY", 11);
        let granularity_hours = parsed(&lookup, "BOOKER_GRANULARITY_HOURS", 1);
        let plan = SlotPlan::new(horizon_days, start_hour, slots_per_day, granularity_hours).ok_or(
            ConfigError::SlotPlan {
                horizon_days,
                start_hour,
                slots_per_day,
                granularity_hours,
            },
        )?;

        Ok(Self {
            bind: lookup("BOOKER_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed(&lookup, "BOOKER_PORT", 5433),
            data_dir: lookup("BOOKER_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            password: lookup("BOOKER_PASSWORD").unwrap_or_else(|| "booker".into()),
            admin_password: lookup("BOOKER_ADMIN_PASSWORD").unwrap_or_else(|| "booker-admin".into()),
            max_connections: parsed(&lookup, "BOOKER_MAX_CONNECTIONS", 256),
            compact_threshold: parsed(&lookup, "BOOKER_COMPACT_THRESHOLD", 1000),
            metrics_port: lookup("BOOKER_METRICS_PORT").and_then(|s| s.trim().parse().ok()),
            tls_cert: lookup("BOOKER_TLS_CERT"),
            tls_key: lookup("BOOKER_TLS_KEY"),
            calendar,
            plan,
            mail: MailConfig::from_lookup(&lookup),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
