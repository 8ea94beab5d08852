use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tracing::info;

use crate::calendar::Calendar;
use crate::compactor;
use crate::engine::Engine;
use crate::limits::*;
use crate::mailer::{self, MailConfig, Mailer};
use crate::notify::NotifyHub;
use crate::slots::SlotPlan;

/// Tenant of sessions that name no database.
pub const DEFAULT_TENANT: &str = "default";

/// Settings shared by every tenant engine.
#[derive(Clone)]
pub struct TenantSettings {
    pub calendar: Calendar,
    pub plan: SlotPlan,
    pub compact_threshold: u64,
    pub mail: Option<MailConfig>,
    pub mailer: Arc<dyn Mailer>,
}

impl Default for TenantSettings {
    fn default() -> Self {
        Self {
            calendar: Calendar::default(),
            plan: SlotPlan::default(),
            compact_threshold: 1000,
            mail: None,
            mailer: Arc::new(mailer::LogMailer),
        }
    }
}

/// Manages per-tenant engines. Each tenant gets its own Engine + WAL +
/// compactor, plus a mail dispatcher when mail is configured.
/// Tenant = database name from the pgwire connection.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    /// Serialises tenant creation so one tenant never gets two engines.
    creating: Mutex<()>,
    data_dir: PathBuf,
    settings: TenantSettings,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, settings: TenantSettings) -> Self {
        Self {
            engines: DashMap::new(),
            creating: Mutex::new(()),
            data_dir,
            settings,
        }
    }

    /// Get or lazily create an engine for the given tenant.
    pub fn get_or_create(&self, tenant: &str) -> io::Result<Arc<Engine>> {
        if let Some(engine) = self.get(tenant) {
            return Ok(engine);
        }
        let wal_path = self.wal_path(tenant)?;

        let _creating = self.creating.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(engine) = self.get(tenant) {
            return Ok(engine);
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(io::Error::other("too many tenants"));
        }

        let engine = Arc::new(Engine::new(
            wal_path,
            Arc::new(NotifyHub::new()),
            self.settings.calendar,
            self.settings.plan,
        )?);

        let threshold = self.settings.compact_threshold;
        tokio::spawn(compactor::run_compactor(engine.clone(), threshold));
        if let Some(mail) = self.settings.mail.clone() {
            tokio::spawn(mailer::run_dispatcher(
                engine.clone(),
                self.settings.mailer.clone(),
                mail,
            ));
        }

        self.engines.insert(tenant.to_string(), engine.clone());
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        info!(tenant, "tenant loaded");
        Ok(engine)
    }

    /// Like `get_or_create`, but only for tenants that already have a WAL
    /// on disk. Used before a session has authenticated.
    pub fn open_existing(&self, tenant: &str) -> io::Result<Option<Arc<Engine>>> {
        if let Some(engine) = self.get(tenant) {
            return Ok(Some(engine));
        }
        if !self.wal_path(tenant)?.exists() {
            return Ok(None);
        }
        self.get_or_create(tenant).map(Some)
    }

    /// The engine of an already loaded tenant.
    pub fn get(&self, tenant: &str) -> Option<Arc<Engine>> {
        self.engines.get(tenant).map(|e| e.value().clone())
    }

    /// WAL file of `tenant`. Names are used verbatim as file names, so only
    /// letters, digits, `_` and `-` are accepted.
    fn wal_path(&self, tenant: &str) -> io::Result<PathBuf> {
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }
        if tenant.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }
        if !tenant
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "tenant name may only contain letters, digits, _ and -",
            ));
        }
        Ok(self.data_dir.join(format!("{tenant}.wal")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use std::fs;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("booker_test_tenant").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn manager(dir: PathBuf) -> TenantManager {
        TenantManager::new(
            dir,
            TenantSettings {
                calendar: Calendar::utc(),
                ..TenantSettings::default()
            },
        )
    }

    #[tokio::test]
    async fn tenant_isolation() {
        let dir = test_data_dir("isolation");
        let tm = manager(dir);

        let eng_a = tm.get_or_create("tenant_a").unwrap();
        let eng_b = tm.get_or_create("tenant_b").unwrap();

        let pid = Ulid::new();
        for engine in [&eng_a, &eng_b] {
            engine
                .create_place(pid, "Hall".into(), "https://maps.example/hall".into(), None, None)
                .await
                .unwrap();
        }

        // 2024-05-01 12:00 to 14:00 UTC
        let start = 1_714_521_600_000 + 12 * HOUR_MS;
        let rid = Ulid::new();
        eng_a
            .submit_request(
                rid,
                pid,
                crate::engine::Applicant {
                    full_name: "Ivan Petrov".into(),
                    phone: "89991234567".into(),
                    contact_link: "https://vk.com/ivan".into(),
                },
                start,
                start + 2 * HOUR_MS,
                "Choir rehearsal for twelve people".into(),
            )
            .await
            .unwrap();
        eng_a.decide(rid, true, "ok".into(), None).await.unwrap();

        assert_eq!(
            eng_a.list_approved_intervals(pid).await.unwrap(),
            vec![Span::new(start, start + 2 * HOUR_MS)]
        );
        assert!(eng_b.list_approved_intervals(pid).await.unwrap().is_empty());
        assert!(eng_b.get_request(rid).await.is_none());
    }

    #[tokio::test]
    async fn tenant_lazy_creation() {
        let dir = test_data_dir("lazy");
        let tm = manager(dir.clone());

        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert!(entries.is_empty());
        assert!(tm.get("my_db").is_none());

        let _eng = tm.get_or_create("my_db").unwrap();

        assert!(dir.join("my_db.wal").exists());
        assert!(tm.get("my_db").is_some());
    }

    #[tokio::test]
    async fn tenant_same_engine_returned() {
        let dir = test_data_dir("same_eng");
        let tm = manager(dir);

        let eng1 = tm.get_or_create("foo").unwrap();
        let eng2 = tm.get_or_create("foo").unwrap();
        assert!(Arc::ptr_eq(&eng1, &eng2));
    }

    #[tokio::test]
    async fn tenant_names_must_be_plain() {
        let dir = test_data_dir("plain_names");
        let tm = manager(dir.clone());

        for name in ["../evil", "../..", "", "a b", "x/y"] {
            let err = tm.get_or_create(name).err().unwrap();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput, "{name:?}");
        }
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);

        let _eng = tm.get_or_create("evil").unwrap();
        assert!(dir.join("evil.wal").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_connections_share_one_engine() {
        let dir = test_data_dir("concurrent_create");
        let tm = Arc::new(manager(dir));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let tm = tm.clone();
                tokio::spawn(async move { tm.get_or_create("club").unwrap() })
            })
            .collect();
        let mut engines = Vec::new();
        for handle in handles {
            engines.push(handle.await.unwrap());
        }
        assert!(engines.iter().all(|e| Arc::ptr_eq(e, &engines[0])));
        assert!(Arc::ptr_eq(&engines[0], &tm.get("club").unwrap()));
    }

    #[tokio::test]
    async fn open_existing_loads_only_tenants_on_disk() {
        let dir = test_data_dir("open_existing");
        {
            let tm = manager(dir.clone());
            tm.get_or_create("club")
                .unwrap()
                .create_admin(Ulid::new(), "anna".into())
                .await
                .unwrap();
        }

        let tm = manager(dir.clone());
        assert!(tm.open_existing("ghost").unwrap().is_none());
        assert!(!dir.join("ghost.wal").exists());
        let club = tm.open_existing("club").unwrap().unwrap();
        assert!(club.find_admin_by_name("anna").is_some());
        assert!(tm.open_existing("../club").is_err());
    }

    #[tokio::test]
    async fn tenant_name_too_long() {
        let dir = test_data_dir("name_too_long");
        let tm = manager(dir);

        let long_name = "x".repeat(MAX_TENANT_NAME_LEN + 1);
        let err = tm.get_or_create(&long_name).err().unwrap();
        assert!(err.to_string().contains("tenant name too long"));
    }

    #[tokio::test]
    async fn tenant_count_limit() {
        let dir = test_data_dir("count_limit");
        let tm = manager(dir);

        for i in 0..MAX_TENANTS {
            tm.get_or_create(&format!("t{i}")).unwrap();
        }
        let err = tm.get_or_create("one_more").err().unwrap();
        assert!(err.to_string().contains("too many tenants"));
    }
}
