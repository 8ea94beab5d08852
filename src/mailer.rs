//! "New request" mail notifications.
//!
//! Mail is fire-and-forget: the dispatcher listens to a tenant's applied
//! events and hands a [`Mail`] to a [`Mailer`] for every submitted request.
//! A failed send is logged and counted, never reported back to the visitor
//! whose request triggered it.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::calendar::Calendar;
use crate::engine::Engine;
use crate::model::{Event, Ms, Span};
use crate::observability;

const DEFAULT_FROM_ADDRESS: &str = "booker@localhost";

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("no recipients")]
    NoRecipients,
    #[error("mail transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: &Mail) -> Result<(), MailError>;
}

/// Writes every mail to the log instead of delivering it.
#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: &Mail) -> Result<(), MailError> {
        if mail.to.is_empty() {
            return Err(MailError::NoRecipients);
        }
        info!(
            from = %mail.from,
            to = %mail.to.join(", "),
            subject = %mail.subject,
            "mail\n{}",
            mail.body
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailConfig {
    pub from: String,
    pub to: Vec<String>,
}

impl MailConfig {
    /// `None` unless `BOOKER_MAIL_TO` names at least one recipient.
    ///
    /// | Variable           | Required | Default            |
    /// |--------------------|----------|--------------------|
    /// | `BOOKER_MAIL_TO`   | yes      | (comma separated)  |
    /// | `BOOKER_MAIL_FROM` | no       | `booker@localhost` |
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let to: Vec<String> = lookup("BOOKER_MAIL_TO")?
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        if to.is_empty() {
            return None;
        }
        Some(Self {
            from: lookup("BOOKER_MAIL_FROM").unwrap_or_else(|| DEFAULT_FROM_ADDRESS.to_string()),
            to,
        })
    }
}

fn local_time(calendar: &Calendar, t: Ms) -> String {
    DateTime::<Utc>::from_timestamp_millis(t)
        .unwrap_or_default()
        .with_timezone(&calendar.offset())
        .format("%Y-%m-%d %H:%M")
        .to_string()
}

/// The mail for a freshly submitted request; `None` for every other event.
pub fn new_request_mail(
    config: &MailConfig,
    calendar: &Calendar,
    place_name: &str,
    event: &Event,
) -> Option<Mail> {
    let Event::RequestSubmitted {
        id,
        full_name,
        phone,
        contact_link,
        span: Span { start, end },
        message,
        ..
    } = event
    else {
        return None;
    };

    let mut body = format!(
        "{full_name} asks for {place_name} from {} to {}.\n\nPhone: {phone}\n",
        local_time(calendar, *start),
        local_time(calendar, *end),
    );
    body.push_str(&format!("Contact: {contact_link}\nRequest: {id}\n\n{message}\n"));

    Some(Mail {
        from: config.from.clone(),
        to: config.to.clone(),
        subject: format!("New booking request for {place_name}"),
        body,
    })
}

/// Background task that mails the admins about every new request of a
/// tenant. Runs until the engine's notify hub goes away.
pub async fn run_dispatcher(engine: Arc<Engine>, mailer: Arc<dyn Mailer>, config: MailConfig) {
    let mut rx = engine.notify.subscribe_all();
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!("mail dispatcher lagged, {skipped} events skipped");
                metrics::counter!(observability::NOTIFICATION_FAILURES_TOTAL).increment(skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        let Event::RequestSubmitted { place_id, .. } = &event else {
            continue;
        };
        let place_id = *place_id;
        let place_name = match engine.get_place(place_id).await {
            Some(place) => place.name,
            None => place_id.to_string(),
        };
        let Some(mail) = new_request_mail(&config, engine.calendar(), &place_name, &event) else {
            continue;
        };
        match mailer.send(&mail).await {
            Ok(()) => debug!(kind = event.kind(), "notification sent"),
            Err(e) => {
                warn!("notification failed: {e}");
                metrics::counter!(observability::NOTIFICATION_FAILURES_TOTAL).increment(1);
            }
        }
    }
}
