pub mod auth;
pub mod calendar;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod index;
pub mod limits;
pub mod mailer;
pub mod model;
pub mod notify;
pub mod observability;
pub mod selection;
pub mod slots;
pub mod sql;
pub mod tenant;
pub mod tls;
pub mod wal;
pub mod wire;
