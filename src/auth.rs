use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

use crate::tenant::{TenantManager, DEFAULT_TENANT};

/// Cleartext password source for one connection: registered admins of the
/// tenant log in with the admin password, everybody else with the visitor
/// password. Remembers which of the two the session was asked for.
pub struct BookerAuthSource {
    tenants: Arc<TenantManager>,
    password: String,
    admin_password: String,
    admin_login: Arc<AtomicBool>,
}

impl fmt::Debug for BookerAuthSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BookerAuthSource")
            .field("admin_login", &self.admin_login)
            .finish_non_exhaustive()
    }
}

impl BookerAuthSource {
    pub fn new(
        tenants: Arc<TenantManager>,
        password: String,
        admin_password: String,
        admin_login: Arc<AtomicBool>,
    ) -> Self {
        Self {
            tenants,
            password,
            admin_password,
            admin_login,
        }
    }

    /// Whether `user` is a registered admin of `tenant`. Runs before the
    /// password check, so it never creates a tenant.
    pub fn is_admin(&self, tenant: Option<&str>, user: Option<&str>) -> bool {
        let Some(user) = user else {
            return false;
        };
        match self.tenants.open_existing(tenant.unwrap_or(DEFAULT_TENANT)) {
            Ok(Some(engine)) => engine.find_admin_by_name(user).is_some(),
            Ok(None) => false,
            Err(e) => {
                tracing::warn!("admin lookup failed: {e}");
                false
            }
        }
    }
}

#[async_trait]
impl AuthSource for BookerAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        let admin = self.is_admin(login.database().as_deref(), login.user().as_deref());
        self.admin_login.store(admin, Ordering::Release);
        let password = if admin {
            &self.admin_password
        } else {
            &self.password
        };
        Ok(Password::new(None, password.as_bytes().to_vec()))
    }
}
