//! Application state shared across HTTP handlers.

use crate::auth::AuthService;
use crate::coordinator::EntryCoordinator;
use crate::mailer::Mailer;
use crate::store::EntryStore;
use std::sync::Arc;

/// Shared resources for the HTTP surface. Cloned cheaply per request.
#[derive(Clone)]
pub struct AppState {
    /// The entry coordinator (all state-changing business operations).
    pub coordinator: Arc<EntryCoordinator>,
    /// Driver authentication and password-reset flows.
    pub auth: Arc<AuthService>,
    /// Direct store access for query endpoints and registration.
    pub store: Arc<dyn EntryStore>,
    /// Outbound mail (registration confirmations).
    pub mailer: Arc<dyn Mailer>,
    /// Shared admin token; empty disables all admin endpoints.
    pub admin_token: String,
}

impl AppState {
    /// Assemble the state.
    #[must_use]
    pub fn new(
        coordinator: Arc<EntryCoordinator>,
        auth: Arc<AuthService>,
        store: Arc<dyn EntryStore>,
        mailer: Arc<dyn Mailer>,
        admin_token: String,
    ) -> Self {
        Self {
            coordinator,
            auth,
            store,
            mailer,
            admin_token,
        }
    }
}
