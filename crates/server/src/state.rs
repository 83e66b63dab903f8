//! Shared application state.

use std::sync::Arc;

use sqlx::PgPool;

use crate::clock::Clock;
use crate::config::AmbassadorConfig;
use crate::db::AccountStore;
use crate::services::allocator::CodeAllocator;
use crate::services::auth::AuthService;
use crate::services::email::Mailer;
use crate::services::reconcile::Importer;
use crate::services::referrals::ReferralService;
use crate::services::session::SessionIssuer;

struct Inner {
    config: AmbassadorConfig,
    auth: AuthService,
    referrals: ReferralService,
    importer: Arc<Importer>,
    sessions: SessionIssuer,
    clock: Arc<dyn Clock>,
    /// Present in production wiring; `None` over the in-memory store.
    pool: Option<PgPool>,
}

/// Cheaply cloneable handle to the wired-up services.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<Inner>,
}

impl AppState {
    /// Wire the services over the given store, mailer, and clock.
    #[must_use]
    pub fn new(
        config: AmbassadorConfig,
        store: Arc<dyn AccountStore>,
        mailer: Arc<dyn Mailer>,
        clock: Arc<dyn Clock>,
        pool: Option<PgPool>,
    ) -> Self {
        let sessions = SessionIssuer::new(config.token_secret.clone());
        let auth = AuthService::new(
            Arc::clone(&store),
            mailer,
            Arc::new(CodeAllocator::new()),
            sessions.clone(),
            Arc::clone(&clock),
        );
        let referrals = ReferralService::new(Arc::clone(&store));
        let importer = Arc::new(Importer::new(store, Arc::clone(&clock)));

        Self {
            inner: Arc::new(Inner {
                config,
                auth,
                referrals,
                importer,
                sessions,
                clock,
                pool,
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &AmbassadorConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn auth(&self) -> &AuthService {
        &self.inner.auth
    }

    #[must_use]
    pub fn referrals(&self) -> &ReferralService {
        &self.inner.referrals
    }

    #[must_use]
    pub fn importer(&self) -> &Arc<Importer> {
        &self.inner.importer
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionIssuer {
        &self.inner.sessions
    }

    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    #[must_use]
    pub fn pool(&self) -> Option<&PgPool> {
        self.inner.pool.as_ref()
    }
}
