//! Hexapure back-office data layer
//!
//! The data layer behind the Hexapure website: contact-form enquiries, the
//! admin dashboard over enquiries and accounts, and the identity check that
//! decides who sees which dashboard. The document store is reached through
//! the [`gateway::CollectionGateway`] trait, snapshots are cached with a
//! fixed lifetime, and operator edits are applied optimistically with
//! rollback on failure.

pub mod admin;
pub mod auth;
pub mod cache;
pub mod clock;
pub mod config;
pub mod contact;
pub mod coordinator;
pub mod error;
pub mod export;
pub mod fetch;
pub mod filter;
pub mod gateway;
pub mod live;
pub mod models;
pub mod notify;

use std::sync::Arc;

use crate::auth::{IdentityProvider, RestIdentity, Session};
use crate::cache::{FileStore, KeyValueStore, MemoryStore, TtlCache};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::contact::{ContactFormController, ContactService};
use crate::gateway::{CollectionGateway, RestGateway};
use crate::live::Dashboard;
use crate::notify::{FunctionNotifier, Notifier};

pub use crate::error::{Error, Result};

/// The explicitly constructed application context
///
/// Holds the gateway, cache, notifier and session that every page of the
/// site shares. Build it once and pass it around.
pub struct Hexapure {
    config: Config,
    gateway: Arc<dyn CollectionGateway>,
    cache: TtlCache,
    notifier: Arc<dyn Notifier>,
    session: Session,
    clock: Arc<dyn Clock>,
}

impl Hexapure {
    /// Create a context talking to the hosted project
    ///
    /// # Example
    ///
    /// ```no_run
    /// use hexapure::{config::Config, Hexapure};
    ///
    /// let config = Config::new("https://your-project.supabase.co", "your-anon-key").unwrap();
    /// let hexapure = Hexapure::new(config).unwrap();
    /// ```
    pub fn new(config: Config) -> Result<Self> {
        let gateway: Arc<dyn CollectionGateway> = Arc::new(RestGateway::new(&config)?);
        let store: Arc<dyn KeyValueStore> = match &config.cache_dir {
            Some(dir) => Arc::new(FileStore::new(dir.clone())),
            None => Arc::new(MemoryStore::new()),
        };
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let cache = TtlCache::with_clock(store, clock.clone(), config.cache_ttl);
        let notifier: Arc<dyn Notifier> = Arc::new(FunctionNotifier::new(&config)?);
        let identity: Arc<dyn IdentityProvider> = Arc::new(RestIdentity::new(&config)?);
        Ok(Self::from_parts(config, gateway, cache, notifier, identity, clock))
    }

    /// Assemble a context from its parts, e.g. an in-memory gateway in tests
    pub fn from_parts(
        config: Config,
        gateway: Arc<dyn CollectionGateway>,
        cache: TtlCache,
        notifier: Arc<dyn Notifier>,
        identity: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let session = Session::start(identity, gateway.clone());
        Self {
            config,
            gateway,
            cache,
            notifier,
            session,
            clock,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn gateway(&self) -> &Arc<dyn CollectionGateway> {
        &self.gateway
    }

    pub fn cache(&self) -> &TtlCache {
        &self.cache
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn contact_service(&self) -> ContactService {
        ContactService::new(self.gateway.clone(), self.cache.clone(), self.notifier.clone())
    }

    /// A fresh contact form in its idle state
    pub fn contact_form(&self) -> ContactFormController {
        ContactFormController::new(
            self.contact_service(),
            self.clock.clone(),
            self.config.submission_display,
        )
    }

    /// Open the admin dashboard; only admins get in
    pub async fn dashboard(&self) -> Result<Dashboard> {
        self.session.require_admin()?;
        Dashboard::open(self.gateway.clone(), self.cache.clone()).await
    }
}

/// A convenience module for common imports
pub mod prelude {
    pub use crate::admin::{AccountAdmin, EnquiryAdmin};
    pub use crate::auth::{Landing, Session, SignUp};
    pub use crate::config::Config;
    pub use crate::contact::SubmissionState;
    pub use crate::error::{Error, Result};
    pub use crate::filter::{AccountFilter, EnquiryFilter};
    pub use crate::live::{DataState, Dashboard};
    pub use crate::models::{Account, AccountEdit, AccountStatus, ContactForm, Enquiry, EnquiryStatus, Role};
    pub use crate::Hexapure;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Identity;
    use crate::clock::ManualClock;
    use crate::gateway::MemoryGateway;
    use crate::models::{ContactForm, USERS};
    use async_trait::async_trait;
    use serde_json::json;

    struct NoopNotifier;

    #[async_trait]
    impl Notifier for NoopNotifier {
        async fn notify(&self, _form: &ContactForm) -> Result<()> {
            Ok(())
        }
    }

    struct FixedIdentity;

    #[async_trait]
    impl IdentityProvider for FixedIdentity {
        async fn sign_up(&self, email: &str, _password: &str, _name: &str) -> Result<Identity> {
            self.sign_in(email, "").await
        }

        async fn sign_in(&self, email: &str, _password: &str) -> Result<Identity> {
            Ok(Identity {
                user_id: email.to_string(),
                email: email.to_string(),
                display_name: None,
                access_token: None,
                refresh_token: None,
                expires_at: None,
            })
        }

        async fn sign_out(&self, _identity: &Identity) -> Result<()> {
            Ok(())
        }
    }

    fn hexapure(gateway: &MemoryGateway) -> Hexapure {
        Hexapure::from_parts(
            Config::new("https://example.supabase.co", "anon").unwrap(),
            Arc::new(gateway.clone()),
            TtlCache::in_memory(),
            Arc::new(NoopNotifier),
            Arc::new(FixedIdentity),
            Arc::new(ManualClock::new(0)),
        )
    }

    #[tokio::test]
    async fn dashboard_requires_admin() {
        let gateway = MemoryGateway::new();
        gateway.insert(USERS, "boss@x.com", json!({"role": "admin"})).unwrap();
        let hexapure = hexapure(&gateway);

        assert!(matches!(hexapure.dashboard().await, Err(Error::Auth(_))));

        hexapure.session().sign_in("staff@x.com", "pw").await.unwrap();
        assert!(matches!(hexapure.dashboard().await, Err(Error::Policy(_))));

        hexapure.session().sign_in("boss@x.com", "pw").await.unwrap();
        let dashboard = hexapure.dashboard().await.unwrap();
        assert_eq!(dashboard.accounts().view().len(), 1);
    }

    #[tokio::test]
    async fn submitted_enquiry_reaches_the_dashboard() {
        let gateway = MemoryGateway::new();
        gateway.insert(USERS, "boss@x.com", json!({"role": "admin"})).unwrap();
        let hexapure = hexapure(&gateway);
        hexapure.session().sign_in("boss@x.com", "pw").await.unwrap();
        let dashboard = hexapure.dashboard().await.unwrap();

        let form = ContactForm {
            name: "Lee".into(),
            email: "lee@x.com".into(),
            subject: "Septic".into(),
            message: "Help".into(),
            ..Default::default()
        };
        let id = hexapure.contact_form().submit(form).await.unwrap();
        assert!(dashboard.enquiries().view().get(&id).is_some());
        assert_eq!(dashboard.stats().new, 1);
    }
}
