//! The signed-in session and its current-account observable

use chrono::{SecondsFormat, Utc};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use super::{Identity, IdentityProvider, MIN_PASSWORD_LEN};
use crate::error::{Error, Result};
use crate::gateway::CollectionGateway;
use crate::models::{Account, AccountStatus, Role, USERS};

/// Registration form
#[derive(Debug, Clone, Default)]
pub struct SignUp {
    pub name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

impl SignUp {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() || self.email.trim().is_empty() {
            return Err(Error::validation("name and email are required"));
        }
        if self.password != self.confirm_password {
            return Err(Error::validation("Passwords do not match."));
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(Error::validation(format!(
                "Password must be at least {} characters.",
                MIN_PASSWORD_LEN
            )));
        }
        Ok(())
    }
}

/// Where a visitor goes after the identity check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Landing {
    AdminDashboard,
    UserDashboard,
    SignIn,
}

/// The signed-in identity and its account document
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentAccount {
    pub identity: Identity,
    pub account: Account,
}

impl CurrentAccount {
    pub fn is_admin(&self) -> bool {
        self.account.is_admin()
    }

    pub fn landing(&self) -> Landing {
        if self.is_admin() {
            Landing::AdminDashboard
        } else {
            Landing::UserDashboard
        }
    }
}

/// Explicitly constructed sign-in state
///
/// Created once with [`Session::start`]; [`Session::sign_out`] tears it
/// down. Observers follow the current account through [`Session::watch`].
pub struct Session {
    identity: Arc<dyn IdentityProvider>,
    gateway: Arc<dyn CollectionGateway>,
    current: watch::Sender<Option<CurrentAccount>>,
}

impl Session {
    pub fn start(identity: Arc<dyn IdentityProvider>, gateway: Arc<dyn CollectionGateway>) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            identity,
            gateway,
            current,
        }
    }

    pub fn current(&self) -> Option<CurrentAccount> {
        self.current.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Option<CurrentAccount>> {
        self.current.subscribe()
    }

    pub fn landing(&self) -> Landing {
        self.current()
            .map(|current| current.landing())
            .unwrap_or(Landing::SignIn)
    }

    fn publish(&self, account: Option<CurrentAccount>) {
        self.current.send_replace(account);
    }

    /// Register with the identity provider and write the account document
    pub async fn sign_up(&self, form: &SignUp) -> Result<CurrentAccount> {
        form.validate()?;
        let identity = self
            .identity
            .sign_up(form.email.trim(), &form.password, form.name.trim())
            .await?;
        self.gateway.set_access_token(identity.access_token.as_deref());

        let created_at = Utc::now();
        let document = json!({
            "uid": identity.user_id,
            "name": form.name.trim(),
            "email": form.email.trim(),
            "role": Role::User,
            "status": AccountStatus::Active,
            "createdAt": created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        });
        if let Err(e) = self.gateway.put(USERS, &identity.user_id, document).await {
            warn!("Account document for {} was not written: {}", identity.user_id, e);
            self.gateway.set_access_token(None);
            return Err(e);
        }

        let current = CurrentAccount {
            account: Account {
                id: identity.user_id.clone(),
                name: form.name.trim().to_string(),
                email: form.email.trim().to_string(),
                role: Role::User,
                status: AccountStatus::Active,
                created_at: Some(created_at),
                updated_at: None,
            },
            identity,
        };
        info!("Account {} created", current.account.id);
        self.publish(Some(current.clone()));
        Ok(current)
    }

    /// Sign in and resolve the role from the account document
    ///
    /// A missing or unreadable account document counts as a plain user;
    /// inactive accounts are turned away.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<CurrentAccount> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(Error::validation("email and password are required"));
        }
        let identity = self.identity.sign_in(email.trim(), password).await?;
        self.gateway.set_access_token(identity.access_token.as_deref());

        let account = match self.gateway.get(USERS, &identity.user_id).await {
            Ok(Some(doc)) => match doc.decode::<Account>() {
                Ok(account) => account,
                Err(e) => {
                    warn!("Unreadable account document {}: {}", identity.user_id, e);
                    Self::fallback_account(&identity)
                }
            },
            Ok(None) => {
                warn!("No account document for {}", identity.user_id);
                Self::fallback_account(&identity)
            }
            Err(e) => {
                warn!("Error checking user role: {}", e);
                Self::fallback_account(&identity)
            }
        };

        if account.status == AccountStatus::Inactive {
            self.gateway.set_access_token(None);
            if let Err(e) = self.identity.sign_out(&identity).await {
                warn!("Error signing out inactive account: {}", e);
            }
            return Err(Error::auth("this account has been deactivated"));
        }

        let current = CurrentAccount { identity, account };
        info!("Signed in as {} ({})", current.account.email, current.account.role);
        self.publish(Some(current.clone()));
        Ok(current)
    }

    fn fallback_account(identity: &Identity) -> Account {
        Account {
            id: identity.user_id.clone(),
            name: identity
                .display_name
                .clone()
                .unwrap_or_else(|| identity.email.clone()),
            email: identity.email.clone(),
            role: Role::User,
            status: AccountStatus::Active,
            created_at: None,
            updated_at: None,
        }
    }

    /// End the session; the local state is cleared even if the provider
    /// call fails
    pub async fn sign_out(&self) -> Result<()> {
        let current = self.current();
        self.gateway.set_access_token(None);
        self.publish(None);
        match current {
            Some(current) => self.identity.sign_out(&current.identity).await,
            None => Ok(()),
        }
    }

    /// Guard for pages that need any signed-in account
    pub fn require_signed_in(&self) -> Result<CurrentAccount> {
        self.current().ok_or_else(|| Error::auth("not signed in"))
    }

    /// Guard for the admin dashboard
    pub fn require_admin(&self) -> Result<CurrentAccount> {
        let current = self.require_signed_in()?;
        if !current.is_admin() {
            return Err(Error::policy("admin role required"));
        }
        Ok(current)
    }
}
