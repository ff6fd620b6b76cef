//! Sign-up, sign-in and sign-out against the identity provider

mod session;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::fetch::{http_client, Fetch};

pub use session::*;

/// Minimum password length accepted at sign-up
pub const MIN_PASSWORD_LEN: usize = 6;

/// A signed-in identity-provider user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Identity {
    pub fn is_expired(&self) -> bool {
        self.expires_at.map_or(false, |at| Utc::now() >= at)
    }
}

/// Credential store the accounts are paired with
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_up(&self, email: &str, password: &str, display_name: &str) -> Result<Identity>;
    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity>;
    async fn sign_out(&self, identity: &Identity) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: Value,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    user: Option<AuthUser>,
}

impl AuthResponse {
    /// Sign-up without email confirmation answers with the bare user object
    fn parse(body: Value) -> Result<Self> {
        if body.get("user").is_some() || body.get("access_token").is_some() {
            return Ok(serde_json::from_value(body)?);
        }
        let user: AuthUser = serde_json::from_value(body)?;
        Ok(Self {
            access_token: None,
            refresh_token: None,
            expires_in: None,
            user: Some(user),
        })
    }

    fn into_identity(self, fallback_email: &str) -> Result<Identity> {
        let user = self
            .user
            .ok_or_else(|| Error::auth("identity provider returned no user"))?;
        let display_name = user.user_metadata["display_name"]
            .as_str()
            .map(str::to_string);
        Ok(Identity {
            user_id: user.id,
            email: user.email.unwrap_or_else(|| fallback_email.to_string()),
            display_name,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: self
                .expires_in
                .map(|secs| Utc::now() + ChronoDuration::seconds(secs)),
        })
    }
}

/// GoTrue-style identity provider of the hosted project
#[derive(Clone)]
pub struct RestIdentity {
    url: String,
    key: String,
    client: Client,
}

impl RestIdentity {
    pub fn new(config: &Config) -> Result<Self> {
        let client = http_client(config.request_timeout)?;
        Ok(Self::with_client(&config.url, &config.key, client))
    }

    pub fn with_client(url: &str, key: &str, client: Client) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            key: key.to_string(),
            client,
        }
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1{}", self.url, path)
    }
}

#[async_trait]
impl IdentityProvider for RestIdentity {
    async fn sign_up(&self, email: &str, password: &str, display_name: &str) -> Result<Identity> {
        let body: Value = Fetch::post(&self.client, &self.auth_url("/signup"))
            .api_key(&self.key)
            .json(&json!({
                "email": email,
                "password": password,
                "data": { "display_name": display_name },
            }))?
            .execute()
            .await
            .map_err(auth_failure)?;
        let identity = AuthResponse::parse(body)?.into_identity(email)?;
        info!("Signed up {}", identity.user_id);
        Ok(identity)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity> {
        let body: Value = Fetch::post(&self.client, &self.auth_url("/token"))
            .api_key(&self.key)
            .query("grant_type", "password")
            .json(&json!({ "email": email, "password": password }))?
            .execute()
            .await
            .map_err(auth_failure)?;
        let identity = AuthResponse::parse(body)?.into_identity(email)?;
        info!("Signed in {}", identity.user_id);
        Ok(identity)
    }

    async fn sign_out(&self, identity: &Identity) -> Result<()> {
        let token = match &identity.access_token {
            Some(token) => token,
            None => {
                debug!("No access token to revoke for {}", identity.user_id);
                return Ok(());
            }
        };
        Fetch::post(&self.client, &self.auth_url("/logout"))
            .api_key(&self.key)
            .bearer_auth(token)
            .execute_empty()
            .await
            .map_err(auth_failure)
    }
}

/// Identity-provider rejections are authentication errors whatever the status
fn auth_failure(error: Error) -> Error {
    match error {
        Error::Database(message) => Error::Auth(message),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_session_response() {
        let body = json!({
            "access_token": "jwt",
            "refresh_token": "r",
            "expires_in": 3600,
            "user": {"id": "u1", "email": "a@b.com", "user_metadata": {"display_name": "Ann"}}
        });
        let identity = AuthResponse::parse(body).unwrap().into_identity("x").unwrap();
        assert_eq!(identity.user_id, "u1");
        assert_eq!(identity.display_name.as_deref(), Some("Ann"));
        assert_eq!(identity.access_token.as_deref(), Some("jwt"));
        assert!(!identity.is_expired());
    }

    #[test]
    fn parses_bare_user_response() {
        let body = json!({"id": "u2", "email": "b@c.com", "user_metadata": {}});
        let identity = AuthResponse::parse(body).unwrap().into_identity("x").unwrap();
        assert_eq!(identity.user_id, "u2");
        assert_eq!(identity.access_token, None);
        assert_eq!(identity.expires_at, None);
    }

    #[test]
    fn database_errors_become_auth_errors() {
        assert!(matches!(auth_failure(Error::database("400")), Error::Auth(_)));
        assert!(matches!(auth_failure(Error::validation("x")), Error::Validation(_)));
    }
}
