//! Configuration for the Hexapure data layer

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default lifetime of a cached snapshot
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// How long a submission outcome stays on screen before the form resets
pub const DEFAULT_SUBMISSION_DISPLAY: Duration = Duration::from_secs(3);

const DEFAULT_SENDER: &str = "hexapurebiotanks@gmail.com";

/// Configuration for the Hexapure context
#[derive(Debug, Clone)]
pub struct Config {
    /// The base URL of the hosted project
    pub url: String,

    /// The anonymous API key of the hosted project
    pub key: String,

    /// Endpoint of the email notification function
    pub functions_url: Option<String>,

    /// Directory backing the local snapshot cache
    pub cache_dir: Option<PathBuf>,

    /// Lifetime of cached snapshots
    pub cache_ttl: Duration,

    /// The request timeout
    pub request_timeout: Option<Duration>,

    /// Table schema used by the change feed
    pub db_schema: String,

    /// Interval between snapshot refreshes when the change feed is down
    pub poll_interval: Duration,

    /// How long a submission outcome stays visible
    pub submission_display: Duration,

    /// Email provider settings, only needed by the email function
    pub mailer: MailerConfig,
}

/// Settings for the transactional email function
#[derive(Debug, Clone)]
pub struct MailerConfig {
    /// Provider API key
    pub api_key: Option<String>,

    /// Provider base URL
    pub api_url: String,

    /// Sender address of both emails
    pub from_email: String,

    /// Recipient of the admin notification
    pub admin_email: String,
}

impl Default for MailerConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: "https://api.brevo.com".to_string(),
            from_email: DEFAULT_SENDER.to_string(),
            admin_email: DEFAULT_SENDER.to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: "http://localhost:54321".to_string(),
            key: String::new(),
            functions_url: None,
            cache_dir: None,
            cache_ttl: DEFAULT_CACHE_TTL,
            request_timeout: Some(Duration::from_secs(30)),
            db_schema: "public".to_string(),
            poll_interval: Duration::from_secs(30),
            submission_display: DEFAULT_SUBMISSION_DISPLAY,
            mailer: MailerConfig::default(),
        }
    }
}

impl Config {
    /// Create a configuration for a project URL and key
    pub fn new(url: &str, key: &str) -> Result<Self> {
        url::Url::parse(url)?;
        if key.is_empty() {
            return Err(Error::config("key cannot be empty"));
        }
        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            key: key.to_string(),
            ..Self::default()
        })
    }

    /// Build a configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("HEXAPURE_URL")
            .map_err(|_| Error::config("HEXAPURE_URL environment variable not found"))?;
        let key = std::env::var("HEXAPURE_KEY")
            .map_err(|_| Error::config("HEXAPURE_KEY environment variable not found"))?;

        let mut config = Self::new(&url, &key)?;

        if let Ok(functions_url) = std::env::var("HEXAPURE_FUNCTIONS_URL") {
            config = config.with_functions_url(&functions_url);
        }
        if let Ok(dir) = std::env::var("HEXAPURE_CACHE_DIR") {
            config = config.with_cache_dir(dir);
        }
        if let Ok(api_key) = std::env::var("BREVO_API_KEY") {
            config.mailer.api_key = Some(api_key);
        }
        if let Ok(from) = std::env::var("FROM_EMAIL") {
            config.mailer.from_email = from;
        }
        if let Ok(admin) = std::env::var("ADMIN_EMAIL") {
            config.mailer.admin_email = admin;
        }

        Ok(config)
    }

    /// Set the email function endpoint
    pub fn with_functions_url(mut self, value: &str) -> Self {
        self.functions_url = Some(value.to_string());
        self
    }

    /// Set the cache directory
    pub fn with_cache_dir(mut self, value: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(value.into());
        self
    }

    /// Set the cache lifetime
    pub fn with_cache_ttl(mut self, value: Duration) -> Self {
        self.cache_ttl = value;
        self
    }

    /// Set the request timeout
    pub fn with_request_timeout(mut self, value: Option<Duration>) -> Self {
        self.request_timeout = value;
        self
    }

    /// Set the table schema
    pub fn with_db_schema(mut self, value: &str) -> Self {
        self.db_schema = value.to_string();
        self
    }

    /// Set the fallback polling interval
    pub fn with_poll_interval(mut self, value: Duration) -> Self {
        self.poll_interval = value;
        self
    }

    /// Set the submission outcome display duration
    pub fn with_submission_display(mut self, value: Duration) -> Self {
        self.submission_display = value;
        self
    }

    /// Set the email provider settings
    pub fn with_mailer(mut self, value: MailerConfig) -> Self {
        self.mailer = value;
        self
    }

    /// The URL the notification function is reached at
    pub fn notification_url(&self) -> String {
        self.functions_url
            .clone()
            .unwrap_or_else(|| format!("{}/functions/v1/send-email", self.url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_empty_key() {
        let result = Config::new("https://example.supabase.co", "");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn new_rejects_bad_url() {
        assert!(matches!(Config::new("not a url", "key"), Err(Error::Url(_))));
    }

    #[test]
    fn notification_url_defaults_to_function_path() {
        let config = Config::new("https://example.supabase.co/", "key").unwrap();
        assert_eq!(
            config.notification_url(),
            "https://example.supabase.co/functions/v1/send-email"
        );

        let config = config.with_functions_url("https://mail.example.com/send");
        assert_eq!(config.notification_url(), "https://mail.example.com/send");
    }
}
