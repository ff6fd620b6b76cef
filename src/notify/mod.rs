//! Email notification for new enquiries
//!
//! Submitting the contact form asks a [`Notifier`] to email the submitter
//! and the company. The usual notifier posts the form to the hosted email
//! function; a [`Mailer`] can also talk to the email provider directly.

mod mailer;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::fetch::{http_client, Fetch};
use crate::models::ContactForm;

pub use mailer::*;

/// Sends the emails that follow a contact form submission
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, form: &ContactForm) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct FunctionReply {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    details: Option<String>,
}

/// Calls the hosted email function with the submitted form as JSON
#[derive(Clone)]
pub struct FunctionNotifier {
    url: String,
    key: String,
    client: Client,
}

impl FunctionNotifier {
    pub fn new(config: &Config) -> Result<Self> {
        let client = http_client(config.request_timeout)?;
        Ok(Self::with_client(&config.notification_url(), &config.key, client))
    }

    pub fn with_client(url: &str, key: &str, client: Client) -> Self {
        Self {
            url: url.to_string(),
            key: key.to_string(),
            client,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Notifier for FunctionNotifier {
    async fn notify(&self, form: &ContactForm) -> Result<()> {
        debug!("Invoking email function at {}", self.url);
        let response = Fetch::post(&self.client, &self.url)
            .api_key(&self.key)
            .json(form)?
            .execute_raw()
            .await?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let reply: Option<FunctionReply> = serde_json::from_str(&text).ok();

        if !status.is_success() {
            let reason = reply
                .map(|r| match (r.error, r.details) {
                    (Some(error), Some(details)) => format!("{}: {}", error, details),
                    (Some(error), None) => error,
                    (None, _) => text.clone(),
                })
                .unwrap_or(text);
            return Err(Error::function(format!("email function returned {}: {}", status, reason)));
        }

        match reply {
            Some(reply) if !reply.success => Err(Error::function(
                reply.error.unwrap_or_else(|| "email function reported failure".to_string()),
            )),
            Some(reply) => {
                info!("{}", reply.message.unwrap_or_else(|| "Emails sent".to_string()));
                Ok(())
            }
            None => Ok(()),
        }
    }
}
