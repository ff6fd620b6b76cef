//! Public contact form submission
//!
//! A submission is recorded once the enquiry document is written. The
//! emails are sent afterwards in the background; their failure is logged
//! and never turns a recorded submission into a failed one.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{info, warn};

use crate::cache::{CacheKey, TtlCache};
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::gateway::CollectionGateway;
use crate::models::{ContactForm, CONTACTS};
use crate::notify::Notifier;

/// Writes enquiries and triggers their notification emails
#[derive(Clone)]
pub struct ContactService {
    gateway: Arc<dyn CollectionGateway>,
    cache: TtlCache,
    notifier: Arc<dyn Notifier>,
}

impl ContactService {
    pub fn new(gateway: Arc<dyn CollectionGateway>, cache: TtlCache, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            gateway,
            cache,
            notifier,
        }
    }

    /// Record a new enquiry with status `new` and return its id
    ///
    /// Must run inside a tokio runtime; the notification is spawned onto it.
    pub async fn submit(&self, form: ContactForm) -> Result<String> {
        form.validate()?;
        let form = form.normalized();

        let id = self.gateway.create(CONTACTS, form.to_document()?).await?;
        info!("Contact added with ID: {}", id);
        self.cache.invalidate(CacheKey::Contacts);
        self.cache.invalidate(CacheKey::Stats);

        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            match notifier.notify(&form).await {
                Ok(()) => info!("Notification emails sent for {}", form.email),
                Err(e) => warn!("Email sending failed: {}", e),
            }
        });

        Ok(id)
    }
}

/// Where the form is in its submit cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionState {
    Idle,
    Submitting,
    Success,
    Failed(String),
}

struct Progress {
    state: SubmissionState,
    settled_at: i64,
}

/// Drives the form through Idle, Submitting and an outcome
///
/// An outcome is shown for the display duration and then reads as `Idle`
/// again; [`dismiss`](Self::dismiss) resets it early.
pub struct ContactFormController {
    service: ContactService,
    clock: Arc<dyn Clock>,
    display: Duration,
    progress: Mutex<Progress>,
}

impl ContactFormController {
    pub fn new(service: ContactService, clock: Arc<dyn Clock>, display: Duration) -> Self {
        Self {
            service,
            clock,
            display,
            progress: Mutex::new(Progress {
                state: SubmissionState::Idle,
                settled_at: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn settle(&self, progress: &mut Progress) {
        let shown_for = self.clock.now_millis() - progress.settled_at;
        let outcome = matches!(progress.state, SubmissionState::Success | SubmissionState::Failed(_));
        if outcome && shown_for >= self.display.as_millis() as i64 {
            progress.state = SubmissionState::Idle;
        }
    }

    pub fn state(&self) -> SubmissionState {
        let mut progress = self.lock();
        self.settle(&mut progress);
        progress.state.clone()
    }

    /// Clear a shown outcome
    pub fn dismiss(&self) {
        let mut progress = self.lock();
        if progress.state != SubmissionState::Submitting {
            progress.state = SubmissionState::Idle;
        }
    }

    pub async fn submit(&self, form: ContactForm) -> Result<String> {
        {
            let mut progress = self.lock();
            self.settle(&mut progress);
            if progress.state == SubmissionState::Submitting {
                return Err(Error::validation("a submission is already in progress"));
            }
            progress.state = SubmissionState::Submitting;
        }

        let result = self.service.submit(form).await;

        let mut progress = self.lock();
        progress.state = match &result {
            Ok(_) => SubmissionState::Success,
            Err(e) => {
                warn!("Error submitting form: {}", e);
                SubmissionState::Failed(e.to_string())
            }
        };
        progress.settled_at = self.clock.now_millis();
        result
    }
}
