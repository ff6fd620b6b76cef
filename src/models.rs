//! Records stored in the enquiry and account collections

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Collection holding contact-form enquiries
pub const CONTACTS: &str = "contacts";

/// Collection holding account documents
pub const USERS: &str = "users";

/// A document kind that lives in a named collection
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Collection the record is stored in
    const COLLECTION: &'static str;

    /// The store-assigned document id
    fn id(&self) -> &str;
}

/// Processing status of an enquiry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnquiryStatus {
    #[default]
    New,
    Contacted,
    Pending,
    Resolved,
}

impl EnquiryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnquiryStatus::New => "new",
            EnquiryStatus::Contacted => "contacted",
            EnquiryStatus::Pending => "pending",
            EnquiryStatus::Resolved => "resolved",
        }
    }
}

impl fmt::Display for EnquiryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnquiryStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "new" => Ok(EnquiryStatus::New),
            "contacted" => Ok(EnquiryStatus::Contacted),
            "pending" => Ok(EnquiryStatus::Pending),
            "resolved" => Ok(EnquiryStatus::Resolved),
            other => Err(Error::validation(format!("unknown enquiry status '{}'", other))),
        }
    }
}

/// Permission level of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    User,
    Moderator,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
            Role::Moderator => "moderator",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            "moderator" => Ok(Role::Moderator),
            other => Err(Error::validation(format!("unknown role '{}'", other))),
        }
    }
}

/// Whether an account may sign in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    #[default]
    Active,
    Inactive,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Inactive => "inactive",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(AccountStatus::Active),
            "inactive" => Ok(AccountStatus::Inactive),
            other => Err(Error::validation(format!("unknown account status '{}'", other))),
        }
    }
}

/// A contact-form submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enquiry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: EnquiryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Enquiry {
    /// Creation day as `YYYY-MM-DD`, or `N/A` while the store has not stamped it
    pub fn date(&self) -> String {
        self.created_at
            .map(|at| at.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "N/A".to_string())
    }
}

impl Record for Enquiry {
    const COLLECTION: &'static str = CONTACTS;

    fn id(&self) -> &str {
        &self.id
    }
}

/// A registered user, paired with an identity provider credential
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub status: AccountStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Account {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl Record for Account {
    const COLLECTION: &'static str = USERS;

    fn id(&self) -> &str {
        &self.id
    }
}

/// Fields an operator may change through the account edit form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountEdit {
    pub name: String,
    pub email: String,
    pub role: Role,
    pub status: AccountStatus,
}

impl AccountEdit {
    /// Pre-fill the form from an existing account
    pub fn from_account(account: &Account) -> Self {
        Self {
            name: account.name.clone(),
            email: account.email.clone(),
            role: account.role,
            status: account.status,
        }
    }

    /// Apply the form to an account, keeping id and timestamps
    pub fn apply_to(&self, account: &mut Account) {
        account.name = self.name.clone();
        account.email = self.email.clone();
        account.role = self.role;
        account.status = self.status;
    }
}

/// Payload of the public contact form
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactForm {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub email: String,
    pub subject: String,
    pub message: String,
}

impl ContactForm {
    /// Check that name, email, subject and message are present
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("name", &self.name),
            ("email", &self.email),
            ("subject", &self.subject),
            ("message", &self.message),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(field, _)| *field)
            .collect();

        if !missing.is_empty() {
            return Err(Error::validation(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }

    /// Blank optional fields are stored as absent
    pub fn normalized(mut self) -> Self {
        self.company = self.company.filter(|v| !v.trim().is_empty());
        self.phone = self.phone.filter(|v| !v.trim().is_empty());
        self
    }

    /// Document body for a new enquiry; the store stamps id and `createdAt`
    pub fn to_document(&self) -> Result<serde_json::Value> {
        let mut value = serde_json::to_value(self)?;
        if let Some(fields) = value.as_object_mut() {
            fields.insert(
                "status".to_string(),
                serde_json::Value::String(EnquiryStatus::New.as_str().to_string()),
            );
        }
        Ok(value)
    }
}

/// Dashboard counters derived from the enquiry collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnquiryStats {
    pub total: usize,
    pub new: usize,
    /// Contacted or already resolved
    pub contacted: usize,
    pub pending: usize,
}

impl EnquiryStats {
    pub fn from_enquiries(enquiries: &[Enquiry]) -> Self {
        let count = |pred: fn(EnquiryStatus) -> bool| {
            enquiries.iter().filter(|e| pred(e.status)).count()
        };
        Self {
            total: enquiries.len(),
            new: count(|s| s == EnquiryStatus::New),
            contacted: count(|s| matches!(s, EnquiryStatus::Contacted | EnquiryStatus::Resolved)),
            pending: count(|s| s == EnquiryStatus::Pending),
        }
    }

    /// Share of contacted enquiries, rounded to a whole percent
    pub fn contacted_percent(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        ((self.contacted as f64 / self.total as f64) * 100.0).round() as u32
    }
}
