//! Search and date-range filters for the dashboard tables

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use crate::models::{Account, Enquiry};

fn contains(field: &str, needle: &str) -> bool {
    field.to_lowercase().contains(needle)
}

fn needle(query: &Option<String>) -> Option<String> {
    query
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(str::to_lowercase)
}

fn start_of(day: NaiveDate) -> Option<DateTime<Utc>> {
    day.and_hms_opt(0, 0, 0).map(|at| Utc.from_utc_datetime(&at))
}

fn end_of(day: NaiveDate) -> Option<DateTime<Utc>> {
    day.and_hms_milli_opt(23, 59, 59, 999)
        .map(|at| Utc.from_utc_datetime(&at))
}

/// Filter over the enquiry table
///
/// The search text matches name, email, company or status, ignoring case.
/// Both ends of the date range are inclusive whole days in UTC; enquiries
/// the store has not stamped yet always pass the date range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnquiryFilter {
    pub query: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl EnquiryFilter {
    pub fn search(query: &str) -> Self {
        Self {
            query: Some(query.to_string()),
            ..Self::default()
        }
    }

    pub fn between(mut self, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn matches(&self, enquiry: &Enquiry) -> bool {
        if let Some(q) = needle(&self.query) {
            let hit = contains(&enquiry.name, &q)
                || contains(&enquiry.email, &q)
                || enquiry.company.as_deref().map_or(false, |c| contains(c, &q))
                || contains(enquiry.status.as_str(), &q);
            if !hit {
                return false;
            }
        }

        let created = match enquiry.created_at {
            Some(at) => at,
            None => return true,
        };
        if let Some(from) = self.from.and_then(start_of) {
            if created < from {
                return false;
            }
        }
        if let Some(to) = self.to.and_then(end_of) {
            if created > to {
                return false;
            }
        }
        true
    }

    pub fn apply(&self, enquiries: &[Enquiry]) -> Vec<Enquiry> {
        enquiries.iter().filter(|e| self.matches(e)).cloned().collect()
    }
}

/// Search over the account table: name, email or role
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountFilter {
    pub query: Option<String>,
}

impl AccountFilter {
    pub fn search(query: &str) -> Self {
        Self {
            query: Some(query.to_string()),
        }
    }

    pub fn matches(&self, account: &Account) -> bool {
        match needle(&self.query) {
            Some(q) => {
                contains(&account.name, &q)
                    || contains(&account.email, &q)
                    || contains(account.role.as_str(), &q)
            }
            None => true,
        }
    }

    pub fn apply(&self, accounts: &[Account]) -> Vec<Account> {
        accounts.iter().filter(|a| self.matches(a)).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccountStatus, EnquiryStatus, Role};

    fn enquiry(name: &str, company: Option<&str>, created: Option<&str>) -> Enquiry {
        Enquiry {
            id: name.to_lowercase(),
            name: name.into(),
            company: company.map(Into::into),
            phone: None,
            email: format!("{}@mail.test", name.to_lowercase()),
            subject: "s".into(),
            message: "m".into(),
            status: EnquiryStatus::Pending,
            created_at: created.map(|c| c.parse().unwrap()),
            updated_at: None,
        }
    }

    fn day(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn search_is_case_insensitive_across_fields() {
        let list = vec![
            enquiry("Meera", Some("GreenFlow"), None),
            enquiry("Arjun", None, None),
        ];
        assert_eq!(EnquiryFilter::search("greenflow").apply(&list).len(), 1);
        assert_eq!(EnquiryFilter::search("ARJUN").apply(&list)[0].name, "Arjun");
        assert_eq!(EnquiryFilter::search("pend").apply(&list).len(), 2);
        assert_eq!(EnquiryFilter::search("   ").apply(&list).len(), 2);
    }

    #[test]
    fn date_range_is_inclusive_of_whole_days() {
        let list = vec![
            enquiry("Early", None, Some("2024-03-01T00:00:00Z")),
            enquiry("Late", None, Some("2024-03-05T23:59:59.500Z")),
            enquiry("After", None, Some("2024-03-06T00:00:00Z")),
            enquiry("Unstamped", None, None),
        ];
        let filter = EnquiryFilter::default().between(Some(day("2024-03-01")), Some(day("2024-03-05")));
        let names: Vec<String> = filter.apply(&list).into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["Early", "Late", "Unstamped"]);
    }

    #[test]
    fn account_search_matches_role() {
        let admin = Account {
            id: "1".into(),
            name: "Kavya".into(),
            email: "k@mail.test".into(),
            role: Role::Admin,
            status: AccountStatus::Active,
            created_at: None,
            updated_at: None,
        };
        assert!(AccountFilter::search("adm").matches(&admin));
        assert!(!AccountFilter::search("moderator").matches(&admin));
        assert!(AccountFilter::default().matches(&admin));
    }
}
