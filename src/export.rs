//! CSV export of enquiries

use chrono::NaiveDate;

use crate::error::{Error, Result};
use crate::models::Enquiry;

/// Header row of every export
pub const CSV_HEADER: &str = "Name,Email,Company,Phone,Subject,Message,Status,Date";

/// A rendered export, ready to be written out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvExport {
    pub filename: String,
    pub content: String,
}

impl CsvExport {
    pub const CONTENT_TYPE: &'static str = "text/csv;charset=utf-8";
}

/// `enquiries_export_<YYYY-MM-DD>.csv`
pub fn export_filename(day: NaiveDate) -> String {
    format!("enquiries_export_{}.csv", day.format("%Y-%m-%d"))
}

fn quoted(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

fn row(enquiry: &Enquiry) -> String {
    let status = enquiry.status.as_str();
    let date = enquiry.date();
    [
        enquiry.name.as_str(),
        enquiry.email.as_str(),
        enquiry.company.as_deref().unwrap_or(""),
        enquiry.phone.as_deref().unwrap_or(""),
        enquiry.subject.as_str(),
        enquiry.message.as_str(),
        status,
        date.as_str(),
    ]
    .iter()
    .map(|field| quoted(field))
    .collect::<Vec<_>>()
    .join(",")
}

/// Header plus one fully quoted row per enquiry, joined by `\n`
pub fn to_csv(enquiries: &[Enquiry]) -> String {
    std::iter::once(CSV_HEADER.to_string())
        .chain(enquiries.iter().map(row))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Export `enquiries` under the file name for `today`
pub fn export_enquiries(enquiries: &[Enquiry], today: NaiveDate) -> Result<CsvExport> {
    if enquiries.is_empty() {
        return Err(Error::validation("No data to export"));
    }
    Ok(CsvExport {
        filename: export_filename(today),
        content: to_csv(enquiries),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EnquiryStatus;

    fn sample() -> Enquiry {
        Enquiry {
            id: "1".into(),
            name: "A B".into(),
            company: None,
            phone: None,
            email: "a@b.com".into(),
            subject: "Hi".into(),
            message: "Hello, world".into(),
            status: EnquiryStatus::New,
            created_at: Some("2024-01-01T10:30:00Z".parse().unwrap()),
            updated_at: None,
        }
    }

    #[test]
    fn row_quotes_every_field() {
        let csv = to_csv(&[sample()]);
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some(CSV_HEADER));
        assert_eq!(
            lines.next(),
            Some(r#""A B","a@b.com","","","Hi","Hello, world","new","2024-01-01""#)
        );
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn embedded_quotes_are_doubled() {
        let mut e = sample();
        e.message = "the \"hexa\" model".into();
        e.created_at = None;
        let csv = to_csv(&[e]);
        assert!(csv.ends_with(r#""the ""hexa"" model","new","N/A""#));
    }

    #[test]
    fn empty_export_is_refused() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
        assert!(matches!(export_enquiries(&[], today), Err(Error::Validation(_))));

        let export = export_enquiries(&[sample()], today).unwrap();
        assert_eq!(export.filename, "enquiries_export_2024-06-30.csv");
    }
}
