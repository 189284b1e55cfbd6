//! String formats recognized by the Type Schema: date, date-time, uri,
//! email, uuid. Validation is delegated to `chrono`, `uuid`, and `regex`
//! rather than hand-rolled parsing.

use std::sync::OnceLock;

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Date,
    DateTime,
    Uri,
    Email,
    Uuid,
}

fn uri_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]*://[^\s]+$").unwrap())
}

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap())
}

impl Format {
    pub fn type_string(&self) -> &'static str {
        match self {
            Format::Date => "date",
            Format::DateTime => "date-time",
            Format::Uri => "uri",
            Format::Email => "email",
            Format::Uuid => "uuid",
        }
    }

    /// Returns `true` when `s` is well-formed for this format.
    pub fn validate(&self, s: &str) -> bool {
        match self {
            Format::Date => NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok(),
            Format::DateTime => {
                chrono::DateTime::parse_from_rfc3339(s).is_ok()
                    || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").is_ok()
            }
            Format::Uri => uri_re().is_match(s),
            Format::Email => email_re().is_match(s),
            Format::Uuid => uuid::Uuid::parse_str(s).is_ok(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn date_accepts_iso() {
        assert!(Format::Date.validate("2024-01-15"));
        assert!(!Format::Date.validate("not-a-date"));
    }

    #[test]
    fn date_time_accepts_rfc3339() {
        assert!(Format::DateTime.validate("2024-01-15T10:30:00Z"));
        assert!(!Format::DateTime.validate("nope"));
    }

    #[test]
    fn uri_accepts_scheme() {
        assert!(Format::Uri.validate("https://example.com/a"));
        assert!(!Format::Uri.validate("not a uri"));
    }

    #[test]
    fn email_accepts_basic_shape() {
        assert!(Format::Email.validate("a@example.com"));
        assert!(!Format::Email.validate("not-an-email"));
    }

    #[test]
    fn uuid_accepts_v4() {
        assert!(Format::Uuid.validate("550e8400-e29b-41d4-a716-446655440000"));
        assert!(!Format::Uuid.validate("xyz"));
    }
}
