pub mod assignments;
pub mod debug;
pub mod projects;
pub mod steps;
pub mod subjects;
pub mod tasks;

use chrono::{DateTime, NaiveDate, NaiveTime};

/// Trims input and treats empty strings as absent.
pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Update value for an optional text column: absent keeps, blank clears, anything else replaces.
pub(crate) fn clearable(value: Option<String>) -> Option<Option<String>> {
    value.map(|value| non_blank(Some(value)))
}

/// Accepts `YYYY-MM-DD` or a full RFC 3339 timestamp (its calendar date is kept).
pub(crate) fn parse_due_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|ts| ts.date_naive()))
}

/// Accepts `HH:MM` or `HH:MM:SS`.
pub(crate) fn parse_due_time(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_strings_are_absent() {
        assert_eq!(non_blank(Some("   ".to_string())), None);
        assert_eq!(non_blank(Some(" Math ".to_string())).as_deref(), Some("Math"));
        assert_eq!(non_blank(None), None);
    }

    #[test]
    fn blank_clears_but_absent_keeps() {
        assert_eq!(clearable(None), None);
        assert_eq!(clearable(Some(" ".to_string())), Some(None));
        assert_eq!(
            clearable(Some(" notes ".to_string())),
            Some(Some("notes".to_string()))
        );
    }

    #[test]
    fn due_dates() {
        assert_eq!(parse_due_date("2026-02-20"), NaiveDate::from_ymd_opt(2026, 2, 20));
        assert_eq!(
            parse_due_date("2026-02-20T09:30:00+08:00"),
            NaiveDate::from_ymd_opt(2026, 2, 20)
        );
        assert_eq!(parse_due_date("2026-02-30"), None);
        assert_eq!(parse_due_date("tomorrow"), None);
    }

    #[test]
    fn due_times() {
        assert_eq!(parse_due_time("14:00"), NaiveTime::from_hms_opt(14, 0, 0));
        assert_eq!(parse_due_time("08:15:30"), NaiveTime::from_hms_opt(8, 15, 30));
        assert_eq!(parse_due_time("25:00"), None);
    }
}
