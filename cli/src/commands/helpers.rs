use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

/// Resolves a day argument. Days are UTC calendar days, the same buckets the ledger uses.
pub(crate) fn parse_date(date_str: Option<&str>) -> Result<NaiveDate> {
    let today = Utc::now().date_naive();
    match date_str {
        None => Ok(today),
        Some(s) => match s.trim() {
            "today" => Ok(today),
            "yesterday" => Ok(today - chrono::Duration::days(1)),
            "tomorrow" => Ok(today + chrono::Duration::days(1)),
            other => NaiveDate::parse_from_str(other, "%Y-%m-%d").with_context(|| {
                format!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday/tomorrow")
            }),
        },
    }
}

/// The instant an entry is logged at: an explicit RFC 3339 timestamp wins,
/// then midday of the given day, then now.
pub(crate) fn entry_timestamp(at: Option<&str>, date: Option<&str>) -> Result<DateTime<Utc>> {
    if let Some(at) = at {
        return DateTime::parse_from_rfc3339(at.trim())
            .map(|ts| ts.with_timezone(&Utc))
            .with_context(|| format!("Invalid timestamp '{at}'. Use RFC 3339, e.g. 2024-01-15T08:30:00Z"));
    }
    match date {
        None => Ok(Utc::now()),
        Some(_) => {
            let day = parse_date(date)?;
            day.and_hms_opt(12, 0, 0)
                .map(|naive| naive.and_utc())
                .context("Invalid time of day")
        }
    }
}

pub(crate) fn require_user(user: Option<i64>) -> Result<i64> {
    match user {
        Some(id) if id > 0 => Ok(id),
        Some(id) => bail!("Invalid user id {id}"),
        None => bail!("No user selected. Pass --user <id> (see `tally user list`)"),
    }
}

pub(crate) fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

pub(crate) fn no_neg_zero(v: f64) -> f64 {
    if v == 0.0 { 0.0 } else { v }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_parse_date_none() {
        assert_eq!(parse_date(None).unwrap(), Utc::now().date_naive());
    }

    #[test]
    fn test_parse_date_keywords() {
        let today = Utc::now().date_naive();
        assert_eq!(parse_date(Some("today")).unwrap(), today);
        assert_eq!(
            parse_date(Some("yesterday")).unwrap(),
            today - chrono::Duration::days(1)
        );
        assert_eq!(
            parse_date(Some("tomorrow")).unwrap(),
            today + chrono::Duration::days(1)
        );
    }

    #[test]
    fn test_parse_date_iso() {
        let date = parse_date(Some("2024-01-15")).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
    }

    #[test]
    fn test_parse_date_invalid() {
        assert!(parse_date(Some("15/01/2024")).is_err());
    }

    #[test]
    fn test_entry_timestamp_explicit() {
        let ts = entry_timestamp(Some("2024-01-15T23:30:00-05:00"), Some("2020-01-01")).unwrap();
        // Converted to UTC, so it lands on the next calendar day.
        assert_eq!(ts.date_naive(), NaiveDate::from_ymd_opt(2024, 1, 16).unwrap());
        assert_eq!(ts.hour(), 4);
    }

    #[test]
    fn test_entry_timestamp_from_date() {
        let ts = entry_timestamp(None, Some("2024-02-29")).unwrap();
        assert_eq!(ts.date_naive(), NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        assert_eq!(ts.hour(), 12);
        assert!(entry_timestamp(Some("yesterday"), None).is_err());
    }

    #[test]
    fn test_require_user() {
        assert_eq!(require_user(Some(3)).unwrap(), 3);
        assert!(require_user(Some(0)).is_err());
        assert!(require_user(None).unwrap_err().to_string().contains("--user"));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Greek Yogurt (2%)"), "greek-yogurt-2");
        assert_eq!(slugify("  Crème  brûlée "), "crème-brûlée");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn test_json_error() {
        assert_eq!(json_error("boom"), r#"{"error":"boom"}"#);
    }

    #[test]
    fn test_truncate_utf8() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("Crème fraîche", 10), "Crème f...");
    }

    #[test]
    fn test_no_neg_zero() {
        assert_eq!(no_neg_zero(-0.0).to_bits(), 0.0_f64.to_bits());
        assert_eq!(no_neg_zero(5.0), 5.0);
    }
}
