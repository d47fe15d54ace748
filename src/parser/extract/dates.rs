use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Timelike};

use super::{PageContext, PartialRecord};

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"];
const OFFSET_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"];

/// Rewrite `date_published` as canonical ISO-8601; unparseable dates stay
/// exactly as found.
pub fn apply(_ctx: &PageContext<'_>, mut rec: PartialRecord, notes: &mut Vec<String>) -> PartialRecord {
    if let Some(raw) = rec.date_published.take() {
        match normalize_date(&raw) {
            Some(iso) => rec.date_published = Some(iso),
            None => {
                notes.push(format!("unparseable date '{raw}'"));
                rec.date_published = Some(raw);
            }
        }
    }
    rec
}

/// A trailing `Z` is UTC and becomes an explicit `+00:00` offset. Fractional
/// seconds, when non-zero, are written with six digits.
pub fn normalize_date(raw: &str) -> Option<String> {
    let s = raw.trim();
    let with_offset = match s.strip_suffix('Z') {
        Some(rest) => format!("{rest}+00:00"),
        None => s.to_string(),
    };

    if let Some(dt) = parse_offset(&with_offset) {
        let fmt = if dt.nanosecond() == 0 {
            "%Y-%m-%dT%H:%M:%S%:z"
        } else {
            "%Y-%m-%dT%H:%M:%S%.6f%:z"
        };
        return Some(dt.format(fmt).to_string());
    }
    if let Some(dt) = parse_naive(s) {
        let fmt = if dt.nanosecond() == 0 {
            "%Y-%m-%dT%H:%M:%S"
        } else {
            "%Y-%m-%dT%H:%M:%S%.6f"
        };
        return Some(dt.format(fmt).to_string());
    }
    None
}

fn parse_offset(s: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(s).ok().or_else(|| {
        OFFSET_FORMATS
            .iter()
            .find_map(|f| DateTime::parse_from_str(s, f).ok())
    })
}

fn parse_naive(s: &str) -> Option<NaiveDateTime> {
    NAIVE_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Calendar date of an already-normalized (or raw ISO) timestamp.
pub fn published_day(raw: &str) -> Option<NaiveDate> {
    let iso = normalize_date(raw)?;
    NaiveDate::parse_from_str(iso.get(..10)?, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zulu_becomes_offset() {
        assert_eq!(
            normalize_date("2024-05-01T10:00:00Z").as_deref(),
            Some("2024-05-01T10:00:00+00:00")
        );
        assert_eq!(
            normalize_date("2024-05-01T10:00:00.000Z").as_deref(),
            Some("2024-05-01T10:00:00+00:00")
        );
    }

    #[test]
    fn fractional_seconds_kept() {
        assert_eq!(
            normalize_date("2024-05-01T10:00:00.250Z").as_deref(),
            Some("2024-05-01T10:00:00.250000+00:00")
        );
        assert_eq!(
            normalize_date("2024-05-01T10:00:00.5+02:00").as_deref(),
            Some("2024-05-01T10:00:00.500000+02:00")
        );
        assert_eq!(
            normalize_date("2024-05-01T10:00:00.123456789Z").as_deref(),
            Some("2024-05-01T10:00:00.123456+00:00")
        );
        assert_eq!(
            normalize_date("2024-05-01 10:00:00.1").as_deref(),
            Some("2024-05-01T10:00:00.100000")
        );
    }

    #[test]
    fn explicit_offsets_and_naive() {
        assert_eq!(
            normalize_date("2024-05-01T10:00:00+05:30").as_deref(),
            Some("2024-05-01T10:00:00+05:30")
        );
        assert_eq!(
            normalize_date("2024-05-01 10:00:00").as_deref(),
            Some("2024-05-01T10:00:00")
        );
        assert_eq!(normalize_date("2024-05-01").as_deref(), Some("2024-05-01T00:00:00"));
    }

    #[test]
    fn garbage_left_untouched() {
        let mut notes = Vec::new();
        let doc = scraper::Html::parse_document("");
        let ctx = PageContext {
            document: &doc,
            posting: None,
        };
        let rec = PartialRecord {
            date_published: Some("3 days ago".into()),
            ..Default::default()
        };
        let rec = apply(&ctx, rec, &mut notes);
        assert_eq!(rec.date_published.as_deref(), Some("3 days ago"));
        assert_eq!(notes.len(), 1);
    }

    #[test]
    fn day_of_timestamp() {
        assert_eq!(
            published_day("2024-12-31T23:30:00Z"),
            NaiveDate::from_ymd_opt(2024, 12, 31)
        );
        assert_eq!(published_day("soon"), None);
    }
}
