use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde_json::Value;

use crate::parser::extract::dates::published_day;
use crate::parser::ParsedRecord;

static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

const POST_MARKERS: &[&str] = &["/posts/", "/feed/update/", "/activity:", "/activity/"];

/// LinkedIn post or activity permalink.
pub fn is_post_url(url: &str) -> bool {
    url.contains("linkedin.com") && POST_MARKERS.iter().any(|m| url.contains(m))
}

/// Company slug from a LinkedIn url: the segment after `/company/`, else the
/// last path segment.
pub fn company_slug_from_url(url: &str) -> Option<String> {
    let rest = url.split_once("://").map_or(url, |(_, r)| r);
    let path = rest.split(['?', '#']).next().unwrap_or("");
    let parts: Vec<&str> = path.split('/').skip(1).filter(|p| !p.is_empty()).collect();

    match parts.iter().position(|p| *p == "company") {
        Some(i) => parts.get(i + 1).map(|s| s.to_string()),
        None => parts.last().map(|s| s.to_string()),
    }
}

/// Inclusive on the calendar date. Records with no usable date pass.
pub fn within_date_range(record: &ParsedRecord, since: Option<NaiveDate>, until: Option<NaiveDate>) -> bool {
    let Some(day) = record.date_published.as_deref().and_then(published_day) else {
        return true;
    };
    since.map_or(true, |s| day >= s) && until.map_or(true, |u| day <= u)
}

fn normalize(s: &str) -> String {
    WS_RE.replace_all(s, " ").trim().to_lowercase()
}

/// Whether the post looks like it came from one of the given companies.
pub fn company_matches(record: &ParsedRecord, names: &[String], slugs: &[String]) -> bool {
    let names: Vec<String> = names.iter().map(|n| normalize(n)).filter(|n| !n.is_empty()).collect();
    let slugs: Vec<String> = slugs.iter().map(|s| normalize(s)).filter(|s| !s.is_empty()).collect();
    let name_in = |hay: &str| names.iter().any(|n| hay.contains(n.as_str()));
    let slug_in = |hay: &str| slugs.iter().any(|s| hay.contains(s.as_str()));

    if let Some(author) = &record.author {
        if name_in(&normalize(author)) {
            return true;
        }
    }

    for block in &record.raw_structured_data {
        let party = ["author", "creator", "publisher"]
            .iter()
            .find_map(|k| block.get(*k).filter(|v| !v.is_null()));
        match party {
            Some(Value::Object(obj)) => {
                let field = |k: &str| obj.get(k).and_then(Value::as_str).map(normalize);
                if field("name").is_some_and(|n| name_in(&n)) {
                    return true;
                }
                let url = field("url").or_else(|| field("sameAs")).unwrap_or_default();
                if slug_in(&url) {
                    return true;
                }
            }
            Some(Value::String(s)) if name_in(&normalize(s)) => return true,
            _ => {}
        }
    }

    if record.url.as_deref().is_some_and(|u| slug_in(&normalize(u))) {
        return true;
    }

    let lead = record
        .content
        .as_deref()
        .or(record.description.as_deref())
        .map(normalize)
        .unwrap_or_default();
    names.iter().any(|n| lead.starts_with(n.as_str()))
}
