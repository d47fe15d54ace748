use serde_json::Value;

use super::{first_present, first_str, PageContext, PartialRecord};
use crate::parser::count::parse_count;
use crate::parser::jsonld::StructuredBlock;

/// `@type` substrings that mark the block describing the post itself.
const POSTING_TYPES: &[&str] = &["SocialMediaPosting", "VideoObject"];
/// Keys that mark a post-like block when no typed block is present.
const POSTING_KEYS: &[&str] = &["articleBody", "interactionStatistic"];
const IMAGE_KEYS: &[&str] = &["thumbnailUrl", "image", "thumbnail", "thumbnailImage"];

/// Index of the posting block: first typed as a post or video, else the
/// first carrying a body or interaction statistics.
pub fn select_posting(blocks: &[StructuredBlock]) -> Option<usize> {
    blocks
        .iter()
        .position(has_posting_type)
        .or_else(|| {
            blocks
                .iter()
                .position(|b| POSTING_KEYS.iter().any(|k| b.contains_key(*k)))
        })
}

fn has_posting_type(block: &StructuredBlock) -> bool {
    let Some(typ) = first_present(block, &["@type", "type"]) else {
        return false;
    };
    let joined = match typ {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" "),
        _ => return false,
    };
    POSTING_TYPES.iter().any(|t| joined.contains(t))
}

pub fn apply(ctx: &PageContext<'_>, mut rec: PartialRecord, notes: &mut Vec<String>) -> PartialRecord {
    let Some(posting) = ctx.posting else {
        return rec;
    };

    PartialRecord::fill(&mut rec.content, first_str(posting, &["articleBody", "headline"]));
    PartialRecord::fill(&mut rec.title, first_str(posting, &["headline", "name"]));
    PartialRecord::fill(&mut rec.description, first_str(posting, &["description"]));
    PartialRecord::fill(&mut rec.author, author_name(posting));
    PartialRecord::fill(
        &mut rec.date_published,
        first_str(posting, &["datePublished", "uploadDate"]),
    );

    for key in IMAGE_KEYS {
        if let Some(v) = posting.get(*key) {
            rec.add_image_value(v);
        }
    }

    if let Some(Value::Object(shared)) = posting.get("sharedContent") {
        PartialRecord::fill(&mut rec.shared_url, first_str(shared, &["url"]));
        if let Some(img) = first_present(shared, &["image", "thumbnail"]) {
            rec.add_image_value(img);
        }
    }

    let (likes, comments) = interaction_counts(posting, notes);
    if let Some(n) = likes {
        PartialRecord::fill_count(&mut rec.likes, n);
    }
    if let Some(n) = comments {
        PartialRecord::fill_count(&mut rec.comments, n);
    }
    rec
}

/// Author as an object (`name`, else `url`), a plain string, or a list whose
/// first element is used.
fn author_name(posting: &StructuredBlock) -> Option<String> {
    match first_present(posting, &["author", "creator", "publisher"])? {
        Value::Object(obj) => first_str(obj, &["name", "url"]).map(str::to_string),
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => match items.first()? {
            Value::Object(obj) => obj.get("name").and_then(Value::as_str).map(str::to_string),
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        },
        _ => None,
    }
}

/// Walk `interactionStatistic`. The outer option is "an entry of this kind
/// was seen", the inner one its normalized count; the last entry wins.
fn interaction_counts(
    posting: &StructuredBlock,
    notes: &mut Vec<String>,
) -> (Option<Option<u64>>, Option<Option<u64>>) {
    let mut likes = None;
    let mut comments = None;

    let entries: Vec<&Value> =
        match first_present(posting, &["interactionStatistic", "interactionStatistics"]) {
            Some(Value::Array(items)) => items.iter().collect(),
            Some(obj @ Value::Object(_)) => vec![obj],
            _ => return (None, None),
        };

    for entry in entries {
        let Value::Object(stat) = entry else {
            notes.push(format!("interaction entry is not an object: {entry}"));
            continue;
        };
        let kind = match stat.get("interactionType") {
            Some(Value::String(s)) => s.to_lowercase(),
            Some(other) => other.to_string().to_lowercase(),
            None => String::new(),
        };
        let raw = stat
            .get("userInteractionCount")
            .filter(|v| !v.is_null())
            .or_else(|| stat.get("interactionCount"));
        let count = raw.and_then(|v| parse_count(v));
        if count.is_none() {
            if let Some(v) = raw.filter(|v| !v.is_null()) {
                notes.push(format!("unreadable interaction count {v} for '{kind}'"));
            }
        }

        if kind.contains("like") {
            likes = Some(count);
        } else if kind.contains("comment") {
            comments = Some(count);
        }
    }
    (likes, comments)
}
