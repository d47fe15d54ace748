use std::sync::LazyLock;

use regex::Regex;

use super::{PageContext, PartialRecord};
use crate::parser::count::parse_count;
use crate::parser::page::visible_text;

static LIKES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\d,.]+(?:[KMkm]?))\s+likes?\b").unwrap());
static COMMENTS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\d,.]+(?:[KMkm]?))\s+comments?\b").unwrap());

/// "1.2K likes" / "34 comments" in the rendered text, for counts the
/// structured data did not carry.
pub fn apply(ctx: &PageContext<'_>, mut rec: PartialRecord, notes: &mut Vec<String>) -> PartialRecord {
    if rec.likes.is_some() && rec.comments.is_some() {
        return rec;
    }
    let text = visible_text(ctx.document);

    if rec.likes.is_none() {
        rec.likes = scan(&LIKES_RE, &text, notes);
    }
    if rec.comments.is_none() {
        rec.comments = scan(&COMMENTS_RE, &text, notes);
    }
    rec
}

fn scan(re: &Regex, text: &str, notes: &mut Vec<String>) -> Option<u64> {
    let caps = re.captures(text)?;
    let n = parse_count(&caps[1]);
    if n.is_none() {
        notes.push(format!("unreadable count in '{}'", &caps[0]));
    }
    n
}
