pub mod dates;
pub mod images;
pub mod meta;
pub mod posting;
pub mod text;

use scraper::Html;
use serde_json::Value;

use super::jsonld::StructuredBlock;
use super::ParsedRecord;

/// Record under construction. Every field starts empty and a stage only
/// writes a field that is still empty; `images` only grows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialRecord {
    pub url: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub author: Option<String>,
    pub shared_url: Option<String>,
    pub date_published: Option<String>,
    pub likes: Option<u64>,
    pub comments: Option<u64>,
    pub images: Vec<String>,
}

impl PartialRecord {
    /// Set `slot` from the first non-empty candidate, unless already set.
    pub fn fill<S: AsRef<str>>(slot: &mut Option<String>, candidate: Option<S>) {
        if slot.is_some() {
            return;
        }
        if let Some(v) = candidate {
            let v = v.as_ref();
            if !v.is_empty() {
                *slot = Some(v.to_string());
            }
        }
    }

    pub fn fill_count(slot: &mut Option<u64>, candidate: Option<u64>) {
        if slot.is_none() {
            *slot = candidate;
        }
    }

    /// Append an image URL unless empty or already listed.
    pub fn add_image(&mut self, url: &str) -> bool {
        if url.is_empty() || self.images.iter().any(|i| i == url) {
            return false;
        }
        self.images.push(url.to_string());
        true
    }

    /// Append image URLs from a JSON value: a URL string, an object with a
    /// `url`, or a list of either.
    pub fn add_image_value(&mut self, value: &Value) {
        match value {
            Value::String(s) => {
                self.add_image(s);
            }
            Value::Object(obj) => {
                if let Some(url) = obj.get("url").and_then(Value::as_str) {
                    self.add_image(url);
                }
            }
            Value::Array(items) => {
                for item in items.iter().filter(|i| !i.is_array()) {
                    self.add_image_value(item);
                }
            }
            _ => {}
        }
    }

    /// Final coercion. Counts only ever enter through the number
    /// normalizer, so they are already integers here.
    pub fn finish(
        self,
        raw_structured_data: Vec<StructuredBlock>,
        source_reference: Option<String>,
    ) -> ParsedRecord {
        ParsedRecord {
            url: self.url,
            title: self.title,
            description: self.description,
            content: self.content,
            likes: self.likes,
            comments: self.comments,
            author: self.author,
            date_published: self.date_published,
            images: self.images,
            shared_url: self.shared_url,
            raw_structured_data,
            source_reference,
        }
    }

    fn changed_fields(&self, after: &PartialRecord) -> Vec<&'static str> {
        let mut out = Vec::new();
        let mut check = |name: &'static str, differs: bool| {
            if differs {
                out.push(name);
            }
        };
        check("url", self.url != after.url);
        check("title", self.title != after.title);
        check("description", self.description != after.description);
        check("content", self.content != after.content);
        check("author", self.author != after.author);
        check("shared_url", self.shared_url != after.shared_url);
        check("date_published", self.date_published != after.date_published);
        check("likes", self.likes != after.likes);
        check("comments", self.comments != after.comments);
        check("images", self.images != after.images);
        out
    }
}

/// What a stage reads from: the parsed page and the chosen posting block.
pub struct PageContext<'a> {
    pub document: &'a Html,
    pub posting: Option<&'a StructuredBlock>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// The stage wrote these fields.
    Filled(Vec<&'static str>),
    /// Nothing for this stage on the page.
    NoMatch,
    /// Data was there but could not be used.
    Rejected(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct StageReport {
    pub stage: &'static str,
    pub outcome: StageOutcome,
    /// Values the stage saw but could not interpret.
    pub notes: Vec<String>,
}

/// A resolution stage: reads the page, returns the record with any
/// still-empty fields it can fill. Uninterpretable values go to `notes`.
pub type StageFn = fn(&PageContext<'_>, PartialRecord, &mut Vec<String>) -> PartialRecord;

/// Stages in precedence order. Earlier stages win every field they fill.
pub const STAGES: &[(&str, StageFn)] = &[
    ("structured_data", posting::apply),
    ("page_metadata", meta::apply),
    ("image_harvest", images::apply),
    ("text_fallback", text::apply),
    ("date_normalization", dates::apply),
];

pub fn run_stages(ctx: &PageContext<'_>, mut record: PartialRecord) -> (PartialRecord, Vec<StageReport>) {
    let mut reports = Vec::with_capacity(STAGES.len());
    for &(stage, run) in STAGES {
        let before = record.clone();
        let mut notes = Vec::new();
        record = run(ctx, record, &mut notes);
        let filled = before.changed_fields(&record);
        let outcome = if !filled.is_empty() {
            StageOutcome::Filled(filled)
        } else if !notes.is_empty() {
            StageOutcome::Rejected(notes.clone())
        } else {
            StageOutcome::NoMatch
        };
        reports.push(StageReport { stage, outcome, notes });
    }
    (record, reports)
}

/// First key holding a non-empty string.
pub(crate) fn first_str<'a>(obj: &'a StructuredBlock, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| is_truthy(v))
        .and_then(Value::as_str)
}

/// First key holding a value that is not null, false, zero or empty.
pub(crate) fn first_present<'a>(obj: &'a StructuredBlock, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().filter_map(|k| obj.get(*k)).find(|v| is_truthy(v))
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
