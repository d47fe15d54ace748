pub mod count;
pub mod extract;
pub mod jsonld;
pub mod page;

use std::borrow::Cow;

use scraper::Html;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use extract::{run_stages, PageContext, PartialRecord, StageReport};
use jsonld::StructuredBlock;

pub use count::parse_count;

pub const DEFAULT_MAX_MARKUP_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("markup is not text: {0}")]
    NotText(&'static str),
    #[error("markup is {len} bytes, over the {limit} byte limit")]
    TooLarge { len: usize, limit: usize },
}

/// One post page, normalized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedRecord {
    pub url: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub likes: Option<u64>,
    pub comments: Option<u64>,
    pub author: Option<String>,
    pub date_published: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    pub shared_url: Option<String>,
    #[serde(default)]
    pub raw_structured_data: Vec<StructuredBlock>,
    pub source_reference: Option<String>,
}

/// How a record was put together.
#[derive(Debug, Clone, Default)]
pub struct ResolveReport {
    pub blocks: usize,
    pub dropped_fragments: usize,
    pub posting: Option<usize>,
    pub stages: Vec<StageReport>,
}

#[derive(Debug, Clone, Copy)]
pub struct Resolver {
    max_markup_bytes: usize,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MARKUP_BYTES)
    }
}

impl Resolver {
    pub fn new(max_markup_bytes: usize) -> Self {
        Self { max_markup_bytes }
    }

    pub fn resolve(&self, markup: &str, source_reference: Option<&str>) -> Result<ParsedRecord, ResolveError> {
        self.resolve_with_report(markup, source_reference)
            .map(|(record, _)| record)
    }

    /// Resolve raw bytes as read from disk or the wire.
    pub fn resolve_bytes(&self, markup: &[u8], source_reference: Option<&str>) -> Result<ParsedRecord, ResolveError> {
        let text = decode_markup(markup)?;
        self.resolve(&text, source_reference)
    }

    /// Structured data, then page metadata, then images, then visible text;
    /// each source only fills what the previous ones left empty.
    pub fn resolve_with_report(
        &self,
        markup: &str,
        source_reference: Option<&str>,
    ) -> Result<(ParsedRecord, ResolveReport), ResolveError> {
        if markup.len() > self.max_markup_bytes {
            return Err(ResolveError::TooLarge {
                len: markup.len(),
                limit: self.max_markup_bytes,
            });
        }

        let document = Html::parse_document(markup);
        let extraction = jsonld::extract_from_document(&document);
        let posting = extract::posting::select_posting(&extraction.blocks);

        let ctx = PageContext {
            document: &document,
            posting: posting.map(|i| &extraction.blocks[i]),
        };
        let (partial, stages) = run_stages(&ctx, PartialRecord::default());

        let report = ResolveReport {
            blocks: extraction.blocks.len(),
            dropped_fragments: extraction.dropped,
            posting,
            stages,
        };
        let record = partial.finish(extraction.blocks, source_reference.map(str::to_string));
        Ok((record, report))
    }
}

/// Decode page bytes as UTF-8. Stray invalid bytes (a Latin-1 `é` in an
/// otherwise UTF-8 page) become U+FFFD; NUL bytes or mostly undecodable
/// input mean the file is not a page at all.
pub fn decode_markup(bytes: &[u8]) -> Result<Cow<'_, str>, ResolveError> {
    if bytes.contains(&0) {
        return Err(ResolveError::NotText("contains NUL bytes"));
    }
    let text = String::from_utf8_lossy(bytes);
    if let Cow::Owned(decoded) = &text {
        let (mut total, mut replaced) = (0usize, 0usize);
        for c in decoded.chars() {
            total += 1;
            if c == char::REPLACEMENT_CHARACTER {
                replaced += 1;
            }
        }
        if replaced * 4 > total {
            return Err(ResolveError::NotText("mostly invalid UTF-8"));
        }
    }
    Ok(text)
}

/// Resolve one page with the default input limit.
pub fn resolve(markup: &str, source_reference: Option<&str>) -> Result<ParsedRecord, ResolveError> {
    Resolver::default().resolve(markup, source_reference)
}

// ── Tests ──
