use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use serde_json::{Map, Value};

/// One embedded schema.org object, kept exactly as parsed.
pub type StructuredBlock = Map<String, Value>;

static LD_JSON: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"script[type="application/ld+json"]"#).unwrap());
static OBJECT_BOUNDARY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\}\s*\{").unwrap());

#[derive(Debug, Default)]
pub struct Extraction {
    pub blocks: Vec<StructuredBlock>,
    /// Recovered fragments that still failed to parse, plus non-object items.
    pub dropped: usize,
}

/// Extract every JSON-LD block from raw markup.
pub fn extract_structured_blocks(markup: &str) -> Vec<StructuredBlock> {
    let document = Html::parse_document(markup);
    extract_from_document(&document).blocks
}

pub fn extract_from_document(document: &Html) -> Extraction {
    let mut out = Extraction::default();
    for script in document.select(&LD_JSON) {
        let raw: String = script.text().collect();
        let text = raw.trim();
        if text.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(text) {
            Ok(value) => push_value(&mut out, value),
            Err(_) => recover_concatenated(&mut out, text),
        }
    }
    out
}

fn push_value(out: &mut Extraction, value: Value) {
    match value {
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::Object(map) => out.blocks.push(map),
                    _ => out.dropped += 1,
                }
            }
        }
        Value::Object(map) => out.blocks.push(map),
        _ => out.dropped += 1,
    }
}

/// Pages often emit `{...} {...}` with no enclosing array. Split on the
/// object boundary, put back the brace each side lost, parse each piece.
fn recover_concatenated(out: &mut Extraction, text: &str) {
    let parts: Vec<&str> = OBJECT_BOUNDARY_RE.split(text).collect();
    if parts.len() < 2 {
        out.dropped += 1;
        return;
    }
    let last = parts.len() - 1;
    for (i, part) in parts.iter().enumerate() {
        let candidate = match i {
            0 => format!("{part}}}"),
            i if i == last => format!("{{{part}"),
            _ => format!("{{{part}}}"),
        };
        match serde_json::from_str::<Value>(&candidate) {
            Ok(value) => push_value(out, value),
            Err(_) => out.dropped += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn page(scripts: &[&str]) -> String {
        let body: String = scripts
            .iter()
            .map(|s| format!(r#"<script type="application/ld+json">{s}</script>"#))
            .collect();
        format!("<html><head>{body}</head><body></body></html>")
    }

    #[test]
    fn single_object() {
        let blocks = extract_structured_blocks(&page(&[r#"{"@type": "Person", "name": "Ada"}"#]));
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0]["name"], json!("Ada"));
    }

    #[test]
    fn array_keeps_source_order() {
        let blocks = extract_structured_blocks(&page(&[
            r#"[{"n": 1}, {"n": 2}, {"n": 3}]"#,
            r#"{"n": 4}"#,
        ]));
        let ns: Vec<_> = blocks.iter().map(|b| b["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![1, 2, 3, 4]);
    }

    #[test]
    fn concatenated_objects_match_wrapped_array() {
        let objects = [
            r#"{"@type": "WebPage", "name": "a"}"#,
            r#"{"@type": "SocialMediaPosting", "headline": "b"}"#,
            r#"{"@type": "Person", "name": "c"}"#,
        ];
        let wrapped = extract_structured_blocks(&page(&[&format!("[{}]", objects.join(","))]));
        let recovered = extract_structured_blocks(&page(&[&objects.join("\n  ")]));
        assert_eq!(recovered.len(), 3);
        assert_eq!(wrapped, recovered);
    }

    #[test]
    fn two_concatenated_objects() {
        let blocks = extract_structured_blocks(&page(&[r#"{"a": 1} {"b": 2}"#]));
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0]["a"], json!(1));
        assert_eq!(blocks[1]["b"], json!(2));
    }

    #[test]
    fn broken_fragment_dropped_others_kept() {
        let document = Html::parse_document(&page(&[r#"{"a": 1} {"b": } {"c": 3}"#]));
        let out = extract_from_document(&document);
        assert_eq!(out.blocks.len(), 2);
        assert_eq!(out.dropped, 1);
        assert_eq!(out.blocks[1]["c"], json!(3));
    }

    #[test]
    fn garbage_and_empty_yield_nothing() {
        let blocks = extract_structured_blocks(&page(&["   ", "not json at all", "{"]));
        assert!(blocks.is_empty());
    }

    #[test]
    fn other_scripts_ignored() {
        let html = r#"<script>{"a": 1}</script><script type="text/javascript">var x = {};</script>"#;
        assert!(extract_structured_blocks(html).is_empty());
    }
}
