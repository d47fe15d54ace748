use std::sync::LazyLock;

use scraper::{ElementRef, Html, Node, Selector};

static META: LazyLock<Selector> = LazyLock::new(|| Selector::parse("meta").unwrap());
static TITLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());
static CANONICAL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"link[rel~="canonical"]"#).unwrap());
static IMG_SRC: LazyLock<Selector> = LazyLock::new(|| Selector::parse("img[src]").unwrap());

/// Elements whose text never renders.
const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

/// Content of the first `<meta {attr}="{key}">`, falling back to the first
/// `<meta name="{key}">`. Empty content counts as absent.
pub fn find_meta<'a>(document: &'a Html, key: &str, attr: &str) -> Option<&'a str> {
    first_meta_content(document, attr, key).or_else(|| first_meta_content(document, "name", key))
}

fn first_meta_content<'a>(document: &'a Html, attr: &str, key: &str) -> Option<&'a str> {
    document
        .select(&META)
        .find(|m| m.value().attr(attr) == Some(key))
        .and_then(|m| m.value().attr("content"))
        .filter(|c| !c.is_empty())
}

pub fn title_element(document: &Html) -> Option<String> {
    document
        .select(&TITLE)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

pub fn canonical_href(document: &Html) -> Option<&str> {
    document
        .select(&CANONICAL)
        .next()
        .and_then(|l| l.value().attr("href"))
        .filter(|h| !h.is_empty())
}

/// `src` of every `<img>`, in document order.
pub fn image_sources(document: &Html) -> impl Iterator<Item = &str> {
    document.select(&IMG_SRC).filter_map(|img| img.value().attr("src"))
}

/// All rendered text, whitespace-trimmed pieces joined by single spaces.
pub fn visible_text(document: &Html) -> String {
    let mut parts = Vec::new();
    collect_text(document.root_element(), &mut parts);
    parts.join(" ")
}

fn collect_text<'a>(element: ElementRef<'a>, out: &mut Vec<&'a str>) {
    if HIDDEN_ELEMENTS.contains(&element.value().name()) {
        return;
    }
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                let t = text.trim();
                if !t.is_empty() {
                    out.push(t);
                }
            }
            Node::Element(_) => {
                if let Some(el) = ElementRef::wrap(child) {
                    collect_text(el, out);
                }
            }
            _ => {}
        }
    }
}
