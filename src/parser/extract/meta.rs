use super::{PageContext, PartialRecord};
use crate::parser::page::{canonical_href, find_meta, title_element};

/// Open Graph and `<head>` fallbacks. `og:image` is always collected.
pub fn apply(ctx: &PageContext<'_>, mut rec: PartialRecord, _notes: &mut Vec<String>) -> PartialRecord {
    let doc = ctx.document;

    if rec.title.is_none() {
        let title = find_meta(doc, "og:title", "property")
            .map(str::to_string)
            .or_else(|| title_element(doc));
        PartialRecord::fill(&mut rec.title, title);
    }
    if rec.description.is_none() {
        let description =
            find_meta(doc, "og:description", "property").or_else(|| find_meta(doc, "description", "name"));
        PartialRecord::fill(&mut rec.description, description);
    }
    if rec.url.is_none() {
        let url = find_meta(doc, "og:url", "property").or_else(|| canonical_href(doc));
        PartialRecord::fill(&mut rec.url, url);
    }
    if let Some(image) = find_meta(doc, "og:image", "property") {
        rec.add_image(image);
    }
    rec
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    fn run(html: &str, rec: PartialRecord) -> PartialRecord {
        let doc = Html::parse_document(html);
        let ctx = PageContext {
            document: &doc,
            posting: None,
        };
        apply(&ctx, rec, &mut Vec::new())
    }

    const HEAD: &str = r#"<html><head>
        <title>Page title</title>
        <meta property="og:title" content="OG title">
        <meta name="description" content="Plain description">
        <link rel="canonical" href="https://www.example.com/posts/abc">
        <meta property="og:image" content="https://media.example.com/og.jpg">
    </head><body></body></html>"#;

    #[test]
    fn fills_unset_fields() {
        let rec = run(HEAD, PartialRecord::default());
        assert_eq!(rec.title.as_deref(), Some("OG title"));
        assert_eq!(rec.description.as_deref(), Some("Plain description"));
        assert_eq!(rec.url.as_deref(), Some("https://www.example.com/posts/abc"));
        assert_eq!(rec.images, vec!["https://media.example.com/og.jpg"]);
    }

    #[test]
    fn keeps_structured_values() {
        let rec = PartialRecord {
            title: Some("From JSON-LD".into()),
            images: vec!["https://media.example.com/og.jpg".into()],
            ..Default::default()
        };
        let rec = run(HEAD, rec);
        assert_eq!(rec.title.as_deref(), Some("From JSON-LD"));
        assert_eq!(rec.images.len(), 1);
    }

    #[test]
    fn title_element_when_no_og_title() {
        let rec = run("<html><head><title>Only title</title></head></html>", PartialRecord::default());
        assert_eq!(rec.title.as_deref(), Some("Only title"));
        assert!(rec.url.is_none());
    }
}
