use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use rusqlite::types::Value;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::fetch::FetchedPage;
use crate::filters::{company_matches, within_date_range};
use crate::output::{safe_name, write_combined, write_record_json};
use crate::parser::{parse_count, ParsedRecord, Resolver};
use crate::store::{MasterStore, UpsertOutcome};
use crate::db;

const CHUNK: usize = 200;

// ── Filters ──

/// Optional post filters; an empty set admits everything.
#[derive(Debug, Clone, Default)]
pub struct PostFilter {
    pub since: Option<NaiveDate>,
    pub until: Option<NaiveDate>,
    pub company_names: Vec<String>,
    pub company_slugs: Vec<String>,
}

impl PostFilter {
    fn by_company(&self) -> bool {
        !self.company_names.is_empty() || !self.company_slugs.is_empty()
    }

    /// Why the record is filtered out, if it is.
    pub fn rejects(&self, record: &ParsedRecord) -> Option<&'static str> {
        if !within_date_range(record, self.since, self.until) {
            return Some("outside date range");
        }
        if self.by_company() && !company_matches(record, &self.company_names, &self.company_slugs) {
            return Some("not from the requested company");
        }
        None
    }
}

// ── Harvest ──

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HarvestCounts {
    pub inserted: usize,
    pub updated: usize,
    pub filtered: usize,
    pub failed: usize,
}

impl HarvestCounts {
    pub fn print(&self) {
        println!(
            "Saved {} new, {} updated; {} filtered out, {} failed.",
            self.inserted, self.updated, self.filtered, self.failed,
        );
    }
}

/// One run's worth of records flowing into the master store.
pub struct Harvest {
    resolver: Resolver,
    output_dir: PathBuf,
    html_dir: Option<PathBuf>,
    filter: PostFilter,
    store: MasterStore,
    records: Vec<ParsedRecord>,
    counts: HarvestCounts,
}

impl Harvest {
    pub fn new(store: MasterStore, resolver: Resolver, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            resolver,
            output_dir: output_dir.into(),
            html_dir: None,
            filter: PostFilter::default(),
            store,
            records: Vec::new(),
            counts: HarvestCounts::default(),
        }
    }

    pub fn with_filter(mut self, filter: PostFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Keep a copy of every fetched page under `dir`.
    pub fn save_html_to(mut self, dir: impl Into<PathBuf>) -> Self {
        self.html_dir = Some(dir.into());
        self
    }

    pub fn store(&self) -> &MasterStore {
        &self.store
    }

    pub fn records(&self) -> &[ParsedRecord] {
        &self.records
    }

    pub fn counts(&self) -> HarvestCounts {
        self.counts
    }

    /// Filter, write the record's JSON file and merge it into the store.
    /// Returns false when the record was filtered out or its file could not
    /// be written; the latter counts as failed.
    pub fn ingest(&mut self, record: ParsedRecord, fallback_name: &str) -> bool {
        let label = record.url.as_deref().unwrap_or(fallback_name);
        if let Some(reason) = self.filter.rejects(&record) {
            debug!(url = label, reason, "skipped");
            self.counts.filtered += 1;
            return false;
        }

        match write_record_json(&self.output_dir, &record, fallback_name) {
            Ok(path) => debug!(path = %path.display(), "record written"),
            Err(e) => {
                warn!(url = label, error = %e, "could not write record");
                self.counts.failed += 1;
                return false;
            }
        }

        match self.store.upsert(&record) {
            UpsertOutcome::Inserted(_) => self.counts.inserted += 1,
            UpsertOutcome::Updated(_) => self.counts.updated += 1,
        }
        self.records.push(record);
        true
    }

    /// Resolve a fetched page; a page without its own url takes the one it
    /// was fetched from.
    pub fn ingest_fetched(&mut self, page: FetchedPage) {
        let Some(html) = page.html else {
            self.counts.failed += 1;
            return;
        };

        // A failed HTML copy only loses the copy; the page is still resolved.
        let source = match self.html_dir.as_deref().map(|dir| save_html(dir, &page.url, &html)) {
            Some(Ok(path)) => path.display().to_string(),
            Some(Err(e)) => {
                warn!(url = %page.url, error = %e, "could not save page html");
                page.url.clone()
            }
            None => page.url.clone(),
        };

        let mut record = match self.resolver.resolve(&html, Some(source.as_str())) {
            Ok(r) => r,
            Err(e) => {
                warn!(url = %page.url, error = %e, "could not resolve page");
                self.counts.failed += 1;
                return;
            }
        };
        if record.url.is_none() {
            record.url = Some(page.url.clone());
        }
        self.ingest(record, &page.url);
    }

    /// Resolve local files in parallel chunks, then ingest them in order.
    pub fn ingest_files(&mut self, files: &[PathBuf]) -> Result<()> {
        let pb = ProgressBar::new(files.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")?
                .progress_chars("#>-"),
        );

        let resolver = self.resolver;
        for chunk in files.chunks(CHUNK) {
            let results: Vec<_> = chunk
                .par_iter()
                .map(|path| (path, resolve_file(&resolver, path)))
                .collect();

            for (path, result) in results {
                let name = file_name(path);
                match result {
                    Ok(record) => {
                        self.ingest(record, &name);
                    }
                    Err(e) => {
                        warn!(file = %path.display(), error = %e, "could not resolve file");
                        self.counts.failed += 1;
                    }
                }
            }
            pb.inc(chunk.len() as u64);
        }

        pb.finish_and_clear();
        Ok(())
    }

    /// Persist the store and the combined JSON of this run's records.
    pub fn finish(self, store_path: &Path, combined_path: &Path) -> Result<(HarvestCounts, Kpis)> {
        db::save_store(store_path, &self.store)?;
        write_combined(combined_path, &self.records)?;
        info!(
            store = %store_path.display(),
            rows = self.store.len(),
            records = self.records.len(),
            "run saved"
        );
        Ok((self.counts, Kpis::from_records(&self.records)))
    }
}

fn save_html(dir: &Path, url: &str, html: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join(format!("{}.html", safe_name(url)));
    fs::write(&path, html).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn resolve_file(resolver: &Resolver, path: &Path) -> Result<ParsedRecord> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let record = resolver.resolve_bytes(&bytes, Some(file_name(path).as_str()))?;
    Ok(record)
}

/// A single file, or every `*.html` file directly inside a folder, sorted.
pub fn html_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut files: Vec<PathBuf> = fs::read_dir(path)
        .with_context(|| format!("reading folder {}", path.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .is_some_and(|x| x.eq_ignore_ascii_case("html"))
        })
        .collect();
    files.sort();
    Ok(files)
}

// ── KPIs ──

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Kpis {
    pub posts: usize,
    pub total_likes: u64,
    pub total_comments: u64,
    pub avg_likes: f64,
    pub avg_comments: f64,
    pub avg_engagement: f64,
}

impl Kpis {
    fn from_counts(counts: impl Iterator<Item = (Option<u64>, Option<u64>)>) -> Self {
        let mut k = Kpis::default();
        // Totals saturate; averages use float sums.
        let (mut likes_sum, mut comments_sum) = (0f64, 0f64);
        for (likes, comments) in counts {
            let (likes, comments) = (likes.unwrap_or(0), comments.unwrap_or(0));
            k.posts += 1;
            k.total_likes = k.total_likes.saturating_add(likes);
            k.total_comments = k.total_comments.saturating_add(comments);
            likes_sum += likes as f64;
            comments_sum += comments as f64;
        }
        if k.posts > 0 {
            let n = k.posts as f64;
            k.avg_likes = likes_sum / n;
            k.avg_comments = comments_sum / n;
            k.avg_engagement = (likes_sum + comments_sum) / n;
        }
        k
    }

    pub fn from_records(records: &[ParsedRecord]) -> Self {
        Self::from_counts(records.iter().map(|r| (r.likes, r.comments)))
    }

    /// Over every store row; text cells go through the count normalizer.
    pub fn from_store(store: &MasterStore) -> Self {
        Self::from_counts((0..store.len()).map(|i| {
            (
                store.get(i, "likes").and_then(cell_count),
                store.get(i, "comments").and_then(cell_count),
            )
        }))
    }

    pub fn print(&self) {
        println!("Posts:          {}", self.posts);
        println!("Total likes:    {}", self.total_likes);
        println!("Total comments: {}", self.total_comments);
        println!("Avg likes:      {:.1}", self.avg_likes);
        println!("Avg comments:   {:.1}", self.avg_comments);
        println!("Avg engagement: {:.1}", self.avg_engagement);
    }
}

fn cell_count(cell: &Value) -> Option<u64> {
    match cell {
        Value::Integer(n) => parse_count(*n),
        Value::Real(f) => parse_count(*f),
        Value::Text(t) => parse_count(t.as_str()),
        _ => None,
    }
}

// ── Overview ──

pub struct OverviewRow {
    pub url: String,
    pub author: String,
    pub title: String,
    pub date: String,
    pub likes: Option<u64>,
    pub comments: Option<u64>,
}

/// Store rows, most liked first; rows without a like count go last.
pub fn overview(store: &MasterStore, limit: usize) -> Vec<OverviewRow> {
    let text = |i: usize, col: &str| match store.get(i, col) {
        Some(Value::Text(t)) => t.clone(),
        Some(Value::Integer(n)) => n.to_string(),
        _ => String::new(),
    };
    let mut rows: Vec<OverviewRow> = (0..store.len())
        .map(|i| OverviewRow {
            url: text(i, "url"),
            author: text(i, "author"),
            title: text(i, "title"),
            date: text(i, "date_published"),
            likes: store.get(i, "likes").and_then(cell_count),
            comments: store.get(i, "comments").and_then(cell_count),
        })
        .collect();
    rows.sort_by(|a, b| b.likes.cmp(&a.likes));
    rows.truncate(limit);
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixtures() -> PathBuf {
        PathBuf::from("tests/fixtures")
    }

    fn page(url: &str, html: Option<&str>) -> FetchedPage {
        FetchedPage {
            url: url.to_string(),
            html: html.map(str::to_string),
            status: Some(200),
            error: html.is_none().then(|| "HTTP 500".to_string()),
            latency_ms: 5,
        }
    }

    #[test]
    fn lists_html_files_sorted() {
        let files = html_files(&fixtures()).unwrap();
        let names: Vec<String> = files.iter().map(|p| file_name(p)).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert!(names.contains(&"posting_full.html".to_string()));

        let one = html_files(&fixtures().join("meta_only.html")).unwrap();
        assert_eq!(one.len(), 1);
    }

    #[test]
    fn folder_parse_fills_store_and_outputs() {
        let out = tempfile::tempdir().unwrap();
        let files = html_files(&fixtures()).unwrap();

        let mut h = Harvest::new(MasterStore::new(), Resolver::default(), out.path().join("json"));
        h.ingest_files(&files).unwrap();

        assert_eq!(h.counts().failed, 0);
        assert_eq!(h.records().len(), files.len());
        assert_eq!(h.store().len(), files.len());
        assert!(h.records().iter().all(|r| r.source_reference.is_some()));

        let store_path = out.path().join("posts.sqlite");
        let combined = out.path().join("all.json");
        let (counts, kpis) = h.finish(&store_path, &combined).unwrap();
        assert_eq!(counts.inserted, files.len());
        assert_eq!(kpis.posts, files.len());
        assert_eq!(db::load_store(&store_path).len(), files.len());
        assert!(combined.exists());
    }

    #[test]
    fn reparse_updates_instead_of_duplicating() {
        let out = tempfile::tempdir().unwrap();
        let file = vec![fixtures().join("posting_full.html")];

        let mut h = Harvest::new(MasterStore::new(), Resolver::default(), out.path());
        h.ingest_files(&file).unwrap();
        h.ingest_files(&file).unwrap();
        assert_eq!(h.store().len(), 1);
        assert_eq!(h.counts().inserted, 1);
        assert_eq!(h.counts().updated, 1);
    }

    #[test]
    fn fetched_page_gets_url_fallback() {
        let out = tempfile::tempdir().unwrap();
        let mut h = Harvest::new(MasterStore::new(), Resolver::default(), out.path())
            .save_html_to(out.path().join("html"));
        let url = "https://www.linkedin.com/posts/nobody_activity-1";
        h.ingest_fetched(page(url, Some("<html><head><title>Hi</title></head></html>")));

        let rec = &h.records()[0];
        assert_eq!(rec.url.as_deref(), Some(url));
        assert!(rec.source_reference.as_deref().unwrap().ends_with(".html"));
        assert!(out
            .path()
            .join("html")
            .join("www.linkedin.com_posts_nobody_activity-1.html")
            .exists());
    }

    #[test]
    fn unwritable_record_does_not_stop_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let pages = dir.path().join("pages");
        fs::create_dir_all(&pages).unwrap();
        fs::write(
            pages.join("a.html"),
            r#"<html><head><meta property="og:url" content="https://x.com/p/a"></head></html>"#,
        )
        .unwrap();
        fs::write(
            pages.join("b.html"),
            r#"<html><head><meta property="og:url" content="https://x.com/p/b"></head></html>"#,
        )
        .unwrap();
        // A directory where a's JSON file should go makes that write fail.
        let out = dir.path().join("json");
        fs::create_dir_all(out.join("x.com_p_a.json")).unwrap();

        let mut h = Harvest::new(MasterStore::new(), Resolver::default(), &out);
        h.ingest_files(&html_files(&pages).unwrap()).unwrap();

        assert_eq!(h.counts().failed, 1);
        assert_eq!(h.counts().inserted, 1);
        assert_eq!(h.records().len(), 1);
        assert_eq!(h.records()[0].url.as_deref(), Some("https://x.com/p/b"));
        assert!(out.join("x.com_p_b.json").is_file());
    }

    #[test]
    fn page_with_a_stray_latin1_byte_is_ingested() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cafe.html");
        let mut bytes = b"<html><head><title>Caf".to_vec();
        bytes.push(0xE9);
        bytes.extend_from_slice(b" opening</title></head><body><p>12 likes</p></body></html>");
        fs::write(&path, bytes).unwrap();

        let mut h = Harvest::new(MasterStore::new(), Resolver::default(), dir.path().join("json"));
        h.ingest_files(&[path]).unwrap();

        assert_eq!(h.counts().failed, 0);
        assert_eq!(h.records()[0].title.as_deref(), Some("Caf\u{FFFD} opening"));
    }

    #[test]
    fn failed_fetch_is_counted_not_fatal() {
        let out = tempfile::tempdir().unwrap();
        let mut h = Harvest::new(MasterStore::new(), Resolver::default(), out.path());
        h.ingest_fetched(page("https://x.com/a", None));
        h.ingest_fetched(page("https://x.com/b", Some("<p>5 likes</p>")));
        assert_eq!(h.counts().failed, 1);
        assert_eq!(h.store().len(), 1);
    }

    #[test]
    fn oversized_page_is_counted_as_failed() {
        let out = tempfile::tempdir().unwrap();
        let mut h = Harvest::new(MasterStore::new(), Resolver::new(8), out.path());
        h.ingest_fetched(page("https://x.com/a", Some("<html>way too long</html>")));
        assert_eq!(h.counts().failed, 1);
        assert!(h.records().is_empty());
    }

    #[test]
    fn filtered_records_skip_store_and_json() {
        let out = tempfile::tempdir().unwrap();
        let filter = PostFilter {
            company_names: vec!["Globex".into()],
            ..Default::default()
        };
        let mut h = Harvest::new(MasterStore::new(), Resolver::default(), out.path())
            .with_filter(filter);
        h.ingest_files(&[fixtures().join("posting_full.html")]).unwrap();
        assert_eq!(h.counts().filtered, 1);
        assert!(h.store().is_empty());
        assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[test]
    fn date_filter_rejects_old_posts() {
        let filter = PostFilter {
            since: NaiveDate::from_ymd_opt(2024, 6, 1),
            ..Default::default()
        };
        let rec = ParsedRecord {
            date_published: Some("2024-05-12T08:30:00+00:00".into()),
            ..Default::default()
        };
        assert_eq!(filter.rejects(&rec), Some("outside date range"));
        assert_eq!(filter.rejects(&ParsedRecord::default()), None);
    }

    #[test]
    fn kpis_treat_missing_counts_as_zero() {
        let recs = vec![
            ParsedRecord { likes: Some(10), comments: Some(2), ..Default::default() },
            ParsedRecord { likes: None, comments: Some(4), ..Default::default() },
        ];
        let k = Kpis::from_records(&recs);
        assert_eq!(k.posts, 2);
        assert_eq!(k.total_likes, 10);
        assert_eq!(k.total_comments, 6);
        assert_eq!(k.avg_likes, 5.0);
        assert_eq!(k.avg_engagement, 8.0);
        assert_eq!(Kpis::from_records(&[]), Kpis::default());
    }

    #[test]
    fn kpi_totals_saturate_instead_of_overflowing() {
        let huge = parse_count("9000000000000M");
        assert_eq!(huge, Some(9_000_000_000_000_000_000));
        let recs: Vec<ParsedRecord> = (0..3)
            .map(|_| ParsedRecord { likes: huge, comments: huge, ..Default::default() })
            .collect();
        let k = Kpis::from_records(&recs);
        assert_eq!(k.total_likes, u64::MAX);
        assert_eq!(k.total_comments, u64::MAX);
        assert!((k.avg_likes - 9e18).abs() < 1e6);
        assert!((k.avg_engagement - 1.8e19).abs() < 1e6);
    }

    #[test]
    fn store_kpis_read_text_cells() {
        let columns = vec!["url".to_string(), "likes".to_string(), "comments".to_string()];
        let rows = vec![
            vec![Value::Text("a".into()), Value::Text("1.2K".into()), Value::Integer(3)],
            vec![Value::Text("b".into()), Value::Null, Value::Text("n/a".into())],
        ];
        let store = MasterStore::from_parts(columns, rows);
        let k = Kpis::from_store(&store);
        assert_eq!(k.posts, 2);
        assert_eq!(k.total_likes, 1200);
        assert_eq!(k.total_comments, 3);

        let top = overview(&store, 10);
        assert_eq!(top[0].url, "a");
        assert_eq!(top[1].likes, None);
        assert_eq!(overview(&store, 1).len(), 1);

        let mut big = MasterStore::new();
        big.upsert(&ParsedRecord {
            url: Some("c".into()),
            likes: Some(u64::MAX),
            ..Default::default()
        });
        assert_eq!(Kpis::from_store(&big).total_likes, u64::MAX);
        assert_eq!(overview(&big, 1)[0].likes, Some(u64::MAX));
    }
}
