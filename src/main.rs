mod db;
mod discovery;
mod fetch;
mod filters;
mod output;
mod parser;
mod pipeline;
mod settings;
mod store;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use discovery::Discovery;
use fetch::FetchOptions;
use parser::Resolver;
use pipeline::{Harvest, PostFilter};
use settings::Settings;

#[derive(Parser)]
#[command(name = "post_harvester", about = "Harvest LinkedIn post pages into JSON and a master store")]
struct Cli {
    /// Store file (default: HARVEST_STORE_PATH or data/posts.sqlite)
    #[arg(long, global = true)]
    store: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct FilterArgs {
    /// Keep posts published on or after this date (YYYY-MM-DD)
    #[arg(long)]
    since: Option<NaiveDate>,
    /// Keep posts published on or before this date (YYYY-MM-DD)
    #[arg(long)]
    until: Option<NaiveDate>,
    /// Keep posts by this company (repeatable)
    #[arg(long = "company")]
    companies: Vec<String>,
    /// LinkedIn company slug to match (repeatable)
    #[arg(long = "slug")]
    slugs: Vec<String>,
}

impl FilterArgs {
    fn into_filter(self) -> PostFilter {
        PostFilter {
            since: self.since,
            until: self.until,
            company_names: self.companies,
            company_slugs: self.slugs,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve saved HTML pages (a folder of *.html, or one file)
    Parse {
        /// Folder or file (default: HARVEST_HTML_DIR or html_pages)
        path: Option<PathBuf>,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Resolve one file and show where each field came from
    Inspect { file: PathBuf },
    /// Search for post URLs matching keywords
    Discover {
        #[arg(short, long, num_args = 1.., required = true)]
        keywords: Vec<String>,
        /// Results per keyword
        #[arg(short = 'n', long)]
        top: Option<usize>,
    },
    /// Fetch, resolve and store posts
    Run {
        /// Post URL to fetch (repeatable)
        #[arg(long = "url")]
        urls: Vec<String>,
        /// File with one URL per line
        #[arg(long)]
        urls_file: Option<PathBuf>,
        /// Discover URLs for these keywords first
        #[arg(short, long, num_args = 1..)]
        keywords: Vec<String>,
        /// Look up company slugs for --company names before filtering
        #[arg(long)]
        detect_slugs: bool,
        /// Keep the fetched HTML under HARVEST_HTML_DIR
        #[arg(long)]
        save_html: bool,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Engagement totals over the store
    Stats,
    /// Store rows, most liked first
    Overview {
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut cfg = Settings::load()?;
    if let Some(store) = cli.store {
        cfg.store_path = store;
    }
    let resolver = Resolver::new(cfg.max_markup_bytes);

    let result = match cli.command {
        Commands::Parse { path, filter } => {
            let path = path.unwrap_or_else(|| cfg.html_dir.clone());
            let files = pipeline::html_files(&path)?;
            if files.is_empty() {
                println!("No .html files in {}.", path.display());
                return Ok(());
            }
            println!("Parsing {} files...", files.len());

            let mut harvest = Harvest::new(db::load_store(&cfg.store_path), resolver, &cfg.output_dir)
                .with_filter(filter.into_filter());
            harvest.ingest_files(&files)?;
            finish(harvest, &cfg)
        }
        Commands::Inspect { file } => {
            let bytes = std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            let markup = parser::decode_markup(&bytes)?;
            let name = file.file_name().map(|n| n.to_string_lossy().into_owned());
            let (record, report) = resolver.resolve_with_report(&markup, name.as_deref())?;

            println!(
                "{} structured blocks ({} fragments dropped), posting: {}",
                report.blocks,
                report.dropped_fragments,
                report.posting.map(|i| format!("#{}", i)).unwrap_or_else(|| "none".into())
            );
            for stage in &report.stages {
                println!("  {:<18} {:?}", stage.stage, stage.outcome);
                if !matches!(stage.outcome, parser::extract::StageOutcome::Filled(_)) {
                    continue;
                }
                for note in &stage.notes {
                    println!("  {:<18}   - {}", "", note);
                }
            }
            println!();
            println!("{}", String::from_utf8(output::to_pretty_json(&record)?)?);
            Ok(())
        }
        Commands::Discover { keywords, top } => {
            let search = Discovery::new(
                cfg.serpapi_key()?,
                top.unwrap_or(cfg.top_n),
                Duration::from_millis(cfg.search_delay_ms),
            );
            let urls = search.post_urls(&keywords).await;
            for u in &urls {
                println!("{}", u);
            }
            println!("\n{} candidate post URLs for {:?}", urls.len(), keywords);
            Ok(())
        }
        Commands::Run {
            urls,
            urls_file,
            keywords,
            detect_slugs,
            save_html,
            filter,
        } => {
            let mut targets = urls;
            if let Some(path) = urls_file {
                targets.extend(read_url_list(&path)?);
            }
            let mut filter = filter.into_filter();
            if !keywords.is_empty() || detect_slugs {
                let search = Discovery::new(
                    cfg.serpapi_key()?,
                    cfg.top_n,
                    Duration::from_millis(cfg.search_delay_ms),
                );
                if detect_slugs {
                    for name in &filter.company_names {
                        for slug in search.company_slugs(name).await {
                            if !filter.company_slugs.contains(&slug) {
                                println!("Detected slug for {}: {}", name, slug);
                                filter.company_slugs.push(slug);
                            }
                        }
                    }
                }
                if !keywords.is_empty() {
                    let found = search.post_urls(&keywords).await;
                    println!("Found {} candidate post URLs for {:?}", found.len(), keywords);
                    targets.extend(found);
                }
            }
            dedupe(&mut targets);
            if targets.is_empty() {
                println!("Nothing to fetch. Pass --url, --urls-file or --keywords.");
                return Ok(());
            }

            let mut harvest = Harvest::new(db::load_store(&cfg.store_path), resolver, &cfg.output_dir)
                .with_filter(filter);
            if save_html {
                harvest = harvest.save_html_to(&cfg.html_dir);
            }

            let t_fetch = Instant::now();
            println!("Fetching {} pages...", targets.len());
            let opts = FetchOptions {
                concurrency: cfg.concurrency,
                delay: Duration::from_millis(cfg.fetch_delay_ms),
            };
            let stats = fetch::fetch_pages_streaming(cfg.spider_key()?, targets, opts, |page| {
                harvest.ingest_fetched(page)
            })
            .await?;
            println!(
                "Fetched {} pages ({} ok, {} errors) in {:.1}s",
                stats.total, stats.ok, stats.errors, t_fetch.elapsed().as_secs_f64()
            );
            finish(harvest, &cfg)
        }
        Commands::Stats => {
            let store = db::load_store(&cfg.store_path);
            println!("Store:          {}", cfg.store_path.display());
            pipeline::Kpis::from_store(&store).print();
            Ok(())
        }
        Commands::Overview { limit } => {
            let store = db::load_store(&cfg.store_path);
            let rows = pipeline::overview(&store, limit);
            if rows.is_empty() {
                println!("No posts stored.");
                return Ok(());
            }

            println!(
                "{:>3} | {:<22} | {:<36} | {:<10} | {:>7} | {:>8}",
                "#", "Author", "Title", "Date", "Likes", "Comments"
            );
            println!("{}", "-".repeat(100));
            let count = |n: Option<u64>| n.map(|v| v.to_string()).unwrap_or_else(|| "-".into());
            for (i, r) in rows.iter().enumerate() {
                println!(
                    "{:>3} | {:<22} | {:<36} | {:<10} | {:>7} | {:>8}",
                    i + 1,
                    truncate(&r.author, 22),
                    truncate(&r.title, 36),
                    r.date.get(..10).unwrap_or(&r.date),
                    count(r.likes),
                    count(r.comments),
                );
            }

            println!("\n--- URLs ---");
            for (i, r) in rows.iter().enumerate() {
                println!("{:>3}  {}", i + 1, r.url);
            }
            println!("\n{} of {} posts", rows.len(), store.len());
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn finish(harvest: Harvest, cfg: &Settings) -> anyhow::Result<()> {
    let (counts, kpis) = harvest.finish(&cfg.store_path, &cfg.combined_json)?;
    counts.print();
    println!("Store:    {}", cfg.store_path.display());
    println!("Combined: {}", cfg.combined_json.display());
    println!();
    kpis.print();
    Ok(())
}

fn read_url_list(path: &Path) -> anyhow::Result<Vec<String>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Drop repeated URLs, keeping first occurrences in order.
fn dedupe(urls: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    urls.retain(|u| seen.insert(u.clone()));
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_list_skips_blanks_and_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.txt");
        std::fs::write(&path, "https://a\n\n# later\n  https://b  \n").unwrap();
        assert_eq!(read_url_list(&path).unwrap(), vec!["https://a", "https://b"]);
    }

    #[test]
    fn dedupe_keeps_first_order() {
        let mut urls = vec!["b".to_string(), "a".into(), "b".into()];
        dedupe(&mut urls);
        assert_eq!(urls, vec!["b", "a"]);
    }

    #[test]
    fn durations() {
        assert_eq!(format_duration(Duration::from_secs(75)), "1m 15s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }

    #[test]
    fn cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "post_harvester", "run", "--url", "https://a", "--since", "2024-01-31",
            "--company", "Acme", "-k", "launch", "rockets",
        ])
        .unwrap();
        match cli.command {
            Commands::Run { urls, keywords, filter, .. } => {
                assert_eq!(urls, vec!["https://a"]);
                assert_eq!(keywords, vec!["launch", "rockets"]);
                assert_eq!(filter.since, NaiveDate::from_ymd_opt(2024, 1, 31));
                assert_eq!(filter.companies, vec!["Acme"]);
            }
            _ => panic!("expected run"),
        }
    }
}
