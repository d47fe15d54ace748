use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use config::{Config, Environment};
use serde::Deserialize;

use crate::parser::DEFAULT_MAX_MARKUP_BYTES;

pub const ENV_PREFIX: &str = "HARVEST";

/// Runtime settings: built-in defaults overlaid with `HARVEST_*` variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub store_path: PathBuf,
    pub output_dir: PathBuf,
    pub combined_json: PathBuf,
    pub html_dir: PathBuf,
    pub concurrency: usize,
    pub fetch_delay_ms: u64,
    pub search_delay_ms: u64,
    pub top_n: usize,
    pub max_markup_bytes: usize,
    pub spider_api_key: Option<String>,
    pub serpapi_key: Option<String>,
}

impl Settings {
    pub fn load() -> Result<Self> {
        Self::from_builder(Config::builder().add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true)))
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self> {
        let settings = builder
            .set_default("store_path", "data/posts.sqlite")?
            .set_default("output_dir", "parsed_jsons")?
            .set_default("combined_json", "all_posts_combined.json")?
            .set_default("html_dir", "html_pages")?
            .set_default("concurrency", 4)?
            .set_default("fetch_delay_ms", 800)?
            .set_default("search_delay_ms", 1000)?
            .set_default("top_n", 10)?
            .set_default("max_markup_bytes", DEFAULT_MAX_MARKUP_BYTES as u64)?
            .build()
            .context("reading settings")?
            .try_deserialize::<Settings>()
            .context("invalid settings")?;
        Ok(settings)
    }

    pub fn spider_key(&self) -> Result<&str> {
        require(self.spider_api_key.as_deref(), "SPIDER_API_KEY")
    }

    pub fn serpapi_key(&self) -> Result<&str> {
        require(self.serpapi_key.as_deref(), "SERPAPI_KEY")
    }
}

fn require<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => Ok(v),
        None => bail!("{}_{} is not set", ENV_PREFIX, name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_environment() {
        let s = Settings::from_builder(Config::builder()).unwrap();
        assert_eq!(s.store_path, PathBuf::from("data/posts.sqlite"));
        assert_eq!(s.combined_json, PathBuf::from("all_posts_combined.json"));
        assert_eq!(s.concurrency, 4);
        assert_eq!(s.top_n, 10);
        assert_eq!(s.max_markup_bytes, DEFAULT_MAX_MARKUP_BYTES);
        assert!(s.spider_api_key.is_none());
    }

    #[test]
    fn overrides_win_over_defaults() {
        let builder = Config::builder()
            .set_override("concurrency", 9)
            .unwrap()
            .set_override("serpapi_key", "abc")
            .unwrap();
        let s = Settings::from_builder(builder).unwrap();
        assert_eq!(s.concurrency, 9);
        assert_eq!(s.serpapi_key().unwrap(), "abc");
    }

    #[test]
    fn missing_key_names_variable() {
        let s = Settings::from_builder(Config::builder()).unwrap();
        let err = s.spider_key().unwrap_err().to_string();
        assert!(err.contains("HARVEST_SPIDER_API_KEY"), "{}", err);
    }
}
