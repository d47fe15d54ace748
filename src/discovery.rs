use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

use crate::filters::{company_slug_from_url, is_post_url};

const SEARCH_ENDPOINT: &str = "https://serpapi.com/search.json";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    organic_results: Vec<OrganicResult>,
}

#[derive(Debug, Deserialize)]
struct OrganicResult {
    link: Option<String>,
}

/// Web-search client for finding post permalinks.
pub struct Discovery {
    client: reqwest::Client,
    api_key: String,
    top_n: usize,
    delay: Duration,
}

impl Discovery {
    pub fn new(api_key: &str, top_n: usize, delay: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.to_string(),
            top_n,
            delay,
        }
    }

    /// Links for one query, in ranking order.
    pub async fn search(&self, query: &str, top: usize) -> Result<Vec<String>> {
        let num = top.to_string();
        let resp = self
            .client
            .get(SEARCH_ENDPOINT)
            .query(&[
                ("engine", "google"),
                ("q", query),
                ("num", num.as_str()),
                ("api_key", self.api_key.as_str()),
            ])
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .context("search request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("search API error {status}: {body}");
        }

        let data: SearchResponse = resp.json().await.context("unreadable search response")?;
        Ok(links(data))
    }

    /// Candidate post urls for each keyword, de-duplicated and sorted. A
    /// failed search is logged and contributes nothing.
    pub async fn post_urls(&self, keywords: &[String]) -> Vec<String> {
        let mut found = BTreeSet::new();

        for kw in keywords {
            let mut urls = self.search_logged(&posts_query(kw), self.top_n).await;
            tokio::time::sleep(self.delay).await;

            if urls.len() < self.top_n {
                let more = self
                    .search_logged(&feed_query(kw), self.top_n - urls.len())
                    .await;
                urls.extend(more);
                tokio::time::sleep(self.delay).await;
            }

            let before = found.len();
            found.extend(urls.into_iter().filter(|u| is_post_url(u)));
            info!(keyword = %kw, new = found.len() - before, "search done");
        }

        found.into_iter().collect()
    }

    /// Company page slugs for a company name, in ranking order.
    pub async fn company_slugs(&self, company: &str) -> Vec<String> {
        let query = format!("site:linkedin.com/company \"{}\"", company);
        let mut slugs: Vec<String> = Vec::new();
        for link in self.search_logged(&query, 6).await {
            if !link.contains("linkedin.com/company") {
                continue;
            }
            if let Some(slug) = company_slug_from_url(&link) {
                if !slugs.contains(&slug) {
                    slugs.push(slug);
                }
            }
        }
        slugs
    }

    async fn search_logged(&self, query: &str, top: usize) -> Vec<String> {
        match self.search(query, top).await {
            Ok(urls) => urls,
            Err(e) => {
                warn!(query, error = %e, "search failed");
                Vec::new()
            }
        }
    }
}

fn posts_query(keyword: &str) -> String {
    format!("site:linkedin.com/posts \"{}\"", keyword)
}

fn feed_query(keyword: &str) -> String {
    format!("site:linkedin.com/feed/update \"{}\"", keyword)
}

fn links(data: SearchResponse) -> Vec<String> {
    data.organic_results
        .into_iter()
        .filter_map(|r| r.link)
        .filter(|l| !l.is_empty())
        .collect()
}
