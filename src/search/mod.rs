//! Search augmentation
//!
//! When a request enables internet search, the user content is rewritten into
//! a prompt carrying the filtered search results, grouped by age. The search
//! subsystem itself lives elsewhere and is reached through [`SearchService`].

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GatewayResult;

/// One search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub url: String,
    /// Rank positions; the first one is used as the reference number
    #[serde(default)]
    pub positions: Vec<i64>,
    pub publish_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub results: Vec<SearchHit>,
}

/// External search capability
#[async_trait]
pub trait SearchService: Send + Sync {
    /// Rewrite user content into a search query
    async fn process_query(&self, content: &str) -> GatewayResult<String>;

    async fn search(&self, query: &str) -> GatewayResult<SearchResult>;

    /// Drop and reorder hits before they reach the prompt
    async fn filter_results(&self, result: SearchResult) -> GatewayResult<SearchResult>;
}

const GUIDELINES: &str = "\nWhen answering:\n\
1. Prefer the most recent information\n\
2. Cite sources by their [number]\n\
3. If sources conflict, say so and explain why\n\
4. If the information is insufficient, say so clearly\n\n\
Based on the information above, ";

const QUESTION_PREFIX: &str = "Please answer the following question: ";

fn format_reference(hit: &SearchHit) -> String {
    let number = hit.positions.first().copied().unwrap_or(0);
    format!(
        "[{}] {}\n{}\nSource: {}\n\n",
        number, hit.title, hit.content, hit.url
    )
}

/// Render search results as a prompt preamble, grouped by publish age
pub fn format_search_prompt(result: &SearchResult, now: DateTime<Utc>) -> String {
    let mut groups: [(&str, Vec<&SearchHit>); 4] = [
        ("From the last 24 hours:\n", Vec::new()),
        ("From the last week:\n", Vec::new()),
        ("From the last month:\n", Vec::new()),
        ("Older related information:\n", Vec::new()),
    ];

    for hit in &result.results {
        let age = now - hit.publish_time;
        let slot = if age < Duration::hours(24) {
            0
        } else if age < Duration::days(7) {
            1
        } else if age < Duration::days(30) {
            2
        } else {
            3
        };
        groups[slot].1.push(hit);
    }

    let mut prompt =
        String::from(
            "I found the following relevant information, ordered by recency and relevance:\n\n",
        );

    for (heading, hits) in &groups {
        if hits.is_empty() {
            continue;
        }
        prompt.push_str(heading);
        for hit in hits {
            prompt.push_str(&format_reference(hit));
        }
        prompt.push('\n');
    }

    prompt.push_str(GUIDELINES);
    prompt
}

/// Run the search pipeline and build augmented content
///
/// Any failure is logged and yields `None`; the caller keeps the original content.
pub async fn augment(service: &dyn SearchService, content: &str) -> Option<String> {
    let result = async {
        let query = service.process_query(content).await?;
        let found = service.search(&query).await?;
        service.filter_results(found).await
    }
    .await;

    match result {
        Ok(filtered) => {
            tracing::debug!(hits = filtered.results.len(), "Search augmentation applied");
            Some(format!(
                "{}{}{}",
                format_search_prompt(&filtered, Utc::now()),
                QUESTION_PREFIX,
                content
            ))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Search augmentation failed, using original content");
            None
        }
    }
}
