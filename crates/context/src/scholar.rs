//! Semantic Scholar batch client
//!
//! Fetches title/abstract/tldr/year for a set of PMIDs. Deep-think treats
//! this as optional enrichment: failures are downgraded to "no external
//! context" by the caller.

use async_trait::async_trait;
use biograph_common::config::ScholarConfig;
use biograph_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScholarPaper {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, rename = "abstract")]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub tldr: Option<Tldr>,
    #[serde(default)]
    pub year: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tldr {
    #[serde(default)]
    pub text: Option<String>,
}

impl ScholarPaper {
    pub fn tldr_text(&self) -> &str {
        self.tldr
            .as_ref()
            .and_then(|t| t.text.as_deref())
            .unwrap_or("")
    }
}

/// External paper metadata source
#[async_trait]
pub trait PaperSource: Send + Sync {
    /// Batch fetch by PMID; entries the service does not know are dropped
    async fn fetch_papers(&self, pmids: &[String]) -> Result<Vec<ScholarPaper>>;
}

pub struct SemanticScholarClient {
    client: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct BatchRequest {
    ids: Vec<String>,
}

impl SemanticScholarClient {
    pub fn new(config: &ScholarConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_base: config.api_base.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl PaperSource for SemanticScholarClient {
    async fn fetch_papers(&self, pmids: &[String]) -> Result<Vec<ScholarPaper>> {
        if pmids.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!(
            "{}/graph/v1/paper/batch?fields=title,abstract,tldr,year",
            self.api_base.trim_end_matches('/')
        );
        let body = BatchRequest {
            ids: pmids.iter().map(|p| format!("PMID:{}", p)).collect(),
        };

        let mut builder = self.client.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            builder = builder.header("x-api-key", key);
        }

        let response = builder.send().await.map_err(|e| AppError::ExternalService {
            service: "Semantic Scholar".to_string(),
            message: e.to_string(),
        })?;

        if !response.status().is_success() {
            return Err(AppError::ExternalService {
                service: "Semantic Scholar".to_string(),
                message: format!("status {}", response.status()),
            });
        }

        // Unknown ids come back as nulls
        let papers: Vec<Option<ScholarPaper>> =
            response.json().await.map_err(|e| AppError::ExternalService {
                service: "Semantic Scholar".to_string(),
                message: format!("malformed response: {}", e),
            })?;

        Ok(papers.into_iter().flatten().collect())
    }
}

/// Fixed-response paper source for tests
#[derive(Default)]
pub struct MockPaperSource {
    pub papers: Vec<ScholarPaper>,
    pub fail: bool,
}

#[async_trait]
impl PaperSource for MockPaperSource {
    async fn fetch_papers(&self, _pmids: &[String]) -> Result<Vec<ScholarPaper>> {
        if self.fail {
            return Err(AppError::ExternalService {
                service: "Semantic Scholar".to_string(),
                message: "injected failure".to_string(),
            });
        }
        Ok(self.papers.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_entries_parse() {
        let json = r#"[{"title": "A", "year": 2020}, null]"#;
        let papers: Vec<Option<ScholarPaper>> = serde_json::from_str(json).unwrap();
        let papers: Vec<ScholarPaper> = papers.into_iter().flatten().collect();
        assert_eq!(papers.len(), 1);
        assert_eq!(papers[0].title.as_deref(), Some("A"));
    }

    #[test]
    fn test_tldr_text_fallback() {
        let paper = ScholarPaper::default();
        assert_eq!(paper.tldr_text(), "");
    }
}
