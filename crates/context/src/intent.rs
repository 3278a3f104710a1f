//! Query intent resolution
//!
//! Maps free text to either a single-entity search or a two-entity
//! shortest-path request using model function calling, with a JSON-only
//! single-entity extraction fallback and a plausibility guard against stale
//! extractor answers.

use biograph_common::config::LlmConfig;
use biograph_common::errors::{AppError, Result};
use biograph_common::llm::{ChatMessage, FunctionDecl, GenerationParams, GenerativeModel};
use regex_lite::Regex;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

const SYSTEM_INSTRUCTION: &str = "You are a biomedical entity parser. The user will provide a query about \
biomedical entities. Call the appropriate function based on whether the user \
is searching for one entity or looking for a connection between two entities. \
Always use the most common canonical name for each entity.";

/// Resolved intent for a user query
#[derive(Debug, Clone, PartialEq)]
pub enum QueryIntent {
    SearchEntity {
        entity_name: String,
        entity_type: Option<String>,
    },
    FindShortestPath {
        entity1_name: String,
        entity1_type: Option<String>,
        entity2_name: String,
        entity2_type: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct ExtractedEntity {
    entity_name: String,
    #[serde(default)]
    entity_type: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    qualifiers: Vec<String>,
}

pub struct IntentResolver {
    model: Arc<dyn GenerativeModel>,
    config: LlmConfig,
}

impl IntentResolver {
    pub fn new(model: Arc<dyn GenerativeModel>, config: LlmConfig) -> Self {
        Self { model, config }
    }

    fn tool_declarations() -> Vec<FunctionDecl> {
        let entity_type_schema = json!({
            "type": "string",
            "enum": ["gene", "disease", "drug", "pathway", "protein"],
        });
        vec![
            FunctionDecl {
                name: "search_entity".to_string(),
                description: "Search for a single biomedical entity (gene, disease, drug, \
                              pathway, or protein) and show its neighborhood graph."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "entity_name": {
                            "type": "string",
                            "description": "The canonical / most common name of the biomedical entity",
                        },
                        "entity_type": entity_type_schema,
                    },
                    "required": ["entity_name", "entity_type"],
                }),
            },
            FunctionDecl {
                name: "find_shortest_path".to_string(),
                description: "Find the shortest path connecting two biomedical entities in the \
                              knowledge graph. Use when the user mentions two entities and wants \
                              to understand their connection or relationship."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "entity1_name": { "type": "string" },
                        "entity1_type": entity_type_schema,
                        "entity2_name": { "type": "string" },
                        "entity2_type": entity_type_schema,
                    },
                    "required": ["entity1_name", "entity1_type", "entity2_name", "entity2_type"],
                }),
            },
        ]
    }

    /// Resolve the intent for a free-text query.
    ///
    /// Fallback chain: model function calling, then JSON-only single-entity
    /// extraction (low-latency model), then the primary model when the
    /// extracted entity is implausible for the query. Exhausting the chain
    /// surfaces `EntityExtractionFailed`.
    pub async fn resolve(&self, query: &str) -> Result<QueryIntent> {
        match self.resolve_via_tools(query).await {
            Ok(intent) => return Ok(intent),
            Err(e) => {
                warn!(error = %e, "Intent extraction failed, falling back to single-entity");
            }
        }

        // Fast extractor first; its answer must be plausible for the query
        match self.extract_entity_json(&self.config.flash_model, query).await {
            Ok(extracted) if is_plausible_entity_for_query(&extracted.entity_name, query) => {
                return Ok(QueryIntent::SearchEntity {
                    entity_name: extracted.entity_name,
                    entity_type: extracted.entity_type,
                });
            }
            Ok(extracted) => {
                warn!(
                    entity = %extracted.entity_name,
                    query = %query,
                    "Extraction appears stale/mismatched; using fallback model"
                );
            }
            Err(e) => {
                warn!(error = %e, "Fast extraction failed; using fallback model");
            }
        }

        match self.extract_entity_json(&self.config.overview_model, query).await {
            Ok(extracted) if !extracted.entity_name.trim().is_empty() => {
                Ok(QueryIntent::SearchEntity {
                    entity_name: extracted.entity_name,
                    entity_type: extracted.entity_type,
                })
            }
            Ok(_) => Err(AppError::EntityExtractionFailed {
                detail: "extractor returned an empty entity name".to_string(),
            }),
            Err(e) => Err(AppError::EntityExtractionFailed { detail: e.to_string() }),
        }
    }

    async fn resolve_via_tools(&self, query: &str) -> Result<QueryIntent> {
        let params = GenerationParams {
            temperature: 0.0,
            top_p: None,
            max_output_tokens: 200,
        };
        let call = self
            .model
            .generate_with_tools(
                &self.config.overview_model,
                &[ChatMessage::user(query)],
                Some(SYSTEM_INSTRUCTION),
                &Self::tool_declarations(),
                &params,
            )
            .await?
            .ok_or_else(|| AppError::LlmError {
                message: "Model did not return a function call".to_string(),
            })?;

        let get = |key: &str| -> Option<String> {
            call.args.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
        };

        match call.name.as_str() {
            "find_shortest_path" => Ok(QueryIntent::FindShortestPath {
                entity1_name: get("entity1_name").unwrap_or_default(),
                entity1_type: get("entity1_type"),
                entity2_name: get("entity2_name").unwrap_or_default(),
                entity2_type: get("entity2_type"),
            }),
            "search_entity" => Ok(QueryIntent::SearchEntity {
                entity_name: get("entity_name").unwrap_or_default(),
                entity_type: get("entity_type"),
            }),
            other => Err(AppError::LlmError {
                message: format!("Unexpected function call: {}", other),
            }),
        }
    }

    async fn extract_entity_json(&self, model: &str, query: &str) -> Result<ExtractedEntity> {
        let prompt = format!(
            r#"Extract exactly one primary biomedical entity from the user query.
Return only JSON with this shape:
{{
  "entity_name": "<string>",
  "entity_type": "<gene|disease|drug|pathway|protein|other>",
  "qualifiers": ["<string>", ...]
}}
Rules:
- entity_name must be the most salient single entity in the query.
- qualifiers can be empty.
- no markdown, no explanation.
User query: {query}"#
        );

        let params = GenerationParams {
            temperature: 0.0,
            top_p: None,
            max_output_tokens: 200,
        };
        let text = self
            .model
            .generate(model, &[ChatMessage::user(prompt)], None, &params)
            .await?;

        let cleaned = strip_code_fences(text.trim());
        serde_json::from_str::<ExtractedEntity>(cleaned).map_err(|e| AppError::LlmError {
            message: format!("Extractor returned malformed JSON: {}", e),
        })
    }
}

/// Drop surrounding markdown code fences if present.
fn strip_code_fences(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Skip an optional language tag line
    let rest = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn normalize_text(value: &str) -> String {
    let re = Regex::new(r"[^a-z0-9]+").unwrap();
    re.replace_all(&value.to_lowercase(), "").to_string()
}

/// Whether an extracted entity name is plausible for the query: one is a
/// normalized substring of the other, or they share a token longer than
/// 2 characters.
pub fn is_plausible_entity_for_query(entity_name: &str, query: &str) -> bool {
    if entity_name.trim().is_empty() || query.trim().is_empty() {
        return false;
    }
    let q = normalize_text(query);
    let e = normalize_text(entity_name);
    if q.is_empty() || e.is_empty() {
        return false;
    }
    if q.contains(&e) || e.contains(&q) {
        return true;
    }
    // Fuzzy guard for multi-word inputs
    let token_re = Regex::new(r"[a-z0-9]+").unwrap();
    let tokens = |s: &str| -> HashSet<String> {
        token_re
            .find_iter(&s.to_lowercase())
            .map(|m| m.as_str().to_string())
            .filter(|t| t.len() > 2)
            .collect()
    };
    !tokens(query).is_disjoint(&tokens(entity_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use biograph_common::llm::MockModel;

    fn config() -> LlmConfig {
        biograph_common::AppConfig::default().llm
    }

    #[test]
    fn test_plausibility_substring() {
        assert!(is_plausible_entity_for_query("BRCA1", "brca1 breast cancer"));
        assert!(is_plausible_entity_for_query("TP53 gene", "tp53"));
        assert!(!is_plausible_entity_for_query("aspirin", "BRCA1"));
        assert!(!is_plausible_entity_for_query("", "BRCA1"));
    }

    #[test]
    fn test_plausibility_token_overlap() {
        assert!(is_plausible_entity_for_query(
            "Breast Neoplasms",
            "how does brca1 relate to breast cancer neoplasms"
        ));
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
    }

    #[tokio::test]
    async fn test_tool_call_search_entity() {
        let model = Arc::new(MockModel::with_function_call(
            "search_entity",
            json!({ "entity_name": "BRCA1", "entity_type": "gene" }),
        ));
        let resolver = IntentResolver::new(model, config());
        let intent = resolver.resolve("BRCA1").await.unwrap();
        assert_eq!(
            intent,
            QueryIntent::SearchEntity {
                entity_name: "BRCA1".to_string(),
                entity_type: Some("gene".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_tool_call_shortest_path() {
        let model = Arc::new(MockModel::with_function_call(
            "find_shortest_path",
            json!({
                "entity1_name": "BRCA1", "entity1_type": "gene",
                "entity2_name": "aspirin", "entity2_type": "drug",
            }),
        ));
        let resolver = IntentResolver::new(model, config());
        let intent = resolver.resolve("how is BRCA1 related to aspirin").await.unwrap();
        match intent {
            QueryIntent::FindShortestPath { entity1_name, entity2_name, .. } => {
                assert_eq!(entity1_name, "BRCA1");
                assert_eq!(entity2_name, "aspirin");
            }
            other => panic!("unexpected intent: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fallback_to_json_extraction() {
        // No function call; JSON extractor answers with a plausible entity
        let mut model = MockModel::replying(
            r#"{"entity_name": "BRCA1", "entity_type": "gene", "qualifiers": []}"#,
        );
        model.function_call = None;
        let resolver = IntentResolver::new(Arc::new(model), config());
        let intent = resolver.resolve("tell me about brca1").await.unwrap();
        assert_eq!(
            intent,
            QueryIntent::SearchEntity {
                entity_name: "BRCA1".to_string(),
                entity_type: Some("gene".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_all_fallbacks_failing_surface_extraction_error() {
        let chain = config();
        let model = MockModel::replying("not json at all");
        let resolver = IntentResolver::new(Arc::new(model), chain);
        let err = resolver.resolve("anything").await.unwrap_err();
        assert!(matches!(err, AppError::EntityExtractionFailed { .. }));
    }
}
