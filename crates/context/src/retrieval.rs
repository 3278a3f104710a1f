//! RAG retrieval
//!
//! Builds a query text from the current selection, embeds it, fetches ANN
//! candidates from the vector index, hydrates them from the warehouse,
//! applies the co-mention filter (both endpoints linked to the same
//! document), and reranks with a hybrid similarity/token-overlap score.
//!
//! Retrieval is strictly best-effort: a missing vector configuration or any
//! transient failure yields an empty chunk list and the explanation falls
//! back to primary edge evidence.

use crate::selection::SelectionContext;
use async_trait::async_trait;
use biograph_common::config::RagConfig;
use biograph_common::db::DbPool;
use biograph_common::embeddings::Embedder;
use biograph_common::errors::{AppError, Result};
use biograph_common::models::{OverviewPathEntity, RagChunk};
use regex_lite::Regex;
use sea_orm::{ConnectionTrait, DbBackend, Statement};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::warn;

/// Hybrid rerank weights
const SIM_WEIGHT: f64 = 0.75;
const OVERLAP_WEIGHT: f64 = 0.25;

/// Vector index + RAG table surface needed by the retriever
#[async_trait]
pub trait RagStore: Send + Sync {
    /// ANN query: `(chunk_id, distance)` pairs, nearest first
    async fn find_neighbors(&self, embedding: &[f32], k: usize) -> Result<Vec<(String, f64)>>;

    /// Hydrate chunk rows from the warehouse (distance not included)
    async fn fetch_chunks(&self, chunk_ids: &[String]) -> Result<Vec<RagChunk>>;

    /// Doc ids among `doc_ids` that link BOTH entities
    async fn co_mentioned_docs(
        &self,
        source_id: &str,
        target_id: &str,
        doc_ids: &[String],
    ) -> Result<HashSet<String>>;
}

/// RAG store over Postgres + pgvector
pub struct SqlRagStore {
    pool: DbPool,
    embed_table: String,
    entity_table: String,
}

impl SqlRagStore {
    pub fn new(pool: DbPool, embed_table: impl Into<String>, entity_table: impl Into<String>) -> Self {
        Self {
            pool,
            embed_table: embed_table.into(),
            entity_table: entity_table.into(),
        }
    }
}

fn vector_literal(embedding: &[f32]) -> String {
    let joined: Vec<String> = embedding.iter().map(|f| f.to_string()).collect();
    format!("[{}]", joined.join(","))
}

#[async_trait]
impl RagStore for SqlRagStore {
    async fn find_neighbors(&self, embedding: &[f32], k: usize) -> Result<Vec<(String, f64)>> {
        let embedding_str = vector_literal(embedding);
        let sql = format!(
            r#"
            SELECT chunk_id, CAST(embedding <=> '{embedding}'::vector AS FLOAT8) AS distance
            FROM {table}
            ORDER BY embedding <=> '{embedding}'::vector
            LIMIT {k}
            "#,
            table = self.embed_table,
            embedding = embedding_str,
            k = k,
        );

        let rows = self
            .pool
            .read()
            .query_all(Statement::from_string(DbBackend::Postgres, sql))
            .await
            .map_err(|e| AppError::VectorUnavailable {
                message: format!("ANN query failed: {}", e),
            })?;

        let mut neighbors = Vec::with_capacity(rows.len());
        for row in rows {
            let chunk_id: String = row.try_get("", "chunk_id")?;
            let distance: f64 = row.try_get("", "distance")?;
            neighbors.push((chunk_id, distance));
        }
        Ok(neighbors)
    }

    async fn fetch_chunks(&self, chunk_ids: &[String]) -> Result<Vec<RagChunk>> {
        if chunk_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders: Vec<String> = (1..=chunk_ids.len()).map(|i| format!("${}", i)).collect();
        let sql = format!(
            r#"
            SELECT chunk_id, doc_id, doc_type, COALESCE(chunk_text, '') AS chunk_text, source_id
            FROM {table}
            WHERE chunk_id IN ({placeholders})
            "#,
            table = self.embed_table,
            placeholders = placeholders.join(", "),
        );
        let values: Vec<sea_orm::Value> = chunk_ids.iter().map(|id| id.as_str().into()).collect();

        let rows = self
            .pool
            .read()
            .query_all(Statement::from_sql_and_values(DbBackend::Postgres, &sql, values))
            .await?;

        let mut chunks = Vec::with_capacity(rows.len());
        for row in rows {
            chunks.push(RagChunk {
                chunk_id: row.try_get("", "chunk_id")?,
                doc_id: row.try_get("", "doc_id")?,
                doc_type: row.try_get("", "doc_type")?,
                chunk_text: row.try_get("", "chunk_text")?,
                source_id: row.try_get("", "source_id")?,
                distance: 0.0,
            });
        }
        Ok(chunks)
    }

    async fn co_mentioned_docs(
        &self,
        source_id: &str,
        target_id: &str,
        doc_ids: &[String],
    ) -> Result<HashSet<String>> {
        if doc_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let placeholders: Vec<String> = (3..=doc_ids.len() + 2).map(|i| format!("${}", i)).collect();
        let sql = format!(
            r#"
            SELECT doc_id
            FROM {table}
            WHERE entity_id IN ($1, $2)
              AND doc_id IN ({placeholders})
            GROUP BY doc_id
            HAVING COUNT(DISTINCT entity_id) = 2
            "#,
            table = self.entity_table,
            placeholders = placeholders.join(", "),
        );
        let mut values: Vec<sea_orm::Value> = vec![source_id.into(), target_id.into()];
        values.extend(doc_ids.iter().map(|id| sea_orm::Value::from(id.as_str())));

        let rows = self
            .pool
            .read()
            .query_all(Statement::from_sql_and_values(DbBackend::Postgres, &sql, values))
            .await?;

        let mut docs = HashSet::with_capacity(rows.len());
        for row in rows {
            docs.insert(row.try_get("", "doc_id")?);
        }
        Ok(docs)
    }
}

/// Result of the vector-index verification probe
#[derive(Debug, Clone, serde::Serialize)]
pub struct VectorVerification {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub neighbors_found: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub struct RagRetriever {
    embedder: Arc<dyn Embedder>,
    store: Option<Arc<dyn RagStore>>,
    config: RagConfig,
}

impl RagRetriever {
    /// `store: None` models a missing vector configuration; retrieval then
    /// always yields an empty list.
    pub fn new(embedder: Arc<dyn Embedder>, store: Option<Arc<dyn RagStore>>, config: RagConfig) -> Self {
        Self { embedder, store, config }
    }

    /// Compose the retrieval query text from the selection.
    pub fn build_query_text(context: &SelectionContext, path: &[OverviewPathEntity]) -> String {
        let edge = &context.edge;
        let source_name = context
            .source
            .as_ref()
            .map(|e| e.name.clone())
            .unwrap_or_else(|| edge.source.clone());
        let target_name = context
            .target
            .as_ref()
            .map(|e| e.name.clone())
            .unwrap_or_else(|| edge.target.clone());
        let rel = edge.label.clone().unwrap_or_else(|| edge.predicate.clone());

        // Center selections merge evidence from the strongest adjacent edges
        let evidence_source: Vec<&biograph_common::models::OverviewEvidence> =
            if context.center_overview {
                context
                    .related_edges
                    .iter()
                    .take(6)
                    .flat_map(|e| e.evidence.iter().take(2))
                    .collect()
            } else {
                edge.evidence.iter().collect()
            };

        let evidence_titles: Vec<&str> = evidence_source
            .iter()
            .filter_map(|e| e.title.as_deref())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .take(3)
            .collect();
        let evidence_snippets: Vec<&str> = evidence_source
            .iter()
            .map(|e| e.snippet.trim())
            .filter(|s| !s.is_empty())
            .take(3)
            .collect();

        let mut relation_bits: Vec<String> = Vec::new();
        if context.center_overview {
            if let Some(source) = &context.source {
                for rel_edge in context.related_edges.iter().take(8) {
                    let other_id = if rel_edge.source == source.id {
                        &rel_edge.target
                    } else {
                        &rel_edge.source
                    };
                    let other_name = context
                        .entity_lookup
                        .get(other_id)
                        .map(|e| e.name.as_str())
                        .unwrap_or(other_id);
                    relation_bits.push(format!(
                        "{} -> {}: {}",
                        source.name,
                        other_name,
                        rel_edge.label.as_deref().unwrap_or(&rel_edge.predicate)
                    ));
                }
            }
        }

        let mut lines = vec![
            format!("source: {}", source_name),
            format!("target: {}", target_name),
            format!("predicate: {}", rel),
        ];
        if path.len() >= 2 {
            let chain: Vec<String> = path
                .iter()
                .map(|p| format!("{} ({})", p.name, p.entity_type))
                .collect();
            lines.push(format!("path: {}", chain.join(" -> ")));
        }
        lines.push("relations:".to_string());
        if relation_bits.is_empty() {
            lines.push("none".to_string());
        } else {
            lines.extend(relation_bits);
        }
        lines.push("evidence:".to_string());
        lines.extend(evidence_titles.iter().map(|s| s.to_string()));
        lines.extend(evidence_snippets.iter().map(|s| s.to_string()));
        lines.join("\n")
    }

    /// Retrieve grounded chunks for the selection. Never errors.
    pub async fn retrieve(
        &self,
        context: &SelectionContext,
        path: &[OverviewPathEntity],
    ) -> Vec<RagChunk> {
        let Some(store) = &self.store else {
            return Vec::new();
        };

        let query_text = Self::build_query_text(context, path);

        let embedding = match self.embedder.embed(&query_text).await {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!(error = %e, "RAG retrieval unavailable, falling back to edge evidence only");
                return Vec::new();
            }
        };

        let neighbors = match store.find_neighbors(&embedding, self.config.fetch_k).await {
            Ok(neighbors) => neighbors,
            Err(e) => {
                warn!(error = %e, "RAG retrieval unavailable, falling back to edge evidence only");
                return Vec::new();
            }
        };
        if neighbors.is_empty() {
            return Vec::new();
        }

        let neighbor_map: HashMap<String, f64> = neighbors.into_iter().collect();
        let chunk_ids: Vec<String> = neighbor_map.keys().cloned().collect();

        let mut chunks = match store.fetch_chunks(&chunk_ids).await {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(error = %e, "Chunk hydration failed, falling back to edge evidence only");
                return Vec::new();
            }
        };
        for chunk in &mut chunks {
            chunk.distance = neighbor_map.get(&chunk.chunk_id).copied().unwrap_or(0.0);
        }

        // Keep only chunks whose document mentions both endpoints. Center
        // selections have no second endpoint; the filter is skipped.
        if !context.center_overview {
            let doc_ids: Vec<String> = chunks
                .iter()
                .map(|c| c.doc_id.clone())
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();
            if doc_ids.is_empty() {
                return Vec::new();
            }
            let eligible = match store
                .co_mentioned_docs(&context.edge.source, &context.edge.target, &doc_ids)
                .await
            {
                Ok(eligible) => eligible,
                Err(e) => {
                    warn!(error = %e, "Co-mention filter failed, dropping RAG context");
                    return Vec::new();
                }
            };
            chunks.retain(|c| eligible.contains(&c.doc_id));
        }

        let query_tokens = tokenize(&query_text);
        chunks.sort_by(|a, b| {
            let ra = rank_chunk(a, &query_tokens);
            let rb = rank_chunk(b, &query_tokens);
            rb.partial_cmp(&ra).unwrap_or(std::cmp::Ordering::Equal)
        });
        chunks.truncate(self.config.top_k);
        chunks
    }

    /// End-to-end probe used by the verify endpoint.
    pub async fn verify(&self) -> VectorVerification {
        let Some(store) = &self.store else {
            return VectorVerification {
                ok: false,
                neighbors_found: None,
                sample_ids: None,
                reason: Some("Missing vector endpoint configuration".to_string()),
            };
        };

        let probe = "BRCA1 breast cancer pathway";
        let result = async {
            let embedding = self.embedder.embed(probe).await?;
            store.find_neighbors(&embedding, 5).await
        }
        .await;

        match result {
            Ok(neighbors) => VectorVerification {
                ok: true,
                neighbors_found: Some(neighbors.len()),
                sample_ids: Some(neighbors.into_iter().map(|(id, _)| id).collect()),
                reason: None,
            },
            Err(e) => VectorVerification {
                ok: false,
                neighbors_found: None,
                sample_ids: None,
                reason: Some(e.to_string()),
            },
        }
    }
}

/// Lowercased alphanumeric token set
pub fn tokenize(text: &str) -> HashSet<String> {
    let re = Regex::new(r"[a-zA-Z0-9]+").unwrap();
    re.find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

fn rank_chunk(chunk: &RagChunk, query_tokens: &HashSet<String>) -> f64 {
    let sim = 1.0 / (1.0 + chunk.distance.max(0.0));
    let chunk_tokens = tokenize(&chunk.chunk_text);
    let overlap =
        chunk_tokens.intersection(query_tokens).count() as f64 / query_tokens.len().max(1) as f64;
    SIM_WEIGHT * sim + OVERLAP_WEIGHT * overlap
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::build_selection_context;
    use biograph_common::embeddings::{MockEmbedder, UnavailableEmbedder};
    use biograph_common::models::{
        OverviewEdge, OverviewEntity, OverviewEvidence, OverviewStreamRequest,
    };

    /// In-memory RAG store double
    #[derive(Default)]
    pub struct MemoryRagStore {
        pub neighbors: Vec<(String, f64)>,
        pub chunks: Vec<RagChunk>,
        pub co_mentioned: HashSet<String>,
    }

    #[async_trait]
    impl RagStore for MemoryRagStore {
        async fn find_neighbors(&self, _embedding: &[f32], k: usize) -> Result<Vec<(String, f64)>> {
            Ok(self.neighbors.iter().take(k).cloned().collect())
        }

        async fn fetch_chunks(&self, chunk_ids: &[String]) -> Result<Vec<RagChunk>> {
            Ok(self
                .chunks
                .iter()
                .filter(|c| chunk_ids.contains(&c.chunk_id))
                .cloned()
                .collect())
        }

        async fn co_mentioned_docs(
            &self,
            _source_id: &str,
            _target_id: &str,
            doc_ids: &[String],
        ) -> Result<HashSet<String>> {
            Ok(self
                .co_mentioned
                .iter()
                .filter(|d| doc_ids.contains(d))
                .cloned()
                .collect())
        }
    }

    fn chunk(chunk_id: &str, doc_id: &str, text: &str) -> RagChunk {
        RagChunk {
            chunk_id: chunk_id.to_string(),
            doc_id: doc_id.to_string(),
            doc_type: "paper".to_string(),
            chunk_text: text.to_string(),
            source_id: doc_id.trim_start_matches("PMID:").to_string(),
            distance: 0.0,
        }
    }

    fn edge_request() -> OverviewStreamRequest {
        OverviewStreamRequest {
            selection_type: "edge".to_string(),
            edge_id: Some("e1".to_string()),
            node_id: None,
            center_node_id: "NCBIGene:672".to_string(),
            entities: vec![
                OverviewEntity {
                    id: "NCBIGene:672".into(),
                    name: "BRCA1".into(),
                    entity_type: "gene".into(),
                },
                OverviewEntity {
                    id: "MESH:D001943".into(),
                    name: "Breast Neoplasms".into(),
                    entity_type: "disease".into(),
                },
            ],
            edges: vec![OverviewEdge {
                id: "e1".to_string(),
                source: "NCBIGene:672".to_string(),
                target: "MESH:D001943".to_string(),
                predicate: "biolink:gene_associated_with_condition".to_string(),
                label: Some("gene associated with condition".to_string()),
                score: Some(0.9),
                provenance: "literature".to_string(),
                source_db: "literature_kg".to_string(),
                evidence: vec![OverviewEvidence {
                    pmid: Some("1234".to_string()),
                    title: Some("BRCA1 mutations in breast cancer".to_string()),
                    snippet: "BRCA1 mutations".to_string(),
                    ..Default::default()
                }],
                paper_count: Some(12),
                trial_count: Some(1),
                patent_count: Some(0),
                cooccurrence_score: Some(13),
            }],
            history: Vec::new(),
            path: Vec::new(),
        }
    }

    fn rag_config() -> RagConfig {
        biograph_common::AppConfig::default().rag
    }

    #[test]
    fn test_query_text_contains_selection() {
        let ctx = build_selection_context(&edge_request()).unwrap();
        let text = RagRetriever::build_query_text(&ctx, &[]);
        assert!(text.contains("source: BRCA1"));
        assert!(text.contains("target: Breast Neoplasms"));
        assert!(text.contains("predicate: gene associated with condition"));
        assert!(text.contains("BRCA1 mutations in breast cancer"));
    }

    #[test]
    fn test_tokenize() {
        let tokens = tokenize("BRCA1, breast-cancer; pathway");
        assert!(tokens.contains("brca1"));
        assert!(tokens.contains("breast"));
        assert!(tokens.contains("pathway"));
    }

    #[tokio::test]
    async fn test_unconfigured_vector_returns_empty() {
        let retriever = RagRetriever::new(Arc::new(MockEmbedder::new(8)), None, rag_config());
        let ctx = build_selection_context(&edge_request()).unwrap();
        let chunks = retriever.retrieve(&ctx, &[]).await;
        assert!(chunks.is_empty());

        let verification = retriever.verify().await;
        assert!(!verification.ok);
        assert!(verification.reason.unwrap().contains("Missing vector endpoint"));
    }

    #[tokio::test]
    async fn test_embed_failure_degrades_to_empty() {
        let store = Arc::new(MemoryRagStore::default());
        let retriever =
            RagRetriever::new(Arc::new(UnavailableEmbedder), Some(store), rag_config());
        let ctx = build_selection_context(&edge_request()).unwrap();
        assert!(retriever.retrieve(&ctx, &[]).await.is_empty());
    }

    #[tokio::test]
    async fn test_co_mention_filter_keeps_shared_docs() {
        let store = MemoryRagStore {
            neighbors: vec![
                ("PMID:1#0".to_string(), 0.1),
                ("PMID:2#0".to_string(), 0.2),
            ],
            chunks: vec![
                chunk("PMID:1#0", "PMID:1", "BRCA1 and breast cancer co-occur here"),
                chunk("PMID:2#0", "PMID:2", "unrelated text"),
            ],
            co_mentioned: HashSet::from(["PMID:1".to_string()]),
        };
        let retriever = RagRetriever::new(
            Arc::new(MockEmbedder::new(8)),
            Some(Arc::new(store)),
            rag_config(),
        );
        let ctx = build_selection_context(&edge_request()).unwrap();
        let chunks = retriever.retrieve(&ctx, &[]).await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].doc_id, "PMID:1");
    }

    #[tokio::test]
    async fn test_rerank_prefers_similar_and_overlapping() {
        let store = MemoryRagStore {
            neighbors: vec![
                ("PMID:1#0".to_string(), 2.0),
                ("PMID:2#0".to_string(), 0.05),
            ],
            chunks: vec![
                chunk("PMID:1#0", "PMID:1", "nothing relevant"),
                chunk("PMID:2#0", "PMID:2", "BRCA1 breast neoplasms association"),
            ],
            co_mentioned: HashSet::from(["PMID:1".to_string(), "PMID:2".to_string()]),
        };
        let retriever = RagRetriever::new(
            Arc::new(MockEmbedder::new(8)),
            Some(Arc::new(store)),
            rag_config(),
        );
        let ctx = build_selection_context(&edge_request()).unwrap();
        let chunks = retriever.retrieve(&ctx, &[]).await;
        assert_eq!(chunks[0].chunk_id, "PMID:2#0");
    }

    #[tokio::test]
    async fn test_verify_reports_neighbors() {
        let store = MemoryRagStore {
            neighbors: vec![("PMID:1#0".to_string(), 0.3)],
            ..Default::default()
        };
        let retriever = RagRetriever::new(
            Arc::new(MockEmbedder::new(8)),
            Some(Arc::new(store)),
            rag_config(),
        );
        let verification = retriever.verify().await;
        assert!(verification.ok);
        assert_eq!(verification.neighbors_found, Some(1));
        assert_eq!(verification.sample_ids.unwrap()[0], "PMID:1#0");
    }
}
