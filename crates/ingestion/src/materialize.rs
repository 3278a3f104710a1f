//! RAG table materialization
//!
//! Aligns embedding shards with the warehouse:
//! 1. Load shard records into a typed staging table.
//! 2. Create-or-replace the embeddings table (chunk metadata + vector,
//!    `chunk_text` initially NULL).
//! 3. Reconstruct chunk text deterministically from source documents with
//!    the same chunker that produced the shards, merging in batches.
//! 4. Create-or-replace the doc-entity table for the covered documents.
//!
//! Resume mode keeps an existing embeddings table and only backfills
//! missing chunk text. Materialization refuses to run when the shard run id
//! does not carry the configured chunking parameters.

use crate::chunker::{chunk_document, chunking_signature, signature_matches};
use crate::shard_source::{EmbeddingRecord, ShardSource};
use biograph_common::config::GraphConfig;
use biograph_common::db::DbPool;
use biograph_common::errors::{AppError, Result};
use sea_orm::{ConnectionTrait, DbBackend, Statement};
use std::collections::{HashMap, HashSet};
use tracing::info;

#[derive(Debug, Clone)]
pub struct MaterializeParams {
    pub embed_table: String,
    pub entity_table: String,
    pub resume: bool,
    pub skip_entity_refresh: bool,
    pub max_chunk_chars: usize,
    pub chunk_overlap_chars: usize,
    pub doc_batch_size: usize,
    pub chunk_text_flush: usize,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MaterializeSummary {
    pub chunks_total: i64,
    pub chunks_with_text: i64,
    pub docs_total: i64,
    pub entity_links: i64,
    pub entity_docs: i64,
}

/// Refuse shards whose run id does not carry the configured chunking
/// parameters; text reconstructed with different parameters would silently
/// misalign with the stored embeddings.
pub fn validate_chunking(records: &[EmbeddingRecord], max_chars: usize, overlap: usize) -> Result<()> {
    let Some(run_id) = records
        .iter()
        .find_map(|r| r.embedding_metadata.run_id.as_deref())
    else {
        return Err(AppError::ChunkingMismatch {
            detail: "shards carry no run_id metadata".to_string(),
        });
    };
    if !signature_matches(run_id, max_chars, overlap) {
        return Err(AppError::ChunkingMismatch {
            detail: format!(
                "shard run_id '{}' does not match configured {}",
                run_id,
                chunking_signature(max_chars, overlap)
            ),
        });
    }
    Ok(())
}

pub struct RagMaterializer {
    pool: DbPool,
    graph: GraphConfig,
}

struct DocText {
    doc_id: String,
    doc_type: String,
    text: String,
}

impl RagMaterializer {
    pub fn new(pool: DbPool, graph: GraphConfig) -> Self {
        Self { pool, graph }
    }

    async fn execute(&self, sql: String) -> Result<()> {
        self.pool
            .write()
            .execute(Statement::from_string(DbBackend::Postgres, sql))
            .await?;
        Ok(())
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let row = self
            .pool
            .read()
            .query_one(Statement::from_sql_and_values(
                DbBackend::Postgres,
                "SELECT to_regclass($1) IS NOT NULL AS present",
                vec![table.into()],
            ))
            .await?;
        Ok(row.map(|r| r.try_get("", "present").unwrap_or(false)).unwrap_or(false))
    }

    pub async fn run(
        &self,
        source: &dyn ShardSource,
        params: &MaterializeParams,
    ) -> Result<MaterializeSummary> {
        let resume = params.resume && self.table_exists(&params.embed_table).await?;
        if resume {
            info!(table = %params.embed_table, "Resume mode: keeping existing embeddings table");
        } else {
            self.load_embeddings(source, params).await?;
        }

        self.reconstruct_chunk_text(params).await?;

        if params.skip_entity_refresh {
            info!("Skipping entity table refresh");
        } else {
            self.refresh_entity_table(params).await?;
        }

        self.summarize(params).await
    }

    /// Phases 1-2: stage shard records and build the embeddings table.
    async fn load_embeddings(&self, source: &dyn ShardSource, params: &MaterializeParams) -> Result<()> {
        let shards = source.list_shards()?;
        if shards.is_empty() {
            return Err(AppError::Internal {
                message: "no embedding shards found under the given prefix".to_string(),
            });
        }

        // Probe the first shard for dimension and chunking parameters
        let first = source.read_shard(&shards[0])?;
        validate_chunking(&first, params.max_chunk_chars, params.chunk_overlap_chars)?;
        let dim = first
            .iter()
            .map(|r| r.embedding.len())
            .find(|d| *d > 0)
            .ok_or_else(|| AppError::Internal {
                message: "first shard contains no embeddings".to_string(),
            })?;

        info!(shards = shards.len(), dim, "Loading embedding shards");

        let stage = format!("{}_stage", params.embed_table);
        self.execute(format!("DROP TABLE IF EXISTS {}", stage)).await?;
        self.execute(format!(
            r#"
            CREATE TABLE {stage} (
              chunk_id TEXT,
              doc_id TEXT,
              doc_type TEXT,
              source_id TEXT,
              chunk_index BIGINT,
              embedding_text TEXT,
              run_id TEXT,
              model_id TEXT
            )
            "#,
        ))
        .await?;

        let mut pending = first;
        let mut shard_iter = shards.iter().skip(1);
        loop {
            self.insert_stage_rows(&stage, &pending).await?;
            pending = match shard_iter.next() {
                Some(name) => source.read_shard(name)?,
                None => break,
            };
        }

        self.execute(format!("DROP TABLE IF EXISTS {}", params.embed_table)).await?;
        self.execute(format!(
            r#"
            CREATE TABLE {embed} AS
            SELECT DISTINCT ON (chunk_id)
              chunk_id,
              doc_id,
              doc_type,
              source_id,
              chunk_index,
              CAST(NULL AS TEXT) AS chunk_text,
              CAST(embedding_text AS vector({dim})) AS embedding,
              run_id,
              model_id
            FROM {stage}
            WHERE chunk_id IS NOT NULL AND doc_id IS NOT NULL
            ORDER BY chunk_id
            "#,
            embed = params.embed_table,
            stage = stage,
            dim = dim,
        ))
        .await?;
        self.execute(format!("DROP TABLE IF EXISTS {}", stage)).await?;
        Ok(())
    }

    async fn insert_stage_rows(&self, stage: &str, records: &[EmbeddingRecord]) -> Result<()> {
        // Bounded multi-row inserts keep the parameter count under the
        // wire-protocol limit
        const ROWS_PER_INSERT: usize = 500;

        for batch in records.chunks(ROWS_PER_INSERT) {
            let mut placeholders = Vec::with_capacity(batch.len());
            let mut values: Vec<sea_orm::Value> = Vec::with_capacity(batch.len() * 8);
            for (i, record) in batch.iter().enumerate() {
                let base = i * 8;
                placeholders.push(format!(
                    "(${},${},${},${},${},${},${},${})",
                    base + 1, base + 2, base + 3, base + 4,
                    base + 5, base + 6, base + 7, base + 8,
                ));
                let meta = &record.embedding_metadata;
                let embedding_text = format!(
                    "[{}]",
                    record.embedding.iter().map(|f| f.to_string()).collect::<Vec<_>>().join(",")
                );
                values.push(record.id.as_str().into());
                values.push(meta.doc_id.as_deref().into());
                values.push(meta.doc_type.as_deref().into());
                values.push(meta.source_id.as_deref().into());
                values.push(meta.chunk_index.into());
                values.push(embedding_text.into());
                values.push(meta.run_id.as_deref().into());
                values.push(meta.model_id.as_deref().into());
            }

            let sql = format!(
                "INSERT INTO {} (chunk_id, doc_id, doc_type, source_id, chunk_index, embedding_text, run_id, model_id) VALUES {}",
                stage,
                placeholders.join(", ")
            );
            self.pool
                .write()
                .execute(Statement::from_sql_and_values(DbBackend::Postgres, &sql, values))
                .await?;
        }
        Ok(())
    }

    /// Phase 3: re-chunk source documents and merge text by chunk id.
    async fn reconstruct_chunk_text(&self, params: &MaterializeParams) -> Result<()> {
        let docs = self
            .pool
            .read()
            .query_all(Statement::from_string(
                DbBackend::Postgres,
                format!(
                    "SELECT DISTINCT doc_id, doc_type FROM {} WHERE chunk_text IS NULL OR btrim(chunk_text) = ''",
                    params.embed_table
                ),
            ))
            .await?;
        let docs: Vec<(String, String)> = docs
            .iter()
            .map(|row| {
                Ok((
                    row.try_get("", "doc_id")?,
                    row.try_get::<Option<String>>("", "doc_type")?.unwrap_or_default(),
                ))
            })
            .collect::<std::result::Result<_, sea_orm::DbErr>>()?;
        info!(docs = docs.len(), "Reconstructing chunk text");

        // Stable staging table name lets interrupted runs continue cleanly
        let stage = format!("{}_text_stage", params.embed_table);
        self.execute(format!(
            "CREATE TABLE IF NOT EXISTS {} (chunk_id TEXT, chunk_text TEXT)",
            stage
        ))
        .await?;
        self.execute(format!("TRUNCATE TABLE {}", stage)).await?;

        let mut pending: Vec<(String, String)> = Vec::new();
        for batch in docs.chunks(params.doc_batch_size.max(1)) {
            let doc_ids: Vec<String> = batch.iter().map(|(id, _)| id.clone()).collect();

            let expected = self.expected_chunk_ids(&params.embed_table, &doc_ids).await?;
            let texts = self.fetch_doc_texts(&doc_ids).await?;

            for doc in texts {
                let Some(expected_ids) = expected.get(&doc.doc_id) else { continue };
                for chunk in chunk_document(
                    &doc.doc_id,
                    &doc.doc_type,
                    &doc.text,
                    params.max_chunk_chars,
                    params.chunk_overlap_chars,
                ) {
                    if expected_ids.contains(&chunk.chunk_id) {
                        pending.push((chunk.chunk_id, chunk.text));
                    }
                }
            }

            if pending.len() >= params.chunk_text_flush {
                self.flush_chunk_text(&stage, &params.embed_table, &pending).await?;
                pending.clear();
            }
        }
        self.flush_chunk_text(&stage, &params.embed_table, &pending).await?;
        self.execute(format!("DROP TABLE IF EXISTS {}", stage)).await?;
        Ok(())
    }

    async fn expected_chunk_ids(
        &self,
        embed_table: &str,
        doc_ids: &[String],
    ) -> Result<HashMap<String, HashSet<String>>> {
        if doc_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders: Vec<String> = (1..=doc_ids.len()).map(|i| format!("${}", i)).collect();
        let sql = format!(
            "SELECT doc_id, chunk_id FROM {} WHERE doc_id IN ({})",
            embed_table,
            placeholders.join(", ")
        );
        let values: Vec<sea_orm::Value> = doc_ids.iter().map(|id| id.as_str().into()).collect();
        let rows = self
            .pool
            .read()
            .query_all(Statement::from_sql_and_values(DbBackend::Postgres, &sql, values))
            .await?;

        let mut expected: HashMap<String, HashSet<String>> = HashMap::new();
        for row in rows {
            let doc_id: String = row.try_get("", "doc_id")?;
            let chunk_id: String = row.try_get("", "chunk_id")?;
            expected.entry(doc_id).or_default().insert(chunk_id);
        }
        Ok(expected)
    }

    /// Document text from the source tables, keyed by prefixed doc id.
    /// Papers prefer the abstract and fall back to the title; trials
    /// concatenate their descriptive fields; patents use the abstract.
    async fn fetch_doc_texts(&self, doc_ids: &[String]) -> Result<Vec<DocText>> {
        if doc_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders: Vec<String> = (1..=doc_ids.len()).map(|i| format!("${}", i)).collect();
        let in_list = placeholders.join(", ");

        let sql = format!(
            r#"
            WITH paper_docs AS (
              SELECT 'PMID:' || CAST(pmid AS TEXT) AS doc_id,
                     'paper' AS doc_type,
                     COALESCE(NULLIF(btrim(abstract_text), ''), NULLIF(btrim(article_title), '')) AS text
              FROM {papers}
            ),
            trial_docs AS (
              SELECT 'NCT:' || nct_id AS doc_id,
                     'trial' AS doc_type,
                     NULLIF(btrim(concat_ws(' ',
                       brief_summaries, detailed_descriptions, brief_title,
                       official_title, conditions, keywords
                     )), '') AS text
              FROM {trials}
            ),
            patent_docs AS (
              SELECT 'PATENT:' || patent_id AS doc_id,
                     'patent' AS doc_type,
                     NULLIF(btrim(abstract), '') AS text
              FROM {patents}
            ),
            all_docs AS (
              SELECT * FROM paper_docs
              UNION ALL SELECT * FROM trial_docs
              UNION ALL SELECT * FROM patent_docs
            )
            SELECT doc_id, doc_type, text
            FROM all_docs
            WHERE text IS NOT NULL AND doc_id IN ({in_list})
            "#,
            papers = self.graph.paper_table,
            trials = self.graph.trial_table,
            patents = self.graph.patent_table,
        );
        let values: Vec<sea_orm::Value> = doc_ids.iter().map(|id| id.as_str().into()).collect();
        let rows = self
            .pool
            .read()
            .query_all(Statement::from_sql_and_values(DbBackend::Postgres, &sql, values))
            .await?;

        let mut texts = Vec::with_capacity(rows.len());
        for row in rows {
            texts.push(DocText {
                doc_id: row.try_get("", "doc_id")?,
                doc_type: row.try_get("", "doc_type")?,
                text: row.try_get("", "text")?,
            });
        }
        Ok(texts)
    }

    async fn flush_chunk_text(
        &self,
        stage: &str,
        embed_table: &str,
        rows: &[(String, String)],
    ) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        const ROWS_PER_INSERT: usize = 1000;
        for batch in rows.chunks(ROWS_PER_INSERT) {
            let mut placeholders = Vec::with_capacity(batch.len());
            let mut values: Vec<sea_orm::Value> = Vec::with_capacity(batch.len() * 2);
            for (i, (chunk_id, chunk_text)) in batch.iter().enumerate() {
                placeholders.push(format!("(${},${})", i * 2 + 1, i * 2 + 2));
                values.push(chunk_id.as_str().into());
                values.push(chunk_text.as_str().into());
            }
            let sql = format!(
                "INSERT INTO {} (chunk_id, chunk_text) VALUES {}",
                stage,
                placeholders.join(", ")
            );
            self.pool
                .write()
                .execute(Statement::from_sql_and_values(DbBackend::Postgres, &sql, values))
                .await?;
        }

        self.execute(format!(
            "UPDATE {embed} t SET chunk_text = s.chunk_text FROM {stage} s WHERE t.chunk_id = s.chunk_id",
            embed = embed_table,
            stage = stage,
        ))
        .await?;
        self.execute(format!("TRUNCATE TABLE {}", stage)).await?;
        info!(rows = rows.len(), "Merged reconstructed chunk text");
        Ok(())
    }

    /// Phase 4: doc-entity table restricted to covered documents.
    async fn refresh_entity_table(&self, params: &MaterializeParams) -> Result<()> {
        self.execute(format!("DROP TABLE IF EXISTS {}", params.entity_table)).await?;
        self.execute(format!(
            r#"
            CREATE TABLE {entity} AS
            WITH target_docs AS (
              SELECT DISTINCT doc_id FROM {embed}
            ),
            all_links AS (
              SELECT l.doc_id, l.entity_id,
                     LOWER(COALESCE(l.entity_type, '')) AS entity_type,
                     l.mention, '{paper_links}' AS source_table
              FROM {paper_links} l
              UNION ALL
              SELECT l.doc_id, l.entity_id,
                     LOWER(COALESCE(l.entity_type, '')) AS entity_type,
                     l.mention, '{trial_links}' AS source_table
              FROM {trial_links} l
              UNION ALL
              SELECT l.doc_id, l.entity_id,
                     LOWER(COALESCE(l.entity_type, '')) AS entity_type,
                     l.mention, '{patent_links}' AS source_table
              FROM {patent_links} l
            )
            SELECT a.doc_id, a.entity_id, a.entity_type, a.mention, a.source_table
            FROM all_links a
            JOIN target_docs d ON a.doc_id = d.doc_id
            WHERE a.entity_id IS NOT NULL
            "#,
            entity = params.entity_table,
            embed = params.embed_table,
            paper_links = self.graph.paper_link_table,
            trial_links = self.graph.trial_link_table,
            patent_links = self.graph.patent_link_table,
        ))
        .await?;
        Ok(())
    }

    async fn summarize(&self, params: &MaterializeParams) -> Result<MaterializeSummary> {
        let row = self
            .pool
            .read()
            .query_one(Statement::from_string(
                DbBackend::Postgres,
                format!(
                    r#"
                    SELECT COUNT(*) AS chunks_total,
                           COUNT(*) FILTER (WHERE chunk_text IS NOT NULL AND btrim(chunk_text) <> '') AS chunks_with_text,
                           COUNT(DISTINCT doc_id) AS docs_total
                    FROM {}
                    "#,
                    params.embed_table
                ),
            ))
            .await?
            .ok_or_else(|| AppError::Internal { message: "coverage query returned no row".to_string() })?;

        let (entity_links, entity_docs) = if params.skip_entity_refresh {
            (-1, -1)
        } else {
            let row = self
                .pool
                .read()
                .query_one(Statement::from_string(
                    DbBackend::Postgres,
                    format!(
                        "SELECT COUNT(*) AS entity_links, COUNT(DISTINCT doc_id) AS entity_docs FROM {}",
                        params.entity_table
                    ),
                ))
                .await?
                .ok_or_else(|| AppError::Internal { message: "entity stats query returned no row".to_string() })?;
            (row.try_get("", "entity_links")?, row.try_get("", "entity_docs")?)
        };

        Ok(MaterializeSummary {
            chunks_total: row.try_get("", "chunks_total")?,
            chunks_with_text: row.try_get("", "chunks_with_text")?,
            docs_total: row.try_get("", "docs_total")?,
            entity_links,
            entity_docs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard_source::EmbeddingMetadata;

    fn record(run_id: Option<&str>) -> EmbeddingRecord {
        EmbeddingRecord {
            id: "PMID:1#0".to_string(),
            embedding: vec![0.1, 0.2],
            embedding_metadata: EmbeddingMetadata {
                doc_id: Some("PMID:1".to_string()),
                doc_type: Some("paper".to_string()),
                source_id: Some("1".to_string()),
                chunk_index: Some(0),
                entity_count: Some(2),
                run_id: run_id.map(|s| s.to_string()),
                model_id: Some("embed-m".to_string()),
            },
        }
    }

    #[test]
    fn test_validate_chunking_accepts_matching_run_id() {
        let records = vec![record(Some("20260501T000000Z-mc3500-ov300"))];
        assert!(validate_chunking(&records, 3500, 300).is_ok());
    }

    #[test]
    fn test_validate_chunking_rejects_mismatch() {
        let records = vec![record(Some("20260501T000000Z-mc2000-ov100"))];
        let err = validate_chunking(&records, 3500, 300).unwrap_err();
        assert!(matches!(err, AppError::ChunkingMismatch { .. }));
    }

    #[test]
    fn test_validate_chunking_rejects_missing_run_id() {
        let records = vec![record(None)];
        assert!(validate_chunking(&records, 3500, 300).is_err());
    }
}
