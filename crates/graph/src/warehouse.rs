//! Warehouse repository
//!
//! All reads against the literature warehouse: canonical entity lookup,
//! neighborhood queries with co-occurrence aggregates, and evidence
//! enrichment. Queries are raw SQL in the repository layer; handlers only
//! see typed rows.

use async_trait::async_trait;
use biograph_common::config::GraphConfig;
use biograph_common::db::DbPool;
use biograph_common::errors::Result;
use biograph_common::models::{Entity, EntityType, NeighborEdge};
use sea_orm::{ConnectionTrait, DbBackend, Statement};
use std::collections::HashMap;
use tracing::info;

/// Title/year pair for a paper
#[derive(Debug, Clone, PartialEq)]
pub struct PaperDetails {
    pub title: String,
    pub year: i32,
}

/// Read interface over the warehouse
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Find the best-matching entity for a free-text name. When a type
    /// filter yields no row, the lookup retries once without it.
    async fn find_entity(&self, query: &str, entity_type: Option<&str>) -> Result<Option<Entity>>;

    /// Resolve an exact entity id (no retry)
    async fn find_entity_by_id(&self, entity_id: &str) -> Result<Option<Entity>>;

    /// Batch-resolve entity ids
    async fn find_entities_by_ids(&self, ids: &[String]) -> Result<HashMap<String, Entity>>;

    /// Top related entities for a seed, ranked by co-occurrence then
    /// evidence count
    async fn find_related_entities(&self, entity_id: &str) -> Result<Vec<NeighborEdge>>;

    /// Batch lookup of paper titles and years; non-integer PMIDs are
    /// silently skipped, missing PMIDs produce no entry
    async fn fetch_paper_details(&self, pmids: &[String]) -> Result<HashMap<String, PaperDetails>>;

    /// Evidence PMIDs for path edges, keyed `"{from}--{to}--{relation_type}"`
    /// in the direction requested by the caller; both orderings are checked
    async fn fetch_edge_pmids(
        &self,
        edges: &[(String, String, String)],
    ) -> Result<HashMap<String, Vec<String>>>;
}

/// Warehouse repository over Postgres
pub struct SqlWarehouse {
    pool: DbPool,
    config: GraphConfig,
}

impl SqlWarehouse {
    pub fn new(pool: DbPool, config: GraphConfig) -> Self {
        Self { pool, config }
    }

    async fn find_entity_once(
        &self,
        query: &str,
        entity_type: Option<&str>,
    ) -> Result<Option<Entity>> {
        let type_filter = if entity_type.is_some() {
            "AND LOWER(entity_type) = LOWER($2)"
        } else {
            ""
        };

        let sql = format!(
            r#"
            SELECT entity_id, entity_type, mention,
              CASE
                WHEN LOWER(mention) = LOWER($1) THEN 1
                WHEN LOWER(mention) LIKE LOWER($1) || '%' THEN 2
                WHEN LOWER(mention) LIKE '%' || LOWER($1) || '%' THEN 3
                WHEN LOWER(entity_id) LIKE '%' || LOWER($1) || '%' THEN 4
                ELSE 5
              END AS match_rank
            FROM {entities}
            WHERE (
              LOWER(mention) LIKE '%' || LOWER($1) || '%'
              OR LOWER(entity_id) LIKE '%' || LOWER($1) || '%'
            )
            {type_filter}
            ORDER BY match_rank ASC, LENGTH(mention) ASC
            LIMIT 1
            "#,
            entities = self.config.entity_table,
            type_filter = type_filter,
        );

        let mut values: Vec<sea_orm::Value> = vec![query.into()];
        if let Some(t) = entity_type {
            values.push(t.into());
        }

        let row = self
            .pool
            .read()
            .query_one(Statement::from_sql_and_values(DbBackend::Postgres, &sql, values))
            .await?;

        Ok(row.map(|row| entity_from_row(&row)).transpose()?)
    }
}

fn entity_from_row(row: &sea_orm::QueryResult) -> std::result::Result<Entity, sea_orm::DbErr> {
    let entity_id: String = row.try_get("", "entity_id")?;
    let entity_type: String = row.try_get("", "entity_type")?;
    let mention: String = row.try_get("", "mention")?;
    Ok(Entity {
        entity_id,
        entity_type: entity_type.parse::<EntityType>().unwrap_or(EntityType::Other),
        mention,
    })
}

#[async_trait]
impl Warehouse for SqlWarehouse {
    async fn find_entity(&self, query: &str, entity_type: Option<&str>) -> Result<Option<Entity>> {
        let found = self.find_entity_once(query, entity_type).await?;
        if found.is_some() {
            return Ok(found);
        }
        if let Some(t) = entity_type {
            info!(entity_type = t, "No results with type filter, retrying without");
            return self.find_entity_once(query, None).await;
        }
        Ok(None)
    }

    async fn find_entity_by_id(&self, entity_id: &str) -> Result<Option<Entity>> {
        let sql = format!(
            "SELECT entity_id, entity_type, mention FROM {} WHERE entity_id = $1 LIMIT 1",
            self.config.entity_table
        );
        let row = self
            .pool
            .read()
            .query_one(Statement::from_sql_and_values(
                DbBackend::Postgres,
                &sql,
                vec![entity_id.into()],
            ))
            .await?;
        Ok(row.map(|row| entity_from_row(&row)).transpose()?)
    }

    async fn find_entities_by_ids(&self, ids: &[String]) -> Result<HashMap<String, Entity>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("${}", i)).collect();
        let sql = format!(
            "SELECT entity_id, entity_type, mention FROM {} WHERE entity_id IN ({})",
            self.config.entity_table,
            placeholders.join(", ")
        );
        let values: Vec<sea_orm::Value> = ids.iter().map(|id| id.as_str().into()).collect();

        let rows = self
            .pool
            .read()
            .query_all(Statement::from_sql_and_values(DbBackend::Postgres, &sql, values))
            .await?;

        let mut result = HashMap::with_capacity(rows.len());
        for row in rows {
            let entity = entity_from_row(&row)?;
            result.insert(entity.entity_id.clone(), entity);
        }
        Ok(result)
    }

    async fn find_related_entities(&self, entity_id: &str) -> Result<Vec<NeighborEdge>> {
        let sql = format!(
            r#"
            WITH relationships AS (
              SELECT
                CASE WHEN entity_id1 = $1 THEN entity_id2 ELSE entity_id1 END AS other_entity_id,
                relation_type,
                CASE WHEN entity_id1 = $1 THEN '->' ELSE '<-' END AS direction,
                pmid
              FROM {rels}
              WHERE entity_id1 = $1 OR entity_id2 = $1
            ),
            agg AS (
              SELECT other_entity_id, relation_type, direction,
                COUNT(DISTINCT pmid) AS evidence_count,
                ARRAY_TO_STRING(
                  (ARRAY_AGG(DISTINCT CAST(pmid AS TEXT) ORDER BY CAST(pmid AS TEXT)))[1:{max_evidence}],
                  ','
                ) AS pmids
              FROM relationships
              GROUP BY other_entity_id, relation_type, direction
            ),
            paper_cooc AS (
              SELECT b.entity_id AS other_entity_id, COUNT(DISTINCT b.doc_id) AS paper_count
              FROM {paper_links} a
              JOIN {paper_links} b ON a.doc_id = b.doc_id
              WHERE a.entity_id = $1 AND b.entity_id <> $1
              GROUP BY b.entity_id
            ),
            trial_cooc AS (
              SELECT b.entity_id AS other_entity_id, COUNT(DISTINCT b.doc_id) AS trial_count
              FROM {trial_links} a
              JOIN {trial_links} b ON a.doc_id = b.doc_id
              WHERE a.entity_id = $1 AND b.entity_id <> $1
              GROUP BY b.entity_id
            ),
            patent_cooc AS (
              SELECT b.entity_id AS other_entity_id, COUNT(DISTINCT b.doc_id) AS patent_count
              FROM {patent_links} a
              JOIN {patent_links} b ON a.doc_id = b.doc_id
              WHERE a.entity_id = $1 AND b.entity_id <> $1
              GROUP BY b.entity_id
            )
            SELECT
              a.other_entity_id, a.relation_type, a.direction,
              a.evidence_count, a.pmids,
              e.entity_type AS other_type, e.mention AS other_mention,
              COALESCE(p.paper_count, 0) AS paper_count,
              COALESCE(t.trial_count, 0) AS trial_count,
              COALESCE(pa.patent_count, 0) AS patent_count,
              COALESCE(p.paper_count, 0) + COALESCE(t.trial_count, 0)
                + COALESCE(pa.patent_count, 0) AS cooccurrence_score
            FROM agg a
            LEFT JOIN {entities} e ON a.other_entity_id = e.entity_id
            LEFT JOIN paper_cooc p ON a.other_entity_id = p.other_entity_id
            LEFT JOIN trial_cooc t ON a.other_entity_id = t.other_entity_id
            LEFT JOIN patent_cooc pa ON a.other_entity_id = pa.other_entity_id
            ORDER BY cooccurrence_score DESC, evidence_count DESC
            LIMIT {max_related}
            "#,
            rels = self.config.relationship_table,
            entities = self.config.entity_table,
            paper_links = self.config.paper_link_table,
            trial_links = self.config.trial_link_table,
            patent_links = self.config.patent_link_table,
            max_evidence = self.config.max_evidence_per_edge,
            max_related = self.config.max_related_entities,
        );

        let rows = self
            .pool
            .read()
            .query_all(Statement::from_sql_and_values(
                DbBackend::Postgres,
                &sql,
                vec![entity_id.into()],
            ))
            .await?;

        let mut edges = Vec::with_capacity(rows.len());
        for row in rows {
            let pmids_joined: Option<String> = row.try_get("", "pmids")?;
            let pmids = pmids_joined
                .unwrap_or_default()
                .split(',')
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect();

            edges.push(NeighborEdge {
                other_entity_id: row.try_get("", "other_entity_id")?,
                relation_type: row.try_get("", "relation_type")?,
                direction: row.try_get("", "direction")?,
                evidence_count: row.try_get("", "evidence_count")?,
                pmids,
                other_type: row.try_get("", "other_type")?,
                other_mention: row.try_get("", "other_mention")?,
                paper_count: row.try_get("", "paper_count")?,
                trial_count: row.try_get("", "trial_count")?,
                patent_count: row.try_get("", "patent_count")?,
                cooccurrence_score: row.try_get("", "cooccurrence_score")?,
            });
        }
        Ok(edges)
    }

    async fn fetch_paper_details(&self, pmids: &[String]) -> Result<HashMap<String, PaperDetails>> {
        // The PMID column is integral; non-numeric inputs are skipped
        let int_pmids: Vec<i64> = pmids.iter().filter_map(|p| p.parse::<i64>().ok()).collect();
        if int_pmids.is_empty() {
            return Ok(HashMap::new());
        }

        let placeholders: Vec<String> = (1..=int_pmids.len()).map(|i| format!("${}", i)).collect();
        let sql = format!(
            "SELECT pmid, article_title, pub_year FROM {} WHERE pmid IN ({})",
            self.config.paper_table,
            placeholders.join(", ")
        );
        let values: Vec<sea_orm::Value> = int_pmids.iter().map(|p| (*p).into()).collect();

        let rows = self
            .pool
            .read()
            .query_all(Statement::from_sql_and_values(DbBackend::Postgres, &sql, values))
            .await?;

        let mut details = HashMap::with_capacity(rows.len());
        for row in rows {
            let pmid: i64 = row.try_get("", "pmid")?;
            let title: Option<String> = row.try_get("", "article_title")?;
            let year: Option<i64> = row.try_get("", "pub_year")?;
            details.insert(
                pmid.to_string(),
                PaperDetails {
                    title: title.unwrap_or_default(),
                    year: year.unwrap_or(0) as i32,
                },
            );
        }
        Ok(details)
    }

    async fn fetch_edge_pmids(
        &self,
        edges: &[(String, String, String)],
    ) -> Result<HashMap<String, Vec<String>>> {
        if edges.is_empty() {
            return Ok(HashMap::new());
        }

        // One disjunct per edge, matching either orientation
        let mut clauses = Vec::with_capacity(edges.len());
        let mut values: Vec<sea_orm::Value> = Vec::with_capacity(edges.len() * 3);
        for (i, (from, to, relation_type)) in edges.iter().enumerate() {
            let base = i * 3;
            clauses.push(format!(
                "(((entity_id1 = ${a} AND entity_id2 = ${b}) OR (entity_id1 = ${b} AND entity_id2 = ${a})) AND relation_type = ${c})",
                a = base + 1,
                b = base + 2,
                c = base + 3,
            ));
            values.push(from.as_str().into());
            values.push(to.as_str().into());
            values.push(relation_type.as_str().into());
        }

        let sql = format!(
            r#"
            SELECT entity_id1, entity_id2, relation_type, CAST(pmid AS TEXT) AS pmid
            FROM {rels}
            WHERE {clauses}
            ORDER BY pmid
            "#,
            rels = self.config.relationship_table,
            clauses = clauses.join(" OR "),
        );

        let rows = self
            .pool
            .read()
            .query_all(Statement::from_sql_and_values(DbBackend::Postgres, &sql, values))
            .await?;

        // Key results in the direction the caller asked for
        let mut result: HashMap<String, Vec<String>> = HashMap::new();
        for row in rows {
            let id1: String = row.try_get("", "entity_id1")?;
            let id2: String = row.try_get("", "entity_id2")?;
            let relation_type: String = row.try_get("", "relation_type")?;
            let pmid: String = row.try_get("", "pmid")?;

            for (from, to, rel) in edges {
                if *rel != relation_type {
                    continue;
                }
                let matches = (id1 == *from && id2 == *to) || (id1 == *to && id2 == *from);
                if !matches {
                    continue;
                }
                let key = format!("{}--{}--{}", from, to, rel);
                let entry = result.entry(key).or_default();
                if entry.len() < self.config.max_evidence_per_edge && !entry.contains(&pmid) {
                    entry.push(pmid.clone());
                }
            }
        }
        Ok(result)
    }
}
