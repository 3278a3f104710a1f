//! Scholarly-contribution enrichment
//!
//! The warehouse carries a table of curated scholarly contributions (paper
//! title, DOI, results, methodology) tagged with PKG-style entity ids such
//! as `NCBIGene672` or `meshD002945`. For edge selections the overview
//! prompt is enriched with contributions that mention both endpoints, and
//! their DOIs join the citation list. Never fatal: failures produce an
//! empty context block.

use async_trait::async_trait;
use biograph_common::db::DbPool;
use biograph_common::errors::Result;
use regex_lite::Regex;
use sea_orm::{ConnectionTrait, DbBackend, Statement};

const MAX_CONTRIBUTIONS: usize = 5;

#[derive(Debug, Clone)]
pub struct Contribution {
    pub paper_title: String,
    pub doi: Option<String>,
    pub result_text: Option<String>,
    pub methodology: Option<String>,
}

/// Candidate PKG-style ids for a source entity id.
///
/// The contributions table stores entity references in collapsed PKG form
/// (`NCBIGene672`, `meshD002738`) inside a pipe-separated column, while the
/// graph uses colon-prefixed ids, so all plausible variants are produced.
pub fn pkg_id_variants(entity_id: &str, entity_type: Option<&str>) -> Vec<String> {
    let mut candidates = vec![entity_id.to_string()];

    let already_pkg = ["NCBIGene", "mesh", "CHEBI", "CHEMBL", "MONDO", "UniProt"]
        .iter()
        .any(|prefix| entity_id.to_lowercase().starts_with(&prefix.to_lowercase()));
    if already_pkg && !entity_id.contains(':') {
        return candidates;
    }

    // Collapse colon-separated prefixes: MESH:D002738 -> meshD002738
    if let Some((prefix, suffix)) = entity_id.split_once(':') {
        let collapsed = format!("{}{}", prefix.to_lowercase(), suffix);
        let collapsed = if let Some(rest) = collapsed.strip_prefix("mesh") {
            format!("mesh{}", rest)
        } else {
            collapsed
        };
        candidates.push(collapsed);
    }

    // Numeric-only ids: add type-based prefixes
    if entity_id.chars().all(|c| c.is_ascii_digit()) {
        let prefixes: &[&str] = match entity_type.map(str::to_lowercase).as_deref() {
            Some("gene") => &["NCBIGene"],
            Some("disease") => &["meshD", "MONDO"],
            Some("drug") => &["meshD", "CHEBI", "CHEMBL"],
            Some("pathway") => &["meshD"],
            Some("protein") => &["UniProt", "NCBIGene"],
            _ => &[],
        };
        for prefix in prefixes {
            candidates.push(format!("{}{}", prefix, entity_id));
        }
    }

    candidates
}

/// Store surface for scholarly contributions
#[async_trait]
pub trait ContributionStore: Send + Sync {
    /// Contributions whose entity list matches a variant of BOTH entities
    async fn find_contributions(
        &self,
        a_variants: &[String],
        b_variants: &[String],
        limit: usize,
    ) -> Result<Vec<Contribution>>;
}

pub struct SqlContributionStore {
    pool: DbPool,
    table: String,
}

impl SqlContributionStore {
    pub fn new(pool: DbPool, table: impl Into<String>) -> Self {
        Self { pool, table: table.into() }
    }
}

#[async_trait]
impl ContributionStore for SqlContributionStore {
    async fn find_contributions(
        &self,
        a_variants: &[String],
        b_variants: &[String],
        limit: usize,
    ) -> Result<Vec<Contribution>> {
        if a_variants.is_empty() || b_variants.is_empty() {
            return Ok(Vec::new());
        }

        // One LIKE disjunct per variant; entity_ids is pipe-separated
        let mut values: Vec<sea_orm::Value> = Vec::new();
        let mut a_clauses = Vec::new();
        for v in a_variants {
            values.push(format!("%{}%", v).into());
            a_clauses.push(format!("entity_ids LIKE ${}", values.len()));
        }
        let mut b_clauses = Vec::new();
        for v in b_variants {
            values.push(format!("%{}%", v).into());
            b_clauses.push(format!("entity_ids LIKE ${}", values.len()));
        }

        let sql = format!(
            r#"
            SELECT paper_title, doi, result_text, methodology
            FROM {table}
            WHERE ({a}) AND ({b})
            LIMIT {limit}
            "#,
            table = self.table,
            a = a_clauses.join(" OR "),
            b = b_clauses.join(" OR "),
            limit = limit,
        );

        let rows = self
            .pool
            .read()
            .query_all(Statement::from_sql_and_values(DbBackend::Postgres, &sql, values))
            .await?;

        let mut contributions = Vec::with_capacity(rows.len());
        for row in rows {
            contributions.push(Contribution {
                paper_title: row.try_get("", "paper_title")?,
                doi: row.try_get("", "doi")?,
                result_text: row.try_get("", "result_text")?,
                methodology: row.try_get("", "methodology")?,
            });
        }
        Ok(contributions)
    }
}

pub struct ScholarlyContext {
    store: std::sync::Arc<dyn ContributionStore>,
}

impl ScholarlyContext {
    pub fn new(store: std::sync::Arc<dyn ContributionStore>) -> Self {
        Self { store }
    }

    /// Prompt-ready context block for an entity pair; empty string when
    /// nothing matches or the lookup fails.
    pub async fn context_for_pair(
        &self,
        entity_a_id: &str,
        entity_b_id: &str,
        entity_a_type: Option<&str>,
        entity_b_type: Option<&str>,
    ) -> String {
        let a_variants = pkg_id_variants(entity_a_id, entity_a_type);
        let b_variants = pkg_id_variants(entity_b_id, entity_b_type);

        let contributions = match self
            .store
            .find_contributions(&a_variants, &b_variants, MAX_CONTRIBUTIONS)
            .await
        {
            Ok(contributions) => contributions,
            Err(e) => {
                tracing::warn!(error = %e, "Scholarly contribution lookup failed, continuing without");
                return String::new();
            }
        };

        format_contributions(&contributions)
    }
}

/// Render contributions as prompt lines with inline DOI markers.
pub fn format_contributions(contributions: &[Contribution]) -> String {
    let mut lines = Vec::new();
    for c in contributions {
        let mut line = format!("- {}", c.paper_title);
        if let Some(doi) = &c.doi {
            line.push_str(&format!(" | DOI: {}", doi));
        }
        if let Some(result) = c.result_text.as_deref().filter(|s| !s.is_empty()) {
            line.push_str(&format!(" | result: {}", &result[..result.len().min(240)]));
        }
        if let Some(method) = c.methodology.as_deref().filter(|s| !s.is_empty()) {
            line.push_str(&format!(" | method: {}", &method[..method.len().min(160)]));
        }
        lines.push(line);
    }
    lines.join("\n")
}

/// Extract `DOI: 10.x/...` markers from a contribution context block.
pub fn extract_dois(text: &str) -> Vec<String> {
    let re = Regex::new(r"DOI:\s*(10\.\S+)").unwrap();
    re.captures_iter(text)
        .map(|c| c[1].trim_end_matches('|').trim().to_string())
        .collect()
}
