//! Dump header scan
//!
//! Reads lines until the first `INSERT INTO`, extracting the table name
//! from `CREATE TABLE \`name\`` and one column per backticked declaration
//! line. Key/index/constraint lines are skipped. MySQL types map onto three
//! logical column types: integral families (and `binary(1)` flags) become
//! Int64, floating/decimal families become Float64, everything else stays a
//! string.

use biograph_common::errors::{AppError, Result};
use regex_lite::Regex;
use std::io::BufRead;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalType {
    Int64,
    Float64,
    Utf8,
}

impl LogicalType {
    pub fn from_mysql(mysql_type: &str) -> Self {
        let t = mysql_type.trim().to_lowercase();
        if t.starts_with("int")
            || t.starts_with("bigint")
            || t.starts_with("smallint")
            || t.starts_with("tinyint")
            || t.starts_with("mediumint")
        {
            return LogicalType::Int64;
        }
        if t.starts_with("float")
            || t.starts_with("double")
            || t.starts_with("decimal")
            || t.starts_with("numeric")
        {
            return LogicalType::Float64;
        }
        if t.starts_with("binary") {
            // _binary '0' / '1' flags
            return LogicalType::Int64;
        }
        // varchar, char, text, longtext, enum, date, ...
        LogicalType::Utf8
    }
}

#[derive(Debug, Clone)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<String>,
    pub types: Vec<LogicalType>,
}

impl TableSchema {
    pub fn num_cols(&self) -> usize {
        self.columns.len()
    }
}

/// Scan the dump header for the table name and column declarations.
///
/// `fallback_table` names the table when the header carries no
/// CREATE TABLE (derived from the file name by the caller).
pub fn parse_header<R: BufRead>(reader: R, fallback_table: &str) -> Result<TableSchema> {
    let col_re = Regex::new(r"^\s*`(\w+)`\s+(\S+)").unwrap();
    let name_re = Regex::new(r"`(\w+)`").unwrap();

    let mut table: Option<String> = None;
    let mut columns = Vec::new();
    let mut types = Vec::new();
    let mut in_create = false;

    for line in reader.lines() {
        let line = line?;

        if line.starts_with("INSERT INTO") {
            break;
        }

        if line.starts_with("CREATE TABLE") {
            if let Some(captures) = name_re.captures(&line) {
                table = Some(captures[1].to_string());
            }
            in_create = true;
            continue;
        }

        if in_create {
            let stripped = line.trim();
            if stripped.starts_with(')') {
                in_create = false;
                continue;
            }
            if ["PRIMARY", "KEY", "UNIQUE", "INDEX", "CONSTRAINT", ")"]
                .iter()
                .any(|kw| stripped.starts_with(kw))
            {
                continue;
            }
            if let Some(captures) = col_re.captures(&line) {
                columns.push(captures[1].to_string());
                types.push(LogicalType::from_mysql(&captures[2]));
            }
        }
    }

    let table = table.unwrap_or_else(|| fallback_table.to_string());
    if columns.is_empty() {
        return Err(AppError::ParserFatal {
            table,
            message: "no columns found in dump header".to_string(),
        });
    }

    Ok(TableSchema { table, columns, types })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const HEADER: &str = r#"-- MySQL dump 10.13
DROP TABLE IF EXISTS `bio_entities`;
CREATE TABLE `bio_entities` (
  `EntityId` varchar(64) NOT NULL,
  `Type` varchar(32) DEFAULT NULL,
  `Mention` text,
  `PMID` bigint DEFAULT NULL,
  `Score` double DEFAULT NULL,
  `IsPrimary` binary(1) DEFAULT NULL,
  PRIMARY KEY (`EntityId`),
  KEY `idx_type` (`Type`)
) ENGINE=InnoDB;
INSERT INTO `bio_entities` VALUES (1);
"#;

    #[test]
    fn test_parse_header() {
        let schema = parse_header(Cursor::new(HEADER), "fallback").unwrap();
        assert_eq!(schema.table, "bio_entities");
        assert_eq!(
            schema.columns,
            vec!["EntityId", "Type", "Mention", "PMID", "Score", "IsPrimary"]
        );
        assert_eq!(
            schema.types,
            vec![
                LogicalType::Utf8,
                LogicalType::Utf8,
                LogicalType::Utf8,
                LogicalType::Int64,
                LogicalType::Float64,
                LogicalType::Int64,
            ]
        );
    }

    #[test]
    fn test_missing_columns_is_fatal() {
        let err = parse_header(Cursor::new("-- nothing here\n"), "mystery").unwrap_err();
        assert!(matches!(err, AppError::ParserFatal { ref table, .. } if table == "mystery"));
    }

    #[test]
    fn test_type_mapping() {
        assert_eq!(LogicalType::from_mysql("int(11)"), LogicalType::Int64);
        assert_eq!(LogicalType::from_mysql("tinyint(1)"), LogicalType::Int64);
        assert_eq!(LogicalType::from_mysql("decimal(10,2)"), LogicalType::Float64);
        assert_eq!(LogicalType::from_mysql("binary(1)"), LogicalType::Int64);
        assert_eq!(LogicalType::from_mysql("varchar(255)"), LogicalType::Utf8);
        assert_eq!(LogicalType::from_mysql("datetime"), LogicalType::Utf8);
    }
}
