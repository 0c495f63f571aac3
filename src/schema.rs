//! Schema Catalog
//!
//! Immutable description of the queryable database, produced by an external
//! export step: tables with column metadata, foreign-key relationships, and
//! optional sample rows for small lookup tables. Loaded once at startup.

use crate::error::{InsightsError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    /// "base table" or "view", as reported by the export.
    #[serde(rename = "type", default = "default_table_type")]
    pub table_type: String,
    pub columns: Vec<ColumnInfo>,
}

fn default_table_type() -> String {
    "base table".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
}

/// Sample rows exported for small reference/lookup tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceData {
    pub total_rows: u64,
    pub sample_rows: u64,
    pub data: Vec<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaCatalog {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    pub tables: HashMap<String, TableInfo>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default)]
    pub reference_data: HashMap<String, ReferenceData>,

    /// Table names generated SQL may reference. Derived at load time.
    #[serde(skip)]
    allowed_tables: Vec<String>,
}

impl SchemaCatalog {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| InsightsError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_json(&content)
            .map_err(|e| InsightsError::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let mut catalog: SchemaCatalog = serde_json::from_str(content)?;
        catalog.allowed_tables = catalog.derive_allowed_tables();
        Ok(catalog)
    }

    /// Catalogs versioned >= 2 exclude views from the allowed set; older
    /// exports did not record table types, so everything is allowed.
    fn derive_allowed_tables(&self) -> Vec<String> {
        let exclude_views = self
            .version
            .as_deref()
            .and_then(|v| v.split('.').next())
            .and_then(|major| major.parse::<u32>().ok())
            .map(|major| major >= 2)
            .unwrap_or(false);

        let mut tables: Vec<String> = self
            .tables
            .iter()
            .filter(|(_, info)| !exclude_views || info.table_type != "view")
            .map(|(name, _)| name.clone())
            .collect();
        tables.sort();
        tables
    }

    pub fn allowed_tables(&self) -> &[String] {
        &self.allowed_tables
    }

    pub fn is_allowed_table(&self, table: &str) -> bool {
        self.allowed_tables.iter().any(|t| t == table)
    }

    pub fn table(&self, name: &str) -> Option<&TableInfo> {
        self.tables.get(name)
    }

    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.tables
            .get(table)
            .map(|t| t.columns.iter().any(|c| c.name.eq_ignore_ascii_case(column)))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_catalog() -> SchemaCatalog {
        SchemaCatalog::from_json(
            r#"{
                "version": "2.0",
                "database": "vlsm",
                "tables": {
                    "form_vl": {"type": "base table", "columns": [
                        {"name": "sample_code", "type": "varchar", "nullable": true},
                        {"name": "lab_id", "type": "int", "nullable": true}
                    ]},
                    "v_summary": {"type": "view", "columns": [
                        {"name": "total", "type": "bigint", "nullable": true}
                    ]}
                },
                "relationships": [
                    {"from_table": "form_vl", "from_column": "lab_id",
                     "to_table": "facility_details", "to_column": "facility_id"}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn views_excluded_from_allowed_set_in_v2_catalogs() {
        let catalog = sample_catalog();
        assert!(catalog.is_allowed_table("form_vl"));
        assert!(!catalog.is_allowed_table("v_summary"));
    }

    #[test]
    fn column_lookup_is_case_insensitive() {
        let catalog = sample_catalog();
        assert!(catalog.has_column("form_vl", "LAB_ID"));
        assert!(!catalog.has_column("form_vl", "missing"));
    }
}
