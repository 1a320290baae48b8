// src/tables/mod.rs
use serde::Deserialize;
use std::path::Path;

/// Cell strings of one table row, in column order.
pub type Row = Vec<String>;
/// Rows of one table, in page order.
pub type Table = Vec<Row>;

/// Source of page tables for a document (the external table-extraction service).
/// Failures surface as an empty table list; the caller decides what an empty document means.
pub trait TableSource {
    fn extract_tables(&self, document: &Path) -> Vec<Table>;
}

/// Accepted shapes of a table dump written by the extraction service.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TableDump {
    Bare(Vec<Table>),
    Wrapped { tables: Vec<Table> },
}

/// Reads tables that an external extractor has already written as JSON,
/// either `[[["cell", ...], ...], ...]` or `{"tables": [...]}`.
pub struct JsonTableSource;

impl JsonTableSource {
    pub fn new() -> Self {
        Self {}
    }

    pub fn parse(raw: &str) -> Result<Vec<Table>, serde_json::Error> {
        let dump: TableDump = serde_json::from_str(raw)?;
        Ok(match dump {
            TableDump::Bare(tables) => tables,
            TableDump::Wrapped { tables } => tables,
        })
    }
}

impl TableSource for JsonTableSource {
    fn extract_tables(&self, document: &Path) -> Vec<Table> {
        let raw = match std::fs::read_to_string(document) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!("Failed to read table dump {}: {}", document.display(), e);
                return Vec::new();
            }
        };

        match Self::parse(&raw) {
            Ok(tables) => {
                tracing::debug!("Read {} tables from {}", tables.len(), document.display());
                tables
            }
            Err(e) => {
                tracing::error!("Failed to parse table dump {}: {}", document.display(), e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_and_wrapped_dumps() {
        let bare = JsonTableSource::parse(r#"[[["a", "b"], ["c"]], []]"#).unwrap();
        assert_eq!(bare.len(), 2);
        assert_eq!(bare[0][1], vec!["c".to_string()]);

        let wrapped = JsonTableSource::parse(r#"{"tables": [[["Timeline:", "Q3"]]]}"#).unwrap();
        assert_eq!(wrapped[0][0][0], "Timeline:");
    }

    #[test]
    fn unreadable_dump_yields_no_tables() {
        let source = JsonTableSource::new();
        let tables = source.extract_tables(Path::new("/nonexistent/report_tables.json"));
        assert!(tables.is_empty());
        assert!(JsonTableSource::parse("not json").is_err());
    }
}
