//! Table Decomposer (design §4.2): turns an extracted table into a natural
//! language description chunk plus one cell chunk per (row, column, value).

use crate::model::{ChunkMetadata, ChunkType, ContentType};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtractedTable {
    pub headers: Vec<String>,
    pub rows: Vec<TableRow>,
    pub page_number: Option<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TableRow {
    pub row_header: String,
    pub values: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtractionMethod {
    Vision,
    Text,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TableStats {
    pub tables_processed: u32,
    pub descriptions_generated: u32,
    pub row_chunks_created: u32,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub extraction_method: Option<String>,
    pub cost_estimate: f64,
}

const PLACEHOLDER_VALUES: &[&str] = &["-", "—", "n/a", "na", ""];

fn is_placeholder(value: &str) -> bool {
    PLACEHOLDER_VALUES.contains(&value.trim().to_lowercase().as_str())
}

/// Builds the description chunk plus one cell chunk per non-empty cell.
/// Cell chunks read `"{doc}: {row_header} for {col_header} was {value}"`.
pub fn decompose_table(
    table: &ExtractedTable,
    doc_label: &str,
    method: ExtractionMethod,
) -> (Vec<String>, TableStats) {
    let mut cell_chunks = Vec::new();

    for row in &table.rows {
        for (col_idx, value) in row.values.iter().enumerate() {
            if is_placeholder(value) {
                continue;
            }
            let Some(col_header) = table.headers.get(col_idx) else {
                continue;
            };
            cell_chunks.push(format!(
                "{doc_label}: {row_header} for {col_header} was {value}",
                row_header = row.row_header,
                col_header = col_header,
                value = value.trim(),
            ));
        }
    }

    let description = build_description(table, doc_label);
    let mut chunks = vec![description];
    chunks.extend(cell_chunks.iter().cloned());

    let stats = TableStats {
        tables_processed: 1,
        descriptions_generated: 1,
        row_chunks_created: cell_chunks.len() as u32,
        tokens_in: 0,
        tokens_out: 0,
        extraction_method: Some(
            match method {
                ExtractionMethod::Vision => "vision",
                ExtractionMethod::Text => "text",
            }
            .to_string(),
        ),
        cost_estimate: 0.0,
    };

    (chunks, stats)
}

fn build_description(table: &ExtractedTable, doc_label: &str) -> String {
    let row_names: Vec<&str> = table.rows.iter().map(|r| r.row_header.as_str()).collect();
    format!(
        "{doc_label}: a table with columns [{}] and rows [{}]",
        table.headers.join(", "),
        row_names.join(", ")
    )
}

pub fn table_chunk_metadata(content: &str) -> (ChunkType, ContentType, ChunkMetadata) {
    let metadata = ChunkMetadata {
        char_count: content.chars().count(),
        word_count: content.split_whitespace().count(),
        has_table: true,
        original_chunk_type: "table".to_string(),
        ..Default::default()
    };
    (ChunkType::Table, ContentType::Tabular, metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> ExtractedTable {
        ExtractedTable {
            headers: vec!["2024-25".to_string(), "2025-26".to_string()],
            rows: vec![
                TableRow {
                    row_header: "Salaries".to_string(),
                    values: vec!["100000".to_string(), "120000".to_string()],
                },
                TableRow {
                    row_header: "Rent".to_string(),
                    values: vec!["-".to_string(), "N/A".to_string()],
                },
            ],
            page_number: Some(5),
        }
    }

    #[test]
    fn skips_placeholder_cells() {
        let (chunks, stats) = decompose_table(&sample_table(), "Budget Estimate", ExtractionMethod::Text);
        assert_eq!(stats.row_chunks_created, 2);
        assert!(chunks.iter().any(|c| c.contains("Salaries for 2025-26 was 120000")));
        assert!(!chunks.iter().any(|c| c.contains("Rent for 2024-25")));
    }

    #[test]
    fn description_chunk_lists_headers_and_rows() {
        let (chunks, _) = decompose_table(&sample_table(), "Budget Estimate", ExtractionMethod::Text);
        assert!(chunks[0].contains("Salaries"));
        assert!(chunks[0].contains("2025-26"));
    }
}
