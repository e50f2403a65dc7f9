//! Extractor Adapters (design §4.11): per-format text extraction, dispatched
//! by content type / file extension. Each adapter is a thin wrapper around a
//! format-specific crate; fidelity varies by format exactly as the format's
//! library allows (DOCX extraction, in particular, is best-effort).

use crate::error::{AppError, AppResult};
use crate::table::{ExtractedTable, TableRow};
use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Default)]
pub struct ExtractedContent {
    pub text: String,
    pub pages: u32,
    pub tables: Vec<ExtractedTable>,
}

pub fn extract(bytes: &[u8], filename: &str, content_type: &str) -> AppResult<ExtractedContent> {
    let ext = filename.rsplit('.').next().unwrap_or("").to_lowercase();
    match (ext.as_str(), content_type) {
        ("pdf", _) | (_, "application/pdf") => extract_pdf(bytes),
        ("csv", _) | (_, "text/csv") => extract_csv(bytes),
        ("xlsx", _) | ("xls", _) => extract_spreadsheet(bytes),
        ("yaml", _) | ("yml", _) => extract_yaml(bytes),
        ("xml", _) | (_, "application/xml") | (_, "text/xml") => extract_xml(bytes),
        ("html", _) | ("htm", _) | (_, "text/html") => extract_html(bytes),
        ("docx", _) => extract_docx(bytes),
        _ => extract_plain_text(bytes),
    }
}

fn extract_plain_text(bytes: &[u8]) -> AppResult<ExtractedContent> {
    let text = String::from_utf8_lossy(bytes).to_string();
    Ok(ExtractedContent { text, pages: 1, tables: Vec::new() })
}

fn extract_pdf(bytes: &[u8]) -> AppResult<ExtractedContent> {
    let text = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| AppError::UpstreamHard(format!("pdf extraction failed: {e}")))?;
    let pages = text.matches('\x0c').count().max(1) as u32;
    let tables = detect_text_tables(&text);
    Ok(ExtractedContent { text, pages, tables })
}

fn column_split_re() -> &'static Regex {
    static COLUMN_SPLIT: OnceLock<Regex> = OnceLock::new();
    COLUMN_SPLIT.get_or_init(|| Regex::new(r"\s{2,}").unwrap())
}

fn split_columns(line: &str) -> Vec<String> {
    column_split_re()
        .split(line.trim())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// `pdf-extract` hands back flat text with no table geometry, so this is a
/// text-layout heuristic rather than real table extraction (vision-based PDF
/// table extraction is out of scope, see DESIGN.md): a run of two or more
/// consecutive lines that each split into the same number of
/// multi-space-separated columns is read back as a table, first line as the
/// header row. Single-column or irregular text never matches.
fn detect_text_tables(text: &str) -> Vec<ExtractedTable> {
    let mut tables = Vec::new();
    for (page_idx, page) in text.split('\x0c').enumerate() {
        let lines: Vec<&str> = page.lines().collect();
        let mut i = 0;
        while i < lines.len() {
            let header_fields = split_columns(lines[i]);
            if header_fields.len() < 2 {
                i += 1;
                continue;
            }
            let mut rows = Vec::new();
            let mut j = i + 1;
            while j < lines.len() {
                let fields = split_columns(lines[j]);
                if fields.len() != header_fields.len() {
                    break;
                }
                rows.push(TableRow { row_header: fields[0].clone(), values: fields[1..].to_vec() });
                j += 1;
            }
            if rows.len() >= 2 {
                tables.push(ExtractedTable {
                    headers: header_fields[1..].to_vec(),
                    rows,
                    page_number: Some(page_idx as u32 + 1),
                });
            }
            i = j.max(i + 1);
        }
    }
    tables
}

fn extract_csv(bytes: &[u8]) -> AppResult<ExtractedContent> {
    let mut reader = csv::Reader::from_reader(bytes);
    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| AppError::Validation(format!("invalid csv headers: {e}")))?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| AppError::Validation(format!("invalid csv row: {e}")))?;
        let row_header = record.get(0).unwrap_or("").to_string();
        let values: Vec<String> = record.iter().skip(1).map(|v| v.to_string()).collect();
        rows.push(crate::table::TableRow { row_header, values });
    }

    let table = ExtractedTable {
        headers: headers.into_iter().skip(1).collect(),
        rows,
        page_number: None,
    };
    let text = table
        .rows
        .iter()
        .map(|r| format!("{}: {}", r.row_header, r.values.join(", ")))
        .collect::<Vec<_>>()
        .join("\n");
    Ok(ExtractedContent { text, pages: 1, tables: vec![table] })
}

fn extract_spreadsheet(bytes: &[u8]) -> AppResult<ExtractedContent> {
    use calamine::{Reader, Xlsx};
    let cursor = std::io::Cursor::new(bytes);
    let mut workbook: Xlsx<_> = Xlsx::new(cursor).map_err(|e| AppError::Validation(format!("invalid spreadsheet: {e}")))?;
    let mut tables = Vec::new();
    let mut text_parts = Vec::new();

    for sheet_name in workbook.sheet_names().to_owned() {
        let Ok(range) = workbook.worksheet_range(&sheet_name) else {
            continue;
        };
        let mut rows_iter = range.rows();
        let Some(header_row) = rows_iter.next() else {
            continue;
        };
        let headers: Vec<String> = header_row.iter().skip(1).map(|c| c.to_string()).collect();
        let mut rows = Vec::new();
        for row in rows_iter {
            if row.is_empty() {
                continue;
            }
            let row_header = row[0].to_string();
            let values: Vec<String> = row.iter().skip(1).map(|c| c.to_string()).collect();
            text_parts.push(format!("{row_header}: {}", values.join(", ")));
            rows.push(crate::table::TableRow { row_header, values });
        }
        tables.push(ExtractedTable { headers, rows, page_number: None });
    }

    Ok(ExtractedContent {
        text: text_parts.join("\n"),
        pages: tables.len().max(1) as u32,
        tables,
    })
}

fn extract_yaml(bytes: &[u8]) -> AppResult<ExtractedContent> {
    let value: serde_yaml::Value = serde_yaml::from_slice(bytes).map_err(|e| AppError::Validation(format!("invalid yaml: {e}")))?;
    let text = serde_yaml::to_string(&value).unwrap_or_default();
    Ok(ExtractedContent { text, pages: 1, tables: Vec::new() })
}

fn extract_xml(bytes: &[u8]) -> AppResult<ExtractedContent> {
    let text = String::from_utf8_lossy(bytes);
    let doc = roxmltree::Document::parse(&text).map_err(|e| AppError::Validation(format!("invalid xml: {e}")))?;
    let mut out = String::new();
    for node in doc.descendants().filter(|n| n.is_text()) {
        if let Some(t) = node.text() {
            let trimmed = t.trim();
            if !trimmed.is_empty() {
                out.push_str(trimmed);
                out.push('\n');
            }
        }
    }
    Ok(ExtractedContent { text: out, pages: 1, tables: Vec::new() })
}

fn extract_html(bytes: &[u8]) -> AppResult<ExtractedContent> {
    let text = String::from_utf8_lossy(bytes);
    let document = scraper::Html::parse_document(&text);
    let body_selector = scraper::Selector::parse("body").map_err(|_| AppError::Internal("invalid selector".to_string()))?;
    let body_text = document
        .select(&body_selector)
        .next()
        .map(|el| el.text().collect::<Vec<_>>().join(" "))
        .unwrap_or_default();
    let collapsed = body_text.split_whitespace().collect::<Vec<_>>().join(" ");
    Ok(ExtractedContent { text: collapsed, pages: 1, tables: Vec::new() })
}

/// DOCX extraction is best-effort: `docx-rs` exposes a low-level document
/// model rather than a flattened text view, so this walks paragraph runs and
/// accepts that complex layouts (tables, text boxes) may be dropped.
fn extract_docx(bytes: &[u8]) -> AppResult<ExtractedContent> {
    let docx = docx_rs::read_docx(bytes).map_err(|e| AppError::Validation(format!("invalid docx: {e}")))?;
    let mut out = String::new();
    for child in &docx.document.children {
        if let docx_rs::DocumentChild::Paragraph(paragraph) = child {
            for run_child in &paragraph.children {
                if let docx_rs::ParagraphChild::Run(run) = run_child {
                    for run_content in &run.children {
                        if let docx_rs::RunChild::Text(t) = run_content {
                            out.push_str(&t.text);
                        }
                    }
                }
            }
            out.push('\n');
        }
    }
    Ok(ExtractedContent { text: out, pages: 1, tables: Vec::new() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_passthrough() {
        let result = extract(b"hello world", "notes.txt", "text/plain").unwrap();
        assert_eq!(result.text, "hello world");
    }

    #[test]
    fn csv_builds_a_table() {
        let csv_bytes = b"item,2024,2025\nSalaries,100,120\nRent,-,90\n";
        let result = extract(csv_bytes, "budget.csv", "text/csv").unwrap();
        assert_eq!(result.tables.len(), 1);
        assert_eq!(result.tables[0].headers, vec!["2024", "2025"]);
        assert_eq!(result.tables[0].rows.len(), 2);
    }

    #[test]
    fn html_extracts_body_text() {
        let html = b"<html><head><script>bad()</script></head><body><p>Hello <b>world</b></p></body></html>";
        let result = extract(html, "page.html", "text/html").unwrap();
        assert!(result.text.contains("Hello"));
        assert!(result.text.contains("world"));
    }

    #[test]
    fn detects_a_table_shaped_block_of_pdf_text() {
        let text = "Budget Summary\n\nLine Item  2024  2025\nSalaries  100000  120000\nRent  -  90000\n\nThanks for reading.";
        let tables = detect_text_tables(text);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].headers, vec!["2024", "2025"]);
        assert_eq!(tables[0].rows.len(), 2);
        assert_eq!(tables[0].rows[0].row_header, "Salaries");
    }

    #[test]
    fn prose_text_yields_no_tables() {
        let text = "This is just a paragraph of ordinary prose with no columns at all.";
        assert!(detect_text_tables(text).is_empty());
    }
}
