//! Document-to-text boundary.
//!
//! An extractor turns uploaded files into page text and tables. The pipeline
//! only needs the consolidated text that [`build_financial_text`] produces,
//! which becomes the request's financial statements.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const MAX_DOCUMENT_CHARS: usize = 10_000;
const MAX_TABLE_COLUMNS: usize = 8;

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("no documents given")]
    NoDocuments,

    #[error("extraction failed: {0}")]
    Extraction(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedTable {
    pub page: usize,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedDocument {
    pub filename: String,
    pub text: String,
    pub tables: Vec<ExtractedTable>,
}

/// Per-file extraction status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceStatus {
    pub file: String,
    /// `parsed`, `no_text_layer` or `error_opening: <reason>`.
    pub status: String,
    pub pages: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionSummary {
    pub detected_documents: usize,
    pub pending_ocr: usize,
    pub notes: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedDocuments {
    pub sources: Vec<SourceStatus>,
    pub documents: Vec<ExtractedDocument>,
    /// Files without a text layer.
    pub needs_ocr: Vec<String>,
    pub summary: ExtractionSummary,
}

#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    /// Extract every file. Per-file problems are reported in `sources`.
    async fn extract(&self, paths: &[PathBuf]) -> Result<ExtractedDocuments, DocumentError>;
}

/// Extractor for plain-text exports.
///
/// Form feeds separate pages. Consecutive lines containing `|` form a table.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

#[async_trait]
impl DocumentExtractor for PlainTextExtractor {
    async fn extract(&self, paths: &[PathBuf]) -> Result<ExtractedDocuments, DocumentError> {
        if paths.is_empty() {
            return Err(DocumentError::NoDocuments);
        }

        let mut result = ExtractedDocuments::default();
        for path in paths {
            let file = path.display().to_string();
            let raw = match tokio::fs::read_to_string(path).await {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(file = %file, error = %e, "Could not read document");
                    result.sources.push(SourceStatus {
                        file,
                        status: format!("error_opening: {e}"),
                        pages: 0,
                    });
                    continue;
                }
            };

            let (document, pages) = parse_text_document(path, &raw);
            let has_text = !document.text.trim().is_empty();
            result.sources.push(SourceStatus {
                file: file.clone(),
                status: if has_text { "parsed" } else { "no_text_layer" }.to_string(),
                pages,
            });
            if has_text {
                result.documents.push(document);
            } else {
                result.needs_ocr.push(file);
            }
        }

        result.summary = ExtractionSummary {
            detected_documents: result.documents.len(),
            pending_ocr: result.needs_ocr.len(),
            notes: "Plain-text extractor; scanned documents need OCR".to_string(),
        };
        Ok(result)
    }
}

fn parse_text_document(path: &Path, raw: &str) -> (ExtractedDocument, usize) {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut text = String::new();
    let mut tables = Vec::new();
    let mut pages = 0;

    for (idx, page) in raw.split('\u{c}').enumerate() {
        pages += 1;
        let page_no = idx + 1;
        let trimmed = page.trim();
        if !trimmed.is_empty() {
            text.push_str(&format!("\n\n==== PÁGINA {page_no} ====\n{trimmed}\n"));
        }

        let mut rows: Vec<Vec<String>> = Vec::new();
        for line in page.lines() {
            if line.contains('|') {
                rows.push(
                    line.trim()
                        .trim_matches('|')
                        .split('|')
                        .map(|cell| cell.trim().to_string())
                        .collect(),
                );
            } else if !rows.is_empty() {
                tables.push(ExtractedTable {
                    page: page_no,
                    rows: std::mem::take(&mut rows),
                });
            }
        }
        if !rows.is_empty() {
            tables.push(ExtractedTable { page: page_no, rows });
        }
    }

    (
        ExtractedDocument {
            filename,
            text,
            tables,
        },
        pages,
    )
}

/// Consolidate extracted documents into model-friendly financial text.
pub fn build_financial_text(extracted: &ExtractedDocuments, max_rows_per_table: usize) -> String {
    let mut parts: Vec<String> = Vec::new();

    for document in &extracted.documents {
        parts.push(format!("\n\n===== DOCUMENTO: {} =====\n", document.filename));
        parts.push(truncate_with_ellipsis(document.text.trim(), MAX_DOCUMENT_CHARS));

        if !document.tables.is_empty() {
            parts.push("\n-- Resumen de Tablas --\n".to_string());
            for (i, table) in document.tables.iter().enumerate() {
                parts.push(format!("Tabla {} (página {}):\n", i + 1, table.page));
                parts.push(table_to_markdown(&table.rows, max_rows_per_table));
            }
        }
    }

    if !extracted.needs_ocr.is_empty() {
        parts.push(format!(
            "\n\n[Nota] {} documento(s) requieren OCR y no se incluyeron.\n",
            extracted.needs_ocr.len()
        ));
    }

    parts.join("\n").trim().to_string()
}

fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{kept}...")
}

fn table_to_markdown(rows: &[Vec<String>], max_rows: usize) -> String {
    let mut lines: Vec<String> = rows
        .iter()
        .take(max_rows)
        .map(|row| {
            row.iter()
                .take(MAX_TABLE_COLUMNS)
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(" | ")
        })
        .collect();
    if rows.len() > max_rows {
        lines.push(format!("... ({} filas adicionales)", rows.len() - max_rows));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_plain_text_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let balance = dir.path().join("balance.txt");
        std::fs::write(
            &balance,
            "Balance General 2023\nCuenta | Valor\nActivos | 100000\nPasivos | 40000\nFin\u{c}Estado de Resultados\nVentas 250000",
        )
        .unwrap();
        let scanned = dir.path().join("scan.txt");
        std::fs::write(&scanned, "   \n").unwrap();
        let missing = dir.path().join("missing.txt");

        let extracted = PlainTextExtractor
            .extract(&[balance, scanned, missing])
            .await
            .unwrap();

        assert_eq!(extracted.summary.detected_documents, 1);
        assert_eq!(extracted.summary.pending_ocr, 1);
        assert!(extracted.sources[2].status.starts_with("error_opening"));

        let doc = &extracted.documents[0];
        assert_eq!(doc.filename, "balance.txt");
        assert_eq!(extracted.sources[0].pages, 2);
        assert!(doc.text.contains("==== PÁGINA 2 ===="));
        assert_eq!(doc.tables.len(), 1);
        assert_eq!(doc.tables[0].rows[1], vec!["Activos", "100000"]);

        let text = build_financial_text(&extracted, 12);
        assert!(text.starts_with("===== DOCUMENTO: balance.txt ====="));
        assert!(text.contains("Tabla 1 (página 1):"));
        assert!(text.contains("Activos | 100000"));
        assert!(text.contains("1 documento(s) requieren OCR"));
    }

    #[tokio::test]
    async fn test_no_paths() {
        assert!(matches!(
            PlainTextExtractor.extract(&[]).await,
            Err(DocumentError::NoDocuments)
        ));
    }

    #[test]
    fn test_table_rows_are_limited() {
        let rows: Vec<Vec<String>> = (0..20).map(|i| vec![i.to_string()]).collect();
        let md = table_to_markdown(&rows, 12);
        assert!(md.ends_with("... (8 filas adicionales)"));
    }
}
