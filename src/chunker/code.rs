//! Entity-aware chunker for source code.
//!
//! Prefers to open a new chunk at entity boundaries, keeps brace-delimited
//! blocks intact by tracking nesting depth, and emits one synthetic
//! file-summary chunk per file for file-level retrieval.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

use crate::models::{ChunkMeta, CodeEntity};

use super::entities::{EntityExtractor, Language};
use super::ChunkPiece;

/// Chunk a code file.
///
/// Boundary rules, in order of precedence per line:
/// 1. a line starting a known entity closes the current chunk once it holds
///    `min_size` bytes;
/// 2. reaching `target_size` closes the chunk, but for brace-delimited
///    languages only at nesting depth zero;
/// 3. `max_size` closes the chunk unconditionally.
pub fn chunk_code(
    source_ref: &str,
    text: &str,
    target_size: usize,
    min_size: usize,
    max_size: usize,
    extractor: &EntityExtractor,
) -> Vec<ChunkPiece> {
    let ext = source_ref.rsplit('.').next().unwrap_or("");
    let language = Language::from_extension(ext);
    let entities = extractor.extract(language, text);
    let entity_starts: BTreeSet<usize> = entities.iter().map(|e| e.start_line).collect();
    let track_depth = language.brace_delimited();

    let mut pieces: Vec<ChunkPiece> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0usize;
    let mut start_line = 1usize;
    let mut depth = 0i64;

    let mut flush =
        |current: &mut Vec<&str>, current_len: &mut usize, start_line: &mut usize, end: usize| {
            let body = current.join("\n");
            if !body.trim().is_empty() {
                pieces.push(ChunkPiece {
                    text: body,
                    meta: ChunkMeta {
                        strategy: "code".to_string(),
                        start_line: Some(*start_line),
                        end_line: Some(end),
                        language: Some(language.as_str().to_string()),
                        entities: entities
                            .iter()
                            .filter(|e| e.start_line >= *start_line && e.start_line <= end)
                            .cloned()
                            .collect(),
                        ..ChunkMeta::default()
                    },
                });
            }
            current.clear();
            *current_len = 0;
            *start_line = end + 1;
        };

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;

        if entity_starts.contains(&line_no) && current_len >= min_size {
            flush(&mut current, &mut current_len, &mut start_line, line_no - 1);
        }

        current.push(line);
        current_len += line.len() + 1;
        if track_depth {
            for ch in line.chars() {
                match ch {
                    '{' => depth += 1,
                    '}' => depth -= 1,
                    _ => {}
                }
            }
        }

        if current_len >= max_size
            || (current_len >= target_size && (!track_depth || depth == 0))
        {
            flush(&mut current, &mut current_len, &mut start_line, line_no);
        }
    }

    let total_lines = text.lines().count();
    flush(&mut current, &mut current_len, &mut start_line, total_lines);

    if !text.trim().is_empty() {
        pieces.push(summary_piece(source_ref, text, language, &entities));
    }

    pieces
}

/// One synthetic chunk describing the whole file: language, imports, and the
/// entities it defines. Retrieval can then answer file-level questions
/// without stitching body chunks together.
fn summary_piece(
    source_ref: &str,
    text: &str,
    language: Language,
    entities: &[CodeEntity],
) -> ChunkPiece {
    static IMPORT_RE: OnceLock<Regex> = OnceLock::new();
    let import_re = IMPORT_RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*(?:use|import|from|#include|require)\b.*$")
            .expect("static pattern compiles")
    });

    let imports: Vec<&str> = import_re
        .find_iter(text)
        .take(20)
        .map(|m| m.as_str().trim())
        .collect();

    let mut summary = format!("File summary: {source_ref}\nLanguage: {}\n", language.as_str());
    if !imports.is_empty() {
        summary.push_str("Imports:\n");
        for import in &imports {
            summary.push_str("  ");
            summary.push_str(import);
            summary.push('\n');
        }
    }
    summary.push_str(&format!("Entities ({}):\n", entities.len()));
    for entity in entities {
        match &entity.parent {
            Some(parent) => summary.push_str(&format!(
                "  {} ({}, in {})\n",
                entity.name, entity.kind, parent
            )),
            None => summary.push_str(&format!("  {} ({})\n", entity.name, entity.kind)),
        }
    }

    ChunkPiece {
        text: summary,
        meta: ChunkMeta {
            strategy: "summary".to_string(),
            language: Some(language.as_str().to_string()),
            entities: entities.to_vec(),
            ..ChunkMeta::default()
        },
    }
}
