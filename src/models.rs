//! Core data types flowing through the indexing and retrieval pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The four kinds of indexable source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Prose documentation files.
    Doc,
    /// Source code files.
    Code,
    /// Freeform project-context entries (live records).
    Context,
    /// Work-item / task records (live records).
    Task,
}

impl SourceType {
    pub const ALL: [SourceType; 4] = [
        SourceType::Doc,
        SourceType::Code,
        SourceType::Context,
        SourceType::Task,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Doc => "doc",
            SourceType::Code => "code",
            SourceType::Context => "context",
            SourceType::Task => "task",
        }
    }

    pub fn parse(s: &str) -> Option<SourceType> {
        match s {
            "doc" => Some(SourceType::Doc),
            "code" => Some(SourceType::Code),
            "context" => Some(SourceType::Context),
            "task" => Some(SourceType::Task),
            _ => None,
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A discoverable unit of content, rebuilt fresh on every cycle.
/// Only its fingerprint is ever persisted.
#[derive(Debug, Clone)]
pub struct SourceUnit {
    pub source_type: SourceType,
    /// Relative path for files, row id for records.
    pub source_ref: String,
    pub body: String,
    /// SHA-256 over raw bytes (files) or a canonical field rendering (records).
    pub fingerprint: String,
    /// Modification marker: mtime or `updated_at`, seconds since epoch.
    pub marker: i64,
}

/// A code entity detected inside a source file, attached to chunk metadata.
/// Recomputed on every reindex, never persisted independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeEntity {
    /// `function`, `class`, `method`, or `component`.
    pub kind: String,
    pub name: String,
    /// 1-indexed.
    pub start_line: usize,
    pub end_line: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

/// Structural metadata carried alongside a chunk's text, stored as JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkMeta {
    /// Which chunker produced this chunk: `fixed`, `prose`, `code`, `summary`.
    pub strategy: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<CodeEntity>,
}

/// An indexed chunk as persisted by the store.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub source_type: SourceType,
    pub source_ref: String,
    pub chunk_index: i64,
    pub text: String,
    pub meta: ChunkMeta,
    pub indexed_at: i64,
}

/// A ranked hit from nearest-neighbor search, ascending by distance.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk_id: String,
    pub source_type: SourceType,
    pub source_ref: String,
    pub text: String,
    pub meta: ChunkMeta,
    /// `1 - cosine similarity`; smaller is closer.
    pub distance: f64,
}

/// A live freeform project-context row.
#[derive(Debug, Clone)]
pub struct ContextEntry {
    pub id: String,
    pub title: String,
    pub body: String,
    pub tags: String,
    pub updated_at: i64,
}

/// A live work-item row.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: String,
    pub priority: i64,
    pub parent_id: Option<String>,
    pub updated_at: i64,
}
