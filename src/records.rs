//! Live record store access.
//!
//! Context entries and task records are mutable rows queried directly for
//! freshness; the indexer also scans them, fingerprinting a canonical
//! rendering of their meaningful fields so timestamp-only touches do not
//! trigger reindexing.

use anyhow::Result;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};

use crate::models::{ContextEntry, SourceType, SourceUnit, TaskRecord};

/// Context entries modified after `marker`, newest first, capped.
pub async fn context_entries_since(
    pool: &SqlitePool,
    marker: i64,
    limit: usize,
) -> Result<Vec<ContextEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT id, title, body, tags, updated_at
        FROM context_entries
        WHERE updated_at > ?
        ORDER BY updated_at DESC
        LIMIT ?
        "#,
    )
    .bind(marker)
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(context_from_row).collect())
}

/// Tasks whose title or description contains any of `terms` (substring,
/// case-insensitive), newest first. Terms shorter than 3 characters are
/// expected to be filtered out by the caller.
pub async fn tasks_matching(
    pool: &SqlitePool,
    terms: &[String],
    limit: usize,
) -> Result<Vec<TaskRecord>> {
    let mut found: Vec<TaskRecord> = Vec::new();

    for term in terms {
        let pattern = format!("%{}%", term.to_lowercase());
        let rows = sqlx::query(
            r#"
            SELECT id, title, description, status, priority, parent_id, updated_at
            FROM tasks
            WHERE lower(title) LIKE ? OR lower(description) LIKE ?
            ORDER BY updated_at DESC
            LIMIT ?
            "#,
        )
        .bind(&pattern)
        .bind(&pattern)
        .bind(limit as i64)
        .fetch_all(pool)
        .await?;

        for row in &rows {
            let task = task_from_row(row);
            if !found.iter().any(|t| t.id == task.id) {
                found.push(task);
            }
        }
    }

    found.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    found.truncate(limit);
    Ok(found)
}

/// Enumerate context rows modified after the watermark as source units.
pub async fn scan_context_units(pool: &SqlitePool, watermark: i64) -> Result<Vec<SourceUnit>> {
    let rows = sqlx::query(
        "SELECT id, title, body, tags, updated_at FROM context_entries WHERE updated_at > ? ORDER BY updated_at",
    )
    .bind(watermark)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let entry = context_from_row(row);
            let canonical = canonical_context(&entry);
            SourceUnit {
                source_type: SourceType::Context,
                source_ref: entry.id,
                fingerprint: hash_text(&canonical),
                marker: entry.updated_at,
                body: canonical,
            }
        })
        .collect())
}

/// Enumerate task rows modified after the watermark as source units.
pub async fn scan_task_units(pool: &SqlitePool, watermark: i64) -> Result<Vec<SourceUnit>> {
    let rows = sqlx::query(
        "SELECT id, title, description, status, priority, parent_id, updated_at FROM tasks WHERE updated_at > ? ORDER BY updated_at",
    )
    .bind(watermark)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let task = task_from_row(row);
            let canonical = canonical_task(&task);
            SourceUnit {
                source_type: SourceType::Task,
                source_ref: task.id,
                fingerprint: hash_text(&canonical),
                marker: task.updated_at,
                body: canonical,
            }
        })
        .collect())
}

/// Canonical rendering of a context entry's meaningful fields.
/// `updated_at` is deliberately excluded.
pub fn canonical_context(entry: &ContextEntry) -> String {
    format!(
        "context\ntitle: {}\ntags: {}\n\n{}",
        entry.title, entry.tags, entry.body
    )
}

/// Canonical rendering of a task's meaningful fields.
/// `updated_at` is deliberately excluded.
pub fn canonical_task(task: &TaskRecord) -> String {
    format!(
        "task\ntitle: {}\nstatus: {}\npriority: {}\nparent: {}\n\n{}",
        task.title,
        task.status,
        task.priority,
        task.parent_id.as_deref().unwrap_or("-"),
        task.description
    )
}

fn context_from_row(row: &sqlx::sqlite::SqliteRow) -> ContextEntry {
    ContextEntry {
        id: row.get("id"),
        title: row.get("title"),
        body: row.get("body"),
        tags: row.get("tags"),
        updated_at: row.get("updated_at"),
    }
}

fn task_from_row(row: &sqlx::sqlite::SqliteRow) -> TaskRecord {
    TaskRecord {
        id: row.get("id"),
        title: row.get("title"),
        description: row.get("description"),
        status: row.get("status"),
        priority: row.get("priority"),
        parent_id: row.get("parent_id"),
        updated_at: row.get("updated_at"),
    }
}

pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
