//! Index persistence: chunks, embedding vectors, fingerprints, watermarks.
//!
//! Vectors are stored as little-endian f32 blobs and scored in Rust; SQLite
//! supplies the filtered scan, not the distance math. Replacing a source is
//! one transaction (delete chunks and vectors, insert, upsert fingerprint)
//! so retrieval never observes a half-replaced source.

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use uuid::Uuid;

use crate::models::{Chunk, ChunkMeta, SearchHit, SourceType};

pub fn vec_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// All stored fingerprints keyed by `(source_type, source_ref)`.
pub async fn load_fingerprints(
    pool: &SqlitePool,
) -> Result<HashMap<(SourceType, String), String>> {
    let rows = sqlx::query("SELECT source_type, source_ref, hash FROM fingerprints")
        .fetch_all(pool)
        .await?;

    let mut map = HashMap::new();
    for row in rows {
        let type_str: String = row.get("source_type");
        let Some(source_type) = SourceType::parse(&type_str) else {
            continue;
        };
        map.insert(
            (source_type, row.get::<String, _>("source_ref")),
            row.get::<String, _>("hash"),
        );
    }
    Ok(map)
}

/// Last-synced marker for a source type; 0 when never synced.
pub async fn get_watermark(pool: &SqlitePool, source_type: SourceType) -> Result<i64> {
    let row = sqlx::query("SELECT marker FROM watermarks WHERE source_type = ?")
        .bind(source_type.as_str())
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| r.get("marker")).unwrap_or(0))
}

/// Advance a source type's watermark, never backwards.
pub async fn advance_watermark(
    pool: &SqlitePool,
    source_type: SourceType,
    marker: i64,
) -> Result<()> {
    let current = get_watermark(pool, source_type).await?;
    if marker <= current {
        return Ok(());
    }
    sqlx::query(
        r#"
        INSERT INTO watermarks (source_type, marker, updated_at)
        VALUES (?, ?, ?)
        ON CONFLICT(source_type) DO UPDATE SET marker = excluded.marker,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(source_type.as_str())
    .bind(marker)
    .bind(chrono::Utc::now().timestamp())
    .execute(pool)
    .await?;
    Ok(())
}

/// A chunk ready to commit, paired with its embedding if its batch succeeded.
pub struct PendingChunk {
    pub text: String,
    pub meta: ChunkMeta,
    pub embedding: Option<Vec<f32>>,
}

/// Replace everything indexed for one source in a single transaction:
/// delete old chunks and vectors, insert the new set, record the fingerprint.
pub async fn replace_source(
    pool: &SqlitePool,
    source_type: SourceType,
    source_ref: &str,
    fingerprint: &str,
    chunks: &[PendingChunk],
) -> Result<()> {
    let mut tx = pool.begin().await?;
    let now = chrono::Utc::now().timestamp();

    sqlx::query(
        r#"
        DELETE FROM chunk_vectors WHERE chunk_id IN (
            SELECT id FROM chunks WHERE source_type = ? AND source_ref = ?
        )
        "#,
    )
    .bind(source_type.as_str())
    .bind(source_ref)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM chunks WHERE source_type = ? AND source_ref = ?")
        .bind(source_type.as_str())
        .bind(source_ref)
        .execute(&mut *tx)
        .await?;

    for (index, pending) in chunks.iter().enumerate() {
        let id = Uuid::new_v4().to_string();
        let metadata_json = serde_json::to_string(&pending.meta)
            .with_context(|| format!("serializing chunk metadata for {source_ref}"))?;

        sqlx::query(
            r#"
            INSERT INTO chunks (id, source_type, source_ref, chunk_index, text, metadata_json, indexed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(source_type.as_str())
        .bind(source_ref)
        .bind(index as i64)
        .bind(&pending.text)
        .bind(&metadata_json)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if let Some(vector) = &pending.embedding {
            sqlx::query(
                "INSERT INTO chunk_vectors (chunk_id, source_type, embedding) VALUES (?, ?, ?)",
            )
            .bind(&id)
            .bind(source_type.as_str())
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }
    }

    sqlx::query(
        r#"
        INSERT INTO fingerprints (source_type, source_ref, hash)
        VALUES (?, ?, ?)
        ON CONFLICT(source_type, source_ref) DO UPDATE SET hash = excluded.hash
        "#,
    )
    .bind(source_type.as_str())
    .bind(source_ref)
    .bind(fingerprint)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Nearest-neighbor search over stored vectors, ascending by distance
/// (`1 - cosine similarity`). Chunks without a vector never appear.
pub async fn knn_search(
    pool: &SqlitePool,
    query: &[f32],
    k: usize,
    filter: Option<SourceType>,
) -> Result<Vec<SearchHit>> {
    let rows = match filter {
        Some(source_type) => {
            sqlx::query(
                r#"
                SELECT v.chunk_id, v.embedding, c.source_type, c.source_ref, c.text, c.metadata_json
                FROM chunk_vectors v
                JOIN chunks c ON c.id = v.chunk_id
                WHERE v.source_type = ?
                "#,
            )
            .bind(source_type.as_str())
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(
                r#"
                SELECT v.chunk_id, v.embedding, c.source_type, c.source_ref, c.text, c.metadata_json
                FROM chunk_vectors v
                JOIN chunks c ON c.id = v.chunk_id
                "#,
            )
            .fetch_all(pool)
            .await?
        }
    };

    let mut hits: Vec<SearchHit> = Vec::with_capacity(rows.len());
    for row in rows {
        let blob: Vec<u8> = row.get("embedding");
        let vector = blob_to_vec(&blob);
        let distance = 1.0 - cosine_similarity(query, &vector);

        let type_str: String = row.get("source_type");
        let Some(source_type) = SourceType::parse(&type_str) else {
            continue;
        };
        let metadata_json: String = row.get("metadata_json");
        let meta: ChunkMeta = serde_json::from_str(&metadata_json).unwrap_or_default();

        hits.push(SearchHit {
            chunk_id: row.get("chunk_id"),
            source_type,
            source_ref: row.get("source_ref"),
            text: row.get("text"),
            meta,
            distance,
        });
    }

    hits.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(k);
    Ok(hits)
}

/// Chunks currently indexed for one source, in chunk order.
pub async fn chunks_for_source(
    pool: &SqlitePool,
    source_type: SourceType,
    source_ref: &str,
) -> Result<Vec<Chunk>> {
    let rows = sqlx::query(
        r#"
        SELECT id, source_type, source_ref, chunk_index, text, metadata_json, indexed_at
        FROM chunks
        WHERE source_type = ? AND source_ref = ?
        ORDER BY chunk_index
        "#,
    )
    .bind(source_type.as_str())
    .bind(source_ref)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .filter_map(|row| {
            let type_str: String = row.get("source_type");
            let source_type = SourceType::parse(&type_str)?;
            let metadata_json: String = row.get("metadata_json");
            Some(Chunk {
                id: row.get("id"),
                source_type,
                source_ref: row.get("source_ref"),
                chunk_index: row.get("chunk_index"),
                text: row.get("text"),
                meta: serde_json::from_str(&metadata_json).unwrap_or_default(),
                indexed_at: row.get("indexed_at"),
            })
        })
        .collect())
}

/// Per-source-type chunk counts for the status report.
pub async fn chunk_counts(pool: &SqlitePool) -> Result<Vec<(String, i64)>> {
    let rows =
        sqlx::query("SELECT source_type, COUNT(*) AS n FROM chunks GROUP BY source_type ORDER BY source_type")
            .fetch_all(pool)
            .await?;
    Ok(rows
        .iter()
        .map(|row| (row.get("source_type"), row.get("n")))
        .collect())
}

pub async fn vector_count(pool: &SqlitePool) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM chunk_vectors")
        .fetch_one(pool)
        .await?;
    Ok(row.get("n"))
}

pub async fn all_watermarks(pool: &SqlitePool) -> Result<Vec<(String, i64)>> {
    let rows = sqlx::query("SELECT source_type, marker FROM watermarks ORDER BY source_type")
        .fetch_all(pool)
        .await?;
    Ok(rows
        .iter()
        .map(|row| (row.get("source_type"), row.get("marker")))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};

    async fn test_pool() -> (tempfile::TempDir, SqlitePool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::connect(&dir.path().join("test.sqlite")).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        (dir, pool)
    }

    fn pending(text: &str, embedding: Option<Vec<f32>>) -> PendingChunk {
        PendingChunk {
            text: text.to_string(),
            meta: ChunkMeta {
                strategy: "fixed".to_string(),
                ..ChunkMeta::default()
            },
            embedding,
        }
    }

    #[test]
    fn blob_roundtrip_preserves_vector() {
        let vector = vec![0.25f32, -1.5, 3.0, 0.0];
        assert_eq!(blob_to_vec(&vec_to_blob(&vector)), vector);
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![0.3f32, 0.4, 0.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
        assert_eq!(cosine_similarity(&v, &[]), 0.0);
    }

    #[tokio::test]
    async fn replace_source_supersedes_previous_chunks() {
        let (_dir, pool) = test_pool().await;

        replace_source(
            &pool,
            SourceType::Doc,
            "notes.md",
            "hash-v1",
            &[pending("old text", Some(vec![1.0, 0.0]))],
        )
        .await
        .unwrap();

        replace_source(
            &pool,
            SourceType::Doc,
            "notes.md",
            "hash-v2",
            &[
                pending("new text a", Some(vec![0.0, 1.0])),
                pending("new text b", None),
            ],
        )
        .await
        .unwrap();

        let chunks = chunks_for_source(&pool, SourceType::Doc, "notes.md")
            .await
            .unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "new text a");
        // Only the embedded chunk has a vector row.
        assert_eq!(vector_count(&pool).await.unwrap(), 1);

        let prints = load_fingerprints(&pool).await.unwrap();
        assert_eq!(
            prints[&(SourceType::Doc, "notes.md".to_string())],
            "hash-v2"
        );
    }

    #[tokio::test]
    async fn knn_orders_by_distance_and_respects_filter() {
        let (_dir, pool) = test_pool().await;

        replace_source(
            &pool,
            SourceType::Code,
            "a.rs",
            "h1",
            &[pending("close", Some(vec![1.0, 0.0]))],
        )
        .await
        .unwrap();
        replace_source(
            &pool,
            SourceType::Doc,
            "b.md",
            "h2",
            &[pending("far", Some(vec![0.0, 1.0]))],
        )
        .await
        .unwrap();

        let hits = knn_search(&pool, &[1.0, 0.0], 10, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "close");
        assert!(hits[0].distance < hits[1].distance);

        let doc_only = knn_search(&pool, &[1.0, 0.0], 10, Some(SourceType::Doc))
            .await
            .unwrap();
        assert_eq!(doc_only.len(), 1);
        assert_eq!(doc_only[0].source_ref, "b.md");
    }

    #[tokio::test]
    async fn unembedded_chunks_never_surface_in_search() {
        let (_dir, pool) = test_pool().await;

        replace_source(
            &pool,
            SourceType::Doc,
            "gap.md",
            "h1",
            &[pending("vectorless", None)],
        )
        .await
        .unwrap();

        let hits = knn_search(&pool, &[1.0, 0.0], 10, None).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn watermark_never_moves_backwards() {
        let (_dir, pool) = test_pool().await;

        advance_watermark(&pool, SourceType::Task, 100).await.unwrap();
        advance_watermark(&pool, SourceType::Task, 50).await.unwrap();
        assert_eq!(get_watermark(&pool, SourceType::Task).await.unwrap(), 100);

        advance_watermark(&pool, SourceType::Task, 150).await.unwrap();
        assert_eq!(get_watermark(&pool, SourceType::Task).await.unwrap(), 150);
    }
}
