//! The periodic indexing cycle: scan, diff, chunk, embed, commit, advance.
//!
//! One coordinator owns all index mutation. Each cycle walks the phase
//! sequence Idle, Scanning, Diffing, Chunking, Embedding, Committing and
//! back to Idle; when the vector engine is unavailable the cycle stops at
//! Diffing and reports itself impaired so the loop can sleep longer.

use anyhow::Result;
use sqlx::SqlitePool;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::chunker::{ChunkPiece, ChunkPolicy};
use crate::config::Config;
use crate::embedder::{self, EmbeddingCache, EmbeddingClient, HttpEmbeddingClient};
use crate::error::EngineError;
use crate::models::{SourceType, SourceUnit};
use crate::store::{self, PendingChunk};
use crate::scan;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Scanning,
    Diffing,
    Chunking,
    Embedding,
    Committing,
    Impaired,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CyclePhase::Idle => "idle",
            CyclePhase::Scanning => "scanning",
            CyclePhase::Diffing => "diffing",
            CyclePhase::Chunking => "chunking",
            CyclePhase::Embedding => "embedding",
            CyclePhase::Committing => "committing",
            CyclePhase::Impaired => "impaired",
        };
        f.write_str(name)
    }
}

/// How a cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStatus {
    /// Nothing changed; no work done.
    Idle,
    /// Changed sources were committed.
    Committed,
    /// Too many embeddings failed; the whole commit phase was skipped.
    SkippedGuard,
    /// The vector engine is unavailable; indexing is paused.
    Impaired,
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub status: CycleStatus,
    pub scanned: usize,
    pub changed: usize,
    pub chunks: usize,
    pub embedded: usize,
    pub missing: usize,
    pub committed_sources: usize,
    pub failed_sources: usize,
}

impl CycleReport {
    fn idle(scanned: usize) -> Self {
        Self {
            status: CycleStatus::Idle,
            scanned,
            changed: 0,
            chunks: 0,
            embedded: 0,
            missing: 0,
            committed_sources: 0,
            failed_sources: 0,
        }
    }
}

/// Scan-and-diff preview for `cycle --dry-run`.
#[derive(Debug, Clone)]
pub struct CyclePreview {
    pub scanned: usize,
    pub changed: Vec<(SourceType, String)>,
}

pub struct Coordinator {
    pool: SqlitePool,
    config: Config,
    policy: ChunkPolicy,
    cache: EmbeddingCache,
    client: Option<Arc<dyn EmbeddingClient>>,
}

impl Coordinator {
    /// Build a coordinator with the provider named in the configuration.
    pub fn new(pool: SqlitePool, config: Config) -> Result<Self> {
        let client: Option<Arc<dyn EmbeddingClient>> = if config.embedding.is_enabled() {
            Some(Arc::new(HttpEmbeddingClient::new(&config.embedding)?))
        } else {
            None
        };
        Ok(Self::with_client(pool, config, client))
    }

    /// Build a coordinator around an explicit embedding client (or none).
    pub fn with_client(
        pool: SqlitePool,
        config: Config,
        client: Option<Arc<dyn EmbeddingClient>>,
    ) -> Self {
        let policy = ChunkPolicy::new(config.chunking.plain_text_mode);
        let cache = EmbeddingCache::new(config.embedding.cache_size);
        Self {
            pool,
            config,
            policy,
            cache,
            client,
        }
    }

    pub fn vector_search_available(&self) -> bool {
        self.client.is_some()
    }

    async fn scan_all(&self) -> Result<Vec<SourceUnit>> {
        let mut units = scan::enumerate_files(&self.config.project);
        let context_mark = store::get_watermark(&self.pool, SourceType::Context).await?;
        let task_mark = store::get_watermark(&self.pool, SourceType::Task).await?;
        units.extend(scan::enumerate_records(&self.pool, context_mark, task_mark).await?);
        Ok(units)
    }

    /// Scan and diff without touching the index.
    pub async fn preview(&self) -> Result<CyclePreview> {
        let units = self.scan_all().await?;
        let stored = store::load_fingerprints(&self.pool).await?;
        let changed = scan::diff_changed(&units, &stored);
        Ok(CyclePreview {
            scanned: units.len(),
            changed: changed
                .iter()
                .map(|u| (u.source_type, u.source_ref.clone()))
                .collect(),
        })
    }

    /// Run one full indexing cycle.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        debug!(phase = %CyclePhase::Scanning, "cycle phase");
        let units = self.scan_all().await?;

        debug!(phase = %CyclePhase::Diffing, scanned = units.len(), "cycle phase");
        let stored = store::load_fingerprints(&self.pool).await?;
        let changed = scan::diff_changed(&units, &stored);

        let Some(client) = &self.client else {
            let err = EngineError::EngineUnavailable("no embedding provider configured".into());
            warn!(error = %err, phase = %CyclePhase::Impaired, "indexing paused");
            let mut report = CycleReport::idle(units.len());
            report.status = CycleStatus::Impaired;
            report.changed = changed.len();
            return Ok(report);
        };

        if changed.is_empty() {
            debug!(phase = %CyclePhase::Idle, "no changes detected");
            return Ok(CycleReport::idle(units.len()));
        }

        debug!(phase = %CyclePhase::Chunking, changed = changed.len(), "cycle phase");
        let mut per_source: Vec<(&SourceUnit, Vec<ChunkPiece>)> = Vec::new();
        for unit in &changed {
            let pieces = self.policy.chunk_unit(unit, &self.config.chunking);
            per_source.push((unit, pieces));
        }
        let total_chunks: usize = per_source.iter().map(|(_, p)| p.len()).sum();

        // One flat cross-source list so the batcher can fill whole waves.
        debug!(phase = %CyclePhase::Embedding, chunks = total_chunks, "cycle phase");
        let texts: Vec<String> = per_source
            .iter()
            .flat_map(|(_, pieces)| pieces.iter().map(|p| p.text.clone()))
            .collect();
        let vectors =
            embedder::embed_all(client.as_ref(), &self.cache, &self.config.embedding, &texts).await;
        let missing = vectors.iter().filter(|v| v.is_none()).count();
        let embedded = vectors.len() - missing;

        // More than half missing: redo cheap chunking next cycle rather
        // than commit a half-broken index.
        if missing * 2 > vectors.len() && !vectors.is_empty() {
            warn!(
                missing,
                attempted = vectors.len(),
                "embedding failure rate above guard, skipping commit phase"
            );
            return Ok(CycleReport {
                status: CycleStatus::SkippedGuard,
                scanned: units.len(),
                changed: changed.len(),
                chunks: total_chunks,
                embedded,
                missing,
                committed_sources: 0,
                failed_sources: 0,
            });
        }

        debug!(phase = %CyclePhase::Committing, "cycle phase");
        let mut committed_sources = 0usize;
        let mut failed_sources = 0usize;
        let mut failed_types: Vec<SourceType> = Vec::new();
        let mut offset = 0usize;
        for (unit, pieces) in &per_source {
            let pending: Vec<PendingChunk> = pieces
                .iter()
                .enumerate()
                .map(|(i, piece)| PendingChunk {
                    text: piece.text.clone(),
                    meta: piece.meta.clone(),
                    embedding: vectors[offset + i].clone(),
                })
                .collect();
            offset += pieces.len();

            match store::replace_source(
                &self.pool,
                unit.source_type,
                &unit.source_ref,
                &unit.fingerprint,
                &pending,
            )
            .await
            {
                Ok(()) => committed_sources += 1,
                Err(e) => {
                    let err = EngineError::Persistence {
                        source_ref: unit.source_ref.clone(),
                        reason: e.to_string(),
                    };
                    warn!(error = %err, "source left for retry next cycle");
                    failed_sources += 1;
                    failed_types.push(unit.source_type);
                }
            }
        }

        // Watermarks cover all scanned units of a type, pulled back by the
        // skew allowance so a write racing the scan is still picked up next
        // cycle. A type with a failed commit is held back entirely.
        for (source_type, marker) in scan::max_markers(&units) {
            if failed_types.contains(&source_type) {
                continue;
            }
            let target = (marker - self.config.indexer.skew_secs).max(0);
            store::advance_watermark(&self.pool, source_type, target).await?;
        }

        info!(
            scanned = units.len(),
            changed = changed.len(),
            chunks = total_chunks,
            embedded,
            missing,
            committed_sources,
            failed_sources,
            "cycle committed"
        );

        Ok(CycleReport {
            status: CycleStatus::Committed,
            scanned: units.len(),
            changed: changed.len(),
            chunks: total_chunks,
            embedded,
            missing,
            committed_sources,
            failed_sources,
        })
    }

    /// Drive cycles forever, sleeping between them. Shutdown is observed at
    /// cycle boundaries only; in-flight provider calls always finish.
    pub async fn run_loop(&self) -> Result<()> {
        loop {
            let status = match self.run_cycle().await {
                Ok(report) => report.status,
                Err(e) => {
                    warn!(error = %e, "cycle failed, continuing impaired");
                    CycleStatus::Impaired
                }
            };

            let sleep_secs = match status {
                CycleStatus::Impaired => self.config.indexer.impaired_interval_secs,
                _ => self.config.indexer.interval_secs,
            };

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown requested, stopping after current cycle");
                    return Ok(());
                }
                _ = tokio::time::sleep(Duration::from_secs(sleep_secs)) => {}
            }
        }
    }
}
