//! End-to-end pipeline tests: cycles against a temporary SQLite database
//! with stubbed embedding and chat providers.

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lorebase::answer::{self, ChatClient, SynthesisProfile};
use lorebase::config::{
    ChatConfig, ChunkingConfig, Config, DbConfig, EmbeddingConfig, IndexerConfig, ProjectConfig,
    RetrievalConfig,
};
use lorebase::embedder::EmbeddingClient;
use lorebase::indexer::{Coordinator, CycleStatus};
use lorebase::models::SourceType;
use lorebase::{db, migrate, store};

/// Deterministic embedding stub: a 3-dim vector derived from the text.
/// Any batch containing `fail_marker` fails wholesale.
struct StubEmbed {
    fail_marker: Option<&'static str>,
    calls: AtomicUsize,
}

impl StubEmbed {
    fn new(fail_marker: Option<&'static str>) -> Self {
        Self {
            fail_marker,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EmbeddingClient for StubEmbed {
    fn model_name(&self) -> &str {
        "stub-embed"
    }
    fn dims(&self) -> usize {
        3
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(marker) = self.fail_marker {
            if texts.iter().any(|t| t.contains(marker)) {
                bail!("stub provider refused this batch");
            }
        }
        Ok(texts
            .iter()
            .map(|t| {
                let bytes: f32 = t.bytes().map(|b| b as f32).sum();
                vec![t.len() as f32, bytes % 101.0, 1.0]
            })
            .collect())
    }
}

struct StubChat {
    calls: AtomicUsize,
}

#[async_trait]
impl ChatClient for StubChat {
    async fn complete(&self, model: &str, _system: &str, user: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("answered with {model}: {} chars of context", user.len()))
    }
}

fn test_config(root: &Path, db_path: &Path) -> Config {
    Config {
        db: DbConfig {
            path: db_path.to_path_buf(),
        },
        project: ProjectConfig {
            root: root.to_path_buf(),
            ignore_dirs: vec!["target".to_string()],
            doc_extensions: vec!["md".to_string()],
            code_extensions: vec!["rs".to_string()],
        },
        chunking: ChunkingConfig {
            // Small documents in these tests should come out as one chunk.
            prose_target_size: 2000,
            prose_min_size: 50,
            ..ChunkingConfig::default()
        },
        embedding: EmbeddingConfig {
            batch_size: 1,
            concurrency: 2,
            wave_pause_ms: 0,
            ..EmbeddingConfig::default()
        },
        chat: ChatConfig::default(),
        indexer: IndexerConfig::default(),
        retrieval: RetrievalConfig::default(),
    }
}

async fn setup(dir: &tempfile::TempDir) -> (Config, SqlitePool) {
    let root = dir.path().join("project");
    std::fs::create_dir_all(&root).unwrap();
    let db_path = dir.path().join("lore.sqlite");
    let config = test_config(&root, &db_path);
    let pool = db::connect(&db_path).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    (config, pool)
}

fn coordinator(pool: &SqlitePool, config: &Config, embed: StubEmbed) -> Coordinator {
    Coordinator::with_client(pool.clone(), config.clone(), Some(Arc::new(embed)))
}

async fn chunk_ids(pool: &SqlitePool) -> Vec<String> {
    sqlx::query_scalar::<_, String>("SELECT id FROM chunks ORDER BY id")
        .fetch_all(pool)
        .await
        .unwrap()
}

async fn insert_context(pool: &SqlitePool, id: &str, title: &str, body: &str, updated_at: i64) {
    sqlx::query("INSERT INTO context_entries (id, title, body, tags, updated_at) VALUES (?, ?, ?, '', ?)")
        .bind(id)
        .bind(title)
        .bind(body)
        .bind(updated_at)
        .execute(pool)
        .await
        .unwrap();
}

async fn insert_task(pool: &SqlitePool, id: &str, title: &str, description: &str, updated_at: i64) {
    sqlx::query(
        "INSERT INTO tasks (id, title, description, status, priority, updated_at) VALUES (?, ?, ?, 'open', 1, ?)",
    )
    .bind(id)
    .bind(title)
    .bind(description)
    .bind(updated_at)
    .execute(pool)
    .await
    .unwrap();
}

#[tokio::test]
async fn second_cycle_with_no_changes_is_idle() {
    let dir = tempfile::tempdir().unwrap();
    let (config, pool) = setup(&dir).await;
    std::fs::write(config.project.root.join("notes.md"), "# Notes\nsome project notes here").unwrap();
    std::fs::write(config.project.root.join("lib.rs"), "fn entry() { run(); }\n").unwrap();

    let coordinator = coordinator(&pool, &config, StubEmbed::new(None));

    let first = coordinator.run_cycle().await.unwrap();
    assert_eq!(first.status, CycleStatus::Committed);
    assert!(first.chunks > 0);
    let ids_after_first = chunk_ids(&pool).await;

    let second = coordinator.run_cycle().await.unwrap();
    assert_eq!(second.status, CycleStatus::Idle);
    assert_eq!(chunk_ids(&pool).await, ids_after_first);
}

#[tokio::test]
async fn changed_file_is_reindexed_with_fresh_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let (config, pool) = setup(&dir).await;
    let doc = config.project.root.join("notes.md");
    std::fs::write(&doc, "# Notes\nversion one of the notes").unwrap();

    let coordinator = coordinator(&pool, &config, StubEmbed::new(None));
    coordinator.run_cycle().await.unwrap();
    let old_ids = chunk_ids(&pool).await;

    std::fs::write(&doc, "# Notes\nversion two, entirely rewritten").unwrap();
    let report = coordinator.run_cycle().await.unwrap();
    assert_eq!(report.status, CycleStatus::Committed);
    assert_eq!(report.changed, 1);

    // Delete-then-insert: the old chunk set is fully superseded.
    let new_ids = chunk_ids(&pool).await;
    assert!(!new_ids.is_empty());
    assert!(new_ids.iter().all(|id| !old_ids.contains(id)));

    let chunks = store::chunks_for_source(&pool, SourceType::Doc, "notes.md")
        .await
        .unwrap();
    assert!(chunks[0].text.contains("version two"));
}

#[tokio::test]
async fn failed_sub_batch_leaves_only_its_chunks_vectorless() {
    let dir = tempfile::tempdir().unwrap();
    let (config, pool) = setup(&dir).await;
    std::fs::write(
        config.project.root.join("aaa.md"),
        "# Alpha\nperfectly ordinary documentation text",
    )
    .unwrap();
    std::fs::write(
        config.project.root.join("bbb.md"),
        "# Beta\nthis section mentions POISONBATCH once",
    )
    .unwrap();

    // batch_size is 1, so the poisoned text fails alone.
    let coordinator = coordinator(&pool, &config, StubEmbed::new(Some("POISONBATCH")));
    let report = coordinator.run_cycle().await.unwrap();

    // Half missing does not trip the more-than-half guard.
    assert_eq!(report.status, CycleStatus::Committed);
    assert_eq!(report.missing, 1);
    assert_eq!(report.embedded, 1);

    let alpha = store::chunks_for_source(&pool, SourceType::Doc, "aaa.md")
        .await
        .unwrap();
    let beta = store::chunks_for_source(&pool, SourceType::Doc, "bbb.md")
        .await
        .unwrap();
    assert_eq!(alpha.len(), 1);
    assert_eq!(beta.len(), 1);

    // Only the healthy chunk is retrievable by vector search.
    let hits = store::knn_search(&pool, &[1.0, 1.0, 1.0], 10, None)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].source_ref, "aaa.md");
}

#[tokio::test]
async fn majority_embedding_failure_skips_the_whole_commit() {
    let dir = tempfile::tempdir().unwrap();
    let (config, pool) = setup(&dir).await;
    let doc = config.project.root.join("broken.md");
    std::fs::write(&doc, "# Broken\nPOISONBATCH everywhere in this file").unwrap();

    let coordinator = coordinator(&pool, &config, StubEmbed::new(Some("POISONBATCH")));
    let report = coordinator.run_cycle().await.unwrap();
    assert_eq!(report.status, CycleStatus::SkippedGuard);

    // Nothing was committed: no chunks, no fingerprint, no watermark.
    assert!(chunk_ids(&pool).await.is_empty());
    assert!(store::load_fingerprints(&pool).await.unwrap().is_empty());
    assert_eq!(
        store::get_watermark(&pool, SourceType::Doc).await.unwrap(),
        0
    );

    // Once the content heals, the same source commits normally.
    std::fs::write(&doc, "# Fixed\nclean content now").unwrap();
    let retry = coordinator.run_cycle().await.unwrap();
    assert_eq!(retry.status, CycleStatus::Committed);
    assert_eq!(chunk_ids(&pool).await.len(), 1);
}

#[tokio::test]
async fn live_records_are_indexed_and_rescanned_only_when_touched() {
    let dir = tempfile::tempdir().unwrap();
    let (config, pool) = setup(&dir).await;
    let now = chrono::Utc::now().timestamp();
    insert_task(&pool, "t1", "Ship retrieval", "hybrid retrieval engine", now).await;

    let coordinator = coordinator(&pool, &config, StubEmbed::new(None));
    let first = coordinator.run_cycle().await.unwrap();
    assert_eq!(first.status, CycleStatus::Committed);
    let task_chunks = store::chunks_for_source(&pool, SourceType::Task, "t1")
        .await
        .unwrap();
    assert_eq!(task_chunks.len(), 1);
    assert!(task_chunks[0].text.contains("Ship retrieval"));

    // Unchanged row: the skew window rescans it, the fingerprint skips it.
    let second = coordinator.run_cycle().await.unwrap();
    assert_eq!(second.status, CycleStatus::Idle);

    // A content touch bumps updated_at and reindexes.
    sqlx::query("UPDATE tasks SET description = 'now with budgeting', updated_at = ? WHERE id = 't1'")
        .bind(now + 60)
        .execute(&pool)
        .await
        .unwrap();
    let third = coordinator.run_cycle().await.unwrap();
    assert_eq!(third.status, CycleStatus::Committed);
    assert_eq!(third.changed, 1);
}

#[tokio::test]
async fn no_embedding_client_reports_impaired_and_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (config, pool) = setup(&dir).await;
    std::fs::write(config.project.root.join("notes.md"), "# Notes\ncontent").unwrap();

    let coordinator = Coordinator::with_client(pool.clone(), config.clone(), None);
    assert!(!coordinator.vector_search_available());
    let report = coordinator.run_cycle().await.unwrap();
    assert_eq!(report.status, CycleStatus::Impaired);
    assert!(chunk_ids(&pool).await.is_empty());
}

#[tokio::test]
async fn live_context_outranks_vector_hits_in_assembled_prompt() {
    let dir = tempfile::tempdir().unwrap();
    let (config, pool) = setup(&dir).await;

    // One historical vector hit and one fresh live entry.
    store::replace_source(
        &pool,
        SourceType::Doc,
        "history.md",
        "h1",
        &[store::PendingChunk {
            text: "HISTORICALCHUNK describing old deployment steps".to_string(),
            meta: Default::default(),
            embedding: Some(vec![40.0, 50.0, 1.0]),
        }],
    )
    .await
    .unwrap();
    insert_context(&pool, "c1", "Deploy freeze", "LIVEENTRY deploys frozen this week", 100).await;

    let embed = StubEmbed::new(None);
    let context = lorebase::retrieve::retrieve(
        &pool,
        &config,
        Some(&embed as &dyn EmbeddingClient),
        "deployment",
        6000,
    )
    .await
    .unwrap();

    let live_pos = context.text.find("LIVEENTRY").expect("live entry present");
    let hist_pos = context
        .text
        .find("HISTORICALCHUNK")
        .expect("vector hit present");
    assert!(live_pos < hist_pos, "live section must come first");
}

#[tokio::test]
async fn debug_intent_ranks_code_over_unrelated_prose() {
    let dir = tempfile::tempdir().unwrap();
    let (config, pool) = setup(&dir).await;

    store::replace_source(
        &pool,
        SourceType::Code,
        "net.rs",
        "h1",
        &[store::PendingChunk {
            text: "fn connect() { /* raises timeout error after 30s */ }".to_string(),
            meta: Default::default(),
            embedding: Some(vec![10.0, 20.0, 1.0]),
        }],
    )
    .await
    .unwrap();
    store::replace_source(
        &pool,
        SourceType::Doc,
        "recipes.md",
        "h2",
        &[store::PendingChunk {
            text: "How to bake sourdough bread at home".to_string(),
            meta: Default::default(),
            embedding: Some(vec![11.0, 21.0, 1.0]),
        }],
    )
    .await
    .unwrap();

    let embed = StubEmbed::new(None);
    let context = lorebase::retrieve::retrieve(
        &pool,
        &config,
        Some(&embed as &dyn EmbeddingClient),
        "debugging connection timeout",
        6000,
    )
    .await
    .unwrap();

    // Debug intent filters the vector section to code chunks.
    assert!(context.text.contains("timeout error"));
    assert!(!context.text.contains("sourdough"));
}

#[tokio::test]
async fn empty_knowledge_base_returns_sentinel_without_calling_provider() {
    let dir = tempfile::tempdir().unwrap();
    let (config, pool) = setup(&dir).await;

    let chat = StubChat {
        calls: AtomicUsize::new(0),
    };
    let profile = SynthesisProfile::ask(&config.chat);
    let text = answer::synthesize(&pool, &config, None, &chat, &profile, "anything at all").await;

    assert_eq!(text, answer::NO_CONTEXT_ANSWER);
    assert_eq!(chat.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn ask_and_advise_share_the_pipeline_with_different_models() {
    let dir = tempfile::tempdir().unwrap();
    let (mut config, pool) = setup(&dir).await;
    config.chat.advisor_model = Some("advisor-model".to_string());
    insert_context(&pool, "c1", "Conventions", "tasks are grouped by subsystem", 100).await;

    let chat = StubChat {
        calls: AtomicUsize::new(0),
    };

    let ask = SynthesisProfile::ask(&config.chat);
    let answer_text = answer::synthesize(&pool, &config, None, &chat, &ask, "what conventions").await;
    assert!(answer_text.contains(&config.chat.model));

    let advise = SynthesisProfile::advise(&config.chat);
    let advice = answer::synthesize(&pool, &config, None, &chat, &advise, "add cache metrics").await;
    assert!(advice.contains("advisor-model"));
    assert_eq!(chat.calls.load(Ordering::SeqCst), 2);
}
