use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub project: ProjectConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub indexer: IndexerConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProjectConfig {
    pub root: PathBuf,
    #[serde(default = "default_ignore_dirs")]
    pub ignore_dirs: Vec<String>,
    #[serde(default = "default_doc_extensions")]
    pub doc_extensions: Vec<String>,
    #[serde(default = "default_code_extensions")]
    pub code_extensions: Vec<String>,
}

fn default_ignore_dirs() -> Vec<String> {
    ["target", "node_modules", "vendor", "dist", "build", "__pycache__"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_doc_extensions() -> Vec<String> {
    ["md", "txt", "rst", "adoc"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_code_extensions() -> Vec<String> {
    [
        "rs", "py", "js", "jsx", "ts", "tsx", "go", "java", "c", "h", "cpp", "rb",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_window_overlap")]
    pub window_overlap: usize,
    #[serde(default = "default_prose_target")]
    pub prose_target_size: usize,
    #[serde(default = "default_prose_min")]
    pub prose_min_size: usize,
    #[serde(default = "default_overlap_lines")]
    pub prose_overlap_lines: usize,
    #[serde(default = "default_code_target")]
    pub code_target_size: usize,
    #[serde(default = "default_code_min")]
    pub code_min_size: usize,
    #[serde(default = "default_code_max")]
    pub code_max_size: usize,
    /// Route doc and code through the fixed-window chunker instead of the
    /// structure-aware ones.
    #[serde(default)]
    pub plain_text_mode: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            window_overlap: default_window_overlap(),
            prose_target_size: default_prose_target(),
            prose_min_size: default_prose_min(),
            prose_overlap_lines: default_overlap_lines(),
            code_target_size: default_code_target(),
            code_min_size: default_code_min(),
            code_max_size: default_code_max(),
            plain_text_mode: false,
        }
    }
}

fn default_window_size() -> usize {
    1200
}
fn default_window_overlap() -> usize {
    200
}
fn default_prose_target() -> usize {
    1000
}
fn default_prose_min() -> usize {
    200
}
fn default_overlap_lines() -> usize {
    2
}
fn default_code_target() -> usize {
    1500
}
fn default_code_min() -> usize {
    300
}
fn default_code_max() -> usize {
    3000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Maximum sub-batches in flight at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Pause between concurrent waves, to stay under provider rate limits.
    #[serde(default = "default_wave_pause_ms")]
    pub wave_pause_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            base_url: None,
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            wave_pause_ms: default_wave_pause_ms(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            cache_size: default_cache_size(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_concurrency() -> usize {
    4
}
fn default_wave_pause_ms() -> u64 {
    250
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_cache_size() -> usize {
    2048
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_answer_budget")]
    pub answer_budget_tokens: usize,
    /// Model used by the task-placement advisor; falls back to `model`.
    #[serde(default)]
    pub advisor_model: Option<String>,
    #[serde(default = "default_advisor_budget")]
    pub advisor_budget_tokens: usize,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    #[serde(default = "default_chat_timeout")]
    pub timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: default_chat_model(),
            base_url: None,
            answer_budget_tokens: default_answer_budget(),
            advisor_model: None,
            advisor_budget_tokens: default_advisor_budget(),
            max_output_tokens: None,
            timeout_secs: default_chat_timeout(),
        }
    }
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_answer_budget() -> usize {
    6000
}
fn default_advisor_budget() -> usize {
    3000
}
fn default_chat_timeout() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexerConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Longer sleep used while the vector engine is unavailable.
    #[serde(default = "default_impaired_interval_secs")]
    pub impaired_interval_secs: u64,
    /// Watermarks advance to `max marker - skew_secs` to tolerate clock and
    /// filesystem-metadata skew.
    #[serde(default = "default_skew_secs")]
    pub skew_secs: i64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            impaired_interval_secs: default_impaired_interval_secs(),
            skew_secs: default_skew_secs(),
        }
    }
}

fn default_interval_secs() -> u64 {
    120
}
fn default_impaired_interval_secs() -> u64 {
    600
}
fn default_skew_secs() -> i64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_live_limit")]
    pub live_limit: usize,
    #[serde(default = "default_task_limit")]
    pub task_limit: usize,
    #[serde(default = "default_knn_k")]
    pub knn_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            live_limit: default_live_limit(),
            task_limit: default_task_limit(),
            knn_k: default_knn_k(),
        }
    }
}

fn default_live_limit() -> usize {
    20
}
fn default_task_limit() -> usize {
    10
}
fn default_knn_k() -> usize {
    24
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.window_size == 0 {
        anyhow::bail!("chunking.window_size must be > 0");
    }
    if config.chunking.window_overlap >= config.chunking.window_size {
        anyhow::bail!("chunking.window_overlap must be smaller than chunking.window_size");
    }
    if config.chunking.prose_min_size > config.chunking.prose_target_size {
        anyhow::bail!("chunking.prose_min_size must not exceed chunking.prose_target_size");
    }
    if config.chunking.code_max_size < config.chunking.code_target_size {
        anyhow::bail!("chunking.code_max_size must be >= chunking.code_target_size");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.batch_size == 0 || config.embedding.concurrency == 0 {
            anyhow::bail!("embedding.batch_size and embedding.concurrency must be > 0");
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("lore.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn minimal_config_loads_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[db]
path = "data/lore.sqlite"

[project]
root = "."
"#,
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.embedding.provider, "disabled");
        assert_eq!(config.chunking.prose_min_size, 200);
        assert_eq!(config.indexer.skew_secs, 5);
    }

    #[test]
    fn overlap_not_smaller_than_window_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[db]
path = "data/lore.sqlite"

[project]
root = "."

[chunking]
window_size = 100
window_overlap = 100
"#,
        );
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn enabled_embedding_requires_model_and_dims() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[db]
path = "data/lore.sqlite"

[project]
root = "."

[embedding]
provider = "openai"
"#,
        );
        assert!(load_config(&path).is_err());
    }
}
