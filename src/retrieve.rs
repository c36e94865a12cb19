//! Hybrid retrieval: live records first, then vector hits, under a budget.
//!
//! Sections are assembled in strict priority order so fresh structured data
//! always wins budget over historical breadth: recent context entries, then
//! keyword-matched tasks, then nearest-neighbor chunks. The budget is an
//! approximate token count (chars / 4); assembly stops before the entry that
//! would exceed it and marks the result truncated.

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::config::Config;
use crate::embedder::EmbeddingClient;
use crate::models::SourceType;
use crate::records;
use crate::store;

/// Rough chars-per-token ratio; close enough for a budget cap.
pub fn approx_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

/// What flavor of question this is, used to bias the vector section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryIntent {
    /// Failure investigation; bias toward code chunks.
    Debug,
    /// Architecture or rationale; bias toward docs.
    Design,
    General,
}

impl QueryIntent {
    pub fn source_filter(self) -> Option<SourceType> {
        match self {
            QueryIntent::Debug => Some(SourceType::Code),
            QueryIntent::Design => Some(SourceType::Doc),
            QueryIntent::General => None,
        }
    }
}

const DEBUG_HINTS: &[&str] = &[
    "error", "bug", "debug", "crash", "panic", "timeout", "fail", "broken", "exception", "fix",
];
const DESIGN_HINTS: &[&str] = &[
    "design", "architecture", "decision", "approach", "rationale", "plan", "why",
];

pub fn infer_intent(query: &str) -> QueryIntent {
    let lowered = query.to_lowercase();
    if DEBUG_HINTS.iter().any(|h| lowered.contains(h)) {
        QueryIntent::Debug
    } else if DESIGN_HINTS.iter().any(|h| lowered.contains(h)) {
        QueryIntent::Design
    } else {
        QueryIntent::General
    }
}

/// Query terms usable for task substring matching: longer than 2 chars,
/// stripped of punctuation.
pub fn query_terms(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| w.len() > 2)
        .collect()
}

/// A labeled group of candidate entries, in priority order.
pub struct Section {
    pub label: &'static str,
    pub entries: Vec<String>,
}

/// The merged context handed to the synthesizer.
#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub text: String,
    pub entries: usize,
    pub truncated: bool,
}

impl AssembledContext {
    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }
}

/// Fold prioritized sections into one labeled text block under the budget.
///
/// Entries are taken in order until the next one would push the running
/// approximate token count past `budget_tokens`; nothing after that point is
/// admitted, so a lower-priority section can never displace a higher one.
pub fn assemble(sections: Vec<Section>, budget_tokens: usize) -> AssembledContext {
    let mut text = String::new();
    let mut used = 0usize;
    let mut entries = 0usize;
    let mut truncated = false;

    'sections: for section in sections {
        if section.entries.is_empty() {
            continue;
        }
        let header = format!("## {}\n", section.label);
        let mut header_written = false;

        for entry in section.entries {
            let cost = approx_tokens(&entry)
                + if header_written {
                    0
                } else {
                    approx_tokens(&header)
                };
            if used + cost > budget_tokens {
                truncated = true;
                break 'sections;
            }
            if !header_written {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(&header);
                header_written = true;
            }
            text.push_str(&entry);
            text.push('\n');
            used += cost;
            entries += 1;
        }
    }

    if truncated {
        text.push_str("\n[additional context omitted to fit the token budget]\n");
    }

    AssembledContext {
        text,
        entries,
        truncated,
    }
}

/// Gather all three sections for a query and assemble them.
///
/// The vector section is skipped, not failed, when no embedding client is
/// available or the query embedding itself fails.
pub async fn retrieve(
    pool: &SqlitePool,
    config: &Config,
    client: Option<&dyn EmbeddingClient>,
    query: &str,
    budget_tokens: usize,
) -> Result<AssembledContext> {
    let mut sections: Vec<Section> = Vec::new();

    let context_mark = store::get_watermark(pool, SourceType::Context).await?;
    let live = records::context_entries_since(pool, context_mark, config.retrieval.live_limit)
        .await?
        .into_iter()
        .map(|entry| {
            format!(
                "[context: {}]\n{}",
                entry.title,
                entry.body.trim()
            )
        })
        .collect();
    sections.push(Section {
        label: "Recent project context",
        entries: live,
    });

    let terms = query_terms(query);
    let tasks = if terms.is_empty() {
        Vec::new()
    } else {
        records::tasks_matching(pool, &terms, config.retrieval.task_limit)
            .await?
            .into_iter()
            .map(|task| {
                format!(
                    "[task: {} | status: {}]\n{}",
                    task.title,
                    task.status,
                    task.description.trim()
                )
            })
            .collect()
    };
    sections.push(Section {
        label: "Matching tasks",
        entries: tasks,
    });

    if let Some(client) = client {
        let intent = infer_intent(query);
        debug!(?intent, "vector section");
        match client.embed(&[query.to_string()]).await {
            Ok(mut vectors) if !vectors.is_empty() => {
                let query_vector = vectors.remove(0);
                let hits = store::knn_search(
                    pool,
                    &query_vector,
                    config.retrieval.knn_k,
                    intent.source_filter(),
                )
                .await?;
                sections.push(Section {
                    label: "Indexed knowledge",
                    entries: hits
                        .into_iter()
                        .map(|hit| {
                            format!("[{}: {}]\n{}", hit.source_type, hit.source_ref, hit.text)
                        })
                        .collect(),
                });
            }
            Ok(_) => warn!("query embedding returned no vector, skipping vector section"),
            Err(e) => warn!(error = %e, "query embedding failed, live sections only"),
        }
    }

    Ok(assemble(sections, budget_tokens))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(label: &'static str, entries: &[&str]) -> Section {
        Section {
            label,
            entries: entries.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn intent_from_query_wording() {
        assert_eq!(
            infer_intent("debugging connection timeout"),
            QueryIntent::Debug
        );
        assert_eq!(
            infer_intent("what is the caching architecture"),
            QueryIntent::Design
        );
        assert_eq!(infer_intent("how do I add a chunker"), QueryIntent::General);
    }

    #[test]
    fn debug_intent_biases_toward_code() {
        assert_eq!(
            infer_intent("timeout error in upload").source_filter(),
            Some(SourceType::Code)
        );
        assert_eq!(infer_intent("hello").source_filter(), None);
    }

    #[test]
    fn short_terms_dropped_from_task_matching() {
        assert_eq!(
            query_terms("fix a DB bug, now!"),
            vec!["fix", "bug", "now"]
        );
        assert!(query_terms("a an to").is_empty());
    }

    #[test]
    fn earlier_sections_win_the_budget() {
        let live = "live entry text that matters".repeat(4);
        let vector = "historical chunk text".repeat(4);
        let assembled = assemble(
            vec![
                section("Recent project context", &[&live]),
                section("Indexed knowledge", &[&vector]),
            ],
            approx_tokens(&live) + 20,
        );
        assert!(assembled.text.contains("live entry"));
        assert!(!assembled.text.contains("historical chunk"));
        assert!(assembled.truncated);
    }

    #[test]
    fn budget_is_never_exceeded() {
        let entries: Vec<String> = (0..30).map(|i| format!("entry {i} {}", "x".repeat(97))).collect();
        let refs: Vec<&str> = entries.iter().map(|s| s.as_str()).collect();
        // Overshoot is bounded by a single entry plus the truncation marker.
        let slack = approx_tokens(&entries[0])
            + approx_tokens("\n[additional context omitted to fit the token budget]\n");
        for budget in [10usize, 50, 100, 400] {
            let assembled = assemble(vec![section("Indexed knowledge", &refs)], budget);
            assert!(
                approx_tokens(&assembled.text) <= budget + slack,
                "budget {budget} overshot"
            );
        }
    }

    #[test]
    fn empty_sections_produce_empty_context() {
        let assembled = assemble(
            vec![
                section("Recent project context", &[]),
                section("Matching tasks", &[]),
            ],
            1000,
        );
        assert!(assembled.is_empty());
        assert!(assembled.text.is_empty());
        assert!(!assembled.truncated);
    }

    #[test]
    fn section_headers_only_emitted_when_used() {
        let assembled = assemble(
            vec![
                section("Recent project context", &[]),
                section("Matching tasks", &["[task: Ship it]\ndetails"]),
            ],
            1000,
        );
        assert!(!assembled.text.contains("Recent project context"));
        assert!(assembled.text.contains("## Matching tasks"));
        assert_eq!(assembled.entries, 1);
    }
}
