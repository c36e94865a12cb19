//! Chunking strategies and the per-source-type strategy registry.
//!
//! Three interchangeable strategies produce [`ChunkPiece`]s from a source
//! unit's body: a fixed sliding window, a heading/paragraph-aware prose
//! chunker, and an entity-aware code chunker. The registry maps each source
//! type to its strategy so adding or rerouting a type never touches the
//! coordinator.

pub mod code;
pub mod entities;
pub mod fixed;
pub mod prose;

use std::collections::HashMap;

use crate::config::ChunkingConfig;
use crate::models::{ChunkMeta, SourceType, SourceUnit};

/// A chunk before it is assigned an id and persisted.
#[derive(Debug, Clone)]
pub struct ChunkPiece {
    pub text: String,
    pub meta: ChunkMeta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    FixedWindow,
    Prose,
    Code,
}

/// Strategy lookup keyed by source type.
///
/// Live record types always use the fixed window; doc and code use the
/// structure-aware chunkers unless `plain_text_mode` routes them through
/// the fixed window as well.
pub struct ChunkPolicy {
    strategies: HashMap<SourceType, Strategy>,
    extractor: entities::EntityExtractor,
}

impl ChunkPolicy {
    pub fn new(plain_text_mode: bool) -> Self {
        let mut strategies = HashMap::new();
        if plain_text_mode {
            strategies.insert(SourceType::Doc, Strategy::FixedWindow);
            strategies.insert(SourceType::Code, Strategy::FixedWindow);
        } else {
            strategies.insert(SourceType::Doc, Strategy::Prose);
            strategies.insert(SourceType::Code, Strategy::Code);
        }
        strategies.insert(SourceType::Context, Strategy::FixedWindow);
        strategies.insert(SourceType::Task, Strategy::FixedWindow);

        Self {
            strategies,
            extractor: entities::EntityExtractor::new(),
        }
    }

    pub fn strategy_for(&self, source_type: SourceType) -> Strategy {
        self.strategies
            .get(&source_type)
            .copied()
            .unwrap_or(Strategy::FixedWindow)
    }

    /// Chunk a unit's body with the strategy registered for its type.
    pub fn chunk_unit(&self, unit: &SourceUnit, cfg: &ChunkingConfig) -> Vec<ChunkPiece> {
        match self.strategy_for(unit.source_type) {
            Strategy::FixedWindow => {
                fixed::chunk_fixed(&unit.body, cfg.window_size, cfg.window_overlap)
            }
            Strategy::Prose => prose::chunk_prose(
                &unit.body,
                cfg.prose_target_size,
                cfg.prose_min_size,
                cfg.prose_overlap_lines,
            ),
            Strategy::Code => code::chunk_code(
                &unit.source_ref,
                &unit.body,
                cfg.code_target_size,
                cfg.code_min_size,
                cfg.code_max_size,
                &self.extractor,
            ),
        }
    }
}

pub(crate) fn meta_with_strategy(strategy: &str) -> ChunkMeta {
    ChunkMeta {
        strategy: strategy.to_string(),
        ..ChunkMeta::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_routes_each_source_type() {
        let policy = ChunkPolicy::new(false);
        assert_eq!(policy.strategy_for(SourceType::Doc), Strategy::Prose);
        assert_eq!(policy.strategy_for(SourceType::Code), Strategy::Code);
        assert_eq!(
            policy.strategy_for(SourceType::Context),
            Strategy::FixedWindow
        );
        assert_eq!(policy.strategy_for(SourceType::Task), Strategy::FixedWindow);
    }

    #[test]
    fn plain_text_mode_downgrades_doc_and_code() {
        let policy = ChunkPolicy::new(true);
        assert_eq!(policy.strategy_for(SourceType::Doc), Strategy::FixedWindow);
        assert_eq!(policy.strategy_for(SourceType::Code), Strategy::FixedWindow);
    }
}
