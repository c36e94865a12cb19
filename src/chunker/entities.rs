//! Per-language code entity extraction.
//!
//! Two explicit tiers: languages with a bundled tree-sitter grammar are
//! parsed and walked for function/class/method nodes; everything else falls
//! back to line-oriented regex patterns. The tiers are composed here so the
//! code chunker never sees which one ran.

use regex::Regex;
use std::collections::HashMap;
use tree_sitter::{Node, Parser};

use crate::models::CodeEntity;

/// Language family detected from a file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Tsx,
    Go,
    Java,
    C,
    Cpp,
    Ruby,
    Unknown,
}

impl Language {
    pub fn from_extension(ext: &str) -> Language {
        match ext {
            "rs" => Language::Rust,
            "py" => Language::Python,
            "js" | "mjs" | "cjs" => Language::JavaScript,
            "jsx" => Language::Tsx,
            "ts" => Language::TypeScript,
            "tsx" => Language::Tsx,
            "go" => Language::Go,
            "java" => Language::Java,
            "c" | "h" => Language::C,
            "cpp" | "cc" | "hpp" | "cxx" => Language::Cpp,
            "rb" => Language::Ruby,
            _ => Language::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Rust => "rust",
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Tsx => "tsx",
            Language::Go => "go",
            Language::Java => "java",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Ruby => "ruby",
            Language::Unknown => "unknown",
        }
    }

    /// Whether block structure is brace-delimited, so the code chunker can
    /// track nesting depth.
    pub fn brace_delimited(&self) -> bool {
        !matches!(
            self,
            Language::Python | Language::Ruby | Language::Unknown
        )
    }

    fn tree_sitter_language(&self) -> Option<tree_sitter::Language> {
        match self {
            Language::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            Language::Python => Some(tree_sitter_python::LANGUAGE.into()),
            Language::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            Language::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            Language::Tsx => Some(tree_sitter_typescript::LANGUAGE_TSX.into()),
            _ => None,
        }
    }
}

/// Two-tier entity extractor: tree-sitter where a grammar is bundled,
/// regex patterns otherwise.
pub struct EntityExtractor {
    fallback: HashMap<Language, Vec<(String, Regex)>>,
    generic: Vec<(String, Regex)>,
}

impl Default for EntityExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityExtractor {
    pub fn new() -> Self {
        let mut fallback: HashMap<Language, Vec<(String, Regex)>> = HashMap::new();

        fallback.insert(
            Language::Go,
            compile(&[
                ("method", r"(?m)^func\s+\([^)]*\)\s*([A-Za-z_]\w*)"),
                ("function", r"(?m)^func\s+([A-Za-z_]\w*)"),
                ("class", r"(?m)^type\s+([A-Za-z_]\w*)\s+(?:struct|interface)\b"),
            ]),
        );
        fallback.insert(
            Language::Java,
            compile(&[
                (
                    "class",
                    r"(?m)^\s*(?:public\s+|private\s+|protected\s+|abstract\s+|final\s+)*(?:class|interface|enum)\s+([A-Za-z_]\w*)",
                ),
                (
                    "method",
                    r"(?m)^\s{4,}(?:public|private|protected)[\w\s<>\[\],]*\s([A-Za-z_]\w*)\s*\(",
                ),
            ]),
        );
        let c_patterns = compile(&[
            ("class", r"(?m)^\s*(?:class|struct)\s+([A-Za-z_]\w*)\s*[{:]"),
            (
                "function",
                r"(?m)^[A-Za-z_][\w\s\*&:<>,]*?\b([A-Za-z_]\w*)\s*\([^;{}]*\)\s*\{",
            ),
        ]);
        fallback.insert(Language::C, c_patterns.clone());
        fallback.insert(Language::Cpp, c_patterns);
        fallback.insert(
            Language::Ruby,
            compile(&[
                ("class", r"(?m)^\s*(?:class|module)\s+([A-Z]\w*)"),
                ("method", r"(?m)^\s*def\s+(?:self\.)?([a-z_]\w*[?!]?)"),
            ]),
        );

        let generic = compile(&[(
            "function",
            r"(?m)^\s*(?:pub\s+)?(?:async\s+)?(?:export\s+)?(?:fn|def|function|func|sub|proc)\s+([A-Za-z_]\w*)",
        )]);

        Self { fallback, generic }
    }

    /// Extract entities for `language` from `text`. The parser tier wins
    /// whenever a grammar is available and the parse succeeds.
    pub fn extract(&self, language: Language, text: &str) -> Vec<CodeEntity> {
        if let Some(entities) = extract_with_parser(language, text) {
            return entities;
        }
        self.extract_with_regex(language, text)
    }

    fn extract_with_regex(&self, language: Language, text: &str) -> Vec<CodeEntity> {
        let patterns = self.fallback.get(&language).unwrap_or(&self.generic);
        let mut entities: Vec<CodeEntity> = Vec::new();

        for (kind, pattern) in patterns {
            for caps in pattern.captures_iter(text) {
                let Some(m) = caps.get(1) else { continue };
                let start_line = text[..m.start()].matches('\n').count() + 1;
                let name = m.as_str().to_string();
                if entities
                    .iter()
                    .any(|e| e.start_line == start_line && e.name == name)
                {
                    continue;
                }
                entities.push(CodeEntity {
                    kind: kind.clone(),
                    name,
                    start_line,
                    end_line: start_line,
                    parent: None,
                });
            }
        }

        entities.sort_by_key(|e| e.start_line);

        // The regex tier cannot see block ends; approximate each entity's
        // extent as running up to the next entity.
        let total_lines = text.lines().count();
        let starts: Vec<usize> = entities.iter().map(|e| e.start_line).collect();
        for (i, entity) in entities.iter_mut().enumerate() {
            entity.end_line = starts
                .get(i + 1)
                .map(|s| s.saturating_sub(1))
                .unwrap_or(total_lines)
                .max(entity.start_line);
        }

        entities
    }
}

fn compile(patterns: &[(&str, &str)]) -> Vec<(String, Regex)> {
    patterns
        .iter()
        .map(|(kind, pattern)| {
            (
                kind.to_string(),
                Regex::new(pattern).expect("static pattern compiles"),
            )
        })
        .collect()
}

// ============ Parser tier ============

fn extract_with_parser(language: Language, text: &str) -> Option<Vec<CodeEntity>> {
    let ts_language = language.tree_sitter_language()?;

    let mut parser = Parser::new();
    parser.set_language(&ts_language).ok()?;
    let tree = parser.parse(text, None)?;

    let source = text.as_bytes();
    let mut entities = Vec::new();
    collect_entities(tree.root_node(), source, language, None, &mut entities);
    entities.sort_by_key(|e| e.start_line);
    Some(entities)
}

fn collect_entities(
    node: Node,
    source: &[u8],
    language: Language,
    parent: Option<&str>,
    entities: &mut Vec<CodeEntity>,
) {
    let kind_str = node.kind();

    match (language, kind_str) {
        (Language::Rust, "function_item") => {
            if let Some(name) = child_text(&node, "identifier", source) {
                push_entity(entities, &node, method_or_function(parent), name, parent);
            }
        }
        (Language::Rust, "struct_item" | "enum_item" | "trait_item") => {
            if let Some(name) = child_text(&node, "type_identifier", source) {
                push_entity(entities, &node, "class", name, parent);
            }
        }
        (Language::Rust, "impl_item") => {
            let type_name = child_text(&node, "type_identifier", source);
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                collect_entities(child, source, language, type_name.as_deref(), entities);
            }
            return;
        }
        (Language::Python, "function_definition") => {
            if let Some(name) = child_text(&node, "identifier", source) {
                push_entity(entities, &node, method_or_function(parent), name, parent);
            }
        }
        (Language::Python, "class_definition") => {
            if let Some(name) = child_text(&node, "identifier", source) {
                push_entity(entities, &node, "class", name.clone(), parent);
                let mut cursor = node.walk();
                for child in node.children(&mut cursor) {
                    collect_entities(child, source, language, Some(&name), entities);
                }
                return;
            }
        }
        (
            Language::JavaScript | Language::TypeScript | Language::Tsx,
            "function_declaration",
        ) => {
            if let Some(name) = child_text(&node, "identifier", source) {
                let kind = component_or(language, &name, "function");
                push_entity(entities, &node, kind, name, parent);
            }
        }
        (Language::JavaScript | Language::TypeScript | Language::Tsx, "class_declaration") => {
            let name = child_text(&node, "type_identifier", source)
                .or_else(|| child_text(&node, "identifier", source));
            if let Some(name) = name {
                push_entity(entities, &node, "class", name.clone(), parent);
                let mut cursor = node.walk();
                for child in node.children(&mut cursor) {
                    collect_entities(child, source, language, Some(&name), entities);
                }
                return;
            }
        }
        (Language::JavaScript | Language::TypeScript | Language::Tsx, "method_definition") => {
            if let Some(name) = child_text(&node, "property_identifier", source) {
                push_entity(entities, &node, "method", name, parent);
            }
        }
        (Language::JavaScript | Language::TypeScript | Language::Tsx, "lexical_declaration") => {
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                if child.kind() == "variable_declarator"
                    && has_child_kind(&child, "arrow_function")
                {
                    if let Some(name) = child_text(&child, "identifier", source) {
                        let kind = component_or(language, &name, "function");
                        push_entity(entities, &node, kind, name, parent);
                    }
                }
            }
        }
        _ => {}
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_entities(child, source, language, parent, entities);
    }
}

fn method_or_function(parent: Option<&str>) -> &'static str {
    if parent.is_some() {
        "method"
    } else {
        "function"
    }
}

/// Capitalized functions in JSX/TSX files are treated as components.
fn component_or(language: Language, name: &str, default: &'static str) -> &'static str {
    if language == Language::Tsx && name.chars().next().is_some_and(|c| c.is_uppercase()) {
        "component"
    } else {
        default
    }
}

fn push_entity(
    entities: &mut Vec<CodeEntity>,
    node: &Node,
    kind: &str,
    name: String,
    parent: Option<&str>,
) {
    entities.push(CodeEntity {
        kind: kind.to_string(),
        name,
        start_line: node.start_position().row + 1,
        end_line: node.end_position().row + 1,
        parent: parent.map(|p| p.to_string()),
    });
}

fn child_text(node: &Node, kind: &str, source: &[u8]) -> Option<String> {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == kind {
            let text = String::from_utf8_lossy(&source[child.start_byte()..child.end_byte()]);
            if !text.is_empty() {
                return Some(text.to_string());
            }
        }
    }
    None
}

fn has_child_kind(node: &Node, kind: &str) -> bool {
    let mut cursor = node.walk();
    let found = node.children(&mut cursor).any(|c| c.kind() == kind);
    found
}
