//! Syntax-tree chunker.
//!
//! Parses recognised languages with tree-sitter and emits one chunk per
//! semantic unit (function, class, struct, …), without descending into an
//! emitted unit's subtree. Failure is reported as a typed outcome so the
//! caller can pick the line-window fallback explicitly.

use tree_sitter::Language;
use tree_sitter::Node;
use tree_sitter::Parser;

use crate::types::CodeChunk;

/// Result of a syntax chunking attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    /// Parse succeeded; chunks extracted (possibly a single `module` chunk)
    Parsed(Vec<CodeChunk>),
    /// Parser unavailable or parsing failed; caller should fall back
    ParseFailed { reason: String },
}

/// Node kinds treated as semantic units, per language.
fn semantic_node_types(language: &str) -> Option<&'static [&'static str]> {
    match language {
        "python" => Some(&[
            "function_definition",
            "class_definition",
            "async_function_definition",
        ]),
        "javascript" => Some(&[
            "function_declaration",
            "class_declaration",
            "method_definition",
            "arrow_function",
            "function_expression",
        ]),
        "typescript" => Some(&[
            "function_declaration",
            "class_declaration",
            "method_definition",
            "arrow_function",
            "function_expression",
            "interface_declaration",
            "type_alias_declaration",
        ]),
        "go" => Some(&[
            "function_declaration",
            "method_declaration",
            "type_declaration",
        ]),
        // The grammar spells functions "function_item"; both spellings are
        // accepted.
        "rust" => Some(&[
            "function_definition",
            "function_item",
            "struct_item",
            "enum_item",
            "impl_item",
            "trait_item",
        ]),
        "java" => Some(&[
            "method_declaration",
            "class_declaration",
            "interface_declaration",
            "enum_declaration",
        ]),
        "c" => Some(&["function_definition", "struct_specifier", "enum_specifier"]),
        "cpp" => Some(&[
            "function_definition",
            "class_specifier",
            "struct_specifier",
            "namespace_definition",
        ]),
        _ => None,
    }
}

fn tree_sitter_language(language: &str) -> Option<Language> {
    match language {
        "python" => Some(tree_sitter_python::LANGUAGE.into()),
        "javascript" => Some(tree_sitter_javascript::LANGUAGE.into()),
        "typescript" => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
        "go" => Some(tree_sitter_go::LANGUAGE.into()),
        "rust" => Some(tree_sitter_rust::LANGUAGE.into()),
        "java" => Some(tree_sitter_java::LANGUAGE.into()),
        "c" => Some(tree_sitter_c::LANGUAGE.into()),
        "cpp" => Some(tree_sitter_cpp::LANGUAGE.into()),
        _ => None,
    }
}

/// Node kinds that carry a usable symbol name.
const NAME_KINDS: &[&str] = &[
    "identifier",
    "name",
    "property_identifier",
    "type_identifier",
    "field_identifier",
];

/// Syntax-tree chunker over the supported language set.
#[derive(Debug, Default)]
pub struct SyntaxChunker;

impl SyntaxChunker {
    pub fn new() -> Self {
        Self
    }

    /// Whether a syntax parser exists for this language tag.
    pub fn is_language_supported(language: &str) -> bool {
        tree_sitter_language(language).is_some()
    }

    /// Chunk a file by syntax-tree traversal.
    ///
    /// Semantic units use a relaxed size floor of
    /// `max(20, min_chunk_size / 5)` so small functions are kept. A parse
    /// that emits nothing on a non-empty file produces one whole-file
    /// `module` chunk.
    pub fn chunk_file(
        &self,
        content: &str,
        path: &str,
        language: &str,
        _max_chunk_size: usize,
        min_chunk_size: usize,
    ) -> ChunkOutcome {
        let Some(ts_language) = tree_sitter_language(language) else {
            return ChunkOutcome::ParseFailed {
                reason: format!("unsupported language: {language}"),
            };
        };
        let Some(semantic_types) = semantic_node_types(language) else {
            return ChunkOutcome::ParseFailed {
                reason: format!("no semantic node set for: {language}"),
            };
        };

        let mut parser = Parser::new();
        if let Err(e) = parser.set_language(&ts_language) {
            return ChunkOutcome::ParseFailed {
                reason: format!("parser rejected grammar: {e}"),
            };
        }

        let Some(tree) = parser.parse(content, None) else {
            return ChunkOutcome::ParseFailed {
                reason: "parse returned no tree".to_string(),
            };
        };

        let effective_min = std::cmp::max(20, min_chunk_size / 5);
        let mut chunks = Vec::new();
        visit_node(
            tree.root_node(),
            content,
            path,
            language,
            semantic_types,
            effective_min,
            &mut chunks,
        );

        if chunks.is_empty() && !content.trim().is_empty() {
            chunks.push(CodeChunk {
                content: content.to_string(),
                path: path.to_string(),
                start_line: 1,
                end_line: (content.matches('\n').count() + 1) as i64,
                language: language.to_string(),
                chunk_type: "module".to_string(),
                name: None,
            });
        }

        ChunkOutcome::Parsed(chunks)
    }
}

/// Depth-first traversal: emit at semantic nodes, recurse elsewhere.
fn visit_node(
    node: Node<'_>,
    content: &str,
    path: &str,
    language: &str,
    semantic_types: &[&str],
    effective_min: usize,
    chunks: &mut Vec<CodeChunk>,
) {
    if semantic_types.contains(&node.kind()) {
        let chunk_content = &content[node.start_byte()..node.end_byte()];
        if chunk_content.len() >= effective_min {
            chunks.push(CodeChunk {
                content: chunk_content.to_string(),
                path: path.to_string(),
                start_line: (node.start_position().row + 1) as i64,
                end_line: (node.end_position().row + 1) as i64,
                language: language.to_string(),
                chunk_type: chunk_type_of(node.kind()),
                name: node_name(node, content),
            });
        }
        // Do not descend: the unit owns its subtree.
        return;
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        visit_node(
            child,
            content,
            path,
            language,
            semantic_types,
            effective_min,
            chunks,
        );
    }
}

/// Node kind with the canonical suffix stripped.
fn chunk_type_of(kind: &str) -> String {
    for suffix in ["_definition", "_declaration", "_item"] {
        if let Some(stripped) = kind.strip_suffix(suffix) {
            return stripped.to_string();
        }
    }
    kind.to_string()
}

/// First identifier-like child, preferring the grammar's `name` field.
fn node_name(node: Node<'_>, content: &str) -> Option<String> {
    if let Some(name_node) = node.child_by_field_name("name") {
        return node_text(name_node, content);
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if NAME_KINDS.contains(&child.kind()) {
            return node_text(child, content);
        }
    }
    None
}

fn node_text(node: Node<'_>, content: &str) -> Option<String> {
    content
        .get(node.start_byte()..node.end_byte())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn chunk(content: &str, language: &str) -> Vec<CodeChunk> {
        match SyntaxChunker::new().chunk_file(content, "/repo/file", language, 1500, 100) {
            ChunkOutcome::Parsed(chunks) => chunks,
            ChunkOutcome::ParseFailed { reason } => panic!("parse failed: {reason}"),
        }
    }

    #[test]
    fn python_functions_become_chunks() {
        let content = "def main():\n    print(\"hello\")\n\n\ndef helper():\n    return 42\n";
        let chunks = chunk(content, "python");

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chunk_type, "function");
        assert_eq!(chunks[0].name.as_deref(), Some("main"));
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[1].name.as_deref(), Some("helper"));
    }

    #[test]
    fn python_class_is_one_chunk_without_descent() {
        let content = "class Greeter:\n    def greet(self):\n        return 'hi'\n\n    def wave(self):\n        return 'o/'\n";
        let chunks = chunk(content, "python");

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_type, "class");
        assert_eq!(chunks[0].name.as_deref(), Some("Greeter"));
    }

    #[test]
    fn rust_items_become_chunks() {
        let content = "pub struct Config {\n    pub name: String,\n}\n\nfn load() -> Config {\n    Config { name: String::new() }\n}\n";
        let chunks = chunk(content, "rust");

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chunk_type, "struct");
        assert_eq!(chunks[0].name.as_deref(), Some("Config"));
        assert_eq!(chunks[1].chunk_type, "function");
        assert_eq!(chunks[1].name.as_deref(), Some("load"));
    }

    #[test]
    fn go_functions_become_chunks() {
        let content = "package main\n\nfunc Add(a int, b int) int {\n\treturn a + b\n}\n";
        let chunks = chunk(content, "go");

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_type, "function");
        assert_eq!(chunks[0].name.as_deref(), Some("Add"));
    }

    #[test]
    fn tiny_semantic_units_below_floor_are_dropped() {
        // 12 characters, below the relaxed floor of max(20, 100/5) = 20.
        // With no other unit, the whole file becomes a module chunk.
        let content = "def f(): ...";
        let chunks = chunk(content, "python");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_type, "module");
    }

    #[test]
    fn file_without_semantic_units_becomes_module_chunk() {
        let content = "x = 1\ny = 2\nprint(x + y)\n";
        let chunks = chunk(content, "python");

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_type, "module");
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 4);
    }

    #[test]
    fn unsupported_language_reports_parse_failed() {
        let outcome = SyntaxChunker::new().chunk_file("body {}\n", "/repo/a.css", "css", 1500, 100);
        assert!(matches!(outcome, ChunkOutcome::ParseFailed { .. }));
    }

    #[test]
    fn line_numbers_are_one_based_inclusive() {
        let content = "# leading comment\n\ndef later():\n    return 'positioned'\n";
        let chunks = chunk(content, "python");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_line, 3);
        assert_eq!(chunks[0].end_line, 4);
    }
}
