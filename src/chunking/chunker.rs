//! AST walk producing semantic chunks with symbol/role/complexity metadata
//! (C3, §4.3), plus the line-based fallback and size-discipline splitting.

use std::collections::BTreeSet;

use tree_sitter::Node;
use tree_sitter::Parser;
use tree_sitter::Tree;

use super::languages::LanguageSpec;
use super::languages::spec_for;
use crate::config::ChunkingConfig;
use crate::types::Chunk;
use crate::types::ChunkType;
use crate::types::Role;

/// Imports/exports/top comments collected alongside the chunk list (§4.3
/// step 4's anchor chunk ingredients).
#[derive(Debug, Default, Clone)]
pub struct FileMetadata {
    pub imports: Vec<String>,
    pub exports: Vec<String>,
    pub top_comments: String,
}

struct RawChunk {
    kind: &'static str,
    name: String,
    parent_breadcrumb: Vec<String>,
    start_line: u32,
    end_line: u32,
    content: String,
    complexity: i32,
    call_count: usize,
    is_exported: bool,
    defined_symbols: Vec<String>,
    referenced_symbols: Vec<String>,
}

fn chunk_type_for_kind(kind: &str) -> ChunkType {
    match kind {
        "function_item" | "function_declaration" | "function_definition" => ChunkType::Function,
        "method_declaration" | "method_definition" => ChunkType::Method,
        "trait_item" | "interface_declaration" => ChunkType::Interface,
        "type_alias_declaration" | "type_declaration" => ChunkType::TypeAlias,
        "struct_item" | "class_declaration" | "class_definition" | "enum_item"
        | "enum_declaration" => ChunkType::Class,
        _ => ChunkType::Other,
    }
}

fn node_name(node: Node, src: &[u8]) -> Option<String> {
    if let Some(name_node) = node.child_by_field_name("name") {
        return name_node.utf8_text(src).ok().map(str::to_string);
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind().ends_with("identifier") {
            return child.utf8_text(src).ok().map(str::to_string);
        }
    }
    None
}

fn callee_text<'a>(call_node: Node<'a>, src: &'a [u8]) -> Option<&'a str> {
    let target = call_node
        .child_by_field_name("function")
        .or_else(|| call_node.child_by_field_name("method"))
        .unwrap_or(call_node);
    let mut node = target;
    // Unwrap field_expression/member_expression-like nodes down to the
    // trailing identifier (the callee name itself, not the receiver).
    loop {
        if node.kind().ends_with("identifier") {
            return node.utf8_text(src).ok();
        }
        if let Some(prop) = node
            .child_by_field_name("property")
            .or_else(|| node.child_by_field_name("field"))
            .or_else(|| node.child_by_field_name("attribute"))
        {
            node = prop;
            continue;
        }
        break;
    }
    node.utf8_text(src).ok()
}

fn count_descendants_of_kind(node: Node, kinds: &[&str]) -> usize {
    let mut count = 0usize;
    let mut cursor = node.walk();
    if cursor.goto_first_child() {
        loop {
            let child = cursor.node();
            if kinds.contains(&child.kind()) {
                count += 1;
            }
            count += count_descendants_of_kind(child, kinds);
            if !cursor.goto_next_sibling() {
                break;
            }
        }
    }
    count
}

fn collect_referenced_symbols(node: Node, spec: &LanguageSpec, src: &[u8]) -> Vec<String> {
    let mut set = BTreeSet::new();
    fn walk(node: Node, spec: &LanguageSpec, src: &[u8], set: &mut BTreeSet<String>) {
        let mut cursor = node.walk();
        if cursor.goto_first_child() {
            loop {
                let child = cursor.node();
                if spec.call_kinds.contains(&child.kind()) {
                    if let Some(name) = callee_text(child, src) {
                        set.insert(name.to_string());
                    }
                }
                walk(child, spec, src, set);
                if !cursor.goto_next_sibling() {
                    break;
                }
            }
        }
    }
    walk(node, spec, src, &mut set);
    set.into_iter().collect()
}

fn is_exported(spec: &LanguageSpec, node: Node, name: &str, parent_kind: Option<&str>) -> bool {
    match spec.name {
        "rust" => {
            let mut cursor = node.walk();
            node.children(&mut cursor)
                .any(|c| c.kind() == "visibility_modifier")
        }
        "go" => name.chars().next().is_some_and(|c| c.is_uppercase()),
        "python" => !name.starts_with('_'),
        "java" => {
            if let Some(mods) = node.child_by_field_name("modifiers") {
                mods.kind() == "modifiers"
            } else {
                true
            }
        }
        "typescript" | "javascript" => matches!(parent_kind, Some("export_statement")),
        _ => false,
    }
}

fn walk_chunks<'a>(
    node: Node<'a>,
    spec: &LanguageSpec,
    src: &'a [u8],
    breadcrumb: &mut Vec<String>,
    parent_kind: Option<&'static str>,
    out: &mut Vec<RawChunk>,
) {
    let mut cursor = node.walk();
    if !cursor.goto_first_child() {
        return;
    }
    loop {
        let child = cursor.node();
        let kind = child.kind();
        if spec.chunk_kinds.contains(&kind) {
            let name = node_name(child, src).unwrap_or_else(|| "<anonymous>".to_string());
            let call_count = count_descendants_of_kind(child, spec.call_kinds);
            let complexity = 1 + count_descendants_of_kind(child, spec.branch_kinds) as i32;
            let exported = is_exported(spec, child, &name, parent_kind);
            let referenced = collect_referenced_symbols(child, spec, src);
            let content = child.utf8_text(src).unwrap_or("").to_string();

            out.push(RawChunk {
                kind: leak_kind(kind),
                name: name.clone(),
                parent_breadcrumb: breadcrumb.clone(),
                start_line: child.start_position().row as u32,
                end_line: child.end_position().row as u32,
                content,
                complexity,
                call_count,
                is_exported: exported,
                defined_symbols: vec![name.clone()],
                referenced_symbols: referenced,
            });

            breadcrumb.push(name);
            walk_chunks(child, spec, src, breadcrumb, Some(leak_kind(kind)), out);
            breadcrumb.pop();
        } else {
            walk_chunks(child, spec, src, breadcrumb, Some(leak_kind(kind)), out);
        }
        if !cursor.goto_next_sibling() {
            break;
        }
    }
}

/// `chunk_kinds`/`branch_kinds` etc. are `&'static str` already (they come
/// from the static `LanguageSpec` tables); this just threads that lifetime
/// through without an extra allocation.
fn leak_kind(kind: &str) -> &'static str {
    // Safe in practice: `kind` always originates from a node whose grammar
    // constant strings are 'static; tree-sitter's `kind()` returns a
    // borrowed str tied to the tree, not actually 'static, so we intern
    // through the known kind tables instead of transmuting.
    match kind {
        "function_item" => "function_item",
        "struct_item" => "struct_item",
        "enum_item" => "enum_item",
        "trait_item" => "trait_item",
        "impl_item" => "impl_item",
        "mod_item" => "mod_item",
        "function_declaration" => "function_declaration",
        "method_declaration" => "method_declaration",
        "type_declaration" => "type_declaration",
        "function_definition" => "function_definition",
        "class_definition" => "class_definition",
        "class_declaration" => "class_declaration",
        "interface_declaration" => "interface_declaration",
        "enum_declaration" => "enum_declaration",
        "method_definition" => "method_definition",
        "type_alias_declaration" => "type_alias_declaration",
        _ => "other",
    }
}

fn assign_role(complexity: i32, call_count: usize, kind: &str, is_exported: bool) -> Role {
    if complexity >= 6 && call_count >= 2 {
        Role::Orchestration
    } else if matches!(
        kind,
        "struct_item"
            | "enum_item"
            | "trait_item"
            | "interface_declaration"
            | "enum_declaration"
            | "type_alias_declaration"
            | "type_declaration"
    ) || (is_exported && complexity <= 2)
    {
        Role::Definition
    } else {
        Role::Implementation
    }
}

fn make_display_text(path: &str, breadcrumb: &[String], content: &str) -> String {
    if breadcrumb.is_empty() {
        format!("{path}\n{content}")
    } else {
        format!("{path}\n{}\n\n{content}", breadcrumb.join(" > "))
    }
}

fn collect_imports(root: Node, spec: &LanguageSpec, src: &[u8]) -> Vec<String> {
    let mut out = Vec::new();
    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        if spec.import_kinds.contains(&child.kind()) {
            if let Ok(text) = child.utf8_text(src) {
                out.push(text.trim().to_string());
            }
        }
    }
    out
}

fn collect_top_comments(root: Node, spec: &LanguageSpec, src: &[u8]) -> String {
    let mut lines = Vec::new();
    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        if spec.comment_kinds.contains(&child.kind()) {
            if let Ok(text) = child.utf8_text(src) {
                lines.push(text.trim().to_string());
            }
        } else if child.kind() != "\n" {
            break;
        }
    }
    lines.join("\n")
}

fn parse(spec: &LanguageSpec, content: &str) -> Option<Tree> {
    let mut parser = Parser::new();
    parser.set_language(&(spec.grammar)()).ok()?;
    parser.parse(content, None)
}

/// Splits an oversized chunk at line boundaries with a small overlap,
/// bounded additionally by `MAX_CHUNK_CHARS` for pathological single lines
/// (§4.3 "Size discipline").
fn split_oversized(
    path: &str,
    hash: &str,
    breadcrumb: &[String],
    raw: &RawChunk,
    config: &ChunkingConfig,
    next_index: &mut i32,
    out: &mut Vec<Chunk>,
) {
    let lines: Vec<&str> = raw.content.lines().collect();
    let mut start = 0usize;
    while start < lines.len() {
        let mut end = (start + config.max_chunk_lines).min(lines.len());
        let mut piece = lines[start..end].join("\n");
        while piece.len() > config.max_chunk_chars && end > start + 1 {
            end -= 1;
            piece = lines[start..end].join("\n");
        }
        if piece.len() > config.max_chunk_chars {
            piece.truncate(config.max_chunk_chars);
        }
        let chunk_index = *next_index;
        *next_index += 1;
        out.push(Chunk {
            id: format!("{path}#{chunk_index}"),
            path: path.to_string(),
            hash: hash.to_string(),
            chunk_index,
            start_line: raw.start_line + start as u32,
            end_line: raw.start_line + end.saturating_sub(1) as u32,
            content: piece.clone(),
            display_text: make_display_text(path, breadcrumb, &piece),
            context_prev: None,
            context_next: None,
            chunk_type: chunk_type_for_kind(raw.kind),
            is_anchor: false,
            parent_symbol: breadcrumb.last().cloned(),
            role: assign_role(raw.complexity, raw.call_count, raw.kind, raw.is_exported),
            complexity: raw.complexity,
            is_exported: raw.is_exported,
            defined_symbols: raw.defined_symbols.clone(),
            referenced_symbols: raw.referenced_symbols.clone(),
            imports: vec![],
            exports: vec![],
        });
        if end >= lines.len() {
            break;
        }
        start = end.saturating_sub(config.overlap_lines).max(start + 1);
    }
}

/// Tree-sitter AST walk, returning `None` if the language isn't supported
/// or the parse failed, in which case callers fall back to line chunking.
pub fn chunk_with_ast(
    path: &str,
    content: &str,
    language: &str,
    hash: &str,
    config: &ChunkingConfig,
) -> Option<(Vec<Chunk>, FileMetadata)> {
    let spec = spec_for(language)?;
    let tree = parse(&spec, content)?;
    let root = tree.root_node();
    let src = content.as_bytes();

    let mut raw_chunks = Vec::new();
    let mut breadcrumb = Vec::new();
    walk_chunks(root, &spec, src, &mut breadcrumb, None, &mut raw_chunks);

    let imports = collect_imports(root, &spec, src);
    let top_comments = collect_top_comments(root, &spec, src);

    let mut chunks = Vec::new();
    let mut next_index = 0i32;
    let mut exports = Vec::new();
    for raw in &raw_chunks {
        if raw.is_exported {
            exports.push(raw.name.clone());
        }
        let oversized =
            raw.content.lines().count() > config.max_chunk_lines || raw.content.len() > config.max_chunk_chars;
        if oversized {
            split_oversized(
                path,
                hash,
                &raw.parent_breadcrumb,
                raw,
                config,
                &mut next_index,
                &mut chunks,
            );
            continue;
        }
        let chunk_index = next_index;
        next_index += 1;
        chunks.push(Chunk {
            id: format!("{path}#{chunk_index}"),
            path: path.to_string(),
            hash: hash.to_string(),
            chunk_index,
            start_line: raw.start_line,
            end_line: raw.end_line,
            content: raw.content.clone(),
            display_text: make_display_text(path, &raw.parent_breadcrumb, &raw.content),
            context_prev: None,
            context_next: None,
            chunk_type: chunk_type_for_kind(raw.kind),
            is_anchor: false,
            parent_symbol: raw.parent_breadcrumb.last().cloned(),
            role: assign_role(raw.complexity, raw.call_count, raw.kind, raw.is_exported),
            complexity: raw.complexity,
            is_exported: raw.is_exported,
            defined_symbols: raw.defined_symbols.clone(),
            referenced_symbols: raw.referenced_symbols.clone(),
            imports: imports.clone(),
            exports: vec![],
        });
    }

    Some((
        chunks,
        FileMetadata {
            imports,
            exports,
            top_comments,
        },
    ))
}

/// Line-based fallback for languages without a grammar (§4.3 "Size
/// discipline", fallback mode): fixed windows with overlap.
pub fn chunk_with_fallback(
    path: &str,
    content: &str,
    hash: &str,
    config: &ChunkingConfig,
) -> (Vec<Chunk>, FileMetadata) {
    let lines: Vec<&str> = content.lines().collect();
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut chunk_index = 0i32;
    if lines.is_empty() {
        return (chunks, FileMetadata::default());
    }
    while start < lines.len() {
        let mut end = (start + config.max_chunk_lines).min(lines.len());
        let mut piece = lines[start..end].join("\n");
        while piece.len() > config.max_chunk_chars && end > start + 1 {
            end -= 1;
            piece = lines[start..end].join("\n");
        }
        if piece.len() > config.max_chunk_chars {
            piece.truncate(config.max_chunk_chars);
        }
        chunks.push(Chunk {
            id: format!("{path}#{chunk_index}"),
            path: path.to_string(),
            hash: hash.to_string(),
            chunk_index,
            start_line: start as u32,
            end_line: end.saturating_sub(1) as u32,
            content: piece.clone(),
            display_text: format!("{path}\n{piece}"),
            context_prev: None,
            context_next: None,
            chunk_type: ChunkType::Other,
            is_anchor: false,
            parent_symbol: None,
            role: Role::Implementation,
            complexity: 1,
            is_exported: false,
            defined_symbols: vec![],
            referenced_symbols: vec![],
            imports: vec![],
            exports: vec![],
        });
        chunk_index += 1;
        if end >= lines.len() {
            break;
        }
        start = end.saturating_sub(config.overlap_lines).max(start + 1);
    }
    (chunks, FileMetadata::default())
}

/// Synthesizes the one anchor chunk per file (§4.3 step 4, I7): imports,
/// top-level exports, and leading comments, `chunk_index = -1`.
pub fn make_anchor_chunk(path: &str, hash: &str, metadata: &FileMetadata) -> Chunk {
    let mut content = String::new();
    if !metadata.top_comments.is_empty() {
        content.push_str(&metadata.top_comments);
        content.push_str("\n\n");
    }
    if !metadata.imports.is_empty() {
        content.push_str("imports:\n");
        for import in &metadata.imports {
            content.push_str("  ");
            content.push_str(import);
            content.push('\n');
        }
    }
    if !metadata.exports.is_empty() {
        content.push_str("exports: ");
        content.push_str(&metadata.exports.join(", "));
        content.push('\n');
    }
    Chunk {
        id: format!("{path}#anchor"),
        path: path.to_string(),
        hash: hash.to_string(),
        chunk_index: -1,
        start_line: 0,
        end_line: 0,
        content: content.clone(),
        display_text: format!("{path}\n{content}"),
        context_prev: None,
        context_next: None,
        chunk_type: ChunkType::Anchor,
        is_anchor: true,
        parent_symbol: None,
        role: Role::Definition,
        complexity: 0,
        is_exported: false,
        defined_symbols: vec![],
        referenced_symbols: vec![],
        imports: metadata.imports.clone(),
        exports: metadata.exports.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkingConfig;

    fn cfg() -> ChunkingConfig {
        ChunkingConfig::default()
    }

    #[test]
    fn rust_function_chunk_has_defined_symbol_and_callee() {
        let src = "pub fn foo() { bar(); }\nfn bar() {}\n";
        let (chunks, _meta) = chunk_with_ast("src/a.rs", src, "rust", "h1", &cfg()).unwrap();
        let foo = chunks.iter().find(|c| c.defined_symbols == ["foo"]).unwrap();
        assert!(foo.is_exported);
        assert!(foo.referenced_symbols.contains(&"bar".to_string()));
        let bar = chunks.iter().find(|c| c.defined_symbols == ["bar"]).unwrap();
        assert!(!bar.is_exported);
    }

    #[test]
    fn anchor_chunk_is_flagged_and_indexed_minus_one() {
        let src = "use std::fmt;\n\npub fn foo() {}\n";
        let (_chunks, meta) = chunk_with_ast("src/a.rs", src, "rust", "h1", &cfg()).unwrap();
        let anchor = make_anchor_chunk("src/a.rs", "h1", &meta);
        assert!(anchor.is_anchor);
        assert_eq!(anchor.chunk_index, -1);
        assert!(anchor.imports.iter().any(|i| i.contains("std::fmt")));
    }

    #[test]
    fn fallback_preserves_all_lines_with_overlap() {
        let content = (0..500)
            .map(|i| format!("line {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let (chunks, _meta) = chunk_with_fallback("a.proto", &content, "h1", &cfg());
        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].start_line, 0);
        assert!(chunks.last().unwrap().end_line >= 499);
    }

    #[test]
    fn unsupported_language_returns_none_for_ast_path() {
        assert!(chunk_with_ast("a.proto", "message Foo {}", "proto", "h1", &cfg()).is_none());
    }

    #[test]
    fn orchestration_role_needs_complexity_and_calls() {
        let src = r#"
pub fn dispatch(x: i32) -> i32 {
    if x > 0 {
        helper_a();
    } else if x < 0 {
        helper_b();
    } else if x == 0 {
        helper_c();
    }
    for i in 0..x {
        helper_d(i);
    }
    while x > 10 {
        helper_e();
    }
    x
}
fn helper_a() {}
fn helper_b() {}
fn helper_c() {}
fn helper_d(_i: i32) {}
fn helper_e() {}
"#;
        let (chunks, _meta) = chunk_with_ast("src/b.rs", src, "rust", "h2", &cfg()).unwrap();
        let dispatch = chunks
            .iter()
            .find(|c| c.defined_symbols == ["dispatch"])
            .unwrap();
        assert_eq!(dispatch.role, Role::Orchestration);
    }
}
