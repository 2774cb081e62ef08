//! Formatter (C13, §4.13): text and JSON rendering of search results and
//! traces, grounded in the teacher's `repomap/renderer.rs` tree-rendering
//! shape (file header + per-symbol lines), adapted to this spec's
//! snippet-stripping and truncation rules.

use serde::Serialize;

use crate::types::Chunk;
use crate::types::SearchResult;
use crate::types::TraceResult;

const MAX_SNIPPET_LINES: usize = 15;
const MAX_SYMBOLS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Strips leading header comments and import blocks from a chunk's
/// display text before it's shown as a snippet (§4.13).
fn strip_header(display_text: &str) -> &str {
    let mut start = 0;
    for line in display_text.lines() {
        let trimmed = line.trim_start();
        let is_header = trimmed.is_empty()
            || trimmed.starts_with("//")
            || trimmed.starts_with('#')
            || trimmed.starts_with("use ")
            || trimmed.starts_with("import ")
            || trimmed.starts_with("from ")
            || trimmed.starts_with("/*")
            || trimmed.starts_with('*');
        if is_header {
            start += line.len() + 1;
        } else {
            break;
        }
    }
    if start >= display_text.len() { display_text } else { &display_text[start..] }
}

/// Truncates `text` to at most `max_lines`, appending a `+N more` footer
/// when lines were dropped (§4.13).
fn truncate_lines(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= max_lines {
        return text.to_string();
    }
    let mut out = lines[..max_lines].join("\n");
    out.push_str(&format!("\n+{} more", lines.len() - max_lines));
    out
}

fn truncate_symbols(symbols: &[String]) -> Vec<String> {
    if symbols.len() <= MAX_SYMBOLS {
        return symbols.to_vec();
    }
    let mut out: Vec<String> = symbols[..MAX_SYMBOLS].to_vec();
    out.push(format!("+{} more", symbols.len() - MAX_SYMBOLS));
    out
}

fn snippet_for(chunk: &Chunk) -> String {
    let stripped = strip_header(&chunk.display_text);
    truncate_lines(stripped, MAX_SNIPPET_LINES)
}

/// `{path, hash, is_anchor}` (§6 "Persisted JSON shapes").
#[derive(Serialize)]
struct JsonMetadata {
    path: String,
    hash: String,
    is_anchor: bool,
}

/// `{start_line, end_line, num_lines, type}` (§6).
#[derive(Serialize)]
struct JsonGeneratedMetadata {
    start_line: u32,
    end_line: u32,
    num_lines: u32,
    #[serde(rename = "type")]
    chunk_type: String,
}

/// One search result item in the normative persisted shape (§6):
/// `{type:"text", text, score, confidence, metadata, generated_metadata,
/// complexity, is_exported, role, parent_symbol, defined_symbols[],
/// referenced_symbols[], imports[], exports[]}`.
#[derive(Serialize)]
struct JsonSearchItem {
    #[serde(rename = "type")]
    item_type: &'static str,
    text: String,
    score: f32,
    confidence: String,
    metadata: JsonMetadata,
    generated_metadata: JsonGeneratedMetadata,
    complexity: i32,
    is_exported: bool,
    role: String,
    parent_symbol: Option<String>,
    defined_symbols: Vec<String>,
    referenced_symbols: Vec<String>,
    imports: Vec<String>,
    exports: Vec<String>,
}

fn to_json_item(result: &SearchResult) -> JsonSearchItem {
    let chunk = &result.chunk;
    JsonSearchItem {
        item_type: "text",
        text: snippet_for(chunk),
        score: result.score_out,
        confidence: format!("{:?}", result.confidence).to_lowercase(),
        metadata: JsonMetadata {
            path: chunk.path.clone(),
            hash: chunk.hash.clone(),
            is_anchor: chunk.is_anchor,
        },
        generated_metadata: JsonGeneratedMetadata {
            start_line: chunk.start_line,
            end_line: chunk.end_line,
            num_lines: chunk.num_lines(),
            chunk_type: chunk.chunk_type.as_str().to_string(),
        },
        complexity: chunk.complexity,
        is_exported: chunk.is_exported,
        role: chunk.role.as_str().to_lowercase(),
        parent_symbol: chunk.parent_symbol.clone(),
        defined_symbols: truncate_symbols(&chunk.defined_symbols),
        referenced_symbols: truncate_symbols(&chunk.referenced_symbols),
        imports: chunk.imports.clone(),
        exports: chunk.exports.clone(),
    }
}

pub fn render_search_results(results: &[SearchResult], format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => {
            let out: Vec<JsonSearchItem> = results.iter().map(to_json_item).collect();
            serde_json::to_string_pretty(&out).unwrap_or_default()
        }
        OutputFormat::Text => {
            let mut out = String::new();
            for r in results {
                out.push_str(&format!(
                    "{}:{}-{}  [{:?}, {:.2}]\n",
                    r.chunk.path, r.chunk.start_line, r.chunk.end_line, r.confidence, r.score_out
                ));
                for line in snippet_for(&r.chunk).lines() {
                    out.push_str("    ");
                    out.push_str(line);
                    out.push('\n');
                }
                out.push('\n');
            }
            out.trim_end().to_string()
        }
    }
}

pub fn render_trace(trace: &TraceResult, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(trace).unwrap_or_default(),
        OutputFormat::Text => {
            let mut out = String::new();
            match &trace.center {
                Some(c) => out.push_str(&format!("{} — {}:{} ({:?})\n\n", trace.symbol, c.file, c.line, c.role)),
                None => out.push_str(&format!("{} — no definition found\n\n", trace.symbol)),
            }
            out.push_str("callers:\n");
            if trace.callers.is_empty() {
                out.push_str("  (none)\n");
            }
            for caller in &trace.callers {
                out.push_str(&format!("  {} — {}:{}\n", caller.symbol, caller.file, caller.line));
            }
            out.push_str("\ncallees:\n");
            if trace.callees.is_empty() {
                out.push_str("  (none)\n");
            }
            for callee in truncate_symbols(&trace.callees) {
                out.push_str(&format!("  {callee}\n"));
            }
            out.trim_end().to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChunkType;
    use crate::types::Confidence;
    use crate::types::Role;

    fn chunk_with_text(text: &str) -> Chunk {
        Chunk {
            id: "1".into(),
            path: "a.rs".into(),
            hash: "h".into(),
            chunk_index: 0,
            start_line: 1,
            end_line: 2,
            content: text.to_string(),
            display_text: text.to_string(),
            context_prev: None,
            context_next: None,
            chunk_type: ChunkType::Function,
            is_anchor: false,
            parent_symbol: None,
            role: Role::Implementation,
            complexity: 1,
            is_exported: true,
            defined_symbols: vec!["f".into()],
            referenced_symbols: vec![],
            imports: vec![],
            exports: vec![],
        }
    }

    #[test]
    fn strip_header_removes_leading_comments_and_imports() {
        let text = "// header\nuse std::fmt;\n\nfn f() {}\n";
        assert_eq!(strip_header(text), "fn f() {}\n");
    }

    #[test]
    fn truncate_lines_adds_footer_when_over_limit() {
        let text = (0..20).map(|i| format!("line{i}")).collect::<Vec<_>>().join("\n");
        let out = truncate_lines(&text, 15);
        assert!(out.ends_with("+5 more"));
        assert_eq!(out.lines().count(), 16);
    }

    #[test]
    fn render_text_includes_path_and_snippet() {
        let chunk = chunk_with_text("fn f() {}\n");
        let result = SearchResult { chunk, score: 1.0, score_out: 1.0, confidence: Confidence::High };
        let text = render_search_results(std::slice::from_ref(&result), OutputFormat::Text);
        assert!(text.contains("a.rs:1-2"));
        assert!(text.contains("fn f()"));
    }

    #[test]
    fn render_json_is_parseable() {
        let chunk = chunk_with_text("fn f() {}\n");
        let result = SearchResult { chunk, score: 1.0, score_out: 1.0, confidence: Confidence::High };
        let json = render_search_results(std::slice::from_ref(&result), OutputFormat::Json);
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0]["metadata"]["path"], "a.rs");
        assert_eq!(parsed[0]["type"], "text");
    }
}
