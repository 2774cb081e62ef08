//! Per-language tree-sitter wiring for the chunker (C3, §4.3).
//!
//! Each supported language names which node kinds produce a chunk, which
//! node kinds count toward cyclomatic complexity, and which node kinds are
//! call expressions whose callee feeds `referenced_symbols`. Grammars not
//! listed here fall back to the line-based chunker (§4.3 "fallback mode").

use tree_sitter::Language as TsLanguage;

pub struct LanguageSpec {
    pub name: &'static str,
    pub grammar: fn() -> TsLanguage,
    pub chunk_kinds: &'static [&'static str],
    pub branch_kinds: &'static [&'static str],
    pub call_kinds: &'static [&'static str],
    pub import_kinds: &'static [&'static str],
    pub comment_kinds: &'static [&'static str],
}

const RUST_BRANCH: &[&str] = &[
    "if_expression",
    "while_expression",
    "loop_expression",
    "for_expression",
    "match_arm",
    "&&",
    "||",
];

const RUST_CALL: &[&str] = &["call_expression", "method_call_expression"];

fn rust_spec() -> LanguageSpec {
    LanguageSpec {
        name: "rust",
        grammar: || tree_sitter_rust::LANGUAGE.into(),
        chunk_kinds: &[
            "function_item",
            "struct_item",
            "enum_item",
            "trait_item",
            "impl_item",
            "mod_item",
        ],
        branch_kinds: RUST_BRANCH,
        call_kinds: RUST_CALL,
        import_kinds: &["use_declaration"],
        comment_kinds: &["line_comment", "block_comment"],
    }
}

fn go_spec() -> LanguageSpec {
    LanguageSpec {
        name: "go",
        grammar: || tree_sitter_go::LANGUAGE.into(),
        chunk_kinds: &[
            "function_declaration",
            "method_declaration",
            "type_declaration",
        ],
        branch_kinds: &[
            "if_statement",
            "for_statement",
            "expression_switch_statement",
            "type_switch_statement",
            "select_statement",
        ],
        call_kinds: &["call_expression"],
        import_kinds: &["import_declaration"],
        comment_kinds: &["comment"],
    }
}

fn python_spec() -> LanguageSpec {
    LanguageSpec {
        name: "python",
        grammar: || tree_sitter_python::LANGUAGE.into(),
        chunk_kinds: &["function_definition", "class_definition"],
        branch_kinds: &[
            "if_statement",
            "for_statement",
            "while_statement",
            "with_statement",
            "boolean_operator",
        ],
        call_kinds: &["call"],
        import_kinds: &["import_statement", "import_from_statement"],
        comment_kinds: &["comment"],
    }
}

fn java_spec() -> LanguageSpec {
    LanguageSpec {
        name: "java",
        grammar: || tree_sitter_java::LANGUAGE.into(),
        chunk_kinds: &[
            "class_declaration",
            "interface_declaration",
            "method_declaration",
            "enum_declaration",
        ],
        branch_kinds: &[
            "if_statement",
            "for_statement",
            "while_statement",
            "switch_expression",
        ],
        call_kinds: &["method_invocation"],
        import_kinds: &["import_declaration"],
        comment_kinds: &["line_comment", "block_comment"],
    }
}

fn typescript_spec() -> LanguageSpec {
    LanguageSpec {
        name: "typescript",
        grammar: || tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
        chunk_kinds: &[
            "function_declaration",
            "class_declaration",
            "method_definition",
            "interface_declaration",
            "type_alias_declaration",
        ],
        branch_kinds: &[
            "if_statement",
            "for_statement",
            "while_statement",
            "switch_statement",
            "&&",
            "||",
        ],
        call_kinds: &["call_expression"],
        import_kinds: &["import_statement"],
        comment_kinds: &["comment"],
    }
}

fn javascript_spec() -> LanguageSpec {
    LanguageSpec {
        name: "javascript",
        grammar: || tree_sitter_javascript::LANGUAGE.into(),
        chunk_kinds: &[
            "function_declaration",
            "class_declaration",
            "method_definition",
        ],
        branch_kinds: &[
            "if_statement",
            "for_statement",
            "while_statement",
            "switch_statement",
            "&&",
            "||",
        ],
        call_kinds: &["call_expression"],
        import_kinds: &["import_statement"],
        comment_kinds: &["comment"],
    }
}

/// Looks up the chunker's tree-sitter wiring for a language identifier
/// produced by `ignore_rules::detect_language`.
pub fn spec_for(language: &str) -> Option<LanguageSpec> {
    Some(match language {
        "rust" => rust_spec(),
        "go" => go_spec(),
        "python" => python_spec(),
        "java" => java_spec(),
        "typescript" => typescript_spec(),
        "javascript" => javascript_spec(),
        _ => return None,
    })
}
