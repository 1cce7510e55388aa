use kbase_core::KbError;
use serde::Deserialize;
use tree_sitter::{Node, Parser};

use crate::fences::CodeBlock;

/// How a code block's language is checked.
///
/// # Examples
///
/// ```
/// use kbase_validate::syntax::SnippetLanguage;
///
/// assert_eq!(SnippetLanguage::from_info("py"), Some(SnippetLanguage::Python));
/// assert_eq!(SnippetLanguage::from_info("yml"), Some(SnippetLanguage::Yaml));
/// assert_eq!(SnippetLanguage::from_info("bash"), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnippetLanguage {
    Python,
    JavaScript,
    TypeScript,
    Tsx,
    Rust,
    Go,
    Java,
    Json,
    Yaml,
    Toml,
}

impl SnippetLanguage {
    /// Map a fence info word to a checkable language.
    pub fn from_info(info: &str) -> Option<Self> {
        match info {
            "python" | "py" | "python3" => Some(SnippetLanguage::Python),
            "javascript" | "js" | "jsx" | "mjs" => Some(SnippetLanguage::JavaScript),
            "typescript" | "ts" => Some(SnippetLanguage::TypeScript),
            "tsx" => Some(SnippetLanguage::Tsx),
            "rust" | "rs" => Some(SnippetLanguage::Rust),
            "go" | "golang" => Some(SnippetLanguage::Go),
            "java" => Some(SnippetLanguage::Java),
            "json" => Some(SnippetLanguage::Json),
            "yaml" | "yml" => Some(SnippetLanguage::Yaml),
            "toml" => Some(SnippetLanguage::Toml),
            _ => None,
        }
    }

    /// Tree-sitter grammar, or `None` for data formats checked with serde.
    pub fn tree_sitter_language(&self) -> Option<tree_sitter::Language> {
        match self {
            SnippetLanguage::Python => Some(tree_sitter_python::LANGUAGE.into()),
            SnippetLanguage::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            SnippetLanguage::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            SnippetLanguage::Tsx => Some(tree_sitter_typescript::LANGUAGE_TSX.into()),
            SnippetLanguage::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            SnippetLanguage::Go => Some(tree_sitter_go::LANGUAGE.into()),
            SnippetLanguage::Java => Some(tree_sitter_java::LANGUAGE.into()),
            SnippetLanguage::Json | SnippetLanguage::Yaml | SnippetLanguage::Toml => None,
        }
    }
}

/// Outcome of checking one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntaxCheck {
    Valid,
    /// Language not checkable, or the block is empty.
    Skipped,
    Invalid {
        /// 1-based line in the Markdown file.
        line: usize,
        message: String,
    },
}

/// Check a block's syntax according to its fence language.
///
/// # Errors
///
/// Returns [`KbError::Parse`] if a tree-sitter grammar cannot be loaded.
///
/// # Examples
///
/// ```
/// use kbase_validate::fences::extract_code_blocks;
/// use kbase_validate::syntax::{check_syntax, SyntaxCheck};
///
/// let scan = extract_code_blocks("```json\n{\"a\": 1,}\n```\n");
/// let result = check_syntax(&scan.blocks[0]).unwrap();
/// assert!(matches!(result, SyntaxCheck::Invalid { line: 2, .. }));
/// ```
pub fn check_syntax(block: &CodeBlock) -> Result<SyntaxCheck, KbError> {
    let Some(language) = SnippetLanguage::from_info(&block.language) else {
        return Ok(SyntaxCheck::Skipped);
    };
    if block.content.trim().is_empty() {
        return Ok(SyntaxCheck::Skipped);
    }

    if let Some(ts_language) = language.tree_sitter_language() {
        return check_tree_sitter(block, &ts_language);
    }

    let error = match language {
        SnippetLanguage::Json => check_json(&block.content),
        SnippetLanguage::Yaml => check_yaml(&block.content),
        SnippetLanguage::Toml => check_toml(&block.content),
        _ => None,
    };

    Ok(match error {
        Some((row, message)) => SyntaxCheck::Invalid {
            line: block.markdown_line(row),
            message,
        },
        None => SyntaxCheck::Valid,
    })
}

fn check_tree_sitter(
    block: &CodeBlock,
    ts_language: &tree_sitter::Language,
) -> Result<SyntaxCheck, KbError> {
    let mut parser = Parser::new();
    parser
        .set_language(ts_language)
        .map_err(|e| KbError::Parse(format!("failed to set language: {e}")))?;

    let Some(tree) = parser.parse(&block.content, None) else {
        return Ok(SyntaxCheck::Skipped);
    };

    let root = tree.root_node();
    if !root.has_error() {
        return Ok(SyntaxCheck::Valid);
    }

    let Some(node) = first_error(root) else {
        return Ok(SyntaxCheck::Valid);
    };
    let row = node.start_position().row;
    let message = if node.is_missing() {
        format!("{} syntax error: missing `{}`", block.language, node.kind())
    } else {
        let snippet = node
            .utf8_text(block.content.as_bytes())
            .unwrap_or("")
            .lines()
            .next()
            .unwrap_or("")
            .trim();
        if snippet.is_empty() {
            format!("{} syntax error", block.language)
        } else {
            format!("{} syntax error near `{}`", block.language, truncate(snippet, 40))
        }
    };

    Ok(SyntaxCheck::Invalid {
        line: block.markdown_line(row),
        message,
    })
}

/// Depth-first search for the first ERROR or MISSING node.
fn first_error(node: Node) -> Option<Node> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(found) = first_error(child) {
            return Some(found);
        }
    }
    None
}

fn check_json(content: &str) -> Option<(usize, String)> {
    serde_json::from_str::<serde_json::Value>(content)
        .err()
        .map(|e| (e.line().saturating_sub(1), format!("invalid JSON: {e}")))
}

fn check_yaml(content: &str) -> Option<(usize, String)> {
    for document in serde_yaml::Deserializer::from_str(content) {
        if let Err(e) = serde_yaml::Value::deserialize(document) {
            let row = e.location().map(|l| l.line().saturating_sub(1)).unwrap_or(0);
            return Some((row, format!("invalid YAML: {e}")));
        }
    }
    None
}

fn check_toml(content: &str) -> Option<(usize, String)> {
    toml::from_str::<toml::Value>(content).err().map(|e| {
        let row = e
            .span()
            .map(|span| content[..span.start.min(content.len())].matches('\n').count())
            .unwrap_or(0);
        (row, format!("invalid TOML: {}", e.message()))
    })
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{cut}...")
    }
}
