/// A fenced code block extracted from Markdown.
///
/// # Examples
///
/// ```
/// use kbase_validate::fences::extract_code_blocks;
///
/// let md = "Intro\n\n```python\nprint('hi')\n```\n";
/// let scan = extract_code_blocks(md);
/// assert_eq!(scan.blocks.len(), 1);
/// assert_eq!(scan.blocks[0].language, "python");
/// assert_eq!(scan.blocks[0].start_line, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    /// First word of the info string, lower-cased. Empty when absent.
    pub language: String,
    /// 1-based line of the opening fence.
    pub start_line: usize,
    /// 1-based line of the closing fence (last line of the file if unterminated).
    pub end_line: usize,
    /// Lines between the fences, joined with `\n`.
    pub content: String,
}

impl CodeBlock {
    /// Markdown line of the given 0-based row inside the block.
    pub fn markdown_line(&self, row: usize) -> usize {
        self.start_line + 1 + row
    }
}

/// Result of scanning a Markdown document for fences.
#[derive(Debug, Clone, Default)]
pub struct FenceScan {
    pub blocks: Vec<CodeBlock>,
    /// Opening line of a fence that never closed.
    pub unterminated: Option<usize>,
}

impl FenceScan {
    /// `true` if the 1-based `line` lies inside a fence (fence lines included).
    pub fn is_fenced(&self, line: usize) -> bool {
        self.blocks
            .iter()
            .any(|b| line >= b.start_line && line <= b.end_line)
    }
}

struct OpenFence {
    marker: char,
    len: usize,
    language: String,
    start_line: usize,
    lines: Vec<String>,
}

/// Extract every ``` / ~~~ fenced block.
///
/// A fence closes on a line holding only the same marker character repeated
/// at least as many times as the opener. An unterminated block still counts
/// as a block running to the end of the file.
pub fn extract_code_blocks(markdown: &str) -> FenceScan {
    let mut scan = FenceScan::default();
    let mut open: Option<OpenFence> = None;
    let mut last_line = 0;

    for (idx, line) in markdown.lines().enumerate() {
        let line_no = idx + 1;
        last_line = line_no;
        let trimmed = line.trim_start();

        match open.as_mut() {
            None => {
                if let Some((marker, len, info)) = parse_opener(trimmed) {
                    open = Some(OpenFence {
                        marker,
                        len,
                        language: info
                            .split_whitespace()
                            .next()
                            .unwrap_or("")
                            .to_lowercase(),
                        start_line: line_no,
                        lines: Vec::new(),
                    });
                }
            }
            Some(fence) => {
                if is_closer(trimmed, fence.marker, fence.len) {
                    if let Some(fence) = open.take() {
                        scan.blocks.push(CodeBlock {
                            language: fence.language,
                            start_line: fence.start_line,
                            end_line: line_no,
                            content: fence.lines.join("\n"),
                        });
                    }
                } else {
                    fence.lines.push(line.to_string());
                }
            }
        }
    }

    if let Some(fence) = open {
        scan.unterminated = Some(fence.start_line);
        scan.blocks.push(CodeBlock {
            language: fence.language,
            start_line: fence.start_line,
            end_line: last_line.max(fence.start_line),
            content: fence.lines.join("\n"),
        });
    }

    scan
}

fn parse_opener(line: &str) -> Option<(char, usize, &str)> {
    let marker = line.chars().next().filter(|c| *c == '`' || *c == '~')?;
    let len = line.chars().take_while(|c| *c == marker).count();
    if len < 3 {
        return None;
    }
    let info = line[len..].trim();
    // A backtick fence's info string may not contain backticks (inline code).
    if marker == '`' && info.contains('`') {
        return None;
    }
    Some((marker, len, info))
}

fn is_closer(line: &str, marker: char, len: usize) -> bool {
    let line = line.trim_end();
    line.len() >= len && line.chars().all(|c| c == marker)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backtick_and_tilde_fences() {
        let md = "# T\n```rust\nfn main() {}\n```\n\n~~~yaml\na: 1\n~~~\n";
        let scan = extract_code_blocks(md);
        assert_eq!(scan.blocks.len(), 2);
        assert_eq!(scan.blocks[0].language, "rust");
        assert_eq!(scan.blocks[0].content, "fn main() {}");
        assert_eq!(scan.blocks[1].language, "yaml");
        assert_eq!(scan.blocks[1].start_line, 6);
        assert!(scan.unterminated.is_none());
    }

    #[test]
    fn info_string_first_word_lowercased() {
        let scan = extract_code_blocks("```Python title=\"x.py\"\npass\n```\n");
        assert_eq!(scan.blocks[0].language, "python");
    }

    #[test]
    fn longer_fence_contains_shorter_one() {
        let md = "````markdown\n```python\nx = 1\n```\n````\n";
        let scan = extract_code_blocks(md);
        assert_eq!(scan.blocks.len(), 1);
        assert_eq!(scan.blocks[0].language, "markdown");
        assert!(scan.blocks[0].content.contains("```python"));
    }

    #[test]
    fn tilde_does_not_close_backtick_fence() {
        let md = "```\na\n~~~\nb\n```\n";
        let scan = extract_code_blocks(md);
        assert_eq!(scan.blocks[0].content, "a\n~~~\nb");
    }

    #[test]
    fn unterminated_fence_is_reported() {
        let md = "text\n```js\nlet a = 1;\n";
        let scan = extract_code_blocks(md);
        assert_eq!(scan.unterminated, Some(2));
        assert_eq!(scan.blocks.len(), 1);
        assert!(scan.is_fenced(3));
        assert!(!scan.is_fenced(1));
    }

    #[test]
    fn inline_code_is_not_a_fence() {
        let scan = extract_code_blocks("use ```a``` inline\n");
        assert!(scan.blocks.is_empty());
    }

    #[test]
    fn markdown_line_maps_rows() {
        let scan = extract_code_blocks("a\nb\n```py\nx\ny\n```\n");
        assert_eq!(scan.blocks[0].markdown_line(0), 4);
        assert_eq!(scan.blocks[0].markdown_line(1), 5);
    }
}
