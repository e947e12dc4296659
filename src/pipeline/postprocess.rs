//! Cleanup of raw model output before it is checkpointed.
//!
//! Chunk outputs are concatenated later, so each one must be a clean
//! Markdown fragment: no wrapping fence, LF line endings, no trailing
//! blanks. Rules run in order; each is a pure `&str -> String` pass.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all cleanup rules:
/// 1. Strip an outer ```` ```markdown ```` fence the model added anyway
/// 2. Normalise line endings (CRLF/CR → LF)
/// 3. Trim trailing whitespace per line
/// 4. Collapse 3+ consecutive blank lines down to one blank line
/// 5. Trim leading/trailing blank lines of the fragment
pub fn clean_fragment(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = strip_outer_fence(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    s.trim_matches('\n').to_string()
}

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(markdown|md)?[ \t]*\n(.*?)\n```[ \t]*$").unwrap());

static RE_BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

/// A bare ```` ``` ```` opener is only an outer wrapper when the body has no
/// fence lines of its own; otherwise it opens a code block that the last
/// line closes.
fn strip_outer_fence(input: &str) -> String {
    let Some(caps) = RE_OUTER_FENCE.captures(input.trim()) else {
        return input.to_string();
    };
    let body = &caps[2];
    let tagged = caps.get(1).is_some();
    if tagged || !body.lines().any(|l| l.trim_start().starts_with("```")) {
        body.to_string()
    } else {
        input.to_string()
    }
}

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_RUN.replace_all(input, "\n\n").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_markdown_fence() {
        let raw = "```markdown\n# Title\n\nBody\n```\n";
        assert_eq!(clean_fragment(raw), "# Title\n\nBody");
    }

    #[test]
    fn keeps_inner_code_fences() {
        let raw = "# API\n\n```rust\nfn main() {}\n```";
        assert_eq!(clean_fragment(raw), raw);
    }

    #[test]
    fn strips_bare_fence_without_inner_blocks() {
        assert_eq!(clean_fragment("```\n# Title\n```"), "# Title");
    }

    #[test]
    fn leading_and_trailing_code_blocks_survive() {
        let raw = "```\nmake build\n```\n\nThen deploy:\n\n```\nmake deploy\n```";
        assert_eq!(clean_fragment(raw), raw);
    }

    #[test]
    fn tagged_fence_is_stripped_around_inner_blocks() {
        let raw = "```markdown\n# API\n\n```rust\nfn main() {}\n```\n```";
        assert_eq!(clean_fragment(raw), "# API\n\n```rust\nfn main() {}\n```");
    }

    #[test]
    fn crlf_and_trailing_spaces() {
        assert_eq!(clean_fragment("a  \r\nb\t\r\n"), "a\nb");
    }

    #[test]
    fn collapses_blank_runs() {
        assert_eq!(clean_fragment("a\n\n\n\n\nb"), "a\n\nb");
    }

    #[test]
    fn whitespace_only_becomes_empty() {
        assert_eq!(clean_fragment(" \n\n \n"), "");
    }
}
