//! Text chunking for retrieval
//!
//! Splits raw document text into bounded, overlapping retrieval units.
//! Markdown headers act as semantic boundaries when present; sections
//! larger than the configured size fall back to fixed-size sliding
//! windows over whitespace tokens. Pure functions, no I/O.

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::OnceLock;
use tracing::debug;

/// Configuration for text chunking
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Target chunk size in whitespace tokens
    pub chunk_size: usize,
    /// Overlap between consecutive chunks, in the same unit
    pub overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            overlap: 50,
        }
    }
}

/// A bounded span of source text prepared for embedding.
///
/// Immutable once created; identified by `(source_id, sequence_index)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub source_id: String,
    pub sequence_index: usize,
    /// Byte range of this chunk within the input text
    pub char_range: Range<usize>,
}

/// Byte span of one whitespace-delimited token
#[derive(Debug, Clone, Copy)]
struct Token {
    start: usize,
    end: usize,
}

fn frontmatter_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\A---\s*\n.*?\n---\s*\n?").expect("valid regex"))
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").expect("valid regex"))
}

fn blank_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n\s*\n").expect("valid regex"))
}

fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^#{1,6}[ \t]").expect("valid regex"))
}

/// Best-effort Markdown/MDX cleanup: strips leading YAML frontmatter,
/// removes inline HTML/JSX tags, and collapses blank-line runs.
/// Not a full parser.
pub fn clean_markdown(content: &str) -> String {
    let without_frontmatter = frontmatter_re().replace(content, "");
    let without_tags = tag_re().replace_all(&without_frontmatter, "");
    let collapsed = blank_run_re().replace_all(&without_tags, "\n\n");
    collapsed.trim().to_string()
}

/// Split text into chunks for embedding.
///
/// Ordered, finite and deterministic. Header-delimited sections are
/// chunked independently; within a section a sliding window of
/// `chunk_size` tokens advances by `chunk_size - overlap` tokens, so the
/// trailing `overlap` tokens of one chunk reopen the next. Every output
/// chunk is non-empty and every input token lands in at least one chunk.
/// Empty input yields an empty vector.
pub fn chunk(text: &str, source_id: &str, config: &ChunkerConfig) -> Vec<Chunk> {
    let chunk_size = config.chunk_size.max(1);

    let mut chunks = Vec::new();
    let mut sequence_index = 0;

    for section in split_sections(text) {
        let tokens = tokenize(&text[section.clone()]);
        if tokens.is_empty() {
            continue;
        }

        // Window step; a forced advance of one token guarantees progress
        // even when overlap >= chunk_size.
        let step = chunk_size.saturating_sub(config.overlap).max(1);

        let mut start = 0;
        loop {
            let end = (start + chunk_size).min(tokens.len());
            let byte_start = section.start + tokens[start].start;
            let byte_end = section.start + tokens[end - 1].end;

            chunks.push(Chunk {
                text: text[byte_start..byte_end].to_string(),
                source_id: source_id.to_string(),
                sequence_index,
                char_range: byte_start..byte_end,
            });
            sequence_index += 1;

            if end == tokens.len() {
                break;
            }
            start += step;
        }
    }

    debug!(
        source_id,
        input_len = text.len(),
        chunk_count = chunks.len(),
        chunk_size,
        overlap = config.overlap,
        "Text chunked"
    );

    chunks
}

/// Byte ranges of header-delimited sections, in order. Text before the
/// first header is its own section; without headers the whole input is
/// one section.
fn split_sections(text: &str) -> Vec<Range<usize>> {
    let starts: Vec<usize> = header_re().find_iter(text).map(|m| m.start()).collect();
    if starts.is_empty() {
        return vec![0..text.len()];
    }

    let mut sections = Vec::with_capacity(starts.len() + 1);
    if starts[0] > 0 {
        sections.push(0..starts[0]);
    }
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(text.len());
        sections.push(start..end);
    }
    sections
}

/// Whitespace tokenizer preserving byte offsets
fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;

    for (i, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if let Some(s) = start.take() {
                tokens.push(Token { start: s, end: i });
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        tokens.push(Token {
            start: s,
            end: text.len(),
        });
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(chunk: &Chunk) -> Vec<&str> {
        chunk.text.split_whitespace().collect()
    }

    #[test]
    fn test_empty_input() {
        let chunks = chunk("", "doc", &ChunkerConfig::default());
        assert!(chunks.is_empty());

        let chunks = chunk("   \n\t  ", "doc", &ChunkerConfig::default());
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_single_chunk_when_under_budget() {
        let text = "one two three four";
        let chunks = chunk(
            text,
            "doc",
            &ChunkerConfig {
                chunk_size: 10,
                overlap: 2,
            },
        );
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
        assert_eq!(chunks[0].sequence_index, 0);
        assert_eq!(chunks[0].char_range, 0..text.len());
    }

    #[test]
    fn test_overlap_copies_trailing_tokens() {
        let text = "a b c d e f g h";
        let chunks = chunk(
            text,
            "doc",
            &ChunkerConfig {
                chunk_size: 4,
                overlap: 2,
            },
        );
        // windows: [a..d], [c..f], [e..h]
        assert_eq!(chunks.len(), 3);
        assert_eq!(words(&chunks[0]), ["a", "b", "c", "d"]);
        assert_eq!(words(&chunks[1]), ["c", "d", "e", "f"]);
        assert_eq!(words(&chunks[2]), ["e", "f", "g", "h"]);
    }

    #[test]
    fn test_coverage_with_overlap_removed() {
        let text = "the quick brown fox jumps over the lazy dog again and again";
        let config = ChunkerConfig {
            chunk_size: 5,
            overlap: 2,
        };
        let chunks = chunk(text, "doc", &config);
        assert!(chunks.len() > 1);

        // Dropping the overlapping prefix of each follow-up chunk must
        // reconstruct the full token stream.
        let mut rebuilt: Vec<&str> = words(&chunks[0]);
        for c in &chunks[1..] {
            let w = words(c);
            let skip = config.overlap.min(w.len());
            rebuilt.extend(&w[skip..]);
        }
        let original: Vec<&str> = text.split_whitespace().collect();
        assert_eq!(rebuilt, original);
    }

    #[test]
    fn test_terminates_when_overlap_exceeds_chunk_size() {
        let text = "w1 w2 w3 w4 w5 w6";
        let chunks = chunk(
            text,
            "doc",
            &ChunkerConfig {
                chunk_size: 2,
                overlap: 5,
            },
        );
        // Forced one-token advance: still finite, still covers the input.
        assert_eq!(chunks.len(), 5);
        assert_eq!(words(chunks.last().unwrap()), ["w5", "w6"]);
    }

    #[test]
    fn test_oversized_single_token_is_kept() {
        let long_word = "x".repeat(4000);
        let chunks = chunk(
            &long_word,
            "doc",
            &ChunkerConfig {
                chunk_size: 5,
                overlap: 1,
            },
        );
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, long_word);
    }

    #[test]
    fn test_determinism() {
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa";
        let config = ChunkerConfig {
            chunk_size: 3,
            overlap: 1,
        };
        let first = chunk(text, "doc", &config);
        let second = chunk(text, "doc", &config);
        assert_eq!(first, second);
    }

    #[test]
    fn test_headers_start_new_chunks() {
        let text = "# Intro\nros2 basics here\n## Nodes\nnodes talk over topics";
        let chunks = chunk(
            text,
            "ch1",
            &ChunkerConfig {
                chunk_size: 50,
                overlap: 5,
            },
        );
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text.starts_with("# Intro"));
        assert!(chunks[1].text.starts_with("## Nodes"));
        assert_eq!(chunks[1].sequence_index, 1);
    }

    #[test]
    fn test_char_ranges_index_into_input() {
        let text = "# Title\nsome body text follows here";
        let chunks = chunk(text, "doc", &ChunkerConfig::default());
        for c in &chunks {
            assert_eq!(&text[c.char_range.clone()], c.text);
        }
    }

    #[test]
    fn test_clean_markdown_strips_frontmatter() {
        let raw = "---\nid: ch1\ntitle: Intro\n---\n\n# Intro\n\nBody text.";
        let cleaned = clean_markdown(raw);
        assert!(!cleaned.contains("id: ch1"));
        assert!(cleaned.starts_with("# Intro"));
        assert!(cleaned.contains("Body text."));
    }

    #[test]
    fn test_clean_markdown_strips_tags_and_blank_runs() {
        let raw = "Intro <Tabs>\n\n\n\nparagraph</Tabs> end";
        let cleaned = clean_markdown(raw);
        assert!(!cleaned.contains('<'));
        assert!(!cleaned.contains("\n\n\n"));
    }

    #[test]
    fn test_no_frontmatter_untouched() {
        let raw = "# Plain\ncontent --- with dashes";
        assert_eq!(clean_markdown(raw), raw);
    }
}
