//! Markdown chunker (C3).
//!
//! Splits markdown into chunks no larger than `chunk_size` characters, except
//! when a single fenced code region is itself longer — in which case the
//! fenced region is kept intact and the chunk is allowed to exceed the limit.
//! Cut points prefer, in order: the last paragraph break, the last sentence
//! terminator, then the hard window edge — and only honor a paragraph/sentence
//! break if it falls past 30% of the window, to avoid tiny fragments.

/// Cut points before this fraction of the window are ignored.
const MIN_CUT_FRACTION: f64 = 0.3;

/// Splits `markdown` into an ordered list of chunks. Concatenating the
/// returned chunks reproduces `markdown` exactly; see invariant 2 (reconstruction).
pub fn chunk(markdown: &str, chunk_size: usize) -> Vec<String> {
    if markdown.trim().is_empty() {
        return Vec::new();
    }
    assert!(chunk_size > 0, "chunk_size must be > 0");

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let len = markdown.len();

    while start < len {
        let remaining = &markdown[start..];
        if remaining.len() <= chunk_size {
            chunks.push(remaining.to_string());
            break;
        }

        let mut window_end = floor_char_boundary(markdown, start + chunk_size);
        let window = &markdown[start..window_end];

        if window.matches("```").count() % 2 != 0 {
            // Odd fence count: the window ends mid-fence. Extend to the next
            // closing fence so no chunk starts or ends inside one.
            window_end = match markdown[window_end..].find("```") {
                Some(rel) => window_end + rel + 3,
                None => len,
            };
            chunks.push(markdown[start..window_end].to_string());
            start = window_end;
            continue;
        }

        let threshold = (chunk_size as f64 * MIN_CUT_FRACTION) as usize;
        let cut = last_paragraph_break(window, threshold)
            .or_else(|| last_sentence_end(window, threshold))
            .unwrap_or(window.len());

        let end = start + cut;
        chunks.push(markdown[start..end].to_string());
        start = end;
    }

    chunks
}

/// Last `\n\n` in `window`, inclusive of the break itself, if it falls past `threshold`.
fn last_paragraph_break(window: &str, threshold: usize) -> Option<usize> {
    let pos = window.rfind("\n\n")?;
    if pos >= threshold {
        Some(pos + 2)
    } else {
        None
    }
}

/// Last `.`, `!`, or `?` followed by a space in `window`, if it falls past `threshold`.
fn last_sentence_end(window: &str, threshold: usize) -> Option<usize> {
    let bytes = window.as_bytes();
    for i in (0..bytes.len().saturating_sub(1)).rev() {
        let c = bytes[i];
        if (c == b'.' || c == b'!' || c == b'?') && bytes[i + 1] == b' ' {
            let cut = i + 2;
            if cut >= threshold {
                return Some(cut);
            }
            return None;
        }
    }
    None
}

/// Steps back from `index` until it lands on a UTF-8 char boundary of `s`.
fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Header breadcrumbs plus size stats for a single chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionInfo {
    /// Every line matching `^#+\s+.+$`, joined with `"; "`, in document order.
    pub headers: String,
    pub char_count: usize,
    pub word_count: usize,
}

/// Computes [`SectionInfo`] for a chunk of markdown.
pub fn section_info(chunk: &str) -> SectionInfo {
    let headers: Vec<&str> = chunk
        .lines()
        .filter(|line| is_header_line(line))
        .map(|line| line.trim())
        .collect();

    SectionInfo {
        headers: headers.join("; "),
        char_count: chunk.chars().count(),
        word_count: chunk.split_whitespace().count(),
    }
}

fn is_header_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|c| *c == '#').count();
    if hashes == 0 {
        return false;
    }
    let rest = &trimmed[hashes..];
    rest.starts_with(' ') && !rest.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_whitespace_only_produce_no_chunks() {
        assert!(chunk("", 100).is_empty());
        assert!(chunk("   \n\n  ", 100).is_empty());
    }

    #[test]
    fn reconstruction_preserves_whitespace() {
        let text = "First paragraph.\n\nSecond paragraph is a bit longer here.\n\nThird.";
        let chunks = chunk(text, 30);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn small_input_is_a_single_chunk() {
        let chunks = chunk("hello world", 1000);
        assert_eq!(chunks, vec!["hello world".to_string()]);
    }

    #[test]
    fn every_chunk_has_balanced_fences() {
        let text = "a".repeat(2500)
            + "\n```python\n"
            + &"x=1\n".repeat(200)
            + "```\n"
            + &"b".repeat(300);
        let chunks = chunk(&text, 1500);
        assert!(chunks.len() >= 2);
        for c in &chunks {
            assert_eq!(c.matches("```").count() % 2, 0, "unbalanced fence in {c}");
        }
        assert_eq!(chunks.concat(), text);
        // the fenced block appears intact within exactly one chunk
        let with_fence: Vec<&String> = chunks.iter().filter(|c| c.contains("```python")).collect();
        assert_eq!(with_fence.len(), 1);
        assert!(with_fence[0].contains("```python") && with_fence[0].trim_end().ends_with("```"));
    }

    #[test]
    fn respects_chunk_size_outside_fences() {
        let text = (0..50)
            .map(|i| format!("Paragraph number {i} with some extra words to pad it out."))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk(&text, 200);
        assert!(chunks.len() > 1);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn oversized_fence_is_permitted_to_exceed_chunk_size() {
        let text = format!("intro\n\n```\n{}\n```\n", "y".repeat(5000));
        let chunks = chunk(&text, 100);
        assert!(chunks.iter().any(|c| c.len() > 100));
        for c in &chunks {
            assert_eq!(c.matches("```").count() % 2, 0);
        }
    }

    #[test]
    fn section_info_collects_headers_in_order() {
        let text = "# Title\n\nSome text.\n\n## Sub\n\nMore text here.";
        let info = section_info(text);
        assert_eq!(info.headers, "# Title; ## Sub");
        assert!(info.word_count > 0);
        assert_eq!(info.char_count, text.chars().count());
    }

    #[test]
    fn small_cut_candidates_below_threshold_are_ignored() {
        // A paragraph break right at the start of the window should not be used;
        // the chunker should fall through toward the hard edge instead.
        let text = format!("{}\n\n{}", "x".repeat(5), "y".repeat(200));
        let chunks = chunk(&text, 100);
        assert_eq!(chunks.concat(), text);
    }
}
