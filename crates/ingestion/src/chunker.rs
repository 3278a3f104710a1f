//! Deterministic document chunking
//!
//! The same function runs when embedding shards are built and again when
//! chunk text is reconstructed during materialization, so it must be a pure
//! function of its inputs: identical `(doc_id, doc_type, text, max_chars,
//! overlap_chars)` always produce identical chunk ids, texts, and offsets.
//! Offsets and lengths are counted in characters.

use biograph_common::models::Chunk;

/// Chunking-parameter tag embedded in a run id, e.g. `mc3500-ov300`.
pub fn chunking_signature(max_chars: usize, overlap_chars: usize) -> String {
    format!("mc{}-ov{}", max_chars, overlap_chars)
}

/// Whether a shard run id was produced with the given chunking parameters.
pub fn signature_matches(run_id: &str, max_chars: usize, overlap_chars: usize) -> bool {
    run_id.contains(&chunking_signature(max_chars, overlap_chars))
}

/// Split into sentences at whitespace runs that follow `.`, `!` or `?`.
/// Each sentence keeps its terminal punctuation; empty pieces are dropped.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.trim().chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') && chars.peek().is_some_and(|n| n.is_whitespace()) {
            while chars.peek().is_some_and(|n| n.is_whitespace()) {
                chars.next();
            }
            let sentence = current.trim().to_string();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            current.clear();
        }
    }

    let sentence = current.trim().to_string();
    if !sentence.is_empty() {
        sentences.push(sentence);
    }
    sentences
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Last `n` characters of `s`
fn char_suffix(s: &str, n: usize) -> String {
    let len = char_len(s);
    s.chars().skip(len.saturating_sub(n)).collect()
}

/// Chunk a document into bounded, overlapping slices.
///
/// Text at or under `max_chars` becomes the single chunk `{doc_id}#0`.
/// Longer text is split into sentences and accumulated greedily; when the
/// next sentence would overflow, the current chunk is emitted and the next
/// one starts with the last `overlap_chars` characters of it. The start
/// offset of chunk k+1 is `prev_end - len(overlap)`.
pub fn chunk_document(
    doc_id: &str,
    doc_type: &str,
    text: &str,
    max_chars: usize,
    overlap_chars: usize,
) -> Vec<Chunk> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if char_len(text) <= max_chars {
        return vec![Chunk {
            chunk_id: format!("{}#0", doc_id),
            doc_id: doc_id.to_string(),
            doc_type: doc_type.to_string(),
            chunk_index: 0,
            text: text.to_string(),
            start_offset: 0,
            end_offset: char_len(text),
        }];
    }

    let sentences = split_sentences(text);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut start = 0usize;
    let mut index = 0usize;

    for sentence in &sentences {
        let candidate = if current.is_empty() {
            sentence.clone()
        } else {
            format!("{} {}", current, sentence)
        };

        if !current.is_empty() && char_len(&candidate) > max_chars {
            let end = start + char_len(&current);
            chunks.push(Chunk {
                chunk_id: format!("{}#{}", doc_id, index),
                doc_id: doc_id.to_string(),
                doc_type: doc_type.to_string(),
                chunk_index: index,
                text: current.clone(),
                start_offset: start,
                end_offset: end,
            });
            index += 1;

            let overlap = char_suffix(&current, overlap_chars);
            start = end.saturating_sub(char_len(&overlap));
            current = format!("{} {}", overlap, sentence).trim().to_string();
        } else {
            current = candidate;
        }
    }

    if !current.is_empty() {
        let end = start + char_len(&current);
        chunks.push(Chunk {
            chunk_id: format!("{}#{}", doc_id, index),
            doc_id: doc_id.to_string(),
            doc_type: doc_type.to_string(),
            chunk_index: index,
            text: current,
            start_offset: start,
            end_offset: end,
        });
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 90 sentences of exactly 100 chars, joined by single spaces
    fn synthetic_doc() -> String {
        let sentences: Vec<String> = (0..90)
            .map(|i| format!("Sentence {:03} {}.", i, "x".repeat(86)))
            .collect();
        sentences.join(" ")
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = chunk_document("PMID:1", "paper", "A short abstract.", 3500, 300);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_id, "PMID:1#0");
        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks[0].end_offset, 17);
    }

    #[test]
    fn test_empty_text_no_chunks() {
        assert!(chunk_document("PMID:1", "paper", "   ", 3500, 300).is_empty());
    }

    #[test]
    fn test_split_sentences_keeps_punctuation() {
        let sentences = split_sentences("One. Two!  Three? Four");
        assert_eq!(sentences, vec!["One.", "Two!", "Three?", "Four"]);
    }

    #[test]
    fn test_long_doc_chunk_count_and_offsets() {
        let text = synthetic_doc();
        assert_eq!(text.chars().count(), 9089);

        let chunks = chunk_document("PMID:9", "paper", &text, 3500, 300);
        assert_eq!(chunks.len(), 3);

        // Monotone offsets
        for pair in chunks.windows(2) {
            assert!(pair[1].start_offset > pair[0].start_offset);
        }

        // Adjacent chunks share the last 300 characters
        for pair in chunks.windows(2) {
            let overlap = char_suffix(&pair[0].text, 300);
            assert!(pair[1].text.starts_with(&overlap));
        }

        // Ids are sequential per document
        let ids: Vec<&str> = chunks.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["PMID:9#0", "PMID:9#1", "PMID:9#2"]);

        // Offsets follow prev_end - overlap
        for pair in chunks.windows(2) {
            assert_eq!(pair[1].start_offset, pair[0].end_offset - 300);
        }
    }

    #[test]
    fn test_chunking_is_pure() {
        let text = synthetic_doc();
        let first = chunk_document("PMID:9", "paper", &text, 3500, 300);
        let second = chunk_document("PMID:9", "paper", &text, 3500, 300);
        assert_eq!(first, second);
    }

    #[test]
    fn test_different_params_change_ids_not_format() {
        let text = synthetic_doc();
        let chunks = chunk_document("PMID:9", "paper", &text, 2000, 100);
        assert!(chunks.len() > 3);
        assert!(chunks.iter().all(|c| c.chunk_id.starts_with("PMID:9#")));
    }

    #[test]
    fn test_signature() {
        let run_id = format!("20260501T120000Z-{}", chunking_signature(3500, 300));
        assert!(signature_matches(&run_id, 3500, 300));
        assert!(!signature_matches(&run_id, 2000, 300));
    }
}
