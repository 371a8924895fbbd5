//! Groups word-level engine timings into chunk views. The same buffer/flush
//! scan produces both the phrase view and the word view; only the
//! parameters differ.

use crate::model::{Chunk, Timestamp, TranscriptionVariants, TranscriptionView, WordEntry};

#[derive(Debug, Clone)]
pub struct SegmenterParams {
    pub min_words: usize,
    pub max_words: usize,
    /// Inter-word gap beyond which the current buffer is force-flushed.
    pub max_gap_seconds: f64,
    pub min_duration_seconds: Option<f64>,
    pub max_duration_seconds: Option<f64>,
}

impl SegmenterParams {
    pub fn phrase_defaults() -> Self {
        Self {
            min_words: 5,
            max_words: 9,
            max_gap_seconds: 1.5,
            min_duration_seconds: Some(1.0),
            max_duration_seconds: Some(4.5),
        }
    }

    pub fn word_defaults() -> Self {
        Self {
            min_words: 1,
            max_words: 1,
            max_gap_seconds: 1.5,
            min_duration_seconds: None,
            max_duration_seconds: None,
        }
    }
}

const NO_SPACE_BEFORE: &str = ".,!?;:)]»\"'’";
const SENTENCE_FINAL: [char; 4] = ['.', '!', '?', '…'];

/// Joins word texts with standard subtitle spacing: closing punctuation and
/// apostrophes attach to the previous word; nothing follows an opening
/// parenthesis or a trailing dash.
pub fn join_words<'a, I>(words: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut out = String::new();
    for raw in words {
        let word = raw.trim();
        if word.is_empty() {
            continue;
        }
        if !out.is_empty() {
            let attaches = word
                .chars()
                .next()
                .map(|first| NO_SPACE_BEFORE.contains(first))
                .unwrap_or(false);
            if !attaches && !out.ends_with('(') && !out.ends_with('-') {
                out.push(' ');
            }
        }
        out.push_str(word);
    }
    out
}

fn ends_sentence(text: &str) -> bool {
    text.trim_end().ends_with(&SENTENCE_FINAL[..])
}

fn flush_buffer(buffer: &mut Vec<WordEntry>, chunks: &mut Vec<Chunk>) {
    if buffer.is_empty() {
        return;
    }
    let start = buffer[0].start;
    let end = buffer.iter().map(|w| w.end).fold(start, f64::max);
    let text = join_words(buffer.iter().map(|w| w.text.as_str()));
    if !text.is_empty() {
        chunks.push(Chunk {
            text,
            timestamp: Timestamp(start, end),
        });
    }
    buffer.clear();
}

/// Groups `words` (sorted ascending by start) into chunks. Every input word
/// lands in exactly one chunk; empty input yields no chunks.
pub fn group_words(words: &[WordEntry], params: &SegmenterParams) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut buffer: Vec<WordEntry> = Vec::new();

    for (index, word) in words.iter().enumerate() {
        buffer.push(word.clone());

        let start = buffer[0].start;
        let end = buffer.iter().map(|w| w.end).fold(start, f64::max);
        let duration = end - start;
        let reached_min_duration = params
            .min_duration_seconds
            .map(|min| duration >= min)
            .unwrap_or(true);

        let flush = match words.get(index + 1) {
            None => true,
            Some(next) => {
                let gap = next.start - word.end;
                if gap > params.max_gap_seconds {
                    true
                } else if buffer.len() >= params.max_words {
                    true
                } else if params
                    .max_duration_seconds
                    .map(|max| duration >= max)
                    .unwrap_or(false)
                {
                    true
                } else if params
                    .max_duration_seconds
                    .map(|max| next.end - start > max)
                    .unwrap_or(false)
                    && reached_min_duration
                {
                    true
                } else {
                    reached_min_duration
                        && buffer.len() >= params.min_words
                        && ends_sentence(&word.text)
                }
            }
        };

        if flush {
            flush_buffer(&mut buffer, &mut chunks);
        }
    }

    chunks
}

/// Builds the three views of one transcription. `engine_text` is the
/// canonical transcription text reported by the engine.
pub fn build_variants(
    engine_text: &str,
    words: &[WordEntry],
    phrase_params: &SegmenterParams,
    word_params: &SegmenterParams,
) -> TranscriptionVariants {
    let full_text = engine_text.trim().to_string();
    TranscriptionVariants {
        plain: TranscriptionView {
            full_text: full_text.clone(),
            chunks: Vec::new(),
        },
        phrases: TranscriptionView {
            full_text: full_text.clone(),
            chunks: group_words(words, phrase_params),
        },
        words: TranscriptionView {
            full_text: full_text.clone(),
            chunks: group_words(words, word_params),
        },
        full_text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str, start: f64, end: f64) -> WordEntry {
        WordEntry {
            text: text.to_string(),
            start,
            end,
        }
    }

    fn evenly_spaced(texts: &[&str], step: f64) -> Vec<WordEntry> {
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| word(text, i as f64 * step, i as f64 * step + step * 0.8))
            .collect()
    }

    fn word_count(chunk: &Chunk) -> usize {
        chunk.text.split_whitespace().count()
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(group_words(&[], &SegmenterParams::phrase_defaults()).is_empty());
    }

    #[test]
    fn single_word_produces_single_chunk() {
        let words = vec![word("hello", 0.4, 0.9)];
        let chunks = group_words(&words, &SegmenterParams::phrase_defaults());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "hello");
        assert_eq!(chunks[0].timestamp, Timestamp(0.4, 0.9));
    }

    #[test]
    fn every_word_lands_in_exactly_one_chunk() {
        let texts = [
            "the", "quick", "brown", "fox", "jumps", "over", "the", "lazy", "dog", "and", "runs",
            "far", "away", "today",
        ];
        let words = evenly_spaced(&texts, 0.4);
        let phrase = group_words(&words, &SegmenterParams::phrase_defaults());
        let per_word = group_words(&words, &SegmenterParams::word_defaults());

        let phrase_total: usize = phrase.iter().map(word_count).sum();
        let word_total: usize = per_word.iter().map(word_count).sum();
        assert_eq!(phrase_total, texts.len());
        assert_eq!(word_total, texts.len());
        assert_eq!(per_word.len(), texts.len());

        let joined: Vec<String> = phrase.iter().map(|c| c.text.clone()).collect();
        assert_eq!(joined.join(" "), texts.join(" "));
    }

    #[test]
    fn gap_forces_flush_before_min_words() {
        let words = vec![
            word("wait", 0.0, 0.4),
            word("here", 0.5, 0.9),
            // 2.6 s of silence
            word("okay", 3.5, 3.9),
            word("go", 4.0, 4.4),
        ];
        let chunks = group_words(&words, &SegmenterParams::phrase_defaults());
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "wait here");
        assert_eq!(chunks[1].text, "okay go");
    }

    #[test]
    fn last_word_flushes_regardless_of_thresholds() {
        let words = vec![word("one", 0.0, 0.2), word("two", 0.3, 0.5)];
        let chunks = group_words(&words, &SegmenterParams::phrase_defaults());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "one two");
    }

    #[test]
    fn max_words_bounds_chunk_size() {
        let texts: Vec<String> = (0..30).map(|i| format!("w{i}")).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let words = evenly_spaced(&refs, 0.1);
        let params = SegmenterParams {
            min_duration_seconds: None,
            max_duration_seconds: None,
            ..SegmenterParams::phrase_defaults()
        };
        let chunks = group_words(&words, &params);
        assert!(chunks.iter().all(|c| word_count(c) <= params.max_words));
    }

    #[test]
    fn sentence_final_punctuation_flushes_after_min() {
        let words = evenly_spaced(
            &["today", "we", "walk", "to", "school.", "then", "we", "eat", "lunch", "outside."],
            0.4,
        );
        let chunks = group_words(&words, &SegmenterParams::phrase_defaults());
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text.ends_with("school."));
    }

    #[test]
    fn join_words_applies_punctuation_spacing() {
        assert_eq!(join_words(["hello", ",", "world", "!"]), "hello, world!");
        assert_eq!(join_words(["(", "aside", ")"]), "(aside)");
        assert_eq!(join_words(["don", "'t", "stop"]), "don't stop");
        assert_eq!(join_words(["co-", "operate"]), "co-operate");
    }

    #[test]
    fn variants_share_full_text() {
        let words = evenly_spaced(&["hello", "world"], 0.5);
        let variants = build_variants(
            "  hello world ",
            &words,
            &SegmenterParams::phrase_defaults(),
            &SegmenterParams::word_defaults(),
        );
        assert_eq!(variants.full_text, "hello world");
        assert_eq!(variants.plain.full_text, variants.phrases.full_text);
        assert_eq!(variants.phrases.full_text, variants.words.full_text);
        assert!(variants.plain.chunks.is_empty());
        assert_eq!(variants.words.chunks.len(), 2);
    }

    #[test]
    fn word_view_timestamps_match_input_words() {
        let words = vec![word("hi", 1.0, 1.5)];
        let variants = build_variants(
            "hi",
            &words,
            &SegmenterParams::phrase_defaults(),
            &SegmenterParams::word_defaults(),
        );
        assert_eq!(variants.words.chunks[0].timestamp, Timestamp(1.0, 1.5));
        assert_eq!(variants.phrases.chunks[0].timestamp, Timestamp(1.0, 1.5));
    }
}
