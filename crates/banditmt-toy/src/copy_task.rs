//! Copy task: the target sentence repeats the source sentence.

use banditmt::data::{Dataset, Sentence, Vocabulary};
use banditmt::engine::Decoder;
use banditmt::Result;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Words the toy sentences are drawn from.
pub const TOY_WORDS: &[&str] = &["the", "cat", "dog", "sat", "ran", "on", "mat", "home"];

pub const MIN_LENGTH: usize = 2;
pub const MAX_LENGTH: usize = 5;

/// Enough room for the longest sentence and its `</s>`.
pub const MAX_OUTPUT_LEN: usize = MAX_LENGTH + 1;

pub fn toy_vocabulary() -> Vocabulary {
    Vocabulary::from_wordlist(TOY_WORDS.iter().copied())
}

/// Decoder generating the `target` series over the toy vocabulary.
pub fn toy_decoder() -> Decoder {
    Decoder::new("decoder", "target", toy_vocabulary(), MAX_OUTPUT_LEN)
}

/// Random sentences of `MIN_LENGTH..=MAX_LENGTH` toy words.
pub fn random_sentences(size: usize, seed: u64) -> Vec<Sentence> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..size)
        .map(|_| {
            let length = rng.gen_range(MIN_LENGTH..=MAX_LENGTH);
            (0..length)
                .map(|_| TOY_WORDS[rng.gen_range(0..TOY_WORDS.len())].to_string())
                .collect()
        })
        .collect()
}

/// Dataset with identical `source` and `target` series.
pub fn copy_dataset(name: &str, size: usize, seed: u64) -> Result<Dataset> {
    let sentences = random_sentences(size, seed);
    Dataset::new(name)
        .with_series("source", sentences.clone())?
        .with_series("target", sentences)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_dataset_is_aligned() {
        let dataset = copy_dataset("train", 10, 3).unwrap();
        assert_eq!(dataset.len(), 10);
        assert_eq!(
            dataset.get_series("source").unwrap(),
            dataset.get_series("target").unwrap()
        );
        for sentence in dataset.get_series("source").unwrap() {
            assert!((MIN_LENGTH..=MAX_LENGTH).contains(&sentence.len()));
        }
    }

    #[test]
    fn test_seeded() {
        assert_eq!(random_sentences(5, 1), random_sentences(5, 1));
        assert_ne!(random_sentences(5, 1), random_sentences(5, 2));
    }

    #[test]
    fn test_vocabulary_covers_words() {
        let vocab = toy_vocabulary();
        assert!(TOY_WORDS.iter().all(|w| vocab.contains(w)));
        assert_eq!(vocab.len(), TOY_WORDS.len() + 4);
    }
}
