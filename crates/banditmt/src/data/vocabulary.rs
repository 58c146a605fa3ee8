//! Token <-> id mapping.

use super::dataset::{Dataset, Sentence};
use crate::Result;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const PAD_TOKEN: &str = "<pad>";
pub const START_TOKEN: &str = "<s>";
pub const END_TOKEN: &str = "</s>";
pub const UNK_TOKEN: &str = "<unk>";

const PAD_ID: u32 = 0;
const END_ID: u32 = 2;
const UNK_ID: u32 = 3;

/// Vocabulary with reserved ids: `<pad>`=0, `<s>`=1, `</s>`=2, `<unk>`=3.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Vocabulary {
    tokens: Vec<String>,
    #[serde(skip)]
    index: HashMap<String, u32>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::from_wordlist(std::iter::empty::<String>())
    }
}

impl Vocabulary {
    /// Build from a word list; duplicates and reserved tokens are ignored.
    pub fn from_wordlist<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut vocab = Self {
            tokens: Vec::new(),
            index: HashMap::new(),
        };
        for reserved in [PAD_TOKEN, START_TOKEN, END_TOKEN, UNK_TOKEN] {
            vocab.add(reserved.to_string());
        }
        for word in words {
            vocab.add(word.into());
        }
        vocab
    }

    /// Build from the given series of several datasets, most frequent first.
    ///
    /// Ties keep first-seen order. `max_size` counts the reserved tokens.
    pub fn from_datasets(datasets: &[&Dataset], series: &[&str], max_size: usize) -> Result<Self> {
        let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
        let mut seen = 0;
        for dataset in datasets {
            for id in series {
                for sentence in dataset.get_series(id)? {
                    for token in sentence {
                        let entry = counts.entry(token.as_str()).or_insert((0, seen));
                        entry.0 += 1;
                        seen += 1;
                    }
                }
            }
        }
        let mut ranked: Vec<(&str, (usize, usize))> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));

        let room = max_size.saturating_sub(4);
        Ok(Self::from_wordlist(
            ranked.into_iter().take(room).map(|(token, _)| token.to_string()),
        ))
    }

    fn add(&mut self, token: String) {
        if !self.index.contains_key(&token) {
            self.index.insert(token.clone(), self.tokens.len() as u32);
            self.tokens.push(token);
        }
    }

    /// Rebuild the lookup table after deserialization.
    pub fn reindex(&mut self) {
        self.index = self
            .tokens
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i as u32))
            .collect();
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn end_id(&self) -> u32 {
        END_ID
    }

    pub fn pad_id(&self) -> u32 {
        PAD_ID
    }

    pub fn contains(&self, token: &str) -> bool {
        self.index.contains_key(token)
    }

    pub fn token_to_id(&self, token: &str) -> u32 {
        self.index.get(token).copied().unwrap_or(UNK_ID)
    }

    pub fn id_to_token(&self, id: u32) -> &str {
        self.tokens
            .get(id as usize)
            .map(String::as_str)
            .unwrap_or(UNK_TOKEN)
    }

    /// Encode sentences as a time x batch id matrix, `</s>`-terminated and padded.
    pub fn sentences_to_tensor(&self, sentences: &[Sentence], max_len: usize) -> Array2<u32> {
        let mut ids = Array2::from_elem((max_len, sentences.len()), PAD_ID);
        for (b, sentence) in sentences.iter().enumerate() {
            let mut t = 0;
            for token in sentence.iter().take(max_len) {
                ids[[t, b]] = self.token_to_id(token);
                t += 1;
            }
            if t < max_len {
                ids[[t, b]] = END_ID;
            }
        }
        ids
    }

    /// Decode a time x batch id matrix into one sentence per column.
    ///
    /// Each column stops at the first `</s>` or `<pad>`.
    pub fn vectors_to_sentences(&self, ids: ArrayView2<'_, u32>) -> Vec<Sentence> {
        ids.columns()
            .into_iter()
            .map(|column| {
                column
                    .iter()
                    .take_while(|&&id| id != END_ID && id != PAD_ID)
                    .map(|&id| self.id_to_token(id).to_string())
                    .collect()
            })
            .collect()
    }
}
