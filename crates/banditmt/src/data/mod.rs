//! Parallel text data and vocabularies.
//!
//! Provides:
//! - `Dataset` - named, aligned series of token sequences
//! - `Vocabulary` - token <-> id mapping used to read decoder outputs

mod dataset;
mod vocabulary;

pub use dataset::{Dataset, Sentence};
pub use vocabulary::{Vocabulary, END_TOKEN, PAD_TOKEN, START_TOKEN, UNK_TOKEN};
