//! Toy engine and data for banditmt.
//!
//! Provides a small in-process model for demos and end-to-end tests:
//! - `UnigramPolicy` - source-token-conditioned unigram policy implementing `PolicyEngine`
//! - `copy_dataset` - parallel data where the target repeats the source

mod copy_task;
mod unigram;

pub use copy_task::{
    copy_dataset, random_sentences, toy_decoder, toy_vocabulary, MAX_LENGTH, MAX_OUTPUT_LEN,
    MIN_LENGTH, TOY_WORDS,
};
pub use unigram::UnigramPolicy;
