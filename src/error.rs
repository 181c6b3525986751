//! Error types for chapterbook.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BookError {
    // Synthesis errors (retried per sentence)
    #[error("Synthesis failed: {message}")]
    Synthesis { message: String },

    #[error("Synthesis reported success but {unit} was not written")]
    MissingOutput { unit: String },

    #[error("Sentence abandoned after {attempts} attempts: {text}")]
    SentenceAbandoned { text: String, attempts: u32 },

    #[error("No speech engine found: {message}")]
    NoEngine { message: String },

    // Assembly errors (fatal for the run)
    #[error("Unit {unit} is missing during assembly: {message}")]
    MissingUnit { unit: String, message: String },

    #[error("Audio format mismatch in {unit}: expected {expected}, got {actual}")]
    FormatMismatch {
        unit: String,
        expected: String,
        actual: String,
    },

    // Metadata and packaging errors
    #[error("Chapter {index} title mismatch: expected {expected:?}, got {actual:?}")]
    TitleMismatch {
        index: usize,
        expected: String,
        actual: String,
    },

    #[error("Nothing to narrate: no chapter produced audio")]
    NothingToNarrate,

    #[error("{step} failed: {message}")]
    Packager { step: String, message: String },

    // Source errors
    #[error("Failed to read EPUB {path}: {message}")]
    Epub { path: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Progress template error: {0}")]
    Template(#[from] indicatif::style::TemplateError),
}

pub type Result<T> = std::result::Result<T, BookError>;
