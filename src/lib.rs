//! # chapterbook
//!
//! Turns a plain-text or EPUB book into a chaptered `.m4b` audiobook.
//!
//! The book is segmented into chapters, paragraphs and sentences; each
//! sentence is voiced by a [`synth::Synthesizer`] with bounded retry; sentence
//! audio is folded into paragraphs and paragraphs into chapters with silence
//! between them; chapter durations become the chapter marks of the container
//! produced by ffmpeg.
//!
//! Every intermediate is a unit in a [`store::UnitStore`]. A unit that already
//! exists is never redone, so an interrupted run picks up where it stopped.
//!
//! ```no_run
//! use chapterbook::config::Config;
//! use chapterbook::pipeline::Pipeline;
//! use chapterbook::store::MemoryStore;
//! use chapterbook::synth::{detect_device, detect_engine};
//! use chapterbook::text::parse_book;
//!
//! let config = Config::default();
//! let book = parse_book("# One\nHello there.\n", "hello.txt");
//! let mut engine = detect_engine(&config, None, detect_device())?;
//! let mut store = MemoryStore::new();
//! let narration = Pipeline::new(&config, None).run(&book, &mut store, engine.as_mut())?;
//! assert_eq!(narration.chapters.len(), 1);
//! # Ok::<(), chapterbook::error::BookError>(())
//! ```

pub mod assemble;
pub mod audio;
pub mod config;
pub mod epub;
pub mod error;
pub mod metadata;
pub mod package;
pub mod pipeline;
pub mod retry;
pub mod store;
pub mod synth;
pub mod text;

pub use error::{BookError, Result};
