//! Book narration: sentences into paragraphs into chapters, resumable at
//! every level through the unit store.

use std::path::PathBuf;

use indicatif::ProgressBar;
use log::{info, warn};

use crate::assemble::{assemble_chapter, assemble_paragraph, discard_leftovers};
use crate::config::Config;
use crate::error::Result;
use crate::store::{UnitKey, UnitStore};
use crate::synth::{AbandonedSentence, Narrator, Outcome, Synthesizer};
use crate::text::{has_alphanumeric, split_sentences, Book, Chapter, Paragraph};

/// A chapter that produced audio, with the title it carries into metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledChapter {
    pub index: usize,
    pub title: String,
    pub unit: UnitKey,
}

#[derive(Debug, Default)]
pub struct Narration {
    pub chapters: Vec<AssembledChapter>,
    pub abandoned: Vec<AbandonedSentence>,
    pub synthesis_calls: usize,
}

pub struct Pipeline<'a> {
    config: &'a Config,
    voice_sample: Option<PathBuf>,
    progress: ProgressBar,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a Config, voice_sample: Option<PathBuf>) -> Self {
        Self {
            config,
            voice_sample,
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Text spoken for a paragraph: the first paragraph of a titled chapter
    /// opens with the title.
    pub fn spoken_text(&self, chapter: &Chapter, paragraph: &Paragraph) -> String {
        if paragraph.index == 0 && self.config.read_titles && chapter.has_spoken_title() {
            format!("{}. {}", chapter.title, paragraph.text)
        } else {
            paragraph.text.clone()
        }
    }

    /// Narrate every chapter with text into a chapter unit.
    pub fn run<S: UnitStore>(
        &self,
        book: &Book,
        store: &mut S,
        engine: &mut dyn Synthesizer,
    ) -> Result<Narration> {
        let audible: Vec<&Chapter> = book
            .chapters
            .iter()
            .filter(|chapter| {
                let empty = chapter.is_empty();
                if empty {
                    info!("Chapter {} ({}) has no text, skipping", chapter.index, chapter.title);
                }
                !empty
            })
            .collect();

        self.progress.set_length(audible.len() as u64);
        let mut narrator = Narrator::new(engine, self.config, self.voice_sample.clone());
        let mut chapters = Vec::new();

        for (position, chapter) in audible.iter().enumerate() {
            self.progress.set_message(chapter.title.clone());
            let unit = UnitKey::Chapter {
                chapter: chapter.index,
            };

            if store.has(&unit) {
                info!("{unit} exists, skipping to next chapter");
                discard_leftovers(store, &unit)?;
            } else {
                info!(
                    "Chapter ({}/{}): {}",
                    position + 1,
                    audible.len(),
                    chapter.title
                );
                let paragraphs = self.narrate_chapter(store, &mut narrator, chapter)?;
                if paragraphs.is_empty() {
                    warn!("Chapter {} produced no audio", chapter.index);
                    self.progress.inc(1);
                    continue;
                }
                assemble_chapter(store, chapter.index, &paragraphs, self.config.chapter_pause_ms)?;
            }

            chapters.push(AssembledChapter {
                index: chapter.index,
                title: chapter.title.clone(),
                unit,
            });
            self.progress.inc(1);
        }
        self.progress.finish_and_clear();

        let synthesis_calls = narrator.synthesis_calls();
        Ok(Narration {
            chapters,
            abandoned: narrator.into_abandoned(),
            synthesis_calls,
        })
    }

    fn narrate_chapter<S: UnitStore>(
        &self,
        store: &mut S,
        narrator: &mut Narrator<'_>,
        chapter: &Chapter,
    ) -> Result<Vec<UnitKey>> {
        let mut produced = Vec::new();

        for paragraph in &chapter.paragraphs {
            let unit = UnitKey::Paragraph {
                chapter: chapter.index,
                paragraph: paragraph.index,
            };
            if store.has(&unit) {
                info!("{unit} exists, skipping to next paragraph");
                discard_leftovers(store, &unit)?;
                produced.push(unit);
                continue;
            }

            let text = self.spoken_text(chapter, paragraph);
            let mut sentences = Vec::new();
            for (index, sentence) in split_sentences(&text)
                .iter()
                .filter(|s| has_alphanumeric(s))
                .enumerate()
            {
                let key = UnitKey::Sentence {
                    chapter: chapter.index,
                    paragraph: paragraph.index,
                    sentence: index,
                };
                if narrator.narrate(store, key, sentence)? != Outcome::Dropped {
                    sentences.push(key);
                }
            }

            if sentences.is_empty() {
                warn!("{unit} has no voiced sentences, leaving it out");
                continue;
            }
            produced.push(assemble_paragraph(
                store,
                chapter.index,
                paragraph.index,
                &sentences,
                self.config.paragraph_pause_ms,
            )?);
        }
        Ok(produced)
    }
}
