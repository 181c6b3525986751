//! Chapter timing and the FFMETADATA1 sidecar consumed by ffmpeg.

use std::fs;
use std::path::Path;

use crate::error::{BookError, Result};
use crate::pipeline::AssembledChapter;
use crate::store::UnitStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterMark {
    pub start_ms: u64,
    pub end_ms: u64,
    pub title: String,
}

/// Check each assembled chapter against the source title list. Chapters
/// without audio are absent from `chapters`, so indices must only increase
/// and each must point at its own title.
pub fn validate_titles(titles: &[String], chapters: &[AssembledChapter]) -> Result<()> {
    let mut previous = 0;
    for chapter in chapters {
        let expected = titles
            .get(chapter.index.wrapping_sub(1))
            .filter(|_| chapter.index > previous);
        match expected {
            Some(title) if *title == chapter.title => previous = chapter.index,
            _ => {
                return Err(BookError::TitleMismatch {
                    index: chapter.index,
                    expected: expected.cloned().unwrap_or_default(),
                    actual: chapter.title.clone(),
                })
            }
        }
    }
    Ok(())
}

/// Running start/end offsets of each chapter, measured from the units.
pub fn chapter_marks<S: UnitStore>(
    store: &S,
    titles: &[String],
    chapters: &[AssembledChapter],
) -> Result<Vec<ChapterMark>> {
    validate_titles(titles, chapters)?;

    let mut start_ms = 0;
    let mut marks = Vec::with_capacity(chapters.len());
    for chapter in chapters {
        let duration = store.duration_ms(&chapter.unit)?;
        marks.push(ChapterMark {
            start_ms,
            end_ms: start_ms + duration,
            title: chapter.title.clone(),
        });
        start_ms += duration;
    }
    Ok(marks)
}

fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '=' | ';' | '#' | '\\' | '\n') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

pub fn render_ffmetadata(title: &str, author: &str, marks: &[ChapterMark]) -> String {
    let mut out = String::from(";FFMETADATA1\n");
    out.push_str(&format!("ARTIST={}\n", escape(author)));
    out.push_str(&format!("ALBUM={}\n", escape(title)));
    out.push_str(&format!("TITLE={}\n", escape(title)));
    for mark in marks {
        out.push_str(&format!(
            "[CHAPTER]\nTIMEBASE=1/1000\nSTART={}\nEND={}\ntitle={}\n",
            mark.start_ms,
            mark.end_ms,
            escape(&mark.title)
        ));
    }
    out
}

pub fn write_ffmetadata(path: &Path, title: &str, author: &str, marks: &[ChapterMark]) -> Result<()> {
    fs::write(path, render_ffmetadata(title, author, marks))?;
    Ok(())
}
