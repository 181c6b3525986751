//! EPUB to narration text export.
//!
//! The export uses the plain-text book format read by [`crate::text`], so it
//! can be reviewed and edited before narration.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use epub::doc::EpubDoc;
use html2text::render::text_renderer::TrivialDecorator;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{BookError, Result};
use crate::package::confirm_overwrite;
use crate::text::{clean_text, CHAPTER_MARKER, TITLE_PAGE, UNKNOWN_AUTHOR};

static HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<h([1-3])[^>]*>(.*?)</h[1-3]>").expect("valid regex"));
static TITLE_CLASS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<(\w+)[^>]*class\s*=\s*["'](?:chapter|chapter-title|title|heading)["'][^>]*>(.*?)</\w+>"#)
        .expect("valid regex")
});
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));
static LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<a\b[^>]*>(.*?)</a>").expect("valid regex"));
static SUPERSCRIPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<sup\b[^>]*>(.*?)</sup>").expect("valid regex"));

const RENDER_WIDTH: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpubChapter {
    pub title: Option<String>,
    pub paragraphs: Vec<String>,
}

#[derive(Debug)]
pub struct EpubBook {
    pub title: String,
    pub author: String,
    pub chapters: Vec<EpubChapter>,
    /// Image bytes and mime type.
    pub cover: Option<(Vec<u8>, String)>,
}

fn inner_text(fragment: &str) -> Option<String> {
    let text = html2text::from_read_with_decorator(
        fragment.as_bytes(),
        RENDER_WIDTH,
        TrivialDecorator::new(),
    );
    let text = TAG.replace_all(&text, " ");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let text = text.trim_start_matches(CHAPTER_MARKER).trim().to_string();
    (!text.is_empty()).then_some(text)
}

/// Remove inline footnote markers: links without letters and numeric
/// superscripts.
pub fn strip_footnote_markers(html: &str) -> String {
    let html = LINK.replace_all(html, |c: &regex::Captures| {
        if TAG.replace_all(&c[1], "").chars().any(char::is_alphabetic) {
            c[0].to_string()
        } else {
            String::new()
        }
    });
    SUPERSCRIPT
        .replace_all(&html, |c: &regex::Captures| {
            let inner = TAG.replace_all(&c[1], "");
            let inner = inner.trim();
            if !inner.is_empty() && inner.chars().all(|ch| ch.is_ascii_digit() || ch.is_whitespace()) {
                String::new()
            } else {
                c[0].to_string()
            }
        })
        .into_owned()
}

/// Chapter title from headings, then title-like classes.
pub fn extract_title(html: &str) -> Option<String> {
    HEADING
        .captures_iter(html)
        .filter_map(|c| inner_text(&c[2]))
        .next()
        .or_else(|| {
            TITLE_CLASS
                .captures_iter(html)
                .filter_map(|c| inner_text(&c[2]))
                .next()
        })
}

/// `chapter_01.xhtml` -> `Chapter 01`
pub fn title_from_id(id: &str) -> String {
    id.replace(".xhtml", "")
        .replace(".html", "")
        .replace('_', " ")
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Body paragraphs of a chapter document. Headings and fragments without
/// letters (footnote markers, page numbers) are dropped.
pub fn extract_paragraphs(html: &str, title: Option<&str>) -> Vec<String> {
    let text = html2text::from_read_with_decorator(html.as_bytes(), RENDER_WIDTH, TrivialDecorator::new());
    let mut paragraphs = Vec::new();
    let mut block: Vec<&str> = Vec::new();

    let mut flush = |block: &mut Vec<&str>| {
        if block.is_empty() {
            return;
        }
        let joined = block.join(" ");
        block.clear();
        let paragraph = joined.split_whitespace().collect::<Vec<_>>().join(" ");
        if paragraph.starts_with(CHAPTER_MARKER) || Some(paragraph.as_str()) == title {
            return;
        }
        if paragraph.chars().any(char::is_alphabetic) {
            paragraphs.push(paragraph);
        }
    };

    for line in text.lines() {
        if line.trim().is_empty() {
            flush(&mut block);
        } else {
            block.push(line.trim());
        }
    }
    flush(&mut block);
    paragraphs
}

/// Title lookup order: markup, table of contents, document id.
pub fn chapter_from_html(html: &str, toc_label: Option<&str>, item_id: Option<&str>) -> EpubChapter {
    let html = strip_footnote_markers(html);
    let html = html.as_str();
    let title = extract_title(html)
        .or_else(|| toc_label.map(|l| l.trim().to_string()).filter(|l| !l.is_empty()))
        .or_else(|| item_id.map(title_from_id).filter(|t| !t.is_empty()));
    let paragraphs = extract_paragraphs(html, title.as_deref());
    EpubChapter { title, paragraphs }
}

fn strip_fragment(path: &Path) -> String {
    let text = path.to_string_lossy();
    text.split('#').next().unwrap_or_default().to_string()
}

pub fn read_epub(path: &Path) -> Result<EpubBook> {
    let mut doc = EpubDoc::new(path).map_err(|e| BookError::Epub {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let fallback_title = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let title = doc.mdata("title").unwrap_or(fallback_title);
    let author = doc
        .mdata("creator")
        .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string());
    let toc: Vec<(String, String)> = doc
        .toc
        .iter()
        .map(|nav| (strip_fragment(&nav.content), nav.label.clone()))
        .collect();

    let mut chapters = Vec::new();
    for i in 0..doc.get_num_pages() {
        if !doc.set_current_page(i) {
            continue;
        }
        let Some((html, _mime)) = doc.get_current_str() else {
            continue;
        };
        let current = doc.get_current_path().map(|p| strip_fragment(&p));
        let toc_label = current.as_ref().and_then(|current| {
            toc.iter()
                .find(|(content, _)| content == current)
                .map(|(_, label)| label.as_str())
        });
        let item_id = doc.get_current_id();

        let chapter = chapter_from_html(&html, toc_label, item_id.as_deref());
        debug!(
            "Document {i}: {:?}, {} paragraphs",
            chapter.title,
            chapter.paragraphs.len()
        );
        chapters.push(chapter);
    }

    let cover = doc.get_cover();
    Ok(EpubBook {
        title,
        author,
        chapters,
        cover,
    })
}

/// The book as narration text: header, a title page, then one `#` chapter
/// per document that has paragraphs.
pub fn render_text(book: &EpubBook) -> String {
    let mut out = format!("Title: {}\nAuthor: {}\n\n", book.title, book.author);
    out.push_str(&format!("{CHAPTER_MARKER} {TITLE_PAGE}\n"));
    out.push_str(&format!("{}, by {}\n\n", book.title, book.author));

    for (i, chapter) in book.chapters.iter().enumerate() {
        if chapter.paragraphs.iter().all(|p| p.trim().is_empty()) {
            continue;
        }
        let title = chapter
            .title
            .clone()
            .unwrap_or_else(|| format!("Part {}", i + 1));
        out.push_str(&format!("{CHAPTER_MARKER} {title}\n\n"));
        for paragraph in &chapter.paragraphs {
            out.push_str(&format!("{}\n\n", clean_text(paragraph)));
        }
    }
    out
}

fn cover_extension(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "jpg",
    }
}

/// Export `source` to a sibling `.txt` (and its cover image, if any).
/// Returns `None` when the user declines to overwrite an existing export.
pub fn export_epub(source: &Path, assume_yes: bool) -> Result<Option<PathBuf>> {
    let book = read_epub(source)?;
    let outfile = source.with_extension("txt");

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut prompt = io::stdout();
    if !confirm_overwrite(&outfile, assume_yes, &mut input, &mut prompt)? {
        info!("Exiting without overwriting {}", outfile.display());
        return Ok(None);
    }

    match &book.cover {
        Some((bytes, mime)) => {
            let cover_path = source.with_extension(cover_extension(mime));
            fs::write(&cover_path, bytes)?;
            info!("Cover image saved to {}", cover_path.display());
        }
        None => warn!("No cover image found in {}", source.display()),
    }

    info!("Exporting {} to {}", source.display(), outfile.display());
    fs::write(&outfile, render_text(&book))?;
    Ok(Some(outfile))
}
