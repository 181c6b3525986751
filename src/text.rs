//! Book text segmentation.
//!
//! Source text is a light header (`Title:` / `Author:` lines) followed by a
//! body where lines starting with `#` open a chapter and every other non-blank
//! line is one paragraph. Paragraphs are split into sentences for synthesis.

use once_cell::sync::Lazy;
use regex::Regex;

/// Title recorded for chapters whose marker carries no alphanumeric text.
pub const BLANK_TITLE: &str = "blank";
/// Title of the exported title page; its body already speaks the title.
pub const TITLE_PAGE: &str = "Title";
pub const UNKNOWN_AUTHOR: &str = "Unknown";
pub const CHAPTER_MARKER: char = '#';

const HEADER_LINES: usize = 2;

/// Words ending in a period that do not close a sentence. Compared lowercased.
const ABBREVIATIONS: &[&str] = &[
    "mr.", "mrs.", "ms.", "dr.", "prof.", "sr.", "jr.", "st.", "ave.", "blvd.", "vs.", "etc.",
    "approx.", "dept.", "est.", "govt.", "inc.", "ltd.", "no.", "vol.", "rev.", "gen.", "sgt.",
    "capt.", "col.", "maj.", "lt.", "hon.", "fig.", "mt.", "e.g.", "i.e.", "cf.", "ch.",
];

static CLEANUP_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (Regex::new(r"\s+").expect("valid regex"), " "),
        (Regex::new(r"[“”]").expect("valid regex"), "\""),
        (Regex::new(r"[‘’]").expect("valid regex"), "'"),
        (Regex::new(r"--").expect("valid regex"), ", "),
        (Regex::new(r"—").expect("valid regex"), ", "),
    ]
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Book {
    pub title: String,
    pub author: String,
    pub chapters: Vec<Chapter>,
}

impl Book {
    /// Raw chapter titles in source order, including chapters with no text.
    pub fn chapter_titles(&self) -> Vec<String> {
        self.chapters.iter().map(|c| c.title.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    /// 1-based position in the source.
    pub index: usize,
    pub title: String,
    pub paragraphs: Vec<Paragraph>,
}

impl Chapter {
    fn new(index: usize, title: &str) -> Self {
        Self {
            index,
            title: title.to_string(),
            paragraphs: Vec::new(),
        }
    }

    /// Chapters without paragraph text produce no audio.
    pub fn is_empty(&self) -> bool {
        self.paragraphs.iter().all(|p| p.text.trim().is_empty())
    }

    pub fn has_spoken_title(&self) -> bool {
        let title = self.title.trim();
        !title.is_empty() && title != BLANK_TITLE && title != TITLE_PAGE
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paragraph {
    pub index: usize,
    pub text: String,
}

pub fn has_alphanumeric(text: &str) -> bool {
    text.chars().any(char::is_alphanumeric)
}

/// Parse book text into chapters and paragraphs.
///
/// `source_id` becomes the title when the text has no `Title:` header.
pub fn parse_book(text: &str, source_id: &str) -> Book {
    let mut title = source_id.to_string();
    let mut author = UNKNOWN_AUTHOR.to_string();
    let mut chapters: Vec<Chapter> = Vec::new();
    let mut current: Option<Chapter> = None;
    let mut header_lines = 0;
    let mut in_header = true;

    for raw in text.lines() {
        let line = raw.trim();

        if in_header && header_lines < HEADER_LINES {
            if let Some(value) = line.strip_prefix("Title:") {
                title = value.trim().to_string();
                header_lines += 1;
                continue;
            }
            if let Some(value) = line.strip_prefix("Author:") {
                author = value.trim().to_string();
                header_lines += 1;
                continue;
            }
        }
        if line.is_empty() {
            continue;
        }
        in_header = false;

        if let Some(marker) = line.strip_prefix(CHAPTER_MARKER) {
            if let Some(done) = current.take() {
                chapters.push(done);
            }
            let name = marker.trim_start_matches(CHAPTER_MARKER).trim();
            let name = if has_alphanumeric(name) { name } else { BLANK_TITLE };
            current = Some(Chapter::new(chapters.len() + 1, name));
            continue;
        }

        let next_index = chapters.len() + 1;
        let chapter = current.get_or_insert_with(|| Chapter::new(next_index, BLANK_TITLE));
        if let Some(paragraph) = clean_paragraph_line(line) {
            let index = chapter.paragraphs.len();
            chapter.paragraphs.push(Paragraph {
                index,
                text: paragraph,
            });
        }
    }

    if let Some(done) = current.take() {
        chapters.push(done);
    }

    Book {
        title,
        author,
        chapters,
    }
}

/// Sentence-split one body line and drop fragments without alphanumerics.
fn clean_paragraph_line(line: &str) -> Option<String> {
    if !has_alphanumeric(line) {
        return None;
    }
    let kept: Vec<String> = split_sentences(line)
        .into_iter()
        .filter(|s| has_alphanumeric(s))
        .collect();
    if kept.is_empty() {
        None
    } else {
        Some(kept.join(" "))
    }
}

/// Normalize exported paragraph text for narration.
pub fn clean_text(text: &str) -> String {
    let mut cleaned = text.to_string();
    for (regex, replacement) in CLEANUP_PATTERNS.iter() {
        cleaned = regex.replace_all(&cleaned, *replacement).to_string();
    }
    cleaned.trim().to_string()
}

fn is_terminal(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '…')
}

fn is_closer(c: char) -> bool {
    matches!(c, '"' | '\'' | ')' | ']' | '”' | '’' | '»')
}

/// True when the period at `pos` belongs to an abbreviation or an initial.
fn is_abbreviation_period(text: &str, pos: usize) -> bool {
    let before = &text[..pos + 1];
    let word = before
        .rsplit(char::is_whitespace)
        .next()
        .unwrap_or(before)
        .trim_start_matches(|c: char| !c.is_alphanumeric());
    let lower = word.to_lowercase();
    if ABBREVIATIONS.contains(&lower.as_str()) {
        return true;
    }
    // "J. R. R. Tolkien"
    let Some(stem) = word.strip_suffix('.') else {
        return false;
    };
    let mut chars = stem.chars();
    if matches!((chars.next(), chars.next()), (Some(c), None) if c.is_uppercase()) {
        return true;
    }
    // "U.S.", "a.m."
    let groups: Vec<&str> = stem.split('.').collect();
    groups.len() > 1
        && groups.iter().all(|g| {
            let mut chars = g.chars();
            matches!((chars.next(), chars.next()), (Some(c), None) if c.is_alphabetic())
        })
}

/// Split text at sentence boundaries.
///
/// A boundary is a run of terminal punctuation (with trailing quotes or
/// brackets) followed by whitespace, unless the run is a single period ending
/// an abbreviation or initial, or an ellipsis continuing in lowercase.
pub fn split_sentences(text: &str) -> Vec<String> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < chars.len() {
        let (pos, c) = chars[i];
        if !is_terminal(c) {
            i += 1;
            continue;
        }

        let mut j = i + 1;
        while j < chars.len() && (is_terminal(chars[j].1) || is_closer(chars[j].1)) {
            j += 1;
        }
        let end = chars.get(j).map_or(text.len(), |&(p, _)| p);
        let at_space = chars.get(j).map_or(true, |&(_, n)| n.is_whitespace());

        let run = &text[pos..end];
        let single_period = c == '.' && !run[1..].starts_with('.');
        let ellipsis = run.contains("...") || run.contains('…');
        let next_lower = text[end..]
            .trim_start()
            .chars()
            .next()
            .is_some_and(char::is_lowercase);

        let boundary = at_space
            && !(single_period && is_abbreviation_period(text, pos))
            && !(ellipsis && next_lower);

        if boundary {
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            start = end;
        }
        i = j;
    }

    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }
    sentences
}

fn is_upper_word(word: &str) -> bool {
    word.chars().any(char::is_uppercase) && !word.chars().any(char::is_lowercase)
}

/// Sentence-case text that reads as shouted: three or more consecutive
/// all-caps words lower-case the whole sentence except its first letter.
pub fn sentence_case(sentence: &str) -> String {
    let words: Vec<&str> = sentence.split_whitespace().collect();
    let shouted = words
        .windows(3)
        .any(|run| run.iter().all(|w| is_upper_word(w)));
    if !shouted {
        return sentence.to_string();
    }

    let lowered = words.join(" ").to_lowercase();
    let mut chars = lowered.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "Title: The Long Walk\nAuthor: Jane Roe\n\n# Title\nThe Long Walk, by Jane Roe\n\n# Chapter One\nIt was cold. Mr. Smith waited.\n\nThen it rained!\n\n# \n...\n# Chapter Three\nThe end.\n";

    #[test]
    fn parses_header() {
        let book = parse_book(SAMPLE, "walk.txt");
        assert_eq!(book.title, "The Long Walk");
        assert_eq!(book.author, "Jane Roe");
    }

    #[test]
    fn missing_header_uses_defaults() {
        let book = parse_book("# One\nHello there.\n", "story.txt");
        assert_eq!(book.title, "story.txt");
        assert_eq!(book.author, UNKNOWN_AUTHOR);
    }

    #[test]
    fn title_lines_after_body_are_text() {
        let book = parse_book("# One\nTitle: not a header\n", "x.txt");
        assert_eq!(book.title, "x.txt");
        assert_eq!(book.chapters[0].paragraphs[0].text, "Title: not a header");
    }

    #[test]
    fn chapters_and_paragraphs() {
        let book = parse_book(SAMPLE, "walk.txt");
        assert_eq!(
            book.chapter_titles(),
            vec!["Title", "Chapter One", BLANK_TITLE, "Chapter Three"]
        );
        let one = &book.chapters[1];
        assert_eq!(one.index, 2);
        assert_eq!(one.paragraphs.len(), 2);
        assert_eq!(one.paragraphs[0].text, "It was cold. Mr. Smith waited.");
        assert_eq!(one.paragraphs[1].index, 1);
    }

    #[test]
    fn punctuation_only_lines_leave_chapter_empty() {
        let book = parse_book(SAMPLE, "walk.txt");
        let blank = &book.chapters[2];
        assert_eq!(blank.title, BLANK_TITLE);
        assert!(blank.is_empty());
        assert!(!book.chapters[3].is_empty());
    }

    #[test]
    fn first_chapter_begins_implicitly() {
        let book = parse_book("Opening words.\n# Next\nMore words.\n", "x.txt");
        assert_eq!(book.chapters.len(), 2);
        assert_eq!(book.chapters[0].title, BLANK_TITLE);
        assert_eq!(book.chapters[0].index, 1);
        assert_eq!(book.chapters[1].index, 2);
        assert_eq!(book.chapter_titles().len(), book.chapters.len());
    }

    #[test]
    fn stray_punctuation_fragments_dropped() {
        let book = parse_book("# A\nHello world. ... !\n", "x.txt");
        assert_eq!(book.chapters[0].paragraphs[0].text, "Hello world.");
    }

    #[test]
    fn segmentation_is_pure() {
        assert_eq!(parse_book(SAMPLE, "walk.txt"), parse_book(SAMPLE, "walk.txt"));
    }

    #[test]
    fn spoken_titles() {
        let book = parse_book(SAMPLE, "walk.txt");
        assert!(!book.chapters[0].has_spoken_title());
        assert!(book.chapters[1].has_spoken_title());
        assert!(!book.chapters[2].has_spoken_title());
    }

    #[test]
    fn splits_basic_sentences() {
        assert_eq!(
            split_sentences("One fish. Two fish! Red fish? Blue fish"),
            vec!["One fish.", "Two fish!", "Red fish?", "Blue fish"]
        );
    }

    #[test]
    fn keeps_abbreviations_and_initials() {
        assert_eq!(
            split_sentences("Dr. Watson met J. R. Hartley at 3.30 today. It went well."),
            vec!["Dr. Watson met J. R. Hartley at 3.30 today.", "It went well."]
        );
    }

    #[test]
    fn keeps_dotted_acronyms() {
        assert_eq!(
            split_sentences("He moved to the U.S. last year. He left at 6 a.m. on Monday. Fine."),
            vec!["He moved to the U.S. last year.", "He left at 6 a.m. on Monday.", "Fine."]
        );
    }

    #[test]
    fn closing_quotes_stay_with_sentence() {
        assert_eq!(
            split_sentences("\"Stop!\" she said. \"Now.\""),
            vec!["\"Stop!\"", "she said.", "\"Now.\""]
        );
    }

    #[test]
    fn ellipsis_before_lowercase_continues() {
        assert_eq!(
            split_sentences("Well... maybe not. Fine... Go."),
            vec!["Well... maybe not.", "Fine...", "Go."]
        );
    }

    #[test]
    fn sentence_case_shouted() {
        assert_eq!(
            sentence_case("SHE SHOUTED LOUDLY at him"),
            "She shouted loudly at him"
        );
    }

    #[test]
    fn sentence_case_leaves_short_runs() {
        assert_eq!(sentence_case("NASA launched it"), "NASA launched it");
        assert_eq!(sentence_case("THE END came quickly"), "THE END came quickly");
        assert_eq!(sentence_case("I AM here, YOU ARE there"), "I AM here, YOU ARE there");
    }

    #[test]
    fn clean_text_rules() {
        assert_eq!(
            clean_text("  “Wait”\n\tshe said--then ‘ran’—away "),
            "\"Wait\" she said, then 'ran', away"
        );
    }
}
