//! Checkpointed audio units.
//!
//! A unit that exists in the store is finished work: sentence, paragraph and
//! chapter audio are all looked up by their canonical key before anything is
//! synthesized or assembled. Contents are trusted as-is.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;

use crate::audio::{wav_duration_ms, AudioClip};
use crate::error::{BookError, Result};

/// Canonical identity of one audio unit. Chapters are 1-based, paragraphs and
/// sentences 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitKey {
    Sentence {
        chapter: usize,
        paragraph: usize,
        sentence: usize,
    },
    Paragraph {
        chapter: usize,
        paragraph: usize,
    },
    Chapter {
        chapter: usize,
    },
}

impl UnitKey {
    pub fn file_name(&self) -> String {
        match self {
            UnitKey::Sentence {
                chapter,
                paragraph,
                sentence,
            } => format!("part{chapter}-pgraph{paragraph}-sntnc{sentence}.wav"),
            UnitKey::Paragraph { chapter, paragraph } => {
                format!("part{chapter}-pgraph{paragraph}.wav")
            }
            UnitKey::Chapter { chapter } => format!("part{chapter}.wav"),
        }
    }

    /// Inverse of [`UnitKey::file_name`].
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(".wav")?.strip_prefix("part")?;
        let mut parts = stem.split('-');
        let chapter = parts.next()?.parse().ok()?;
        let key = match (parts.next(), parts.next()) {
            (None, _) => UnitKey::Chapter { chapter },
            (Some(p), None) => UnitKey::Paragraph {
                chapter,
                paragraph: p.strip_prefix("pgraph")?.parse().ok()?,
            },
            (Some(p), Some(s)) => UnitKey::Sentence {
                chapter,
                paragraph: p.strip_prefix("pgraph")?.parse().ok()?,
                sentence: s.strip_prefix("sntnc")?.parse().ok()?,
            },
        };
        if parts.next().is_some() {
            return None;
        }
        Some(key)
    }

    /// True when `self` is one of the units folded, directly or not, into
    /// `parent`.
    pub fn belongs_to(&self, parent: &UnitKey) -> bool {
        match (self, parent) {
            (
                UnitKey::Sentence {
                    chapter, paragraph, ..
                },
                UnitKey::Paragraph {
                    chapter: c,
                    paragraph: p,
                },
            ) => chapter == c && paragraph == p,
            (
                UnitKey::Sentence { chapter, .. } | UnitKey::Paragraph { chapter, .. },
                UnitKey::Chapter { chapter: c },
            ) => chapter == c,
            _ => false,
        }
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

/// The sequence number embedded last in a unit file name
/// (`part3-pgraph1-sntnc10.wav` -> 10).
pub fn sequence_index(file_name: &str) -> Option<usize> {
    let stem = file_name.rsplit_once('.').map_or(file_name, |(stem, _)| stem);
    let digits_start = stem.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    stem[digits_start..].parse().ok()
}

/// Storage for audio units keyed by canonical name.
pub trait UnitStore {
    fn has(&self, key: &UnitKey) -> bool;

    fn write(&mut self, key: &UnitKey, clip: &AudioClip) -> Result<()>;

    fn read(&self, key: &UnitKey) -> Result<AudioClip>;

    fn delete(&mut self, key: &UnitKey) -> Result<()>;

    /// Every unit currently stored, in no particular order.
    fn keys(&self) -> Result<Vec<UnitKey>>;

    fn duration_ms(&self, key: &UnitKey) -> Result<u64> {
        Ok(self.read(key)?.duration_ms())
    }
}

/// Units as WAV files in a single working directory.
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    pub fn new(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, key: &UnitKey) -> PathBuf {
        self.root.join(key.file_name())
    }
}

impl UnitStore for DiskStore {
    fn has(&self, key: &UnitKey) -> bool {
        self.path(key).is_file()
    }

    fn write(&mut self, key: &UnitKey, clip: &AudioClip) -> Result<()> {
        let path = self.path(key);
        debug!("writing {}", path.display());
        clip.write_wav(&path)
    }

    fn read(&self, key: &UnitKey) -> Result<AudioClip> {
        AudioClip::read_wav(&self.path(key))
    }

    fn delete(&mut self, key: &UnitKey) -> Result<()> {
        let path = self.path(key);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<UnitKey>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if let Some(key) = UnitKey::parse(&entry.file_name().to_string_lossy()) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    fn duration_ms(&self, key: &UnitKey) -> Result<u64> {
        wav_duration_ms(&self.path(key))
    }
}

/// In-memory store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    units: HashMap<UnitKey, AudioClip>,
    writes: usize,
    deletes: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Number of writes since creation.
    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn deletes(&self) -> usize {
        self.deletes
    }
}

impl UnitStore for MemoryStore {
    fn has(&self, key: &UnitKey) -> bool {
        self.units.contains_key(key)
    }

    fn write(&mut self, key: &UnitKey, clip: &AudioClip) -> Result<()> {
        self.writes += 1;
        self.units.insert(*key, clip.clone());
        Ok(())
    }

    fn read(&self, key: &UnitKey) -> Result<AudioClip> {
        self.units
            .get(key)
            .cloned()
            .ok_or_else(|| BookError::MissingUnit {
                unit: key.file_name(),
                message: "not in store".to_string(),
            })
    }

    fn delete(&mut self, key: &UnitKey) -> Result<()> {
        if self.units.remove(key).is_some() {
            self.deletes += 1;
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<UnitKey>> {
        Ok(self.units.keys().copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentence(n: usize) -> UnitKey {
        UnitKey::Sentence {
            chapter: 2,
            paragraph: 7,
            sentence: n,
        }
    }

    #[test]
    fn file_names_are_canonical() {
        assert_eq!(sentence(12).file_name(), "part2-pgraph7-sntnc12.wav");
        assert_eq!(
            UnitKey::Paragraph {
                chapter: 2,
                paragraph: 7
            }
            .file_name(),
            "part2-pgraph7.wav"
        );
        assert_eq!(UnitKey::Chapter { chapter: 11 }.to_string(), "part11.wav");
    }

    #[test]
    fn parse_inverts_file_name() {
        for key in [
            sentence(0),
            sentence(10),
            UnitKey::Paragraph {
                chapter: 1,
                paragraph: 0,
            },
            UnitKey::Chapter { chapter: 3 },
        ] {
            assert_eq!(UnitKey::parse(&key.file_name()), Some(key));
        }
        assert_eq!(UnitKey::parse("filelist.txt"), None);
        assert_eq!(UnitKey::parse("part1-x2.wav"), None);
        assert_eq!(UnitKey::parse("part1-pgraph2-sntnc3-extra.wav"), None);
    }

    #[test]
    fn children_belong_to_their_parents() {
        let paragraph = UnitKey::Paragraph {
            chapter: 2,
            paragraph: 7,
        };
        let chapter = UnitKey::Chapter { chapter: 2 };
        assert!(sentence(0).belongs_to(&paragraph));
        assert!(sentence(0).belongs_to(&chapter));
        assert!(paragraph.belongs_to(&chapter));
        assert!(!sentence(0).belongs_to(&UnitKey::Paragraph {
            chapter: 2,
            paragraph: 6
        }));
        assert!(!paragraph.belongs_to(&UnitKey::Chapter { chapter: 3 }));
        assert!(!chapter.belongs_to(&chapter));
        assert!(!paragraph.belongs_to(&sentence(0)));
    }

    #[test]
    fn sequence_index_is_numeric() {
        assert_eq!(sequence_index("part2-pgraph7-sntnc10.wav"), Some(10));
        assert_eq!(sequence_index("sntnc9.wav"), Some(9));
        assert_eq!(sequence_index("notes.wav"), None);

        let mut names: Vec<String> = [10, 2, 9, 1, 0, 11]
            .iter()
            .map(|&n| sentence(n).file_name())
            .collect();
        names.sort();
        assert_eq!(names[0], "part2-pgraph7-sntnc0.wav");
        assert_eq!(names[1], "part2-pgraph7-sntnc1.wav");
        assert_eq!(names[2], "part2-pgraph7-sntnc10.wav");

        names.sort_by_key(|n| sequence_index(n));
        let order: Vec<usize> = names.iter().filter_map(|n| sequence_index(n)).collect();
        assert_eq!(order, vec![0, 1, 2, 9, 10, 11]);
    }

    #[test]
    fn memory_store_operations() {
        let mut store = MemoryStore::new();
        let key = UnitKey::Chapter { chapter: 1 };
        assert!(!store.has(&key));
        assert!(matches!(store.read(&key), Err(BookError::MissingUnit { .. })));

        let clip = AudioClip::new(vec![0.1; 500], 1000, 1);
        store.write(&key, &clip).expect("write");
        assert!(store.has(&key));
        assert_eq!(store.duration_ms(&key).expect("duration"), 500);
        assert_eq!(store.writes(), 1);

        store.delete(&key).expect("delete");
        assert!(store.is_empty());
        store.delete(&key).expect("deleting twice is fine");
        assert_eq!(store.deletes(), 1);
    }

    #[test]
    fn disk_store_operations() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = DiskStore::new(&dir.path().join("units")).expect("store");
        let key = sentence(3);
        assert!(!store.has(&key));

        let clip = AudioClip::new(vec![0.25; 2400], 24000, 1);
        store.write(&key, &clip).expect("write");
        assert!(store.path(&key).ends_with("part2-pgraph7-sntnc3.wav"));
        assert!(store.has(&key));
        assert_eq!(store.read(&key).expect("read"), clip);
        assert_eq!(store.duration_ms(&key).expect("duration"), 100);

        store.delete(&key).expect("delete");
        assert!(!store.has(&key));
        assert!(store.read(&key).is_err());
    }

    #[test]
    fn disk_store_lists_only_unit_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = DiskStore::new(dir.path()).expect("store");
        let clip = AudioClip::new(vec![0.0; 10], 1000, 1);
        store.write(&sentence(1), &clip).expect("write");
        store.write(&UnitKey::Chapter { chapter: 4 }, &clip).expect("write");
        fs::write(dir.path().join("filelist.txt"), "file 'part4.wav'\n").expect("list");

        let mut keys = store.keys().expect("keys");
        keys.sort_by_key(|k| k.file_name());
        assert_eq!(keys, vec![sentence(1), UnitKey::Chapter { chapter: 4 }]);
    }
}
