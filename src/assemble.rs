//! Folding child units into their parent: sentences into a paragraph,
//! paragraphs into a chapter.

use log::{debug, error, info};

use crate::error::{BookError, Result};
use crate::store::{sequence_index, UnitKey, UnitStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildOrder {
    /// Sort by the sequence number in each unit's file name.
    EmbeddedIndex,
    /// Keep the order the children were produced in.
    AsGiven,
}

/// Concatenate `children` into `parent`, padding the last child with
/// `silence_ms` of silence, then delete the children.
///
/// A child that cannot be read aborts the fold before anything is written.
pub fn fold_units<S: UnitStore>(
    store: &mut S,
    children: &[UnitKey],
    order: ChildOrder,
    silence_ms: u32,
    parent: UnitKey,
) -> Result<()> {
    let mut ordered = children.to_vec();
    if order == ChildOrder::EmbeddedIndex {
        ordered.sort_by_key(|key| sequence_index(&key.file_name()));
    }

    let mut clips = Vec::with_capacity(ordered.len());
    for key in &ordered {
        let clip = store.read(key).map_err(|e| {
            error!("Cannot assemble {parent}: {key} unreadable ({e}); ordered units: {ordered:?}");
            BookError::MissingUnit {
                unit: key.file_name(),
                message: e.to_string(),
            }
        })?;
        clips.push(clip);
    }

    let mut clips = clips.into_iter();
    let Some(mut combined) = clips.next() else {
        return Err(BookError::MissingUnit {
            unit: parent.file_name(),
            message: "no child units to assemble".to_string(),
        });
    };
    let mut rest: Vec<_> = clips.collect();
    match rest.last_mut() {
        Some(last) => last.append_silence(silence_ms),
        None => combined.append_silence(silence_ms),
    }
    for clip in &rest {
        combined.append(clip, &parent.file_name())?;
    }

    store.write(&parent, &combined)?;
    debug!("assembled {parent} from {} units", ordered.len());
    for key in &ordered {
        store.delete(key)?;
    }
    Ok(())
}

/// Delete units left under an existing `parent` by a fold that was
/// interrupted after writing the parent. Returns how many were removed.
pub fn discard_leftovers<S: UnitStore>(store: &mut S, parent: &UnitKey) -> Result<usize> {
    let leftovers: Vec<UnitKey> = store
        .keys()?
        .into_iter()
        .filter(|key| key.belongs_to(parent))
        .collect();
    for key in &leftovers {
        store.delete(key)?;
    }
    if !leftovers.is_empty() {
        info!("Removed {} leftover units under {parent}", leftovers.len());
    }
    Ok(leftovers.len())
}

/// Sentence units into one paragraph unit, in sentence-number order.
pub fn assemble_paragraph<S: UnitStore>(
    store: &mut S,
    chapter: usize,
    paragraph: usize,
    sentences: &[UnitKey],
    pause_ms: u32,
) -> Result<UnitKey> {
    let key = UnitKey::Paragraph { chapter, paragraph };
    fold_units(store, sentences, ChildOrder::EmbeddedIndex, pause_ms, key)?;
    Ok(key)
}

/// Paragraph units into one chapter unit, in paragraph order.
pub fn assemble_chapter<S: UnitStore>(
    store: &mut S,
    chapter: usize,
    paragraphs: &[UnitKey],
    pause_ms: u32,
) -> Result<UnitKey> {
    let key = UnitKey::Chapter { chapter };
    fold_units(store, paragraphs, ChildOrder::AsGiven, pause_ms, key)?;
    Ok(key)
}
