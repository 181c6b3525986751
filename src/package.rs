//! Final container assembly with ffmpeg.

use std::ffi::OsString;
use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::{Command as ProcessCommand, Stdio};

use log::{debug, info, warn};

use crate::error::{BookError, Result};
use crate::metadata::{write_ffmetadata, ChapterMark};
use crate::pipeline::AssembledChapter;
use crate::store::{DiskStore, UnitStore};

const FILE_LIST: &str = "filelist.txt";
const METADATA_FILE: &str = "FFMETADATAFILE";

/// `<source stem> (<voice>).m4b` next to the source.
pub fn output_path(source: &Path, voice_sample: Option<&Path>) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audiobook".to_string());
    let voice = voice_sample
        .and_then(Path::file_stem)
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "default".to_string());
    source.with_file_name(format!("{stem} ({voice}).m4b"))
}

/// Ask before replacing `path`. Returns `false` when the user declines.
/// An accepted overwrite removes the existing file.
pub fn confirm_overwrite<R: BufRead, W: Write>(
    path: &Path,
    assume_yes: bool,
    input: &mut R,
    output: &mut W,
) -> Result<bool> {
    if !path.exists() {
        return Ok(true);
    }
    if !assume_yes {
        writeln!(output, "The file '{}' already exists.", path.display())?;
        write!(output, "Do you want to overwrite the file? (y/n): ")?;
        output.flush()?;
        let mut answer = String::new();
        input.read_line(&mut answer)?;
        if !answer.trim().eq_ignore_ascii_case("y") {
            return Ok(false);
        }
    }
    fs::remove_file(path)?;
    Ok(true)
}

/// Concat demuxer input listing units by file name, relative to the list.
pub fn concat_list(files: &[String]) -> String {
    files
        .iter()
        .map(|name| format!("file '{}'\n", name.replace('\'', "'\\''")))
        .collect()
}

pub struct Packager {
    ffmpeg: String,
}

impl Default for Packager {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl Packager {
    pub fn new(ffmpeg: &str) -> Self {
        Self {
            ffmpeg: ffmpeg.to_string(),
        }
    }

    fn concat_args(list: &Path, m4a: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-y", "-hide_banner", "-loglevel", "error"]
            .iter()
            .map(OsString::from)
            .collect();
        args.extend(["-f", "concat", "-safe", "0", "-i"].map(OsString::from));
        args.push(list.into());
        args.extend(["-codec:a", "flac", "-f", "mp4", "-strict", "-2"].map(OsString::from));
        args.push(m4a.into());
        args
    }

    fn finalize_args(m4a: &Path, metadata: &Path, cover: Option<&Path>, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-y", "-hide_banner", "-loglevel", "error", "-i"]
            .iter()
            .map(OsString::from)
            .collect();
        args.push(m4a.into());
        args.push("-i".into());
        args.push(metadata.into());
        if let Some(cover) = cover {
            args.push("-i".into());
            args.push(cover.into());
        }
        args.extend(["-map_metadata", "1", "-map", "0:a"].map(OsString::from));
        if cover.is_some() {
            args.extend(
                ["-map", "2:v", "-c:v", "copy", "-disposition:v:0", "attached_pic"].map(OsString::from),
            );
        }
        args.extend(["-c:a", "aac"].map(OsString::from));
        args.push(output.into());
        args
    }

    fn run(&self, step: &str, args: &[OsString]) -> Result<()> {
        debug!("{} {:?}", self.ffmpeg, args);
        let result = ProcessCommand::new(&self.ffmpeg)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| BookError::Packager {
                step: step.to_string(),
                message: format!("failed to run {}: {e}", self.ffmpeg),
            })?;
        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(BookError::Packager {
                step: step.to_string(),
                message: format!(
                    "{} exited with {}: {}",
                    self.ffmpeg,
                    result.status,
                    stderr.trim().lines().last().unwrap_or_default()
                ),
            });
        }
        Ok(())
    }

    /// Build the chaptered `.m4b` at `output` from the chapter units, then
    /// remove the intermediates and the chapter units.
    #[allow(clippy::too_many_arguments)]
    pub fn package(
        &self,
        store: &mut DiskStore,
        title: &str,
        author: &str,
        chapters: &[AssembledChapter],
        marks: &[ChapterMark],
        cover: Option<&Path>,
        output: &Path,
    ) -> Result<()> {
        let work_dir = store.root().to_path_buf();
        let list = work_dir.join(FILE_LIST);
        let metadata = work_dir.join(METADATA_FILE);
        let m4a = work_dir.join(output.with_extension("m4a").file_name().unwrap_or_default());

        let names: Vec<String> = chapters.iter().map(|c| c.unit.file_name()).collect();
        fs::write(&list, concat_list(&names))?;
        write_ffmetadata(&metadata, title, author, marks)?;

        let cover = cover.filter(|path| {
            let found = path.is_file();
            if !found {
                warn!("Cover image {} not found", path.display());
            }
            found
        });

        info!("Concatenating {} chapters", chapters.len());
        self.run("concatenation", &Self::concat_args(&list, &m4a))?;
        info!("Writing {}", output.display());
        self.run("chapter encoding", &Self::finalize_args(&m4a, &metadata, cover, output))?;

        for path in [&list, &metadata, &m4a] {
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
        for chapter in chapters {
            store.delete(&chapter.unit)?;
        }
        Ok(())
    }
}
