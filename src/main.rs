use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Arg, ArgAction, Command};
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};

use chapterbook::config::{Config, FailurePolicy};
use chapterbook::epub::export_epub;
use chapterbook::error::BookError;
use chapterbook::metadata::chapter_marks;
use chapterbook::package::{confirm_overwrite, output_path, Packager};
use chapterbook::pipeline::Pipeline;
use chapterbook::store::DiskStore;
use chapterbook::synth::{detect_device, detect_engine};
use chapterbook::text::parse_book;

fn cli() -> Command {
    Command::new("chapterbook")
    .version("1.0")
    .about("Converts text or EPUB books to chaptered M4B audiobooks")
    .arg(
        Arg::new("sourcefile")
        .value_name("FILE")
        .help("Text file to narrate, or EPUB file to export as text")
        .required(true),
    )
    .arg(
        Arg::new("sample")
        .long("sample")
        .value_name("WAV")
        .help("Voice sample to clone"),
    )
    .arg(
        Arg::new("cover")
        .long("cover")
        .value_name("IMAGE")
        .help("Cover image embedded in the audiobook"),
    )
    .arg(
        Arg::new("notitles")
        .long("notitles")
        .help("Do not read chapter titles aloud")
        .action(ArgAction::SetTrue),
    )
    .arg(
        Arg::new("exaggeration")
        .long("exaggeration")
        .value_name("FLOAT")
        .help("Emotion exaggeration [default: 0.7]")
        .value_parser(clap::value_parser!(f32)),
    )
    .arg(
        Arg::new("cfg_weight")
        .long("cfg_weight")
        .value_name("FLOAT")
        .help("Classifier-free guidance weight [default: 0.4]")
        .value_parser(clap::value_parser!(f32)),
    )
    .arg(
        Arg::new("config")
        .long("config")
        .value_name("JSON")
        .help("Configuration file"),
    )
    .arg(
        Arg::new("engine")
        .long("engine")
        .value_name("PROGRAM")
        .help("External synthesis command (falls back to espeak)"),
    )
    .arg(
        Arg::new("workdir")
        .long("workdir")
        .value_name("DIR")
        .help("Directory holding intermediate audio units"),
    )
    .arg(
        Arg::new("on-failure")
        .long("on-failure")
        .value_name("POLICY")
        .help("What to do with a sentence that cannot be voiced")
        .value_parser(["silence", "skip", "abort"]),
    )
    .arg(
        Arg::new("yes")
        .short('y')
        .long("yes")
        .help("Overwrite existing output without asking")
        .action(ArgAction::SetTrue),
    )
}

/// File values first, then whatever was given on the command line.
fn load_config(matches: &clap::ArgMatches) -> Result<Config, BookError> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => Config::load(Path::new(path))?,
        None => Config::default(),
    };
    if matches.get_flag("notitles") {
        config.read_titles = false;
    }
    if let Some(value) = matches.get_one::<f32>("exaggeration") {
        config.exaggeration = *value;
    }
    if let Some(value) = matches.get_one::<f32>("cfg_weight") {
        config.cfg_weight = *value;
    }
    if let Some(engine) = matches.get_one::<String>("engine") {
        config.engine = Some(engine.clone());
    }
    if let Some(dir) = matches.get_one::<String>("workdir") {
        config.work_dir = PathBuf::from(dir);
    }
    if let Some(policy) = matches
        .get_one::<String>("on-failure")
        .and_then(|p| FailurePolicy::parse(p))
    {
        config.on_failure = policy;
    }
    if matches.get_flag("yes") {
        config.assume_yes = true;
    }
    Ok(config)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let matches = cli().get_matches();
    let config = load_config(&matches)?;
    let source = PathBuf::from(matches.get_one::<String>("sourcefile").map(String::as_str).unwrap_or_default());
    let voice_sample = matches.get_one::<String>("sample").map(PathBuf::from);
    let cover = matches.get_one::<String>("cover").map(PathBuf::from);

    let is_epub = source
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("epub"));
    if is_epub {
        if let Some(text) = export_epub(&source, config.assume_yes)? {
            info!("Review {} and run again on it to narrate", text.display());
        }
        return Ok(());
    }

    let source_id = source
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let book = parse_book(&fs::read_to_string(&source)?, &source_id);
    info!("{} by {}: {} chapters", book.title, book.author, book.chapters.len());

    let output = output_path(&source, voice_sample.as_deref());
    let stdin = io::stdin();
    if !confirm_overwrite(&output, config.assume_yes, &mut stdin.lock(), &mut io::stdout())? {
        info!("Exiting without overwriting {}", output.display());
        return Ok(());
    }

    let start_time = Instant::now();
    let device = detect_device();
    let mut engine = detect_engine(&config, voice_sample.as_deref(), device)?;
    let mut store = DiskStore::new(&config.work_dir)?;
    info!("Narrating with {} into {}", engine.name(), store.root().display());

    let progress = ProgressBar::new(0);
    progress.set_style(
        ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}/{len:3} {msg}")?
        .progress_chars("█▉▊▋▌▍▎▏  "),
    );
    let narration = Pipeline::new(&config, voice_sample.clone())
        .with_progress(progress)
        .run(&book, &mut store, engine.as_mut())?;

    if !narration.abandoned.is_empty() {
        warn!(
            "{} sentences could not be voiced ({:?} policy):",
            narration.abandoned.len(),
            config.on_failure
        );
        for sentence in &narration.abandoned {
            warn!("  {}: {}", sentence.unit, sentence.text);
        }
    }

    if narration.chapters.is_empty() {
        error!("No chapter produced audio");
        return Err(BookError::NothingToNarrate.into());
    }

    let marks = chapter_marks(&store, &book.chapter_titles(), &narration.chapters)?;
    Packager::default().package(
        &mut store,
        &book.title,
        &book.author,
        &narration.chapters,
        &marks,
        cover.as_deref(),
        &output,
    )?;

    info!(
        "Audiobook created in {:.2?} ({} synthesis calls): {}",
        start_time.elapsed(),
        narration.synthesis_calls,
        output.display()
    );
    Ok(())
}
