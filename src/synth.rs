//! Speech synthesis engines and per-sentence narration.

use std::path::{Path, PathBuf};
use std::process::{Command as ProcessCommand, Stdio};

use log::{error, info, warn};

use crate::audio::AudioClip;
use crate::config::{Config, FailurePolicy};
use crate::error::{BookError, Result};
use crate::retry::with_retry;
use crate::store::{UnitKey, UnitStore};
use crate::text::sentence_case;

/// Accelerator the neural engine runs on, chosen once per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cuda,
    Mps,
    Cpu,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Cuda => "cuda",
            Device::Mps => "mps",
            Device::Cpu => "cpu",
        }
    }
}

pub fn detect_device() -> Device {
    if program_available("nvidia-smi") {
        Device::Cuda
    } else if cfg!(all(target_os = "macos", target_arch = "aarch64")) {
        Device::Mps
    } else {
        Device::Cpu
    }
}

fn program_available(program: &str) -> bool {
    ProcessCommand::new("which")
        .arg(program)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    pub text: String,
    /// Reference recording for voice cloning; `None` uses the engine's voice.
    pub voice_sample: Option<PathBuf>,
    pub exaggeration: f32,
    pub cfg_weight: f32,
}

/// A text-to-speech backend producing one clip per call.
pub trait Synthesizer {
    fn name(&self) -> &str;

    /// Sample rate of the clips this engine produces.
    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16 {
        1
    }

    fn synthesize(&mut self, request: &SynthesisRequest) -> Result<AudioClip>;
}

/// Neural engine driven through an external command that writes a WAV file.
///
/// Invoked as `<program> --text <t> --output <wav> --device <d>
/// --exaggeration <x> --cfg-weight <w> [--audio-prompt <sample>]`.
///
/// The output format is taken on trust from [`CommandSynthesizer::with_format`]
/// (24 kHz mono by default) until the first clip arrives. A silent
/// placeholder written before then uses that format, and a paragraph mixing
/// it with real clips of another format fails to assemble.
pub struct CommandSynthesizer {
    program: String,
    device: Device,
    sample_rate: u32,
    channels: u16,
}

impl CommandSynthesizer {
    pub fn new(program: &str, device: Device) -> Self {
        Self {
            program: program.to_string(),
            device,
            sample_rate: 24000,
            channels: 1,
        }
    }

    pub fn with_format(mut self, sample_rate: u32, channels: u16) -> Self {
        self.sample_rate = sample_rate;
        self.channels = channels;
        self
    }

    fn command(&self, request: &SynthesisRequest, output: &Path) -> ProcessCommand {
        let mut cmd = ProcessCommand::new(&self.program);
        cmd.arg("--text")
            .arg(&request.text)
            .arg("--output")
            .arg(output)
            .arg("--device")
            .arg(self.device.as_str())
            .arg("--exaggeration")
            .arg(request.exaggeration.to_string())
            .arg("--cfg-weight")
            .arg(request.cfg_weight.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        if let Some(sample) = &request.voice_sample {
            cmd.arg("--audio-prompt").arg(sample);
        }
        if self.device == Device::Mps {
            cmd.env("PYTORCH_ENABLE_MPS_FALLBACK", "1");
        }
        cmd
    }
}

impl Synthesizer for CommandSynthesizer {
    fn name(&self) -> &str {
        &self.program
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn synthesize(&mut self, request: &SynthesisRequest) -> Result<AudioClip> {
        let output = tempfile::Builder::new().suffix(".wav").tempfile()?;
        let result = self
            .command(request, output.path())
            .output()
            .map_err(|e| BookError::Synthesis {
                message: format!("failed to run {}: {e}", self.program),
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(BookError::Synthesis {
                message: format!(
                    "{} exited with {}: {}",
                    self.program,
                    result.status,
                    stderr.trim().lines().last().unwrap_or_default()
                ),
            });
        }
        if std::fs::metadata(output.path())?.len() == 0 {
            return Err(BookError::Synthesis {
                message: format!("{} produced no audio", self.program),
            });
        }

        let clip = AudioClip::read_wav(output.path())?;
        if clip.sample_rate != self.sample_rate || clip.channels != self.channels {
            warn!(
                "{} wrote {}, expected {} Hz/{} ch; set engine_sample_rate to match",
                self.program,
                clip.format(),
                self.sample_rate,
                self.channels
            );
        }
        self.sample_rate = clip.sample_rate;
        self.channels = clip.channels;
        Ok(clip)
    }
}

/// Fallback engine using espeak-ng or espeak. Ignores voice samples.
pub struct EspeakSynthesizer {
    program: String,
}

impl EspeakSynthesizer {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }
}

impl Synthesizer for EspeakSynthesizer {
    fn name(&self) -> &str {
        &self.program
    }

    fn sample_rate(&self) -> u32 {
        22050
    }

    fn synthesize(&mut self, request: &SynthesisRequest) -> Result<AudioClip> {
        let output = tempfile::Builder::new().suffix(".wav").tempfile()?;
        let status = ProcessCommand::new(&self.program)
            .arg("-v")
            .arg("en")
            .arg("-s")
            .arg("175")
            .arg("-a")
            .arg("100")
            .arg("-w")
            .arg(output.path())
            .arg(&request.text)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| BookError::Synthesis {
                message: format!("failed to run {}: {e}", self.program),
            })?;

        if !status.success() {
            return Err(BookError::Synthesis {
                message: format!("{} exited with {status}", self.program),
            });
        }
        AudioClip::read_wav(output.path())
    }
}

/// Pick the synthesis engine for this run: the configured command, else the
/// first espeak found on `PATH`.
pub fn detect_engine(
    config: &Config,
    voice_sample: Option<&Path>,
    device: Device,
) -> Result<Box<dyn Synthesizer>> {
    if let Some(program) = &config.engine {
        if !program_available(program) && !Path::new(program).is_file() {
            return Err(BookError::NoEngine {
                message: format!("{program} is not on PATH"),
            });
        }
        info!("Using {program} on {}", device.as_str());
        return Ok(Box::new(
            CommandSynthesizer::new(program, device).with_format(config.engine_sample_rate, 1),
        ));
    }

    for program in ["espeak-ng", "espeak"] {
        if program_available(program) {
            if voice_sample.is_some() {
                warn!("{program} cannot clone voices; ignoring the voice sample");
            }
            info!("No neural engine configured, falling back to {program}");
            return Ok(Box::new(EspeakSynthesizer::new(program)));
        }
    }

    Err(BookError::NoEngine {
        message: "configure --engine or install espeak-ng or espeak".to_string(),
    })
}

/// What happened to one sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The unit was already in the store.
    Existing,
    Synthesized,
    /// Every attempt failed; a silent unit stands in.
    Placeholder,
    /// Every attempt failed; no unit was written.
    Dropped,
}

/// A sentence the engine never voiced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbandonedSentence {
    pub unit: UnitKey,
    pub text: String,
}

/// Voices sentences into the store, one at a time, with bounded retry.
pub struct Narrator<'a> {
    engine: &'a mut dyn Synthesizer,
    voice_sample: Option<PathBuf>,
    exaggeration: f32,
    cfg_weight: f32,
    max_attempts: u32,
    on_failure: FailurePolicy,
    placeholder_ms: u32,
    synthesis_calls: usize,
    abandoned: Vec<AbandonedSentence>,
}

impl<'a> Narrator<'a> {
    pub fn new(engine: &'a mut dyn Synthesizer, config: &Config, voice_sample: Option<PathBuf>) -> Self {
        Self {
            engine,
            voice_sample,
            exaggeration: config.exaggeration,
            cfg_weight: config.cfg_weight,
            max_attempts: config.max_attempts,
            on_failure: config.on_failure,
            placeholder_ms: config.placeholder_ms,
            synthesis_calls: 0,
            abandoned: Vec::new(),
        }
    }

    pub fn synthesis_calls(&self) -> usize {
        self.synthesis_calls
    }

    pub fn abandoned(&self) -> &[AbandonedSentence] {
        &self.abandoned
    }

    pub fn into_abandoned(self) -> Vec<AbandonedSentence> {
        self.abandoned
    }

    /// Synthesize `sentence` into the unit `key` unless it already exists.
    pub fn narrate<S: UnitStore>(&mut self, store: &mut S, key: UnitKey, sentence: &str) -> Result<Outcome> {
        if store.has(&key) {
            info!("{key} exists, skipping");
            return Ok(Outcome::Existing);
        }

        let request = SynthesisRequest {
            text: sentence_case(sentence.trim()),
            voice_sample: self.voice_sample.clone(),
            exaggeration: self.exaggeration,
            cfg_weight: self.cfg_weight,
        };
        let label = format!("sentence '{}'", request.text);
        let engine = &mut *self.engine;
        let calls = &mut self.synthesis_calls;

        let result = with_retry(self.max_attempts, &label, |_| {
            *calls += 1;
            let clip = engine.synthesize(&request)?;
            store.write(&key, &clip)?;
            if !store.has(&key) {
                return Err(BookError::MissingOutput {
                    unit: key.file_name(),
                });
            }
            Ok(())
        });

        match result {
            Ok(()) => Ok(Outcome::Synthesized),
            Err(e) => self.abandon(store, key, request.text, e),
        }
    }

    fn abandon<S: UnitStore>(
        &mut self,
        store: &mut S,
        key: UnitKey,
        text: String,
        cause: BookError,
    ) -> Result<Outcome> {
        match self.on_failure {
            FailurePolicy::Abort => {
                error!("Failed to voice '{text}': {cause}");
                Err(BookError::SentenceAbandoned {
                    text,
                    attempts: self.max_attempts,
                })
            }
            FailurePolicy::Skip => {
                warn!("Dropping '{text}' from {key}");
                self.abandoned.push(AbandonedSentence { unit: key, text });
                Ok(Outcome::Dropped)
            }
            FailurePolicy::Silence => {
                warn!("Replacing '{text}' with {} ms of silence", self.placeholder_ms);
                let placeholder = AudioClip::silence(
                    self.placeholder_ms,
                    self.engine.sample_rate(),
                    self.engine.channels(),
                );
                store.write(&key, &placeholder)?;
                self.abandoned.push(AbandonedSentence { unit: key, text });
                Ok(Outcome::Placeholder)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    /// Fails the first `failures` calls, then emits one sample per character.
    struct ScriptedEngine {
        failures: usize,
        calls: usize,
        texts: Vec<String>,
    }

    impl ScriptedEngine {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                calls: 0,
                texts: Vec::new(),
            }
        }
    }

    impl Synthesizer for ScriptedEngine {
        fn name(&self) -> &str {
            "scripted"
        }

        fn sample_rate(&self) -> u32 {
            1000
        }

        fn synthesize(&mut self, request: &SynthesisRequest) -> Result<AudioClip> {
            self.calls += 1;
            self.texts.push(request.text.clone());
            if self.calls <= self.failures {
                return Err(BookError::Synthesis {
                    message: format!("call {}", self.calls),
                });
            }
            Ok(AudioClip::new(vec![0.5; request.text.len()], 1000, 1))
        }
    }

    /// Accepts writes but never keeps them.
    struct ForgetfulStore;

    impl UnitStore for ForgetfulStore {
        fn has(&self, _key: &UnitKey) -> bool {
            false
        }

        fn write(&mut self, _key: &UnitKey, _clip: &AudioClip) -> Result<()> {
            Ok(())
        }

        fn read(&self, key: &UnitKey) -> Result<AudioClip> {
            Err(BookError::MissingUnit {
                unit: key.file_name(),
                message: "forgotten".to_string(),
            })
        }

        fn delete(&mut self, _key: &UnitKey) -> Result<()> {
            Ok(())
        }

        fn keys(&self) -> Result<Vec<UnitKey>> {
            Ok(Vec::new())
        }
    }

    fn key() -> UnitKey {
        UnitKey::Sentence {
            chapter: 1,
            paragraph: 0,
            sentence: 0,
        }
    }

    fn config(policy: FailurePolicy) -> Config {
        Config {
            on_failure: policy,
            ..Config::default()
        }
    }

    #[test]
    fn third_attempt_success_produces_unit() {
        let mut engine = ScriptedEngine::new(2);
        let mut store = MemoryStore::new();
        let outcome = {
            let mut narrator = Narrator::new(&mut engine, &config(FailurePolicy::Abort), None);
            let outcome = narrator.narrate(&mut store, key(), "Hello there.").expect("narrate");
            assert_eq!(narrator.synthesis_calls(), 3);
            assert!(narrator.abandoned().is_empty());
            outcome
        };
        assert_eq!(outcome, Outcome::Synthesized);
        assert_eq!(engine.calls, 3);
        assert_eq!(store.read(&key()).expect("unit").samples.len(), 12);
    }

    #[test]
    fn retries_use_identical_normalized_text() {
        let mut engine = ScriptedEngine::new(1);
        let mut store = MemoryStore::new();
        let mut narrator = Narrator::new(&mut engine, &config(FailurePolicy::Abort), None);
        narrator
            .narrate(&mut store, key(), "  SHE SHOUTED LOUDLY at him ")
            .expect("narrate");
        drop(narrator);
        assert_eq!(
            engine.texts,
            vec!["She shouted loudly at him", "She shouted loudly at him"]
        );
    }

    #[test]
    fn existing_unit_is_not_resynthesized() {
        let mut engine = ScriptedEngine::new(0);
        let mut store = MemoryStore::new();
        store
            .write(&key(), &AudioClip::new(vec![0.1; 3], 1000, 1))
            .expect("seed");
        let mut narrator = Narrator::new(&mut engine, &Config::default(), None);
        let outcome = narrator.narrate(&mut store, key(), "Hello.").expect("narrate");
        drop(narrator);
        assert_eq!(outcome, Outcome::Existing);
        assert_eq!(engine.calls, 0);
        assert_eq!(store.writes(), 1);
    }

    #[test]
    fn exhausted_sentence_gets_silent_placeholder() {
        let mut engine = ScriptedEngine::new(usize::MAX);
        let mut store = MemoryStore::new();
        let mut narrator = Narrator::new(&mut engine, &config(FailurePolicy::Silence), None);
        let outcome = narrator.narrate(&mut store, key(), "Lost words.").expect("narrate");
        assert_eq!(outcome, Outcome::Placeholder);
        assert_eq!(narrator.abandoned().len(), 1);
        assert_eq!(narrator.abandoned()[0].text, "Lost words.");
        drop(narrator);
        assert_eq!(engine.calls, 3);
        let placeholder = store.read(&key()).expect("placeholder");
        assert_eq!(placeholder.duration_ms(), 1000);
        assert!(placeholder.samples.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn exhausted_sentence_dropped_under_skip() {
        let mut engine = ScriptedEngine::new(usize::MAX);
        let mut store = MemoryStore::new();
        let mut narrator = Narrator::new(&mut engine, &config(FailurePolicy::Skip), None);
        let outcome = narrator.narrate(&mut store, key(), "Lost words.").expect("narrate");
        assert_eq!(outcome, Outcome::Dropped);
        assert_eq!(narrator.into_abandoned().len(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn exhausted_sentence_fatal_under_abort() {
        let mut engine = ScriptedEngine::new(usize::MAX);
        let mut store = MemoryStore::new();
        let mut narrator = Narrator::new(&mut engine, &config(FailurePolicy::Abort), None);
        let err = narrator.narrate(&mut store, key(), "Lost words.").unwrap_err();
        assert!(matches!(err, BookError::SentenceAbandoned { attempts: 3, .. }));
    }

    #[test]
    fn unwritten_output_counts_as_failure() {
        let mut engine = ScriptedEngine::new(0);
        let mut store = ForgetfulStore;
        let mut narrator = Narrator::new(&mut engine, &config(FailurePolicy::Skip), None);
        let outcome = narrator.narrate(&mut store, key(), "Hello.").expect("narrate");
        assert_eq!(outcome, Outcome::Dropped);
        drop(narrator);
        assert_eq!(engine.calls, 3);
    }

    #[test]
    fn placeholder_uses_configured_engine_format() {
        let mut engine = CommandSynthesizer::new("/nonexistent/engine", Device::Cpu).with_format(16000, 1);
        assert_eq!(engine.sample_rate(), 16000);

        let mut store = MemoryStore::new();
        let mut narrator = Narrator::new(&mut engine, &config(FailurePolicy::Silence), None);
        let outcome = narrator.narrate(&mut store, key(), "Hello.").expect("narrate");
        assert_eq!(outcome, Outcome::Placeholder);
        let placeholder = store.read(&key()).expect("placeholder");
        assert_eq!(placeholder.sample_rate, 16000);
        assert_eq!(placeholder.duration_ms(), 1000);
    }

    #[test]
    fn device_names() {
        assert_eq!(Device::Cuda.as_str(), "cuda");
        assert_eq!(Device::Mps.as_str(), "mps");
        assert_eq!(Device::Cpu.as_str(), "cpu");
    }

    #[test]
    fn command_engine_passes_controls_through() {
        let engine = CommandSynthesizer::new("chatterbox-say", Device::Cpu);
        let request = SynthesisRequest {
            text: "Hi.".to_string(),
            voice_sample: Some(PathBuf::from("voice.wav")),
            exaggeration: 0.7,
            cfg_weight: 0.4,
        };
        let cmd = engine.command(&request, Path::new("out.wav"));
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "--text", "Hi.", "--output", "out.wav", "--device", "cpu", "--exaggeration",
                "0.7", "--cfg-weight", "0.4", "--audio-prompt", "voice.wav"
            ]
        );
    }
}
