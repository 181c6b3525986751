//! PCM clips and WAV I/O.

use std::io::{Read, Seek, Write};
use std::path::Path;

use crate::error::{BookError, Result};

/// Interleaved f32 samples with their format.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioClip {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    pub fn silence(duration_ms: u32, sample_rate: u32, channels: u16) -> Self {
        let frames = frames_for(duration_ms, sample_rate);
        Self::new(vec![0.0; frames * channels as usize], sample_rate, channels)
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration_ms(&self) -> u64 {
        frames_to_ms(self.frames() as u64, self.sample_rate)
    }

    pub fn format(&self) -> String {
        format!("{} Hz/{} ch", self.sample_rate, self.channels)
    }

    /// Pad the end of the clip with silence in its own format.
    pub fn append_silence(&mut self, duration_ms: u32) {
        let count = frames_for(duration_ms, self.sample_rate) * self.channels as usize;
        self.samples.extend(std::iter::repeat(0.0).take(count));
    }

    /// Append `other`; both clips must share sample rate and channel count.
    pub fn append(&mut self, other: &AudioClip, unit: &str) -> Result<()> {
        if other.sample_rate != self.sample_rate || other.channels != self.channels {
            return Err(BookError::FormatMismatch {
                unit: unit.to_string(),
                expected: self.format(),
                actual: other.format(),
            });
        }
        self.samples.extend_from_slice(&other.samples);
        Ok(())
    }

    fn wav_spec(&self) -> hound::WavSpec {
        hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        }
    }

    /// Write the clip as a 32-bit float WAV.
    pub fn write_wav(&self, path: &Path) -> Result<()> {
        let writer = hound::WavWriter::create(path, self.wav_spec())?;
        self.write_samples(writer)
    }

    pub fn write_wav_to<W: Write + Seek>(&self, sink: W) -> Result<()> {
        let writer = hound::WavWriter::new(sink, self.wav_spec())?;
        self.write_samples(writer)
    }

    fn write_samples<W: Write + Seek>(&self, mut writer: hound::WavWriter<W>) -> Result<()> {
        for &sample in &self.samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
        Ok(())
    }

    pub fn read_wav(path: &Path) -> Result<Self> {
        Self::from_reader(hound::WavReader::open(path)?)
    }

    pub fn read_wav_from<R: Read>(source: R) -> Result<Self> {
        Self::from_reader(hound::WavReader::new(source)?)
    }

    /// Decode float or integer PCM into f32 samples.
    fn from_reader<R: Read>(mut reader: hound::WavReader<R>) -> Result<Self> {
        let spec = reader.spec();
        let samples = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<std::result::Result<Vec<_>, _>>()?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<Vec<_>, _>>()?
            }
        };
        Ok(Self::new(samples, spec.sample_rate, spec.channels))
    }
}

/// Duration of a WAV file from its header, without decoding samples.
pub fn wav_duration_ms(path: &Path) -> Result<u64> {
    let reader = hound::WavReader::open(path)?;
    Ok(frames_to_ms(reader.duration() as u64, reader.spec().sample_rate))
}

fn frames_for(duration_ms: u32, sample_rate: u32) -> usize {
    (duration_ms as u64 * sample_rate as u64 / 1000) as usize
}

fn frames_to_ms(frames: u64, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    frames * 1000 / sample_rate as u64
}
