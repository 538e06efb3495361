//! The single rodio output slot shared by every backend.
//!
//! At most one sink is installed at a time. Installing checks the caller's
//! cancellation token under the slot lock, so a cancelled utterance can never
//! start sounding after `cancel` returned.

use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use hound::{SampleFormat, WavSpec};
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, PlayError, Sink, StreamError};
use thiserror::Error;
use tracing::debug;

use super::SpeakOutcome;
use crate::cache;
use crate::cancellation::CancellationToken;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("opening audio output: {0}")]
    Stream(#[from] StreamError),
    #[error("creating sink: {0}")]
    Sink(#[from] PlayError),
    #[error("unplayable audio: {channels} channel(s) at {sample_rate} Hz")]
    Format { channels: u16, sample_rate: u32 },
}

/// Decoded interleaved samples in `[-1.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmAudio {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl PcmAudio {
    /// Interpret raw 16-bit little-endian PCM. A trailing odd byte is ignored.
    pub fn from_pcm16le(bytes: &[u8], sample_rate: u32, channels: u16) -> Self {
        let samples = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
            .collect();
        Self {
            sample_rate,
            channels,
            samples,
        }
    }

    pub fn from_wav_reader<R: Read>(reader: R) -> Result<Self, hound::Error> {
        let mut reader = hound::WavReader::new(reader)?;
        let spec = reader.spec();
        let samples = match spec.sample_format {
            SampleFormat::Float => reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
            SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .samples::<i32>()
                    .map(|sample| sample.map(|value| value as f32 / scale))
                    .collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(Self {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    pub fn read_wav(path: &Path) -> Result<Self, hound::Error> {
        let file = File::open(path)?;
        Self::from_wav_reader(BufReader::new(file))
    }

    /// Write as 16-bit WAV through a temp file so readers never see a partial file.
    pub fn write_wav(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let spec = WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let temp_path = cache::unique_temp_path(path);
        let mut writer = hound::WavWriter::create(&temp_path, spec)
            .with_context(|| format!("creating {}", temp_path.display()))?;
        for &sample in &self.samples {
            let clamped =
                (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            writer.write_sample(clamped)?;
        }
        writer.finalize()?;
        if fs::rename(&temp_path, path).is_err() {
            fs::copy(&temp_path, path)
                .with_context(|| format!("copying into {}", path.display()))?;
            let _ = fs::remove_file(&temp_path);
        }
        Ok(())
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 || self.channels == 0 {
            return Duration::ZERO;
        }
        let frames = self.samples.len() as f64 / self.channels as f64;
        Duration::from_secs_f64(frames / self.sample_rate as f64)
    }
}

struct ActiveSink {
    id: u64,
    sink: Arc<Sink>,
}

struct Slot {
    active: Option<ActiveSink>,
    next_id: u64,
    paused: bool,
    speed: f32,
}

pub struct AudioOutput {
    slot: Mutex<Slot>,
}

impl Default for AudioOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioOutput {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                active: None,
                next_id: 0,
                paused: false,
                speed: 1.0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Play `audio` to the end, or until `cancel` fires or the sink is released.
    ///
    /// The output stream is opened on the calling thread and dropped when
    /// playback ends; only the sink is shared with control calls.
    pub fn play(
        &self,
        audio: PcmAudio,
        cancel: &CancellationToken,
        on_audible: &mut dyn FnMut(),
    ) -> Result<SpeakOutcome, OutputError> {
        if audio.channels == 0 || audio.sample_rate == 0 {
            return Err(OutputError::Format {
                channels: audio.channels,
                sample_rate: audio.sample_rate,
            });
        }
        if cancel.is_cancelled() {
            return Ok(SpeakOutcome::Cancelled);
        }
        let duration = audio.duration();
        let (_stream, handle) = OutputStream::try_default()?;
        let sink = Arc::new(Sink::try_new(&handle)?);

        let id = {
            let mut slot = self.lock();
            if cancel.is_cancelled() {
                return Ok(SpeakOutcome::Cancelled);
            }
            if let Some(previous) = slot.active.take() {
                previous.sink.stop();
            }
            sink.set_speed(slot.speed);
            if slot.paused {
                sink.pause();
            }
            sink.append(SamplesBuffer::new(
                audio.channels,
                audio.sample_rate,
                audio.samples,
            ));
            slot.next_id += 1;
            let id = slot.next_id;
            slot.active = Some(ActiveSink {
                id,
                sink: Arc::clone(&sink),
            });
            id
        };
        debug!(id, duration_ms = duration.as_millis(), "Audio started");
        on_audible();

        loop {
            if cancel.is_cancelled() {
                self.release(id);
                return Ok(SpeakOutcome::Cancelled);
            }
            if sink.empty() {
                return Ok(if self.release(id) {
                    SpeakOutcome::Completed
                } else {
                    SpeakOutcome::Cancelled
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Drop the sink if it is still ours; false when something else released it.
    fn release(&self, id: u64) -> bool {
        let mut slot = self.lock();
        match slot.active.as_ref() {
            Some(active) if active.id == id => {
                if let Some(active) = slot.active.take() {
                    active.sink.stop();
                }
                true
            }
            _ => false,
        }
    }

    pub fn pause(&self) {
        let mut slot = self.lock();
        slot.paused = true;
        if let Some(active) = slot.active.as_ref() {
            debug!("Pausing playback");
            active.sink.pause();
        }
    }

    pub fn resume(&self) {
        let mut slot = self.lock();
        slot.paused = false;
        if let Some(active) = slot.active.as_ref() {
            debug!("Resuming playback");
            active.sink.play();
        }
    }

    /// Applies to the playing sink and to every later one.
    pub fn set_speed(&self, speed: f32) {
        let mut slot = self.lock();
        slot.speed = speed;
        if let Some(active) = slot.active.as_ref() {
            active.sink.set_speed(speed);
        }
    }

    /// Stop whatever is playing and forget any pause.
    pub fn cancel(&self) {
        let mut slot = self.lock();
        slot.paused = false;
        Self::stop_active(&mut slot);
    }

    /// Stop whatever is playing; a pending pause still applies to the next sink.
    pub fn stop_sink(&self) {
        let mut slot = self.lock();
        Self::stop_active(&mut slot);
    }

    fn stop_active(slot: &mut Slot) {
        if let Some(active) = slot.active.take() {
            debug!(id = active.id, "Stopping playback");
            active.sink.stop();
        }
    }

    pub fn speed(&self) -> f32 {
        self.lock().speed
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    pub fn is_active(&self) -> bool {
        self.lock().active.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn pcm16_is_scaled_to_unit_range() {
        let bytes = [0x00, 0x00, 0x00, 0x40, 0x00, 0x80, 0xff];
        let audio = PcmAudio::from_pcm16le(&bytes, 24_000, 1);
        assert_eq!(audio.samples, vec![0.0, 0.5, -1.0]);
        assert_eq!(audio.sample_rate, 24_000);
    }

    #[test]
    fn duration_counts_frames() {
        let audio = PcmAudio {
            sample_rate: 10,
            channels: 2,
            samples: vec![0.0; 40],
        };
        assert_eq!(audio.duration(), Duration::from_secs(2));
    }

    #[test]
    fn written_wav_reads_back() {
        let dir = std::env::temp_dir().join(format!("narrator-wav-{}", std::process::id()));
        let path = dir.join("clip.wav");
        let audio = PcmAudio {
            sample_rate: 24_000,
            channels: 1,
            samples: vec![0.0, 0.25, -0.25, 0.5],
        };
        audio.write_wav(&path).unwrap();

        let read = PcmAudio::read_wav(&path).unwrap();
        assert_eq!(read.sample_rate, 24_000);
        assert_eq!(read.channels, 1);
        assert_eq!(read.samples.len(), 4);
        for (got, want) in read.samples.iter().zip(&audio.samples) {
            assert!((got - want).abs() < 1e-3);
        }
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn garbage_is_not_a_wav() {
        assert!(PcmAudio::from_wav_reader(Cursor::new(b"not a wav file".to_vec())).is_err());
    }

    #[test]
    fn cancelled_token_never_installs_a_sink() {
        let output = AudioOutput::new();
        let token = CancellationToken::new();
        token.cancel();
        let mut audible = false;
        let outcome = output
            .play(
                PcmAudio::from_pcm16le(&[0, 0, 0, 0], 24_000, 1),
                &token,
                &mut || audible = true,
            )
            .unwrap();
        assert_eq!(outcome, SpeakOutcome::Cancelled);
        assert!(!audible);
        assert!(!output.is_active());
    }

    #[test]
    fn control_calls_are_noops_when_idle() {
        let output = AudioOutput::new();
        output.pause();
        output.set_speed(1.5);
        output.resume();
        output.cancel();
        assert!(!output.is_active());
    }

    #[test]
    fn stopping_the_sink_keeps_a_pending_pause() {
        let output = AudioOutput::new();
        output.pause();
        output.stop_sink();
        assert!(output.is_paused());

        output.cancel();
        assert!(!output.is_paused());
    }

    #[test]
    fn speed_persists_until_changed() {
        let output = AudioOutput::new();
        assert_eq!(output.speed(), 1.0);
        output.set_speed(1.75);
        output.stop_sink();
        output.cancel();
        assert_eq!(output.speed(), 1.75);
    }
}
