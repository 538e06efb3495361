//! Speech through the host's speech program (espeak-ng by default).
//!
//! Each sentence is rendered to a scratch WAV file by a child process and then
//! played through the shared output. The rate is baked in at render time, so a
//! rate change only applies from the next sentence.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use super::output::{AudioOutput, PcmAudio};
use super::{BackendError, BackendKind, SpeakOutcome, SpeechBackend, Utterance};
use crate::cache;
use crate::cancellation::CancellationToken;
use crate::config::NarratorConfig;

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const MIN_WPM: u32 = 80;
const MAX_WPM: u32 = 450;

/// One entry of the host voice list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceVoice {
    /// Value passed to `-v`.
    pub identifier: String,
    pub name: String,
    pub language: String,
}

/// Words-per-minute for a playback rate, kept within what espeak accepts.
pub fn words_per_minute(base: u32, rate: f32) -> u32 {
    let rate = if rate.is_finite() { rate.max(0.0) } else { 1.0 };
    ((base as f32 * rate).round() as u32).clamp(MIN_WPM, MAX_WPM)
}

/// Ask `program --voices` for its voices, keeping those whose language starts
/// with `language_prefix`.
pub fn list_voices(program: &str, language_prefix: &str) -> Result<Vec<DeviceVoice>> {
    let output = Command::new(program)
        .arg("--voices")
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("running {program} --voices"))?;
    if !output.status.success() {
        anyhow::bail!("{program} --voices exited with {}", output.status);
    }
    let listing = String::from_utf8_lossy(&output.stdout);
    let voices = parse_voice_list(&listing, language_prefix);
    debug!(count = voices.len(), prefix = language_prefix, "Listed device voices");
    Ok(voices)
}

/// Parse the column layout of `espeak-ng --voices`:
/// `Pty Language Age/Gender VoiceName File Other Languages`.
pub fn parse_voice_list(listing: &str, language_prefix: &str) -> Vec<DeviceVoice> {
    let prefix = language_prefix.to_ascii_lowercase();
    listing
        .lines()
        .skip_while(|line| !line.trim_start().starts_with("Pty"))
        .skip(1)
        .filter_map(|line| {
            let columns: Vec<&str> = line.split_whitespace().collect();
            if columns.len() < 5 {
                return None;
            }
            let language = columns[1];
            if !language.to_ascii_lowercase().starts_with(&prefix) {
                return None;
            }
            Some(DeviceVoice {
                identifier: language.to_string(),
                name: columns[3].replace('_', " "),
                language: language.to_string(),
            })
        })
        .collect()
}

pub struct DeviceBackend {
    program: String,
    voice: Option<String>,
    base_wpm: u32,
    settle_delay: Duration,
    scratch_dir: PathBuf,
    child: Mutex<ChildSlot>,
    output: AudioOutput,
}

/// The speech process in flight, tagged with the render that spawned it so a
/// stale render can never reap or kill a newer one.
#[derive(Default)]
struct ChildSlot {
    active: Option<OwnedChild>,
    next_id: u64,
}

struct OwnedChild {
    id: u64,
    child: Child,
}

impl OwnedChild {
    fn kill(mut self) {
        debug!(id = self.id, pid = self.child.id(), "Killing speech process");
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl DeviceBackend {
    pub fn new(config: &NarratorConfig, voice: Option<String>) -> Self {
        info!(
            program = %config.device_program,
            voice = voice.as_deref().unwrap_or("<none>"),
            "Device speech backend ready"
        );
        Self {
            program: config.device_program.clone(),
            voice,
            base_wpm: config.device_words_per_minute,
            settle_delay: Duration::from_millis(config.device_settle_delay_ms),
            scratch_dir: cache::device_dir(Path::new(&config.cache_dir)),
            child: Mutex::new(ChildSlot::default()),
            output: AudioOutput::new(),
        }
    }

    fn lock_child(&self) -> MutexGuard<'_, ChildSlot> {
        self.child.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Kill the speech process, whoever spawned it.
    fn kill_child(&self) {
        let taken = self.lock_child().active.take();
        if let Some(owned) = taken {
            owned.kill();
        }
    }

    /// Kill the speech process only if render `id` still owns it.
    fn kill_owned_child(&self, id: u64) {
        let taken = {
            let mut slot = self.lock_child();
            match slot.active.as_ref() {
                Some(owned) if owned.id == id => slot.active.take(),
                _ => None,
            }
        };
        if let Some(owned) = taken {
            owned.kill();
        }
    }

    /// Render `text` into `path`. `Ok(false)` means cancelled mid-render.
    fn render(
        &self,
        voice: &str,
        wpm: u32,
        text: &str,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<bool, BackendError> {
        let mut child = Command::new(&self.program)
            .arg("-v")
            .arg(voice)
            .arg("-s")
            .arg(wpm.to_string())
            .arg("-w")
            .arg(path)
            .arg("--stdin")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| BackendError::Utterance(format!("starting {}: {err}", self.program)))?;
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(err) = stdin.write_all(text.as_bytes()) {
                warn!("Failed to send text to speech process: {err}");
            }
        }

        let id = {
            let mut slot = self.lock_child();
            if cancel.is_cancelled() {
                let _ = child.kill();
                let _ = child.wait();
                return Ok(false);
            }
            slot.next_id += 1;
            let id = slot.next_id;
            let displaced = slot.active.replace(OwnedChild { id, child });
            drop(slot);
            if let Some(owned) = displaced {
                owned.kill();
            }
            id
        };

        loop {
            if cancel.is_cancelled() {
                self.kill_owned_child(id);
                return Ok(false);
            }
            match self.poll_child(id)? {
                ChildState::Gone => return Ok(false),
                ChildState::Running => thread::sleep(POLL_INTERVAL),
                ChildState::Exited(status, stderr) => {
                    if status.success() {
                        return Ok(true);
                    }
                    return Err(BackendError::Utterance(format!(
                        "{} exited with {status}: {}",
                        self.program,
                        stderr.trim()
                    )));
                }
            }
        }
    }

    fn poll_child(&self, id: u64) -> Result<ChildState, BackendError> {
        let mut slot = self.lock_child();
        let Some(owned) = slot.active.as_mut().filter(|owned| owned.id == id) else {
            return Ok(ChildState::Gone);
        };
        match owned.child.try_wait() {
            Ok(None) => Ok(ChildState::Running),
            Ok(Some(status)) => {
                let mut stderr = String::new();
                if let Some(mut owned) = slot.active.take() {
                    if let Some(mut pipe) = owned.child.stderr.take() {
                        let _ = pipe.read_to_string(&mut stderr);
                    }
                }
                Ok(ChildState::Exited(status, stderr))
            }
            Err(err) => {
                slot.active.take();
                Err(BackendError::Utterance(format!(
                    "waiting for {}: {err}",
                    self.program
                )))
            }
        }
    }
}

enum ChildState {
    Running,
    Exited(ExitStatus, String),
    /// Killed by `cancel` or replaced by a newer render.
    Gone,
}

impl SpeechBackend for DeviceBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Device
    }

    fn buffers(&self) -> bool {
        false
    }

    fn speak(
        &self,
        utterance: &Utterance,
        cancel: &CancellationToken,
        on_audible: &mut dyn FnMut(),
    ) -> Result<SpeakOutcome, BackendError> {
        self.kill_child();
        self.output.stop_sink();
        if cancel.sleep(self.settle_delay) {
            return Ok(SpeakOutcome::Cancelled);
        }
        let Some(voice) = self.voice.as_deref() else {
            return Err(BackendError::VoiceUnavailable(
                "No device voice is available. Pick one with the voice command.".to_string(),
            ));
        };

        fs::create_dir_all(&self.scratch_dir).map_err(|err| {
            BackendError::Utterance(format!("creating {}: {err}", self.scratch_dir.display()))
        })?;
        let wav_path = cache::unique_temp_path(&self.scratch_dir.join("utterance.wav"));
        let wpm = words_per_minute(self.base_wpm, utterance.rate);
        debug!(voice, wpm, chars = utterance.text.len(), "Rendering sentence");

        let rendered = match self.render(voice, wpm, &utterance.text, &wav_path, cancel) {
            Ok(true) => PcmAudio::read_wav(&wav_path).map(Some).map_err(|err| {
                BackendError::Utterance(format!("reading rendered audio: {err}"))
            }),
            Ok(false) => Ok(None),
            Err(err) => Err(err),
        };
        let _ = fs::remove_file(&wav_path);

        let Some(audio) = rendered? else {
            return Ok(SpeakOutcome::Cancelled);
        };
        self.output.set_speed(1.0);
        self.output
            .play(audio, cancel, on_audible)
            .map_err(|err| BackendError::Utterance(format!("audio output: {err}")))
    }

    fn pause(&self) {
        self.output.pause();
    }

    fn resume(&self) {
        self.output.resume();
    }

    fn cancel(&self) {
        self.kill_child();
        self.output.cancel();
    }

    fn set_rate(&self, rate: f32) {
        debug!(rate, "Device rate change applies from the next sentence");
    }
}
