//! Network synthesis against a Gemini-style `generateContent` endpoint.

use std::io::Cursor;
use std::path::PathBuf;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::output::{AudioOutput, PcmAudio};
use super::{BackendError, BackendKind, SpeakOutcome, SpeechBackend, Utterance};
use crate::cache;
use crate::cancellation::CancellationToken;
use crate::config::NarratorConfig;

pub const REMOTE_VOICES: [&str; 5] = ["Kore", "Puck", "Charon", "Fenrir", "Zephyr"];

const DEFAULT_SAMPLE_RATE: u32 = 24_000;
const MISSING_KEY: &str =
    "No API key is configured. Set remote.api_key in the config or NARRATOR_API_KEY.";
const INVALID_KEY: &str = "The provided API key is not valid. Please check it and try again.";
const SYNTHESIS_FAILED: &str =
    "Failed to generate audio. Please check your API key and network connection.";

pub struct RemoteBackend {
    client: Client,
    endpoint: String,
    model: String,
    voice: String,
    api_key: Option<String>,
    audio_cache: Option<PathBuf>,
    output: AudioOutput,
}

impl RemoteBackend {
    pub fn new(config: &NarratorConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(None::<Duration>)
            .build()
            .map_err(|err| failed(format!("building HTTP client: {err}")))?;
        let audio_cache = config
            .cache_remote_audio
            .then(|| cache::tts_dir(&PathBuf::from(&config.cache_dir)));
        info!(
            model = %config.remote_model,
            voice = %config.remote_voice,
            cached = audio_cache.is_some(),
            "Remote speech backend ready"
        );
        Ok(Self {
            client,
            endpoint: config.remote_endpoint.trim_end_matches('/').to_string(),
            model: config.remote_model.clone(),
            voice: config.remote_voice.clone(),
            api_key: config.credential().map(str::to_string),
            audio_cache,
            output: AudioOutput::new(),
        })
    }

    fn synthesize(&self, api_key: &str, text: &str) -> Result<PcmAudio, BackendError> {
        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);
        let body = json!({
            "contents": [{ "parts": [{ "text": text }] }],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": self.voice }
                    }
                }
            }
        });
        debug!(chars = text.len(), voice = %self.voice, "Requesting remote synthesis");
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .map_err(|err| failed(format!("request failed: {err}")))?;
        let status = response.status();
        let payload = response
            .text()
            .map_err(|err| failed(format!("reading response: {err}")))?;
        if !status.is_success() {
            warn!(status = status.as_u16(), "Remote synthesis rejected");
            return Err(classify_failure(status.as_u16(), &payload));
        }
        decode_response(&payload)
    }

    fn cached(&self, text: &str) -> Option<PcmAudio> {
        let path = self.cache_path(text)?;
        if !path.exists() {
            return None;
        }
        match PcmAudio::read_wav(&path) {
            Ok(audio) => {
                debug!(path = %path.display(), "Using cached audio");
                Some(audio)
            }
            Err(err) => {
                warn!(path = %path.display(), "Ignoring unreadable cached audio: {err}");
                None
            }
        }
    }

    fn store(&self, text: &str, audio: &PcmAudio) {
        let Some(path) = self.cache_path(text) else {
            return;
        };
        if let Err(err) = audio.write_wav(&path) {
            warn!(path = %path.display(), "Failed to cache synthesized audio: {err:#}");
        }
    }

    fn cache_path(&self, text: &str) -> Option<PathBuf> {
        self.audio_cache
            .as_ref()
            .map(|dir| cache::audio_cache_path(dir, &self.model, &self.voice, text))
    }
}

impl SpeechBackend for RemoteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn buffers(&self) -> bool {
        true
    }

    fn speak(
        &self,
        utterance: &Utterance,
        cancel: &CancellationToken,
        on_audible: &mut dyn FnMut(),
    ) -> Result<SpeakOutcome, BackendError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(BackendError::InvalidCredential(MISSING_KEY.to_string()));
        };

        let audio = match self.cached(&utterance.text) {
            Some(audio) => audio,
            None => {
                let audio = self.synthesize(api_key, &utterance.text)?;
                self.store(&utterance.text, &audio);
                audio
            }
        };
        if cancel.is_cancelled() {
            return Ok(SpeakOutcome::Cancelled);
        }
        self.output
            .play(audio, cancel, on_audible)
            .map_err(|err| failed(format!("audio output: {err}")))
    }

    fn pause(&self) {
        self.output.pause();
    }

    fn resume(&self) {
        self.output.resume();
    }

    fn cancel(&self) {
        self.output.cancel();
    }

    fn set_rate(&self, rate: f32) {
        self.output.set_speed(rate);
    }
}

fn failed(detail: String) -> BackendError {
    BackendError::SynthesisFailed(format!("{SYNTHESIS_FAILED} ({detail})"))
}

/// Map a non-success response onto the error the user should see.
fn classify_failure(status: u16, body: &str) -> BackendError {
    let rejected_key = matches!(status, 401 | 403)
        || body.contains("API key not valid")
        || body.contains("API_KEY_INVALID");
    if rejected_key {
        BackendError::InvalidCredential(INVALID_KEY.to_string())
    } else {
        failed(format!("HTTP {status}"))
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: Option<String>,
    data: String,
}

fn decode_response(payload: &str) -> Result<PcmAudio, BackendError> {
    let response: GenerateContentResponse = serde_json::from_str(payload)
        .map_err(|err| failed(format!("malformed response: {err}")))?;
    let inline = response
        .candidates
        .into_iter()
        .filter_map(|candidate| candidate.content)
        .flat_map(|content| content.parts)
        .find_map(|part| part.inline_data)
        .ok_or_else(|| failed("response contained no audio".to_string()))?;
    let bytes = STANDARD
        .decode(inline.data.as_bytes())
        .map_err(|err| failed(format!("invalid audio encoding: {err}")))?;

    if bytes.starts_with(b"RIFF") {
        return PcmAudio::from_wav_reader(Cursor::new(bytes))
            .map_err(|err| failed(format!("invalid WAV audio: {err}")));
    }
    let sample_rate = inline
        .mime_type
        .as_deref()
        .and_then(sample_rate_from_mime)
        .unwrap_or(DEFAULT_SAMPLE_RATE);
    Ok(PcmAudio::from_pcm16le(&bytes, sample_rate, 1))
}

/// `audio/L16;codec=pcm;rate=24000` → 24000.
fn sample_rate_from_mime(mime: &str) -> Option<u32> {
    mime.split(';')
        .find_map(|param| param.trim().strip_prefix("rate="))
        .and_then(|rate| rate.trim().parse().ok())
}
