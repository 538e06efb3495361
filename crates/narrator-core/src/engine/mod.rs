//! Sentence-by-sentence playback state machine.
//!
//! Commands run synchronously on the caller's thread under the state lock.
//! Playback itself is a *chain*: one worker thread that speaks consecutive
//! sentences until the document ends or the chain is halted. Each chain owns a
//! request id and a cancellation token; a worker re-checks both under the lock
//! before touching state, so results from a halted chain are dropped.

mod types;

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;

use tracing::{debug, info, warn};

use crate::backend::{SpeakOutcome, SpeechBackend, Utterance};
use crate::cancellation::CancellationToken;
use crate::config::{BackendKind, clamp_rate};

pub use types::{EngineCommand, EngineError, EngineEvent, PlaybackPhase, PlaybackSnapshot};

struct Chain {
    request_id: u64,
    cancel: CancellationToken,
}

struct EngineState {
    phase: PlaybackPhase,
    current_index: usize,
    rate: f32,
    last_error: Option<String>,
    backend: Arc<dyn SpeechBackend>,
    chain: Option<Chain>,
    next_request_id: u64,
    subscribers: Vec<Sender<EngineEvent>>,
}

impl EngineState {
    fn allocate_request_id(&mut self) -> u64 {
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1).max(1);
        request_id
    }

    fn is_current(&self, request_id: u64, cancel: &CancellationToken) -> bool {
        !cancel.is_cancelled()
            && self.chain.as_ref().map(|chain| chain.request_id) == Some(request_id)
    }

    /// Cancel the running chain, if any, and silence the backend.
    fn halt_chain(&mut self) {
        if let Some(chain) = self.chain.take() {
            debug!(request_id = chain.request_id, "Halting playback chain");
            chain.cancel.cancel();
        }
        self.backend.cancel();
    }

    fn snapshot(&self, sentence_count: usize) -> PlaybackSnapshot {
        PlaybackSnapshot {
            phase: self.phase,
            current_index: self.current_index,
            rate: self.rate,
            sentence_count,
            backend: self.backend.kind(),
            last_error: self.last_error.clone(),
        }
    }

    fn publish(&mut self, action: &'static str, sentence_count: usize) -> EngineEvent {
        let event = EngineEvent {
            action,
            snapshot: self.snapshot(sentence_count),
        };
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
        event
    }
}

struct Shared {
    sentences: Arc<[String]>,
    state: Mutex<EngineState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn len(&self) -> usize {
        self.sentences.len()
    }

    fn start_chain(self: &Arc<Self>, state: &mut EngineState) {
        let request_id = state.allocate_request_id();
        let cancel = CancellationToken::new();
        state.chain = Some(Chain {
            request_id,
            cancel: cancel.clone(),
        });
        debug!(request_id, start = state.current_index, "Starting playback chain");
        let shared = Arc::clone(self);
        thread::spawn(move || run_chain(shared, request_id, cancel));
    }

    fn play(self: &Arc<Self>) -> EngineEvent {
        let mut state = self.lock();
        match state.phase {
            PlaybackPhase::Paused => {
                state.backend.resume();
                state.phase = PlaybackPhase::Playing;
                info!(index = state.current_index, "Playback resumed");
            }
            PlaybackPhase::Stopped if self.len() > 0 => {
                state.last_error = None;
                state.phase = PlaybackPhase::Playing;
                info!(index = state.current_index, "Playback started");
                self.start_chain(&mut state);
            }
            phase => debug!(%phase, "Ignoring play"),
        }
        state.publish("play", self.len())
    }

    fn pause(&self) -> EngineEvent {
        let mut state = self.lock();
        if state.phase == PlaybackPhase::Playing {
            state.backend.pause();
            state.phase = PlaybackPhase::Paused;
            info!(index = state.current_index, "Playback paused");
        } else {
            debug!(phase = %state.phase, "Ignoring pause");
        }
        state.publish("pause", self.len())
    }

    fn stop(&self) -> EngineEvent {
        let mut state = self.lock();
        state.halt_chain();
        state.phase = PlaybackPhase::Stopped;
        state.current_index = 0;
        info!("Playback stopped");
        state.publish("stop", self.len())
    }

    fn jump(self: &Arc<Self>, index: usize) -> Result<EngineEvent, EngineError> {
        let len = self.len();
        if index >= len {
            return Err(EngineError::IndexOutOfRange { index, len });
        }
        let mut state = self.lock();
        let was_active = state.phase.is_active();
        state.halt_chain();
        state.current_index = index;
        if was_active {
            state.phase = PlaybackPhase::Playing;
            self.start_chain(&mut state);
        } else {
            state.phase = PlaybackPhase::Stopped;
        }
        info!(index, restarted = was_active, "Jumped to sentence");
        Ok(state.publish("jump", len))
    }

    fn set_rate(&self, rate: f32) -> EngineEvent {
        let rate = clamp_rate(rate);
        let mut state = self.lock();
        state.rate = rate;
        state.backend.set_rate(rate);
        debug!(rate, "Playback rate changed");
        state.publish("set_rate", self.len())
    }
}

/// Speak sentences from the current index until the chain is halted or the
/// document ends.
fn run_chain(shared: Arc<Shared>, request_id: u64, cancel: CancellationToken) {
    let sentence_count = shared.len();
    loop {
        let (index, utterance, backend) = {
            let mut state = shared.lock();
            if !state.is_current(request_id, &cancel) {
                return;
            }
            let index = state.current_index;
            if index >= sentence_count {
                state.chain = None;
                state.phase = PlaybackPhase::Stopped;
                state.current_index = 0;
                info!(request_id, "Reached end of document");
                state.publish("end_of_document", sentence_count);
                return;
            }
            let backend = Arc::clone(&state.backend);
            if state.phase != PlaybackPhase::Paused {
                state.phase = if backend.buffers() {
                    PlaybackPhase::Buffering
                } else {
                    PlaybackPhase::Playing
                };
            }
            state.publish("advance", sentence_count);
            let utterance = Utterance {
                text: shared.sentences[index].clone(),
                rate: state.rate,
            };
            (index, utterance, backend)
        };

        let mut on_audible = || {
            let mut state = shared.lock();
            if state.is_current(request_id, &cancel) && state.phase == PlaybackPhase::Buffering {
                state.phase = PlaybackPhase::Playing;
                state.publish("audible", sentence_count);
            }
        };
        let result = backend.speak(&utterance, &cancel, &mut on_audible);

        let mut state = shared.lock();
        if !state.is_current(request_id, &cancel) {
            debug!(request_id, index, "Discarding result from halted chain");
            return;
        }
        match result {
            Ok(SpeakOutcome::Completed) => state.current_index = index + 1,
            Ok(SpeakOutcome::Cancelled) => {
                debug!(request_id, index, "Backend cancelled the sentence");
                state.chain = None;
                state.phase = PlaybackPhase::Stopped;
                state.publish("stop", sentence_count);
                return;
            }
            Err(err) if !err.is_fatal() => {
                warn!(index, "Skipping sentence: {err}");
                state.current_index = index + 1;
            }
            Err(err) => {
                warn!(index, "Playback stopped: {err}");
                state.chain = None;
                state.phase = PlaybackPhase::Stopped;
                state.last_error = Some(err.to_string());
                state.backend.cancel();
                state.publish("error", sentence_count);
                return;
            }
        }
    }
}

/// Owns the playback session for one loaded document.
pub struct PlaybackEngine {
    shared: Arc<Shared>,
}

impl PlaybackEngine {
    pub fn new(sentences: Arc<[String]>, backend: Arc<dyn SpeechBackend>, rate: f32) -> Self {
        let rate = clamp_rate(rate);
        backend.set_rate(rate);
        let state = EngineState {
            phase: PlaybackPhase::Stopped,
            current_index: 0,
            rate,
            last_error: None,
            backend,
            chain: None,
            next_request_id: 1,
            subscribers: Vec::new(),
        };
        Self {
            shared: Arc::new(Shared {
                sentences,
                state: Mutex::new(state),
            }),
        }
    }

    pub fn sentences(&self) -> &[String] {
        &self.shared.sentences
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        self.shared.lock().snapshot(self.shared.len())
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.shared.lock().backend.kind()
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        let (tx, rx) = mpsc::channel();
        self.shared.lock().subscribers.push(tx);
        rx
    }

    pub fn play(&self) -> EngineEvent {
        self.shared.play()
    }

    pub fn pause(&self) -> EngineEvent {
        self.shared.pause()
    }

    pub fn stop(&self) -> EngineEvent {
        self.shared.stop()
    }

    pub fn jump(&self, index: usize) -> Result<EngineEvent, EngineError> {
        self.shared.jump(index)
    }

    /// Clamp to the supported range and apply; returns the applied event.
    pub fn set_rate(&self, rate: f32) -> EngineEvent {
        self.shared.set_rate(rate)
    }

    /// Swap the backend. Only allowed while stopped.
    pub fn set_backend(&self, backend: Arc<dyn SpeechBackend>) -> Result<EngineEvent, EngineError> {
        let mut state = self.shared.lock();
        if state.phase != PlaybackPhase::Stopped {
            return Err(EngineError::BackendLocked { phase: state.phase });
        }
        state.backend.cancel();
        backend.set_rate(state.rate);
        info!(backend = %backend.kind(), "Speech backend changed");
        state.backend = backend;
        Ok(state.publish("set_backend", self.shared.len()))
    }

    pub fn apply_command(&self, command: EngineCommand) -> Result<EngineEvent, EngineError> {
        match command {
            EngineCommand::Play => Ok(self.play()),
            EngineCommand::Pause => Ok(self.pause()),
            EngineCommand::Stop => Ok(self.stop()),
            EngineCommand::Jump { index } => self.jump(index),
            EngineCommand::SetRate { rate } => Ok(self.set_rate(rate)),
        }
    }

    /// Handle that can stop playback from another thread (e.g. a signal
    /// handler) without keeping the engine alive.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.halt_chain();
        state.phase = PlaybackPhase::Stopped;
    }
}

#[derive(Clone)]
pub struct StopHandle {
    shared: Weak<Shared>,
}

impl StopHandle {
    /// Returns false when the engine is already gone.
    pub fn stop(&self) -> bool {
        match self.shared.upgrade() {
            Some(shared) => {
                shared.stop();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendError;
    use crate::backend::testing::ScriptedBackend;
    use std::sync::mpsc::RecvTimeoutError;
    use std::time::{Duration, Instant};

    const TIMEOUT: Duration = Duration::from_secs(2);

    fn sentences(count: usize) -> Arc<[String]> {
        (0..count).map(|i| format!("Sentence number {i}.")).collect()
    }

    fn engine_with(kind: BackendKind, count: usize) -> (PlaybackEngine, Arc<ScriptedBackend>) {
        let backend = ScriptedBackend::new(kind);
        let engine = PlaybackEngine::new(sentences(count), backend.clone(), 1.0);
        (engine, backend)
    }

    /// Drain events until one matches; panics on timeout.
    fn wait_for(
        rx: &Receiver<EngineEvent>,
        mut matches: impl FnMut(&EngineEvent) -> bool,
    ) -> EngineEvent {
        let deadline = Instant::now() + TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(event) if matches(&event) => return event,
                Ok(_) => continue,
                Err(RecvTimeoutError::Timeout) => panic!("timed out waiting for engine event"),
                Err(RecvTimeoutError::Disconnected) => panic!("engine event channel closed"),
            }
        }
    }

    fn text(i: usize) -> String {
        format!("Sentence number {i}.")
    }

    #[test]
    fn plays_every_sentence_then_stops_at_start() {
        let (engine, backend) = engine_with(BackendKind::Remote, 3);
        let rx = engine.subscribe();

        engine.play();
        let mut saw_buffering = false;
        let mut saw_audible = false;
        let end = wait_for(&rx, |event| {
            saw_buffering |= event.action == "advance"
                && event.snapshot.phase == PlaybackPhase::Buffering;
            saw_audible |=
                event.action == "audible" && event.snapshot.phase == PlaybackPhase::Playing;
            event.action == "end_of_document"
        });

        assert!(saw_buffering);
        assert!(saw_audible);
        assert_eq!(end.snapshot.phase, PlaybackPhase::Stopped);
        assert_eq!(end.snapshot.current_index, 0);
        assert_eq!(backend.audible(), vec![text(0), text(1), text(2)]);
    }

    #[test]
    fn device_backend_never_buffers() {
        let (engine, _backend) = engine_with(BackendKind::Device, 2);
        let rx = engine.subscribe();
        engine.play();
        let mut phases = Vec::new();
        wait_for(&rx, |event| {
            phases.push(event.snapshot.phase);
            event.action == "end_of_document"
        });
        assert!(!phases.contains(&PlaybackPhase::Buffering));
    }

    #[test]
    fn jump_while_buffering_silences_previous_sentence() {
        let (engine, backend) = engine_with(BackendKind::Remote, 3);
        backend.hold(&text(0));
        let rx = engine.subscribe();

        engine.play();
        wait_for(&rx, |event| event.snapshot.phase == PlaybackPhase::Buffering);
        let jumped = engine.jump(2).unwrap();
        assert_eq!(jumped.snapshot.current_index, 2);
        assert_eq!(jumped.snapshot.phase, PlaybackPhase::Playing);

        wait_for(&rx, |event| event.action == "end_of_document");
        backend.release(&text(0));
        thread::sleep(Duration::from_millis(30));

        assert_eq!(backend.audible(), vec![text(2)]);
        assert!(!backend.requested().contains(&text(1)));
        assert!(backend.cancels() >= 1);
    }

    #[test]
    fn stop_while_buffering_never_becomes_audible() {
        let (engine, backend) = engine_with(BackendKind::Remote, 3);
        backend.hold(&text(0));
        let rx = engine.subscribe();

        engine.play();
        wait_for(&rx, |event| event.snapshot.phase == PlaybackPhase::Buffering);
        let stopped = engine.stop();
        backend.release(&text(0));
        thread::sleep(Duration::from_millis(30));

        assert_eq!(stopped.snapshot.phase, PlaybackPhase::Stopped);
        assert_eq!(stopped.snapshot.current_index, 0);
        assert!(backend.audible().is_empty());
        assert_eq!(engine.snapshot().phase, PlaybackPhase::Stopped);
    }

    #[test]
    fn invalid_credential_stops_and_keeps_position() {
        let (engine, backend) = engine_with(BackendKind::Remote, 4);
        backend.fail(
            &text(1),
            BackendError::InvalidCredential("The provided API key is not valid.".into()),
        );
        let rx = engine.subscribe();

        engine.play();
        let failed = wait_for(&rx, |event| event.action == "error");

        assert_eq!(failed.snapshot.phase, PlaybackPhase::Stopped);
        assert_eq!(failed.snapshot.current_index, 1);
        assert_eq!(
            failed.snapshot.last_error.as_deref(),
            Some("The provided API key is not valid.")
        );
        assert_eq!(backend.audible(), vec![text(0)]);

        let restarted = engine.play();
        assert!(restarted.snapshot.last_error.is_none());
        engine.stop();
    }

    #[test]
    fn utterance_errors_advance_like_completion() {
        let (engine, backend) = engine_with(BackendKind::Device, 3);
        backend.fail(&text(1), BackendError::Utterance("exit status 1".into()));
        let rx = engine.subscribe();

        engine.play();
        let end = wait_for(&rx, |event| event.action == "end_of_document");

        assert_eq!(backend.audible(), vec![text(0), text(2)]);
        assert!(end.snapshot.last_error.is_none());
    }

    #[test]
    fn pause_and_resume_keep_position() {
        let (engine, backend) = engine_with(BackendKind::Device, 2);
        backend.hold(&text(0));
        let rx = engine.subscribe();

        engine.play();
        wait_for(&rx, |event| event.action == "advance");
        let paused = engine.pause();
        assert_eq!(paused.snapshot.phase, PlaybackPhase::Paused);
        assert!(backend.is_paused());
        assert_eq!(engine.pause().snapshot.phase, PlaybackPhase::Paused);

        let resumed = engine.play();
        assert_eq!(resumed.snapshot.phase, PlaybackPhase::Playing);
        assert_eq!(resumed.snapshot.current_index, 0);
        assert!(!backend.is_paused());

        backend.release(&text(0));
        wait_for(&rx, |event| event.action == "end_of_document");
        assert_eq!(backend.audible(), vec![text(0), text(1)]);
    }

    #[test]
    fn pause_is_ignored_while_buffering() {
        let (engine, backend) = engine_with(BackendKind::Remote, 2);
        backend.hold(&text(0));
        let rx = engine.subscribe();

        engine.play();
        wait_for(&rx, |event| event.snapshot.phase == PlaybackPhase::Buffering);
        assert_eq!(engine.pause().snapshot.phase, PlaybackPhase::Buffering);
        assert!(!backend.is_paused());
        engine.stop();
    }

    #[test]
    fn jump_while_stopped_only_moves_cursor() {
        let (engine, backend) = engine_with(BackendKind::Device, 4);
        let rx = engine.subscribe();

        let jumped = engine.jump(2).unwrap();
        assert_eq!(jumped.snapshot.phase, PlaybackPhase::Stopped);
        assert_eq!(jumped.snapshot.current_index, 2);
        assert!(backend.requested().is_empty());

        engine.play();
        wait_for(&rx, |event| event.action == "end_of_document");
        assert_eq!(backend.audible(), vec![text(2), text(3)]);
    }

    #[test]
    fn jump_outside_document_is_rejected() {
        let (engine, _backend) = engine_with(BackendKind::Device, 3);
        assert_eq!(
            engine.jump(3),
            Err(EngineError::IndexOutOfRange { index: 3, len: 3 })
        );
        assert_eq!(engine.snapshot().current_index, 0);
    }

    #[test]
    fn backend_changes_only_while_stopped() {
        let (engine, backend) = engine_with(BackendKind::Remote, 2);
        backend.hold(&text(0));
        let rx = engine.subscribe();
        engine.play();
        wait_for(&rx, |event| event.snapshot.phase == PlaybackPhase::Buffering);

        let device = ScriptedBackend::new(BackendKind::Device);
        assert_eq!(
            engine.set_backend(device.clone()).map(|_| ()),
            Err(EngineError::BackendLocked {
                phase: PlaybackPhase::Buffering
            })
        );

        engine.stop();
        let changed = engine.set_backend(device).unwrap();
        assert_eq!(changed.snapshot.backend, BackendKind::Device);
        assert_eq!(engine.backend_kind(), BackendKind::Device);
    }

    #[test]
    fn rate_is_clamped_and_forwarded() {
        let (engine, backend) = engine_with(BackendKind::Remote, 1);
        assert_eq!(engine.set_rate(3.0).snapshot.rate, 2.0);
        assert_eq!(engine.set_rate(0.1).snapshot.rate, 0.5);
        assert_eq!(engine.set_rate(1.25).snapshot.rate, 1.25);
        assert_eq!(backend.rates(), vec![1.0, 2.0, 0.5, 1.25]);
    }

    #[test]
    fn empty_document_never_plays() {
        let (engine, backend) = engine_with(BackendKind::Device, 0);
        assert_eq!(engine.play().snapshot.phase, PlaybackPhase::Stopped);
        assert!(backend.requested().is_empty());
    }

    #[test]
    fn commands_report_their_action() {
        let (engine, _backend) = engine_with(BackendKind::Device, 3);
        let event = engine
            .apply_command(EngineCommand::Jump { index: 1 })
            .unwrap();
        assert_eq!(event.action, "jump");
        assert_eq!(event.action, EngineCommand::Jump { index: 1 }.action());
        let event = engine
            .apply_command(EngineCommand::SetRate { rate: 1.5 })
            .unwrap();
        assert_eq!(event.action, "set_rate");
        assert_eq!(engine.apply_command(EngineCommand::Stop).unwrap().snapshot.current_index, 0);
    }

    #[test]
    fn dropping_engine_halts_chain() {
        let (engine, backend) = engine_with(BackendKind::Remote, 2);
        backend.hold(&text(0));
        let rx = engine.subscribe();
        engine.play();
        wait_for(&rx, |event| event.snapshot.phase == PlaybackPhase::Buffering);
        let handle = engine.stop_handle();

        drop(engine);
        backend.release(&text(0));
        thread::sleep(Duration::from_millis(30));

        assert!(backend.audible().is_empty());
        assert!(backend.cancels() >= 1);
        let deadline = Instant::now() + TIMEOUT;
        while handle.stop() {
            assert!(Instant::now() < deadline, "chain worker kept the engine alive");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn stop_handle_stops_live_engine() {
        let (engine, backend) = engine_with(BackendKind::Device, 2);
        backend.hold(&text(0));
        let rx = engine.subscribe();
        engine.play();
        wait_for(&rx, |event| event.action == "advance");

        assert!(engine.stop_handle().stop());
        assert_eq!(engine.snapshot().phase, PlaybackPhase::Stopped);
    }
}
