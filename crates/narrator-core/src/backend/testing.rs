//! In-memory backend whose behaviour per sentence is scripted by tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{BackendError, BackendKind, SpeakOutcome, SpeechBackend, Utterance};
use crate::cancellation::CancellationToken;

#[derive(Default)]
struct Script {
    hold_all: bool,
    held: HashSet<String>,
    failures: HashMap<String, BackendError>,
    requested: Vec<String>,
    audible: Vec<String>,
    cancels: usize,
    paused: bool,
    rates: Vec<f32>,
}

pub(crate) struct ScriptedBackend {
    kind: BackendKind,
    script: Mutex<Script>,
    changed: Condvar,
}

impl ScriptedBackend {
    pub(crate) fn new(kind: BackendKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            script: Mutex::new(Script::default()),
            changed: Condvar::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block `speak` for `text` until released or cancelled.
    pub(crate) fn hold(&self, text: &str) {
        self.lock().held.insert(text.to_string());
    }

    /// Block every sentence until cancelled.
    pub(crate) fn hold_everything(&self) {
        self.lock().hold_all = true;
    }

    pub(crate) fn release(&self, text: &str) {
        self.lock().held.remove(text);
        self.changed.notify_all();
    }

    pub(crate) fn fail(&self, text: &str, err: BackendError) {
        self.lock().failures.insert(text.to_string(), err);
    }

    pub(crate) fn requested(&self) -> Vec<String> {
        self.lock().requested.clone()
    }

    pub(crate) fn audible(&self) -> Vec<String> {
        self.lock().audible.clone()
    }

    pub(crate) fn cancels(&self) -> usize {
        self.lock().cancels
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.lock().paused
    }

    pub(crate) fn rates(&self) -> Vec<f32> {
        self.lock().rates.clone()
    }
}

impl SpeechBackend for ScriptedBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn buffers(&self) -> bool {
        self.kind == BackendKind::Remote
    }

    fn speak(
        &self,
        utterance: &Utterance,
        cancel: &CancellationToken,
        on_audible: &mut dyn FnMut(),
    ) -> Result<SpeakOutcome, BackendError> {
        let mut script = self.lock();
        script.requested.push(utterance.text.clone());
        while (script.hold_all || script.held.contains(&utterance.text)) && !cancel.is_cancelled()
        {
            script = self
                .changed
                .wait_timeout(script, Duration::from_millis(5))
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        if cancel.is_cancelled() {
            return Ok(SpeakOutcome::Cancelled);
        }
        if let Some(err) = script.failures.get(&utterance.text).cloned() {
            return Err(err);
        }
        script.audible.push(utterance.text.clone());
        drop(script);
        on_audible();
        Ok(SpeakOutcome::Completed)
    }

    fn pause(&self) {
        self.lock().paused = true;
    }

    fn resume(&self) {
        self.lock().paused = false;
    }

    fn cancel(&self) {
        let mut script = self.lock();
        script.cancels += 1;
        script.paused = false;
        drop(script);
        self.changed.notify_all();
    }

    fn set_rate(&self, rate: f32) {
        self.lock().rates.push(rate);
    }
}
