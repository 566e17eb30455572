use serde::Serialize;
use tokio::sync::broadcast;
use log::debug;

use crate::state::View;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ClipSavedEvent {
    pub id: String,
    #[serde(rename = "durationMs")]
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorEvent {
    pub code: String,
    pub message: String,
}

/// Everything the UI layer can observe
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum AppEvent {
    RecordingStatus(String),
    Countdown { elapsed: u32, max: u32 },
    ClipSaved(ClipSavedEvent),
    ViewChanged(View),
    SessionChanged { signed_in: bool },
    Error(ErrorEvent),
}

/// Fan-out channel from the core to any number of UI listeners
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AppEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.tx.subscribe()
    }

    fn emit(&self, event: AppEvent) {
        // No listeners is fine; the event is simply dropped
        if self.tx.send(event).is_err() {
            debug!("Event dropped, no subscribers");
        }
    }

    /// Emit recording status ("recording" / "idle")
    pub fn emit_status(&self, status: &str) {
        self.emit(AppEvent::RecordingStatus(status.to_string()));
    }

    pub fn emit_countdown(&self, elapsed: u32, max: u32) {
        self.emit(AppEvent::Countdown { elapsed, max });
    }

    pub fn emit_clip_saved(&self, event: ClipSavedEvent) {
        self.emit(AppEvent::ClipSaved(event));
    }

    pub fn emit_view_changed(&self, view: View) {
        self.emit(AppEvent::ViewChanged(view));
    }

    pub fn emit_session_changed(&self, signed_in: bool) {
        self.emit(AppEvent::SessionChanged { signed_in });
    }

    pub fn emit_error(&self, code: &str, message: &str) {
        self.emit(AppEvent::Error(ErrorEvent {
            code: code.to_string(),
            message: message.to_string(),
        }));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
