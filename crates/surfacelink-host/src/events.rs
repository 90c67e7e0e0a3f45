//! Per-instance event stream: `{ "type": ..., "value": ... }` records pushed
//! to at most one listener.

use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::mpsc;

use crate::browser::BrowserEvent;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum BridgeEvent {
    /// A new frame is ready; the host should pull again.
    FrameAvailable,
    #[serde(rename_all = "camelCase")]
    SurfaceSizeChanged { width: u32, height: u32 },
    UrlChanged(String),
    LoadingStateChanged(i32),
    #[serde(rename_all = "camelCase")]
    HistoryChanged { can_go_back: bool, can_go_forward: bool },
    TitleChanged(String),
    CursorChanged(&'static str),
    WebMessageReceived(String),
    /// Answered with the `resolvePermission` method.
    #[serde(rename_all = "camelCase")]
    PermissionRequested { id: u64, url: String, permission_kind: i32, is_user_initiated: bool },
}

impl From<BrowserEvent> for BridgeEvent {
    fn from(event: BrowserEvent) -> Self {
        match event {
            BrowserEvent::UrlChanged(url) => Self::UrlChanged(url),
            BrowserEvent::LoadingStateChanged(state) => Self::LoadingStateChanged(state.as_i32()),
            BrowserEvent::HistoryChanged { can_go_back, can_go_forward } => {
                Self::HistoryChanged { can_go_back, can_go_forward }
            }
            BrowserEvent::TitleChanged(title) => Self::TitleChanged(title),
            BrowserEvent::CursorChanged(kind) => Self::CursorChanged(kind.host_name()),
            BrowserEvent::WebMessageReceived(message) => Self::WebMessageReceived(message),
            BrowserEvent::SurfaceSizeChanged { width, height } => Self::SurfaceSizeChanged { width, height },
            BrowserEvent::PermissionRequested { id, url, kind, is_user_initiated } => {
                Self::PermissionRequested { id, url, permission_kind: kind.as_i32(), is_user_initiated }
            }
        }
    }
}

impl BridgeEvent {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Single-listener event channel. Emitting never blocks, so it is safe from
/// the capture thread.
#[derive(Default)]
pub struct EventChannel {
    sink: Mutex<Option<mpsc::UnboundedSender<BridgeEvent>>>,
}

impl EventChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe. A previous listener is detached.
    pub fn listen(&self) -> mpsc::UnboundedReceiver<BridgeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        rx
    }

    pub fn cancel(&self) {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    /// Deliver `event`; dropped when nobody listens.
    pub fn emit(&self, event: BridgeEvent) {
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = sink.as_ref() {
            if tx.send(event).is_err() {
                tracing::debug!("event listener went away");
                sink.take();
            }
        }
    }
}
