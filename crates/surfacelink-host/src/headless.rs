//! Headless browser: a [`BrowserSession`] that paints its background color
//! into a [`SoftwareVisual`] and keeps just enough page state (history,
//! title, cursor) to produce realistic events.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use surfacelink_core::soft::{SoftwareDevice, SoftwareVisual};
use surfacelink_core::Size;
use tracing::{debug, info};

use crate::browser::{
    BrowserEnvironment, BrowserEvent, BrowserEventHandler, BrowserSession, CursorKind, EnvironmentOptions,
    LoadingState, PermissionKind, PermissionState, PointerButton,
};
use crate::errors::HostError;

const BLANK_URL: &str = "about:blank";
const DEFAULT_BACKGROUND: u32 = 0xFFFF_FFFF;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Input forwarded to the session, recorded in order.
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    CursorMoved { x: f64, y: f64 },
    Button { button: PointerButton, is_down: bool },
    Scroll { dx: f64, dy: f64 },
}

#[derive(Debug)]
struct Page {
    history: Vec<(String, String)>,
    index: Option<usize>,
    background: u32,
    user_agent: Option<String>,
    cursor: Option<CursorKind>,
    inputs: Vec<InputEvent>,
    /// Permission requests by id; `None` until answered.
    permissions: HashMap<u64, Option<PermissionState>>,
    next_permission: u64,
}

impl Page {
    fn current(&self) -> Option<&(String, String)> {
        self.index.and_then(|i| self.history.get(i))
    }

    fn history_event(&self) -> BrowserEvent {
        let index = self.index.unwrap_or(0);
        BrowserEvent::HistoryChanged {
            can_go_back: self.index.is_some_and(|i| i > 0),
            can_go_forward: self.index.is_some() && index + 1 < self.history.len(),
        }
    }
}

/// `<title>` contents of an HTML document, if any.
fn document_title(html: &str) -> Option<String> {
    let lower = html.to_ascii_lowercase();
    let start = lower.find("<title>")? + "<title>".len();
    let end = start + lower[start..].find("</title>")?;
    Some(html[start..end].trim().to_string())
}

// ── HeadlessBrowser ───────────────────────────────────────────────────────────

pub struct HeadlessBrowser {
    visual: SoftwareVisual,
    page: Mutex<Page>,
    handler: Mutex<Option<BrowserEventHandler>>,
}

impl HeadlessBrowser {
    /// A session with an empty surface; nothing is captured until
    /// `set_surface_size`.
    pub fn new(device: Arc<SoftwareDevice>) -> Self {
        Self {
            visual: SoftwareVisual::new(device, Size::ZERO),
            page: Mutex::new(Page {
                history: Vec::new(),
                index: None,
                background: DEFAULT_BACKGROUND,
                user_agent: None,
                cursor: None,
                inputs: Vec::new(),
                permissions: HashMap::new(),
                next_permission: 1,
            }),
            handler: Mutex::new(None),
        }
    }

    pub fn visual(&self) -> &SoftwareVisual {
        &self.visual
    }

    pub fn url(&self) -> Option<String> {
        lock(&self.page).current().map(|(url, _)| url.clone())
    }

    pub fn user_agent(&self) -> Option<String> {
        lock(&self.page).user_agent.clone()
    }

    pub fn inputs(&self) -> Vec<InputEvent> {
        lock(&self.page).inputs.clone()
    }

    /// Ask the host for a permission on behalf of the current page. Returns
    /// the request id the answer must carry.
    pub fn request_permission(&self, kind: PermissionKind, is_user_initiated: bool) -> u64 {
        let (id, url) = {
            let mut page = lock(&self.page);
            let id = page.next_permission;
            page.next_permission += 1;
            page.permissions.insert(id, None);
            (id, page.current().map_or_else(|| BLANK_URL.to_string(), |(url, _)| url.clone()))
        };
        debug!("headless permission request {id}: {kind:?} for {url}");
        self.emit(vec![BrowserEvent::PermissionRequested { id, url, kind, is_user_initiated }]);
        id
    }

    /// Answer given for request `id`, if any.
    pub fn permission_decision(&self, id: u64) -> Option<PermissionState> {
        lock(&self.page).permissions.get(&id).copied().flatten()
    }

    /// Paint one frame with the background color. `false` if nothing is
    /// capturing the surface.
    pub fn render_frame(&self) -> bool {
        let argb = lock(&self.page).background;
        let [a, r, g, b] = argb.to_be_bytes();
        self.visual.render_fill([b, g, r, a])
    }

    /// Destroy the surface, as when the browser process goes away.
    pub fn close(&self) {
        self.visual.close();
    }

    fn emit(&self, events: Vec<BrowserEvent>) {
        let handler = lock(&self.handler).clone();
        if let Some(handler) = handler {
            for event in events {
                handler(event);
            }
        }
    }

    fn navigate(&self, url: String, title: String, push: bool) {
        let history = {
            let mut page = lock(&self.page);
            if push {
                let keep = page.index.map_or(0, |i| i + 1);
                page.history.truncate(keep);
                page.history.push((url.clone(), title.clone()));
                page.index = Some(page.history.len() - 1);
            }
            page.history_event()
        };
        debug!("headless navigation to {url}");
        self.emit(vec![
            BrowserEvent::LoadingStateChanged(LoadingState::Loading),
            BrowserEvent::UrlChanged(url),
            history,
            BrowserEvent::TitleChanged(title),
            BrowserEvent::LoadingStateChanged(LoadingState::NavigationCompleted),
        ]);
        self.render_frame();
    }

    fn traverse(&self, step: isize) -> bool {
        let target = {
            let mut page = lock(&self.page);
            let Some(index) = page.index else {
                return false;
            };
            let next = index as isize + step;
            if next < 0 || next as usize >= page.history.len() {
                return false;
            }
            page.index = Some(next as usize);
            page.history[next as usize].clone()
        };
        self.navigate(target.0, target.1, false);
        true
    }

    fn has_document(&self) -> bool {
        lock(&self.page).index.is_some()
    }
}

#[async_trait]
impl BrowserSession for HeadlessBrowser {
    fn set_event_handler(&self, handler: BrowserEventHandler) {
        *lock(&self.handler) = Some(handler);
    }

    fn set_surface_size(&self, width: u32, height: u32) {
        let size = Size::new(width, height);
        if self.visual.size() == size {
            return;
        }
        self.visual.resize(size);
        self.emit(vec![BrowserEvent::SurfaceSizeChanged { width, height }]);
    }

    fn set_cursor_pos(&self, x: f64, y: f64) {
        let changed = {
            let mut page = lock(&self.page);
            page.inputs.push(InputEvent::CursorMoved { x, y });
            page.cursor.replace(CursorKind::Arrow) != Some(CursorKind::Arrow)
        };
        if changed {
            self.emit(vec![BrowserEvent::CursorChanged(CursorKind::Arrow)]);
        }
    }

    fn set_pointer_button(&self, button: PointerButton, is_down: bool) {
        lock(&self.page).inputs.push(InputEvent::Button { button, is_down });
    }

    fn set_scroll_delta(&self, dx: f64, dy: f64) {
        lock(&self.page).inputs.push(InputEvent::Scroll { dx, dy });
    }

    fn load_url(&self, url: &str) {
        self.navigate(url.to_string(), url.to_string(), true);
    }

    fn load_string_content(&self, html: &str) {
        let title = document_title(html).unwrap_or_else(|| BLANK_URL.to_string());
        self.navigate(BLANK_URL.to_string(), title, true);
    }

    fn reload(&self) -> bool {
        let current = lock(&self.page).current().cloned();
        match current {
            Some((url, title)) => {
                self.navigate(url, title, false);
                true
            }
            None => false,
        }
    }

    fn stop(&self) -> bool {
        // Navigations complete synchronously; there is never one to cancel.
        true
    }

    fn go_back(&self) -> bool {
        self.traverse(-1)
    }

    fn go_forward(&self) -> bool {
        self.traverse(1)
    }

    async fn execute_script(&self, script: &str) -> bool {
        let ok = self.has_document();
        debug!("headless script ({} bytes) {}", script.len(), if ok { "ran" } else { "rejected" });
        ok
    }

    fn post_web_message(&self, message: &str) -> bool {
        if !self.has_document() {
            return false;
        }
        // The headless page echoes every message back.
        self.emit(vec![BrowserEvent::WebMessageReceived(message.to_string())]);
        true
    }

    fn set_user_agent(&self, user_agent: &str) -> bool {
        lock(&self.page).user_agent = Some(user_agent.to_string());
        true
    }

    fn set_background_color(&self, argb: u32) -> bool {
        // Only fully opaque or fully transparent backgrounds are supported.
        let alpha = argb >> 24;
        if alpha != 0 && alpha != 0xFF {
            return false;
        }
        lock(&self.page).background = argb;
        self.render_frame();
        true
    }

    fn resolve_permission(&self, id: u64, state: PermissionState) -> bool {
        let mut page = lock(&self.page);
        match page.permissions.get_mut(&id) {
            Some(slot) if slot.is_none() => {
                *slot = Some(state);
                true
            }
            _ => false,
        }
    }
}

// ── HeadlessEnvironment ───────────────────────────────────────────────────────

pub struct HeadlessEnvironment {
    device: Arc<SoftwareDevice>,
    options: EnvironmentOptions,
    sessions: AtomicU64,
}

impl HeadlessEnvironment {
    /// Fails if a browser executable is named but missing.
    pub fn new(device: Arc<SoftwareDevice>, options: EnvironmentOptions) -> Result<Self, HostError> {
        if let Some(exe) = &options.browser_exe_path {
            if !exe.exists() {
                return Err(HostError::EnvironmentCreation(format!("browser executable {} not found", exe.display())));
            }
        }
        info!(
            "headless browser environment ready (user data: {})",
            options.user_data_path.as_deref().map_or_else(|| "<none>".into(), |p| p.display().to_string())
        );
        Ok(Self { device, options, sessions: AtomicU64::new(0) })
    }

    pub fn options(&self) -> &EnvironmentOptions {
        &self.options
    }

    pub fn sessions_created(&self) -> u64 {
        self.sessions.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BrowserEnvironment for HeadlessEnvironment {
    type Session = HeadlessBrowser;

    async fn create_session(&self) -> Result<HeadlessBrowser, HostError> {
        self.sessions.fetch_add(1, Ordering::Relaxed);
        Ok(HeadlessBrowser::new(Arc::clone(&self.device)))
    }
}
