//! Embedded-browser seam: the session that renders the captured surface and
//! the environment sessions are created from. Both are black boxes; the
//! bridge only forwards commands to them and relays their events.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::HostError;

// MARK: - Session vocabulary

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadingState {
    None,
    Loading,
    NavigationCompleted,
}

impl LoadingState {
    /// Wire value used in `loadingStateChanged` events.
    pub fn as_i32(self) -> i32 {
        match self {
            Self::None => 0,
            Self::Loading => 1,
            Self::NavigationCompleted => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerButton {
    None,
    Primary,
    Secondary,
    Tertiary,
}

impl TryFrom<i64> for PointerButton {
    type Error = i64;

    fn try_from(value: i64) -> Result<Self, i64> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Primary),
            2 => Ok(Self::Secondary),
            3 => Ok(Self::Tertiary),
            other => Err(other),
        }
    }
}

/// System cursor shapes the browser can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorKind {
    Arrow,
    Hand,
    IBeam,
    Wait,
    AppStarting,
    Cross,
    Help,
    No,
    SizeAll,
    SizeWestEast,
    SizeNorthSouth,
    SizeNorthEastSouthWest,
    SizeNorthWestSouthEast,
    Hidden,
    Unknown,
}

impl CursorKind {
    /// Host cursor name. Shapes shared by several host names resolve to the
    /// most specific one; anything unrecognised is `basic`.
    pub fn host_name(self) -> &'static str {
        match self {
            Self::Arrow | Self::Unknown => "basic",
            Self::Hand => "click",
            Self::IBeam => "text",
            Self::Wait => "wait",
            Self::AppStarting => "progress",
            Self::Cross => "precise",
            Self::Help => "help",
            Self::No => "noDrop",
            Self::SizeAll => "move",
            Self::SizeWestEast => "resizeRight",
            Self::SizeNorthSouth => "resizeUpDown",
            Self::SizeNorthEastSouthWest => "resizeUpRightDownLeft",
            Self::SizeNorthWestSouthEast => "resizeUpLeftDownRight",
            Self::Hidden => "none",
        }
    }
}

/// Capability a page asks the user for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionKind {
    Unknown,
    Microphone,
    Camera,
    Geolocation,
    Notifications,
    OtherSensors,
    ClipboardRead,
}

impl PermissionKind {
    /// Wire value used in `permissionRequested` events.
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Unknown => 0,
            Self::Microphone => 1,
            Self::Camera => 2,
            Self::Geolocation => 3,
            Self::Notifications => 4,
            Self::OtherSensors => 5,
            Self::ClipboardRead => 6,
        }
    }
}

/// Host decision for a permission request. `Default` leaves it to the
/// browser's own policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Default,
    Allow,
    Deny,
}

impl From<Option<bool>> for PermissionState {
    fn from(allow: Option<bool>) -> Self {
        match allow {
            Some(true) => Self::Allow,
            Some(false) => Self::Deny,
            None => Self::Default,
        }
    }
}

/// Notifications a browser session raises. Delivered on the session's own
/// thread.
#[derive(Debug, Clone, PartialEq)]
pub enum BrowserEvent {
    UrlChanged(String),
    LoadingStateChanged(LoadingState),
    HistoryChanged { can_go_back: bool, can_go_forward: bool },
    TitleChanged(String),
    CursorChanged(CursorKind),
    WebMessageReceived(String),
    SurfaceSizeChanged { width: u32, height: u32 },
    /// The page wants a permission. The session waits for
    /// [`BrowserSession::resolve_permission`] with the same `id`.
    PermissionRequested { id: u64, url: String, kind: PermissionKind, is_user_initiated: bool },
}

pub type BrowserEventHandler = Arc<dyn Fn(BrowserEvent) + Send + Sync>;

// MARK: - BrowserSession

/// One off-screen browser instance rendering into a capturable surface.
#[async_trait]
pub trait BrowserSession: Send + Sync + 'static {
    /// Replace the event handler. Sessions start without one.
    fn set_event_handler(&self, handler: BrowserEventHandler);

    fn set_surface_size(&self, width: u32, height: u32);
    fn set_cursor_pos(&self, x: f64, y: f64);
    fn set_pointer_button(&self, button: PointerButton, is_down: bool);
    fn set_scroll_delta(&self, dx: f64, dy: f64);

    fn load_url(&self, url: &str);
    fn load_string_content(&self, html: &str);
    fn reload(&self) -> bool;
    fn stop(&self) -> bool;
    fn go_back(&self) -> bool;
    fn go_forward(&self) -> bool;

    /// `true` if the script ran without throwing.
    async fn execute_script(&self, script: &str) -> bool;
    fn post_web_message(&self, message: &str) -> bool;
    fn set_user_agent(&self, user_agent: &str) -> bool;
    fn set_background_color(&self, argb: u32) -> bool;

    /// Answer a pending permission request. `false` if `id` is unknown or
    /// already answered.
    fn resolve_permission(&self, id: u64, state: PermissionState) -> bool;
}

// MARK: - BrowserEnvironment

/// Shared browser runtime that sessions are created from.
#[async_trait]
pub trait BrowserEnvironment: Send + Sync + 'static {
    type Session: BrowserSession;

    async fn create_session(&self) -> Result<Self::Session, HostError>;
}

/// Options for `initializeEnvironment`. Missing fields fall back to the
/// platform defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentOptions {
    #[serde(alias = "browserExePath")]
    pub browser_exe_path: Option<PathBuf>,
    #[serde(alias = "userDataPath")]
    pub user_data_path: Option<PathBuf>,
    #[serde(alias = "additionalArguments")]
    pub additional_arguments: Option<String>,
}

impl EnvironmentOptions {
    /// Fill in the user data directory when none was given.
    pub fn with_defaults(mut self) -> Self {
        if self.user_data_path.is_none() {
            self.user_data_path = default_user_data_dir();
        }
        self
    }
}

/// `<app data>/surfacelink/<executable stem>`.
pub fn default_user_data_dir() -> Option<PathBuf> {
    let base = app_data_dir()?;
    let exe = std::env::current_exe().ok()?;
    let stem = exe.file_stem()?;
    Some(base.join("surfacelink").join(stem))
}

fn app_data_dir() -> Option<PathBuf> {
    let var = |name: &str| std::env::var_os(name).filter(|v| !v.is_empty()).map(PathBuf::from);
    if cfg!(target_os = "windows") {
        return var("APPDATA");
    }
    var("XDG_DATA_HOME").or_else(|| var("HOME").map(|home| home.join(".local/share")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn cursor_names_use_host_vocabulary() {
        assert_eq!(CursorKind::Arrow.host_name(), "basic");
        assert_eq!(CursorKind::Unknown.host_name(), "basic");
        assert_eq!(CursorKind::Hand.host_name(), "click");
        assert_eq!(CursorKind::IBeam.host_name(), "text");
        assert_eq!(CursorKind::SizeWestEast.host_name(), "resizeRight");
        assert_eq!(CursorKind::Hidden.host_name(), "none");
    }

    #[test]
    fn pointer_buttons_from_wire_values() {
        assert_eq!(PointerButton::try_from(0), Ok(PointerButton::None));
        assert_eq!(PointerButton::try_from(3), Ok(PointerButton::Tertiary));
        assert_eq!(PointerButton::try_from(4), Err(4));
    }

    #[test]
    fn permission_replies_map_to_states() {
        assert_eq!(PermissionState::from(Some(true)), PermissionState::Allow);
        assert_eq!(PermissionState::from(Some(false)), PermissionState::Deny);
        assert_eq!(PermissionState::from(None), PermissionState::Default);
        assert_eq!(PermissionKind::Geolocation.as_i32(), 3);
        assert_eq!(PermissionKind::ClipboardRead.as_i32(), 6);
    }

    #[test]
    fn environment_options_accept_camel_case() {
        let json = r#"{ "browserExePath": "C:/edge/msedge.exe", "additionalArguments": "--disable-gpu" }"#;
        let opts: EnvironmentOptions = serde_json::from_str(json).expect("valid options");
        assert_eq!(opts.browser_exe_path.as_deref(), Some(Path::new("C:/edge/msedge.exe")));
        assert_eq!(opts.additional_arguments.as_deref(), Some("--disable-gpu"));
        assert!(opts.user_data_path.is_none());
    }

    #[test]
    fn explicit_user_data_path_is_kept() {
        let opts = EnvironmentOptions { user_data_path: Some("/tmp/profile".into()), ..Default::default() }
            .with_defaults();
        assert_eq!(opts.user_data_path.as_deref(), Some(Path::new("/tmp/profile")));
    }
}
