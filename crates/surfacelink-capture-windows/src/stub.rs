//! Non-Windows stub (CI + cross-compilation).

/// Windows.Graphics.Capture is never available off Windows.
pub fn is_capture_supported() -> bool {
    tracing::debug!("is_capture_supported stub (non-Windows)");
    false
}
