//! Display server detection.

use serde::{Deserialize, Serialize};

/// Display server type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayServer {
    Wayland,
    X11,
    Unknown,
}

/// Detect the current display server.
pub fn detect_display_server() -> DisplayServer {
    display_server_from(
        std::env::var("WAYLAND_DISPLAY").ok().as_deref(),
        std::env::var("DISPLAY").ok().as_deref(),
    )
}

/// The X11 display name (e.g. `:0`), if any.
pub fn x11_display_name() -> Option<String> {
    std::env::var("DISPLAY").ok().filter(|d| !d.is_empty())
}

fn display_server_from(wayland: Option<&str>, x11: Option<&str>) -> DisplayServer {
    if wayland.is_some_and(|v| !v.is_empty()) {
        DisplayServer::Wayland
    } else if x11.is_some_and(|v| !v.is_empty()) {
        DisplayServer::X11
    } else {
        DisplayServer::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wayland_takes_precedence() {
        assert_eq!(
            display_server_from(Some("wayland-0"), Some(":0")),
            DisplayServer::Wayland
        );
    }

    #[test]
    fn test_x11_and_unknown() {
        assert_eq!(display_server_from(None, Some(":1")), DisplayServer::X11);
        assert_eq!(display_server_from(Some(""), None), DisplayServer::Unknown);
    }
}
