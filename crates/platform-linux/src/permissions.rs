//! Permission detection and guidance for Linux.
//!
//! Camera capture needs a readable V4L2 node, screen capture needs a
//! graphical session (and the ScreenCast portal on Wayland), and the
//! microphone needs a PulseAudio or PipeWire server.

use std::path::PathBuf;

use crate::devices::{check_device_access, detect_default_camera};
use crate::display::{detect_display_server, DisplayServer};
use crate::portal::is_portal_available;

/// A system capability that SegCap may need.
#[derive(Debug, Clone)]
pub struct Capability {
    pub name: String,
    pub description: String,
    pub available: bool,
    pub required: bool,
    pub fix_instructions: Option<String>,
}

/// Check all capabilities and report status.
pub fn check_capabilities() -> Vec<Capability> {
    vec![
        check_display_session(),
        check_portal_access(),
        check_camera_access(),
        check_audio_access(),
    ]
}

fn check_display_session() -> Capability {
    let available = detect_display_server() != DisplayServer::Unknown;
    Capability {
        name: "Display Session".to_string(),
        description: "Wayland or X11 session for screen sharing".to_string(),
        available,
        required: false,
        fix_instructions: (!available).then(|| {
            "Run inside a graphical desktop session (GNOME, KDE, etc.)".to_string()
        }),
    }
}

/// Check if the XDG Desktop Portal is needed and reachable.
fn check_portal_access() -> Capability {
    let wayland = detect_display_server() == DisplayServer::Wayland;
    let available = !wayland || is_portal_available();

    Capability {
        name: "Screen Capture Portal".to_string(),
        description: "XDG Desktop Portal for screen sharing consent (Wayland only)".to_string(),
        available,
        required: false,
        fix_instructions: (!available).then(|| {
            "Install xdg-desktop-portal and a backend for your desktop (gnome, kde, wlr)"
                .to_string()
        }),
    }
}

fn check_camera_access() -> Capability {
    let camera = detect_default_camera();
    let (available, fix) = match camera {
        None => (
            false,
            Some(
                "Connect a webcam and verify /dev/video* exists (v4l2-ctl --list-devices)"
                    .to_string(),
            ),
        ),
        Some(device) => match check_device_access(&device.path) {
            Ok(()) => (true, None),
            Err(e) => (false, Some(e.to_string())),
        },
    };

    Capability {
        name: "Camera Device".to_string(),
        description: "Video4Linux camera for camera recording".to_string(),
        available,
        required: true,
        fix_instructions: fix,
    }
}

fn check_audio_access() -> Capability {
    let available = audio_server_sockets().iter().any(|p| p.exists());
    Capability {
        name: "Audio Capture".to_string(),
        description: "PulseAudio/PipeWire microphone capture".to_string(),
        available,
        required: false,
        fix_instructions: (!available)
            .then(|| "Install PipeWire: sudo apt install pipewire pipewire-pulse".to_string()),
    }
}

fn audio_server_sockets() -> Vec<PathBuf> {
    let Ok(runtime) = std::env::var("XDG_RUNTIME_DIR") else {
        return Vec::new();
    };
    let runtime = PathBuf::from(runtime);
    vec![runtime.join("pulse").join("native"), runtime.join("pipewire-0")]
}

/// Print a user-friendly capability report.
pub fn print_capability_report(capabilities: &[Capability]) {
    println!("SegCap System Capabilities:");
    println!("{}", "-".repeat(60));

    for cap in capabilities {
        let status = if cap.available {
            "[OK]"
        } else if cap.required {
            "[MISSING - REQUIRED]"
        } else {
            "[MISSING - OPTIONAL]"
        };

        println!("  {} {}: {}", status, cap.name, cap.description);

        if let Some(ref fix) = cap.fix_instructions {
            println!("    Fix: {fix}");
        }
    }
}
