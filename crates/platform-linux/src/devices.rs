//! Video4Linux camera discovery.

use std::path::{Path, PathBuf};

use segcap_common::error::{SegcapError, SegcapResult};

/// A camera node selected for capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraDevice {
    /// Device node, e.g. `/dev/video0`.
    pub path: PathBuf,
    /// Device label reported by the driver.
    pub label: String,
}

// Positive indicators (webcam-like device names)
const WEBCAM_KEYWORDS: [&str; 12] = [
    "webcam",
    "camera",
    "cam",
    "facetime",
    "logitech",
    "microsoft",
    "creative",
    "razer",
    "elgato",
    "obs",
    "virtual",
    "v4l2loopback",
];

// Negative indicators (capture cards, tuners, encoders)
const NON_WEBCAM_KEYWORDS: [&str; 10] = [
    "tuner",
    "tv",
    "dvb",
    "hdmi",
    "capture",
    "encoder",
    "decoder",
    "hauppauge",
    "blackmagic",
    "magewell",
];

/// Find the best camera on this machine.
///
/// Enumerates `/dev/video0`..`/dev/video15`, scores each node from its
/// sysfs name and a `v4l2-ctl` capability probe, and returns the best one.
pub fn detect_default_camera() -> Option<CameraDevice> {
    detect_camera_in(Path::new("/dev"), Path::new("/sys/class/video4linux"), true)
}

fn detect_camera_in(dev_root: &Path, sysfs_root: &Path, probe: bool) -> Option<CameraDevice> {
    let mut candidates: Vec<(CameraDevice, u32)> = Vec::new();

    for idx in 0..16u32 {
        let dev_path = dev_root.join(format!("video{idx}"));
        if !dev_path.exists() {
            continue;
        }

        let name = std::fs::read_to_string(sysfs_root.join(format!("video{idx}")).join("name"))
            .unwrap_or_default()
            .trim()
            .to_string();
        let supports_capture = if probe {
            probe_v4l2_capture_capability(&dev_path)
        } else {
            None
        };
        let priority = camera_priority(&name, supports_capture);
        if priority == 0 {
            tracing::debug!(device = %dev_path.display(), name = %name, "Skipping non-webcam V4L2 device");
        }

        let label = if name.is_empty() {
            format!("Camera {}", dev_path.display())
        } else {
            name
        };
        candidates.push((
            CameraDevice {
                path: dev_path,
                label,
            },
            priority,
        ));
    }

    // Stable sort keeps lower device indices first among equal scores.
    candidates.sort_by(|a, b| b.1.cmp(&a.1));
    let (best, priority) = candidates.into_iter().next()?;
    tracing::info!(device = %best.path.display(), label = %best.label, priority, "Selected camera device");
    Some(best)
}

/// Score a device as a webcam candidate (higher = more likely a webcam).
/// Returns 0 if the device is definitely not a webcam.
fn camera_priority(name: &str, supports_capture: Option<bool>) -> u32 {
    let name = name.to_lowercase();
    if NON_WEBCAM_KEYWORDS.iter().any(|kw| name.contains(kw)) {
        return 0;
    }
    let has_webcam_keyword = WEBCAM_KEYWORDS.iter().any(|kw| name.contains(kw));

    match (has_webcam_keyword, supports_capture) {
        (true, Some(true)) => 100,
        (true, _) => 80,
        (false, Some(true)) => 50,
        (false, Some(false)) => 0,
        (false, None) => 10,
    }
}

/// Use `v4l2-ctl` to check if a device reports Video Capture capability.
/// Returns `None` if v4l2-ctl is not available.
fn probe_v4l2_capture_capability(dev_path: &Path) -> Option<bool> {
    let output = std::process::Command::new("v4l2-ctl")
        .arg("--device")
        .arg(dev_path)
        .arg("--info")
        .output()
        .ok()?;

    if !output.status.success() {
        return Some(false);
    }

    let stdout = String::from_utf8_lossy(&output.stdout).to_lowercase();
    Some(stdout.contains("video capture"))
}

/// Check that the current user may open the device node.
pub fn check_device_access(path: &Path) -> SegcapResult<()> {
    match std::fs::OpenOptions::new().read(true).open(path) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(SegcapError::permission_denied(format!(
                "Cannot open {} (add the user to the 'video' group)",
                path.display()
            )))
        }
        Err(e) => Err(SegcapError::media_access(format!(
            "Cannot open {}: {e}",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_node(dev: &Path, sys: &Path, idx: u32, name: &str) {
        std::fs::write(dev.join(format!("video{idx}")), b"").unwrap();
        let dir = sys.join(format!("video{idx}"));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("name"), format!("{name}\n")).unwrap();
    }

    #[test]
    fn test_priority_prefers_named_webcams() {
        assert_eq!(camera_priority("Integrated Camera", Some(true)), 100);
        assert_eq!(camera_priority("Integrated Camera", None), 80);
        assert_eq!(camera_priority("uvcvideo", None), 10);
        assert_eq!(camera_priority("HDMI Capture", Some(true)), 0);
    }

    #[test]
    fn test_detect_skips_capture_cards() {
        let dev = tempfile::tempdir().unwrap();
        let sys = tempfile::tempdir().unwrap();
        fake_node(dev.path(), sys.path(), 0, "Magewell HDMI");
        fake_node(dev.path(), sys.path(), 2, "Logitech BRIO");

        let camera = detect_camera_in(dev.path(), sys.path(), false).unwrap();
        assert_eq!(camera.path, dev.path().join("video2"));
        assert_eq!(camera.label, "Logitech BRIO");
    }

    #[test]
    fn test_detect_none_without_nodes() {
        let dev = tempfile::tempdir().unwrap();
        let sys = tempfile::tempdir().unwrap();
        assert!(detect_camera_in(dev.path(), sys.path(), false).is_none());
    }

    #[test]
    fn test_missing_device_is_media_access_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = check_device_access(&dir.path().join("video9")).unwrap_err();
        assert!(matches!(err, SegcapError::MediaAccess { .. }));
    }
}
