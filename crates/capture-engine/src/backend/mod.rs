use std::sync::Arc;

use segcap_common::error::SegcapResult;
use segcap_platform_core::{EncoderBackend, MediaDevices, PreviewSink};

/// Abstract interface for platform-specific capture capabilities.
///
/// A backend bundles stream acquisition, encoder construction and an
/// optional local preview. Sessions only talk to the platform through it.
pub trait CaptureBackend: Send + Sync {
    /// Short name for logs and the CLI.
    fn name(&self) -> &'static str;

    /// User-media and display-media acquisition.
    fn media_devices(&self) -> Arc<dyn MediaDevices>;

    /// Encoding capability query and encoder construction.
    fn encoders(&self) -> Arc<dyn EncoderBackend>;

    /// Local preview of the bound stream, if the backend has one.
    ///
    /// The GStreamer backend has none; the synthetic backend does.
    fn preview(&self) -> Option<Arc<dyn PreviewSink>> {
        None
    }
}

pub mod linux;
pub mod synthetic;

pub use linux::LinuxBackend;
pub use synthetic::SyntheticBackend;

/// Get the platform-specific backend.
pub fn get_backend() -> SegcapResult<Box<dyn CaptureBackend>> {
    #[cfg(target_os = "linux")]
    {
        Ok(Box::new(LinuxBackend::new()?))
    }
    #[cfg(not(target_os = "linux"))]
    {
        Err(segcap_common::error::SegcapError::unsupported(
            "Only the Linux capture backend is available; use --synthetic elsewhere",
        ))
    }
}
