pub mod check;
pub mod config;
pub mod formats;
pub mod record;

use segcap_capture_engine::backend::{get_backend, CaptureBackend, SyntheticBackend};

/// The platform backend, or the synthetic one when asked for.
pub fn backend(synthetic: bool) -> anyhow::Result<Box<dyn CaptureBackend>> {
    if synthetic {
        return Ok(Box::new(SyntheticBackend::new()));
    }
    Ok(get_backend()?)
}
