//! SegCap platform core contracts.
//!
//! This crate contains the platform boundary used by the capture engine:
//! stream acquisition (`MediaDevices`, `MediaStream`), streaming encoders
//! (`EncoderBackend`, `MediaEncoder`) and local preview (`PreviewSink`),
//! plus the value types exchanged across it. Concrete backends live in the
//! capture engine; nothing here touches an OS API.

pub mod encoder;
pub mod format;
pub mod media;

pub use encoder::*;
pub use format::*;
pub use media::*;
