//! SegCap Linux Platform Integration
//!
//! Platform-specific helpers for Linux:
//! - **XDG Desktop Portal:** Screen-share consent and PipeWire node negotiation
//! - **Video4Linux:** Camera discovery and access checks
//! - **Display Detection:** Wayland vs X11
//! - **Permissions:** Capability detection and user guidance

pub mod devices;
pub mod display;
pub mod permissions;
pub mod portal;

pub use devices::*;
pub use display::*;
