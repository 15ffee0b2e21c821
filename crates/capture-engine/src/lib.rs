//! SegCap Capture Engine
//!
//! Manages a client-side recording session: acquires a camera or screen
//! stream, records it into segments, and switches sources mid-session.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                  RecordingSession                    │
//! │  ┌───────────────┐  ┌───────────────┐  ┌──────────┐  │
//! │  │ CaptureSource │─▶│ EncodingSession│─▶│ Segment  │  │
//! │  │ Provider      │  │ (encoder)      │  │ Accum.   │  │
//! │  └───────┬───────┘  └───────┬────────┘  └────┬─────┘  │
//! │          │ stream           │ chunks         │        │
//! │          ▼                  ▼                ▼        │
//! │  ┌─────────────────────────────────────────────────┐  │
//! │  │                ObservationBus                   │  │
//! │  │  state · mime type · chunk size · stream        │  │
//! │  └─────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────┘
//!            ▲ commands                 │ events
//!      SessionHandle (controller)   Subscription / watch
//! ```
//!
//! Platform access goes through a [`backend::CaptureBackend`]: GStreamer
//! on Linux, or the in-memory synthetic backend.

pub mod backend;
pub mod controller;
pub mod encoder;
pub mod observe;
pub mod pipeline;
pub mod segment;
pub mod session;
pub mod source;

pub use backend::{get_backend, CaptureBackend};
pub use controller::SessionHandle;
pub use encoder::{select_format, EncoderOutput, EncodingSession};
pub use observe::{ObservationBus, SessionEvent, SessionSnapshot, StreamInfo, Subscription};
pub use segment::{ArtifactRef, Download, RecordingSegment, SegmentAccumulator, SegmentId, SegmentSummary};
pub use session::*;
pub use source::CaptureSourceProvider;
