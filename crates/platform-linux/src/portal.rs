//! XDG Desktop Portal integration for Wayland screen capture.
//!
//! On Wayland, screen capture must go through the XDG Desktop Portal,
//! which asks the user which monitor or window to share.
//!
//! # Flow
//!
//! 1. Connect to `org.freedesktop.portal.ScreenCast` via DBus
//! 2. Create a session
//! 3. Select sources (monitor or window) with an embedded cursor
//! 4. Start the stream and receive a PipeWire node ID
//! 5. Keep the session open until the stream is released

use ashpd::desktop::screencast::{CursorMode, Screencast, SourceType};
use ashpd::desktop::PersistMode;
use ashpd::WindowIdentifier;
use segcap_common::error::{SegcapError, SegcapResult};
use tokio::sync::oneshot;

/// An open ScreenCast portal session.
///
/// The portal session is closed when this value is closed or dropped.
#[derive(Debug)]
pub struct PortalSession {
    /// PipeWire node ID for the video stream.
    pub pipewire_node_id: u32,

    /// Stream dimensions, when the portal reports them.
    pub size: Option<(u32, u32)>,

    close_tx: Option<oneshot::Sender<()>>,
}

impl PortalSession {
    /// Close the portal session. Idempotent.
    pub fn close(&mut self) {
        if let Some(tx) = self.close_tx.take() {
            let _ = tx.send(());
            tracing::info!(node = self.pipewire_node_id, "Closing portal session");
        }
    }
}

impl Drop for PortalSession {
    fn drop(&mut self) {
        self.close();
    }
}

type Negotiated = Result<(u32, Option<(i32, i32)>), String>;

/// Request a screen capture session through the XDG Desktop Portal.
///
/// This shows the compositor's share dialog; a cancelled dialog is a
/// permission error.
pub async fn request_screencast() -> SegcapResult<PortalSession> {
    tracing::info!("Requesting XDG ScreenCast session");

    let (ready_tx, ready_rx) = oneshot::channel::<Negotiated>();
    let (close_tx, close_rx) = oneshot::channel::<()>();

    // The portal session borrows its proxy, so both live in one task that
    // waits for the close signal.
    tokio::spawn(async move {
        macro_rules! step {
            ($stage:literal, $fut:expr) => {
                match $fut {
                    Ok(value) => value,
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!("{}: {e}", $stage)));
                        return;
                    }
                }
            };
        }

        let proxy = step!("connect", Screencast::new().await);
        let session = step!("create session", proxy.create_session().await);
        step!(
            "select sources",
            proxy
                .select_sources(
                    &session,
                    CursorMode::Embedded,
                    SourceType::Monitor | SourceType::Window,
                    false,
                    None,
                    PersistMode::DoNot,
                )
                .await
        );
        let request = step!("start", proxy.start(&session, &WindowIdentifier::default()).await);
        let streams = step!("start", request.response());

        let negotiated = match streams.streams().first() {
            Some(stream) => Ok((stream.pipe_wire_node_id(), stream.size())),
            None => Err("portal returned no streams".to_string()),
        };
        let failed = negotiated.is_err();
        if ready_tx.send(negotiated).is_err() || failed {
            let _ = session.close().await;
            return;
        }

        let _ = close_rx.await;
        if let Err(e) = session.close().await {
            tracing::warn!(error = %e, "Failed to close portal session");
        }
    });

    let negotiated = ready_rx
        .await
        .map_err(|_| SegcapError::platform("Portal task exited unexpectedly"))?;

    match negotiated {
        Ok((node, size)) => {
            let size = size.and_then(|(w, h)| Some((u32::try_from(w).ok()?, u32::try_from(h).ok()?)));
            tracing::info!(node, ?size, "ScreenCast portal granted");
            Ok(PortalSession {
                pipewire_node_id: node,
                size,
                close_tx: Some(close_tx),
            })
        }
        Err(message) => Err(SegcapError::permission_denied(format!(
            "Screen sharing was not granted ({message})"
        ))),
    }
}

/// Check if the XDG ScreenCast portal is likely available.
pub fn is_portal_available() -> bool {
    std::env::var("WAYLAND_DISPLAY").is_ok()
        || std::env::var("XDG_SESSION_TYPE")
            .map(|v| v == "wayland")
            .unwrap_or(false)
}
