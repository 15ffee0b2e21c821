use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use segcap_common::error::{SegcapError, SegcapResult};
use segcap_platform_core::{
    AudioConstraints, EncoderBackend, EncodingFormat, MediaConstraints, MediaDevices,
    MediaEncoder, MediaStream, StreamId, TrackInfo, TrackKind,
};
use segcap_platform_linux::portal::{is_portal_available, request_screencast, PortalSession};
use segcap_platform_linux::{
    check_device_access, detect_default_camera, detect_display_server, x11_display_name,
    DisplayServer,
};
use tokio::sync::watch;

use crate::backend::CaptureBackend;
use crate::pipeline::{
    build_launch, has_audio_dsp, has_microphone_source, init_gstreamer, is_format_supported,
    CaptureSource, FormatPlan, GstEncoder,
};

const MICROPHONE_LABEL: &str = "Default audio input";

/// GStreamer capture on Linux: V4L2 cameras, X11 or portal screen capture,
/// PulseAudio/PipeWire microphone.
///
/// There is no preview sink. The encoder pipeline holds the capture device
/// exclusively, so sessions on this backend run headless and never report
/// playback errors. Only the synthetic backend provides a preview.
pub struct LinuxBackend {
    devices: Arc<GstMediaDevices>,
    encoders: Arc<GstEncoderBackend>,
}

impl LinuxBackend {
    pub fn new() -> SegcapResult<Self> {
        init_gstreamer()?;
        let display_server = detect_display_server();
        tracing::info!(?display_server, "Detected display server on Linux backend");
        Ok(Self {
            devices: Arc::new(GstMediaDevices {
                display_server,
                next_stream_id: AtomicU64::new(1),
            }),
            encoders: Arc::new(GstEncoderBackend::default()),
        })
    }
}

impl CaptureBackend for LinuxBackend {
    fn name(&self) -> &'static str {
        "gstreamer"
    }

    fn media_devices(&self) -> Arc<dyn MediaDevices> {
        self.devices.clone()
    }

    fn encoders(&self) -> Arc<dyn EncoderBackend> {
        self.encoders.clone()
    }
}

struct GstMediaDevices {
    display_server: DisplayServer,
    next_stream_id: AtomicU64,
}

impl GstMediaDevices {
    fn next_id(&self) -> StreamId {
        StreamId(self.next_stream_id.fetch_add(1, Ordering::Relaxed))
    }
}

#[async_trait::async_trait]
impl MediaDevices for GstMediaDevices {
    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> SegcapResult<Arc<dyn MediaStream>> {
        let camera = detect_default_camera().ok_or_else(|| {
            SegcapError::media_access(
                "No camera found (expected /dev/video0 or another /dev/video* node)",
            )
        })?;
        check_device_access(&camera.path)?;

        let id = self.next_id();
        let stream = GstMediaStream::new(
            id,
            CaptureSource::Camera {
                device: camera.path.clone(),
            },
            (
                constraints.video.ideal_width,
                constraints.video.ideal_height,
            ),
            constraints.audio.clone(),
            camera.label,
            None,
        );
        Ok(Arc::new(stream))
    }

    async fn get_display_media(
        &self,
        constraints: &MediaConstraints,
    ) -> SegcapResult<Arc<dyn MediaStream>> {
        let ideal = (
            constraints.video.ideal_width,
            constraints.video.ideal_height,
        );
        let id = self.next_id();

        match self.display_server {
            DisplayServer::Wayland => {
                if !is_portal_available() {
                    return Err(SegcapError::platform(
                        "XDG ScreenCast portal is not available for this Wayland session",
                    ));
                }
                let portal = request_screencast().await?;
                let node_id = portal.pipewire_node_id;
                Ok(Arc::new(GstMediaStream::new(
                    id,
                    CaptureSource::PipeWire { node_id },
                    ideal,
                    constraints.audio.clone(),
                    format!("screen:pipewire:{node_id}"),
                    Some(portal),
                )))
            }
            DisplayServer::X11 => {
                let display = x11_display_name();
                let label = format!("screen:x11:{}", display.as_deref().unwrap_or(":0"));
                Ok(Arc::new(GstMediaStream::new(
                    id,
                    CaptureSource::X11Screen { display },
                    ideal,
                    constraints.audio.clone(),
                    label,
                    None,
                )))
            }
            DisplayServer::Unknown => Err(SegcapError::platform(
                "Unsupported display server for Linux backend (expected Wayland or X11)",
            )),
        }
    }
}

/// Liveness shared between a stream and the pipelines reading from it.
#[derive(Debug)]
struct StreamLife {
    live: AtomicBool,
    ended: watch::Sender<bool>,
    portal: Mutex<Option<PortalSession>>,
}

impl StreamLife {
    fn release(&self) {
        self.live.store(false, Ordering::SeqCst);
        let portal = self
            .portal
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(mut portal) = portal {
            portal.close();
        }
    }

    fn end_naturally(&self) {
        if self.live.load(Ordering::SeqCst) {
            tracing::info!("Capture source ended");
            self.release();
            self.ended.send_replace(true);
        }
    }
}

/// A capture source description plus its liveness. Pipelines are built
/// from it when recording starts.
#[derive(Debug)]
pub struct GstMediaStream {
    id: StreamId,
    source: CaptureSource,
    size: (u32, u32),
    /// `None` when no microphone source element is installed.
    audio: Option<AudioConstraints>,
    tracks: Vec<TrackInfo>,
    life: Arc<StreamLife>,
}

impl GstMediaStream {
    fn new(
        id: StreamId,
        source: CaptureSource,
        size: (u32, u32),
        audio: AudioConstraints,
        video_label: String,
        portal: Option<PortalSession>,
    ) -> Self {
        let (ended, _) = watch::channel(false);
        let mut tracks = vec![TrackInfo {
            id: format!("{id}-video"),
            kind: TrackKind::Video,
            label: video_label,
        }];
        let audio = has_microphone_source().then_some(audio);
        if audio.is_some() {
            tracks.push(TrackInfo {
                id: format!("{id}-audio"),
                kind: TrackKind::Audio,
                label: MICROPHONE_LABEL.to_string(),
            });
        }
        Self {
            id,
            source,
            size,
            audio,
            tracks,
            life: Arc::new(StreamLife {
                live: AtomicBool::new(true),
                ended,
                portal: Mutex::new(portal),
            }),
        }
    }

    pub fn source(&self) -> &CaptureSource {
        &self.source
    }
}

#[async_trait::async_trait]
impl MediaStream for GstMediaStream {
    fn id(&self) -> StreamId {
        self.id
    }

    fn tracks(&self) -> Vec<TrackInfo> {
        self.tracks.clone()
    }

    fn stop_tracks(&self) {
        self.life.release();
    }

    fn is_live(&self) -> bool {
        self.life.live.load(Ordering::SeqCst)
    }

    fn has_ended(&self) -> bool {
        *self.life.ended.borrow()
    }

    async fn ended(&self) {
        let mut rx = self.life.ended.subscribe();
        if rx.wait_for(|ended| *ended).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Default)]
struct GstEncoderBackend {
    dsp: OnceLock<bool>,
}

impl EncoderBackend for GstEncoderBackend {
    fn is_type_supported(&self, mime_type: &str) -> bool {
        is_format_supported(&EncodingFormat::parse(mime_type))
    }

    fn create_encoder(
        &self,
        stream: Arc<dyn MediaStream>,
        mime_type: &str,
    ) -> SegcapResult<Box<dyn MediaEncoder>> {
        let gst_stream = stream
            .as_any()
            .downcast_ref::<GstMediaStream>()
            .ok_or_else(|| {
                SegcapError::encoder_init("Stream was not acquired through the GStreamer backend")
            })?;
        if !gst_stream.is_live() {
            return Err(SegcapError::encoder_init(format!(
                "{} has been released",
                gst_stream.id
            )));
        }

        let format = EncodingFormat::parse(mime_type);
        let plan = FormatPlan::for_format(&format).ok_or_else(|| {
            SegcapError::encoder_init(format!("No GStreamer elements can produce {format}"))
        })?;
        let use_dsp = *self.dsp.get_or_init(has_audio_dsp);
        let launch = build_launch(
            &gst_stream.source,
            gst_stream.size,
            gst_stream.audio.as_ref(),
            &plan,
            use_dsp,
        );

        let life = gst_stream.life.clone();
        let encoder = GstEncoder::from_launch(
            gst_stream.id.to_string(),
            &launch,
            Some(Arc::new(move || life.end_naturally())),
        )?;
        Ok(Box::new(encoder))
    }
}
