//! GStreamer streaming encoders.
//!
//! Each encoder is a single pipeline: a capture source, optional
//! microphone branch, codec elements and a muxer feeding an `appsink`.
//! Muxed buffers leave the pipeline as [`EncoderEvent::DataAvailable`]
//! chunks; the appsink end-of-stream is the completion signal.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use bytes::Bytes;
use gst::prelude::*;
use gstreamer as gst;
use gstreamer_app as gst_app;
use segcap_common::error::{SegcapError, SegcapResult};
use segcap_platform_core::{AudioConstraints, EncoderEvent, EncodingFormat, MediaEncoder};
use tokio::sync::mpsc;

const FRAMERATE: u32 = 30;
const BUS_POLL: Duration = Duration::from_millis(200);

/// Where the video branch of a pipeline reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureSource {
    /// A V4L2 camera node.
    Camera { device: PathBuf },
    /// The X11 root window.
    X11Screen { display: Option<String> },
    /// A PipeWire node negotiated through the ScreenCast portal.
    PipeWire { node_id: u32 },
}

/// Element choices for one encoding format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatPlan {
    video_encoder: &'static str,
    video_parser: Option<&'static str>,
    audio_encoder: Option<&'static str>,
    muxer: &'static str,
}

impl FormatPlan {
    /// Plan the elements that produce `format`, or `None` if the
    /// container or a codec is not something we can build.
    pub fn for_format(format: &EncodingFormat) -> Option<Self> {
        let codecs = format.codecs();
        let video = codecs.iter().find_map(|c| video_codec(c));
        let audio = codecs.iter().find_map(|c| audio_codec(c));
        if codecs
            .iter()
            .any(|c| video_codec(c).is_none() && audio_codec(c).is_none())
        {
            return None;
        }
        let unspecified = codecs.is_empty();

        match format.container() {
            "webm" => {
                let video = video.unwrap_or(VideoCodec::Vp8);
                if video == VideoCodec::H264 {
                    return None;
                }
                if audio == Some(AudioCodec::Aac) {
                    return None;
                }
                Some(Self::assemble(
                    video,
                    if unspecified { Some(AudioCodec::Opus) } else { audio },
                    "webmmux streamable=true",
                ))
            }
            "mp4" => {
                let video = video.unwrap_or(VideoCodec::H264);
                if video != VideoCodec::H264 || audio == Some(AudioCodec::Opus) {
                    return None;
                }
                Some(Self::assemble(
                    video,
                    if unspecified { Some(AudioCodec::Aac) } else { audio },
                    "mp4mux fragment-duration=1000 streamable=true",
                ))
            }
            "x-matroska" | "matroska" => Some(Self::assemble(
                video.unwrap_or(VideoCodec::H264),
                if unspecified { Some(AudioCodec::Opus) } else { audio },
                "matroskamux streamable=true",
            )),
            _ => None,
        }
    }

    fn assemble(video: VideoCodec, audio: Option<AudioCodec>, muxer: &'static str) -> Self {
        let (video_encoder, video_parser) = match video {
            VideoCodec::Vp8 => ("vp8enc deadline=1 cpu-used=8", None),
            VideoCodec::Vp9 => ("vp9enc deadline=1 cpu-used=8 row-mt=true", None),
            VideoCodec::H264 => (
                "x264enc tune=zerolatency speed-preset=veryfast key-int-max=60",
                Some("h264parse"),
            ),
        };
        let audio_encoder = audio.map(|codec| match codec {
            AudioCodec::Opus => "opusenc",
            AudioCodec::Aac => "avenc_aac",
        });
        Self {
            video_encoder,
            video_parser,
            audio_encoder,
            muxer,
        }
    }

    pub fn has_audio(&self) -> bool {
        self.audio_encoder.is_some()
    }

    /// Factory names of every codec element the plan needs.
    pub fn elements(&self) -> Vec<&'static str> {
        [
            Some(self.video_encoder),
            self.video_parser,
            self.audio_encoder,
            Some(self.muxer),
        ]
        .into_iter()
        .flatten()
        .filter_map(|launch| launch.split_whitespace().next())
        .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VideoCodec {
    Vp8,
    Vp9,
    H264,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AudioCodec {
    Opus,
    Aac,
}

fn video_codec(codec: &str) -> Option<VideoCodec> {
    match codec {
        "vp8" => Some(VideoCodec::Vp8),
        "vp9" => Some(VideoCodec::Vp9),
        "h264" | "avc1" => Some(VideoCodec::H264),
        c if c.starts_with("avc1.") => Some(VideoCodec::H264),
        _ => None,
    }
}

fn audio_codec(codec: &str) -> Option<AudioCodec> {
    match codec {
        "opus" => Some(AudioCodec::Opus),
        "aac" | "mp4a" => Some(AudioCodec::Aac),
        c if c.starts_with("mp4a.") => Some(AudioCodec::Aac),
        _ => None,
    }
}

/// Whether this machine's GStreamer install can produce `format`.
pub fn is_format_supported(format: &EncodingFormat) -> bool {
    let Some(plan) = FormatPlan::for_format(format) else {
        return false;
    };
    if init_gstreamer().is_err() {
        return false;
    }
    plan.elements()
        .iter()
        .chain(["appsink"].iter())
        .all(|name| gst::ElementFactory::find(name).is_some())
}

/// Whether a microphone source element is installed.
pub fn has_microphone_source() -> bool {
    init_gstreamer().is_ok() && gst::ElementFactory::find("pulsesrc").is_some()
}

/// Whether the WebRTC audio processing element is installed.
pub fn has_audio_dsp() -> bool {
    init_gstreamer().is_ok() && gst::ElementFactory::find("webrtcdsp").is_some()
}

/// Build the launch description of an encoding pipeline.
pub fn build_launch(
    source: &CaptureSource,
    size: (u32, u32),
    audio: Option<&AudioConstraints>,
    plan: &FormatPlan,
    use_dsp: bool,
) -> String {
    let (width, height) = size;
    let video_src = match source {
        CaptureSource::Camera { device } => format!(
            "v4l2src name=vsrc device=\"{}\" do-timestamp=true",
            escape_path(device)
        ),
        CaptureSource::X11Screen { display } => {
            let display = display
                .as_deref()
                .map(|d| format!(" display-name=\"{d}\""))
                .unwrap_or_default();
            format!("ximagesrc name=vsrc use-damage=false show-pointer=true{display}")
        }
        CaptureSource::PipeWire { node_id } => {
            format!("pipewiresrc name=vsrc path={node_id} do-timestamp=true")
        }
    };

    let parser = plan
        .video_parser
        .map(|p| format!(" ! {p}"))
        .unwrap_or_default();
    // Leaky queues keep a slow encoder from stalling the capture source.
    let mut launch = format!(
        "{video_src} ! queue max-size-buffers=200 leaky=downstream ! videoconvert ! videoscale ! videorate ! video/x-raw,width={width},height={height},framerate={FRAMERATE}/1 ! queue max-size-buffers=8 ! {}{parser} ! queue ! mux. ",
        plan.video_encoder
    );

    if let (Some(audio), Some(encoder)) = (audio, plan.audio_encoder) {
        let dsp = if use_dsp && (audio.echo_cancellation || audio.noise_suppression) {
            // webrtcdsp only accepts 8/16/32/48 kHz input.
            format!(
                " ! audioresample ! audio/x-raw,rate=48000 ! webrtcdsp echo-cancel={} noise-suppression={}",
                audio.echo_cancellation, audio.noise_suppression
            )
        } else {
            String::new()
        };
        launch.push_str(&format!(
            "pulsesrc name=asrc do-timestamp=true ! audioconvert ! audioresample ! audio/x-raw,rate={}{dsp} ! audioconvert ! audioresample ! {encoder} ! queue ! mux. ",
            audio.sample_rate
        ));
    }

    launch.push_str(&format!(
        "{} name=mux ! appsink name=sink sync=false",
        plan.muxer
    ));
    launch
}

/// Called when the video source stops on its own.
pub type SourceEndedHook = Arc<dyn Fn() + Send + Sync>;

/// A GStreamer pipeline driven as a [`MediaEncoder`].
pub struct GstEncoder {
    name: String,
    pipeline: gst::Pipeline,
    on_source_ended: Option<SourceEndedHook>,
    shared: Arc<EncoderShared>,
    bus_thread: Option<std::thread::JoinHandle<()>>,
}

#[derive(Default)]
struct EncoderShared {
    stopping: AtomicBool,
    failed: AtomicBool,
    finished: AtomicBool,
    shutdown: AtomicBool,
    events: Mutex<Option<mpsc::UnboundedSender<EncoderEvent>>>,
}

impl EncoderShared {
    fn send(&self, event: EncoderEvent) {
        let events = self
            .events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(tx) = events.as_ref() {
            let _ = tx.send(event);
        }
    }

    /// Emit the completion signal exactly once.
    fn finish(&self) {
        if !self.finished.swap(true, Ordering::SeqCst) {
            self.send(EncoderEvent::Stopped);
        }
    }
}

impl GstEncoder {
    pub fn from_launch(
        name: impl Into<String>,
        launch: &str,
        on_source_ended: Option<SourceEndedHook>,
    ) -> SegcapResult<Self> {
        init_gstreamer()?;
        let name = name.into();
        tracing::debug!(encoder = %name, %launch, "Building encoding pipeline");

        let element = gst::parse::launch(launch)
            .map_err(|e| SegcapError::encoder_init(format!("Failed to build pipeline: {e}")))?;
        let pipeline = element.dynamic_cast::<gst::Pipeline>().map_err(|_| {
            SegcapError::encoder_init("Launch string did not produce a pipeline")
        })?;

        Ok(Self {
            name,
            pipeline,
            on_source_ended,
            shared: Arc::new(EncoderShared::default()),
            bus_thread: None,
        })
    }

    fn appsink(&self) -> SegcapResult<gst_app::AppSink> {
        self.pipeline
            .by_name("sink")
            .and_then(|sink| sink.dynamic_cast::<gst_app::AppSink>().ok())
            .ok_or_else(|| SegcapError::encoder_init("Pipeline has no appsink named `sink`"))
    }

    fn spawn_bus_watch(&mut self) -> SegcapResult<()> {
        let bus = self
            .pipeline
            .bus()
            .ok_or_else(|| SegcapError::encoder_init("Pipeline has no bus"))?;
        let pipeline = self.pipeline.clone();
        let shared = self.shared.clone();
        let hook = self.on_source_ended.clone();
        let name = self.name.clone();

        let handle = std::thread::Builder::new()
            .name(format!("segcap-bus-{name}"))
            .spawn(move || {
                let timeout = gst::ClockTime::from_mseconds(BUS_POLL.as_millis() as u64);
                while !shared.shutdown.load(Ordering::SeqCst) {
                    let Some(msg) = bus.timed_pop(timeout) else {
                        continue;
                    };
                    match msg.view() {
                        gst::MessageView::Eos(_) => {
                            let requested = shared.stopping.load(Ordering::SeqCst);
                            tracing::debug!(encoder = %name, requested, "EOS reached the pipeline bus");
                            if !requested {
                                if let Some(hook) = hook.as_ref() {
                                    hook();
                                }
                            }
                            shared.finish();
                            let _ = pipeline.set_state(gst::State::Null);
                            break;
                        }
                        gst::MessageView::Error(e) => {
                            let from_source = msg
                                .src()
                                .is_some_and(|src| src.name().as_str() == "vsrc");
                            tracing::warn!(
                                encoder = %name,
                                error = %e.error(),
                                from_source,
                                "Pipeline error"
                            );
                            shared.failed.store(true, Ordering::SeqCst);
                            shared.send(EncoderEvent::Error(e.error().to_string()));
                            if from_source && !shared.stopping.load(Ordering::SeqCst) {
                                if let Some(hook) = hook.as_ref() {
                                    hook();
                                }
                            }
                            if shared.stopping.load(Ordering::SeqCst) {
                                shared.finish();
                                let _ = pipeline.set_state(gst::State::Null);
                                break;
                            }
                        }
                        _ => {}
                    }
                }
            })
            .map_err(|e| SegcapError::encoder_init(format!("Failed to spawn bus watcher: {e}")))?;
        self.bus_thread = Some(handle);
        Ok(())
    }
}

impl MediaEncoder for GstEncoder {
    fn start(&mut self, events: mpsc::UnboundedSender<EncoderEvent>) -> SegcapResult<()> {
        *self
            .shared
            .events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(events);

        let sample_shared = self.shared.clone();
        let eos_shared = self.shared.clone();
        self.appsink()?.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    let buffer = sample.buffer().ok_or(gst::FlowError::Error)?;
                    let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;
                    sample_shared.send(EncoderEvent::DataAvailable(Bytes::copy_from_slice(
                        map.as_slice(),
                    )));
                    Ok(gst::FlowSuccess::Ok)
                })
                .eos(move |_| eos_shared.finish())
                .build(),
        );

        self.spawn_bus_watch()?;

        self.pipeline.set_state(gst::State::Playing).map_err(|e| {
            SegcapError::encoder_init(format!("Failed to start {} pipeline: {e:?}", self.name))
        })?;

        // State changes are async; make sure the source actually opened.
        match self.pipeline.state(gst::ClockTime::from_seconds(10)) {
            (Ok(_), gst::State::Playing, _) => {}
            (Ok(_), state, _) => {
                tracing::warn!(
                    encoder = %self.name,
                    ?state,
                    "Pipeline did not reach Playing state within timeout"
                );
            }
            (Err(e), _, _) => {
                let _ = self.pipeline.set_state(gst::State::Null);
                return Err(SegcapError::encoder_init(format!(
                    "{} pipeline failed to reach Playing state: {e:?}",
                    self.name
                )));
            }
        }
        tracing::info!(encoder = %self.name, "Encoding pipeline playing");
        Ok(())
    }

    fn pause(&mut self) -> SegcapResult<()> {
        self.pipeline.set_state(gst::State::Paused).map_err(|e| {
            SegcapError::capture(format!("Failed to pause {} pipeline: {e:?}", self.name))
        })?;
        Ok(())
    }

    fn resume(&mut self) -> SegcapResult<()> {
        self.pipeline.set_state(gst::State::Playing).map_err(|e| {
            SegcapError::capture(format!("Failed to resume {} pipeline: {e:?}", self.name))
        })?;
        Ok(())
    }

    fn stop(&mut self) -> SegcapResult<()> {
        self.shared.stopping.store(true, Ordering::SeqCst);

        if self.shared.failed.load(Ordering::SeqCst) || self.shared.finished.load(Ordering::SeqCst)
        {
            let _ = self.pipeline.set_state(gst::State::Null);
            self.shared.finish();
            return Ok(());
        }

        // A paused pipeline does not push EOS downstream.
        let _ = self.pipeline.set_state(gst::State::Playing);

        // EOS lets the muxer write its trailing data before the appsink
        // reports completion.
        if !self.pipeline.send_event(gst::event::Eos::new()) {
            tracing::warn!(encoder = %self.name, "Failed to send EOS event; output may be truncated");
            let _ = self.pipeline.set_state(gst::State::Null);
            self.shared.finish();
        }
        Ok(())
    }
}

impl Drop for GstEncoder {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        let _ = self.pipeline.set_state(gst::State::Null);
        if let Some(handle) = self.bus_thread.take() {
            let _ = handle.join();
        }
    }
}

pub(crate) fn init_gstreamer() -> SegcapResult<()> {
    static GST_INIT: OnceLock<Result<(), String>> = OnceLock::new();
    let init_res = GST_INIT.get_or_init(|| gst::init().map_err(|e| e.to_string()));
    match init_res {
        Ok(()) => Ok(()),
        Err(e) => Err(SegcapError::platform(format!(
            "Failed to initialize GStreamer: {e}"
        ))),
    }
}

fn escape_path(path: &Path) -> String {
    path.to_string_lossy().replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(mime: &str) -> Option<FormatPlan> {
        FormatPlan::for_format(&EncodingFormat::parse(mime))
    }

    #[test]
    fn test_webm_plans() {
        let vp9 = plan("video/webm;codecs=vp9,opus").unwrap();
        assert_eq!(vp9.elements(), vec!["vp9enc", "opusenc", "webmmux"]);

        let video_only = plan("video/webm;codecs=vp8").unwrap();
        assert!(!video_only.has_audio());
        assert_eq!(video_only.elements(), vec!["vp8enc", "webmmux"]);

        let bare = plan("video/webm").unwrap();
        assert_eq!(bare.elements(), vec!["vp8enc", "opusenc", "webmmux"]);
    }

    #[test]
    fn test_mp4_plans() {
        let mp4 = plan("video/mp4").unwrap();
        assert_eq!(
            mp4.elements(),
            vec!["x264enc", "h264parse", "avenc_aac", "mp4mux"]
        );
        assert!(plan("video/mp4;codecs=avc1.42E01E,mp4a.40.2").is_some());
        assert!(plan("video/mp4;codecs=vp9").is_none());
    }

    #[test]
    fn test_unplannable_formats() {
        assert!(plan("video/ogg;codecs=theora").is_none());
        assert!(plan("video/webm;codecs=h264").is_none());
        assert!(plan("video/webm;codecs=vp9,flac").is_none());
        assert!(plan("audio/wav").is_none());
    }

    #[test]
    fn test_camera_launch_with_dsp() {
        let audio = AudioConstraints {
            echo_cancellation: true,
            noise_suppression: false,
            sample_rate: 44100,
        };
        let launch = build_launch(
            &CaptureSource::Camera {
                device: PathBuf::from("/dev/video2"),
            },
            (1280, 720),
            Some(&audio),
            &plan("video/webm;codecs=vp9,opus").unwrap(),
            true,
        );
        assert!(launch.starts_with("v4l2src name=vsrc device=\"/dev/video2\""));
        assert!(launch.contains("video/x-raw,width=1280,height=720,framerate=30/1"));
        assert!(launch.contains("audio/x-raw,rate=44100"));
        assert!(launch.contains("webrtcdsp echo-cancel=true noise-suppression=false"));
        assert!(launch.ends_with("webmmux streamable=true name=mux ! appsink name=sink sync=false"));
    }

    #[test]
    fn test_screen_launch_without_audio_branch() {
        let launch = build_launch(
            &CaptureSource::PipeWire { node_id: 42 },
            (1920, 1080),
            Some(&AudioConstraints::default()),
            &plan("video/webm;codecs=vp8").unwrap(),
            false,
        );
        assert!(launch.starts_with("pipewiresrc name=vsrc path=42"));
        assert!(!launch.contains("pulsesrc"));

        let x11 = build_launch(
            &CaptureSource::X11Screen {
                display: Some(":1".to_string()),
            },
            (640, 480),
            None,
            &plan("video/mp4").unwrap(),
            false,
        );
        assert!(x11.contains("ximagesrc name=vsrc use-damage=false show-pointer=true display-name=\":1\""));
        assert!(x11.contains("x264enc tune=zerolatency speed-preset=veryfast key-int-max=60 ! h264parse"));
        assert!(!x11.contains("pulsesrc"));
    }
}
