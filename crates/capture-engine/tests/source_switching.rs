use std::time::Duration;

use segcap_capture_engine::backend::SyntheticBackend;
use segcap_capture_engine::{
    RecordingSession, SegmentId, SessionConfig, SessionEvent, SessionSignal,
};
use segcap_common::error::ErrorKind;
use segcap_platform_core::{MediaStream, RecordingState, Resolution, SourceType};

fn new_session(backend: &SyntheticBackend) -> RecordingSession {
    RecordingSession::new(backend, SessionConfig::default())
}

fn source_types(session: &RecordingSession) -> Vec<SourceType> {
    session.segments().iter().map(|s| s.source_type).collect()
}

#[tokio::test]
async fn screen_share_end_switches_back_to_camera() {
    let backend = SyntheticBackend::new();
    let mut session = new_session(&backend);
    session.initialize().await.unwrap();

    session.start_screen_share().await.unwrap();
    assert_eq!(session.state(), RecordingState::Recording);
    backend.emit_chunk(1000);

    assert!(backend.end_screen_share());
    session.run_pending().await;

    assert_eq!(source_types(&session), vec![SourceType::Screen, SourceType::Camera]);
    assert_eq!(session.state(), RecordingState::Recording);
    assert_eq!(session.segment_size(SegmentId(0)).unwrap(), 1000);
    assert!(session.segments()[0].finalized);
    assert!(!session.segments()[1].finalized);
    assert_eq!(
        session.stream().map(|s| s.source_type),
        Some(SourceType::Camera)
    );
}

#[tokio::test]
async fn screen_share_end_is_seen_by_next_signal() {
    let backend = SyntheticBackend::new();
    let mut session = new_session(&backend);
    session.start_screen_share().await.unwrap();

    backend.end_screen_share();
    let signal = tokio::time::timeout(Duration::from_secs(1), session.next_signal())
        .await
        .unwrap();
    assert!(matches!(signal, SessionSignal::StreamEnded(_)));
    session.handle_signal(signal).await;

    assert_eq!(source_types(&session), vec![SourceType::Screen, SourceType::Camera]);
}

#[tokio::test]
async fn released_screen_stream_does_not_trigger_switch() {
    let backend = SyntheticBackend::new();
    let mut session = new_session(&backend);
    session.start_screen_share().await.unwrap();
    let screen = backend.streams().last().cloned().unwrap();

    session.switch_to_camera().await.unwrap();
    screen.end_naturally();
    assert_eq!(session.run_pending().await, 0);

    assert_eq!(source_types(&session), vec![SourceType::Screen, SourceType::Camera]);
}

#[tokio::test]
async fn switching_source_releases_previous_tracks() {
    let backend = SyntheticBackend::new();
    let mut session = new_session(&backend);
    session.initialize().await.unwrap();
    session.start_recording().unwrap();

    session.start_screen_share().await.unwrap();

    let streams = backend.streams();
    assert_eq!(streams.len(), 2);
    assert!(!streams[0].is_live());
    assert!(streams[1].is_live());
    assert_eq!(backend.live_stream_count(), 1);
    assert_eq!(source_types(&session), vec![SourceType::Camera, SourceType::Screen]);
}

#[tokio::test]
async fn screen_label_decides_segment_source_type() {
    let backend = SyntheticBackend::new()
        .with_camera_label("OBS Virtual Screen Camera")
        .with_screen_label("window:1234");
    let mut session = new_session(&backend);
    session.switch_to_camera().await.unwrap();
    session.start_screen_share().await.unwrap();

    // Segments follow the track label, not the requested source.
    assert_eq!(source_types(&session), vec![SourceType::Screen, SourceType::Camera]);
}

#[tokio::test]
async fn resolution_change_does_not_resume_recording() {
    let backend = SyntheticBackend::new();
    let mut session = new_session(&backend);
    session.initialize().await.unwrap();
    session.start_recording().unwrap();
    backend.emit_chunk(10);

    let full_hd = Resolution::new("1080p", 1920, 1080);
    session.change_resolution(full_hd.clone()).await.unwrap();

    assert_eq!(session.state(), RecordingState::Inactive);
    assert_eq!(session.resolution(), &full_hd);
    assert_eq!(session.segments().len(), 1);
    assert!(session.segments()[0].finalized);

    let requests = backend.requests();
    let (source, constraints) = requests.last().unwrap();
    assert_eq!(*source, SourceType::Camera);
    assert_eq!(constraints.video.ideal_width, 1920);
    assert_eq!(constraints.video.ideal_height, 1080);
    assert_eq!(backend.live_stream_count(), 1);
}

#[tokio::test]
async fn resolution_change_reacquires_screen_and_keeps_auto_switch() {
    let backend = SyntheticBackend::new();
    let mut session = new_session(&backend);
    session.start_screen_share().await.unwrap();

    session
        .change_resolution(Resolution::new("1080p", 1920, 1080))
        .await
        .unwrap();
    assert_eq!(backend.requests().last().unwrap().0, SourceType::Screen);
    assert_eq!(session.state(), RecordingState::Inactive);

    backend.end_screen_share();
    session.run_pending().await;
    assert_eq!(session.stream().unwrap().source_type, SourceType::Camera);
    assert_eq!(session.state(), RecordingState::Recording);
}

#[tokio::test]
async fn denied_screen_share_leaves_no_stream() {
    let backend = SyntheticBackend::new();
    backend.deny(SourceType::Screen, true);
    let mut session = new_session(&backend);
    session.initialize().await.unwrap();
    session.start_recording().unwrap();
    let mut sub = session.subscribe();

    let err = session.start_screen_share().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MediaAccess);

    assert!(session.stream().is_none());
    assert_eq!(session.state(), RecordingState::Inactive);
    assert!(session.segments()[0].finalized);

    let events = sub.drain();
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::StreamChanged { stream: None })));
    assert!(matches!(
        events.last(),
        Some(SessionEvent::Error {
            kind: ErrorKind::MediaAccess,
            ..
        })
    ));

    // Nothing bound, so starting is a no-op.
    session.start_recording().unwrap();
    assert_eq!(session.state(), RecordingState::Inactive);
    assert_eq!(session.segments().len(), 1);
}

#[tokio::test]
async fn format_selection_uses_first_supported_candidate() {
    let backend = SyntheticBackend::new().with_supported_formats(["video/webm;codecs=vp8"]);
    let config = SessionConfig {
        format_candidates: vec![
            "video/webm;codecs=av1".to_string(),
            "video/webm;codecs=vp8".to_string(),
            "video/mp4".to_string(),
        ],
        ..SessionConfig::default()
    };
    let mut session = RecordingSession::new(&backend, config);
    session.initialize().await.unwrap();
    session.start_recording().unwrap();
    backend.emit_chunk(2);
    session.stop_recording().await.unwrap();

    assert_eq!(session.mime_type(), Some("video/webm;codecs=vp8"));
    let download = session.download_segment(SegmentId(0)).unwrap().unwrap();
    assert_eq!(download.mime_type, "video/webm;codecs=vp8");
}

#[tokio::test]
async fn download_is_absent_until_finalized() {
    let backend = SyntheticBackend::new();
    let mut session = new_session(&backend);
    session.initialize().await.unwrap();
    session.start_recording().unwrap();

    assert!(session.download_segment(SegmentId(0)).unwrap().is_none());
    assert!(session.download_segment(SegmentId(1)).is_err());

    session.stop_recording().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let download = session.download_segment(SegmentId(0)).unwrap().unwrap();
    let path = download.write_to(dir.path()).unwrap();
    assert!(path.exists());
}
