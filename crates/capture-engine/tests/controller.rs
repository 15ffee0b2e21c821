use std::time::Duration;

use segcap_capture_engine::backend::SyntheticBackend;
use segcap_capture_engine::controller::spawn;
use segcap_capture_engine::{RecordingSession, SegmentId, SessionConfig, SessionEvent, Subscription};
use segcap_platform_core::{RecordingState, SourceType};

async fn wait_for<F>(sub: &mut Subscription, mut pred: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let event = sub.recv().await.expect("bus closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event did not arrive in time")
}

#[tokio::test]
async fn commands_apply_in_arrival_order() {
    let backend = SyntheticBackend::new();
    let (handle, _task) = spawn(RecordingSession::new(&backend, SessionConfig::default()));
    let mut sub = handle.subscribe();

    handle.initialize().await.unwrap();
    let (a, b, c) = (handle.clone(), handle.clone(), handle.clone());
    let start = a.start_recording();
    let pause = b.pause_recording();
    let resume = c.resume_recording();
    // join! polls in order, so the commands are queued start, pause, resume.
    let (started, paused, resumed) = tokio::join!(start, pause, resume);
    started.unwrap();
    paused.unwrap();
    resumed.unwrap();
    handle.stop_recording().await.unwrap();

    let mut states = Vec::new();
    while let Some(event) = sub.try_recv() {
        if let SessionEvent::StateChanged { state } = event {
            states.push(state);
        }
    }
    assert_eq!(
        states,
        vec![
            RecordingState::Recording,
            RecordingState::Paused,
            RecordingState::Recording,
            RecordingState::Inactive
        ]
    );
}

#[tokio::test]
async fn last_applied_switch_wins() {
    let backend = SyntheticBackend::new();
    let (handle, _task) = spawn(RecordingSession::new(&backend, SessionConfig::default()));

    let (screen, camera) = tokio::join!(handle.start_screen_share(), handle.switch_to_camera());
    screen.unwrap();
    camera.unwrap();

    let stream = handle.stream().await.unwrap().unwrap();
    assert_eq!(stream.source_type, SourceType::Camera);
    assert_eq!(backend.live_stream_count(), 1);
    let segments = handle.segments().await.unwrap();
    assert_eq!(segments.len(), 2);
    assert!(segments[0].finalized);
}

#[tokio::test]
async fn controller_switches_to_camera_when_share_ends() {
    let backend = SyntheticBackend::new();
    let (handle, _task) = spawn(RecordingSession::new(&backend, SessionConfig::default()));
    let mut sub = handle.subscribe();

    handle.start_screen_share().await.unwrap();
    backend.emit_chunk(300);
    wait_for(&mut sub, |e| matches!(e, SessionEvent::ChunkRecorded { size: 300, .. })).await;

    backend.end_screen_share();
    wait_for(&mut sub, |e| {
        matches!(
            e,
            SessionEvent::SegmentStarted {
                source_type: SourceType::Camera,
                ..
            }
        )
    })
    .await;

    let segments = handle.segments().await.unwrap();
    let sources: Vec<_> = segments.iter().map(|s| s.source_type).collect();
    assert_eq!(sources, vec![SourceType::Screen, SourceType::Camera]);
    assert_eq!(handle.segment_size(SegmentId(0)).await.unwrap(), 300);
    assert_eq!(handle.state().await.unwrap(), RecordingState::Recording);
}

#[tokio::test]
async fn timed_chunks_reach_the_segment() {
    let backend = SyntheticBackend::new().with_auto_chunks(Duration::from_millis(5), 16);
    let (handle, _task) = spawn(RecordingSession::new(&backend, SessionConfig::default()));
    let mut watch = handle.bus().watch();

    handle.initialize().await.unwrap();
    handle.start_recording().await.unwrap();
    tokio::time::timeout(
        Duration::from_secs(2),
        watch.wait_for(|snapshot| snapshot.most_recent_chunk_size == 16),
    )
    .await
    .unwrap()
    .unwrap();
    handle.stop_recording().await.unwrap();

    let size = handle.segment_size(SegmentId(0)).await.unwrap();
    assert!(size >= 16);
    assert_eq!(size % 16, 0);
    assert_eq!(handle.snapshot().recording_state, RecordingState::Inactive);
}

#[tokio::test]
async fn dropping_handles_shuts_the_session_down() {
    let backend = SyntheticBackend::new();
    let (handle, task) = spawn(RecordingSession::new(&backend, SessionConfig::default()));
    handle.initialize().await.unwrap();
    handle.start_recording().await.unwrap();
    drop(handle);

    let session = task.await.unwrap();
    assert_eq!(session.state(), RecordingState::Inactive);
    assert!(session.segments()[0].finalized);
    assert_eq!(backend.live_stream_count(), 0);
}
