//! Segment accumulation and artifact finalization.
//!
//! Every recording span becomes one [`RecordingSegment`]. Chunks are
//! appended while the span records; stopping finalizes the segment into a
//! single [`Artifact`] tagged with the negotiated content type. Segments
//! are kept for the whole session, in creation order.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use segcap_common::clock::{epoch_millis, RecordingClock};
use segcap_common::error::{SegcapError, SegcapResult};
use segcap_platform_core::{EncodingFormat, SourceType};
use serde::{Deserialize, Serialize};

/// Handle to a segment: its position in the session's segment list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentId(pub usize);

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The concatenated, downloadable result of a segment.
#[derive(Debug)]
pub struct Artifact {
    pub id: u64,
    /// Content type (the negotiated MIME string).
    pub mime_type: String,
    pub data: Bytes,
    pub created_at: DateTime<Utc>,
}

/// Shared reference to an artifact. Equal iff both point at the same one.
#[derive(Debug, Clone)]
pub struct ArtifactRef(Arc<Artifact>);

impl ArtifactRef {
    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn mime_type(&self) -> &str {
        &self.0.mime_type
    }

    pub fn data(&self) -> &Bytes {
        &self.0.data
    }

    pub fn len(&self) -> usize {
        self.0.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.data.is_empty()
    }
}

impl PartialEq for ArtifactRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ArtifactRef {}

/// A download descriptor for a finalized segment.
#[derive(Debug, Clone)]
pub struct Download {
    /// `segment-<source>-<epochMillis>.<ext>`
    pub file_name: String,
    pub mime_type: String,
    pub data: Bytes,
}

impl Download {
    /// Write the artifact into `dir`, returning the full path.
    pub fn write_to(&self, dir: &Path) -> SegcapResult<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(&self.file_name);
        std::fs::write(&path, &self.data)?;
        tracing::info!(path = %path.display(), bytes = self.data.len(), "Segment written");
        Ok(path)
    }
}

/// One contiguous recording span bound to one source type.
#[derive(Debug)]
pub struct RecordingSegment {
    source_type: SourceType,
    chunks: Vec<Bytes>,
    artifact: Option<ArtifactRef>,
    clock: RecordingClock,
    finished_at: Option<DateTime<Utc>>,
    duration_secs: Option<f64>,
}

impl RecordingSegment {
    fn new(source_type: SourceType) -> Self {
        Self {
            source_type,
            chunks: Vec::new(),
            artifact: None,
            clock: RecordingClock::start(),
            finished_at: None,
            duration_secs: None,
        }
    }

    pub fn source_type(&self) -> SourceType {
        self.source_type
    }

    pub fn chunks(&self) -> &[Bytes] {
        &self.chunks
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Sum of all chunk sizes, computed on demand.
    pub fn total_size(&self) -> u64 {
        self.chunks.iter().map(|c| c.len() as u64).sum()
    }

    pub fn artifact(&self) -> Option<&ArtifactRef> {
        self.artifact.as_ref()
    }

    pub fn is_finalized(&self) -> bool {
        self.artifact.is_some()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.clock.epoch_wall()
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Wall time spent recording, once finalized. Includes paused time.
    pub fn duration_secs(&self) -> Option<f64> {
        self.duration_secs
    }

    /// Download descriptor, available once finalized.
    pub fn download(&self) -> Option<Download> {
        let artifact = self.artifact.as_ref()?;
        let extension = EncodingFormat::parse(artifact.mime_type()).extension();
        Some(Download {
            file_name: format!(
                "segment-{}-{}.{}",
                self.source_type,
                epoch_millis(),
                extension
            ),
            mime_type: artifact.mime_type().to_string(),
            data: artifact.data().clone(),
        })
    }
}

/// Summary of a segment for presentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentSummary {
    pub id: SegmentId,
    pub source_type: SourceType,
    pub chunk_count: usize,
    pub total_size: u64,
    pub finalized: bool,
    pub artifact_id: Option<u64>,
    pub started_at: DateTime<Utc>,
    pub duration_secs: Option<f64>,
}

/// Ordered, append-only collection of a session's segments.
#[derive(Debug, Default)]
pub struct SegmentAccumulator {
    segments: Vec<RecordingSegment>,
    next_artifact_id: u64,
}

impl SegmentAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new, empty segment at the end of the list.
    pub fn begin_segment(&mut self, source_type: SourceType) -> SegmentId {
        self.segments.push(RecordingSegment::new(source_type));
        let id = SegmentId(self.segments.len() - 1);
        tracing::info!(segment = %id, source = %source_type, "Segment started");
        id
    }

    /// Append a chunk. Empty chunks are ignored.
    pub fn append(&mut self, id: SegmentId, chunk: Bytes) -> SegcapResult<()> {
        let segment = self.get_mut(id)?;
        if segment.is_finalized() {
            return Err(SegcapError::SegmentFinalized { index: id.0 });
        }
        if !chunk.is_empty() {
            segment.chunks.push(chunk);
        }
        Ok(())
    }

    /// Concatenate the segment's chunks into an artifact.
    ///
    /// Idempotent: finalizing again returns the existing reference.
    pub fn finalize(&mut self, id: SegmentId, format: &EncodingFormat) -> SegcapResult<ArtifactRef> {
        let artifact_id = self.next_artifact_id;
        let segment = self.get_mut(id)?;
        if let Some(existing) = &segment.artifact {
            tracing::debug!(segment = %id, artifact = existing.id(), "Segment already finalized");
            return Ok(existing.clone());
        }

        let mut buffer = BytesMut::with_capacity(segment.total_size() as usize);
        for chunk in &segment.chunks {
            buffer.extend_from_slice(chunk);
        }

        let artifact = ArtifactRef(Arc::new(Artifact {
            id: artifact_id,
            mime_type: format.mime_type().to_string(),
            data: buffer.freeze(),
            created_at: Utc::now(),
        }));
        segment.duration_secs = Some(segment.clock.elapsed_secs());
        segment.finished_at = Some(artifact.0.created_at);
        segment.artifact = Some(artifact.clone());
        self.next_artifact_id += 1;

        tracing::info!(
            segment = %id,
            artifact = artifact.id(),
            bytes = artifact.len(),
            mime_type = %format,
            "Segment finalized"
        );
        Ok(artifact)
    }

    pub fn total_size(&self, id: SegmentId) -> SegcapResult<u64> {
        Ok(self.get(id)?.total_size())
    }

    pub fn get(&self, id: SegmentId) -> SegcapResult<&RecordingSegment> {
        self.segments
            .get(id.0)
            .ok_or(SegcapError::UnknownSegment { index: id.0 })
    }

    fn get_mut(&mut self, id: SegmentId) -> SegcapResult<&mut RecordingSegment> {
        self.segments
            .get_mut(id.0)
            .ok_or(SegcapError::UnknownSegment { index: id.0 })
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn summaries(&self) -> Vec<SegmentSummary> {
        self.segments
            .iter()
            .enumerate()
            .map(|(index, segment)| SegmentSummary {
                id: SegmentId(index),
                source_type: segment.source_type,
                chunk_count: segment.chunk_count(),
                total_size: segment.total_size(),
                finalized: segment.is_finalized(),
                artifact_id: segment.artifact.as_ref().map(ArtifactRef::id),
                started_at: segment.started_at(),
                duration_secs: segment.duration_secs,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn webm() -> EncodingFormat {
        EncodingFormat::parse("video/webm;codecs=vp9,opus")
    }

    #[test]
    fn test_begin_segment_is_visible_immediately() {
        let mut acc = SegmentAccumulator::new();
        let id = acc.begin_segment(SourceType::Screen);
        assert_eq!(id, SegmentId(0));
        assert_eq!(acc.len(), 1);
        assert_eq!(acc.get(id).unwrap().source_type(), SourceType::Screen);
        assert_eq!(acc.total_size(id).unwrap(), 0);
        assert!(acc.get(id).unwrap().download().is_none());
    }

    #[test]
    fn test_finalize_concatenates_in_order() {
        let mut acc = SegmentAccumulator::new();
        let id = acc.begin_segment(SourceType::Camera);
        acc.append(id, Bytes::from_static(b"head")).unwrap();
        acc.append(id, Bytes::new()).unwrap();
        acc.append(id, Bytes::from_static(b"-tail")).unwrap();

        let artifact = acc.finalize(id, &webm()).unwrap();
        assert_eq!(artifact.data().as_ref(), b"head-tail");
        assert_eq!(artifact.mime_type(), "video/webm;codecs=vp9,opus");
        assert_eq!(acc.get(id).unwrap().chunk_count(), 2);
        assert!(acc.get(id).unwrap().duration_secs().is_some());
    }

    #[test]
    fn test_finalize_twice_returns_same_artifact() {
        let mut acc = SegmentAccumulator::new();
        let id = acc.begin_segment(SourceType::Camera);
        acc.append(id, Bytes::from_static(b"abc")).unwrap();

        let first = acc.finalize(id, &webm()).unwrap();
        let second = acc
            .finalize(id, &EncodingFormat::parse("video/mp4"))
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(second.mime_type(), "video/webm;codecs=vp9,opus");
    }

    #[test]
    fn test_append_after_finalize_is_rejected() {
        let mut acc = SegmentAccumulator::new();
        let id = acc.begin_segment(SourceType::Camera);
        acc.finalize(id, &webm()).unwrap();
        let err = acc.append(id, Bytes::from_static(b"late")).unwrap_err();
        assert!(matches!(err, SegcapError::SegmentFinalized { index: 0 }));
    }

    #[test]
    fn test_unknown_segment() {
        let mut acc = SegmentAccumulator::new();
        assert!(matches!(
            acc.append(SegmentId(3), Bytes::from_static(b"x")),
            Err(SegcapError::UnknownSegment { index: 3 })
        ));
        assert!(acc.total_size(SegmentId(0)).is_err());
    }

    #[test]
    fn test_artifact_ids_increase_per_finalized_segment() {
        let mut acc = SegmentAccumulator::new();
        let a = acc.begin_segment(SourceType::Camera);
        let b = acc.begin_segment(SourceType::Screen);
        let first = acc.finalize(b, &webm()).unwrap();
        let second = acc.finalize(a, &webm()).unwrap();
        assert_eq!(first.id(), 0);
        assert_eq!(second.id(), 1);
        assert_ne!(first, second);
    }

    #[test]
    fn test_download_name_matches_source_and_container() {
        let mut acc = SegmentAccumulator::new();
        let id = acc.begin_segment(SourceType::Screen);
        acc.append(id, Bytes::from_static(b"data")).unwrap();
        acc.finalize(id, &EncodingFormat::parse("video/mp4;codecs=h264,aac"))
            .unwrap();

        let download = acc.get(id).unwrap().download().unwrap();
        assert!(download.file_name.starts_with("segment-screen-"));
        assert!(download.file_name.ends_with(".mp4"));
        let millis = download
            .file_name
            .trim_start_matches("segment-screen-")
            .trim_end_matches(".mp4");
        assert!(millis.parse::<i64>().is_ok());
        assert_eq!(download.data.as_ref(), b"data");
    }

    #[test]
    fn test_download_write_to_dir() {
        let mut acc = SegmentAccumulator::new();
        let id = acc.begin_segment(SourceType::Camera);
        acc.append(id, Bytes::from_static(b"webm-bytes")).unwrap();
        acc.finalize(id, &webm()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let download = acc.get(id).unwrap().download().unwrap();
        let path = download.write_to(&dir.path().join("out")).unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"webm-bytes");
    }

    #[test]
    fn test_summaries() {
        let mut acc = SegmentAccumulator::new();
        let id = acc.begin_segment(SourceType::Camera);
        acc.append(id, Bytes::from_static(b"12345")).unwrap();
        acc.begin_segment(SourceType::Screen);

        let summaries = acc.summaries();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].total_size, 5);
        assert!(!summaries[0].finalized);
        assert_eq!(summaries[1].source_type, SourceType::Screen);
    }

    proptest! {
        #[test]
        fn total_size_matches_sum_of_appends(sizes in proptest::collection::vec(0usize..512, 0..40)) {
            let mut acc = SegmentAccumulator::new();
            let id = acc.begin_segment(SourceType::Camera);
            let mut expected = 0u64;
            for size in &sizes {
                acc.append(id, Bytes::from(vec![7u8; *size])).unwrap();
                expected += *size as u64;
                prop_assert_eq!(acc.total_size(id).unwrap(), expected);
            }
            let artifact = acc.finalize(id, &webm()).unwrap();
            prop_assert_eq!(artifact.len() as u64, expected);
        }

        #[test]
        fn interleaved_appends_keep_per_segment_totals(
            ops in proptest::collection::vec((0usize..3, 1usize..64), 0..60)
        ) {
            let mut acc = SegmentAccumulator::new();
            let ids: Vec<_> = (0..3).map(|_| acc.begin_segment(SourceType::Camera)).collect();
            let mut expected = [0u64; 3];
            for (target, size) in ops {
                acc.append(ids[target], Bytes::from(vec![1u8; size])).unwrap();
                expected[target] += size as u64;
            }
            for (i, id) in ids.iter().enumerate() {
                prop_assert_eq!(acc.total_size(*id).unwrap(), expected[i]);
            }
        }
    }
}
