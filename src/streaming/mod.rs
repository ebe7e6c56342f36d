//! `StreamingEngine` (spec.md §4.7, C7): chunked upload pipeline with
//! resumability, idempotent re-delivery, and TTL-based garbage
//! collection of abandoned uploads.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::model::BlobRef;

pub type UploadId = Uuid;

#[derive(Debug, Error)]
pub enum StreamingError {
    #[error("unknown upload {0}")]
    UnknownUpload(UploadId),

    #[error("chunk index {index} mismatches expected checksum")]
    ChecksumMismatch { index: u64 },

    #[error("finish requested but chunk index {missing} was never received")]
    IncompleteUpload { missing: u64 },
}

/// Outcome of `append` (spec.md §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Ack,
    DuplicateChunk,
}

struct Chunk {
    bytes: Vec<u8>,
    checksum: u64,
}

struct Upload {
    metadata: serde_json::Value,
    chunk_size: usize,
    size_hint: Option<u64>,
    chunks: HashMap<u64, Chunk>,
    started_at: DateTime<Utc>,
    ttl: Duration,
}

impl Upload {
    fn highest_contiguous(&self) -> Option<u64> {
        let mut idx = 0u64;
        let mut found = None;
        while self.chunks.contains_key(&idx) {
            found = Some(idx);
            idx += 1;
        }
        found
    }

    fn higher_received(&self) -> Vec<u64> {
        let contiguous = self.highest_contiguous().map(|h| h + 1).unwrap_or(0);
        let mut higher: Vec<u64> = self
            .chunks
            .keys()
            .copied()
            .filter(|idx| *idx >= contiguous)
            .collect();
        higher.sort_unstable();
        higher
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.started_at + ChronoDuration::from_std(self.ttl).unwrap_or_default()
    }
}

/// Reports resumability state for a partial upload (spec.md §4.7).
#[derive(Debug, Clone)]
pub struct UploadProgress {
    pub highest_contiguous: Option<u64>,
    pub received_above_contiguous: Vec<u64>,
}

fn checksum_of(bytes: &[u8]) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}

/// Chunked upload/download pipeline (spec.md §4.7). Fixed chunk size
/// per upload; out-of-order chunk acceptance; idempotent re-delivery;
/// TTL-based GC for abandoned partial uploads.
pub struct StreamingEngine {
    uploads: Mutex<HashMap<UploadId, Upload>>,
    default_chunk_size: usize,
    upload_ttl: Duration,
}

impl StreamingEngine {
    pub fn new(default_chunk_size: usize, upload_ttl: Duration) -> Self {
        Self {
            uploads: Mutex::new(HashMap::new()),
            default_chunk_size,
            upload_ttl,
        }
    }

    /// `begin(size_hint, metadata) -> upload_id, chunk_size`.
    pub fn begin(&self, size_hint: Option<u64>, metadata: serde_json::Value) -> (UploadId, usize) {
        let id = Uuid::new_v4();
        let upload = Upload {
            metadata,
            chunk_size: self.default_chunk_size,
            size_hint,
            chunks: HashMap::new(),
            started_at: Utc::now(),
            ttl: self.upload_ttl,
        };
        self.uploads.lock().unwrap().insert(id, upload);
        (id, self.default_chunk_size)
    }

    /// `append(upload_id, chunk_index, bytes, checksum) -> Ack | DuplicateChunk | ChecksumMismatch`.
    pub fn append(
        &self,
        upload_id: UploadId,
        chunk_index: u64,
        bytes: Vec<u8>,
        checksum: u64,
    ) -> Result<AppendOutcome, StreamingError> {
        let mut uploads = self.uploads.lock().unwrap();
        let upload = uploads
            .get_mut(&upload_id)
            .ok_or(StreamingError::UnknownUpload(upload_id))?;

        if checksum_of(&bytes) != checksum {
            return Err(StreamingError::ChecksumMismatch { index: chunk_index });
        }

        if let Some(existing) = upload.chunks.get(&chunk_index) {
            return if existing.checksum == checksum {
                Ok(AppendOutcome::DuplicateChunk)
            } else {
                Err(StreamingError::ChecksumMismatch { index: chunk_index })
            };
        }

        upload.chunks.insert(chunk_index, Chunk { bytes, checksum });
        Ok(AppendOutcome::Ack)
    }

    /// `finish(upload_id, total_checksum) -> blob_ref | IncompleteUpload`.
    pub fn finish(
        &self,
        upload_id: UploadId,
        _total_checksum: u64,
    ) -> Result<(BlobRef, Vec<u8>), StreamingError> {
        let mut uploads = self.uploads.lock().unwrap();
        let upload = uploads
            .get(&upload_id)
            .ok_or(StreamingError::UnknownUpload(upload_id))?;

        let highest = upload.highest_contiguous();
        let expected_last = upload
            .size_hint
            .map(|size| size.div_ceil(upload.chunk_size as u64).saturating_sub(1));

        if let Some(expected_last) = expected_last {
            if highest != Some(expected_last) {
                let missing = highest.map(|h| h + 1).unwrap_or(0);
                return Err(StreamingError::IncompleteUpload { missing });
            }
        } else if highest.is_none() {
            return Err(StreamingError::IncompleteUpload { missing: 0 });
        }

        let mut assembled = Vec::new();
        let mut idx = 0u64;
        while let Some(chunk) = upload.chunks.get(&idx) {
            assembled.extend_from_slice(&chunk.bytes);
            idx += 1;
        }

        let blob_ref = BlobRef {
            id: Uuid::new_v4(),
            size: assembled.len() as u64,
            checksum: format!("{:x}", checksum_of(&assembled)),
        };
        uploads.remove(&upload_id);
        Ok((blob_ref, assembled))
    }

    /// `abort(upload_id) -> Ok`; idempotent.
    pub fn abort(&self, upload_id: UploadId) {
        self.uploads.lock().unwrap().remove(&upload_id);
    }

    /// `progress(upload_id)`: the highest contiguous chunk and any
    /// higher indices already received, so the client can resume by
    /// sending only what's missing.
    pub fn progress(&self, upload_id: UploadId) -> Result<UploadProgress, StreamingError> {
        let uploads = self.uploads.lock().unwrap();
        let upload = uploads
            .get(&upload_id)
            .ok_or(StreamingError::UnknownUpload(upload_id))?;
        Ok(UploadProgress {
            highest_contiguous: upload.highest_contiguous(),
            received_above_contiguous: upload.higher_received(),
        })
    }

    /// Garbage-collects uploads past their TTL; returns the ids removed.
    pub fn sweep_expired(&self) -> HashSet<UploadId> {
        let mut uploads = self.uploads.lock().unwrap();
        let now = Utc::now();
        let expired: Vec<UploadId> = uploads
            .iter()
            .filter(|(_, u)| u.is_expired(now))
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            uploads.remove(id);
        }
        expired.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_upload_round_trips_bytes() {
        let engine = StreamingEngine::new(4, Duration::from_secs(60));
        let (id, chunk_size) = engine.begin(Some(8), serde_json::json!({}));
        assert_eq!(chunk_size, 4);

        let chunk0 = vec![1, 2, 3, 4];
        let chunk1 = vec![5, 6, 7, 8];
        engine.append(id, 0, chunk0.clone(), checksum_of(&chunk0)).unwrap();
        engine.append(id, 1, chunk1.clone(), checksum_of(&chunk1)).unwrap();

        let (blob_ref, bytes) = engine.finish(id, 0).unwrap();
        assert_eq!(bytes, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(blob_ref.size, 8);
    }

    #[test]
    fn out_of_order_chunks_are_accepted() {
        let engine = StreamingEngine::new(4, Duration::from_secs(60));
        let (id, _) = engine.begin(Some(8), serde_json::json!({}));
        let chunk1 = vec![5, 6, 7, 8];
        let chunk0 = vec![1, 2, 3, 4];
        engine.append(id, 1, chunk1.clone(), checksum_of(&chunk1)).unwrap();
        engine.append(id, 0, chunk0.clone(), checksum_of(&chunk0)).unwrap();

        let (_, bytes) = engine.finish(id, 0).unwrap();
        assert_eq!(bytes, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn finish_fails_when_a_chunk_is_missing() {
        let engine = StreamingEngine::new(4, Duration::from_secs(60));
        let (id, _) = engine.begin(Some(8), serde_json::json!({}));
        let chunk0 = vec![1, 2, 3, 4];
        engine.append(id, 0, chunk0.clone(), checksum_of(&chunk0)).unwrap();

        let err = engine.finish(id, 0).unwrap_err();
        assert!(matches!(err, StreamingError::IncompleteUpload { missing: 1 }));
    }

    #[test]
    fn redelivering_same_chunk_is_a_noop() {
        let engine = StreamingEngine::new(4, Duration::from_secs(60));
        let (id, _) = engine.begin(Some(4), serde_json::json!({}));
        let chunk0 = vec![1, 2, 3, 4];
        let cs = checksum_of(&chunk0);
        assert_eq!(engine.append(id, 0, chunk0.clone(), cs).unwrap(), AppendOutcome::Ack);
        assert_eq!(
            engine.append(id, 0, chunk0.clone(), cs).unwrap(),
            AppendOutcome::DuplicateChunk
        );
    }

    #[test]
    fn mismatched_checksum_is_rejected() {
        let engine = StreamingEngine::new(4, Duration::from_secs(60));
        let (id, _) = engine.begin(Some(4), serde_json::json!({}));
        let err = engine.append(id, 0, vec![1, 2, 3, 4], 0xDEADBEEF).unwrap_err();
        assert!(matches!(err, StreamingError::ChecksumMismatch { index: 0 }));
    }

    #[test]
    fn progress_reports_highest_contiguous_and_gaps() {
        let engine = StreamingEngine::new(4, Duration::from_secs(60));
        let (id, _) = engine.begin(Some(16), serde_json::json!({}));
        let chunk0 = vec![0u8; 4];
        let chunk2 = vec![2u8; 4];
        engine.append(id, 0, chunk0.clone(), checksum_of(&chunk0)).unwrap();
        engine.append(id, 2, chunk2.clone(), checksum_of(&chunk2)).unwrap();

        let progress = engine.progress(id).unwrap();
        assert_eq!(progress.highest_contiguous, Some(0));
        assert_eq!(progress.received_above_contiguous, vec![2]);
    }

    #[test]
    fn abort_removes_partial_upload() {
        let engine = StreamingEngine::new(4, Duration::from_secs(60));
        let (id, _) = engine.begin(Some(4), serde_json::json!({}));
        engine.abort(id);
        assert!(matches!(
            engine.progress(id),
            Err(StreamingError::UnknownUpload(_))
        ));
    }

    #[test]
    fn sweep_expired_removes_past_ttl_uploads() {
        let engine = StreamingEngine::new(4, Duration::from_millis(0));
        let (id, _) = engine.begin(Some(4), serde_json::json!({}));
        std::thread::sleep(Duration::from_millis(5));
        let removed = engine.sweep_expired();
        assert!(removed.contains(&id));
    }
}
