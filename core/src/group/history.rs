//! Bounded in-memory clipboard history

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::SystemTime;

use sha2::{Digest, Sha256};

use crate::device::Device;

/// SHA256 of a clipboard payload and its MIME type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn of(mime_type: &str, data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update((mime_type.len() as u32).to_be_bytes());
        hasher.update(mime_type.as_bytes());
        hasher.update(data);
        ContentHash(hasher.finalize().into())
    }
}

/// Where a clipboard update entered the group
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOrigin {
    Local,
    Remote(Device),
}

#[derive(Debug, Clone)]
pub struct ClipboardSnapshot {
    /// Coordinator-assigned, strictly increasing
    pub seq: u64,
    pub mime_type: String,
    pub data: Arc<[u8]>,
    pub hash: ContentHash,
    pub origin: UpdateOrigin,
    pub received_at: SystemTime,
}

#[derive(Debug)]
pub struct ClipboardHistory {
    limit: usize,
    next_seq: u64,
    entries: VecDeque<ClipboardSnapshot>,
}

impl ClipboardHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            next_seq: 1,
            entries: VecDeque::new(),
        }
    }

    /// The current clipboard (last write wins)
    pub fn current(&self) -> Option<&ClipboardSnapshot> {
        self.entries.back()
    }

    pub fn is_current(&self, hash: &ContentHash) -> bool {
        self.current().map(|s| &s.hash == hash).unwrap_or(false)
    }

    /// Record a new current value and return it
    pub fn record(&mut self, mime_type: String, data: Vec<u8>, origin: UpdateOrigin) -> ClipboardSnapshot {
        let snapshot = ClipboardSnapshot {
            seq: self.next_seq,
            hash: ContentHash::of(&mime_type, &data),
            mime_type,
            data: data.into(),
            origin,
            received_at: SystemTime::now(),
        };
        self.next_seq += 1;

        self.entries.push_back(snapshot.clone());
        while self.entries.len() > self.limit {
            self.entries.pop_front();
        }
        snapshot
    }

    /// Oldest first
    pub fn entries(&self) -> Vec<ClipboardSnapshot> {
        self.entries.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_is_monotonic() {
        let mut history = ClipboardHistory::new(10);
        let a = history.record("text/plain".into(), b"a".to_vec(), UpdateOrigin::Local);
        let b = history.record("text/plain".into(), b"b".to_vec(), UpdateOrigin::Local);
        assert!(b.seq > a.seq);
        assert_eq!(history.current().unwrap().seq, b.seq);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut history = ClipboardHistory::new(3);
        for i in 0..5u8 {
            history.record("text/plain".into(), vec![i], UpdateOrigin::Local);
        }
        let entries = history.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(&*entries[0].data, &[2u8][..]);
        assert_eq!(entries[2].seq, 5);
    }

    #[test]
    fn test_is_current() {
        let mut history = ClipboardHistory::new(3);
        assert!(!history.is_current(&ContentHash::of("text/plain", b"x")));
        history.record("text/plain".into(), b"x".to_vec(), UpdateOrigin::Local);
        assert!(history.is_current(&ContentHash::of("text/plain", b"x")));
        assert!(!history.is_current(&ContentHash::of("text/html", b"x")));
    }

    #[test]
    fn test_hash_separates_mime_and_data() {
        assert_ne!(ContentHash::of("text/plain", b"ab"), ContentHash::of("text/plaina", b"b"));
    }
}
