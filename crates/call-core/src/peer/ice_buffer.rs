//! Ordered holding queue for remote ICE candidates
//!
//! Candidates can arrive before the remote description they belong to. They
//! wait here in arrival order and are drained, oldest first, once the
//! description is applied. Nothing is ever discarded.

use std::collections::VecDeque;

use crate::types::IceCandidate;

/// FIFO of candidates waiting for a remote description
#[derive(Debug, Default, Clone)]
pub struct IceCandidateBuffer {
    pending: VecDeque<IceCandidate>,
}

impl IceCandidateBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a candidate
    pub fn push(&mut self, candidate: IceCandidate) {
        self.pending.push_back(candidate);
    }

    /// Take every held candidate in arrival order
    pub fn drain(&mut self) -> Vec<IceCandidate> {
        self.pending.drain(..).collect()
    }

    /// Number of held candidates
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is held
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_preserves_arrival_order() {
        let mut buffer = IceCandidateBuffer::new();
        for i in 0..5 {
            buffer.push(IceCandidate::new(format!("candidate:{}", i)));
        }
        assert_eq!(buffer.len(), 5);

        let drained: Vec<String> = buffer.drain().into_iter().map(|c| c.candidate).collect();
        assert_eq!(
            drained,
            vec!["candidate:0", "candidate:1", "candidate:2", "candidate:3", "candidate:4"]
        );
        assert!(buffer.is_empty());
    }
}
