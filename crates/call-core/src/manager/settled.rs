//! Call ids the actor has already finished with
//!
//! The invite and the offer for one call travel as separate messages, so a
//! call can be declined, timed out or busy-rejected between the two. Late
//! messages for such a call must not start a new session.

use std::collections::VecDeque;

use rtcall_signaling_core::CallId;

/// How many finished call ids are remembered
pub(crate) const SETTLED_CAPACITY: usize = 64;

/// Bounded record of recently settled calls, oldest evicted first
#[derive(Debug)]
pub(crate) struct SettledCalls {
    ids: VecDeque<CallId>,
    capacity: usize,
}

impl SettledCalls {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            ids: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn insert(&mut self, call_id: CallId) {
        if self.contains(&call_id) {
            return;
        }
        if self.ids.len() == self.capacity {
            self.ids.pop_front();
        }
        self.ids.push_back(call_id);
    }

    pub(crate) fn contains(&self, call_id: &CallId) -> bool {
        self.ids.iter().any(|id| id == call_id)
    }
}

impl Default for SettledCalls {
    fn default() -> Self {
        Self::new(SETTLED_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oldest_id_is_evicted() {
        let mut settled = SettledCalls::new(2);
        settled.insert(CallId::from("a"));
        settled.insert(CallId::from("b"));
        settled.insert(CallId::from("a"));
        assert!(settled.contains(&CallId::from("a")));

        settled.insert(CallId::from("c"));
        assert!(!settled.contains(&CallId::from("a")));
        assert!(settled.contains(&CallId::from("b")));
        assert!(settled.contains(&CallId::from("c")));
    }
}
