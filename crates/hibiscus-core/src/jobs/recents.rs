//! Fixed-capacity ring of recent results, newest first, kept per job kind.

use crate::jobs::JobId;
use crate::request::Params;
use std::collections::VecDeque;

/// One completed generation held for quick re-use.
#[derive(Debug, Clone)]
pub struct RecentItem {
    pub job_id: JobId,
    pub prompt: String,
    pub params: Params,
    pub bytes: Vec<u8>,
    /// Gallery id, when the save succeeded.
    pub stored_id: Option<String>,
    /// Unix seconds.
    pub created_at: u64,
}

#[derive(Debug)]
pub struct RecentRing {
    items: VecDeque<RecentItem>,
    capacity: usize,
}

impl RecentRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Insert at the front, evicting the oldest entry when full.
    pub fn push(&mut self, item: RecentItem) {
        if self.capacity == 0 {
            return;
        }
        while self.items.len() >= self.capacity {
            self.items.pop_back();
        }
        self.items.push_front(item);
    }

    /// Newest first.
    pub fn items(&self) -> impl Iterator<Item = &RecentItem> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
