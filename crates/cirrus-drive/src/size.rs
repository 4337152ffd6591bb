//! Folder size propagation.
//!
//! A folder's size is the sum of its non-trashed children, recursively.
//! Mutations keep that true by pushing a signed delta up the parent chain.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::store::{CacheAction, NodeCache};

#[derive(Debug, Clone)]
pub struct SizeAggregator {
    cache: Arc<NodeCache>,
}

impl SizeAggregator {
    pub fn new(cache: Arc<NodeCache>) -> Self {
        Self { cache }
    }

    /// Apply `delta` to `start_id` and every ancestor. Returns the number of
    /// nodes updated. Sizes saturate at 0 and `u64::MAX`.
    ///
    /// A trashed folder takes the delta but does not pass it on: its size
    /// already stopped counting toward its parent when it was trashed.
    pub fn propagate(&self, start_id: &str, delta: i64) -> usize {
        if delta == 0 {
            return 0;
        }
        let mut visited = HashSet::new();
        let mut current = Some(start_id.to_string());
        let mut updated = 0;

        while let Some(id) = current {
            if !visited.insert(id.clone()) {
                warn!(node_id = %id, "cycle in parent chain, stopping size propagation");
                break;
            }
            let Some(node) = self.cache.get(&id) else {
                break;
            };
            let size = apply_delta(node.size, delta);
            self.cache.dispatch(CacheAction::UpdateSize {
                id: id.clone(),
                size,
            });
            updated += 1;
            if node.trashed {
                break;
            }
            current = node.parent_id.clone();
        }
        debug!(start = start_id, delta, updated, "size propagated");
        updated
    }

    /// Size of `id` recomputed from the cached leaves.
    pub fn recursive_size(&self, id: &str) -> u64 {
        let mut visited = HashSet::new();
        self.sum(id, &mut visited)
    }

    fn sum(&self, id: &str, visited: &mut HashSet<String>) -> u64 {
        if !visited.insert(id.to_string()) {
            return 0;
        }
        let Some(node) = self.cache.get(id) else {
            return 0;
        };
        if node.file().is_some() {
            return node.size;
        }
        self.cache
            .live_children_of(id)
            .iter()
            .fold(0u64, |acc, child| acc.saturating_add(self.sum(&child.id, visited)))
    }
}

fn apply_delta(size: u64, delta: i64) -> u64 {
    if delta >= 0 {
        size.saturating_add(delta.unsigned_abs())
    } else {
        size.saturating_sub(delta.unsigned_abs())
    }
}
