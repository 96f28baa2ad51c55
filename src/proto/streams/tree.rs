use std::collections::{HashMap, HashSet};

use crate::frame::StreamId;

/// Default dependency weight assigned to new streams.
pub const DEFAULT_WEIGHT: u16 = 16;

/// The stream dependency tree, rooted at the sentinel stream zero.
///
/// Nodes are stream ids, not stream records: a pair of id-keyed maps holds
/// the parent pointer and the child set, so cyclic stream references never
/// exist and closed streams are detached explicitly. Nodes may outlive (or
/// predate) their stream record; a PRIORITY frame naming an unknown
/// dependency simply materializes an idle node.
#[derive(Debug, Default)]
pub(crate) struct PriorityTree {
    parent: HashMap<StreamId, StreamId>,
    children: HashMap<StreamId, HashSet<StreamId>>,
    weight: HashMap<StreamId, u16>,
}

impl PriorityTree {
    pub fn new() -> PriorityTree {
        PriorityTree::default()
    }

    /// Ensures `id` is in the tree, defaulting it under the sentinel.
    pub fn insert(&mut self, id: StreamId) {
        if id.is_zero() || self.parent.contains_key(&id) {
            return;
        }

        self.parent.insert(id, StreamId::ZERO);
        self.children.entry(StreamId::ZERO).or_default().insert(id);
        self.weight.insert(id, DEFAULT_WEIGHT);
    }

    pub fn contains(&self, id: StreamId) -> bool {
        self.parent.contains_key(&id)
    }

    pub fn parent(&self, id: StreamId) -> Option<StreamId> {
        self.parent.get(&id).copied()
    }

    pub fn weight(&self, id: StreamId) -> u16 {
        self.weight.get(&id).copied().unwrap_or(DEFAULT_WEIGHT)
    }

    /// Whether `a` is an ancestor of `b`.
    fn is_ancestor(&self, a: StreamId, b: StreamId) -> bool {
        let mut cur = b;
        while let Some(&p) = self.parent.get(&cur) {
            if p == a {
                return true;
            }
            cur = p;
        }
        false
    }

    fn detach(&mut self, id: StreamId) {
        if let Some(old) = self.parent.get(&id).copied() {
            if let Some(set) = self.children.get_mut(&old) {
                set.remove(&id);
            }
        }
    }

    fn attach(&mut self, child: StreamId, parent: StreamId) {
        self.parent.insert(child, parent);
        self.children.entry(parent).or_default().insert(child);
    }

    /// Makes `child` depend on `new_parent`, per section 5.3.3 of
    /// RFC 7540.
    ///
    /// When `child` is an ancestor of `new_parent`, `new_parent` is first
    /// hoisted (non-exclusively) to `child`'s current position to keep the
    /// tree acyclic. When `exclusive`, every existing dependent of
    /// `new_parent` is relocated under `child` before `child` is inserted.
    pub fn reprioritize(
        &mut self,
        child: StreamId,
        new_parent: StreamId,
        exclusive: bool,
        weight: u16,
    ) {
        debug_assert!(!child.is_zero());
        debug_assert!(child != new_parent);
        debug_assert!((1..=256).contains(&weight));

        self.insert(child);
        self.insert(new_parent);

        if self.is_ancestor(child, new_parent) {
            let hoist_to = self.parent(child).unwrap_or(StreamId::ZERO);
            tracing::trace!(
                "reprioritize; hoisting {:?} under {:?} to break cycle",
                new_parent,
                hoist_to,
            );
            self.detach(new_parent);
            self.attach(new_parent, hoist_to);
        }

        self.detach(child);

        if exclusive {
            let moved: Vec<StreamId> = self
                .children
                .entry(new_parent)
                .or_default()
                .drain()
                .collect();
            for dep in moved {
                self.attach(dep, child);
            }
        }

        self.attach(child, new_parent);
        self.weight.insert(child, weight);
    }

    /// Drops a closed stream, splicing its dependents to its parent. The
    /// removal never cascades.
    pub fn remove(&mut self, id: StreamId) {
        let parent = match self.parent.remove(&id) {
            Some(parent) => parent,
            None => return,
        };

        if let Some(set) = self.children.get_mut(&parent) {
            set.remove(&id);
        }

        if let Some(orphans) = self.children.remove(&id) {
            for dep in orphans {
                self.attach(dep, parent);
            }
        }

        self.weight.remove(&id);
    }

    #[cfg(test)]
    fn children_of(&self, id: StreamId) -> HashSet<StreamId> {
        self.children.get(&id).cloned().unwrap_or_default()
    }
}
