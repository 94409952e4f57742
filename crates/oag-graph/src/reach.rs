//! Reachability over any [`GraphView`]: pruned ancestors, descendants and
//! backward path enumeration.
//!
//! Paths are written farthest node first, so a path to the sink always ends
//! with the sink.

use std::collections::{BTreeMap, VecDeque};

use rustc_hash::FxHashSet;
use tracing::trace_span;

use crate::{GraphError, GraphView, NodeId, Result};

/// Filter decision for a path grown by [`filter_paths_bfs`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathVerdict {
    /// Record the path as forbidden, stop extending it.
    Accept,
    /// Stop extending it.
    Reject,
    /// Extend it by one more predecessor.
    Continue,
}

/// Set of exact paths, partitioned by length.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ForbiddenPaths {
    /// Length -> paths, each stored sink-end first.
    by_len: BTreeMap<usize, FxHashSet<Vec<NodeId>>>,
}

impl ForbiddenPaths {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from raw paths, each filed under its own length.
    pub fn from_paths<I>(paths: I) -> Self
    where
        I: IntoIterator<Item = Vec<NodeId>>,
    {
        let mut set = Self::new();
        for mut path in paths {
            path.reverse();
            set.by_len.entry(path.len()).or_default().insert(path);
        }
        set
    }

    /// Insert `path` under the declared length `len`.
    ///
    /// Returns whether the path was new.
    pub fn insert(&mut self, len: usize, path: &[NodeId]) -> Result<bool> {
        if path.len() != len {
            return Err(GraphError::ForbiddenPathLength {
                declared: len,
                actual: path.len(),
            });
        }
        let stored: Vec<NodeId> = path.iter().rev().copied().collect();
        Ok(self.by_len.entry(len).or_default().insert(stored))
    }

    pub fn contains(&self, path: &[NodeId]) -> bool {
        let reversed: Vec<NodeId> = path.iter().rev().copied().collect();
        self.contains_reversed(&reversed)
    }

    fn contains_reversed(&self, reversed: &[NodeId]) -> bool {
        self.by_len
            .get(&reversed.len())
            .is_some_and(|paths| paths.contains(reversed))
    }

    /// Length of the longest path, 0 when empty.
    pub fn max_len(&self) -> usize {
        self.by_len.keys().next_back().copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.by_len.values().map(FxHashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Paths of exactly `len` nodes.
    pub fn with_len(&self, len: usize) -> impl Iterator<Item = Vec<NodeId>> + '_ {
        self.by_len
            .get(&len)
            .into_iter()
            .flatten()
            .map(|path| path.iter().rev().copied().collect())
    }

    /// All paths, shortest lengths first.
    pub fn iter(&self) -> impl Iterator<Item = Vec<NodeId>> + '_ {
        self.by_len
            .keys()
            .flat_map(move |&len| self.with_len(len))
    }
}

/// Grow paths backward from `sink` breadth-first and collect the accepted ones.
///
/// Every simple path is offered to `filter` exactly once unless one of its
/// suffixes was accepted or rejected. `depth_limit` bounds the number of
/// extensions and defaults to the node count.
pub fn filter_paths_bfs<G, F>(
    view: &G,
    sink: NodeId,
    mut filter: F,
    depth_limit: Option<usize>,
) -> ForbiddenPaths
where
    G: GraphView,
    F: FnMut(&[NodeId]) -> PathVerdict,
{
    let _span = trace_span!("filter_paths_bfs").entered();
    let mut accepted = ForbiddenPaths::new();
    let depth_limit = depth_limit.unwrap_or_else(|| view.node_count());

    let mut queue: VecDeque<(Vec<NodeId>, usize)> = VecDeque::new();
    queue.push_back((vec![sink], depth_limit));

    while let Some((path, depth)) = queue.pop_front() {
        for child in view.predecessors(path[0]) {
            if path.contains(&child) {
                continue;
            }
            let mut grown = Vec::with_capacity(path.len() + 1);
            grown.push(child);
            grown.extend_from_slice(&path);

            match filter(&grown) {
                PathVerdict::Accept => {
                    grown.reverse();
                    accepted
                        .by_len
                        .entry(grown.len())
                        .or_default()
                        .insert(grown);
                }
                PathVerdict::Reject => {}
                PathVerdict::Continue if depth > 1 => queue.push_back((grown, depth - 1)),
                PathVerdict::Continue => {}
            }
        }
    }
    accepted
}

/// Ancestors of `sink`, skipping every route that ends in a forbidden path.
///
/// Exact paths are tracked only while they are no longer than the longest
/// forbidden path; past that the walk degrades to a plain visited-set DFS. A
/// node reached once is never expanded again.
pub fn ancestors_excluding<G: GraphView>(
    view: &G,
    sink: NodeId,
    forbidden: &ForbiddenPaths,
) -> FxHashSet<NodeId> {
    let _span = trace_span!("ancestors_excluding").entered();
    let max_len = forbidden.max_len();

    let mut visited = FxHashSet::default();
    visited.insert(sink);

    // Current path, sink first. A frame with `Some(len)` owns `trail[..len]`;
    // `None` marks the fast-track mode.
    let mut trail = vec![sink];
    let mut stack = vec![(Some(1), view.predecessors(sink))];

    while let Some((tracked, children)) = stack.last_mut() {
        let tracked = *tracked;
        let Some(child) = children.next() else {
            stack.pop();
            continue;
        };
        if visited.contains(&child) {
            continue;
        }

        let next = match tracked {
            Some(len) => {
                trail.truncate(len);
                trail.push(child);
                if trail.len() > max_len {
                    None
                } else if forbidden.contains_reversed(&trail) {
                    continue;
                } else {
                    Some(trail.len())
                }
            }
            None => None,
        };

        visited.insert(child);
        stack.push((next, view.predecessors(child)));
    }
    visited
}

/// Plain ancestor closure of `sink`.
pub fn ancestors<G: GraphView>(view: &G, sink: NodeId) -> FxHashSet<NodeId> {
    ancestors_excluding(view, sink, &ForbiddenPaths::new())
}

/// Nodes reachable from `node`, itself included.
///
/// With `cap` set, the walk stops once that many nodes were collected.
pub fn descendants<G: GraphView>(view: &G, node: NodeId, cap: Option<usize>) -> FxHashSet<NodeId> {
    descendants_filtered(view, node, cap, |_| true)
}

/// Like [`descendants`], but only enters nodes for which `keep` holds.
pub fn descendants_filtered<G, F>(
    view: &G,
    node: NodeId,
    cap: Option<usize>,
    keep: F,
) -> FxHashSet<NodeId>
where
    G: GraphView,
    F: Fn(NodeId) -> bool,
{
    let cap = cap.unwrap_or(usize::MAX);
    let mut visited = FxHashSet::default();
    visited.insert(node);

    let mut stack = vec![view.successors(node)];
    while visited.len() < cap {
        let Some(children) = stack.last_mut() else {
            break;
        };
        let Some(child) = children.next() else {
            stack.pop();
            continue;
        };
        if visited.contains(&child) || !keep(child) {
            continue;
        }
        visited.insert(child);
        stack.push(view.successors(child));
    }
    visited
}
