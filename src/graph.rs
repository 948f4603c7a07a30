//! Dependency graph algorithms over blocker/blocked edges.
//!
//! Pure functions: callers load the edge set, ask a question, and act on the
//! answer. Cycle checks guard live edge insertion; topological ordering drives
//! import insertion order.

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;

/// Breadth-first searches stop after this many levels. A path longer than
/// this is treated as absent.
pub const MAX_TRAVERSAL_DEPTH: usize = 10_000;

/// `blocker` must complete before `blocked` can start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyEdge<N> {
    pub blocker: N,
    pub blocked: N,
}

impl<N> DependencyEdge<N> {
    pub fn new(blocker: N, blocked: N) -> Self {
        Self { blocker, blocked }
    }
}

/// Nodes that could not be ordered because they sit on or behind a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleError<N> {
    pub nodes: Vec<N>,
}

impl<N: fmt::Display> fmt::Display for CycleError<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nodes: Vec<String> = self.nodes.iter().map(|n| n.to_string()).collect();
        write!(f, "cycle among nodes [{}]", nodes.join(", "))
    }
}

impl<N: fmt::Debug + fmt::Display> std::error::Error for CycleError<N> {}

impl<N: fmt::Display> From<CycleError<N>> for StoreError {
    fn from(err: CycleError<N>) -> Self {
        StoreError::CycleDetected(err.to_string())
    }
}

fn adjacency<N: Copy + Eq + Hash>(edges: &[DependencyEdge<N>]) -> HashMap<N, Vec<N>> {
    let mut adj: HashMap<N, Vec<N>> = HashMap::new();
    for edge in edges {
        adj.entry(edge.blocker).or_default().push(edge.blocked);
    }
    adj
}

/// Whether `to` can be reached from `from` following edge direction.
fn is_reachable<N: Copy + Eq + Hash>(adj: &HashMap<N, Vec<N>>, from: N, to: N) -> bool {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back((from, 0usize));

    while let Some((node, depth)) = queue.pop_front() {
        if node == to {
            return true;
        }
        if depth >= MAX_TRAVERSAL_DEPTH || !visited.insert(node) {
            continue;
        }
        if let Some(next) = adj.get(&node) {
            for &n in next {
                if !visited.contains(&n) {
                    queue.push_back((n, depth + 1));
                }
            }
        }
    }

    false
}

/// Check whether adding `candidate` to `edges` would close a cycle.
///
/// A self-edge is always a cycle.
pub fn would_create_cycle<N: Copy + Eq + Hash>(
    edges: &[DependencyEdge<N>],
    candidate: &DependencyEdge<N>,
) -> bool {
    if candidate.blocker == candidate.blocked {
        return true;
    }
    // blocker -> blocked closes a cycle iff blocker is already reachable from blocked.
    is_reachable(&adjacency(edges), candidate.blocked, candidate.blocker)
}

pub fn has_cycle<N: Copy + Eq + Hash + Ord>(edges: &[DependencyEdge<N>]) -> bool {
    let nodes: BTreeSet<N> = edges
        .iter()
        .flat_map(|e| [e.blocker, e.blocked])
        .collect();
    let nodes: Vec<N> = nodes.into_iter().collect();
    let (_, remaining) = partial_order(&nodes, edges);
    !remaining.is_empty()
}

/// Order `nodes` so that every blocker precedes what it blocks.
///
/// Ties resolve by position in `nodes`. Edges touching a node outside `nodes`
/// are ignored.
pub fn topological_order<N: Copy + Eq + Hash>(
    nodes: &[N],
    edges: &[DependencyEdge<N>],
) -> Result<Vec<N>, CycleError<N>> {
    let (ordered, remaining) = partial_order(nodes, edges);
    if remaining.is_empty() {
        Ok(ordered)
    } else {
        Err(CycleError { nodes: remaining })
    }
}

/// Kahn's algorithm returning the orderable prefix and the nodes left over.
///
/// Left-over nodes keep their relative order from `nodes`.
pub fn partial_order<N: Copy + Eq + Hash>(
    nodes: &[N],
    edges: &[DependencyEdge<N>],
) -> (Vec<N>, Vec<N>) {
    let mut rank: HashMap<N, usize> = HashMap::with_capacity(nodes.len());
    let mut unique: Vec<N> = Vec::with_capacity(nodes.len());
    for &node in nodes {
        if !rank.contains_key(&node) {
            rank.insert(node, unique.len());
            unique.push(node);
        }
    }

    let mut in_degree = vec![0usize; unique.len()];
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); unique.len()];
    for edge in edges {
        let (Some(&from), Some(&to)) = (rank.get(&edge.blocker), rank.get(&edge.blocked)) else {
            continue;
        };
        successors[from].push(to);
        in_degree[to] += 1;
    }

    let mut ready: BTreeSet<usize> = (0..unique.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut ordered = Vec::with_capacity(unique.len());
    let mut placed = vec![false; unique.len()];

    while let Some(i) = ready.pop_first() {
        placed[i] = true;
        ordered.push(unique[i]);
        for &succ in &successors[i] {
            in_degree[succ] -= 1;
            if in_degree[succ] == 0 {
                ready.insert(succ);
            }
        }
    }

    let remaining = (0..unique.len())
        .filter(|&i| !placed[i])
        .map(|i| unique[i])
        .collect();
    (ordered, remaining)
}
