// src/dag/graph.rs

use std::collections::{BTreeSet, VecDeque};

use petgraph::algo::{has_path_connecting, is_cyclic_directed};
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;

use crate::dag::edge::Producer;
use crate::types::{TaskId, WorkId};

/// Node of the global dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeId {
    Task(TaskId),
    Work(WorkId),
}

impl NodeId {
    /// Graph node for a resolved producer. Siblings must be resolved first.
    pub fn from_producer(p: Producer) -> Option<NodeId> {
        match p {
            Producer::Task(t) => Some(NodeId::Task(t)),
            Producer::Work(w) => Some(NodeId::Work(w)),
            Producer::Sibling(_) => None,
        }
    }
}

/// Global dependency graph of a flow.
///
/// Edge direction is producer -> consumer. Every task also has an edge to its
/// own work node, because a work's consolidated artifacts exist only after
/// all its members finished. Several artifact edges between the same pair of
/// nodes collapse into one graph edge; the artifact names live on the tasks.
#[derive(Debug, Clone, Default)]
pub struct DepGraph {
    graph: DiGraphMap<NodeId, ()>,
}

impl DepGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_work(&mut self, work: WorkId) {
        self.graph.add_node(NodeId::Work(work));
    }

    /// Add a task node and its membership edge to `work`.
    pub fn add_task(&mut self, task: TaskId, work: WorkId) {
        self.graph
            .add_edge(NodeId::Task(task), NodeId::Work(work), ());
    }

    pub fn add_dependency(&mut self, producer: NodeId, consumer: TaskId) {
        self.graph.add_edge(producer, NodeId::Task(consumer), ());
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.graph.contains_node(node)
    }

    /// Whether `to` is reachable from `from` (a node reaches itself).
    pub fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        if from == to {
            return true;
        }
        if !self.contains(from) || !self.contains(to) {
            return false;
        }
        has_path_connecting(&self.graph, from, to, None)
    }

    /// Whether adding `producer -> consumer` would close a cycle.
    ///
    /// `consumer_work` is the consumer's work; for a task that is not in the
    /// graph yet, its only successor will be that work node.
    pub fn would_cycle(&self, producer: NodeId, consumer: TaskId, consumer_work: WorkId) -> bool {
        let consumer_node = NodeId::Task(consumer);
        if self.contains(consumer_node) {
            self.reaches(consumer_node, producer)
        } else {
            self.reaches(NodeId::Work(consumer_work), producer)
        }
    }

    /// Immediate successors of a node.
    pub fn dependents_of(&self, node: NodeId) -> Vec<NodeId> {
        if !self.contains(node) {
            return Vec::new();
        }
        let mut out: Vec<NodeId> = self
            .graph
            .neighbors_directed(node, Direction::Outgoing)
            .collect();
        out.sort();
        out
    }

    /// Immediate predecessors of a node.
    pub fn dependencies_of(&self, node: NodeId) -> Vec<NodeId> {
        if !self.contains(node) {
            return Vec::new();
        }
        let mut out: Vec<NodeId> = self
            .graph
            .neighbors_directed(node, Direction::Incoming)
            .collect();
        out.sort();
        out
    }

    /// Every node reachable from `root`, excluding `root`, sorted.
    pub fn transitive_dependents(&self, root: NodeId) -> Vec<NodeId> {
        let mut seen: BTreeSet<NodeId> = BTreeSet::new();
        let mut queue: VecDeque<NodeId> = self.dependents_of(root).into();

        while let Some(node) = queue.pop_front() {
            if node == root || !seen.insert(node) {
                continue;
            }
            queue.extend(self.dependents_of(node));
        }

        seen.into_iter().collect()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Only used when rebuilding a graph from untrusted data; registration
    /// never lets a cycle in.
    pub fn is_cyclic(&self) -> bool {
        is_cyclic_directed(&self.graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// t0 (w0) -> t1 (w1) -> t2 (w1), and w0 -> t2.
    fn sample() -> DepGraph {
        let mut g = DepGraph::new();
        g.add_work(WorkId(0));
        g.add_work(WorkId(1));
        g.add_task(TaskId(0), WorkId(0));
        g.add_task(TaskId(1), WorkId(1));
        g.add_task(TaskId(2), WorkId(1));
        g.add_dependency(NodeId::Task(TaskId(0)), TaskId(1));
        g.add_dependency(NodeId::Task(TaskId(1)), TaskId(2));
        g.add_dependency(NodeId::Work(WorkId(0)), TaskId(2));
        g
    }

    #[test]
    fn transitive_dependents_cross_work_nodes() {
        let g = sample();
        let deps = g.transitive_dependents(NodeId::Task(TaskId(0)));
        assert_eq!(
            deps,
            vec![
                NodeId::Task(TaskId(1)),
                NodeId::Task(TaskId(2)),
                NodeId::Work(WorkId(0)),
                NodeId::Work(WorkId(1)),
            ]
        );
    }

    #[test]
    fn detects_cycles_through_work_membership() {
        let g = sample();
        // t0 depending on w1's artifact: w1 needs t1, which needs t0.
        assert!(g.would_cycle(NodeId::Work(WorkId(1)), TaskId(0), WorkId(0)));
        // A new task in w1 depending on its own work.
        assert!(g.would_cycle(NodeId::Work(WorkId(1)), TaskId(9), WorkId(1)));
        // A new task in w1 depending on t0 is fine.
        assert!(!g.would_cycle(NodeId::Task(TaskId(0)), TaskId(9), WorkId(1)));
        // Self dependency.
        assert!(g.would_cycle(NodeId::Task(TaskId(2)), TaskId(2), WorkId(1)));
    }

    #[test]
    fn dependencies_are_sorted() {
        let g = sample();
        assert_eq!(
            g.dependencies_of(NodeId::Task(TaskId(2))),
            vec![NodeId::Task(TaskId(1)), NodeId::Work(WorkId(0))]
        );
        assert_eq!(g.edge_count(), 6);
    }
}
