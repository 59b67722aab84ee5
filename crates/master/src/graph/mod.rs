//! # Execution graph
//!
//! The task DAG of one workflow instance plus the run status of each node.
//! Built from a [`WorkflowDefinition`] with petgraph; the workflow runnable
//! asks it which nodes may start next.

mod error;

use std::collections::HashMap;

use drover_core::TaskCode;
use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

pub use error::{GraphError, GraphResult};

use crate::model::{TaskState, WorkflowDefinition};

/// Run status of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeStatus {
    /// Not triggered yet.
    Pending,
    /// A task runnable exists and has not finished (including waiting for a
    /// retry).
    Active,
    Succeeded,
    Failed,
    Killed,
    Paused,
}

impl NodeStatus {
    #[must_use]
    pub const fn from_task_state(state: TaskState) -> Self {
        match state {
            TaskState::Success => Self::Succeeded,
            TaskState::Failure => Self::Failed,
            TaskState::Killed => Self::Killed,
            TaskState::Paused => Self::Paused,
            TaskState::Submitted | TaskState::Dispatched | TaskState::Running => Self::Active,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionGraph {
    graph: DiGraph<TaskCode, ()>,
    node_map: HashMap<TaskCode, NodeIndex>,
    status: HashMap<TaskCode, NodeStatus>,
}

impl ExecutionGraph {
    /// Build the graph for `definition`, every node pending.
    ///
    /// # Errors
    ///
    /// Fails on duplicate task codes, relations naming unknown tasks,
    /// self-loops, and cycles.
    pub fn build(definition: &WorkflowDefinition) -> GraphResult<Self> {
        let mut graph = DiGraph::new();
        let mut node_map = HashMap::with_capacity(definition.tasks.len());

        for task in &definition.tasks {
            if node_map.contains_key(&task.code) {
                return Err(GraphError::DuplicateNode(task.code));
            }
            let index = graph.add_node(task.code);
            node_map.insert(task.code, index);
        }

        for relation in &definition.relations {
            if relation.pre == relation.post {
                return Err(GraphError::SelfLoopDetected(relation.pre));
            }
            let from = node_map
                .get(&relation.pre)
                .copied()
                .ok_or(GraphError::NodeNotFound(relation.pre))?;
            let to = node_map
                .get(&relation.post)
                .copied()
                .ok_or(GraphError::NodeNotFound(relation.post))?;
            graph.update_edge(from, to, ());
        }

        if let Err(cycle) = toposort(&graph, None) {
            let code = graph.node_weight(cycle.node_id()).copied().unwrap_or(TaskCode::new(0));
            return Err(GraphError::CycleDetected(code));
        }

        let status = node_map.keys().map(|code| (*code, NodeStatus::Pending)).collect();
        Ok(Self {
            graph,
            node_map,
            status,
        })
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    #[must_use]
    pub fn contains(&self, code: TaskCode) -> bool {
        self.node_map.contains_key(&code)
    }

    #[must_use]
    pub fn status(&self, code: TaskCode) -> Option<NodeStatus> {
        self.status.get(&code).copied()
    }

    /// # Errors
    ///
    /// Returns [`GraphError::NodeNotFound`] for unknown codes.
    pub fn mark(&mut self, code: TaskCode, status: NodeStatus) -> GraphResult<()> {
        match self.status.get_mut(&code) {
            Some(slot) => {
                *slot = status;
                Ok(())
            }
            None => Err(GraphError::node_not_found(code)),
        }
    }

    #[must_use]
    pub fn predecessors(&self, code: TaskCode) -> Vec<TaskCode> {
        self.neighbors(code, Direction::Incoming)
    }

    #[must_use]
    pub fn successors(&self, code: TaskCode) -> Vec<TaskCode> {
        self.neighbors(code, Direction::Outgoing)
    }

    fn neighbors(&self, code: TaskCode, direction: Direction) -> Vec<TaskCode> {
        let Some(index) = self.node_map.get(&code) else {
            return Vec::new();
        };
        let mut codes: Vec<TaskCode> = self
            .graph
            .neighbors_directed(*index, direction)
            .filter_map(|n| self.graph.node_weight(n).copied())
            .collect();
        codes.sort_unstable();
        codes
    }

    fn is_ready(&self, code: TaskCode) -> bool {
        self.status(code) == Some(NodeStatus::Pending)
            && self
                .predecessors(code)
                .iter()
                .all(|pre| self.status(*pre) == Some(NodeStatus::Succeeded))
    }

    /// Pending nodes whose predecessors all succeeded, in definition order.
    /// For a fresh graph these are the start nodes.
    #[must_use]
    pub fn triggerable(&self) -> Vec<TaskCode> {
        self.graph
            .node_indices()
            .filter_map(|i| self.graph.node_weight(i).copied())
            .filter(|code| self.is_ready(*code))
            .collect()
    }

    /// Successors of `code` that became ready.
    #[must_use]
    pub fn ready_successors(&self, code: TaskCode) -> Vec<TaskCode> {
        self.successors(code)
            .into_iter()
            .filter(|succ| self.is_ready(*succ))
            .collect()
    }

    #[must_use]
    pub fn count(&self, status: NodeStatus) -> usize {
        self.status.values().filter(|s| **s == status).count()
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.count(NodeStatus::Active)
    }

    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.status.values().all(|s| *s == NodeStatus::Succeeded)
    }
}
