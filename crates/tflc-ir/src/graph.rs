//! Graph container for a model being lowered.
//!
//! The graph owns every tensor and node under stable ids. Nodes are
//! operators plus boundary nodes (model inputs, constants, model outputs);
//! an edge links the producer of a tensor to one of its consumers.
//! Tensor names are only an index for lookups.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use crate::error::GraphError;
use crate::op::Operator;
use crate::tensor::Tensor;
use crate::transformable::TransformableOp;

/// A unique identifier for a node in the graph.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct NodeId(pub u32);

/// A unique identifier for a tensor in the graph.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct TensorId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// What a node is.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    /// A model input; produces its tensor.
    Input(TensorId),
    /// A constant-valued node; produces a tensor that carries a buffer.
    Constant(TensorId),
    /// A model output; consumes its tensor.
    Output(TensorId),
    /// A primitive of the target format.
    Operator(Operator),
    /// A high-level node awaiting lowering.
    Transformable(TransformableOp),
}

impl NodeKind {
    pub fn inputs(&self) -> Vec<TensorId> {
        match self {
            Self::Input(_) | Self::Constant(_) => Vec::new(),
            Self::Output(t) => vec![*t],
            Self::Operator(op) => op.inputs.clone(),
            Self::Transformable(op) => op.inputs(),
        }
    }

    pub fn outputs(&self) -> Vec<TensorId> {
        match self {
            Self::Input(t) | Self::Constant(t) => vec![*t],
            Self::Output(_) => Vec::new(),
            Self::Operator(op) => op.outputs.clone(),
            Self::Transformable(op) => op.outputs(),
        }
    }

    /// Short upper-case label used in dumps.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Input(_) => "INPUT",
            Self::Constant(_) => "CONSTANT",
            Self::Output(_) => "OUTPUT",
            Self::Operator(op) => op.kind.op_name(),
            Self::Transformable(op) => op.kind_name(),
        }
    }
}

/// A node in the graph.
#[derive(Clone, Debug)]
pub struct Node {
    pub id: NodeId,
    /// Human-readable name (the name of the first produced or consumed tensor).
    pub name: String,
    pub kind: NodeKind,
    /// Set for nodes inserted by a lowering.
    pub lowering_origin: bool,
}

impl Node {
    pub fn is_constant(&self) -> bool {
        matches!(self.kind, NodeKind::Constant(_))
    }

    pub fn as_operator(&self) -> Option<&Operator> {
        match &self.kind {
            NodeKind::Operator(op) => Some(op),
            _ => None,
        }
    }
}

/// A tensor flowing from its producer to one consumer.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
    pub tensor: TensorId,
}

/// Edges of a detached node, captured so they can be reattached to the
/// subgraph that replaces it.
#[derive(Clone, Debug)]
pub struct EdgeRestoreMap {
    /// The detached node.
    pub node: NodeId,
    /// Its name at the time it was detached.
    pub name: String,
    /// `(producer, tensor)` for every edge that fed the node.
    pub predecessors: Vec<(NodeId, TensorId)>,
    /// `(tensor, consumer)` for every edge the node fed.
    pub successors: Vec<(TensorId, NodeId)>,
    /// Nodes with ids at or above this one were inserted after the detach.
    first_new: NodeId,
    /// Tensors registered after the detach start at this index.
    tensor_count: usize,
    lowering_origin: bool,
}

/// A model graph.
#[derive(Clone, Debug, Default)]
pub struct Graph {
    tensors: Vec<Tensor>,
    tensor_index: HashMap<String, TensorId>,
    nodes: BTreeMap<NodeId, Node>,
    edges: Vec<Edge>,
    /// Producer of each tensor. Entries of detached nodes stay until a
    /// lowering-origin node takes the tensor over.
    producers: HashMap<TensorId, NodeId>,
    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,
    next_node_id: u32,
}

impl Graph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Tensors
    // -----------------------------------------------------------------------

    /// Register a tensor. Names must be unique within the graph.
    pub fn add_tensor(&mut self, tensor: Tensor) -> Result<TensorId, GraphError> {
        if self.tensor_index.contains_key(&tensor.name) {
            return Err(GraphError::DuplicateTensor { name: tensor.name });
        }
        let id = TensorId(self.tensors.len() as u32);
        self.tensor_index.insert(tensor.name.clone(), id);
        self.tensors.push(tensor);
        Ok(id)
    }

    pub fn tensor(&self, id: TensorId) -> Result<&Tensor, GraphError> {
        self.tensors
            .get(id.0 as usize)
            .ok_or(GraphError::UnknownTensor(id))
    }

    pub fn tensor_by_name(&self, name: &str) -> Option<TensorId> {
        self.tensor_index.get(name).copied()
    }

    pub fn tensors(&self) -> impl Iterator<Item = (TensorId, &Tensor)> {
        self.tensors
            .iter()
            .enumerate()
            .map(|(i, t)| (TensorId(i as u32), t))
    }

    pub fn tensor_count(&self) -> usize {
        self.tensors.len()
    }

    /// Model input tensors, in declaration order.
    pub fn inputs(&self) -> &[TensorId] {
        &self.inputs
    }

    /// Model output tensors, in declaration order.
    pub fn outputs(&self) -> &[TensorId] {
        &self.outputs
    }

    // -----------------------------------------------------------------------
    // Nodes
    // -----------------------------------------------------------------------

    /// Register a model input tensor and its input node.
    pub fn add_input(&mut self, tensor: Tensor) -> Result<TensorId, GraphError> {
        let t = self.add_tensor(tensor)?;
        self.insert_node(NodeKind::Input(t), false)?;
        self.inputs.push(t);
        Ok(t)
    }

    /// Mark an existing tensor as a model output.
    pub fn mark_output(&mut self, tensor: TensorId) -> Result<NodeId, GraphError> {
        let id = self.insert_node(NodeKind::Output(tensor), false)?;
        self.outputs.push(tensor);
        Ok(id)
    }

    /// Insert a primitive operator.
    ///
    /// The operator is checked against its kind's contract. Each input is
    /// linked to its producer; constant inputs get a constant node on first
    /// use. A lowering-origin operator may take over outputs whose producer
    /// has been detached; otherwise every output must be unclaimed.
    pub fn add_operator(
        &mut self,
        op: Operator,
        is_lowering_origin: bool,
    ) -> Result<NodeId, GraphError> {
        op.validate(self)?;
        self.insert_node(NodeKind::Operator(op), is_lowering_origin)
    }

    /// Insert a high-level node awaiting lowering.
    pub fn add_transformable(&mut self, op: TransformableOp) -> Result<NodeId, GraphError> {
        self.insert_node(NodeKind::Transformable(op), false)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Live nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Look up the node producing the tensor called `name`.
    pub fn tensor_node(&self, name: &str) -> Option<NodeId> {
        self.producer(self.tensor_by_name(name)?)
    }

    /// The live node producing `tensor`, if any.
    pub fn producer(&self, tensor: TensorId) -> Option<NodeId> {
        self.producers
            .get(&tensor)
            .copied()
            .filter(|p| self.nodes.contains_key(p))
    }

    fn insert_node(&mut self, kind: NodeKind, lowering_origin: bool) -> Result<NodeId, GraphError> {
        let inputs = kind.inputs();
        let outputs = kind.outputs();
        for &t in inputs.iter().chain(&outputs) {
            self.tensor(t)?;
        }

        for &t in &outputs {
            if let Some(&existing) = self.producers.get(&t) {
                let live = self.nodes.contains_key(&existing);
                if live || !lowering_origin {
                    return Err(GraphError::DuplicateProducer {
                        tensor: self.tensors[t.0 as usize].name.clone(),
                        node: self.node_label(existing),
                    });
                }
            }
        }

        let name = outputs
            .first()
            .or(inputs.first())
            .map(|&t| self.tensors[t.0 as usize].name.clone())
            .unwrap_or_default();
        let id = self.alloc_node_id();
        self.nodes.insert(
            id,
            Node {
                id,
                name,
                kind,
                lowering_origin,
            },
        );

        for &t in &outputs {
            self.producers.insert(t, id);
        }
        for &t in &inputs {
            self.link_input(t, id);
        }
        Ok(id)
    }

    fn link_input(&mut self, tensor: TensorId, consumer: NodeId) {
        let source = match self.producer(tensor) {
            Some(p) => p,
            None if self.tensors[tensor.0 as usize].is_constant() => {
                self.add_constant_node(tensor)
            }
            None => {
                log::debug!(
                    "node {consumer}: input '{}' has no producer",
                    self.tensors[tensor.0 as usize].name
                );
                return;
            }
        };
        self.add_edge(Edge {
            source,
            target: consumer,
            tensor,
        });
    }

    fn add_constant_node(&mut self, tensor: TensorId) -> NodeId {
        let id = self.alloc_node_id();
        self.nodes.insert(
            id,
            Node {
                id,
                name: self.tensors[tensor.0 as usize].name.clone(),
                kind: NodeKind::Constant(tensor),
                lowering_origin: false,
            },
        );
        self.producers.insert(tensor, id);
        id
    }

    fn alloc_node_id(&mut self) -> NodeId {
        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;
        id
    }

    fn node_label(&self, id: NodeId) -> String {
        match self.nodes.get(&id) {
            Some(node) => node.name.clone(),
            None => format!("{id} (detached)"),
        }
    }

    // -----------------------------------------------------------------------
    // Edges
    // -----------------------------------------------------------------------

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Add an edge between two live nodes.
    pub fn connect(
        &mut self,
        source: NodeId,
        target: NodeId,
        tensor: TensorId,
    ) -> Result<(), GraphError> {
        for id in [source, target] {
            if !self.nodes.contains_key(&id) {
                return Err(GraphError::UnknownNode(id));
            }
        }
        self.tensor(tensor)?;
        self.add_edge(Edge {
            source,
            target,
            tensor,
        });
        Ok(())
    }

    /// Returns `true` if the edge was not already present.
    fn add_edge(&mut self, edge: Edge) -> bool {
        if self.edges.contains(&edge) {
            return false;
        }
        self.edges.push(edge);
        true
    }

    pub fn out_degree(&self, node: NodeId) -> usize {
        self.edges.iter().filter(|e| e.source == node).count()
    }

    /// Consumers of `node`, in edge insertion order.
    pub fn successors(&self, node: NodeId) -> Vec<NodeId> {
        self.edges
            .iter()
            .filter(|e| e.source == node)
            .map(|e| e.target)
            .collect()
    }

    /// Producers feeding `node`, in edge insertion order.
    pub fn predecessors(&self, node: NodeId) -> Vec<NodeId> {
        self.edges
            .iter()
            .filter(|e| e.target == node)
            .map(|e| e.source)
            .collect()
    }

    // -----------------------------------------------------------------------
    // Replacement
    // -----------------------------------------------------------------------

    /// Remove a node and its edges.
    ///
    /// The tensors it produced keep pointing at it until a lowering-origin
    /// operator takes them over.
    pub fn detach_node(&mut self, id: NodeId) -> Result<(NodeKind, EdgeRestoreMap), GraphError> {
        let node = self.nodes.remove(&id).ok_or(GraphError::UnknownNode(id))?;

        let mut predecessors = Vec::new();
        let mut successors = Vec::new();
        self.edges.retain(|e| {
            if e.target == id {
                predecessors.push((e.source, e.tensor));
                false
            } else if e.source == id {
                successors.push((e.tensor, e.target));
                false
            } else {
                true
            }
        });

        let map = EdgeRestoreMap {
            node: id,
            name: node.name,
            predecessors,
            successors,
            first_new: NodeId(self.next_node_id),
            tensor_count: self.tensors.len(),
            lowering_origin: node.lowering_origin,
        };
        Ok((node.kind, map))
    }

    /// Undo a [`detach_node`](Self::detach_node).
    ///
    /// Drops every node, edge and tensor added since the detach, then puts
    /// the node back under its old id with its old edges.
    pub fn reattach_node(&mut self, kind: NodeKind, map: &EdgeRestoreMap) {
        let first_new = map.first_new;
        let removed = self.nodes.split_off(&first_new).len();
        self.edges
            .retain(|e| e.source < first_new && e.target < first_new);
        for tensor in self.tensors.drain(map.tensor_count..) {
            self.tensor_index.remove(&tensor.name);
        }
        let tensor_count = map.tensor_count;
        self.producers
            .retain(|t, n| (t.0 as usize) < tensor_count && *n < first_new);

        for t in kind.outputs() {
            self.producers.insert(t, map.node);
        }
        self.nodes.insert(
            map.node,
            Node {
                id: map.node,
                name: map.name.clone(),
                kind,
                lowering_origin: map.lowering_origin,
            },
        );
        for &(source, tensor) in &map.predecessors {
            self.add_edge(Edge {
                source,
                target: map.node,
                tensor,
            });
        }
        for &(tensor, target) in &map.successors {
            self.add_edge(Edge {
                source: map.node,
                target,
                tensor,
            });
        }
        log::debug!("{}: reattached, {removed} new node(s) dropped", map.name);
    }

    /// Reattach the edges of a detached node to the nodes inserted since.
    ///
    /// Predecessor edges go to every new node consuming the same tensor;
    /// a tensor no new node consumes (a folded constant) is skipped.
    /// Successor edges start at the new producer of the same tensor, which
    /// must exist. Returns the number of edges added.
    pub fn try_restore_edges(&mut self, map: &EdgeRestoreMap) -> Result<usize, GraphError> {
        let new_nodes: Vec<NodeId> = self
            .nodes
            .range(map.first_new..)
            .map(|(&id, _)| id)
            .collect();
        let mut restored = 0;

        for &(source, tensor) in &map.predecessors {
            if self.producer(tensor) != Some(source) {
                continue;
            }
            let consumers: Vec<NodeId> = new_nodes
                .iter()
                .copied()
                .filter(|n| self.nodes[n].kind.inputs().contains(&tensor))
                .collect();
            if consumers.is_empty() {
                log::debug!(
                    "{}: '{}' from {source} is no longer consumed",
                    map.name,
                    self.tensors[tensor.0 as usize].name
                );
                continue;
            }
            for target in consumers {
                if self.add_edge(Edge {
                    source,
                    target,
                    tensor,
                }) {
                    restored += 1;
                }
            }
        }

        for &(tensor, target) in &map.successors {
            if !self.nodes.contains_key(&target) {
                continue;
            }
            let Some(source) = self.producer(tensor) else {
                return Err(GraphError::UnresolvedEdge {
                    tensor: self.tensors[tensor.0 as usize].name.clone(),
                    node: self.nodes[&target].name.clone(),
                });
            };
            if self.add_edge(Edge {
                source,
                target,
                tensor,
            }) {
                log::debug!("{}: restored edge {source} -> {target}", map.name);
                restored += 1;
            }
        }

        Ok(restored)
    }

    // -----------------------------------------------------------------------
    // Traversal
    // -----------------------------------------------------------------------

    /// Returns node ids in topological order.
    ///
    /// The ordering is deterministic: among ready nodes, the one with the
    /// smaller [`NodeId`] is emitted first.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, GraphError> {
        let mut in_degree: HashMap<NodeId, usize> = self.nodes.keys().map(|&id| (id, 0)).collect();
        let mut consumers: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for e in &self.edges {
            *in_degree.entry(e.target).or_default() += 1;
            consumers.entry(e.source).or_default().push(e.target);
        }

        // Kahn's algorithm with a BTreeSet for NodeId ordering.
        let mut ready: BTreeSet<NodeId> = in_degree
            .iter()
            .filter(|&(_, &deg)| deg == 0)
            .map(|(&id, _)| id)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(id) = ready.pop_first() {
            order.push(id);
            for c in consumers.get(&id).into_iter().flatten() {
                if let Some(deg) = in_degree.get_mut(c) {
                    *deg -= 1;
                    if *deg == 0 {
                        ready.insert(*c);
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            return Err(GraphError::Cycle {
                visited: order.len(),
                total: self.nodes.len(),
            });
        }
        Ok(order)
    }

    /// Transformable nodes in topological order.
    pub fn transformable_nodes(&self) -> Result<Vec<NodeId>, GraphError> {
        Ok(self
            .topological_order()?
            .into_iter()
            .filter(|id| matches!(self.nodes[id].kind, NodeKind::Transformable(_)))
            .collect())
    }
}
