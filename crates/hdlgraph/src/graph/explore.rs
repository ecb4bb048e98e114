use bit_set::BitSet;
use log::trace;

use super::{Circuit, NodeId, NodePort};

/// Depth-first walk over the consumers of one output.
///
/// Every reached node is returned once, as the input port it was first reached
/// through. The walk descends into a node's consumers on the following call to
/// [`next`](Self::next) unless [`backtrack`](Self::backtrack) was called in
/// between. The walker does not borrow the circuit, so the caller may inspect
/// it freely between steps.
#[derive(Debug, Clone)]
pub struct Exploration {
    stack: Vec<NodePort>,
    visited: BitSet,
    pending: Option<NodeId>,
    skip_dependencies: bool,
}

impl Exploration {
    pub fn new(circuit: &Circuit, start: NodePort) -> Self {
        let mut visited = BitSet::with_capacity(circuit.num_nodes());
        visited.insert(start.node.index());
        let mut stack: Vec<NodePort> = circuit.directly_driven(start).to_vec();
        stack.reverse();
        Self {
            stack,
            visited,
            pending: None,
            skip_dependencies: false,
        }
    }

    /// Do not descend through dependency typed outputs.
    pub fn skip_dependencies(mut self) -> Self {
        self.skip_dependencies = true;
        self
    }

    pub fn next(&mut self, circuit: &Circuit) -> Option<NodePort> {
        if let Some(node) = self.pending.take() {
            let n = circuit.node(node);
            for output in (0..n.num_outputs()).rev() {
                if self.skip_dependencies && n.output_type(output).is_dependency() {
                    continue;
                }
                self.stack.extend(n.directly_driven(output).iter().rev());
            }
        }
        while let Some(port) = self.stack.pop() {
            if !self.visited.insert(port.node.index()) {
                continue;
            }
            trace!("exploring {port}");
            self.pending = Some(port.node);
            return Some(port);
        }
        None
    }

    /// Stop the walk from descending past the node last returned.
    pub fn backtrack(&mut self) {
        self.pending = None;
    }
}
