//! Dependency graph over expression leaves
//!
//! Nodes are the symbolic paths of expression leaves. An edge runs from a node
//! to every dependency that is itself an expression; dependencies on constants
//! or branches never constrain ordering.

use indexmap::{IndexMap, IndexSet};

use crate::error::{Error, Result};
use crate::tree::Evaluation;

/// Expression nodes and their "must resolve after" edges, in document order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DependencyGraph {
    nodes: IndexMap<String, Vec<String>>,
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Visiting,
    Done,
}

impl DependencyGraph {
    /// Build the graph from one pass's metadata
    pub fn build(evaluation: &Evaluation) -> Self {
        let nodes = evaluation
            .expressions()
            .map(|leaf| {
                let edges = leaf
                    .dependencies
                    .keys()
                    .filter(|dep| evaluation.is_expression(dep))
                    .cloned()
                    .collect();
                (leaf.sympath(), edges)
            })
            .collect();
        Self { nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, sympath: &str) -> bool {
        self.nodes.contains_key(sympath)
    }

    /// Expression dependencies of a node
    pub fn dependencies_of(&self, sympath: &str) -> Option<&[String]> {
        self.nodes.get(sympath).map(Vec::as_slice)
    }

    /// The node set, for comparing passes
    pub fn node_set(&self) -> IndexSet<String> {
        self.nodes.keys().cloned().collect()
    }

    /// Topological order: every node after its expression dependencies.
    ///
    /// Ties follow document order. A cycle is a `CircularReference` error
    /// carrying the chain (`a → b → a`).
    pub fn order(&self) -> Result<Vec<String>> {
        let mut marks: IndexMap<&str, Mark> = IndexMap::with_capacity(self.nodes.len());
        let mut ordered = Vec::with_capacity(self.nodes.len());
        let mut stack = Vec::new();

        for node in self.nodes.keys() {
            self.visit(node, &mut marks, &mut stack, &mut ordered)?;
        }

        Ok(ordered)
    }

    fn visit<'a>(
        &'a self,
        node: &'a str,
        marks: &mut IndexMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
        ordered: &mut Vec<String>,
    ) -> Result<()> {
        match marks.get(node) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|n| *n == node).unwrap_or(0);
                let mut chain: Vec<String> = stack[start..].iter().map(|n| n.to_string()).collect();
                chain.push(node.to_string());
                return Err(Error::circular_reference(node, chain));
            }
            None => {}
        }

        marks.insert(node, Mark::Visiting);
        stack.push(node);

        if let Some(edges) = self.nodes.get(node) {
            for dep in edges {
                self.visit(dep, marks, stack, ordered)?;
            }
        }

        stack.pop();
        marks.insert(node, Mark::Done);
        ordered.push(node.to_string());
        Ok(())
    }
}

/// Build the graph for `evaluation` and return its resolution order
pub fn build_graph(evaluation: &Evaluation) -> Result<Vec<String>> {
    DependencyGraph::build(evaluation).order()
}
