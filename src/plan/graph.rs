// src/plan/graph.rs

//! Package dependency graph used to order plan steps
//!
//! Nodes keep insertion order. Both orderings run Kahn's algorithm and always
//! take the earliest-inserted ready node, so packages with no ordering
//! constraint between them come out in the order they were proposed.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use tracing::warn;

#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: Vec<String>,
    index: HashMap<String, usize>,
    /// Node to the nodes it depends on
    edges: Vec<Vec<usize>>,
    /// Node to the nodes that depend on it
    reverse_edges: Vec<Vec<usize>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a package; adding a name twice keeps its first position
    pub fn add_node(&mut self, name: &str) -> usize {
        if let Some(&i) = self.index.get(name) {
            return i;
        }
        let i = self.nodes.len();
        self.nodes.push(name.to_string());
        self.index.insert(name.to_string(), i);
        self.edges.push(Vec::new());
        self.reverse_edges.push(Vec::new());
        i
    }

    /// Record that `from` depends on `to`
    ///
    /// Edges to packages outside the graph are ignored: those dependencies are
    /// satisfied by packages the plan does not touch.
    pub fn add_edge(&mut self, from: &str, to: &str) {
        let (Some(&f), Some(&t)) = (self.index.get(from), self.index.get(to)) else {
            return;
        };
        if f == t || self.edges[f].contains(&t) {
            return;
        }
        self.edges[f].push(t);
        self.reverse_edges[t].push(f);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Direct dependents of `name`, in insertion order
    pub fn get_dependents(&self, name: &str) -> Vec<&str> {
        let Some(&i) = self.index.get(name) else {
            return Vec::new();
        };
        let mut dependents = self.reverse_edges[i].clone();
        dependents.sort_unstable();
        dependents.into_iter().map(|d| self.nodes[d].as_str()).collect()
    }

    /// Every package that depends on `name`, directly or not
    pub fn transitive_dependents(&self, name: &str) -> Vec<&str> {
        let Some(&start) = self.index.get(name) else {
            return Vec::new();
        };
        let mut seen = vec![false; self.nodes.len()];
        seen[start] = true;
        let mut queue = VecDeque::from([start]);
        let mut found = Vec::new();

        while let Some(n) = queue.pop_front() {
            for &d in &self.reverse_edges[n] {
                if !seen[d] {
                    seen[d] = true;
                    found.push(d);
                    queue.push_back(d);
                }
            }
        }

        found.sort_unstable();
        found.into_iter().map(|d| self.nodes[d].as_str()).collect()
    }

    /// Dependencies before dependents
    pub fn install_order(&self) -> Vec<String> {
        self.kahn(&self.edges, &self.reverse_edges)
    }

    /// Dependents before dependencies
    pub fn removal_order(&self) -> Vec<String> {
        self.kahn(&self.reverse_edges, &self.edges)
    }

    /// A node becomes ready once everything in `blockers[node]` is emitted;
    /// emitting a node releases `releases[node]`
    fn kahn(&self, blockers: &[Vec<usize>], releases: &[Vec<usize>]) -> Vec<String> {
        let mut in_degree: Vec<usize> = blockers.iter().map(Vec::len).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();
        let mut emitted = vec![false; self.nodes.len()];
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(Reverse(n)) = ready.pop() {
            emitted[n] = true;
            order.push(self.nodes[n].clone());
            for &r in &releases[n] {
                in_degree[r] -= 1;
                if in_degree[r] == 0 {
                    ready.push(Reverse(r));
                }
            }
        }

        if order.len() != self.nodes.len() {
            let cyclic: Vec<&str> = (0..self.nodes.len())
                .filter(|&i| !emitted[i])
                .map(|i| self.nodes[i].as_str())
                .collect();
            warn!("Dependency cycle among {}; keeping proposal order", cyclic.join(", "));
            order.extend(cyclic.into_iter().map(str::to_string));
        }

        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(nodes: &[&str], edges: &[(&str, &str)]) -> DependencyGraph {
        let mut g = DependencyGraph::new();
        for n in nodes {
            g.add_node(n);
        }
        for (from, to) in edges {
            g.add_edge(from, to);
        }
        g
    }

    #[test]
    fn test_install_order_dependencies_first() {
        // server -> libc, server -> openssl -> libc
        let g = graph(
            &["server", "openssl", "libc"],
            &[("server", "libc"), ("server", "openssl"), ("openssl", "libc")],
        );
        assert_eq!(g.install_order(), vec!["libc", "openssl", "server"]);
        assert_eq!(g.removal_order(), vec!["server", "openssl", "libc"]);
    }

    #[test]
    fn test_unrelated_nodes_keep_insertion_order() {
        let g = graph(&["zsh", "bash", "ash"], &[]);
        assert_eq!(g.install_order(), vec!["zsh", "bash", "ash"]);
        assert_eq!(g.removal_order(), vec!["zsh", "bash", "ash"]);
    }

    #[test]
    fn test_ties_prefer_earlier_nodes() {
        // b depends on a; c is free and was proposed before a
        let g = graph(&["b", "c", "a"], &[("b", "a")]);
        assert_eq!(g.install_order(), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_cycle_does_not_drop_nodes() {
        let g = graph(&["a", "b", "c"], &[("a", "b"), ("b", "a")]);
        let order = g.install_order();
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_edges_outside_graph_ignored() {
        let mut g = graph(&["a"], &[]);
        g.add_edge("a", "missing");
        assert!(g.get_dependents("missing").is_empty());
        assert_eq!(g.install_order(), vec!["a"]);
    }

    #[test]
    fn test_transitive_dependents() {
        let g = graph(
            &["libc", "openssl", "server", "unrelated"],
            &[("openssl", "libc"), ("server", "openssl")],
        );
        assert_eq!(g.get_dependents("libc"), vec!["openssl"]);
        assert_eq!(g.transitive_dependents("libc"), vec!["openssl", "server"]);
        assert!(g.transitive_dependents("server").is_empty());
    }
}
