//! Parent-before-child ordering of hierarchical entities.
//!
//! Nodes are `(id, parent)` pairs. Roots hang off an implicit root with an
//! empty id; the graph holds parent→child edges and is walked with an
//! iterative depth-first search. Output is reverse post-order, so every
//! parent precedes its children.

use std::collections::{HashMap, HashSet};
use thiserror::Error;

const ROOT: &str = "";

/// The parent/child relation contains a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cycle detected in parent/child relation: {}", .chain.join(" -> "))]
pub struct CycleError {
    /// Ids on the cycle, in traversal order.
    pub chain: Vec<String>,
}

/// Orders hierarchical entities so parents come before children.
#[derive(Debug, Default, Clone, Copy)]
pub struct TopologicalSorter;

struct Frame {
    node: String,
    next_child: usize,
}

impl TopologicalSorter {
    /// Create a sorter.
    pub fn new() -> Self {
        Self
    }

    /// Sort `(id, parent)` pairs.
    ///
    /// Nodes whose parent is neither a root nor present in the input are
    /// left out of the result, together with their descendants. Duplicate
    /// ids keep their first occurrence.
    pub fn sort(&self, nodes: &[(String, Option<String>)]) -> Result<Vec<String>, CycleError> {
        let mut parents: HashMap<&str, &str> = HashMap::new();
        let mut order: Vec<&str> = Vec::new();
        for (id, parent) in nodes {
            if parents.contains_key(id.as_str()) {
                continue;
            }
            parents.insert(id, parent.as_deref().unwrap_or(ROOT));
            order.push(id);
        }

        let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
        for id in &order {
            children.entry(parents[id]).or_default().push(id);
        }

        let mut visited: HashSet<String> = HashSet::new();
        let mut post_order: Vec<String> = Vec::new();

        self.visit(ROOT, &children, &mut visited, &mut post_order)?;

        // Anything still unvisited hangs below a missing parent or a cycle.
        // Walk up from it: a missing ancestor drops the whole chain, a
        // repeated ancestor is a cycle.
        let mut dropped: HashSet<&str> = HashSet::new();
        for id in &order {
            if visited.contains(*id) || dropped.contains(id) {
                continue;
            }
            let mut chain: Vec<&str> = Vec::new();
            let mut current: &str = id;
            loop {
                if dropped.contains(current) || !parents.contains_key(current) {
                    dropped.extend(chain);
                    break;
                }
                if let Some(start) = chain.iter().position(|c| *c == current) {
                    return Err(CycleError {
                        chain: chain[start..].iter().rev().map(|c| c.to_string()).collect(),
                    });
                }
                chain.push(current);
                current = parents[current];
            }
        }

        Ok(post_order.into_iter().rev().filter(|id| id != ROOT).collect())
    }

    /// Sort arbitrary items given a function extracting `(id, parent)`.
    ///
    /// Items left out by [`sort`](Self::sort) are dropped.
    pub fn sort_items<T, F>(&self, items: Vec<T>, key: F) -> Result<Vec<T>, CycleError>
    where
        F: Fn(&T) -> (String, Option<String>),
    {
        let keys: Vec<(String, Option<String>)> = items.iter().map(&key).collect();
        let sorted = self.sort(&keys)?;

        let mut by_id: HashMap<String, T> = HashMap::new();
        for ((id, _), item) in keys.into_iter().zip(items) {
            by_id.entry(id).or_insert(item);
        }
        Ok(sorted.into_iter().filter_map(|id| by_id.remove(&id)).collect())
    }

    fn visit(
        &self,
        start: &str,
        children: &HashMap<&str, Vec<&str>>,
        visited: &mut HashSet<String>,
        post_order: &mut Vec<String>,
    ) -> Result<(), CycleError> {
        let mut stack = vec![Frame {
            node: start.to_string(),
            next_child: 0,
        }];
        let mut on_stack: HashSet<String> = HashSet::new();
        on_stack.insert(start.to_string());
        visited.insert(start.to_string());

        while let Some(frame) = stack.last_mut() {
            let next = children
                .get(frame.node.as_str())
                .and_then(|c| c.get(frame.next_child))
                .copied();
            frame.next_child += 1;

            match next {
                Some(child) if on_stack.contains(child) => {
                    let position = stack
                        .iter()
                        .position(|f| f.node == child)
                        .unwrap_or(0);
                    return Err(CycleError {
                        chain: stack[position..].iter().map(|f| f.node.clone()).collect(),
                    });
                }
                Some(child) if visited.contains(child) => {}
                Some(child) => {
                    visited.insert(child.to_string());
                    on_stack.insert(child.to_string());
                    stack.push(Frame {
                        node: child.to_string(),
                        next_child: 0,
                    });
                }
                None => {
                    if let Some(done) = stack.pop() {
                        on_stack.remove(&done.node);
                        post_order.push(done.node);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, parent: Option<&str>) -> (String, Option<String>) {
        (id.to_string(), parent.map(str::to_string))
    }

    fn position(order: &[String], id: &str) -> usize {
        order.iter().position(|x| x == id).unwrap()
    }

    #[test]
    fn parents_precede_children() {
        let nodes = vec![
            node("c", Some("b")),
            node("b", Some("a")),
            node("d", Some("a")),
            node("a", None),
        ];
        let order = TopologicalSorter::new().sort(&nodes).unwrap();

        assert_eq!(order.len(), 4);
        assert!(position(&order, "a") < position(&order, "b"));
        assert!(position(&order, "b") < position(&order, "c"));
        assert!(position(&order, "a") < position(&order, "d"));
    }

    #[test]
    fn two_node_cycle_is_reported() {
        let nodes = vec![node("A", Some("B")), node("B", Some("A"))];
        let err = TopologicalSorter::new().sort(&nodes).unwrap_err();

        assert_eq!(err.chain.len(), 2);
        assert!(err.chain.contains(&"A".to_string()));
        assert!(err.chain.contains(&"B".to_string()));
    }

    #[test]
    fn self_parent_is_a_cycle() {
        let nodes = vec![node("A", Some("A"))];
        let err = TopologicalSorter::new().sort(&nodes).unwrap_err();
        assert_eq!(err.chain, vec!["A".to_string()]);
    }

    #[test]
    fn cycle_below_valid_root_is_reported() {
        let nodes = vec![
            node("root", None),
            node("x", Some("y")),
            node("y", Some("z")),
            node("z", Some("x")),
            node("leaf", Some("x")),
        ];
        let err = TopologicalSorter::new().sort(&nodes).unwrap_err();
        let mut chain = err.chain.clone();
        chain.sort();
        assert_eq!(chain, vec!["x", "y", "z"]);
        assert!(err.to_string().contains("->"));
    }

    #[test]
    fn orphans_are_excluded() {
        let nodes = vec![
            node("a", None),
            node("orphan", Some("missing")),
            node("orphan-child", Some("orphan")),
        ];
        let order = TopologicalSorter::new().sort(&nodes).unwrap();
        assert_eq!(order, vec!["a".to_string()]);
    }

    #[test]
    fn orphan_grandchildren_are_excluded() {
        let nodes = vec![
            node("grandchild", Some("child")),
            node("child", Some("orphan")),
            node("orphan", Some("missing")),
            node("a", None),
        ];
        let order = TopologicalSorter::new().sort(&nodes).unwrap();
        assert_eq!(order, vec!["a".to_string()]);
    }

    #[test]
    fn orphan_subtree_beside_valid_tree() {
        let nodes = vec![
            node("orphan", Some("missing")),
            node("root", None),
            node("orphan-child", Some("orphan")),
            node("branch", Some("root")),
            node("leaf", Some("branch")),
        ];
        let order = TopologicalSorter::new().sort(&nodes).unwrap();
        assert_eq!(order, vec!["root", "branch", "leaf"]);
    }

    #[test]
    fn cycle_beside_orphan_subtree_is_reported() {
        let nodes = vec![
            node("orphan", Some("missing")),
            node("orphan-child", Some("orphan")),
            node("root", None),
            node("x", Some("y")),
            node("y", Some("x")),
        ];
        let err = TopologicalSorter::new().sort(&nodes).unwrap_err();
        let mut chain = err.chain.clone();
        chain.sort();
        assert_eq!(chain, vec!["x", "y"]);
    }

    #[test]
    fn node_below_cycle_reports_only_the_cycle() {
        let nodes = vec![
            node("leaf", Some("x")),
            node("x", Some("y")),
            node("y", Some("x")),
        ];
        let err = TopologicalSorter::new().sort(&nodes).unwrap_err();
        let mut chain = err.chain.clone();
        chain.sort();
        assert_eq!(chain, vec!["x", "y"]);
    }

    #[test]
    fn empty_input_sorts_to_empty() {
        assert!(TopologicalSorter::new().sort(&[]).unwrap().is_empty());
    }

    #[test]
    fn sort_items_reorders_payloads() {
        let items = vec![("child", Some("parent")), ("parent", None)];
        let sorted = TopologicalSorter::new()
            .sort_items(items, |item| (item.0.to_string(), item.1.map(str::to_string)))
            .unwrap();
        assert_eq!(sorted, vec![("parent", None), ("child", Some("parent"))]);
    }
}
