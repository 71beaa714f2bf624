//! Dependency graph of pipeline units
//!
//! A [`DependencyGraph`] is built once from a list of [`UnitSpec`]s and is
//! validated at construction: duplicate names, references to undeclared
//! predecessors and cycles are all rejected before anything runs. A graph
//! that exists is therefore always a DAG with a known topological order.
//!
//! # Example
//!
//! ```
//! use rv_pipeline::graph::{DependencyGraph, UnitSpec};
//!
//! let graph = DependencyGraph::new(vec![
//!     UnitSpec::new("extract"),
//!     UnitSpec::new("stage").after(["extract"]),
//!     UnitSpec::new("hub_product").after(["stage"]),
//!     UnitSpec::new("hub_country").after(["stage"]),
//! ])
//! .unwrap();
//!
//! let waves = graph.waves();
//! assert_eq!(waves[2], vec!["hub_product", "hub_country"]);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Unit '{0}' is declared more than once")]
    DuplicateUnit(String),

    #[error("Unit '{unit}' depends on undeclared unit '{predecessor}'")]
    UnknownPredecessor { unit: String, predecessor: String },

    #[error("Dependency cycle among units: {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("Unit '{0}' is not part of the graph")]
    UnknownUnit(String),
}

/// Bounded retry for transient failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Single attempt
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// A named unit of work and the units it must wait for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSpec {
    pub name: String,
    pub predecessors: Vec<String>,
    pub retry: RetryPolicy,
}

impl UnitSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            predecessors: Vec::new(),
            retry: RetryPolicy::none(),
        }
    }

    pub fn after<I, S>(mut self, predecessors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.predecessors.extend(predecessors.into_iter().map(Into::into));
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    units: Vec<UnitSpec>,
    index: HashMap<String, usize>,
    /// Indices of direct predecessors, per unit
    upstream: Vec<Vec<usize>>,
    /// Indices of direct dependents, per unit
    downstream: Vec<Vec<usize>>,
    /// Topological order (Kahn, ties broken by declaration order)
    order: Vec<usize>,
}

impl DependencyGraph {
    pub fn new(units: Vec<UnitSpec>) -> Result<Self, GraphError> {
        let mut index = HashMap::with_capacity(units.len());
        for (i, unit) in units.iter().enumerate() {
            if index.insert(unit.name.clone(), i).is_some() {
                return Err(GraphError::DuplicateUnit(unit.name.clone()));
            }
        }

        let mut upstream = vec![Vec::new(); units.len()];
        let mut downstream = vec![Vec::new(); units.len()];
        for (i, unit) in units.iter().enumerate() {
            for predecessor in &unit.predecessors {
                let p = *index.get(predecessor).ok_or_else(|| GraphError::UnknownPredecessor {
                    unit: unit.name.clone(),
                    predecessor: predecessor.clone(),
                })?;
                if !upstream[i].contains(&p) {
                    upstream[i].push(p);
                    downstream[p].push(i);
                }
            }
        }

        let order = topological_order(&upstream, &downstream).map_err(|stuck| {
            let mut names: Vec<String> = stuck.iter().map(|&i| units[i].name.clone()).collect();
            names.sort();
            GraphError::Cycle(names)
        })?;

        Ok(Self {
            units,
            index,
            upstream,
            downstream,
            order,
        })
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&UnitSpec> {
        self.index.get(name).map(|&i| &self.units[i])
    }

    pub(crate) fn position(&self, name: &str) -> Result<usize, GraphError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| GraphError::UnknownUnit(name.to_string()))
    }

    pub(crate) fn unit_at(&self, i: usize) -> &UnitSpec {
        &self.units[i]
    }

    pub(crate) fn upstream_of(&self, i: usize) -> &[usize] {
        &self.upstream[i]
    }

    /// Units in a valid execution order
    pub fn order(&self) -> impl Iterator<Item = &UnitSpec> {
        self.order.iter().map(|&i| &self.units[i])
    }

    pub(crate) fn order_indices(&self) -> &[usize] {
        &self.order
    }

    /// Group units into waves: every unit of a wave depends only on units of
    /// earlier waves, so a wave can run concurrently
    pub fn waves(&self) -> Vec<Vec<&str>> {
        let mut level = vec![0usize; self.units.len()];
        for &i in &self.order {
            level[i] = self.upstream[i]
                .iter()
                .map(|&p| level[p] + 1)
                .max()
                .unwrap_or(0);
        }

        let depth = level.iter().copied().max().map_or(0, |m| m + 1);
        let mut waves = vec![Vec::new(); depth];
        for (i, unit) in self.units.iter().enumerate() {
            waves[level[i]].push(unit.name.as_str());
        }
        waves
    }

    /// Every unit that transitively depends on `name`
    pub fn dependents_of(&self, name: &str) -> Result<BTreeSet<String>, GraphError> {
        let start = self.position(name)?;
        Ok(self
            .transitive_dependents(start)
            .into_iter()
            .map(|i| self.units[i].name.clone())
            .collect())
    }

    pub(crate) fn transitive_dependents(&self, start: usize) -> Vec<usize> {
        let mut seen = vec![false; self.units.len()];
        let mut queue: VecDeque<usize> = self.downstream[start].iter().copied().collect();
        let mut out = Vec::new();
        while let Some(i) = queue.pop_front() {
            if seen[i] {
                continue;
            }
            seen[i] = true;
            out.push(i);
            queue.extend(self.downstream[i].iter().copied());
        }
        out
    }
}

/// Kahn's algorithm. On a cycle, returns the indices that never reached
/// in-degree zero.
fn topological_order(
    upstream: &[Vec<usize>],
    downstream: &[Vec<usize>],
) -> Result<Vec<usize>, Vec<usize>> {
    let mut in_degree: Vec<usize> = upstream.iter().map(Vec::len).collect();
    let mut ready: VecDeque<usize> = (0..upstream.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(upstream.len());

    while let Some(i) = ready.pop_front() {
        order.push(i);
        for &d in &downstream[i] {
            in_degree[d] -= 1;
            if in_degree[d] == 0 {
                ready.push_back(d);
            }
        }
    }

    if order.len() == upstream.len() {
        Ok(order)
    } else {
        Err((0..upstream.len()).filter(|&i| in_degree[i] > 0).collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn diamond() -> DependencyGraph {
        DependencyGraph::new(vec![
            UnitSpec::new("a"),
            UnitSpec::new("b").after(["a"]),
            UnitSpec::new("c").after(["a"]),
            UnitSpec::new("d").after(["b", "c"]),
            UnitSpec::new("e"),
        ])
        .unwrap()
    }

    #[test]
    fn test_order_respects_predecessors() {
        let graph = diamond();
        let order: Vec<&str> = graph.order().map(|u| u.name.as_str()).collect();
        let pos = |n: &str| order.iter().position(|x| *x == n).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("a") < pos("c"));
        assert!(pos("b") < pos("d"));
        assert!(pos("c") < pos("d"));
        assert_eq!(order.len(), 5);
    }

    #[test]
    fn test_waves() {
        let graph = diamond();
        assert_eq!(graph.waves(), vec![vec!["a", "e"], vec!["b", "c"], vec!["d"]]);
    }

    #[test]
    fn test_rejects_duplicate() {
        let err = DependencyGraph::new(vec![UnitSpec::new("a"), UnitSpec::new("a")]).unwrap_err();
        assert_eq!(err, GraphError::DuplicateUnit("a".into()));
    }

    #[test]
    fn test_rejects_unknown_predecessor() {
        let err = DependencyGraph::new(vec![UnitSpec::new("a").after(["ghost"])]).unwrap_err();
        assert!(matches!(err, GraphError::UnknownPredecessor { ref predecessor, .. } if predecessor == "ghost"));
    }

    #[test]
    fn test_rejects_cycle() {
        let err = DependencyGraph::new(vec![
            UnitSpec::new("root"),
            UnitSpec::new("x").after(["root", "z"]),
            UnitSpec::new("y").after(["x"]),
            UnitSpec::new("z").after(["y"]),
        ])
        .unwrap_err();
        assert_eq!(err, GraphError::Cycle(vec!["x".into(), "y".into(), "z".into()]));

        let err = DependencyGraph::new(vec![UnitSpec::new("self").after(["self"])]).unwrap_err();
        assert!(matches!(err, GraphError::Cycle(_)));
    }

    #[test]
    fn test_dependents_closure() {
        let graph = diamond();
        let deps = graph.dependents_of("b").unwrap();
        assert_eq!(deps.into_iter().collect::<Vec<_>>(), vec!["d".to_string()]);
        assert_eq!(graph.dependents_of("a").unwrap().len(), 3);
        assert!(graph.dependents_of("nope").is_err());
    }

    #[test]
    fn test_retry_policy_has_at_least_one_attempt() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }
}
