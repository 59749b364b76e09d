//! Dependency-order computation for the service registry.
//!
//! Three-color depth-first traversal over arena-indexed adjacency: white
//! (unvisited) nodes are explored, gray (visiting) nodes form the current
//! DFS path, black (done) nodes are skipped. A gray node reached again is a
//! back-edge, i.e. a cycle. The reverse postorder puts every dependency
//! before its dependents.

use crate::error::{KernelError, KernelResult};

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    White,
    Gray,
    Black,
}

/// Computes a start order over `nodes` (`(name, declared dependencies)`):
/// every dependency precedes all services that depend on it.
///
/// Fails with [`KernelError::ServiceNotFound`] for a dependency that is not
/// itself a node, and [`KernelError::CircularDependency`] (carrying the
/// offending path) when the declared graph contains a cycle anywhere,
/// before any caller-visible work happens.
pub(crate) fn topological_order(nodes: &[(String, Vec<String>)]) -> KernelResult<Vec<String>> {
    let index_of = |name: &str| nodes.iter().position(|(n, _)| n == name);

    // Arena-indexed adjacency: edges point dependent -> dependency.
    let mut adjacency: Vec<Vec<usize>> = Vec::with_capacity(nodes.len());
    for (_, dependencies) in nodes {
        let mut edges = Vec::with_capacity(dependencies.len());
        for dependency in dependencies {
            let target = index_of(dependency)
                .ok_or_else(|| KernelError::ServiceNotFound(dependency.clone()))?;
            edges.push(target);
        }
        adjacency.push(edges);
    }

    let mut marks = vec![Mark::White; nodes.len()];
    let mut order = Vec::with_capacity(nodes.len());
    let mut path = Vec::new();

    for root in 0..nodes.len() {
        if marks[root] == Mark::White {
            visit(root, nodes, &adjacency, &mut marks, &mut path, &mut order)?;
        }
    }

    Ok(order)
}

fn visit(
    node: usize,
    nodes: &[(String, Vec<String>)],
    adjacency: &[Vec<usize>],
    marks: &mut [Mark],
    path: &mut Vec<usize>,
    order: &mut Vec<String>,
) -> KernelResult<()> {
    marks[node] = Mark::Gray;
    path.push(node);

    for &dependency in &adjacency[node] {
        match marks[dependency] {
            Mark::Black => {}
            Mark::Gray => {
                // Back-edge: slice the current path from the first occurrence
                // of the revisited node to name the cycle participants.
                let start = path.iter().position(|&n| n == dependency).unwrap_or(0);
                let mut cycle: Vec<String> =
                    path[start..].iter().map(|&n| nodes[n].0.clone()).collect();
                cycle.push(nodes[dependency].0.clone());
                return Err(KernelError::CircularDependency(cycle));
            }
            Mark::White => visit(dependency, nodes, adjacency, marks, path, order)?,
        }
    }

    path.pop();
    marks[node] = Mark::Black;
    order.push(nodes[node].0.clone());
    Ok(())
}
