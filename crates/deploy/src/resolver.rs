//! Dependency resolution: transitive closure, cycle detection and a deterministic
//! topological order.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use derive_more::{Deref, From};

use crate::{ResolveError, UnitRegistry};

/// The ordered unit names a run executes.
///
/// Every unit appears after all of its requirements. Among units that are ready
/// at the same time, the one declared first comes first, so the same registry and
/// request always produce the same plan.
///
/// A plan built by hand with `From` is executed as given.
#[derive(Debug, Clone, PartialEq, Eq, Deref, From)]
pub struct ExecutionPlan(Vec<String>);

impl ExecutionPlan {
    pub fn units(&self) -> &[String] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<String> {
        self.0
    }
}

/// Resolve the execution order for `requested` and everything it transitively
/// requires.
///
/// The whole registry must be acyclic and every requirement must be registered,
/// even for units outside the request.
pub fn resolve(registry: &UnitRegistry, requested: &[String]) -> Result<ExecutionPlan, ResolveError> {
    let roots = requested
        .iter()
        .map(|name| {
            registry
                .position(name)
                .ok_or_else(|| ResolveError::UnknownUnit(name.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let graph = requirement_graph(registry)?;

    if let Some(found) = find_cycle(registry, &graph) {
        let cycle = shortest_cycle(&graph).unwrap_or(found);
        let names: Vec<String> = cycle
            .into_iter()
            .map(|idx| registry.by_position(idx).name.clone())
            .collect();
        tracing::error!(cycle = ?names, "Dependency cycle detected");
        return Err(ResolveError::CyclicDependency(names));
    }

    let closure = closure(&graph, roots);
    let order = topological_order(registry, &closure);
    tracing::debug!(order = ?order, "Resolved execution order");
    Ok(ExecutionPlan(order))
}

/// Requirement positions of the unit at `idx`, in declaration order.
fn requirement_positions(registry: &UnitRegistry, idx: usize) -> Result<Vec<usize>, ResolveError> {
    let unit = registry.by_position(idx);
    let mut positions = unit
        .requirements()
        .into_iter()
        .map(|name| {
            registry.position(name).ok_or_else(|| {
                tracing::error!(unit = %unit.name, missing = %name, "Unit requires an unknown unit");
                ResolveError::UnknownUnit(name.to_string())
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    positions.sort_unstable();
    Ok(positions)
}

/// Requirement lists of every registered unit, keyed by declaration position.
fn requirement_graph(registry: &UnitRegistry) -> Result<BTreeMap<usize, Vec<usize>>, ResolveError> {
    (0..registry.len())
        .map(|idx| Ok((idx, requirement_positions(registry, idx)?)))
        .collect()
}

/// Restrict the graph to `roots` and everything they transitively require.
fn closure(graph: &BTreeMap<usize, Vec<usize>>, roots: Vec<usize>) -> BTreeMap<usize, Vec<usize>> {
    let mut edges: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    let mut stack = roots;

    while let Some(idx) = stack.pop() {
        if edges.contains_key(&idx) {
            continue;
        }
        let reqs = graph.get(&idx).cloned().unwrap_or_default();
        stack.extend(reqs.iter().copied().filter(|r| !edges.contains_key(r)));
        edges.insert(idx, reqs);
    }

    edges
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Depth-first search over requirement edges. Returns the first cycle found, as
/// positions where each unit requires the next and the last requires the first.
fn find_cycle(registry: &UnitRegistry, edges: &BTreeMap<usize, Vec<usize>>) -> Option<Vec<usize>> {
    let mut marks: BTreeMap<usize, Mark> = edges.keys().map(|&idx| (idx, Mark::Unvisited)).collect();

    for &root in edges.keys() {
        if marks[&root] != Mark::Unvisited {
            continue;
        }

        // Explicit stack of (node, next edge to explore) keeps deep graphs off the call stack.
        let mut path: Vec<usize> = vec![root];
        let mut cursor: Vec<usize> = vec![0];
        marks.insert(root, Mark::InProgress);

        while let Some(&node) = path.last() {
            let depth = path.len() - 1;
            let next = edges[&node].get(cursor[depth]).copied();
            cursor[depth] += 1;

            match next {
                Some(req) => match marks[&req] {
                    Mark::Unvisited => {
                        marks.insert(req, Mark::InProgress);
                        path.push(req);
                        cursor.push(0);
                    }
                    Mark::InProgress => {
                        let start = path.iter().position(|&p| p == req).unwrap_or(0);
                        let cycle = path[start..].to_vec();
                        tracing::trace!(
                            cycle = ?cycle.iter().map(|&i| registry.by_position(i).name.as_str()).collect::<Vec<_>>(),
                            "Back edge found"
                        );
                        return Some(cycle);
                    }
                    Mark::Done => {}
                },
                None => {
                    marks.insert(node, Mark::Done);
                    path.pop();
                    cursor.pop();
                }
            }
        }
    }

    None
}

/// Shortest cycle of the graph, listed from its earliest declared unit.
///
/// Only called once a cycle is known to exist. Registries are small, so a BFS
/// from every unit is cheap.
fn shortest_cycle(edges: &BTreeMap<usize, Vec<usize>>) -> Option<Vec<usize>> {
    let mut best: Option<Vec<usize>> = None;
    for &start in edges.keys() {
        if let Some(cycle) = shortest_cycle_through(edges, start) {
            if best.as_ref().is_none_or(|b| cycle.len() < b.len()) {
                best = Some(cycle);
            }
        }
    }
    best
}

/// BFS from `start` back to itself over requirement edges.
fn shortest_cycle_through(edges: &BTreeMap<usize, Vec<usize>>, start: usize) -> Option<Vec<usize>> {
    let mut parent: BTreeMap<usize, usize> = BTreeMap::new();
    let mut queue = VecDeque::from([start]);

    while let Some(node) = queue.pop_front() {
        for &next in edges.get(&node).into_iter().flatten() {
            if next == start {
                let mut cycle = vec![node];
                let mut current = node;
                while let Some(&prev) = parent.get(&current) {
                    cycle.push(prev);
                    current = prev;
                }
                cycle.reverse();
                return Some(cycle);
            }
            if !parent.contains_key(&next) {
                parent.insert(next, node);
                queue.push_back(next);
            }
        }
    }

    None
}

/// Kahn's algorithm with the ready set ordered by declaration position.
fn topological_order(registry: &UnitRegistry, edges: &BTreeMap<usize, Vec<usize>>) -> Vec<String> {
    let mut pending: BTreeMap<usize, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<usize, Vec<usize>> = BTreeMap::new();

    for (&idx, reqs) in edges {
        pending.insert(idx, reqs.len());
        for &req in reqs {
            dependents.entry(req).or_default().push(idx);
        }
    }

    let mut ready: BTreeSet<usize> = pending
        .iter()
        .filter(|&(_, &count)| count == 0)
        .map(|(&idx, _)| idx)
        .collect();

    let mut order = Vec::with_capacity(edges.len());
    while let Some(idx) = ready.pop_first() {
        order.push(registry.by_position(idx).name.clone());
        for dependent in dependents.get(&idx).into_iter().flatten() {
            if let Some(count) = pending.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(*dependent);
                }
            }
        }
    }

    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Arg, Selection, Unit};

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn assert_respects_requirements(registry: &UnitRegistry, plan: &ExecutionPlan) {
        for (pos, name) in plan.iter().enumerate() {
            let unit = registry.get(name).unwrap();
            for req in unit.requirements() {
                let req_pos = plan.iter().position(|n| n == req).unwrap();
                assert!(req_pos < pos, "{} must run before {}", req, name);
            }
        }
    }

    #[test]
    fn test_selection_closure_pulls_in_chain() {
        let registry = UnitRegistry::from_units([
            Unit::deploy("Unrelated"),
            Unit::deploy("C").depends_on("B"),
            Unit::deploy("B").depends_on("A"),
            Unit::deploy("A"),
        ])
        .unwrap();

        let plan = resolve(&registry, &names(&["C"])).unwrap();
        assert_eq!(plan.units(), names(&["A", "B", "C"]).as_slice());
    }

    #[test]
    fn test_ties_broken_by_declaration_order() {
        let registry = UnitRegistry::from_units([
            Unit::deploy("ASTOToken"),
            Unit::deploy("LPToken"),
            Unit::deploy("Controller").arg(Arg::account("deployer")),
            Unit::deploy("ASTOStorage")
                .contract("StakingStorage")
                .arg(Arg::unit("Controller")),
            Unit::deploy("LPStorage")
                .contract("StakingStorage")
                .arg(Arg::unit("Controller")),
            Unit::deploy("Staking").arg(Arg::unit("Controller")),
        ])
        .unwrap();

        let requested = Selection::all().select(&registry).unwrap();
        let plan = resolve(&registry, &requested).unwrap();
        assert_eq!(
            plan.units(),
            names(&[
                "ASTOToken",
                "LPToken",
                "Controller",
                "ASTOStorage",
                "LPStorage",
                "Staking"
            ])
            .as_slice()
        );
    }

    #[test]
    fn test_dependency_declared_later_runs_first() {
        let registry = UnitRegistry::from_units([
            Unit::deploy("Staking").arg(Arg::unit("Controller")),
            Unit::deploy("Token"),
            Unit::deploy("Controller"),
        ])
        .unwrap();

        let requested = Selection::all().select(&registry).unwrap();
        let plan = resolve(&registry, &requested).unwrap();
        assert_eq!(plan.units(), names(&["Token", "Controller", "Staking"]).as_slice());
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let registry = UnitRegistry::from_units([
            Unit::deploy("E").depends_on("B").depends_on("D"),
            Unit::deploy("D").depends_on("A"),
            Unit::deploy("C"),
            Unit::deploy("B").depends_on("A").depends_on("C"),
            Unit::deploy("A"),
        ])
        .unwrap();

        let requested = names(&["E"]);
        let first = resolve(&registry, &requested).unwrap();
        for _ in 0..20 {
            assert_eq!(resolve(&registry, &requested).unwrap(), first);
        }
        assert_respects_requirements(&registry, &first);
        assert_eq!(first.units(), names(&["C", "A", "D", "B", "E"]).as_slice());
    }

    #[test]
    fn test_example_scenario() {
        let registry = UnitRegistry::from_units([
            Unit::deploy("Token"),
            Unit::deploy("Storage").arg(Arg::unit("Controller")),
            Unit::deploy("Controller"),
            Unit::call("Init", "Controller", "init")
                .args([Arg::unit("Token"), Arg::unit("Storage")])
                .depends_on("Token")
                .depends_on("Storage")
                .depends_on("Controller"),
        ])
        .unwrap();

        let plan = resolve(&registry, &names(&["Init"])).unwrap();
        assert_eq!(plan.units(), names(&["Token", "Controller", "Storage", "Init"]).as_slice());
        assert_respects_requirements(&registry, &plan);
    }

    #[test]
    fn test_unknown_dependency() {
        let registry = UnitRegistry::from_units([
            Unit::deploy("Staking").depends_on("Controller"),
        ])
        .unwrap();

        let err = resolve(&registry, &names(&["Staking"])).unwrap_err();
        assert_eq!(err, ResolveError::UnknownUnit("Controller".to_string()));
    }

    #[test]
    fn test_unknown_request() {
        let registry = UnitRegistry::new();
        let err = resolve(&registry, &names(&["Staking"])).unwrap_err();
        assert_eq!(err, ResolveError::UnknownUnit("Staking".to_string()));
    }

    #[test]
    fn test_two_unit_cycle() {
        let registry = UnitRegistry::from_units([
            Unit::deploy("Controller").arg(Arg::unit("Storage")),
            Unit::deploy("Storage").arg(Arg::unit("Controller")),
        ])
        .unwrap();

        let err = resolve(&registry, &names(&["Controller"])).unwrap_err();
        assert_eq!(err, ResolveError::CyclicDependency(names(&["Controller", "Storage"])));
    }

    #[test]
    fn test_cycle_reported_without_its_tail() {
        let registry = UnitRegistry::from_units([
            Unit::deploy("Root").depends_on("A"),
            Unit::deploy("A").depends_on("B"),
            Unit::deploy("B").depends_on("C"),
            Unit::deploy("C").depends_on("A"),
        ])
        .unwrap();

        let err = resolve(&registry, &names(&["Root"])).unwrap_err();
        assert_eq!(err, ResolveError::CyclicDependency(names(&["A", "B", "C"])));
    }

    #[test]
    fn test_cycle_outside_request_is_rejected() {
        let registry = UnitRegistry::from_units([
            Unit::deploy("Token"),
            Unit::deploy("X").depends_on("Y"),
            Unit::deploy("Y").depends_on("X"),
        ])
        .unwrap();

        let err = resolve(&registry, &names(&["Token"])).unwrap_err();
        assert_eq!(err, ResolveError::CyclicDependency(names(&["X", "Y"])));
    }

    #[test]
    fn test_unknown_requirement_outside_request() {
        let registry = UnitRegistry::from_units([
            Unit::deploy("Token"),
            Unit::deploy("Staking").depends_on("Controller"),
        ])
        .unwrap();

        let err = resolve(&registry, &names(&["Token"])).unwrap_err();
        assert_eq!(err, ResolveError::UnknownUnit("Controller".to_string()));
    }

    #[test]
    fn test_shortest_cycle_reported() {
        let registry = UnitRegistry::from_units([
            Unit::deploy("A").depends_on("B"),
            Unit::deploy("B").depends_on("C"),
            Unit::deploy("C").depends_on("A").depends_on("B"),
        ])
        .unwrap();

        let err = resolve(&registry, &names(&["A"])).unwrap_err();
        assert_eq!(err, ResolveError::CyclicDependency(names(&["B", "C"])));
    }
}
