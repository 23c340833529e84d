use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;
use target_model::prelude::TargetKind;

/// Dependency graph over targets. Edges point from a target to each
/// target it links against. Node and edge iteration use ordered maps so
/// every derived ordering is deterministic.
#[derive(Default)]
pub struct DependencyGraph {
    kinds: BTreeMap<String, TargetKind>,
    adjacency: BTreeMap<String, BTreeSet<String>>,
    shared_cache: Mutex<HashMap<String, BTreeSet<String>>>,
    transitive_cache: Mutex<HashMap<String, BTreeSet<String>>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_target(&mut self, name: &str, kind: TargetKind) {
        self.kinds.insert(name.to_string(), kind);
        self.adjacency.entry(name.to_string()).or_default();
    }

    pub fn add_edge(&mut self, from: &str, to: &str) {
        self.adjacency
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string());
        self.adjacency.entry(to.to_string()).or_default();
    }

    pub fn kind(&self, name: &str) -> Option<TargetKind> {
        self.kinds.get(name).copied()
    }

    pub fn direct_dependencies(&self, name: &str) -> impl Iterator<Item = &str> {
        self.adjacency
            .get(name)
            .into_iter()
            .flat_map(|deps| deps.iter().map(|s| s.as_str()))
    }

    /// Nodes reachable from `target` in post-order: every library appears
    /// before anything that depends on it. Link emission reverses this to
    /// put dependents first on the command line.
    pub fn topological_order_for_linking(&self, target: &str) -> Vec<String> {
        let mut order = Vec::new();
        let mut state: HashMap<&str, VisitState> = HashMap::new();
        self.post_order(target, &mut state, &mut order);
        order
    }

    fn post_order<'a>(
        &'a self,
        node: &'a str,
        state: &mut HashMap<&'a str, VisitState>,
        order: &mut Vec<String>,
    ) {
        match state.get(node) {
            Some(_) => return,
            None => state.insert(node, VisitState::Open),
        };

        if let Some(deps) = self.adjacency.get(node) {
            for dep in deps {
                self.post_order(dep, state, order);
            }
        }

        state.insert(node, VisitState::Done);
        order.push(node.to_string());
    }

    /// Reachable shared and module libraries, excluding `target` itself.
    /// Memoized per node.
    pub fn transitive_shared_libraries(&self, target: &str) -> BTreeSet<String> {
        {
            let cache = self.shared_cache.lock().expect("shared cache mutex");
            if let Some(cached) = cache.get(target) {
                return cached.clone();
            }
        }

        let result: BTreeSet<String> = self
            .reachable_from(target)
            .into_iter()
            .filter(|name| {
                matches!(
                    self.kinds.get(name),
                    Some(TargetKind::SharedLibrary) | Some(TargetKind::ModuleLibrary)
                )
            })
            .collect();

        self.shared_cache
            .lock()
            .expect("shared cache mutex")
            .insert(target.to_string(), result.clone());
        result
    }

    /// All reachable nodes regardless of kind, excluding `target` itself.
    /// Memoized per node.
    pub fn all_transitive_dependencies(&self, target: &str) -> BTreeSet<String> {
        {
            let cache = self.transitive_cache.lock().expect("transitive cache mutex");
            if let Some(cached) = cache.get(target) {
                return cached.clone();
            }
        }

        let result = self.reachable_from(target);

        self.transitive_cache
            .lock()
            .expect("transitive cache mutex")
            .insert(target.to_string(), result.clone());
        result
    }

    fn reachable_from(&self, target: &str) -> BTreeSet<String> {
        let mut visited = BTreeSet::new();
        let mut stack: Vec<&str> = vec![target];

        while let Some(current) = stack.pop() {
            if !visited.insert(current.to_string()) {
                continue;
            }
            if let Some(deps) = self.adjacency.get(current) {
                for dep in deps {
                    if !visited.contains(dep.as_str()) {
                        stack.push(dep);
                    }
                }
            }
        }

        visited.remove(target);
        visited
    }

    /// Find a dependency cycle, returned as the node sequence along the
    /// back edge (`a -> b -> a`). `None` means the graph is a DAG.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut state: HashMap<&str, VisitState> = HashMap::new();
        let mut stack: Vec<&str> = Vec::new();

        for node in self.adjacency.keys() {
            if !state.contains_key(node.as_str()) {
                if let Some(cycle) = self.cycle_dfs(node, &mut state, &mut stack) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn cycle_dfs<'a>(
        &'a self,
        node: &'a str,
        state: &mut HashMap<&'a str, VisitState>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        state.insert(node, VisitState::Open);
        stack.push(node);

        if let Some(deps) = self.adjacency.get(node) {
            for dep in deps {
                match state.get(dep.as_str()) {
                    Some(VisitState::Open) => {
                        // Back edge: slice the cycle out of the stack.
                        let start = stack.iter().position(|&n| n == dep).unwrap_or(0);
                        let mut cycle: Vec<String> =
                            stack[start..].iter().map(|s| s.to_string()).collect();
                        cycle.push(dep.to_string());
                        return Some(cycle);
                    }
                    Some(VisitState::Done) => {}
                    None => {
                        if let Some(cycle) = self.cycle_dfs(dep, state, stack) {
                            return Some(cycle);
                        }
                    }
                }
            }
        }

        stack.pop();
        state.insert(node, VisitState::Done);
        None
    }

    pub fn has_cycle(&self) -> bool {
        self.find_cycle().is_some()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum VisitState {
    Open,
    Done,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_graph() -> DependencyGraph {
        // app -> a -> b -> c
        let mut g = DependencyGraph::new();
        g.add_target("app", TargetKind::Executable);
        g.add_target("a", TargetKind::StaticLibrary);
        g.add_target("b", TargetKind::StaticLibrary);
        g.add_target("c", TargetKind::StaticLibrary);
        g.add_edge("app", "a");
        g.add_edge("a", "b");
        g.add_edge("b", "c");
        g
    }

    #[test]
    fn test_topological_order_dependencies_first() {
        let g = chain_graph();
        let order = g.topological_order_for_linking("app");
        assert_eq!(order, ["c", "b", "a", "app"]);
    }

    #[test]
    fn test_topological_order_restricted_to_reachable() {
        let mut g = chain_graph();
        g.add_target("unrelated", TargetKind::StaticLibrary);
        let order = g.topological_order_for_linking("a");
        assert_eq!(order, ["c", "b", "a"]);
    }

    #[test]
    fn test_transitive_shared_libraries() {
        let mut g = DependencyGraph::new();
        g.add_target("app", TargetKind::Executable);
        g.add_target("s1", TargetKind::SharedLibrary);
        g.add_target("s2", TargetKind::SharedLibrary);
        g.add_target("st", TargetKind::StaticLibrary);
        g.add_target("m", TargetKind::ModuleLibrary);
        g.add_edge("app", "s1");
        g.add_edge("s1", "s2");
        g.add_edge("app", "st");
        g.add_edge("st", "m");

        let shared = g.transitive_shared_libraries("app");
        assert_eq!(
            shared.iter().collect::<Vec<_>>(),
            ["m", "s1", "s2"]
        );

        // The target itself is never included even when it is shared.
        assert!(!g.transitive_shared_libraries("s1").contains("s1"));
    }

    #[test]
    fn test_all_transitive_dependencies() {
        let g = chain_graph();
        let deps = g.all_transitive_dependencies("app");
        assert_eq!(deps.iter().collect::<Vec<_>>(), ["a", "b", "c"]);
        assert!(g.all_transitive_dependencies("c").is_empty());
    }

    #[test]
    fn test_memoization_consistency() {
        let g = chain_graph();
        let first = g.all_transitive_dependencies("app");
        let second = g.all_transitive_dependencies("app");
        assert_eq!(first, second);
    }

    #[test]
    fn test_no_cycle_in_dag() {
        assert!(chain_graph().find_cycle().is_none());
    }

    #[test]
    fn test_cycle_detection_reports_path() {
        let mut g = chain_graph();
        g.add_edge("c", "a");

        let cycle = g.find_cycle().expect("cycle expected");
        // The path closes on itself.
        assert_eq!(cycle.first(), cycle.last());
        assert!(cycle.len() >= 3);
        assert!(g.has_cycle());
    }

    #[test]
    fn test_self_cycle() {
        let mut g = DependencyGraph::new();
        g.add_target("x", TargetKind::StaticLibrary);
        g.add_edge("x", "x");
        let cycle = g.find_cycle().unwrap();
        assert_eq!(cycle, ["x", "x"]);
    }
}
