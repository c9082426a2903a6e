//! Module graph construction.
//!
//! Resolves public, private, and dynamic dependency edges from the root
//! modules outward, enforcing scope containment and the circular-edge
//! whitelist. The resulting graph is immutable and provides the
//! deterministic traversal orders the planner relies on.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::BuildError;
use crate::rules::assembly::RulesAssembly;
use crate::rules::module::{create_module, ModuleRules};
use crate::rules::target::TargetRules;
use crate::util::InternedString;

/// How one module depends on another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyKind {
    Public,
    Private,
    /// Loaded at runtime; no link-time edge, still ordered.
    Dynamic,
}

/// The resolved module graph for one target.
#[derive(Debug)]
pub struct ModuleGraph {
    modules: BTreeMap<InternedString, Arc<ModuleRules>>,
    graph: DiGraph<InternedString, DependencyKind>,
    nodes: HashMap<InternedString, NodeIndex>,
    /// Whitelisted circular edges, kept out of the ordering graph.
    circular_edges: BTreeSet<(InternedString, InternedString)>,
}

impl ModuleGraph {
    /// Build the graph from the target's root modules.
    pub fn build(
        assembly: &Arc<RulesAssembly>,
        target: &TargetRules,
    ) -> Result<ModuleGraph, BuildError> {
        let mut builder = GraphBuilder {
            assembly,
            target,
            modules: BTreeMap::new(),
            graph: DiGraph::new(),
            nodes: HashMap::new(),
            circular_edges: BTreeSet::new(),
        };

        let mut roots: Vec<InternedString> = target.modules.clone();
        if target.args.all_modules {
            roots.extend(assembly.module_names().map(InternedString::new));
        }

        for root in roots {
            let mut chain = Vec::new();
            builder.load(root, &mut chain)?;
        }

        let resolved = ModuleGraph {
            modules: builder.modules,
            graph: builder.graph,
            nodes: builder.nodes,
            circular_edges: builder.circular_edges,
        };
        resolved.check_cycles()?;
        Ok(resolved)
    }

    pub fn module(&self, name: InternedString) -> Option<&Arc<ModuleRules>> {
        self.modules.get(&name)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Modules in name order.
    pub fn modules(&self) -> impl Iterator<Item = &Arc<ModuleRules>> {
        self.modules.values()
    }

    /// Whether a whitelisted circular edge exists from `from` to `to`.
    pub fn is_circular_edge(&self, from: InternedString, to: InternedString) -> bool {
        self.circular_edges.contains(&(from, to))
    }

    /// Direct dependencies of a module, declaration order: public, then
    /// private, then dynamic. Whitelisted circular edges are included.
    pub fn direct_dependencies(&self, name: InternedString) -> Vec<InternedString> {
        let Some(module) = self.modules.get(&name) else {
            return Vec::new();
        };
        let mut deps = Vec::new();
        for dep in module
            .public_dependencies
            .iter()
            .chain(module.private_dependencies.iter())
            .chain(module.dynamic_dependencies.iter())
        {
            if !deps.contains(dep) {
                deps.push(*dep);
            }
        }
        deps
    }

    /// Transitive closure over all dependency kinds, excluding `name`
    /// itself. Whitelisted cycles are tolerated via the visited set.
    pub fn transitive_dependencies(&self, name: InternedString) -> BTreeSet<InternedString> {
        let mut visited = BTreeSet::new();
        let mut stack = self.direct_dependencies(name);
        while let Some(current) = stack.pop() {
            if current != name && visited.insert(current) {
                stack.extend(self.direct_dependencies(current));
            }
        }
        visited
    }

    /// Modules in dependency-before-dependent order, alphabetic on ties.
    pub fn topological_order(&self) -> Vec<InternedString> {
        // Kahn's algorithm over the acyclic edge set with an ordered
        // frontier: the alphabetic tie-break is contractual.
        let mut indegree: BTreeMap<InternedString, usize> =
            self.modules.keys().map(|name| (*name, 0)).collect();
        for edge in self.graph.edge_indices() {
            let (from, _to) = self.graph.edge_endpoints(edge).unwrap();
            // Edge points dependent -> dependency; the dependent waits.
            let dependent = self.graph[from];
            *indegree.get_mut(&dependent).unwrap() += 1;
        }

        let mut ready: BTreeSet<InternedString> = indegree
            .iter()
            .filter(|(_, &count)| count == 0)
            .map(|(name, _)| *name)
            .collect();
        let mut order = Vec::with_capacity(self.modules.len());

        while let Some(next) = ready.iter().next().copied() {
            ready.remove(&next);
            order.push(next);

            let node = self.nodes[&next];
            for dependent in self
                .graph
                .neighbors_directed(node, petgraph::Direction::Incoming)
            {
                let dependent_name = self.graph[dependent];
                let count = indegree.get_mut(&dependent_name).unwrap();
                *count -= 1;
                if *count == 0 {
                    ready.insert(dependent_name);
                }
            }
        }

        order
    }

    /// Verify every strongly-connected cycle is fully whitelisted,
    /// reporting the first offending chain otherwise.
    fn check_cycles(&self) -> Result<(), BuildError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            InProgress,
            Done,
        }

        let mut marks: HashMap<InternedString, Mark> = HashMap::new();
        let mut path: Vec<InternedString> = Vec::new();

        // DFS with an explicit path so the offending chain can be
        // reported verbatim.
        fn visit(
            graph: &ModuleGraph,
            name: InternedString,
            marks: &mut HashMap<InternedString, Mark>,
            path: &mut Vec<InternedString>,
        ) -> Result<(), BuildError> {
            match marks.get(&name) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::InProgress) => {
                    let start = path.iter().position(|n| *n == name).unwrap_or(0);
                    let mut chain: Vec<String> =
                        path[start..].iter().map(|n| n.to_string()).collect();
                    chain.push(name.to_string());
                    return Err(BuildError::graph(
                        format!("circular dependency on `{name}`"),
                        chain,
                    ));
                }
                None => {}
            }

            marks.insert(name, Mark::InProgress);
            path.push(name);
            for dep in graph.direct_dependencies(name) {
                if graph.is_circular_edge(name, dep) {
                    continue;
                }
                if graph.modules.contains_key(&dep) {
                    visit(graph, dep, marks, path)?;
                }
            }
            path.pop();
            marks.insert(name, Mark::Done);
            Ok(())
        }

        let names: Vec<InternedString> = self.modules.keys().copied().collect();
        for name in names {
            visit(self, name, &mut marks, &mut path)?;
        }
        Ok(())
    }
}

struct GraphBuilder<'a> {
    assembly: &'a Arc<RulesAssembly>,
    target: &'a TargetRules,
    modules: BTreeMap<InternedString, Arc<ModuleRules>>,
    graph: DiGraph<InternedString, DependencyKind>,
    nodes: HashMap<InternedString, NodeIndex>,
    circular_edges: BTreeSet<(InternedString, InternedString)>,
}

impl GraphBuilder<'_> {
    fn load(
        &mut self,
        name: InternedString,
        chain: &mut Vec<String>,
    ) -> Result<NodeIndex, BuildError> {
        if let Some(&node) = self.nodes.get(&name) {
            return Ok(node);
        }

        let module = Arc::new(create_module(
            self.assembly,
            name.as_str(),
            self.target,
            chain,
        )?);

        let node = self.graph.add_node(name);
        self.nodes.insert(name, node);
        self.modules.insert(name, module.clone());

        chain.push(name.to_string());

        let edges: Vec<(InternedString, DependencyKind)> = module
            .public_dependencies
            .iter()
            .map(|d| (*d, DependencyKind::Public))
            .chain(
                module
                    .private_dependencies
                    .iter()
                    .map(|d| (*d, DependencyKind::Private)),
            )
            .chain(
                module
                    .dynamic_dependencies
                    .iter()
                    .map(|d| (*d, DependencyKind::Dynamic)),
            )
            .collect();

        for (dep_name, kind) in edges {
            if dep_name == name {
                chain.pop();
                return Err(BuildError::graph(
                    format!("module `{name}` depends on itself"),
                    vec![name.to_string(), name.to_string()],
                ));
            }

            let whitelisted = module.circular_dependencies.contains(&dep_name);
            if whitelisted {
                // Keep the edge out of the ordering graph; the module
                // still resolves so its rules load.
                self.circular_edges.insert((name, dep_name));
            }

            let dep_node = self.load(dep_name, chain)?;
            let dep_module = &self.modules[&dep_name];

            // Scope containment: a rule may only reference rules in an
            // equal-or-ancestor scope.
            if !module.context.scope.contains(&dep_module.context.scope) {
                chain.pop();
                let mut reference_chain = chain.clone();
                reference_chain.push(name.to_string());
                reference_chain.push(dep_name.to_string());
                return Err(BuildError::graph(
                    format!(
                        "module `{name}` (scope {}) may not reference `{dep_name}` (scope {})",
                        module.context.scope, dep_module.context.scope
                    ),
                    reference_chain,
                ));
            }

            if !whitelisted {
                self.graph.add_edge(node, dep_node, kind);
            }
        }

        chain.pop();
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::assembly::{compile_assembly, AssemblyCompileOptions};
    use crate::rules::context::ModuleRulesContext;
    use crate::rules::scanner::RulesScanner;
    use crate::rules::scope::RulesScope;
    use crate::rules::target::create_target;
    use crate::rules::types::{TargetArchitecture, TargetConfiguration, TargetPlatform};
    use crate::session::BuildArguments;
    use std::fs;
    use tempfile::TempDir;

    fn build_graph(
        rules: &[(&str, &str)],
        target_text: &str,
    ) -> Result<ModuleGraph, BuildError> {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("Source");
        for (rel, text) in rules {
            let path = root.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, text).unwrap();
        }
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("TestGame.target.toml"), target_text).unwrap();

        let scanner = RulesScanner::new();
        let scanned = (*scanner.scan_root(&root).unwrap()).clone();
        let options = AssemblyCompileOptions {
            name: InternedString::new("Engine"),
            context: ModuleRulesContext::new(RulesScope::engine(), tmp.path().join("Intermediate")),
            output_dir: tmp.path().join("Intermediate/Build/BuildRules"),
            engine_version: "5.0.0".to_string(),
            parent: None,
            installed: false,
            skip_staleness_check: false,
        };
        let assembly = compile_assembly(&options, &scanned).unwrap();
        let target = create_target(
            &assembly,
            "TestGame",
            TargetPlatform::Linux,
            TargetConfiguration::Development,
            TargetArchitecture::X64,
            None,
            &BuildArguments::default(),
            false,
        )
        .unwrap();
        ModuleGraph::build(&assembly, &target)
    }

    #[test]
    fn test_linear_chain_resolves_in_order() {
        let graph = build_graph(
            &[
                ("App/App.build.toml", "public_dependencies = [\"Mid\"]"),
                ("Mid/Mid.build.toml", "public_dependencies = [\"Base\"]"),
                ("Base/Base.build.toml", ""),
            ],
            "type = \"Game\"\nmodules = [\"App\"]",
        )
        .unwrap();

        assert_eq!(graph.len(), 3);
        let order: Vec<&str> = graph
            .topological_order()
            .iter()
            .map(|n| n.as_str())
            .collect();
        assert_eq!(order, vec!["Base", "Mid", "App"]);
    }

    #[test]
    fn test_topological_tie_break_is_alphabetic() {
        let graph = build_graph(
            &[
                ("App/App.build.toml", "public_dependencies = [\"Zeta\", \"Alpha\"]"),
                ("Zeta/Zeta.build.toml", ""),
                ("Alpha/Alpha.build.toml", ""),
            ],
            "type = \"Game\"\nmodules = [\"App\"]",
        )
        .unwrap();

        let order: Vec<&str> = graph
            .topological_order()
            .iter()
            .map(|n| n.as_str())
            .collect();
        assert_eq!(order, vec!["Alpha", "Zeta", "App"]);
    }

    #[test]
    fn test_unwhitelisted_cycle_names_the_chain() {
        let err = build_graph(
            &[
                ("A/A.build.toml", "public_dependencies = [\"B\"]"),
                ("B/B.build.toml", "public_dependencies = [\"A\"]"),
            ],
            "type = \"Game\"\nmodules = [\"A\"]",
        )
        .unwrap_err();

        assert_eq!(err.exit_code(), 2);
        assert_eq!(err.reference_chain().unwrap(), "A -> B -> A");
    }

    #[test]
    fn test_whitelisted_cycle_is_tolerated() {
        let graph = build_graph(
            &[
                ("A/A.build.toml", "public_dependencies = [\"B\"]"),
                (
                    "B/B.build.toml",
                    "public_dependencies = [\"A\"]\ncircular_dependencies = [\"A\"]",
                ),
            ],
            "type = \"Game\"\nmodules = [\"A\"]",
        )
        .unwrap();

        assert_eq!(graph.len(), 2);
        assert!(graph.is_circular_edge(
            InternedString::new("B"),
            InternedString::new("A")
        ));
        // The ordering graph stays acyclic: A after B.
        let order: Vec<&str> = graph
            .topological_order()
            .iter()
            .map(|n| n.as_str())
            .collect();
        assert_eq!(order, vec!["B", "A"]);
    }

    #[test]
    fn test_transitive_dependencies() {
        let graph = build_graph(
            &[
                ("App/App.build.toml", "public_dependencies = [\"Mid\"]"),
                (
                    "Mid/Mid.build.toml",
                    "public_dependencies = [\"Base\"]\nprivate_dependencies = [\"Util\"]",
                ),
                ("Base/Base.build.toml", ""),
                ("Util/Util.build.toml", ""),
            ],
            "type = \"Game\"\nmodules = [\"App\"]",
        )
        .unwrap();

        let closure = graph.transitive_dependencies(InternedString::new("App"));
        let names: Vec<&str> = closure.iter().map(|n| n.as_str()).collect();
        assert_eq!(names, vec!["Base", "Mid", "Util"]);
    }

    #[test]
    fn test_self_dependency_is_fatal() {
        let err = build_graph(
            &[("A/A.build.toml", "public_dependencies = [\"A\"]")],
            "type = \"Game\"\nmodules = [\"A\"]",
        )
        .unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
