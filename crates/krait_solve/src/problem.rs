//! Structured explanation of an unsatisfiable solve, and its user-friendly
//! rendering.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fmt::Formatter;
use std::rc::Rc;

use itertools::Itertools;
use petgraph::graph::{DiGraph, EdgeIndex, EdgeReference, NodeIndex};
use petgraph::visit::{DfsPostOrder, EdgeRef};
use petgraph::Direction;

use crate::{
    id::{ClauseId, MatchSpecId, SolvableId},
    pool::Pool,
    solver::clause::Clause,
    solver::Solver,
};

/// The cause of an unsatisfiable solve: the set of clauses involved in the
/// conflict. Use [`Problem::graph`] to organize them into conflict chains
/// rooted at the requested specs, or [`Problem::display_user_friendly`] to
/// render them.
#[derive(Debug, Default)]
pub struct Problem {
    clauses: Vec<ClauseId>,
}

impl Problem {
    pub(crate) fn add_clause(&mut self, clause_id: ClauseId) {
        if !self.clauses.contains(&clause_id) {
            self.clauses.push(clause_id);
        }
    }

    /// Builds the graph representation of the conflict: solvables as nodes,
    /// requirements and conflicts as edges, rooted at the root solvable.
    pub(crate) fn graph(&self, solver: &Solver<'_>) -> ProblemGraph {
        let mut graph = DiGraph::<ProblemNode, ProblemEdge>::default();
        let mut nodes: HashMap<SolvableId, NodeIndex> = HashMap::default();

        let root_node = Self::add_node(&mut graph, &mut nodes, SolvableId::root());
        let unresolved_node = graph.add_node(ProblemNode::UnresolvedDependency);

        for clause_id in &self.clauses {
            let clause = &solver.clauses[clause_id.index()];
            match clause.kind {
                Clause::InstallRoot => (),
                Clause::Learnt(..) => unreachable!("learnt clauses are expanded"),
                Clause::Requires(package_id, match_spec_id) => {
                    let package_node = Self::add_node(&mut graph, &mut nodes, package_id);

                    let candidates = solver.pool().sorted_candidates(match_spec_id);
                    if candidates.is_empty() {
                        graph.add_edge(
                            package_node,
                            unresolved_node,
                            ProblemEdge::Requires(match_spec_id),
                        );
                    } else {
                        for &candidate_id in candidates {
                            let candidate_node =
                                Self::add_node(&mut graph, &mut nodes, candidate_id);
                            graph.add_edge(
                                package_node,
                                candidate_node,
                                ProblemEdge::Requires(match_spec_id),
                            );
                        }
                    }
                }
                Clause::Lock(locked, forbidden) => {
                    let node2_id = Self::add_node(&mut graph, &mut nodes, forbidden);
                    let conflict = ConflictCause::Locked(locked);
                    graph.add_edge(root_node, node2_id, ProblemEdge::Conflict(conflict));
                }
                Clause::ForbidMultipleInstances(instance1_id, instance2_id) => {
                    let node1_id = Self::add_node(&mut graph, &mut nodes, instance1_id);
                    let node2_id = Self::add_node(&mut graph, &mut nodes, instance2_id);
                    graph.add_edge(
                        node1_id,
                        node2_id,
                        ProblemEdge::Conflict(ConflictCause::ForbidMultipleInstances),
                    );
                }
                Clause::Constrains(package_id, dep_id, match_spec_id) => {
                    let package_node = Self::add_node(&mut graph, &mut nodes, package_id);
                    let dep_node = Self::add_node(&mut graph, &mut nodes, dep_id);
                    graph.add_edge(
                        package_node,
                        dep_node,
                        ProblemEdge::Conflict(ConflictCause::Constrains(match_spec_id)),
                    );
                }
            }
        }

        let unresolved_node = if graph
            .edges_directed(unresolved_node, Direction::Incoming)
            .next()
            .is_none()
        {
            graph.remove_node(unresolved_node);
            None
        } else {
            Some(unresolved_node)
        };

        ProblemGraph {
            graph,
            root_node,
            unresolved_node,
        }
    }

    fn add_node(
        graph: &mut DiGraph<ProblemNode, ProblemEdge>,
        nodes: &mut HashMap<SolvableId, NodeIndex>,
        solvable_id: SolvableId,
    ) -> NodeIndex {
        *nodes
            .entry(solvable_id)
            .or_insert_with(|| graph.add_node(ProblemNode::Solvable(solvable_id)))
    }

    /// Renders the conflict as a human readable report.
    pub(crate) fn display_user_friendly<'a>(&self, solver: &'a Solver<'a>) -> DisplayUnsat<'a> {
        let graph = self.graph(solver);
        DisplayUnsat::new(graph, solver.pool())
    }
}

/// A node of the conflict graph.
#[derive(Copy, Clone, Eq, PartialEq)]
enum ProblemNode {
    /// A solvable.
    Solvable(SolvableId),

    /// The sink for dependencies without any candidate.
    UnresolvedDependency,
}

impl ProblemNode {
    fn solvable_id(self) -> SolvableId {
        match self {
            ProblemNode::Solvable(solvable_id) => solvable_id,
            ProblemNode::UnresolvedDependency => {
                panic!("expected a solvable node, found an unresolved dependency")
            }
        }
    }
}

/// An edge of the conflict graph.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
enum ProblemEdge {
    /// The target node is a candidate of the match spec.
    Requires(MatchSpecId),

    /// The target node is involved in a conflict.
    Conflict(ConflictCause),
}

impl ProblemEdge {
    fn try_requires(self) -> Option<MatchSpecId> {
        match self {
            ProblemEdge::Requires(match_spec_id) => Some(match_spec_id),
            ProblemEdge::Conflict(_) => None,
        }
    }

    fn requires(self) -> MatchSpecId {
        match self {
            ProblemEdge::Requires(match_spec_id) => match_spec_id,
            ProblemEdge::Conflict(_) => panic!("expected a requires edge, found a conflict"),
        }
    }
}

/// Why two nodes conflict.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
enum ConflictCause {
    /// The solvable is locked and no alternative may be chosen.
    Locked(SolvableId),

    /// The target is forbidden by a constrains spec.
    Constrains(MatchSpecId),

    /// Two candidates of the same name cannot both be installed.
    ForbidMultipleInstances,
}

/// A group of solvables that are displayed as one node because they have the
/// same name and identical relations.
struct MergedProblemNode {
    ids: Vec<SolvableId>,
}

/// Groups the outgoing requirement edges of a node by their match spec.
fn group_requirements(
    graph: &DiGraph<ProblemNode, ProblemEdge>,
    nx: NodeIndex,
) -> HashMap<MatchSpecId, Vec<NodeIndex>> {
    let mut dependencies: HashMap<MatchSpecId, Vec<NodeIndex>> = HashMap::new();
    for e in graph.edges_directed(nx, Direction::Outgoing) {
        match e.weight() {
            ProblemEdge::Requires(match_spec_id) => {
                dependencies.entry(*match_spec_id).or_default().push(e.target());
            }
            ProblemEdge::Conflict(_) => unreachable!("conflict edges are filtered out"),
        }
    }
    dependencies
}

/// The conflict graph of a [`Problem`].
pub(crate) struct ProblemGraph {
    graph: DiGraph<ProblemNode, ProblemEdge>,
    root_node: NodeIndex,
    unresolved_node: Option<NodeIndex>,
}

impl ProblemGraph {
    /// Finds groups of solvables that can be displayed as one: same name,
    /// same predecessors and successors, and not involved in a conflict.
    fn simplify(&self, pool: &Pool<'_>) -> HashMap<SolvableId, Rc<MergedProblemNode>> {
        let graph = &self.graph;

        let mut maybe_merge = HashMap::new();
        for node_id in graph.node_indices() {
            let candidate = match graph[node_id] {
                ProblemNode::UnresolvedDependency => continue,
                ProblemNode::Solvable(solvable_id) => {
                    if solvable_id.is_root() {
                        continue;
                    }
                    solvable_id
                }
            };

            if graph
                .edges_directed(node_id, Direction::Incoming)
                .any(|e| matches!(e.weight(), ProblemEdge::Conflict(..)))
            {
                // Conflict targets are never merged.
                continue;
            }

            let predecessors: Vec<_> = graph
                .edges_directed(node_id, Direction::Incoming)
                .map(|e| e.source())
                .sorted_unstable()
                .collect();
            let successors: Vec<_> = graph
                .edges(node_id)
                .map(|e| e.target())
                .sorted_unstable()
                .collect();

            let name = pool.resolve_solvable(candidate).name;

            maybe_merge
                .entry((name, predecessors, successors))
                .or_insert_with(Vec::new)
                .push((node_id, candidate));
        }

        let mut merged_candidates = HashMap::default();
        for mut merge_group in maybe_merge.into_values() {
            if merge_group.len() > 1 {
                merge_group
                    .sort_unstable_by_key(|&(_, id)| pool.resolve_solvable(id).record.version());
                let merged = Rc::new(MergedProblemNode {
                    ids: merge_group.into_iter().map(|(_, id)| id).collect(),
                });
                for &id in &merged.ids {
                    merged_candidates.insert(id, merged.clone());
                }
            }
        }

        merged_candidates
    }

    /// A node is installable when it has no outgoing conflicts and each of
    /// its requirements has at least one installable candidate.
    fn get_installable_set(&self) -> HashSet<NodeIndex> {
        let mut installable = HashSet::new();

        let mut dfs = DfsPostOrder::new(&self.graph, self.root_node);
        'outer_loop: while let Some(nx) = dfs.next(&self.graph) {
            if self.unresolved_node == Some(nx) {
                continue;
            }

            let outgoing_conflicts = self
                .graph
                .edges_directed(nx, Direction::Outgoing)
                .any(|e| matches!(e.weight(), ProblemEdge::Conflict(_)));
            if outgoing_conflicts {
                continue;
            }

            let dependencies = group_requirements(&self.graph, nx);

            for targets in dependencies.values() {
                if targets.iter().all(|target| !installable.contains(target)) {
                    // No installable candidate for this requirement.
                    continue 'outer_loop;
                }
            }

            installable.insert(nx);
        }

        installable
    }

    /// A node is missing when it only transitively depends on the
    /// unresolved-dependency sink.
    fn get_missing_set(&self) -> HashSet<NodeIndex> {
        let mut missing = HashSet::new();
        match self.unresolved_node {
            None => return missing,
            Some(nx) => missing.insert(nx),
        };

        let mut dfs = DfsPostOrder::new(&self.graph, self.root_node);
        while let Some(nx) = dfs.next(&self.graph) {
            let outgoing_conflicts = self
                .graph
                .edges_directed(nx, Direction::Outgoing)
                .any(|e| matches!(e.weight(), ProblemEdge::Conflict(_)));
            if outgoing_conflicts {
                continue;
            }

            let dependencies = group_requirements(&self.graph, nx);

            if dependencies
                .values()
                .any(|targets| targets.iter().all(|target| missing.contains(target)))
            {
                missing.insert(nx);
            }
        }

        missing
    }
}

/// A [`fmt::Display`] implementation that renders the conflict chains of a
/// problem graph as an indented tree.
pub struct DisplayUnsat<'pool> {
    graph: ProblemGraph,
    merged_candidates: HashMap<SolvableId, Rc<MergedProblemNode>>,
    installable_set: HashSet<NodeIndex>,
    missing_set: HashSet<NodeIndex>,
    pool: &'pool Pool<'pool>,
}

impl<'pool> DisplayUnsat<'pool> {
    pub(crate) fn new(graph: ProblemGraph, pool: &'pool Pool<'pool>) -> Self {
        let merged_candidates = graph.simplify(pool);
        let installable_set = graph.get_installable_set();
        let missing_set = graph.get_missing_set();

        Self {
            graph,
            merged_candidates,
            installable_set,
            missing_set,
            pool,
        }
    }

    fn get_indent(depth: usize, top_level_indent: bool) -> String {
        let depth_correction = if depth > 0 && !top_level_indent { 1 } else { 0 };

        let mut indent = " ".repeat((depth - depth_correction) * 4);

        let display_tree_char = depth != 0 || top_level_indent;
        if display_tree_char {
            indent.push_str("|-- ");
        }

        indent
    }

    fn fmt_graph(
        &self,
        f: &mut Formatter<'_>,
        top_level_edges: &[EdgeReference<'_, ProblemEdge>],
        top_level_indent: bool,
    ) -> fmt::Result {
        enum DisplayOp {
            Requirement(MatchSpecId, Vec<EdgeIndex>),
            Candidate(NodeIndex),
        }

        let graph = &self.graph.graph;
        let installable_nodes = &self.installable_set;
        let mut reported: HashSet<SolvableId> = HashSet::new();

        // Note: only requires edges are interesting at the top level.
        let mut requirements: Vec<(MatchSpecId, Vec<EdgeIndex>)> = Vec::new();
        for edge in top_level_edges
            .iter()
            .filter(|e| e.weight().try_requires().is_some())
        {
            let match_spec_id = edge.weight().requires();
            match requirements.iter_mut().find(|(id, _)| *id == match_spec_id) {
                Some((_, edges)) => edges.push(edge.id()),
                None => requirements.push((match_spec_id, vec![edge.id()])),
            }
        }
        requirements.sort_by_key(|(_match_spec_id, edges)| {
            edges
                .iter()
                .any(|&edge| installable_nodes.contains(&graph.edge_endpoints(edge).unwrap().1))
        });
        let mut stack = requirements
            .into_iter()
            .map(|(match_spec_id, edges)| (DisplayOp::Requirement(match_spec_id, edges), 0))
            .collect::<Vec<_>>();

        while let Some((node, depth)) = stack.pop() {
            let indent = Self::get_indent(depth, top_level_indent);

            match node {
                DisplayOp::Requirement(match_spec_id, edges) => {
                    debug_assert!(!edges.is_empty());

                    let installable = edges.iter().any(|&e| {
                        let (_, target) = graph.edge_endpoints(e).unwrap();
                        installable_nodes.contains(&target)
                    });

                    let req = self.pool.resolve_match_spec(match_spec_id).to_string();
                    let target_nx = graph.edge_endpoints(edges[0]).unwrap().1;
                    let missing =
                        edges.len() == 1 && graph[target_nx] == ProblemNode::UnresolvedDependency;
                    if missing {
                        // No candidates for the requirement at all.
                        if depth == 0 {
                            writeln!(f, "{indent}No candidates were found for {req}.")?;
                        } else {
                            writeln!(f, "{indent}{req}, for which no candidates were found.")?;
                        }
                    } else if installable {
                        // Installable options only get mentioned at the top
                        // level.
                        if depth == 0 {
                            writeln!(
                                f,
                                "{indent}{req} can be installed with any of the following options:"
                            )?;
                        } else {
                            writeln!(
                                f,
                                "{indent}{req}, which can be installed with any of the following options:"
                            )?;
                        }

                        stack.extend(
                            edges
                                .iter()
                                .filter(|&&e| {
                                    installable_nodes.contains(&graph.edge_endpoints(e).unwrap().1)
                                })
                                .map(|&e| {
                                    (
                                        DisplayOp::Candidate(graph.edge_endpoints(e).unwrap().1),
                                        depth + 1,
                                    )
                                }),
                        );
                    } else {
                        if depth == 0 {
                            writeln!(
                                f,
                                "{indent}{req} cannot be installed because there are no viable options:"
                            )?;
                        } else {
                            writeln!(
                                f,
                                "{indent}{req}, which cannot be installed because there are no viable options:"
                            )?;
                        }

                        stack.extend(edges.iter().map(|&e| {
                            (
                                DisplayOp::Candidate(graph.edge_endpoints(e).unwrap().1),
                                depth + 1,
                            )
                        }));
                    }
                }
                DisplayOp::Candidate(candidate) => {
                    let solvable_id = graph[candidate].solvable_id();

                    if reported.contains(&solvable_id) {
                        continue;
                    }

                    let solvable = self.pool.resolve_solvable(solvable_id);
                    let name = solvable.record.name();
                    let version = if let Some(merged) = self.merged_candidates.get(&solvable_id) {
                        reported.extend(merged.ids.iter().copied());
                        merged
                            .ids
                            .iter()
                            .map(|&id| self.pool.resolve_solvable(id).record.version().to_string())
                            .join(" | ")
                    } else {
                        solvable.record.version().to_string()
                    };

                    let already_installed = graph.edges(candidate).any(|e| {
                        e.weight() == &ProblemEdge::Conflict(ConflictCause::ForbidMultipleInstances)
                    });
                    let constrains_conflict = graph.edges(candidate).any(|e| {
                        matches!(
                            e.weight(),
                            ProblemEdge::Conflict(ConflictCause::Constrains(_))
                        )
                    });
                    let is_leaf = graph.edges(candidate).next().is_none();

                    if is_leaf {
                        writeln!(f, "{indent}{name} {version}")?;
                    } else if already_installed {
                        writeln!(
                            f,
                            "{indent}{name} {version}, which conflicts with the versions reported above."
                        )?;
                    } else if constrains_conflict {
                        let match_specs = graph
                            .edges(candidate)
                            .filter_map(|e| match e.weight() {
                                ProblemEdge::Conflict(ConflictCause::Constrains(
                                    match_spec_id,
                                )) => Some(match_spec_id),
                                _ => None,
                            })
                            .dedup();

                        writeln!(f, "{indent}{name} {version} would constrain")?;

                        let indent = Self::get_indent(depth + 1, top_level_indent);
                        for &match_spec_id in match_specs {
                            let match_spec = self.pool.resolve_match_spec(match_spec_id);
                            writeln!(
                                f,
                                "{indent}{match_spec}, which conflicts with any installable versions previously reported"
                            )?;
                        }
                    } else {
                        writeln!(f, "{indent}{name} {version} would require")?;
                        let mut requirements: Vec<(MatchSpecId, Vec<EdgeIndex>)> = Vec::new();
                        for edge in graph.edges(candidate) {
                            let match_spec_id = edge.weight().requires();
                            match requirements
                                .iter_mut()
                                .find(|(id, _)| *id == match_spec_id)
                            {
                                Some((_, edges)) => edges.push(edge.id()),
                                None => requirements.push((match_spec_id, vec![edge.id()])),
                            }
                        }
                        requirements.sort_by_key(|(_match_spec_id, edges)| {
                            edges.iter().any(|&edge| {
                                installable_nodes.contains(&graph.edge_endpoints(edge).unwrap().1)
                            })
                        });

                        stack.extend(requirements.into_iter().map(|(match_spec_id, edges)| {
                            (DisplayOp::Requirement(match_spec_id, edges), depth + 1)
                        }));
                    }
                }
            }
        }

        Ok(())
    }
}

impl fmt::Display for DisplayUnsat<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let (top_level_missing, top_level_conflicts): (Vec<_>, Vec<_>) = self
            .graph
            .graph
            .edges(self.graph.root_node)
            .partition(|e| self.missing_set.contains(&e.target()));

        if !top_level_missing.is_empty() {
            self.fmt_graph(f, &top_level_missing, false)?;
        }

        if !top_level_conflicts.is_empty() {
            writeln!(f, "The following packages are incompatible")?;
            self.fmt_graph(f, &top_level_conflicts, true)?;

            // Conflicts caused by locked dependencies.
            let indent = Self::get_indent(0, true);
            for e in self.graph.graph.edges(self.graph.root_node) {
                let conflict = match e.weight() {
                    ProblemEdge::Requires(_) => continue,
                    ProblemEdge::Conflict(conflict) => conflict,
                };

                // Root level conflicts are locked solvables and violated
                // pins.
                match conflict {
                    &ConflictCause::Locked(locked_id) => {
                        let locked = self.pool.resolve_solvable(locked_id);
                        writeln!(
                            f,
                            "{indent}{} {} is locked, but another version is required as reported above",
                            locked.record.name(),
                            locked.record.version(),
                        )?;
                    }
                    &ConflictCause::Constrains(match_spec_id) => {
                        let pinned = self.pool.resolve_match_spec(match_spec_id);
                        writeln!(
                            f,
                            "{indent}{pinned} is pinned, but another version is required as reported above",
                        )?;
                    }
                    ConflictCause::ForbidMultipleInstances => unreachable!(),
                }
            }
        }

        Ok(())
    }
}
