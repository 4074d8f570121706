pub(crate) mod clause;
mod decision;
mod decision_map;
mod decision_tracker;
mod watch_map;

use std::collections::HashSet;

use fxhash::FxHashMap;
use itertools::Itertools;

use crate::{
    arena::{Arena, ArenaId},
    id::{ClauseId, LearntClauseId, MatchSpecId, NameId, SolvableId},
    mapping::Mapping,
    pool::Pool,
    problem::Problem,
    solvable::Solvable,
};
use clause::{Clause, ClauseState, Literal};
use decision::Decision;
use decision_tracker::DecisionTracker;
use watch_map::WatchMap;

/// The jobs of a single solve.
#[derive(Default)]
pub(crate) struct SolveJobs {
    /// Specs that must be satisfied (the requested and pinned specs).
    pub(crate) install: Vec<MatchSpecId>,

    /// Solvables to prefer over other candidates of the same name (installed
    /// records, for change minimization).
    pub(crate) favor: Vec<SolvableId>,

    /// Solvables that rule out every other candidate of their name (frozen
    /// installed records).
    pub(crate) lock: Vec<SolvableId>,

    /// Solvables with a fixed `true` assignment (virtual packages).
    pub(crate) assert_installed: Vec<SolvableId>,

    /// Specs that act as constraints without requesting installation (pinned
    /// specs): any candidate of the spec's name that violates the spec is
    /// forbidden.
    pub(crate) constrain: Vec<MatchSpecId>,
}

/// The solution of a satisfiable solve: the solvables assigned `true`.
pub(crate) struct Solution {
    pub(crate) steps: Vec<SolvableId>,
}

/// Why a solve did not produce a solution.
pub(crate) enum SolverFailure {
    /// No assignment satisfies the clauses; the problem describes why.
    Unsolvable(Problem),

    /// The search exceeded its learnt-clause budget.
    BudgetExceeded,
}

/// The default bound on the number of learnt clauses. A solve that learns
/// this much is not converging; it is aborted rather than allowed to churn
/// indefinitely.
const DEFAULT_LEARNT_CLAUSE_BUDGET: usize = 1_000_000;

/// A CDCL (conflict-driven clause learning) solver over the candidates of a
/// [`Pool`].
///
/// The algorithm follows the classic MiniSat structure: decide, propagate
/// with two watched literals per clause, and on conflict learn a clause that
/// prevents repeating the mistake, backtracking as far as possible. The
/// lexicographic installation objective is realized entirely through the
/// candidate order: the solver always tries the best undecided candidate of
/// the first unsatisfied requirement.
pub(crate) struct Solver<'a> {
    pub(crate) pool: Pool<'a>,

    pub(crate) clauses: Vec<ClauseState>,
    watches: WatchMap,

    learnt_clauses: Arena<LearntClauseId, Vec<Literal>>,
    learnt_why: Mapping<LearntClauseId, Vec<ClauseId>>,
    learnt_clauses_start: ClauseId,
    learnt_clause_budget: usize,

    decision_tracker: DecisionTracker,
}

impl<'a> Solver<'a> {
    /// Creates a solver over the given pool.
    pub(crate) fn new(pool: Pool<'a>) -> Self {
        Self {
            clauses: Vec::new(),
            watches: WatchMap::new(),
            learnt_clauses: Arena::new(),
            learnt_why: Mapping::empty(),
            learnt_clauses_start: ClauseId::null(),
            learnt_clause_budget: DEFAULT_LEARNT_CLAUSE_BUDGET,
            decision_tracker: DecisionTracker::new(0),
            pool,
        }
    }

    /// Returns the pool used by the solver.
    pub(crate) fn pool(&self) -> &Pool<'a> {
        &self.pool
    }

    /// Solves the given jobs.
    pub(crate) fn solve(&mut self, jobs: SolveJobs) -> Result<Solution, SolverFailure> {
        // Reset all state from a previous solve.
        self.pool.root_solvable_mut().clear();
        self.learnt_clauses.clear();
        self.learnt_why = Mapping::empty();

        // Map from name to the favored solvable of that name.
        let mut favored_map = FxHashMap::default();
        for &favored_id in &jobs.favor {
            let name_id = self.pool.solvables[favored_id].package().name;
            favored_map.insert(name_id, favored_id);
        }

        // The requested specs become the dependencies of the root solvable.
        for &match_spec in &jobs.install {
            self.pool.root_solvable_mut().push(match_spec);
        }

        self.clauses = vec![ClauseState::new(
            Clause::InstallRoot,
            &self.learnt_clauses,
            &self.pool,
        )];

        // Generate clauses for everything reachable from the root.
        self.add_clauses_for_root_deps(&favored_map);

        // Pinned specs constrain without requesting installation: every
        // candidate of the pinned name that violates the pin is forbidden.
        for &spec in &jobs.constrain {
            self.pool.populate_forbidden(spec);
            let forbidden = self.pool.forbidden(spec).to_vec();
            for solvable in forbidden {
                self.clauses.push(ClauseState::new(
                    Clause::Constrains(SolvableId::root(), solvable, spec),
                    &self.learnt_clauses,
                    &self.pool,
                ));
            }
        }

        // At most one candidate per name may be installed.
        for name_index in 0..self.pool.packages_by_name.len() {
            let candidates = &self.pool.packages_by_name[NameId::from_usize(name_index)];
            for (i, &candidate) in candidates.iter().enumerate() {
                for &other_candidate in &candidates[i + 1..] {
                    self.clauses.push(ClauseState::new(
                        Clause::ForbidMultipleInstances(candidate, other_candidate),
                        &self.learnt_clauses,
                        &self.pool,
                    ));
                }
            }
        }

        // A locked solvable forbids all other candidates of its name.
        for &locked_solvable_id in &jobs.lock {
            let name = self.pool.solvables[locked_solvable_id].package().name;
            let other_candidates = self.pool.packages_by_name[name].clone();
            for other_candidate in other_candidates {
                if other_candidate != locked_solvable_id {
                    self.clauses.push(ClauseState::new(
                        Clause::Lock(locked_solvable_id, other_candidate),
                        &self.learnt_clauses,
                        &self.pool,
                    ));
                }
            }
        }

        // Clauses generated from this point on are learnt.
        self.learnt_clauses_start = ClauseId::new(self.clauses.len());

        self.decision_tracker = DecisionTracker::new(self.pool.solvables.len());
        self.make_watches();

        self.run_sat(&jobs.assert_installed)?;

        let steps = self
            .decision_tracker
            .stack()
            .iter()
            .filter_map(|d| {
                // Solvables assigned false are simply not installed.
                (d.value && !d.solvable_id.is_root()).then_some(d.solvable_id)
            })
            .collect();
        Ok(Solution { steps })
    }

    /// Generates clauses for the root's dependencies and transitively for
    /// every candidate they can pull in. Traversal is depth-first; as a side
    /// effect the candidates of every involved match spec are computed and
    /// sorted (with the `favored` solvables moved to the front).
    fn add_clauses_for_root_deps(&mut self, favored: &FxHashMap<NameId, SolvableId>) {
        let mut visited = HashSet::new();
        let mut seen_requires = HashSet::new();
        let mut seen_forbidden = HashSet::new();
        let mut stack = vec![SolvableId::root()];

        while let Some(solvable_id) = stack.pop() {
            let (deps, constrains) = match &self.pool.solvables[solvable_id] {
                Solvable::Root(deps) => (deps.clone(), Vec::new()),
                Solvable::Package(package) => {
                    (package.dependencies.clone(), package.constrains.clone())
                }
            };

            // Collect the candidates of all dependencies and enqueue the ones
            // we have not seen yet.
            for &dep in &deps {
                if seen_requires.insert(dep) {
                    self.pool.populate_candidates(dep, favored);
                }

                for &candidate in self.pool.sorted_candidates(dep) {
                    if visited.insert(candidate) {
                        stack.push(candidate);
                    }
                }
            }

            for &dep in &deps {
                let clause = ClauseState::new(
                    Clause::Requires(solvable_id, dep),
                    &self.learnt_clauses,
                    &self.pool,
                );
                self.clauses.push(clause);
            }

            for &dep in &constrains {
                if seen_forbidden.insert(dep) {
                    self.pool.populate_forbidden(dep);
                }

                let forbidden = self.pool.forbidden(dep).to_vec();
                for solvable_dep in forbidden {
                    let clause = ClauseState::new(
                        Clause::Constrains(solvable_id, solvable_dep, dep),
                        &self.learnt_clauses,
                        &self.pool,
                    );
                    self.clauses.push(clause);
                }
            }
        }
    }

    /// Runs the CDCL loop: assign, propagate, and learn from conflicts until
    /// every variable the problem cares about has a value.
    fn run_sat(&mut self, assert_installed: &[SolvableId]) -> Result<(), SolverFailure> {
        assert!(self.decision_tracker.is_empty());
        let level = 1;

        // The root is always installed.
        self.decision_tracker
            .try_add_decision(
                Decision::new(SolvableId::root(), true, ClauseId::install_root()),
                level,
            )
            .expect("the root cannot have been decided yet");

        // Virtual packages have a fixed assignment; they describe the host.
        // They are asserted before anything else is decided, so a conflict is
        // impossible.
        for &solvable_id in assert_installed {
            self.decision_tracker
                .try_add_decision(
                    Decision::new(solvable_id, true, ClauseId::install_root()),
                    level,
                )
                .expect("virtual packages are asserted before any other decision");
        }

        // Packages that depend on a spec without candidates can never be
        // installed.
        self.decide_requires_without_candidates(level)
            .map_err(|cause| SolverFailure::Unsolvable(self.analyze_unsolvable(cause)))?;

        self.propagate(level)
            .map_err(|(_, _, cause)| SolverFailure::Unsolvable(self.analyze_unsolvable(cause)))?;

        self.resolve_dependencies(level)?;

        Ok(())
    }

    /// A requires clause without candidates shrinks to the assertion (¬A):
    /// the package that carries the dependency can never be installed.
    fn decide_requires_without_candidates(&mut self, level: u32) -> Result<(), ClauseId> {
        for (i, clause) in self.clauses.iter().enumerate() {
            if let Clause::Requires(solvable_id, _) = clause.kind {
                if !clause.has_watches() {
                    let clause_id = ClauseId::new(i);
                    let decided = self
                        .decision_tracker
                        .try_add_decision(Decision::new(solvable_id, false, clause_id), level)
                        .map_err(|()| clause_id)?;

                    if decided {
                        tracing::debug!(
                            "assert {} = false (dependency without candidates)",
                            self.pool.solvables[solvable_id].display()
                        );
                    }
                }
            }
        }

        Ok(())
    }

    /// The outer solver loop: find the first requires clause whose installed
    /// owner still lacks an installed candidate, and try its best undecided
    /// candidate.
    fn resolve_dependencies(&mut self, mut level: u32) -> Result<u32, SolverFailure> {
        let mut i = 0;
        loop {
            if i >= self.clauses.len() {
                break;
            }

            let (required_by, candidate) = {
                let clause = &self.clauses[i];
                i += 1;

                let Clause::Requires(solvable_id, deps) = clause.kind else {
                    continue;
                };

                // Only requirements of packages that will be installed matter.
                if self.decision_tracker.assigned_value(solvable_id) != Some(true) {
                    continue;
                }

                // Skip when one of the candidates is already installed.
                let candidates = self.pool.sorted_candidates(deps);
                if candidates
                    .iter()
                    .any(|&c| self.decision_tracker.assigned_value(c) == Some(true))
                {
                    continue;
                }

                // Pick the best undecided candidate. Candidates are sorted by
                // the installation objective, so the first undecided one is
                // the best that can still be chosen.
                let Some(candidate) = candidates
                    .iter()
                    .copied()
                    .find(|&c| self.decision_tracker.assigned_value(c).is_none())
                else {
                    continue;
                };

                (solvable_id, candidate)
            };

            level = self.set_propagate_learn(level, candidate, required_by, ClauseId::new(i))?;

            // Progress was made; rescan from the start.
            i = 0;
        }

        Ok(level)
    }

    /// One decide-propagate-learn round: install `solvable`, propagate, and
    /// on conflict learn and backtrack until propagation succeeds.
    fn set_propagate_learn(
        &mut self,
        mut level: u32,
        solvable: SolvableId,
        required_by: SolvableId,
        clause_id: ClauseId,
    ) -> Result<u32, SolverFailure> {
        level += 1;

        tracing::trace!(
            "installing {} at level {level} (required by {})",
            self.pool.solvables[solvable].display(),
            self.pool.solvables[required_by].display(),
        );

        self.decision_tracker
            .try_add_decision(Decision::new(solvable, true, clause_id), level)
            .expect("the candidate was checked to be undecided");

        loop {
            let r = self.propagate(level);
            let Err((conflicting_solvable, attempted_value, conflicting_clause)) = r else {
                break;
            };

            tracing::trace!(
                "propagation conflict: could not set {} to {attempted_value} via {:?}",
                self.pool.solvables[conflicting_solvable].display(),
                self.clauses[conflicting_clause.index()].debug(&self.pool),
            );

            if level == 1 {
                return Err(SolverFailure::Unsolvable(
                    self.analyze_unsolvable(conflicting_clause),
                ));
            }

            let (new_level, learned_clause_id, literal) =
                self.analyze(level, conflicting_solvable, conflicting_clause);
            level = new_level;

            if self.learnt_clauses.len() > self.learnt_clause_budget {
                tracing::warn!(
                    "giving up after learning {} clauses",
                    self.learnt_clauses.len()
                );
                return Err(SolverFailure::BudgetExceeded);
            }

            // The learnt clause is a unit clause by construction, propagate
            // its single open literal immediately.
            let decision = literal.satisfying_value();
            self.decision_tracker
                .try_add_decision(
                    Decision::new(literal.solvable_id, decision, learned_clause_id),
                    level,
                )
                .expect("the learnt literal cannot be decided");
            tracing::trace!(
                "backtracked to level {level}, asserted {} = {decision}",
                self.pool.solvables[literal.solvable_id].display()
            );
        }

        Ok(level)
    }

    /// Unit propagation through the watched-literal lists.
    ///
    /// When a watched literal of a clause turns false, the clause either
    /// moves its watch to another non-false literal, or — when none exists —
    /// forces the value of its remaining watched literal.
    fn propagate(&mut self, level: u32) -> Result<(), (SolvableId, bool, ClauseId)> {
        // Learnt assertions (single-literal clauses) have no watches and are
        // propagated directly.
        let learnt_clauses_start = self.learnt_clauses_start.index();
        for (i, clause) in self.clauses[learnt_clauses_start..].iter().enumerate() {
            let Clause::Learnt(learnt_index) = clause.kind else {
                unreachable!("all clauses after the start marker are learnt");
            };

            let literals = &self.learnt_clauses[learnt_index];
            if literals.len() > 1 {
                continue;
            }

            debug_assert!(!literals.is_empty());

            let literal = literals[0];
            let decision = literal.satisfying_value();
            let clause_id = ClauseId::new(learnt_clauses_start + i);

            self.decision_tracker
                .try_add_decision(
                    Decision::new(literal.solvable_id, decision, clause_id),
                    level,
                )
                .map_err(|()| (literal.solvable_id, decision, clause_id))?;
        }

        while let Some(decision) = self.decision_tracker.next_unpropagated() {
            let pkg = decision.solvable_id;

            // Walk the linked list of clauses watching this solvable. The
            // list is mutated while iterating when a watch moves away.
            let mut old_predecessor_clause_id: Option<ClauseId>;
            let mut predecessor_clause_id: Option<ClauseId> = None;
            let mut clause_id = self.watches.first_clause_watching_solvable(pkg);
            while !clause_id.is_null() {
                debug_assert!(
                    predecessor_clause_id != Some(clause_id),
                    "the watch list is circular"
                );

                // Get mutable access to the current clause and its
                // predecessor in the list.
                let (predecessor_clause, clause) =
                    if let Some(prev_clause_id) = predecessor_clause_id {
                        if prev_clause_id < clause_id {
                            let (prev, current) = self.clauses.split_at_mut(clause_id.index());
                            (Some(&mut prev[prev_clause_id.index()]), &mut current[0])
                        } else {
                            let (current, prev) =
                                self.clauses.split_at_mut(prev_clause_id.index());
                            (Some(&mut prev[0]), &mut current[clause_id.index()])
                        }
                    } else {
                        (None, &mut self.clauses[clause_id.index()])
                    };

                old_predecessor_clause_id = predecessor_clause_id;
                predecessor_clause_id = Some(clause_id);

                let this_clause_id = clause_id;
                clause_id = clause.next_watched_clause(pkg);

                if let Some((watched_literals, watch_index)) = clause.watch_turned_false(
                    pkg,
                    self.decision_tracker.map(),
                    &self.learnt_clauses,
                ) {
                    if let Some(variable) = clause.next_unwatched_variable(
                        &self.pool,
                        &self.learnt_clauses,
                        self.decision_tracker.map(),
                    ) {
                        debug_assert!(!clause.watched_literals.contains(&variable));

                        self.watches.update_watched(
                            predecessor_clause,
                            clause,
                            this_clause_id,
                            watch_index,
                            pkg,
                            variable,
                        );

                        // The current clause left this watch list, so the
                        // predecessor for the next iteration stays the same.
                        predecessor_clause_id = old_predecessor_clause_id;
                    } else {
                        // No watch to move to: the remaining watched literal
                        // must be made true.
                        let remaining_watch_index = match watch_index {
                            0 => 1,
                            1 => 0,
                            _ => unreachable!(),
                        };

                        let remaining_watch = watched_literals[remaining_watch_index];
                        self.decision_tracker
                            .try_add_decision(
                                Decision::new(
                                    remaining_watch.solvable_id,
                                    remaining_watch.satisfying_value(),
                                    this_clause_id,
                                ),
                                level,
                            )
                            .map_err(|()| {
                                (remaining_watch.solvable_id, true, this_clause_id)
                            })?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Adds a clause to a problem report, expanding learnt clauses to the
    /// clauses they were derived from (learnt clauses mean nothing to the
    /// user).
    fn analyze_unsolvable_clause(
        clauses: &[ClauseState],
        learnt_why: &Mapping<LearntClauseId, Vec<ClauseId>>,
        learnt_clauses_start: ClauseId,
        clause_id: ClauseId,
        problem: &mut Problem,
        seen: &mut HashSet<ClauseId>,
    ) {
        let clause = &clauses[clause_id.index()];
        match clause.kind {
            Clause::Learnt(..) => {
                if !seen.insert(clause_id) {
                    return;
                }

                let learnt_id =
                    LearntClauseId::from_usize(clause_id.index() - learnt_clauses_start.index());
                for &cause in &learnt_why[learnt_id] {
                    Self::analyze_unsolvable_clause(
                        clauses,
                        learnt_why,
                        learnt_clauses_start,
                        cause,
                        problem,
                        seen,
                    );
                }
            }
            _ => problem.add_clause(clause_id),
        }
    }

    /// Builds the [`Problem`] describing an unrecoverable conflict.
    fn analyze_unsolvable(&mut self, clause_id: ClauseId) -> Problem {
        let mut problem = Problem::default();
        let mut involved = HashSet::new();

        self.clauses[clause_id.index()].kind.visit_literals(
            &self.learnt_clauses,
            &self.pool,
            |literal| {
                involved.insert(literal.solvable_id);
            },
        );

        let mut seen = HashSet::new();
        Self::analyze_unsolvable_clause(
            &self.clauses,
            &self.learnt_why,
            self.learnt_clauses_start,
            clause_id,
            &mut problem,
            &mut seen,
        );

        for decision in self.decision_tracker.stack()[1..].iter().rev() {
            if decision.solvable_id.is_root() {
                continue;
            }

            let why = decision.derived_from;

            if !involved.contains(&decision.solvable_id) {
                continue;
            }

            if why == ClauseId::install_root() {
                // Fixed assignments (virtual packages) carry no clause.
                continue;
            }

            Self::analyze_unsolvable_clause(
                &self.clauses,
                &self.learnt_why,
                self.learnt_clauses_start,
                why,
                &mut problem,
                &mut seen,
            );

            self.clauses[why.index()].kind.visit_literals(
                &self.learnt_clauses,
                &self.pool,
                |literal| {
                    if literal.eval(self.decision_tracker.map()) == Some(true) {
                        debug_assert_eq!(literal.solvable_id, decision.solvable_id);
                    } else {
                        involved.insert(literal.solvable_id);
                    }
                },
            );
        }

        problem
    }

    /// Conflict analysis: finds the combination of assignments that caused
    /// the conflict, learns a clause forbidding it, and determines how far
    /// to backtrack.
    ///
    /// Returns the level to backtrack to, the id of the learnt clause, and
    /// the single literal of the learnt clause that is still open (which the
    /// caller asserts after backtracking).
    fn analyze(
        &mut self,
        mut current_level: u32,
        mut conflicting_solvable: SolvableId,
        mut clause_id: ClauseId,
    ) -> (u32, ClauseId, Literal) {
        let mut seen = HashSet::new();
        let mut causes_at_current_level = 0u32;
        let mut learnt = Vec::new();
        let mut back_track_to = 0;

        let mut s_value;
        let mut learnt_why = Vec::new();
        let mut first_iteration = true;
        loop {
            learnt_why.push(clause_id);

            self.clauses[clause_id.index()].kind.visit_literals(
                &self.learnt_clauses,
                &self.pool,
                |literal| {
                    if !first_iteration && literal.solvable_id == conflicting_solvable {
                        // The solvable whose value was propagated is not a
                        // cause of the conflict.
                        return;
                    }

                    if !seen.insert(literal.solvable_id) {
                        return;
                    }

                    let decision_level = self.decision_tracker.level(literal.solvable_id);
                    if decision_level == current_level {
                        causes_at_current_level += 1;
                    } else if current_level > 1 {
                        let learnt_literal = Literal {
                            solvable_id: literal.solvable_id,
                            negate: self
                                .decision_tracker
                                .assigned_value(literal.solvable_id)
                                .expect("a conflict cause must be assigned"),
                        };
                        learnt.push(learnt_literal);
                        back_track_to = back_track_to.max(decision_level);
                    } else {
                        unreachable!("conflicts at level 1 are handled by the caller");
                    }
                },
            );

            first_iteration = false;

            // Walk the decision log backwards to the next decision involved
            // in the conflict.
            loop {
                let (last_decision, last_decision_level) = self.decision_tracker.undo_last();

                conflicting_solvable = last_decision.solvable_id;
                s_value = last_decision.value;
                clause_id = last_decision.derived_from;

                current_level = last_decision_level;

                if seen.contains(&last_decision.solvable_id) {
                    break;
                }
            }

            causes_at_current_level = causes_at_current_level.saturating_sub(1);
            if causes_at_current_level == 0 {
                break;
            }
        }

        let last_literal = Literal {
            solvable_id: conflicting_solvable,
            negate: s_value,
        };
        learnt.push(last_literal);

        let clause_id = ClauseId::new(self.clauses.len());
        let learnt_id = self.learnt_clauses.alloc(learnt.clone());
        self.learnt_why.extend(learnt_why);

        let mut clause = ClauseState::new(
            Clause::Learnt(learnt_id),
            &self.learnt_clauses,
            &self.pool,
        );

        if clause.has_watches() {
            self.watches.start_watching(&mut clause, clause_id);
        }

        self.clauses.push(clause);

        tracing::trace!(
            "learnt clause:\n{}",
            learnt.iter().format_with("\n", |lit, f| f(&format_args!(
                "- {}{}",
                if lit.negate { "NOT " } else { "" },
                self.pool.solvables[lit.solvable_id].display()
            )))
        );

        // Backtrack at most to the root level.
        let target_level = back_track_to.max(1);
        self.decision_tracker.undo_until(target_level);

        (target_level, clause_id, last_literal)
    }

    fn make_watches(&mut self) {
        self.watches.initialize(self.pool.solvables.len());

        // The watches of a clause are initialized when it is created; here
        // the per-solvable linked lists are chained together.
        for (i, clause) in self.clauses.iter_mut().enumerate() {
            if !clause.has_watches() {
                continue;
            }

            self.watches.start_watching(clause, ClauseId::new(i));
        }
    }
}
