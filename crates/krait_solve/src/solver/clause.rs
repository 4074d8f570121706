use std::fmt::{Debug, Formatter};

use crate::{
    arena::Arena,
    id::{ClauseId, LearntClauseId, MatchSpecId, SolvableId},
    pool::Pool,
    solver::decision_map::DecisionMap,
};

/// One clause of the pseudo-boolean problem.
///
/// Clauses are disjunctions of literals (possibly negated variables). The
/// solver assigns values to the variables — represented by [`SolvableId`]s —
/// until all clauses are satisfied, or concludes that no such assignment
/// exists. Only the clause shapes needed for dependency resolution are
/// representable, which keeps the enum small even though a problem consists
/// of many thousands of instances.
#[derive(Copy, Clone, Debug)]
pub(crate) enum Clause {
    /// The root solvable must be installed.
    ///
    /// In SAT terms: (root)
    InstallRoot,

    /// The solvable requires one of the candidates of the match spec.
    ///
    /// In SAT terms: (¬A ∨ B1 ∨ B2 ∨ ... ∨ Bn), where B1..Bn are the
    /// candidates of the spec.
    Requires(SolvableId, MatchSpecId),

    /// At most one of the two solvables (which share a name) may be
    /// installed.
    ///
    /// In SAT terms: (¬A ∨ ¬B)
    ForbidMultipleInstances(SolvableId, SolvableId),

    /// The first solvable constrains the version of the second one's name;
    /// the second solvable violates the constraint and is therefore
    /// forbidden while the first is installed.
    ///
    /// In SAT terms: (¬A ∨ ¬B), kept separate from
    /// [`Clause::ForbidMultipleInstances`] for error reporting.
    Constrains(SolvableId, SolvableId, MatchSpecId),

    /// The left solvable is locked: the right solvable (sharing its name) can
    /// never be chosen.
    ///
    /// In SAT terms: (¬root ∨ ¬B)
    Lock(SolvableId, SolvableId),

    /// A clause learnt while solving. The literals are stored out of line to
    /// keep this enum small.
    Learnt(LearntClauseId),
}

impl Clause {
    /// The two solvables this clause will initially watch, or `None` for
    /// clauses that are assertions.
    fn initial_watches(
        &self,
        learnt_clauses: &Arena<LearntClauseId, Vec<Literal>>,
        pool: &Pool<'_>,
    ) -> Option<[SolvableId; 2]> {
        match self {
            Clause::InstallRoot => None,
            Clause::Constrains(s1, s2, _) | Clause::ForbidMultipleInstances(s1, s2) => {
                Some([*s1, *s2])
            }
            Clause::Lock(_, s) => Some([SolvableId::root(), *s]),
            &Clause::Learnt(learnt_id) => {
                let literals = &learnt_clauses[learnt_id];
                debug_assert!(!literals.is_empty());
                if literals.len() == 1 {
                    // An assertion does not need watches.
                    None
                } else {
                    Some([
                        literals.first().unwrap().solvable_id,
                        literals.last().unwrap().solvable_id,
                    ])
                }
            }
            &Clause::Requires(id, match_spec) => {
                let candidates = pool.sorted_candidates(match_spec);
                if candidates.is_empty() {
                    None
                } else {
                    Some([id, candidates[0]])
                }
            }
        }
    }

    /// Visits every literal of the clause.
    pub(crate) fn visit_literals(
        &self,
        learnt_clauses: &Arena<LearntClauseId, Vec<Literal>>,
        pool: &Pool<'_>,
        mut visit: impl FnMut(Literal),
    ) {
        match *self {
            Clause::InstallRoot => unreachable!(),
            Clause::Learnt(learnt_id) => {
                for &literal in &learnt_clauses[learnt_id] {
                    visit(literal);
                }
            }
            Clause::Requires(solvable_id, match_spec_id) => {
                visit(Literal {
                    solvable_id,
                    negate: true,
                });

                for &candidate in pool.sorted_candidates(match_spec_id) {
                    visit(Literal {
                        solvable_id: candidate,
                        negate: false,
                    });
                }
            }
            Clause::Constrains(s1, s2, _) | Clause::ForbidMultipleInstances(s1, s2) => {
                visit(Literal {
                    solvable_id: s1,
                    negate: true,
                });
                visit(Literal {
                    solvable_id: s2,
                    negate: true,
                });
            }
            Clause::Lock(_, s) => {
                visit(Literal {
                    solvable_id: SolvableId::root(),
                    negate: true,
                });
                visit(Literal {
                    solvable_id: s,
                    negate: true,
                });
            }
        }
    }
}

/// A clause plus its two watched literals and its links into the two watch
/// lists it participates in.
///
/// Watching two literals per clause makes unit propagation cheap: a clause
/// only has to be revisited when one of its two watched literals becomes
/// false.
#[derive(Clone)]
pub(crate) struct ClauseState {
    /// The solvables this clause is watching.
    pub(crate) watched_literals: [SolvableId; 2],

    /// The next clause in the watch list of each watched solvable.
    next_watches: [ClauseId; 2],

    /// The clause itself.
    pub(crate) kind: Clause,
}

impl ClauseState {
    pub(crate) fn new(
        kind: Clause,
        learnt_clauses: &Arena<LearntClauseId, Vec<Literal>>,
        pool: &Pool<'_>,
    ) -> Self {
        let watched_literals = kind
            .initial_watches(learnt_clauses, pool)
            .unwrap_or([SolvableId::null(), SolvableId::null()]);

        let clause = Self {
            watched_literals,
            next_watches: [ClauseId::null(), ClauseId::null()],
            kind,
        };

        debug_assert!(!clause.has_watches() || watched_literals[0] != watched_literals[1]);

        clause
    }

    pub(crate) fn debug<'a>(&self, pool: &'a Pool<'_>) -> ClauseDebug<'a> {
        ClauseDebug {
            kind: self.kind,
            pool,
        }
    }

    pub(crate) fn link_to_clause(&mut self, watch_index: usize, linked_clause: ClauseId) {
        self.next_watches[watch_index] = linked_clause;
    }

    pub(crate) fn get_linked_clause(&self, watch_index: usize) -> ClauseId {
        self.next_watches[watch_index]
    }

    pub(crate) fn unlink_clause(
        &mut self,
        linked_clause: &ClauseState,
        watched_solvable: SolvableId,
        linked_clause_watch_index: usize,
    ) {
        if self.watched_literals[0] == watched_solvable {
            self.next_watches[0] = linked_clause.next_watches[linked_clause_watch_index];
        } else {
            debug_assert_eq!(self.watched_literals[1], watched_solvable);
            self.next_watches[1] = linked_clause.next_watches[linked_clause_watch_index];
        }
    }

    #[inline]
    pub(crate) fn next_watched_clause(&self, solvable_id: SolvableId) -> ClauseId {
        if solvable_id == self.watched_literals[0] {
            self.next_watches[0]
        } else {
            debug_assert_eq!(self.watched_literals[1], solvable_id);
            self.next_watches[1]
        }
    }

    /// Returns the watched literals and the index of the watch that turned
    /// false, if any.
    pub(crate) fn watch_turned_false(
        &self,
        solvable_id: SolvableId,
        decision_map: &DecisionMap,
        learnt_clauses: &Arena<LearntClauseId, Vec<Literal>>,
    ) -> Option<([Literal; 2], usize)> {
        debug_assert!(self.watched_literals.contains(&solvable_id));

        let literals @ [w1, w2] = self.watched_literals(learnt_clauses);

        if solvable_id == w1.solvable_id && w1.eval(decision_map) == Some(false) {
            Some((literals, 0))
        } else if solvable_id == w2.solvable_id && w2.eval(decision_map) == Some(false) {
            Some((literals, 1))
        } else {
            None
        }
    }

    pub(crate) fn has_watches(&self) -> bool {
        // The second watch is never set without the first.
        !self.watched_literals[0].is_null()
    }

    /// Reconstructs the two watched literals with their polarity.
    pub(crate) fn watched_literals(
        &self,
        learnt_clauses: &Arena<LearntClauseId, Vec<Literal>>,
    ) -> [Literal; 2] {
        let literals = |op1: bool, op2: bool| {
            [
                Literal {
                    solvable_id: self.watched_literals[0],
                    negate: !op1,
                },
                Literal {
                    solvable_id: self.watched_literals[1],
                    negate: !op2,
                },
            ]
        };

        match self.kind {
            Clause::InstallRoot => unreachable!(),
            Clause::Learnt(learnt_id) => {
                let &w1 = learnt_clauses[learnt_id]
                    .iter()
                    .find(|l| l.solvable_id == self.watched_literals[0])
                    .unwrap();
                let &w2 = learnt_clauses[learnt_id]
                    .iter()
                    .find(|l| l.solvable_id == self.watched_literals[1])
                    .unwrap();
                [w1, w2]
            }
            Clause::Constrains(..) | Clause::ForbidMultipleInstances(..) | Clause::Lock(..) => {
                literals(false, false)
            }
            Clause::Requires(solvable_id, _) => {
                if self.watched_literals[0] == solvable_id {
                    literals(false, true)
                } else if self.watched_literals[1] == solvable_id {
                    literals(true, false)
                } else {
                    literals(true, true)
                }
            }
        }
    }

    /// Finds a not-yet-watched literal of the clause that is not false, to
    /// move a watch to.
    pub(crate) fn next_unwatched_variable(
        &self,
        pool: &Pool<'_>,
        learnt_clauses: &Arena<LearntClauseId, Vec<Literal>>,
        decision_map: &DecisionMap,
    ) -> Option<SolvableId> {
        // A variable is a candidate when it is not watched already and its
        // literal is undecided or true.
        let can_watch = |solvable_lit: Literal| {
            !self.watched_literals.contains(&solvable_lit.solvable_id)
                && solvable_lit.eval(decision_map).unwrap_or(true)
        };

        match self.kind {
            Clause::InstallRoot => unreachable!(),
            Clause::Learnt(learnt_id) => learnt_clauses[learnt_id]
                .iter()
                .copied()
                .find(|&l| can_watch(l))
                .map(|l| l.solvable_id),
            Clause::Constrains(..) | Clause::ForbidMultipleInstances(..) | Clause::Lock(..) => None,
            Clause::Requires(solvable_id, match_spec_id) => {
                // The solvable that owns the dependency.
                let solvable_lit = Literal {
                    solvable_id,
                    negate: true,
                };
                if can_watch(solvable_lit) {
                    return Some(solvable_id);
                }

                // Any of the candidates.
                for &candidate in pool.sorted_candidates(match_spec_id) {
                    let lit = Literal {
                        solvable_id: candidate,
                        negate: false,
                    };
                    if can_watch(lit) {
                        return Some(candidate);
                    }
                }

                None
            }
        }
    }
}

/// A literal: a variable or its negation.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub(crate) struct Literal {
    pub(crate) solvable_id: SolvableId,
    pub(crate) negate: bool,
}

impl Literal {
    /// The value that satisfies this literal when assigned to its variable.
    pub(crate) fn satisfying_value(self) -> bool {
        !self.negate
    }

    /// Evaluates the literal under the current assignment, or `None` when
    /// the variable is undecided.
    pub(crate) fn eval(self, decision_map: &DecisionMap) -> Option<bool> {
        decision_map
            .value(self.solvable_id)
            .map(|value| if self.negate { !value } else { value })
    }
}

/// A [`Debug`] view of a clause that resolves ids through the pool.
pub(crate) struct ClauseDebug<'pool> {
    kind: Clause,
    pool: &'pool Pool<'pool>,
}

impl Debug for ClauseDebug<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            Clause::InstallRoot => write!(f, "install root"),
            Clause::Learnt(learnt_id) => write!(f, "learnt clause {learnt_id:?}"),
            Clause::Requires(solvable_id, match_spec_id) => {
                let match_spec = self.pool.resolve_match_spec(match_spec_id);
                write!(
                    f,
                    "{} requires {match_spec}",
                    self.pool.solvables[solvable_id].display()
                )
            }
            Clause::Constrains(s1, s2, spec_id) => {
                write!(
                    f,
                    "{} excludes {} by {}",
                    self.pool.solvables[s1].display(),
                    self.pool.solvables[s2].display(),
                    self.pool.resolve_match_spec(spec_id)
                )
            }
            Clause::Lock(locked, forbidden) => {
                write!(
                    f,
                    "{} is locked, so {} is forbidden",
                    self.pool.solvables[locked].display(),
                    self.pool.solvables[forbidden].display()
                )
            }
            Clause::ForbidMultipleInstances(s1, _) => {
                let name = self.pool.solvables[s1].package().record.name();
                write!(f, "only one {name} allowed")
            }
        }
    }
}
