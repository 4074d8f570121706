use crate::{
    id::{ClauseId, SolvableId},
    mapping::Mapping,
    solver::clause::ClauseState,
};

/// Maps every solvable to the first clause watching it. Clauses watching the
/// same solvable form a linked list through their `next_watches` fields.
pub(crate) struct WatchMap {
    map: Mapping<SolvableId, ClauseId>,
}

impl WatchMap {
    pub(crate) fn new() -> Self {
        Self {
            map: Mapping::empty(),
        }
    }

    pub(crate) fn initialize(&mut self, solvable_count: usize) {
        self.map = Mapping::new(vec![ClauseId::null(); solvable_count]);
    }

    /// Inserts the clause at the head of the watch lists of both its watched
    /// solvables.
    pub(crate) fn start_watching(&mut self, clause: &mut ClauseState, clause_id: ClauseId) {
        for (watch_index, watched_solvable) in clause.watched_literals.into_iter().enumerate() {
            let already_watching = self.first_clause_watching_solvable(watched_solvable);
            clause.link_to_clause(watch_index, already_watching);
            self.watch_solvable(watched_solvable, clause_id);
        }
    }

    /// Moves one watch of a clause from `previous_watch` to `new_watch`.
    pub(crate) fn update_watched(
        &mut self,
        predecessor_clause: Option<&mut ClauseState>,
        clause: &mut ClauseState,
        clause_id: ClauseId,
        watch_index: usize,
        previous_watch: SolvableId,
        new_watch: SolvableId,
    ) {
        // Unlink the clause from the list of the solvable it no longer
        // watches.
        if let Some(predecessor_clause) = predecessor_clause {
            predecessor_clause.unlink_clause(clause, previous_watch, watch_index);
        } else {
            // The clause was the head of the list.
            self.map[previous_watch] = clause.get_linked_clause(watch_index);
        }

        // Insert it at the head of the new solvable's list.
        clause.watched_literals[watch_index] = new_watch;
        clause.link_to_clause(watch_index, self.map[new_watch]);
        self.map[new_watch] = clause_id;
    }

    pub(crate) fn first_clause_watching_solvable(
        &mut self,
        watched_solvable: SolvableId,
    ) -> ClauseId {
        self.map[watched_solvable]
    }

    pub(crate) fn watch_solvable(&mut self, watched_solvable: SolvableId, id: ClauseId) {
        self.map[watched_solvable] = id;
    }
}
