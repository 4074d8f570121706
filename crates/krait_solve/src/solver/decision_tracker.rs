use crate::{
    id::SolvableId,
    solver::{decision::Decision, decision_map::DecisionMap},
};

/// Tracks the assignments made so far: a map for value lookups and a log for
/// backtracking and propagation.
pub(crate) struct DecisionTracker {
    map: DecisionMap,
    stack: Vec<Decision>,
    propagate_index: usize,
}

impl DecisionTracker {
    pub(crate) fn new(solvable_count: usize) -> Self {
        Self {
            map: DecisionMap::new(solvable_count),
            stack: Vec::new(),
            propagate_index: 0,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub(crate) fn assigned_value(&self, solvable_id: SolvableId) -> Option<bool> {
        self.map.value(solvable_id)
    }

    pub(crate) fn map(&self) -> &DecisionMap {
        &self.map
    }

    pub(crate) fn stack(&self) -> &[Decision] {
        &self.stack
    }

    pub(crate) fn level(&self, solvable_id: SolvableId) -> u32 {
        self.map.level(solvable_id)
    }

    /// Attempts to record a decision.
    ///
    /// Returns `Ok(true)` if the solvable was undecided, `Ok(false)` if it
    /// was already decided to the same value, and `Err(())` if it was decided
    /// to the opposite value (a conflict).
    pub(crate) fn try_add_decision(&mut self, decision: Decision, level: u32) -> Result<bool, ()> {
        match self.map.value(decision.solvable_id) {
            None => {
                self.map.set(decision.solvable_id, decision.value, level);
                self.stack.push(decision);
                Ok(true)
            }
            Some(value) if value == decision.value => Ok(false),
            _ => Err(()),
        }
    }

    /// Undoes decisions until the level of the top decision is at most
    /// `level`.
    pub(crate) fn undo_until(&mut self, level: u32) {
        while let Some(decision) = self.stack.last() {
            if self.level(decision.solvable_id) <= level {
                break;
            }
            self.undo_last();
        }
    }

    /// Undoes the top decision and returns it together with the level of the
    /// new top decision.
    pub(crate) fn undo_last(&mut self) -> (Decision, u32) {
        let decision = self.stack.pop().expect("undo on an empty stack");
        self.map.reset(decision.solvable_id);

        self.propagate_index = self.stack.len();

        let top_decision = self
            .stack
            .last()
            .expect("the root decision is never undone");
        (decision, self.map.level(top_decision.solvable_id))
    }

    /// Returns the next decision for which unit propagation has not run yet,
    /// marking it as propagated.
    pub(crate) fn next_unpropagated(&mut self) -> Option<Decision> {
        let &decision = self.stack[self.propagate_index..].first()?;
        self.propagate_index += 1;
        Some(decision)
    }
}
