use std::cmp::Ordering;

use crate::{id::SolvableId, mapping::Mapping};

/// A decision and the level at which it was made, packed into one value:
///
/// - `0`: undecided
/// - `> 0`: assigned true at this level
/// - `< 0`: assigned false at this level
#[repr(transparent)]
#[derive(Copy, Clone)]
struct DecisionAndLevel(i64);

impl DecisionAndLevel {
    fn undecided() -> DecisionAndLevel {
        DecisionAndLevel(0)
    }

    fn set(&mut self, value: bool, level: u32) {
        self.0 = if value {
            i64::from(level)
        } else {
            -i64::from(level)
        };
    }

    fn value(self) -> Option<bool> {
        match self.0.cmp(&0) {
            Ordering::Less => Some(false),
            Ordering::Equal => None,
            Ordering::Greater => Some(true),
        }
    }

    fn level(self) -> u32 {
        self.0.unsigned_abs() as u32
    }
}

/// The current assignment of every solvable.
pub(crate) struct DecisionMap {
    map: Mapping<SolvableId, DecisionAndLevel>,
}

impl DecisionMap {
    pub(crate) fn new(solvable_count: usize) -> Self {
        Self {
            map: Mapping::new(vec![DecisionAndLevel::undecided(); solvable_count]),
        }
    }

    pub(crate) fn reset(&mut self, solvable_id: SolvableId) {
        self.map[solvable_id] = DecisionAndLevel::undecided();
    }

    pub(crate) fn set(&mut self, solvable_id: SolvableId, value: bool, level: u32) {
        self.map[solvable_id].set(value, level);
    }

    pub(crate) fn level(&self, solvable_id: SolvableId) -> u32 {
        self.map[solvable_id].level()
    }

    pub(crate) fn value(&self, solvable_id: SolvableId) -> Option<bool> {
        self.map[solvable_id].value()
    }
}
