use std::collections::hash_map::Entry;

use fxhash::FxHashMap;
use krait_conda_types::MatchSpec;

use crate::{
    arena::Arena,
    id::{MatchSpecId, NameId, SolvableId},
    mapping::Mapping,
    solvable::{Solvable, SolverRecord},
    sort,
    ChannelPriority,
};

/// Holds all candidate records, interned names, and interned match specs of
/// one solve, and caches the sorted candidate lists per match spec.
///
/// The pool borrows the records that were fed into it; solvables carry
/// references with the `'a` lifetime of those records.
pub(crate) struct Pool<'a> {
    /// All solvables. Index 0 is the synthetic root.
    pub(crate) solvables: Arena<SolvableId, Solvable<'a>>,

    /// Interned package names.
    package_names: Arena<NameId, String>,

    /// Lookup from package name to its interned id.
    pub(crate) names_to_ids: FxHashMap<String, NameId>,

    /// All solvables per interned name.
    pub(crate) packages_by_name: Mapping<NameId, Vec<SolvableId>>,

    /// Interned match specs.
    pub(crate) match_specs: Arena<MatchSpecId, MatchSpec>,

    /// Lookup from match spec string to its interned id.
    match_specs_to_ids: FxHashMap<String, MatchSpecId>,

    /// The candidates of every match spec, best candidate first. Populated
    /// lazily while clauses are generated.
    pub(crate) match_spec_to_sorted_candidates: Mapping<MatchSpecId, Option<Vec<SolvableId>>>,

    /// The solvables of a spec's name that do *not* match the spec, used for
    /// constrains clauses.
    pub(crate) match_spec_to_forbidden: Mapping<MatchSpecId, Option<Vec<SolvableId>>>,

    /// How channel priority influences candidate ordering.
    pub(crate) channel_priority: ChannelPriority,
}

impl<'a> Pool<'a> {
    /// Creates a pool containing only the root solvable.
    pub(crate) fn new(channel_priority: ChannelPriority) -> Self {
        let mut solvables = Arena::new();
        solvables.alloc(Solvable::new_root());

        Self {
            solvables,
            package_names: Arena::new(),
            names_to_ids: FxHashMap::default(),
            packages_by_name: Mapping::empty(),
            match_specs: Arena::new(),
            match_specs_to_ids: FxHashMap::default(),
            match_spec_to_sorted_candidates: Mapping::empty(),
            match_spec_to_forbidden: Mapping::empty(),
            channel_priority,
        }
    }

    /// Adds a candidate record and returns its solvable id.
    pub(crate) fn add_package(
        &mut self,
        record: SolverRecord<'a>,
        channel_priority: u32,
    ) -> SolvableId {
        assert!(self.solvables.len() <= u32::MAX as usize);

        let name = self.intern_package_name(record.name());
        let solvable_id = self
            .solvables
            .alloc(Solvable::new_package(name, record, channel_priority));
        self.packages_by_name[name].push(solvable_id);
        solvable_id
    }

    /// Registers a dependency spec of the given solvable.
    pub(crate) fn add_dependency(&mut self, solvable_id: SolvableId, spec: MatchSpec) {
        let match_spec_id = self.intern_matchspec(spec);
        self.solvables[solvable_id]
            .package_mut()
            .dependencies
            .push(match_spec_id);
    }

    /// Registers a constrains spec of the given solvable.
    pub(crate) fn add_constrains(&mut self, solvable_id: SolvableId, spec: MatchSpec) {
        let match_spec_id = self.intern_matchspec(spec);
        self.solvables[solvable_id]
            .package_mut()
            .constrains
            .push(match_spec_id);
    }

    /// Interns a match spec.
    pub(crate) fn intern_matchspec(&mut self, spec: MatchSpec) -> MatchSpecId {
        match self.match_specs_to_ids.entry(spec.to_string()) {
            Entry::Occupied(entry) => *entry.get(),
            Entry::Vacant(entry) => {
                let id = self.match_specs.alloc(spec);
                self.match_spec_to_sorted_candidates.extend(None);
                self.match_spec_to_forbidden.extend(None);
                entry.insert(id);
                id
            }
        }
    }

    /// The match spec addressed by the given id.
    pub(crate) fn resolve_match_spec(&self, id: MatchSpecId) -> &MatchSpec {
        &self.match_specs[id]
    }

    /// Interns a package name.
    pub(crate) fn intern_package_name(&mut self, name: &str) -> NameId {
        match self.names_to_ids.entry(name.to_owned()) {
            Entry::Occupied(e) => *e.get(),
            Entry::Vacant(e) => {
                let next_id = self.package_names.alloc(e.key().clone());
                self.packages_by_name.extend(Vec::new());
                e.insert(next_id);
                next_id
            }
        }
    }

    /// The package solvable addressed by the given id. Panics for the root.
    pub(crate) fn resolve_solvable(&self, id: SolvableId) -> &crate::solvable::PackageSolvable<'a> {
        self.solvables[id].package()
    }

    /// The dependencies of the root solvable (the requested specs).
    pub(crate) fn root_solvable_mut(&mut self) -> &mut Vec<MatchSpecId> {
        self.solvables[SolvableId::root()].root_mut()
    }

    /// Computes and caches the candidates of a match spec, best first. The
    /// `favored` candidate of a name (the installed record) is moved to the
    /// front so the solver prefers to keep it.
    pub(crate) fn populate_candidates(
        &mut self,
        match_spec_id: MatchSpecId,
        favored: &FxHashMap<NameId, SolvableId>,
    ) {
        if self.match_spec_to_sorted_candidates[match_spec_id].is_some() {
            return;
        }

        let match_spec = &self.match_specs[match_spec_id];
        let candidates = match match_spec
            .name
            .as_ref()
            .and_then(|name| self.names_to_ids.get(name.as_normalized()))
        {
            None => Vec::new(),
            Some(&name_id) => {
                let mut candidates: Vec<SolvableId> = self.packages_by_name[name_id]
                    .iter()
                    .copied()
                    .filter(|&solvable| {
                        self.solvables[solvable].package().record.matches(match_spec)
                    })
                    .collect();

                candidates
                    .sort_by(|&a, &b| sort::compare_candidates(self, a, b));

                if let Some(&favored_id) = favored.get(&name_id) {
                    if let Some(pos) = candidates.iter().position(|&s| s == favored_id) {
                        // Move the favored candidate to the front.
                        candidates[0..=pos].rotate_right(1);
                    }
                }

                candidates
            }
        };

        self.match_spec_to_sorted_candidates[match_spec_id] = Some(candidates);
    }

    /// The sorted candidates of a spec. Must have been populated before.
    pub(crate) fn sorted_candidates(&self, match_spec_id: MatchSpecId) -> &[SolvableId] {
        self.match_spec_to_sorted_candidates[match_spec_id]
            .as_deref()
            .unwrap_or(&[])
    }

    /// Computes and caches the solvables that a constrains spec forbids: all
    /// records of the spec's name that do not match it.
    pub(crate) fn populate_forbidden(&mut self, match_spec_id: MatchSpecId) {
        if self.match_spec_to_forbidden[match_spec_id].is_some() {
            return;
        }

        let match_spec = &self.match_specs[match_spec_id];
        let forbidden = match match_spec
            .name
            .as_ref()
            .and_then(|name| self.names_to_ids.get(name.as_normalized()))
        {
            None => Vec::new(),
            Some(&name_id) => self.packages_by_name[name_id]
                .iter()
                .copied()
                .filter(|&solvable| {
                    !self.solvables[solvable].package().record.matches(match_spec)
                })
                .collect(),
        };

        self.match_spec_to_forbidden[match_spec_id] = Some(forbidden);
    }

    /// The forbidden solvables of a constrains spec. Must have been populated
    /// before.
    pub(crate) fn forbidden(&self, match_spec_id: MatchSpecId) -> &[SolvableId] {
        self.match_spec_to_forbidden[match_spec_id]
            .as_deref()
            .unwrap_or(&[])
    }
}
