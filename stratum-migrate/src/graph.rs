//! The revision graph.
//!
//! Revisions form a directed acyclic graph through their parent links. The
//! graph is validated on construction:
//!
//! - every parent must be a known revision,
//! - there must be no cycles,
//! - there must be exactly one root (a revision without parents).
//!
//! Several heads (revisions without children) are allowed; they mark a
//! branched history that needs a merge revision before `head` resolves.
//!
//! ```text
//!            ┌── b1 ── b2 ──┐
//!   base ── a               ├── merge
//!            └── c1 ────────┘
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::Arc;

use crate::error::{MigrateResult, MigrationError};
use crate::revision::{Direction, Revision, RevisionId, Step};

/// Symbolic name of the single head.
pub const HEAD: &str = "head";
/// Symbolic name of the unmigrated state.
pub const BASE: &str = "base";

/// A validated DAG of revisions.
#[derive(Debug, Clone)]
pub struct RevisionGraph {
    revisions: BTreeMap<RevisionId, Arc<Revision>>,
    children: BTreeMap<RevisionId, BTreeSet<RevisionId>>,
    /// Topological order, parents before children.
    order: Vec<RevisionId>,
    position: HashMap<RevisionId, usize>,
}

impl RevisionGraph {
    /// Build and validate a graph.
    pub fn new(revisions: impl IntoIterator<Item = Revision>) -> MigrateResult<Self> {
        let mut map: BTreeMap<RevisionId, Arc<Revision>> = BTreeMap::new();
        for revision in revisions {
            let id = revision.id.clone();
            if map.insert(id.clone(), Arc::new(revision)).is_some() {
                return Err(MigrationError::graph(format!(
                    "revision '{}' is declared more than once",
                    id
                )));
            }
        }

        if map.is_empty() {
            return Err(MigrationError::graph(
                "no revisions found; create one with `stratum revision`",
            ));
        }

        let mut children: BTreeMap<RevisionId, BTreeSet<RevisionId>> =
            map.keys().map(|id| (id.clone(), BTreeSet::new())).collect();

        for revision in map.values() {
            let mut seen = BTreeSet::new();
            for parent in &revision.parents {
                if parent == &revision.id {
                    return Err(MigrationError::graph(format!(
                        "revision '{}' lists itself as a parent",
                        revision.id
                    )));
                }
                if !seen.insert(parent) {
                    return Err(MigrationError::graph(format!(
                        "revision '{}' lists parent '{}' twice",
                        revision.id, parent
                    )));
                }
                match children.get_mut(parent) {
                    Some(set) => {
                        set.insert(revision.id.clone());
                    }
                    None => {
                        return Err(MigrationError::graph(format!(
                            "revision '{}' refers to unknown parent '{}'",
                            revision.id, parent
                        )));
                    }
                }
            }
        }

        let roots: Vec<&RevisionId> = map
            .values()
            .filter(|r| r.is_root())
            .map(|r| &r.id)
            .collect();
        match roots.len() {
            0 => {
                return Err(MigrationError::graph(
                    "no root revision found (every revision has a parent); the history is cyclic",
                ));
            }
            1 => {}
            _ => {
                return Err(MigrationError::graph(format!(
                    "multiple root revisions found ({}); exactly one revision may omit its parent",
                    join(roots)
                )));
            }
        }

        // Kahn's algorithm; the ready set is ordered so the result is deterministic.
        let mut pending: HashMap<&RevisionId, usize> =
            map.values().map(|r| (&r.id, r.parents.len())).collect();
        let mut ready: BTreeSet<&RevisionId> = roots.into_iter().collect();
        let mut order = Vec::with_capacity(map.len());

        while let Some(id) = ready.pop_first() {
            order.push(id.clone());
            for child in &children[id] {
                if let Some(count) = pending.get_mut(child) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(child);
                    }
                }
            }
        }

        if order.len() != map.len() {
            let placed: BTreeSet<&RevisionId> = order.iter().collect();
            let cyclic: Vec<&RevisionId> = map.keys().filter(|id| !placed.contains(id)).collect();
            return Err(MigrationError::graph(format!(
                "cycle detected among revisions {}",
                join(cyclic)
            )));
        }

        let position = order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();

        Ok(Self {
            revisions: map,
            children,
            order,
            position,
        })
    }

    /// Number of revisions.
    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    /// Check if the graph is empty (never true for a validated graph).
    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    /// Look up a revision by exact id.
    pub fn get(&self, id: &str) -> Option<&Arc<Revision>> {
        self.revisions.get(id)
    }

    /// Check if a revision exists.
    pub fn contains(&self, id: &str) -> bool {
        self.revisions.contains_key(id)
    }

    /// Iterate revisions in topological order (base first).
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Arc<Revision>> {
        self.order.iter().map(|id| &self.revisions[id])
    }

    /// The root revision.
    pub fn root(&self) -> &Arc<Revision> {
        &self.revisions[&self.order[0]]
    }

    /// Revisions without parents.
    pub fn bases(&self) -> Vec<RevisionId> {
        self.iter()
            .filter(|r| r.is_root())
            .map(|r| r.id.clone())
            .collect()
    }

    /// Revisions without children, in topological order.
    pub fn heads(&self) -> Vec<RevisionId> {
        self.order
            .iter()
            .filter(|id| self.children[*id].is_empty())
            .cloned()
            .collect()
    }

    /// Revisions with more than one child.
    pub fn branch_points(&self) -> Vec<RevisionId> {
        self.order
            .iter()
            .filter(|id| self.children[*id].len() > 1)
            .cloned()
            .collect()
    }

    /// Direct children of a revision.
    pub fn children(&self, id: &str) -> Vec<RevisionId> {
        self.children
            .get(id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The single head, or `MultipleHeads` listing every head.
    pub fn single_head(&self) -> MigrateResult<&Arc<Revision>> {
        let heads = self.heads();
        if heads.len() > 1 {
            return Err(MigrationError::MultipleHeads {
                heads: heads.iter().map(ToString::to_string).collect(),
            });
        }
        Ok(&self.revisions[&heads[0]])
    }

    /// Resolve an exact id or a unique id prefix.
    pub fn resolve(&self, spec: &str) -> MigrateResult<&Arc<Revision>> {
        if let Some(revision) = self.revisions.get(spec) {
            return Ok(revision);
        }

        let matches: Vec<&Arc<Revision>> = self
            .revisions
            .range::<str, _>((Bound::Included(spec), Bound::Unbounded))
            .take_while(|(id, _)| id.as_str().starts_with(spec))
            .map(|(_, r)| r)
            .collect();

        match matches.len() {
            0 => Err(MigrationError::NotFound(spec.to_string())),
            1 => Ok(matches[0]),
            _ => Err(MigrationError::ambiguous(
                spec,
                matches.iter().map(|r| r.id.to_string()),
            )),
        }
    }

    /// Ancestors of a revision, from the revision itself down to base.
    pub fn ancestors(&self, id: &str) -> MigrateResult<Vec<Arc<Revision>>> {
        let set = self.ancestor_set(id)?;
        let mut revisions = self.sorted(&set);
        revisions.reverse();
        Ok(revisions)
    }

    /// The revision and all its ancestors as a set.
    pub fn ancestor_set(&self, id: &str) -> MigrateResult<BTreeSet<RevisionId>> {
        let start = self
            .revisions
            .get(id)
            .ok_or_else(|| MigrationError::NotFound(id.to_string()))?;

        let mut set = BTreeSet::new();
        let mut stack = vec![start];
        while let Some(revision) = stack.pop() {
            if set.insert(revision.id.clone()) {
                stack.extend(revision.parents.iter().map(|p| &self.revisions[p]));
            }
        }
        Ok(set)
    }

    /// Check if `ancestor` is `id` itself or one of its ancestors.
    pub fn is_ancestor(&self, ancestor: &str, id: &str) -> MigrateResult<bool> {
        Ok(self.ancestor_set(id)?.contains(ancestor))
    }

    /// Members of `set` that have no children inside `set`.
    pub fn heads_of(&self, set: &BTreeSet<RevisionId>) -> Vec<RevisionId> {
        self.order
            .iter()
            .filter(|id| set.contains(*id))
            .filter(|id| !self.children[*id].iter().any(|c| set.contains(c)))
            .cloned()
            .collect()
    }

    /// Check that a recorded applied set is known and ancestor-closed.
    pub fn validate_applied(&self, applied: &BTreeSet<RevisionId>) -> MigrateResult<()> {
        for id in applied {
            let revision = self.revisions.get(id).ok_or_else(|| {
                MigrationError::graph(format!(
                    "the version table records revision '{}' which is not present in the script directory",
                    id
                ))
            })?;
            if let Some(missing) = revision.parents.iter().find(|p| !applied.contains(*p)) {
                return Err(MigrationError::graph(format!(
                    "the version table records revision '{}' but not its parent '{}'",
                    id, missing
                )));
            }
        }
        Ok(())
    }

    /// Compute the walk between two positions.
    ///
    /// `from` is a revision id or `None` for base; `to` is a revision id,
    /// [`HEAD`] or [`BASE`].
    pub fn path(&self, from: Option<&str>, to: &str) -> MigrateResult<Vec<Step>> {
        let applied = match from {
            Some(spec) => {
                let revision = self.resolve(spec)?;
                self.ancestor_set(revision.id.as_str())?
            }
            None => BTreeSet::new(),
        };

        let desired = match to {
            HEAD => {
                let head = self.single_head()?;
                self.ancestor_set(head.id.as_str())?
            }
            BASE => BTreeSet::new(),
            spec => {
                let revision = self.resolve(spec)?;
                self.ancestor_set(revision.id.as_str())?
            }
        };

        self.transition(&applied, &desired, to)
    }

    /// Steps that turn the `applied` set into the `desired` set.
    ///
    /// Upgrades come out parents-first, downgrades children-first. A target
    /// that needs revisions both added and removed sits on a disjoint branch
    /// and is reported as unreachable.
    pub fn transition(
        &self,
        applied: &BTreeSet<RevisionId>,
        desired: &BTreeSet<RevisionId>,
        target: &str,
    ) -> MigrateResult<Vec<Step>> {
        let to_apply: BTreeSet<RevisionId> = desired.difference(applied).cloned().collect();
        let to_remove: BTreeSet<RevisionId> = applied.difference(desired).cloned().collect();

        if !to_apply.is_empty() && !to_remove.is_empty() {
            return Err(MigrationError::unreachable(
                self.describe(applied),
                target,
                format!(
                    "it lies on a different branch (would undo {} and apply {}); \
                     downgrade to a common ancestor first or create a merge revision",
                    join(&to_remove),
                    join(&to_apply)
                ),
            ));
        }

        if !to_apply.is_empty() {
            return Ok(self
                .sorted(&to_apply)
                .into_iter()
                .map(|revision| Step {
                    revision,
                    direction: Direction::Upgrade,
                })
                .collect());
        }

        Ok(self
            .sorted(&to_remove)
            .into_iter()
            .rev()
            .map(|revision| Step {
                revision,
                direction: Direction::Downgrade,
            })
            .collect())
    }

    /// Apply `n` further revisions, one at a time.
    pub fn advance(
        &self,
        applied: &BTreeSet<RevisionId>,
        n: usize,
    ) -> MigrateResult<BTreeSet<RevisionId>> {
        let spec = format!("+{}", n);
        let mut state = applied.clone();

        for _ in 0..n {
            let candidates: Vec<&RevisionId> = self
                .order
                .iter()
                .filter(|id| !state.contains(*id))
                .filter(|id| self.revisions[*id].parents.iter().all(|p| state.contains(p)))
                .collect();

            match candidates.len() {
                0 => {
                    return Err(MigrationError::unreachable(
                        self.describe(applied),
                        spec,
                        "there are not that many revisions ahead of the current position",
                    ));
                }
                1 => {
                    state.insert(candidates[0].clone());
                }
                _ => {
                    return Err(MigrationError::ambiguous(
                        spec,
                        candidates.iter().map(|id| id.to_string()),
                    ));
                }
            }
        }

        Ok(state)
    }

    /// Undo `n` applied revisions, one at a time.
    pub fn retreat(
        &self,
        applied: &BTreeSet<RevisionId>,
        n: usize,
    ) -> MigrateResult<BTreeSet<RevisionId>> {
        let spec = format!("-{}", n);
        let mut state = applied.clone();

        for _ in 0..n {
            let candidates = self.heads_of(&state);
            match candidates.len() {
                0 => {
                    return Err(MigrationError::unreachable(
                        self.describe(applied),
                        spec,
                        "there are not that many applied revisions above base",
                    ));
                }
                1 => {
                    state.remove(&candidates[0]);
                }
                _ => {
                    return Err(MigrationError::ambiguous(
                        spec,
                        candidates.iter().map(ToString::to_string),
                    ));
                }
            }
        }

        Ok(state)
    }

    /// Human-readable description of a position: its heads, or `base`.
    pub fn describe(&self, set: &BTreeSet<RevisionId>) -> String {
        let heads = self.heads_of(set);
        if heads.is_empty() {
            BASE.to_string()
        } else {
            join(&heads)
        }
    }

    fn sorted(&self, ids: &BTreeSet<RevisionId>) -> Vec<Arc<Revision>> {
        let mut revisions: Vec<&Arc<Revision>> =
            ids.iter().filter_map(|id| self.revisions.get(id)).collect();
        revisions.sort_by_key(|r| self.position[&r.id]);
        revisions.into_iter().cloned().collect()
    }
}

fn join<I, T>(items: I) -> String
where
    I: IntoIterator<Item = T>,
    T: std::fmt::Display,
{
    items
        .into_iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
