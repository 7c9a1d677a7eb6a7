//! Conflict detection over changeset sets.
//!
//! Three independent checks, concatenated in this order:
//! base-network divergence, node conflicts, link conflicts. An entity
//! conflicts when the changesets touching it do not all lie on one
//! lineage of the set's dependency DAG.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::error::NetworkError;
use crate::lineage::LineageIndex;
use crate::model::{Changeset, ChangesetId, EntityKind};
use crate::store::StoreState;

/// Changesets sharing one base network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BaseNetworkGroup {
    /// `None` groups changesets without a base network.
    pub base_network: Option<ChangesetId>,
    pub changesets: Vec<ChangesetId>,
}

/// A single conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Conflict {
    /// The set spans more than one base network.
    BaseNetwork { groups: Vec<BaseNetworkGroup> },
    /// An entity was touched by changesets outside a common lineage.
    Entity {
        kind: EntityKind,
        id: u64,
        changesets: Vec<ChangesetId>,
        /// Project label of each changeset, in the same order.
        labels: Vec<String>,
    },
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conflict::BaseNetwork { groups } => {
                write!(f, "changesets span {} base networks:", groups.len())?;
                for g in groups {
                    match g.base_network {
                        Some(base) => write!(f, " [base {base}:")?,
                        None => write!(f, " [no base:")?,
                    }
                    for cs in &g.changesets {
                        write!(f, " {cs}")?;
                    }
                    write!(f, "]")?;
                }
                Ok(())
            }
            Conflict::Entity {
                kind, id, labels, ..
            } => write!(
                f,
                "{kind} {id} modified outside a common lineage by {}",
                labels.join(", ")
            ),
        }
    }
}

/// Every conflict found in a changeset set. Empty means consistent.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ConflictReport {
    pub conflicts: Vec<Conflict>,
}

impl ConflictReport {
    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.conflicts.len()
    }

    /// Joined human-readable summary.
    pub fn message(&self) -> String {
        self.conflicts
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl fmt::Display for ConflictReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

/// Detects conflicts among `ids`.
///
/// Duplicate ids are ignored and the result does not depend on input
/// order. Unknown ids fail with `UnknownChangeset`.
pub fn detect_conflicts(
    state: &StoreState,
    ids: &[ChangesetId],
) -> Result<ConflictReport, NetworkError> {
    let unique: BTreeSet<ChangesetId> = ids.iter().copied().collect();
    let changesets = unique
        .iter()
        .map(|id| state.require_changeset(*id))
        .collect::<Result<Vec<&Changeset>, _>>()?;

    let mut report = ConflictReport::default();

    let mut groups: BTreeMap<Option<ChangesetId>, Vec<ChangesetId>> = BTreeMap::new();
    for cs in &changesets {
        groups.entry(cs.base_network).or_default().push(cs.id);
    }
    if groups.len() > 1 {
        report.conflicts.push(Conflict::BaseNetwork {
            groups: groups
                .into_iter()
                .map(|(base_network, changesets)| BaseNetworkGroup {
                    base_network,
                    changesets,
                })
                .collect(),
        });
    }

    let index = LineageIndex::new(changesets.iter().copied());
    for kind in [EntityKind::Node, EntityKind::Link] {
        let mut touching: BTreeMap<u64, Vec<ChangesetId>> = BTreeMap::new();
        for cs in &changesets {
            for entity in state.touched_by_kind(cs.id, kind) {
                touching.entry(*entity).or_default().push(cs.id);
            }
        }
        for (id, touched_by) in touching {
            if touched_by.len() < 2 || index.is_single_lineage(&touched_by) {
                continue;
            }
            let labels = touched_by
                .iter()
                .filter_map(|c| state.changeset(*c).map(Changeset::label))
                .collect();
            report.conflicts.push(Conflict::Entity {
                kind,
                id,
                changesets: touched_by,
                labels,
            });
        }
    }

    debug!(
        changesets = changesets.len(),
        conflicts = report.len(),
        "conflict detection finished"
    );
    Ok(report)
}

/// Base-network conflict between a requested base and the base its
/// dependencies agree on.
///
/// Returns `None` when the dependencies span several bases (already a
/// conflict of the set itself) or agree with `base`.
pub fn base_mismatch(
    state: &StoreState,
    base: ChangesetId,
    depends_on: &[ChangesetId],
) -> Option<Conflict> {
    let bases: BTreeSet<Option<ChangesetId>> = depends_on
        .iter()
        .filter_map(|id| state.changeset(*id))
        .map(|cs| cs.base_network)
        .collect();
    let only = match bases.len() {
        1 => bases.into_iter().next()?,
        _ => return None,
    };
    if only == Some(base) {
        return None;
    }
    let mut deps: Vec<ChangesetId> = depends_on.to_vec();
    deps.sort_unstable();
    deps.dedup();
    Some(Conflict::BaseNetwork {
        groups: vec![
            BaseNetworkGroup {
                base_network: Some(base),
                changesets: Vec::new(),
            },
            BaseNetworkGroup {
                base_network: only,
                changesets: deps,
            },
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Attributes, Coord, NodeId};
    use crate::store::{NetworkStore, NewChangeset, StagedBatch, StagedNode, Target};
    use proptest::prelude::*;

    fn meta(base: Option<ChangesetId>, deps: &[ChangesetId], pid: &str) -> NewChangeset {
        NewChangeset {
            user: "ana".into(),
            comment: String::new(),
            project_id: Some(pid.to_string()),
            editor: String::new(),
            auth_area: "all".into(),
            created_at: 0,
            is_base_network: base.is_none(),
            base_network: base,
            depends_on: deps.to_vec(),
        }
    }

    /// Commits a changeset touching `nodes` (each by one new version).
    fn touch(
        store: &NetworkStore,
        base: Option<ChangesetId>,
        deps: &[ChangesetId],
        pid: &str,
        nodes: &[u64],
        creates: usize,
    ) -> ChangesetId {
        let mut batch = StagedBatch::new(meta(base, deps, pid));
        for _ in 0..creates {
            batch.push_node(StagedNode {
                target: Target::New,
                active: true,
                geometry: Coord::new(0.0, 0.0),
                attributes: Attributes::new(),
            });
        }
        {
            let state = store.read().unwrap();
            for n in nodes {
                let expected = state.latest_node(NodeId(*n)).unwrap().version;
                batch.push_node(StagedNode {
                    target: Target::Existing {
                        id: NodeId(*n),
                        expected,
                    },
                    active: true,
                    geometry: Coord::new(1.0, 1.0),
                    attributes: Attributes::new(),
                });
            }
        }
        store.commit(batch).unwrap().changeset
    }

    #[test]
    fn test_forked_edit_conflicts() {
        let store = NetworkStore::new();
        let base = touch(&store, None, &[], "base", &[], 2);
        let a = touch(&store, Some(base), &[], "A", &[], 0);
        let b = touch(&store, Some(base), &[a], "B", &[1], 0);
        let c = touch(&store, Some(base), &[a], "C", &[1], 0);

        let state = store.read().unwrap();
        let report = detect_conflicts(&state, &[a, b, c]).unwrap();
        assert_eq!(
            report.conflicts,
            vec![Conflict::Entity {
                kind: EntityKind::Node,
                id: 1,
                changesets: vec![b, c],
                labels: vec!["B".into(), "C".into()],
            }]
        );
        assert!(report.message().contains("node 1"));

        // Edit then amend along one lineage.
        assert!(detect_conflicts(&state, &[a, b]).unwrap().is_empty());
    }

    #[test]
    fn test_amend_chain_is_not_a_conflict() {
        let store = NetworkStore::new();
        let base = touch(&store, None, &[], "base", &[], 1);
        let a = touch(&store, Some(base), &[], "A", &[1], 0);
        let b = touch(&store, Some(base), &[a], "B", &[1], 0);
        let c = touch(&store, Some(base), &[b], "C", &[1], 0);
        let state = store.read().unwrap();
        assert!(detect_conflicts(&state, &[c, a, b]).unwrap().is_empty());
        // The base is a separate root inside the set, so touching node 1
        // from base and from a is unordered.
        let report = detect_conflicts(&state, &[base, a]).unwrap();
        assert_eq!(report.len(), 1);
    }

    #[test]
    fn test_base_network_groups() {
        let store = NetworkStore::new();
        let b1 = touch(&store, None, &[], "base1", &[], 1);
        let b2 = touch(&store, None, &[], "base2", &[], 1);
        let x = touch(&store, Some(b1), &[], "X", &[], 0);
        let y = touch(&store, Some(b2), &[], "Y", &[], 0);
        let state = store.read().unwrap();
        let report = detect_conflicts(&state, &[y, x]).unwrap();
        assert_eq!(
            report.conflicts,
            vec![Conflict::BaseNetwork {
                groups: vec![
                    BaseNetworkGroup {
                        base_network: Some(b1),
                        changesets: vec![x]
                    },
                    BaseNetworkGroup {
                        base_network: Some(b2),
                        changesets: vec![y]
                    },
                ]
            }]
        );

        assert!(base_mismatch(&state, b2, &[x]).is_some());
        assert!(base_mismatch(&state, b1, &[x]).is_none());
        assert!(base_mismatch(&state, b1, &[x, y]).is_none());
    }

    #[test]
    fn test_unknown_changeset() {
        let store = NetworkStore::new();
        let state = store.read().unwrap();
        assert_eq!(
            detect_conflicts(&state, &[ChangesetId(9)]).unwrap_err(),
            NetworkError::UnknownChangeset { id: ChangesetId(9) }
        );
    }

    proptest! {
        #[test]
        fn detection_is_order_independent(
            plan in proptest::collection::vec(
                (any::<prop::sample::Index>(), proptest::collection::btree_set(1u64..5, 0..3)),
                1..7,
            ),
            seed in any::<u64>(),
        ) {
            let store = NetworkStore::new();
            let base = touch(&store, None, &[], "base", &[], 4);
            let mut created = Vec::new();
            for (i, (dep, nodes)) in plan.iter().enumerate() {
                let deps = if created.is_empty() || i % 3 == 0 {
                    Vec::new()
                } else {
                    vec![created[dep.index(created.len())]]
                };
                let nodes: Vec<u64> = nodes.iter().copied().collect();
                created.push(touch(&store, Some(base), &deps, &format!("P{i}"), &nodes, 0));
            }

            let state = store.read().unwrap();
            let forward = detect_conflicts(&state, &created).unwrap();
            let mut shuffled = created.clone();
            shuffled.reverse();
            let len = shuffled.len();
            shuffled.rotate_left((seed as usize) % len);
            shuffled.push(shuffled[0]);
            let permuted = detect_conflicts(&state, &shuffled).unwrap();
            prop_assert_eq!(forward, permuted);
        }
    }
}
