//! Changeset DAG views: dependency trees, lineages and ancestry.
//!
//! Every view is built over an explicit set of changesets. Edges leaving
//! the set are ignored, so a changeset whose dependencies all lie outside
//! the set is a root of that view.

use std::collections::{BTreeMap, BTreeSet};

use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;

use crate::model::{Changeset, ChangesetId};

/// One changeset in a dependency tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    pub id: ChangesetId,
    pub project_id: Option<String>,
    /// Changesets this one depends on (within the set).
    pub parents: Vec<ChangesetId>,
    /// Changesets depending on this one (within the set).
    pub children: Vec<ChangesetId>,
}

/// A dependency forest over a changeset set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DependencyTree {
    nodes: BTreeMap<ChangesetId, TreeNode>,
    roots: Vec<ChangesetId>,
}

impl DependencyTree {
    /// Builds the forest with every dependency edge inside the set.
    pub fn raw<'a>(changesets: impl IntoIterator<Item = &'a Changeset>) -> Self {
        let mut nodes: BTreeMap<ChangesetId, TreeNode> = changesets
            .into_iter()
            .map(|cs| {
                (
                    cs.id,
                    TreeNode {
                        id: cs.id,
                        project_id: cs.project_id.clone(),
                        parents: cs.depends_on.clone(),
                        children: Vec::new(),
                    },
                )
            })
            .collect();

        let members: BTreeSet<ChangesetId> = nodes.keys().copied().collect();
        let mut edges = Vec::new();
        for node in nodes.values_mut() {
            node.parents.retain(|p| members.contains(p) && *p != node.id);
            node.parents.sort_unstable();
            node.parents.dedup();
            edges.extend(node.parents.iter().map(|p| (*p, node.id)));
        }
        for (parent, child) in edges {
            if let Some(node) = nodes.get_mut(&parent) {
                node.children.push(child);
            }
        }

        let roots = nodes
            .values()
            .filter(|n| n.parents.is_empty())
            .map(|n| n.id)
            .collect();
        Self { nodes, roots }
    }

    /// Builds the forest and collapses transitively implied child edges.
    ///
    /// A child is dropped from a node when it is also a descendant of
    /// another child of the same node. Parents are left untouched, so
    /// the set of roots is the same as for [`DependencyTree::raw`].
    pub fn pruned<'a>(changesets: impl IntoIterator<Item = &'a Changeset>) -> Self {
        let mut tree = Self::raw(changesets);
        let mut redundant: Vec<(ChangesetId, ChangesetId)> = Vec::new();
        for node in tree.nodes.values() {
            for child in &node.children {
                let implied = node
                    .children
                    .iter()
                    .filter(|other| *other != child)
                    .any(|other| tree.descendants(*other).contains(child));
                if implied {
                    redundant.push((node.id, *child));
                }
            }
        }
        for (parent, child) in redundant {
            if let Some(node) = tree.nodes.get_mut(&parent) {
                node.children.retain(|c| *c != child);
            }
        }
        tree
    }

    pub fn node(&self, id: ChangesetId) -> Option<&TreeNode> {
        self.nodes.get(&id)
    }

    pub fn roots(&self) -> &[ChangesetId] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every changeset reachable from `id` along child edges, excluding `id`.
    pub fn descendants(&self, id: ChangesetId) -> FxHashSet<ChangesetId> {
        let mut seen = FxHashSet::default();
        let mut stack: Vec<ChangesetId> = self
            .node(id)
            .map(|n| n.children.clone())
            .unwrap_or_default();
        while let Some(next) = stack.pop() {
            if seen.insert(next) {
                if let Some(n) = self.node(next) {
                    stack.extend(n.children.iter().copied());
                }
            }
        }
        seen
    }

    /// Enumerates every root-to-leaf path.
    ///
    /// A changeset reachable along several branches appears in several
    /// lineages.
    pub fn lineages(&self) -> Vec<Vec<ChangesetId>> {
        let mut out = Vec::new();
        for root in &self.roots {
            let mut path = Vec::new();
            self.walk(*root, &mut path, &mut out);
        }
        out
    }

    fn walk(&self, id: ChangesetId, path: &mut Vec<ChangesetId>, out: &mut Vec<Vec<ChangesetId>>) {
        let Some(node) = self.node(id) else {
            return;
        };
        path.push(id);
        if node.children.is_empty() {
            out.push(path.clone());
        } else {
            for child in &node.children {
                self.walk(*child, path, out);
            }
        }
        path.pop();
    }

    /// Renders the forest as nested nodes, children sorted by id.
    pub fn render(&self) -> Vec<AncestryNode> {
        self.roots.iter().filter_map(|r| self.render_node(*r)).collect()
    }

    fn render_node(&self, id: ChangesetId) -> Option<AncestryNode> {
        let node = self.node(id)?;
        Some(AncestryNode {
            id,
            project_id: node.project_id.clone(),
            parents: node.parents.clone(),
            children: node
                .children
                .iter()
                .filter_map(|c| self.render_node(*c))
                .collect(),
        })
    }
}

/// Nested ancestry view of one changeset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AncestryNode {
    pub id: ChangesetId,
    pub project_id: Option<String>,
    pub parents: Vec<ChangesetId>,
    pub children: Vec<AncestryNode>,
}

/// Ancestry closure of a changeset set, answering "same lineage" queries.
///
/// A set of changesets lies on a single root-to-leaf path of the raw
/// dependency tree exactly when its members are pairwise ordered by
/// ancestry, which is what [`LineageIndex::is_single_lineage`] tests.
/// This avoids enumerating lineages, whose count can grow exponentially
/// with the number of merges.
#[derive(Debug, Clone, Default)]
pub struct LineageIndex {
    ancestors: FxHashMap<ChangesetId, FxHashSet<ChangesetId>>,
}

impl LineageIndex {
    pub fn new<'a>(changesets: impl IntoIterator<Item = &'a Changeset>) -> Self {
        let tree = DependencyTree::raw(changesets);
        let mut ancestors: FxHashMap<ChangesetId, FxHashSet<ChangesetId>> = FxHashMap::default();

        // Kahn order over parent edges, so every parent is closed first.
        let mut pending: FxHashMap<ChangesetId, usize> = tree
            .nodes
            .values()
            .map(|n| (n.id, n.parents.len()))
            .collect();
        let mut ready: Vec<ChangesetId> = tree.roots.clone();
        while let Some(id) = ready.pop() {
            let Some(node) = tree.node(id) else {
                continue;
            };
            let mut closure = FxHashSet::default();
            for parent in &node.parents {
                closure.insert(*parent);
                if let Some(up) = ancestors.get(parent) {
                    closure.extend(up.iter().copied());
                }
            }
            ancestors.insert(id, closure);
            for child in &node.children {
                if let Some(count) = pending.get_mut(child) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push(*child);
                    }
                }
            }
        }
        Self { ancestors }
    }

    /// True if `ancestor` is a strict ancestor of `id` within the set.
    pub fn is_ancestor(&self, ancestor: ChangesetId, id: ChangesetId) -> bool {
        self.ancestors
            .get(&id)
            .is_some_and(|a| a.contains(&ancestor))
    }

    /// True if all `ids` lie on one lineage.
    pub fn is_single_lineage(&self, ids: &[ChangesetId]) -> bool {
        let mut sorted: Vec<ChangesetId> = ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted.iter().any(|id| !self.ancestors.contains_key(id)) {
            return false;
        }
        sorted.sort_by_key(|id| self.ancestors.get(id).map_or(0, FxHashSet::len));
        sorted
            .windows(2)
            .all(|pair| self.is_ancestor(pair[0], pair[1]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn within_any_lineage(lineages: &[Vec<ChangesetId>], ids: &[ChangesetId]) -> bool {
        lineages
            .iter()
            .any(|lineage| ids.iter().all(|id| lineage.contains(id)))
    }

    fn cs(id: u64, deps: &[u64]) -> Changeset {
        Changeset {
            id: ChangesetId(id),
            user: String::new(),
            comment: String::new(),
            project_id: Some(format!("P{id}")),
            editor: String::new(),
            created_at: 0,
            auth_area: "all".into(),
            is_base_network: false,
            base_network: Some(ChangesetId(1)),
            depends_on: deps.iter().map(|d| ChangesetId(*d)).collect(),
        }
    }

    fn ids(raw: &[u64]) -> Vec<ChangesetId> {
        raw.iter().map(|i| ChangesetId(*i)).collect()
    }

    #[test]
    fn test_fork_lineages() {
        let set = [cs(2, &[]), cs(3, &[2]), cs(4, &[2])];
        let tree = DependencyTree::pruned(&set);
        assert_eq!(tree.roots(), &ids(&[2]));
        assert_eq!(tree.lineages(), vec![ids(&[2, 3]), ids(&[2, 4])]);

        let index = LineageIndex::new(&set);
        assert!(index.is_single_lineage(&ids(&[2, 3])));
        assert!(!index.is_single_lineage(&ids(&[3, 4])));
        assert!(!within_any_lineage(&tree.lineages(), &ids(&[3, 4])));
    }

    #[test]
    fn test_pruning_drops_implied_child() {
        // 4 depends on 2 directly and through 3.
        let set = [cs(2, &[]), cs(3, &[2]), cs(4, &[2, 3])];
        let raw = DependencyTree::raw(&set);
        assert_eq!(raw.node(ChangesetId(2)).unwrap().children, ids(&[3, 4]));
        assert_eq!(raw.lineages(), vec![ids(&[2, 3, 4]), ids(&[2, 4])]);

        let pruned = DependencyTree::pruned(&set);
        assert_eq!(pruned.node(ChangesetId(2)).unwrap().children, ids(&[3]));
        assert_eq!(pruned.node(ChangesetId(4)).unwrap().parents, ids(&[2, 3]));
        assert_eq!(pruned.lineages(), vec![ids(&[2, 3, 4])]);
    }

    #[test]
    fn test_out_of_set_dependencies_are_ignored() {
        let set = [cs(5, &[2]), cs(6, &[5, 3])];
        let tree = DependencyTree::pruned(&set);
        assert_eq!(tree.roots(), &ids(&[5]));
        assert_eq!(tree.node(ChangesetId(6)).unwrap().parents, ids(&[5]));
    }

    #[test]
    fn test_render_nested() {
        let set = [cs(2, &[]), cs(3, &[2]), cs(7, &[])];
        let forest = DependencyTree::pruned(&set).render();
        assert_eq!(forest.len(), 2);
        assert_eq!(forest[0].children[0].id, ChangesetId(3));
        assert_eq!(forest[0].children[0].parents, ids(&[2]));
        let json = serde_json::to_value(&forest[1]).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": 7, "project_id": "P7", "parents": [], "children": []})
        );
    }

    #[test]
    fn test_diamond_is_single_lineage_only_along_paths() {
        let set = [cs(2, &[]), cs(3, &[2]), cs(4, &[2]), cs(5, &[3, 4])];
        let index = LineageIndex::new(&set);
        assert!(index.is_single_lineage(&ids(&[2, 3, 5])));
        assert!(index.is_single_lineage(&ids(&[4, 5])));
        assert!(!index.is_single_lineage(&ids(&[3, 4, 5])));
        assert!(!index.is_single_lineage(&ids(&[3, 99])));
    }

    fn arb_dag() -> impl Strategy<Value = Vec<Changeset>> {
        (1usize..9).prop_flat_map(|n| {
            proptest::collection::vec(proptest::collection::vec(any::<prop::sample::Index>(), 0..3), n)
                .prop_map(|deps| {
                    deps.iter()
                        .enumerate()
                        .map(|(i, picks)| {
                            let id = i as u64 + 1;
                            let parents: Vec<u64> = if i == 0 {
                                Vec::new()
                            } else {
                                picks.iter().map(|p| p.index(i) as u64 + 1).collect()
                            };
                            cs(id, &parents)
                        })
                        .collect()
                })
        })
    }

    proptest! {
        #[test]
        fn single_lineage_matches_enumeration(
            set in arb_dag(),
            picks in proptest::collection::vec(any::<prop::sample::Index>(), 1..4),
        ) {
            let members: Vec<ChangesetId> = picks.iter().map(|p| set[p.index(set.len())].id).collect();
            let lineages = DependencyTree::raw(&set).lineages();
            let index = LineageIndex::new(&set);
            prop_assert_eq!(
                index.is_single_lineage(&members),
                within_any_lineage(&lineages, &members)
            );

            // Pruning only removes implied edges.
            let pruned = DependencyTree::pruned(&set).lineages();
            prop_assert_eq!(
                within_any_lineage(&pruned, &members),
                within_any_lineage(&lineages, &members)
            );
        }
    }
}
