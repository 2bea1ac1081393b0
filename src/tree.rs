//! Merged multi-hierarchy tree.
//!
//! One [`MultiNode`] joins a comparison-hierarchy node with the matching node
//! of every cohort hierarchy. Nodes live in a [`MultiTree`] arena and refer to
//! each other by [`NodeId`]; a child id is listed under exactly one parent.

use log::debug;

use crate::distribution::{binned_distribution, DistributionBin};
use crate::error::{Error, Result};
use crate::layout::CohortBlock;
use crate::records::{CohortRecord, ComparisonRecord, Metric, TaxonomyLevel};

/// Handle of a node inside one [`MultiTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Fetch progress of a node's children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchState {
    Unfetched,
    Fetching,
    /// Children were fetched; an empty list is still "fetched".
    Fetched(Vec<NodeId>),
}

/// A merged tree node plus its layout geometry.
#[derive(Debug, Clone)]
pub struct MultiNode {
    comparison: ComparisonRecord,
    cohorts: Vec<CohortRecord>,
    parent: Option<NodeId>,
    depth: usize,
    fetch: FetchState,
    expanded: bool,
    pub x: f64,
    pub y: f64,
    /// One block per cohort, in cohort display order.
    pub blocks: Vec<CohortBlock>,
}

impl MultiNode {
    fn new(
        comparison: ComparisonRecord,
        cohorts: Vec<CohortRecord>,
        parent: Option<NodeId>,
        depth: usize,
    ) -> Self {
        MultiNode {
            comparison,
            cohorts,
            parent,
            depth,
            fetch: FetchState::Unfetched,
            expanded: false,
            x: 0.0,
            y: 0.0,
            blocks: Vec::new(),
        }
    }

    pub fn comparison(&self) -> &ComparisonRecord {
        &self.comparison
    }

    pub fn cohorts(&self) -> &[CohortRecord] {
        &self.cohorts
    }

    pub fn name(&self) -> &str {
        &self.comparison.name
    }

    pub fn level(&self) -> TaxonomyLevel {
        self.comparison.level
    }

    /// Parent back-reference, used by layout only.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn fetch_state(&self) -> &FetchState {
        &self.fetch
    }

    pub fn is_fetched(&self) -> bool {
        matches!(self.fetch, FetchState::Fetched(_))
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    /// Fetched children, whether shown or not.
    pub fn children(&self) -> Option<&[NodeId]> {
        match &self.fetch {
            FetchState::Fetched(children) => Some(children),
            _ => None,
        }
    }

    /// Children currently displayed; `None` while collapsed or unfetched.
    pub fn visible_children(&self) -> Option<&[NodeId]> {
        if self.expanded {
            self.children()
        } else {
            None
        }
    }

    /// Sum of every cohort's tail statistic.
    pub fn max_observed(&self) -> f64 {
        self.cohorts.iter().map(CohortRecord::tail_value).sum()
    }

    pub fn top_feature_count_above(&self, threshold: u32) -> i64 {
        self.comparison.top_feature_count_above(threshold)
    }

    /// Binned distribution of `metric` across this node's cohorts.
    pub fn distribution(&self, metric: Metric) -> Result<Vec<DistributionBin>> {
        let summaries: Vec<_> = self.cohorts.iter().map(|c| c.summary(metric)).collect();
        binned_distribution(&summaries)
    }

    /// Top edge of the block stack, relative to `y`.
    pub fn stack_top(&self) -> f64 {
        self.blocks.first().map_or(0.0, |b| b.y)
    }

    /// Bottom edge of the block stack, relative to `y`.
    pub fn stack_bottom(&self) -> f64 {
        self.blocks.last().map_or(0.0, |b| b.y + b.height)
    }
}

/// Records for one child about to be created: a comparison record and the
/// matching record of each cohort, in display order.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildGroup {
    pub comparison: ComparisonRecord,
    pub cohorts: Vec<CohortRecord>,
}

impl ChildGroup {
    /// True when no cohort shows any signal in its tail statistic.
    pub fn is_statistically_empty(&self) -> bool {
        let total: f64 = self.cohorts.iter().map(CohortRecord::tail_value).sum();
        total <= 0.0 || total.is_nan()
    }
}

/// Selects this parent's children among the candidates, pairs comparison and
/// cohort records by sorted name and drops statistically empty groups.
///
/// Candidates may belong to other parents of the same batch; only records one
/// level below `parent` whose parent index matches are considered.
pub fn build_children(
    parent: &MultiNode,
    comparison_candidates: &[ComparisonRecord],
    cohort_candidates: &[CohortRecord],
) -> Result<Vec<ChildGroup>> {
    let child_level = match parent.level().next() {
        Some(level) => level,
        None => return Ok(Vec::new()),
    };

    let mut comparisons: Vec<&ComparisonRecord> = comparison_candidates
        .iter()
        .filter(|c| c.level == child_level && c.parent_index == Some(parent.comparison.node_index))
        .collect();
    comparisons.sort_by(|a, b| a.name.cmp(&b.name));

    let mut columns: Vec<Vec<&CohortRecord>> = Vec::with_capacity(parent.cohorts.len());
    for cohort in &parent.cohorts {
        let mut siblings: Vec<&CohortRecord> = cohort_candidates
            .iter()
            .filter(|c| {
                c.cohort_id == cohort.cohort_id
                    && c.level == child_level
                    && c.parent_index == Some(cohort.node_index)
            })
            .collect();
        siblings.sort_by(|a, b| a.name.cmp(&b.name));

        if siblings.len() != comparisons.len() {
            return Err(Error::MissingSibling {
                parent: parent.name().to_string(),
                cohort: cohort.cohort_id.clone(),
                expected: comparisons.len(),
                found: siblings.len(),
            });
        }
        for (position, (cmp, sib)) in comparisons.iter().zip(&siblings).enumerate() {
            if cmp.name != sib.name {
                return Err(Error::MisalignedSiblings {
                    parent: parent.name().to_string(),
                    cohort: cohort.cohort_id.clone(),
                    position,
                    expected: cmp.name.clone(),
                    found: sib.name.clone(),
                });
            }
        }
        columns.push(siblings);
    }

    let mut groups = Vec::with_capacity(comparisons.len());
    let mut pruned = 0usize;
    for (i, cmp) in comparisons.iter().enumerate() {
        let group = ChildGroup {
            comparison: (*cmp).clone(),
            cohorts: columns.iter().map(|col| col[i].clone()).collect(),
        };
        if group.is_statistically_empty() {
            pruned += 1;
        } else {
            groups.push(group);
        }
    }

    debug!(
        "'{}': {} candidate children, {} pruned",
        parent.name(),
        comparisons.len(),
        pruned
    );
    Ok(groups)
}

/// Arena holding one loaded tree.
#[derive(Debug, Clone)]
pub struct MultiTree {
    generation: u64,
    cohort_ids: Vec<String>,
    nodes: Vec<MultiNode>,
    root: NodeId,
}

impl MultiTree {
    /// Creates a tree holding only its root.
    pub fn from_roots(
        generation: u64,
        comparison: ComparisonRecord,
        cohorts: Vec<CohortRecord>,
    ) -> Result<Self> {
        if cohorts.is_empty() {
            return Err(Error::NoCohorts);
        }
        let cohort_ids = cohorts.iter().map(|c| c.cohort_id.clone()).collect();
        Ok(MultiTree {
            generation,
            cohort_ids,
            nodes: vec![MultiNode::new(comparison, cohorts, None, 0)],
            root: NodeId(0),
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Cohort ids in display order.
    pub fn cohort_ids(&self) -> &[String] {
        &self.cohort_ids
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&MultiNode> {
        self.nodes.get(id.0)
    }

    pub fn node(&self, id: NodeId) -> Result<&MultiNode> {
        self.nodes.get(id.0).ok_or(Error::UnknownNode(id))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut MultiNode> {
        self.nodes.get_mut(id.0).ok_or(Error::UnknownNode(id))
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut [MultiNode] {
        &mut self.nodes
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &MultiNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    /// Finds the first node with this name, searching in creation order.
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.name() == name).map(NodeId)
    }

    /// Marks every unfetched node of `ids` as fetching and returns them.
    /// Nodes already fetched or in flight are skipped.
    pub(crate) fn begin_fetch(&mut self, ids: &[NodeId]) -> Result<Vec<NodeId>> {
        for &id in ids {
            self.node(id)?;
        }
        let mut pending = Vec::new();
        for &id in ids {
            let node = &mut self.nodes[id.0];
            if node.fetch == FetchState::Unfetched {
                node.fetch = FetchState::Fetching;
                pending.push(id);
            }
        }
        Ok(pending)
    }

    /// Returns in-flight nodes to the unfetched, collapsed state so they can
    /// be retried.
    pub(crate) fn abort_fetch(&mut self, ids: &[NodeId]) {
        for &id in ids {
            if let Some(node) = self.nodes.get_mut(id.0) {
                if node.fetch == FetchState::Fetching {
                    node.fetch = FetchState::Unfetched;
                    node.expanded = false;
                }
            }
        }
    }

    /// Creates the children of `parent` and marks it fetched.
    pub(crate) fn commit_children(&mut self, parent: NodeId, groups: Vec<ChildGroup>) -> usize {
        let depth = self.nodes[parent.0].depth + 1;
        let mut children = Vec::with_capacity(groups.len());
        for group in groups {
            let id = NodeId(self.nodes.len());
            self.nodes
                .push(MultiNode::new(group.comparison, group.cohorts, Some(parent), depth));
            children.push(id);
        }
        let created = children.len();
        self.nodes[parent.0].fetch = FetchState::Fetched(children);
        created
    }

    pub fn set_expanded(&mut self, id: NodeId, expanded: bool) -> Result<()> {
        self.node_mut(id)?.expanded = expanded;
        Ok(())
    }

    /// Displayed nodes in pre-order, children in sibling order.
    pub fn visible_nodes(&self) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            order.push(id);
            if let Some(children) = self.nodes[id.0].visible_children() {
                stack.extend(children.iter().rev().copied());
            }
        }
        order
    }

    /// Parent-child pairs between displayed nodes.
    pub fn visible_links(&self) -> Vec<(NodeId, NodeId)> {
        let mut links = Vec::new();
        for id in self.visible_nodes() {
            if let Some(children) = self.nodes[id.0].visible_children() {
                links.extend(children.iter().map(|&child| (id, child)));
            }
        }
        links
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::records::{Histogram, MetricSummary};

    pub(crate) fn summary(mean: f64, tail: f64) -> MetricSummary {
        MetricSummary {
            mean,
            zero_count: 0,
            upper_quantile: tail,
            histogram: Histogram::default(),
        }
    }

    pub(crate) fn cohort(
        cohort_id: &str,
        name: &str,
        level: TaxonomyLevel,
        node_index: usize,
        parent_index: Option<usize>,
        tail: f64,
    ) -> CohortRecord {
        CohortRecord {
            cohort_id: cohort_id.to_string(),
            id: format!("{}:{}", cohort_id, name),
            name: name.to_string(),
            level,
            node_index,
            parent_index,
            abundance: summary(tail / 2.0, tail),
            richness: summary(1.0, 1.0),
            evenness: summary(0.5, 0.5),
        }
    }

    pub(crate) fn comparison(
        name: &str,
        level: TaxonomyLevel,
        node_index: usize,
        parent_index: Option<usize>,
    ) -> ComparisonRecord {
        ComparisonRecord::new("cmp", name, name, level, node_index, parent_index, Vec::new())
    }

    fn two_cohort_tree() -> MultiTree {
        MultiTree::from_roots(
            1,
            comparison("root", TaxonomyLevel::Kingdom, 0, None),
            vec![
                cohort("a", "root", TaxonomyLevel::Kingdom, 0, None, 5.0),
                cohort("b", "root", TaxonomyLevel::Kingdom, 0, None, 0.0),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_merge_sorts_and_pairs_by_name() {
        let tree = two_cohort_tree();
        let root = tree.node(tree.root()).unwrap();
        let p = TaxonomyLevel::Phylum;
        let cmps = vec![
            comparison("B", p, 1, Some(0)),
            comparison("A", p, 0, Some(0)),
            comparison("C", p, 2, Some(0)),
        ];
        let cohorts = vec![
            cohort("a", "B", p, 11, Some(0), 2.0),
            cohort("a", "A", p, 10, Some(0), 1.0),
            cohort("a", "C", p, 12, Some(0), 3.0),
            cohort("b", "A", p, 20, Some(0), 4.0),
            cohort("b", "B", p, 21, Some(0), 5.0),
            cohort("b", "C", p, 22, Some(0), 6.0),
        ];
        let groups = build_children(root, &cmps, &cohorts).unwrap();
        let names: Vec<_> = groups.iter().map(|g| g.comparison.name.as_str()).collect();
        assert_eq!(names, ["A", "B", "C"]);
        for g in &groups {
            assert_eq!(g.cohorts.len(), 2);
            assert_eq!(g.cohorts[0].cohort_id, "a");
            assert_eq!(g.cohorts[1].cohort_id, "b");
            assert!(g.cohorts.iter().all(|c| c.name == g.comparison.name));
        }
        assert_eq!(groups[1].cohorts[0].node_index, 11);
        assert_eq!(groups[1].cohorts[1].node_index, 21);
    }

    #[test]
    fn test_merge_ignores_other_parents_and_levels() {
        let tree = two_cohort_tree();
        let root = tree.node(tree.root()).unwrap();
        let p = TaxonomyLevel::Phylum;
        let cmps = vec![
            comparison("A", p, 0, Some(0)),
            comparison("X", p, 1, Some(7)),
            comparison("Deep", TaxonomyLevel::Class, 0, Some(0)),
        ];
        let cohorts = vec![
            cohort("a", "A", p, 0, Some(0), 1.0),
            cohort("a", "X", p, 1, Some(7), 1.0),
            cohort("b", "A", p, 0, Some(0), 1.0),
            cohort("b", "Deep", TaxonomyLevel::Class, 0, Some(0), 1.0),
        ];
        let groups = build_children(root, &cmps, &cohorts).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].comparison.name, "A");
    }

    #[test]
    fn test_merge_rejects_misaligned_names() {
        let tree = two_cohort_tree();
        let root = tree.node(tree.root()).unwrap();
        let p = TaxonomyLevel::Phylum;
        let cmps = vec![comparison("A", p, 0, Some(0)), comparison("B", p, 1, Some(0))];
        let cohorts = vec![
            cohort("a", "A", p, 0, Some(0), 1.0),
            cohort("a", "B", p, 1, Some(0), 1.0),
            cohort("b", "A", p, 0, Some(0), 1.0),
            cohort("b", "Z", p, 1, Some(0), 1.0),
        ];
        match build_children(root, &cmps, &cohorts) {
            Err(Error::MisalignedSiblings { cohort, position, .. }) => {
                assert_eq!(cohort, "b");
                assert_eq!(position, 1);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_merge_rejects_missing_sibling() {
        let tree = two_cohort_tree();
        let root = tree.node(tree.root()).unwrap();
        let p = TaxonomyLevel::Phylum;
        let cmps = vec![comparison("A", p, 0, Some(0)), comparison("B", p, 1, Some(0))];
        let cohorts = vec![
            cohort("a", "A", p, 0, Some(0), 1.0),
            cohort("a", "B", p, 1, Some(0), 1.0),
            cohort("b", "A", p, 0, Some(0), 1.0),
        ];
        assert!(matches!(
            build_children(root, &cmps, &cohorts),
            Err(Error::MissingSibling { expected: 2, found: 1, .. })
        ));
    }

    #[test]
    fn test_pruning_keeps_only_signal() {
        let tree = two_cohort_tree();
        let root = tree.node(tree.root()).unwrap();
        assert_eq!(root.max_observed(), 5.0);
        let p = TaxonomyLevel::Phylum;
        let cmps = vec![
            comparison("Keep", p, 0, Some(0)),
            comparison("Drop1", p, 1, Some(0)),
            comparison("Drop2", p, 2, Some(0)),
        ];
        let cohorts = vec![
            cohort("a", "Keep", p, 0, Some(0), 3.0),
            cohort("a", "Drop1", p, 1, Some(0), 0.0),
            cohort("a", "Drop2", p, 2, Some(0), 0.0),
            cohort("b", "Keep", p, 0, Some(0), 0.0),
            cohort("b", "Drop1", p, 1, Some(0), 0.0),
            cohort("b", "Drop2", p, 2, Some(0), 0.0),
        ];
        let groups = build_children(root, &cmps, &cohorts).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].comparison.name, "Keep");
    }

    #[test]
    fn test_merge_follows_each_cohorts_own_index() {
        let k = TaxonomyLevel::Kingdom;
        let p = TaxonomyLevel::Phylum;
        let tree = MultiTree::from_roots(
            1,
            comparison("root", k, 0, None),
            vec![cohort("a", "root", k, 5, None, 1.0), cohort("b", "root", k, 9, None, 1.0)],
        )
        .unwrap();
        let root = tree.node(tree.root()).unwrap();
        let cmps = vec![comparison("A", p, 0, Some(0)), comparison("B", p, 1, Some(0))];
        let cohorts = vec![
            cohort("a", "A", p, 3, Some(5), 1.0),
            cohort("a", "B", p, 4, Some(5), 1.0),
            // Belongs to another cohort-a parent that happens to share the comparison index.
            cohort("a", "Ghost", p, 0, Some(0), 1.0),
            cohort("b", "A", p, 7, Some(9), 1.0),
            cohort("b", "B", p, 8, Some(9), 1.0),
        ];
        let groups = build_children(root, &cmps, &cohorts).unwrap();
        let names: Vec<_> = groups.iter().map(|g| g.comparison.name.as_str()).collect();
        assert_eq!(names, ["A", "B"]);
        assert_eq!(groups[0].cohorts[0].node_index, 3);
        assert_eq!(groups[0].cohorts[1].node_index, 7);
        assert_eq!(groups[1].cohorts[0].node_index, 4);
        assert_eq!(groups[1].cohorts[1].node_index, 8);
    }

    #[test]
    fn test_fetch_states_and_visibility() {
        let mut tree = two_cohort_tree();
        let root = tree.root();
        assert_eq!(tree.begin_fetch(&[root]).unwrap(), vec![root]);
        assert_eq!(tree.node(root).unwrap().fetch_state(), &FetchState::Fetching);
        assert!(tree.begin_fetch(&[root]).unwrap().is_empty());

        tree.abort_fetch(&[root]);
        assert_eq!(tree.node(root).unwrap().fetch_state(), &FetchState::Unfetched);

        tree.begin_fetch(&[root]).unwrap();
        assert_eq!(tree.commit_children(root, Vec::new()), 0);
        let node = tree.node(root).unwrap();
        assert!(node.is_fetched());
        assert_eq!(node.children(), Some(&[][..]));
        assert_eq!(node.visible_children(), None);

        tree.set_expanded(root, true).unwrap();
        assert_eq!(tree.visible_nodes(), vec![root]);
        assert!(tree.begin_fetch(&[root]).unwrap().is_empty());
        assert!(matches!(
            tree.begin_fetch(&[NodeId(42)]),
            Err(Error::UnknownNode(_))
        ));
    }

    #[test]
    fn test_visible_nodes_preorder() {
        let mut tree = two_cohort_tree();
        let root = tree.root();
        let p = TaxonomyLevel::Phylum;
        let group = |name: &str, idx| ChildGroup {
            comparison: comparison(name, p, idx, Some(0)),
            cohorts: vec![
                cohort("a", name, p, idx, Some(0), 1.0),
                cohort("b", name, p, idx, Some(0), 1.0),
            ],
        };
        tree.commit_children(root, vec![group("A", 0), group("B", 1)]);
        let a = tree.find("A").unwrap();
        let c = TaxonomyLevel::Class;
        tree.commit_children(
            a,
            vec![ChildGroup {
                comparison: comparison("A1", c, 0, Some(0)),
                cohorts: vec![
                    cohort("a", "A1", c, 0, Some(0), 1.0),
                    cohort("b", "A1", c, 0, Some(0), 1.0),
                ],
            }],
        );
        let a1 = tree.find("A1").unwrap();
        let b = tree.find("B").unwrap();
        assert_eq!(tree.node(a1).unwrap().depth(), 2);
        assert_eq!(tree.node(a1).unwrap().parent(), Some(a));

        tree.set_expanded(root, true).unwrap();
        assert_eq!(tree.visible_nodes(), vec![root, a, b]);
        tree.set_expanded(a, true).unwrap();
        assert_eq!(tree.visible_nodes(), vec![root, a, a1, b]);
        assert_eq!(tree.visible_links(), vec![(root, a), (root, b), (a, a1)]);

        tree.set_expanded(root, false).unwrap();
        assert_eq!(tree.visible_nodes(), vec![root]);
        assert_eq!(tree.len(), 4);
    }
}
