//! Fetch coordination for one displayed tree.
//!
//! A [`TreeSession`] owns the current [`MultiTree`], batches child fetches for
//! sibling nodes, joins the comparison and cohort responses, and publishes a
//! [`RootNotice`] whenever structure or visibility changes. It is meant for a
//! single-threaded event loop: the tree sits in a `RefCell` that is never
//! borrowed across an await.

use std::cell::{Cell, RefCell};

use futures::future::try_join_all;
use log::{debug, info, warn};
use rustc_hash::FxHashMap;
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::records::{CohortRecord, ComparisonRecord, TaxonomyLevel};
use crate::source::{CohortSource, ComparisonSource};
use crate::tree::{build_children, MultiTree, NodeId};

/// Published on every structural or visibility change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RootNotice {
    /// Identifies the loaded tree; bumps on every reload.
    pub generation: u64,
    /// Bumps on every notification within a generation.
    pub revision: u64,
    pub root: NodeId,
}

pub struct TreeSession<C, H> {
    comparisons: C,
    cohorts: H,
    comparison_id: RefCell<String>,
    tree: RefCell<Option<MultiTree>>,
    generation: Cell<u64>,
    revision: Cell<u64>,
    notifier: watch::Sender<Option<RootNotice>>,
}

impl<C: ComparisonSource, H: CohortSource> TreeSession<C, H> {
    pub fn new(comparisons: C, cohorts: H) -> Self {
        let (notifier, _) = watch::channel(None);
        TreeSession {
            comparisons,
            cohorts,
            comparison_id: RefCell::new(String::new()),
            tree: RefCell::new(None),
            generation: Cell::new(0),
            revision: Cell::new(0),
            notifier,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<RootNotice>> {
        self.notifier.subscribe()
    }

    /// Latest generation handed out by [`TreeSession::load`], whether or
    /// not that load has finished.
    pub fn generation(&self) -> u64 {
        self.generation.get()
    }

    fn publish(&self) {
        let notice = match self.tree.borrow().as_ref() {
            Some(tree) => RootNotice {
                generation: tree.generation(),
                revision: self.revision.get() + 1,
                root: tree.root(),
            },
            None => return,
        };
        self.revision.set(notice.revision);
        self.notifier.send_replace(Some(notice));
    }

    /// Runs `f` against the current tree.
    pub fn with_tree<R>(&self, f: impl FnOnce(&MultiTree) -> R) -> Result<R> {
        let guard = self.tree.borrow();
        guard.as_ref().map(f).ok_or(Error::NoTree)
    }

    /// Runs `f` against the current tree mutably (e.g. for layout).
    pub fn with_tree_mut<R>(&self, f: impl FnOnce(&mut MultiTree) -> R) -> Result<R> {
        let mut guard = self.tree.borrow_mut();
        guard.as_mut().map(f).ok_or(Error::NoTree)
    }

    /// Replaces the current tree with a fresh root for `comparison_id` and
    /// the given cohorts, in display order. The old tree stays in place if
    /// loading fails.
    pub async fn load(
        &self,
        comparison_id: &str,
        cohort_ids: &[String],
        root_level: TaxonomyLevel,
    ) -> Result<NodeId> {
        if cohort_ids.is_empty() {
            return Err(Error::NoCohorts);
        }
        // Reserved before the first await; a later load takes a higher one.
        let generation = self.generation.get() + 1;
        self.generation.set(generation);
        let levels = [root_level];
        let (comparison_roots, cohort_roots) = tokio::try_join!(
            self.comparisons.nodes_at_levels(comparison_id, &levels),
            self.cohorts.nodes_at_levels(cohort_ids, &levels),
        )?;

        let comparison = comparison_roots
            .into_iter()
            .find(|r| r.comparison_id == comparison_id)
            .ok_or_else(|| Error::MissingRoot {
                hierarchy: format!("comparison {}", comparison_id),
                level: root_level.to_string(),
            })?;
        let mut cohorts = Vec::with_capacity(cohort_ids.len());
        for cohort_id in cohort_ids {
            let root = cohort_roots
                .iter()
                .find(|r| &r.cohort_id == cohort_id)
                .cloned()
                .ok_or_else(|| Error::MissingRoot {
                    hierarchy: format!("cohort {}", cohort_id),
                    level: root_level.to_string(),
                })?;
            cohorts.push(root);
        }

        let tree = MultiTree::from_roots(generation, comparison, cohorts)?;
        let current = self.generation.get();
        if current != generation {
            warn!(
                "Discarding root of comparison {} loaded for generation {}, now {}",
                comparison_id, generation, current
            );
            return Err(Error::Superseded {
                requested: generation,
                current,
            });
        }
        let root = tree.root();
        self.revision.set(0);
        *self.comparison_id.borrow_mut() = comparison_id.to_string();
        *self.tree.borrow_mut() = Some(tree);
        info!(
            "Loaded {} root of comparison {} across {} cohorts (generation {})",
            root_level,
            comparison_id,
            cohort_ids.len(),
            generation
        );
        self.publish();
        Ok(root)
    }

    /// Fetches and merges the children of every unfetched node in `ids`.
    /// Returns the number of children created after pruning.
    pub async fn fetch_children(&self, ids: &[NodeId]) -> Result<usize> {
        let (generation, pending, comparison_parents, cohort_batches) = {
            let mut guard = self.tree.borrow_mut();
            let tree = guard.as_mut().ok_or(Error::NoTree)?;
            let pending = tree.begin_fetch(ids)?;
            if pending.is_empty() {
                return Ok(0);
            }

            let mut comparison_parents: Vec<ComparisonRecord> = Vec::with_capacity(pending.len());
            let mut batch_of: FxHashMap<String, usize> = FxHashMap::default();
            let mut cohort_batches: Vec<(String, Vec<CohortRecord>)> = Vec::new();
            for &id in &pending {
                let node = tree.node(id)?;
                comparison_parents.push(node.comparison().clone());
                for record in node.cohorts() {
                    let slot = *batch_of.entry(record.cohort_id.clone()).or_insert_with(|| {
                        cohort_batches.push((record.cohort_id.clone(), Vec::new()));
                        cohort_batches.len() - 1
                    });
                    cohort_batches[slot].1.push(record.clone());
                }
            }
            (tree.generation(), pending, comparison_parents, cohort_batches)
        };
        debug!(
            "Fetching children of {} nodes in {} cohort batches",
            pending.len(),
            cohort_batches.len()
        );

        let cohort_requests = cohort_batches
            .iter()
            .map(|(cohort_id, parents)| self.cohorts.children_of(cohort_id, parents));
        let fetched = tokio::try_join!(
            self.comparisons.children_of(&comparison_parents),
            try_join_all(cohort_requests),
        );

        let mut guard = self.tree.borrow_mut();
        let tree = match guard.as_mut() {
            Some(tree) if tree.generation() == generation => tree,
            _ => {
                warn!(
                    "Discarding children fetched for replaced tree generation {}",
                    generation
                );
                return Err(Error::Superseded {
                    requested: generation,
                    current: self.generation.get(),
                });
            }
        };

        let (comparison_children, cohort_children) = match fetched {
            Ok((comparison_children, cohort_children)) => (
                comparison_children,
                cohort_children.into_iter().flatten().collect::<Vec<_>>(),
            ),
            Err(e) => {
                tree.abort_fetch(&pending);
                return Err(e);
            }
        };

        let mut merged = Vec::with_capacity(pending.len());
        for &id in &pending {
            let groups = tree
                .node(id)
                .and_then(|node| build_children(node, &comparison_children, &cohort_children));
            match groups {
                Ok(groups) => merged.push((id, groups)),
                Err(e) => {
                    tree.abort_fetch(&pending);
                    return Err(e);
                }
            }
        }

        let mut created = 0;
        for (id, groups) in merged {
            created += tree.commit_children(id, groups);
        }
        drop(guard);
        debug!("Created {} children for {} nodes", created, pending.len());
        self.publish();
        Ok(created)
    }

    /// Fetches (if needed) and shows the children of `id`.
    pub async fn expand(&self, id: NodeId) -> Result<usize> {
        self.expand_all(&[id]).await
    }

    /// Fetches the children of all `ids` in one batch, then shows them.
    pub async fn expand_all(&self, ids: &[NodeId]) -> Result<usize> {
        let created = self.fetch_children(ids).await?;
        self.with_tree_mut(|tree| {
            ids.iter()
                .try_for_each(|&id| tree.set_expanded(id, true))
        })??;
        self.publish();
        Ok(created)
    }

    /// Hides the children of `id` without discarding them.
    pub fn collapse(&self, id: NodeId) -> Result<()> {
        self.with_tree_mut(|tree| tree.set_expanded(id, false))??;
        self.publish();
        Ok(())
    }

    /// Expands `id` if collapsed, collapses it otherwise.
    pub async fn toggle(&self, id: NodeId) -> Result<usize> {
        let expanded = self.with_tree(|tree| tree.node(id).map(|n| n.is_expanded()))??;
        if expanded {
            self.collapse(id)?;
            Ok(0)
        } else {
            self.expand(id).await
        }
    }

    /// Expands visible nodes level by level until every visible node above
    /// `max_depth` is expanded. One batched fetch per level.
    pub async fn expand_to_depth(&self, max_depth: usize) -> Result<usize> {
        let mut created = 0;
        loop {
            let frontier: Vec<NodeId> = self.with_tree(|tree| {
                tree.visible_nodes()
                    .into_iter()
                    .filter(|&id| {
                        tree.get(id)
                            .map_or(false, |n| n.depth() < max_depth && !n.is_expanded())
                    })
                    .collect()
            })?;
            if frontier.is_empty() {
                break;
            }
            created += self.expand_all(&frontier).await?;
        }
        info!(
            "Expanded comparison {} to depth {}: {} children fetched",
            self.comparison_id.borrow(),
            max_depth,
            created
        );
        Ok(created)
    }
}
