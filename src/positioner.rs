//! Generic tree-positioning pass.
//!
//! The layout engine only needs one `(breadth, depth_axis)` pair per node in a
//! top-to-bottom orientation; anything implementing [`TreePositioner`] works.

/// Assigns initial coordinates to a tree given in pre-order.
pub trait TreePositioner {
    /// `parents[i]` is the slot of node `i`'s parent (always `< i`), `None`
    /// for the root. Returns `(breadth, depth_axis)` per slot.
    fn position(&self, parents: &[Option<usize>]) -> Vec<(f64, f64)>;
}

/// Leaves on consecutive slots, parents centred over their children.
#[derive(Debug, Clone)]
pub struct TidyPositioner {
    /// Breadth distance between two leaves.
    pub breadth_unit: f64,
    /// Separation between adjacent siblings, in breadth units.
    pub sibling_separation: f64,
    /// Separation between adjacent leaves of different parents, in breadth units.
    pub subtree_separation: f64,
    /// Depth-axis distance between levels.
    pub level_separation: f64,
}

impl Default for TidyPositioner {
    fn default() -> Self {
        TidyPositioner {
            breadth_unit: 24.0,
            sibling_separation: 1.0,
            subtree_separation: 2.0,
            level_separation: 1.0,
        }
    }
}

impl TreePositioner for TidyPositioner {
    fn position(&self, parents: &[Option<usize>]) -> Vec<(f64, f64)> {
        let n = parents.len();
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut depth = vec![0usize; n];
        for (slot, parent) in parents.iter().enumerate() {
            if let Some(p) = *parent {
                children[p].push(slot);
                depth[slot] = depth[p] + 1;
            }
        }

        // Leaves in pre-order get the next free position.
        let mut breadth = vec![0.0f64; n];
        let mut cursor: Option<(f64, Option<usize>)> = None;
        for slot in 0..n {
            if !children[slot].is_empty() {
                continue;
            }
            let pos = match cursor {
                None => 0.0,
                Some((last, last_parent)) => {
                    let gap = if last_parent == parents[slot] {
                        self.sibling_separation
                    } else {
                        self.subtree_separation
                    };
                    last + gap * self.breadth_unit
                }
            };
            breadth[slot] = pos;
            cursor = Some((pos, parents[slot]));
        }

        // Children always follow their parent, so a reverse sweep sees them first.
        for slot in (0..n).rev() {
            if let (Some(&first), Some(&last)) = (children[slot].first(), children[slot].last()) {
                breadth[slot] = (breadth[first] + breadth[last]) / 2.0;
            }
        }

        (0..n)
            .map(|slot| (breadth[slot], depth[slot] as f64 * self.level_separation))
            .collect()
    }
}
