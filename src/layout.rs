//! Layout of the visible part of a [`MultiTree`]: depth columns, stacked
//! cohort blocks, collision resolution and connector curves.

use log::debug;
use rayon::prelude::*;
use rustc_hash::FxHashMap;

use crate::positioner::{TidyPositioner, TreePositioner};
use crate::tree::{MultiTree, NodeId};

/// Cubic connector between a parent block and a child block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Connector {
    pub source: (f64, f64),
    pub control1: (f64, f64),
    pub control2: (f64, f64),
    pub target: (f64, f64),
    /// Stroke width, the height of the child block.
    pub width: f64,
}

impl Connector {
    /// Control points sit at `curvature` and `1 - curvature` of the way
    /// between the endpoints, each at its own endpoint's height.
    pub fn between(source: (f64, f64), target: (f64, f64), curvature: f64, width: f64) -> Self {
        let (x0, y0) = source;
        let (x1, y1) = target;
        let lerp = |t: f64| x0 + (x1 - x0) * t;
        Connector {
            source,
            control1: (lerp(curvature), y0),
            control2: (lerp(1.0 - curvature), y1),
            target,
            width,
        }
    }

    /// SVG path data for the curve.
    pub fn svg_path(&self) -> String {
        format!(
            "M{:.2},{:.2}C{:.2},{:.2} {:.2},{:.2} {:.2},{:.2}",
            self.source.0,
            self.source.1,
            self.control1.0,
            self.control1.1,
            self.control2.0,
            self.control2.1,
            self.target.0,
            self.target.1
        )
    }

    /// Point on the curve at parameter `t` in `[0, 1]`.
    pub fn point_at(&self, t: f64) -> (f64, f64) {
        let u = 1.0 - t;
        let (a, b, c, d) = (u * u * u, 3.0 * u * u * t, 3.0 * u * t * t, t * t * t);
        (
            a * self.source.0 + b * self.control1.0 + c * self.control2.0 + d * self.target.0,
            a * self.source.1 + b * self.control1.1 + c * self.control2.1 + d * self.target.1,
        )
    }
}

/// Rectangle of one cohort at one node, relative to the node's `y`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CohortBlock {
    pub y: f64,
    pub height: f64,
    /// Curve to the matching block of the parent; `None` at the root.
    pub connector: Option<Connector>,
}

#[derive(Debug, Clone)]
pub struct LayoutConfig {
    /// Distance between depth columns.
    pub horizontal_spacing: f64,
    /// Width of every cohort block.
    pub node_width: f64,
    /// Multiplier from cohort value to block height.
    pub abundance_scale: f64,
    /// Minimum vertical gap between stacks in one column.
    pub min_spacing: f64,
    pub curvature: f64,
    /// Top levels not drawn; shifts every column left.
    pub hidden_top_levels: usize,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        LayoutConfig {
            horizontal_spacing: 180.0,
            node_width: 12.0,
            abundance_scale: 200.0,
            min_spacing: 8.0,
            curvature: 0.5,
            hidden_top_levels: 0,
        }
    }
}

/// Bounding box of the laid-out blocks.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LayoutExtent {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl LayoutExtent {
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }
}

/// Stacks one block per value, centred on zero, in the given order.
/// Zero, negative and non-finite values give zero-height blocks that keep
/// their place in the stack.
pub fn stack_blocks(values: &[f64], scale: f64) -> Vec<CohortBlock> {
    let heights: Vec<f64> = values
        .iter()
        .map(|v| {
            let h = v * scale;
            if h.is_finite() && h > 0.0 {
                h
            } else {
                0.0
            }
        })
        .collect();
    let total: f64 = heights.iter().sum();
    let mut offset = -total / 2.0;
    heights
        .into_iter()
        .map(|height| {
            let block = CohortBlock {
                y: offset,
                height,
                connector: None,
            };
            offset += height;
            block
        })
        .collect()
}

/// Vertical extent of one node's stack while resolving a column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StackSpan {
    pub y: f64,
    /// Top edge relative to `y` (usually negative).
    pub top: f64,
    pub height: f64,
}

/// Greedy single pass over one column: sorts by `y`, then pushes each stack
/// down until it clears the previous one by `min_spacing`. Stacks never move
/// up. Returns how many stacks were shifted.
pub fn resolve_collisions(column: &mut [StackSpan], min_spacing: f64) -> usize {
    column.sort_by(|a, b| a.y.total_cmp(&b.y));
    let mut last_bottom = 0.0f64;
    let mut shifted = 0;
    for span in column.iter_mut() {
        let top = span.y + span.top;
        let wanted = last_bottom + min_spacing;
        if wanted > top {
            span.y += wanted - top;
            shifted += 1;
        }
        last_bottom = span.y + span.top + span.height;
    }
    shifted
}

/// Lays out the visible nodes of a tree.
pub struct LayoutEngine<P = TidyPositioner> {
    config: LayoutConfig,
    positioner: P,
}

impl LayoutEngine<TidyPositioner> {
    pub fn new(config: LayoutConfig) -> Self {
        LayoutEngine {
            config,
            positioner: TidyPositioner::default(),
        }
    }
}

impl<P: TreePositioner> LayoutEngine<P> {
    pub fn with_positioner(config: LayoutConfig, positioner: P) -> Self {
        LayoutEngine { config, positioner }
    }

    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    /// Sets `x`, `y` and cohort blocks on every visible node and connectors on
    /// every visible non-root block.
    pub fn apply(&self, tree: &mut MultiTree) -> LayoutExtent {
        let visible = tree.visible_nodes();
        let links = tree.visible_links();

        let slot_of: FxHashMap<NodeId, usize> =
            visible.iter().enumerate().map(|(slot, &id)| (id, slot)).collect();
        let parents: Vec<Option<usize>> = visible
            .iter()
            .map(|&id| {
                tree.get(id)
                    .and_then(|n| n.parent())
                    .and_then(|p| slot_of.get(&p).copied())
            })
            .collect();
        let positions = self.positioner.position(&parents);

        // Position and stack every visible node.
        let mut breadth_of: Vec<Option<f64>> = vec![None; tree.len()];
        for (slot, id) in visible.iter().enumerate() {
            breadth_of[id.index()] = positions.get(slot).map(|p| p.0);
        }
        let config = &self.config;
        tree.nodes_mut()
            .par_iter_mut()
            .zip(breadth_of.par_iter())
            .for_each(|(node, breadth)| {
                if let Some(breadth) = *breadth {
                    let column = node.depth() as f64 - config.hidden_top_levels as f64;
                    node.x = column * config.horizontal_spacing;
                    node.y = breadth;
                    let values: Vec<f64> = node.cohorts().iter().map(|c| c.block_value()).collect();
                    node.blocks = stack_blocks(&values, config.abundance_scale);
                }
            });

        // Resolve collisions one depth column at a time.
        let mut columns: FxHashMap<usize, Vec<(NodeId, StackSpan)>> = FxHashMap::default();
        for &id in &visible {
            if let Some(node) = tree.get(id) {
                let span = StackSpan {
                    y: node.y,
                    top: node.stack_top(),
                    height: node.stack_bottom() - node.stack_top(),
                };
                columns.entry(node.depth()).or_default().push((id, span));
            }
        }
        let mut columns: Vec<Vec<(NodeId, StackSpan)>> = columns.into_values().collect();
        let shifted: usize = columns
            .par_iter_mut()
            .map(|column| {
                // Pre-sorted, so the stable sort inside keeps ids and spans aligned.
                column.sort_by(|a, b| a.1.y.total_cmp(&b.1.y));
                let mut spans: Vec<StackSpan> = column.iter().map(|&(_, span)| span).collect();
                let shifted = resolve_collisions(&mut spans, config.min_spacing);
                for (entry, span) in column.iter_mut().zip(spans) {
                    entry.1 = span;
                }
                shifted
            })
            .sum();
        for column in &columns {
            for &(id, span) in column {
                if let Ok(node) = tree.node_mut(id) {
                    node.y = span.y;
                }
            }
        }
        debug!(
            "Layout: {} visible nodes in {} columns, {} shifted",
            visible.len(),
            columns.len(),
            shifted
        );

        self.connect(tree, &links);
        extent_of(tree, &visible, config.node_width)
    }

    /// Attaches a connector to every cohort block of each linked child.
    fn connect(&self, tree: &mut MultiTree, links: &[(NodeId, NodeId)]) {
        let mut by_parent: FxHashMap<NodeId, Vec<NodeId>> = FxHashMap::default();
        let mut parent_order = Vec::new();
        for &(parent, child) in links {
            by_parent
                .entry(parent)
                .or_insert_with(|| {
                    parent_order.push(parent);
                    Vec::new()
                })
                .push(child);
        }

        for parent in parent_order {
            let mut children = by_parent.remove(&parent).unwrap_or_default();
            children.sort_by(|a, b| {
                let ya = tree.get(*a).map_or(0.0, |n| n.y);
                let yb = tree.get(*b).map_or(0.0, |n| n.y);
                ya.total_cmp(&yb)
            });
            let sources: Vec<(f64, f64)> = match tree.get(parent) {
                Some(p) => p
                    .blocks
                    .iter()
                    .map(|b| (p.x + self.config.node_width, p.y + b.y + b.height / 2.0))
                    .collect(),
                None => continue,
            };
            for child in children {
                let node = match tree.node_mut(child) {
                    Ok(node) => node,
                    Err(_) => continue,
                };
                let (cx, cy) = (node.x, node.y);
                for (block, &source) in node.blocks.iter_mut().zip(&sources) {
                    let target = (cx, cy + block.y + block.height / 2.0);
                    block.connector = Some(Connector::between(
                        source,
                        target,
                        self.config.curvature,
                        block.height,
                    ));
                }
            }
        }
    }
}

fn extent_of(tree: &MultiTree, visible: &[NodeId], node_width: f64) -> LayoutExtent {
    let mut extent: Option<LayoutExtent> = None;
    for node in visible.iter().filter_map(|&id| tree.get(id)) {
        let (x0, x1) = (node.x, node.x + node_width);
        let (y0, y1) = (node.y + node.stack_top(), node.y + node.stack_bottom());
        extent = Some(match extent {
            None => LayoutExtent {
                min_x: x0,
                min_y: y0,
                max_x: x1,
                max_y: y1,
            },
            Some(e) => LayoutExtent {
                min_x: e.min_x.min(x0),
                min_y: e.min_y.min(y0),
                max_x: e.max_x.max(x1),
                max_y: e.max_y.max(y1),
            },
        });
    }
    extent.unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::TaxonomyLevel;
    use crate::tree::tests::{cohort, comparison};
    use crate::tree::ChildGroup;

    #[test]
    fn test_stacking_is_contiguous_and_centred() {
        let blocks = stack_blocks(&[0.1, 0.0, 0.3], 100.0);
        assert_eq!(blocks.len(), 3);
        assert!((blocks[0].y + 20.0).abs() < 1e-9);
        assert!((blocks[0].height - 10.0).abs() < 1e-9);
        assert_eq!(blocks[1].height, 0.0);
        for pair in blocks.windows(2) {
            assert!((pair[1].y - (pair[0].y + pair[0].height)).abs() < 1e-9);
        }
        let total: f64 = blocks.iter().map(|b| b.height).sum();
        assert!((total - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_stacking_degenerates_to_zero() {
        let blocks = stack_blocks(&[0.0, -1.0, f64::NAN], 10.0);
        assert!(blocks.iter().all(|b| b.y == 0.0 && b.height == 0.0));
    }

    #[test]
    fn test_collisions_push_down_only() {
        let original = vec![
            StackSpan { y: 10.0, top: -5.0, height: 10.0 },
            StackSpan { y: 12.0, top: -5.0, height: 10.0 },
            StackSpan { y: 100.0, top: -5.0, height: 10.0 },
            StackSpan { y: 14.0, top: -2.0, height: 4.0 },
        ];
        let mut column = original.clone();
        let shifted = resolve_collisions(&mut column, 3.0);
        assert_eq!(shifted, 2);

        let ys: Vec<f64> = column.iter().map(|s| s.y).collect();
        assert_eq!(ys, vec![10.0, 23.0, 33.0, 100.0]);
        for pair in column.windows(2) {
            let bottom = pair[0].y + pair[0].top + pair[0].height;
            let top = pair[1].y + pair[1].top;
            assert!(bottom + 3.0 <= top + 1e-9);
        }
        let mut before: Vec<f64> = original.iter().map(|s| s.y).collect();
        before.sort_by(f64::total_cmp);
        for (b, a) in before.iter().zip(&ys) {
            assert!(a >= b);
        }
    }

    #[test]
    fn test_connector_control_points() {
        let c = Connector::between((0.0, 0.0), (100.0, 50.0), 0.5, 4.0);
        assert_eq!(c.control1, (50.0, 0.0));
        assert_eq!(c.control2, (50.0, 50.0));
        assert_eq!(c.point_at(0.0), (0.0, 0.0));
        assert_eq!(c.point_at(1.0), (100.0, 50.0));
        assert_eq!(c.svg_path(), "M0.00,0.00C50.00,0.00 50.00,50.00 100.00,50.00");

        let tight = Connector::between((0.0, 0.0), (100.0, 0.0), 0.25, 1.0);
        assert_eq!(tight.control1.0, 25.0);
        assert_eq!(tight.control2.0, 75.0);
    }

    fn sample_tree() -> MultiTree {
        let k = TaxonomyLevel::Kingdom;
        let p = TaxonomyLevel::Phylum;
        let mut tree = MultiTree::from_roots(
            1,
            comparison("root", k, 0, None),
            vec![cohort("a", "root", k, 0, None, 0.4), cohort("b", "root", k, 0, None, 0.2)],
        )
        .unwrap();
        let root = tree.root();
        let groups = ["A", "B", "C"]
            .iter()
            .enumerate()
            .map(|(i, name)| ChildGroup {
                comparison: comparison(name, p, i, Some(0)),
                cohorts: vec![
                    cohort("a", name, p, i, Some(0), 0.2),
                    cohort("b", name, p, i, Some(0), 0.1 * i as f64),
                ],
            })
            .collect();
        tree.commit_children(root, groups);
        tree.set_expanded(root, true).unwrap();
        tree
    }

    #[test]
    fn test_apply_assigns_geometry() {
        let mut tree = sample_tree();
        let engine = LayoutEngine::new(LayoutConfig::default());
        let extent = engine.apply(&mut tree);
        let config = engine.config();

        let root = tree.node(tree.root()).unwrap();
        assert_eq!(root.x, 0.0);
        assert!(root.blocks.iter().all(|b| b.connector.is_none()));

        let children: Vec<_> = root.children().unwrap().to_vec();
        let mut last_bottom = f64::NEG_INFINITY;
        for id in &children {
            let node = tree.node(*id).unwrap();
            assert_eq!(node.x, config.horizontal_spacing);
            assert_eq!(node.blocks.len(), 2);
            let expected: f64 = node
                .cohorts()
                .iter()
                .map(|c| c.block_value() * config.abundance_scale)
                .sum();
            let total: f64 = node.blocks.iter().map(|b| b.height).sum();
            assert!((total - expected).abs() < 1e-9);

            let top = node.y + node.stack_top();
            assert!(last_bottom + config.min_spacing <= top + 1e-9);
            last_bottom = node.y + node.stack_bottom();

            for (i, block) in node.blocks.iter().enumerate() {
                let conn = block.connector.expect("child blocks carry connectors");
                let pb = &root.blocks[i];
                assert_eq!(conn.source.0, root.x + config.node_width);
                assert!((conn.source.1 - (root.y + pb.y + pb.height / 2.0)).abs() < 1e-9);
                assert_eq!(conn.target.0, node.x);
                assert!((conn.target.1 - (node.y + block.y + block.height / 2.0)).abs() < 1e-9);
                assert_eq!(conn.width, block.height);
            }
        }

        // Zero-valued cohort keeps its slot with zero height.
        let a = tree.node(tree.find("A").unwrap()).unwrap();
        assert_eq!(a.blocks[1].height, 0.0);
        assert_eq!(a.blocks[1].y, a.blocks[0].y + a.blocks[0].height);

        assert_eq!(extent.min_x, 0.0);
        assert_eq!(extent.max_x, config.horizontal_spacing + config.node_width);
        assert!(extent.height() > 0.0);
    }

    #[test]
    fn test_hidden_top_levels_shift_columns() {
        let mut tree = sample_tree();
        let config = LayoutConfig {
            hidden_top_levels: 1,
            ..LayoutConfig::default()
        };
        LayoutEngine::new(config.clone()).apply(&mut tree);
        let child = tree.node(tree.find("B").unwrap()).unwrap();
        assert_eq!(child.x, 0.0);
        assert_eq!(tree.node(tree.root()).unwrap().x, -config.horizontal_spacing);
    }

    struct FlatPositioner;

    impl TreePositioner for FlatPositioner {
        fn position(&self, parents: &[Option<usize>]) -> Vec<(f64, f64)> {
            parents.iter().map(|_| (0.0, 999.0)).collect()
        }
    }

    #[test]
    fn test_pluggable_positioner_and_depth_columns() {
        let mut tree = sample_tree();
        let engine = LayoutEngine::with_positioner(LayoutConfig::default(), FlatPositioner);
        engine.apply(&mut tree);
        let mut ys = Vec::new();
        for name in ["A", "B", "C"] {
            let node = tree.node(tree.find(name).unwrap()).unwrap();
            assert_eq!(node.x, 180.0);
            ys.push(node.y);
        }
        // All started at 0; resolution separated them without overlap.
        assert!(ys.iter().all(|&y| y >= 0.0));
        ys.sort_by(f64::total_cmp);
        ys.dedup();
        assert_eq!(ys.len(), 3);
    }
}
