//! Comparative taxonomy trees across several cohorts.
//!
//! A [`MultiTree`] holds one node per taxon, each carrying the comparison
//! record and one record per cohort. [`TreeSession`] fetches children on
//! demand from a [`ComparisonSource`] and a [`CohortSource`], pruning taxa
//! without signal in any cohort. [`LayoutEngine`] turns the visible part of
//! the tree into stacked cohort blocks with curved connectors, and
//! [`render`] writes it out as SVG, PNG and TSV tables.

pub mod distribution;
pub mod error;
pub mod layout;
pub mod positioner;
pub mod records;
pub mod render;
pub mod session;
pub mod source;
pub mod tree;

pub use distribution::{binned_distribution, DistributionBin};
pub use error::{Error, Result};
pub use layout::{CohortBlock, Connector, LayoutConfig, LayoutEngine, LayoutExtent};
pub use positioner::{TidyPositioner, TreePositioner};
pub use records::{CohortRecord, ComparisonRecord, Metric, MetricSummary, TaxonomyLevel};
pub use session::{RootNotice, TreeSession};
pub use source::{CohortSource, ComparisonSource, TableSource};
pub use tree::{FetchState, MultiNode, MultiTree, NodeId};
