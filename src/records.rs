//! Plain records describing one taxonomy node in the comparison hierarchy
//! and in each cohort hierarchy.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Fixed, ordered taxonomy levels. Ordering follows the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaxonomyLevel {
    Kingdom,
    Phylum,
    Class,
    Order,
    Family,
    Genus,
    Species,
    Otu,
}

impl TaxonomyLevel {
    pub const ALL: [TaxonomyLevel; 8] = [
        TaxonomyLevel::Kingdom,
        TaxonomyLevel::Phylum,
        TaxonomyLevel::Class,
        TaxonomyLevel::Order,
        TaxonomyLevel::Family,
        TaxonomyLevel::Genus,
        TaxonomyLevel::Species,
        TaxonomyLevel::Otu,
    ];

    /// The level directly below this one, if any.
    pub fn next(self) -> Option<TaxonomyLevel> {
        let pos = Self::ALL.iter().position(|&l| l == self)?;
        Self::ALL.get(pos + 1).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaxonomyLevel::Kingdom => "kingdom",
            TaxonomyLevel::Phylum => "phylum",
            TaxonomyLevel::Class => "class",
            TaxonomyLevel::Order => "order",
            TaxonomyLevel::Family => "family",
            TaxonomyLevel::Genus => "genus",
            TaxonomyLevel::Species => "species",
            TaxonomyLevel::Otu => "otu",
        }
    }
}

impl fmt::Display for TaxonomyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaxonomyLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|l| l.as_str() == lower)
            .ok_or_else(|| format!("unknown taxonomy level '{}'", s))
    }
}

/// The three per-cohort statistics carried by every cohort record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Relative abundance.
    Abundance,
    /// Unique-feature richness.
    Richness,
    /// Normalized entropy (evenness).
    Evenness,
}

/// Histogram over the non-zero range of a metric, as parallel arrays.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Histogram {
    bin_start: Vec<f64>,
    bin_end: Vec<f64>,
    bin_height: Vec<f64>,
}

impl Histogram {
    /// Builds a histogram, checking that the arrays line up and bins do not overlap.
    pub fn new(bin_start: Vec<f64>, bin_end: Vec<f64>, bin_height: Vec<f64>) -> Result<Self> {
        if bin_start.len() != bin_end.len() || bin_start.len() != bin_height.len() {
            return Err(Error::MalformedHistogram(format!(
                "array lengths differ: {} starts, {} ends, {} heights",
                bin_start.len(),
                bin_end.len(),
                bin_height.len()
            )));
        }
        for i in 0..bin_start.len() {
            if bin_start[i] > bin_end[i] {
                return Err(Error::MalformedHistogram(format!(
                    "bin {} starts at {} after its end {}",
                    i, bin_start[i], bin_end[i]
                )));
            }
            if i + 1 < bin_start.len() && bin_end[i] > bin_start[i + 1] {
                return Err(Error::MalformedHistogram(format!(
                    "bin {} ends at {} after bin {} starts at {}",
                    i,
                    bin_end[i],
                    i + 1,
                    bin_start[i + 1]
                )));
            }
        }
        Ok(Histogram {
            bin_start,
            bin_end,
            bin_height,
        })
    }

    pub fn len(&self) -> usize {
        self.bin_start.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bin_start.is_empty()
    }

    /// (start, end, height) of each bin.
    pub fn bins(&self) -> impl Iterator<Item = (f64, f64, f64)> + '_ {
        self.bin_start
            .iter()
            .zip(&self.bin_end)
            .zip(&self.bin_height)
            .map(|((&s, &e), &h)| (s, e, h))
    }
}

/// Summary of one metric for one cohort at one node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricSummary {
    pub mean: f64,
    /// Number of observations exactly at zero.
    pub zero_count: u64,
    /// Upper-tail quantile of the observations.
    pub upper_quantile: f64,
    pub histogram: Histogram,
}

/// One taxonomy node within one comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonRecord {
    pub comparison_id: String,
    pub id: String,
    pub name: String,
    pub level: TaxonomyLevel,
    /// Index of this node within its level.
    pub node_index: usize,
    /// Index of the parent within the parent's level; `None` for a root.
    pub parent_index: Option<usize>,
    top_feature_ranks: Vec<u32>,
}

impl ComparisonRecord {
    pub fn new(
        comparison_id: impl Into<String>,
        id: impl Into<String>,
        name: impl Into<String>,
        level: TaxonomyLevel,
        node_index: usize,
        parent_index: Option<usize>,
        mut top_feature_ranks: Vec<u32>,
    ) -> Self {
        top_feature_ranks.sort_unstable();
        ComparisonRecord {
            comparison_id: comparison_id.into(),
            id: id.into(),
            name: name.into(),
            level,
            node_index,
            parent_index,
            top_feature_ranks,
        }
    }

    /// Ranks of the top features below this node, ascending.
    pub fn top_feature_ranks(&self) -> &[u32] {
        &self.top_feature_ranks
    }

    /// Index of the first rank at or above `threshold`.
    pub fn first_rank_at_or_above(&self, threshold: u32) -> Option<usize> {
        let idx = self.top_feature_ranks.partition_point(|&rank| rank < threshold);
        (idx < self.top_feature_ranks.len()).then_some(idx)
    }

    /// Index (not count) of the first top feature ranked at or above
    /// `threshold`, or -1 when there is none.
    pub fn top_feature_count_above(&self, threshold: u32) -> i64 {
        self.first_rank_at_or_above(threshold)
            .map_or(-1, |idx| idx as i64)
    }
}

/// One taxonomy node within one cohort.
#[derive(Debug, Clone, PartialEq)]
pub struct CohortRecord {
    pub cohort_id: String,
    pub id: String,
    pub name: String,
    pub level: TaxonomyLevel,
    pub node_index: usize,
    pub parent_index: Option<usize>,
    pub abundance: MetricSummary,
    pub richness: MetricSummary,
    pub evenness: MetricSummary,
}

impl CohortRecord {
    pub fn summary(&self, metric: Metric) -> &MetricSummary {
        match metric {
            Metric::Abundance => &self.abundance,
            Metric::Richness => &self.richness,
            Metric::Evenness => &self.evenness,
        }
    }

    /// Value this cohort contributes to the node's stacked blocks.
    pub fn block_value(&self) -> f64 {
        self.abundance.mean
    }

    /// Tail statistic used to decide whether the node carries any signal.
    pub fn tail_value(&self) -> f64 {
        self.abundance.upper_quantile
    }
}
