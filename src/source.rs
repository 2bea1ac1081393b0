//! Node collaborators: the two hierarchy sources the tree fetches from, and a
//! file-backed implementation reading TSV tables.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::rc::Rc;

use async_trait::async_trait;
use log::{debug, info};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{Error, Result};
use crate::records::{CohortRecord, ComparisonRecord, Histogram, MetricSummary, TaxonomyLevel};

/// Source of comparison-hierarchy records. Pagination, if any, is hidden
/// behind each call.
#[async_trait(?Send)]
pub trait ComparisonSource {
    /// All records of one comparison at the given levels.
    async fn nodes_at_levels(
        &self,
        comparison_id: &str,
        levels: &[TaxonomyLevel],
    ) -> Result<Vec<ComparisonRecord>>;

    /// Direct children of every parent, in one resolved vector.
    async fn children_of(&self, parents: &[ComparisonRecord]) -> Result<Vec<ComparisonRecord>>;
}

/// Source of cohort-hierarchy records.
#[async_trait(?Send)]
pub trait CohortSource {
    /// All records of the given cohorts at the given levels.
    async fn nodes_at_levels(
        &self,
        cohort_ids: &[String],
        levels: &[TaxonomyLevel],
    ) -> Result<Vec<CohortRecord>>;

    /// Direct children of `parents`, which all belong to `cohort_id`.
    async fn children_of(&self, cohort_id: &str, parents: &[CohortRecord])
        -> Result<Vec<CohortRecord>>;
}

#[async_trait(?Send)]
impl<T: ComparisonSource + ?Sized> ComparisonSource for Rc<T> {
    async fn nodes_at_levels(
        &self,
        comparison_id: &str,
        levels: &[TaxonomyLevel],
    ) -> Result<Vec<ComparisonRecord>> {
        (**self).nodes_at_levels(comparison_id, levels).await
    }

    async fn children_of(&self, parents: &[ComparisonRecord]) -> Result<Vec<ComparisonRecord>> {
        (**self).children_of(parents).await
    }
}

#[async_trait(?Send)]
impl<T: CohortSource + ?Sized> CohortSource for Rc<T> {
    async fn nodes_at_levels(
        &self,
        cohort_ids: &[String],
        levels: &[TaxonomyLevel],
    ) -> Result<Vec<CohortRecord>> {
        (**self).nodes_at_levels(cohort_ids, levels).await
    }

    async fn children_of(
        &self,
        cohort_id: &str,
        parents: &[CohortRecord],
    ) -> Result<Vec<CohortRecord>> {
        (**self).children_of(cohort_id, parents).await
    }
}

/// In-memory node tables, usually loaded from TSV files.
#[derive(Debug, Default, Clone)]
pub struct TableSource {
    comparisons: FxHashMap<String, Vec<ComparisonRecord>>,
    cohorts: FxHashMap<String, Vec<CohortRecord>>,
}

impl TableSource {
    pub fn from_records(comparisons: Vec<ComparisonRecord>, cohorts: Vec<CohortRecord>) -> Self {
        let mut source = TableSource::default();
        for rec in comparisons {
            source
                .comparisons
                .entry(rec.comparison_id.clone())
                .or_default()
                .push(rec);
        }
        for rec in cohorts {
            source.cohorts.entry(rec.cohort_id.clone()).or_default().push(rec);
        }
        source
    }

    /// Reads a comparison table and a cohort table.
    pub fn load(comparison_path: &Path, cohort_path: &Path) -> Result<Self> {
        info!("Loading comparison table {:?}...", comparison_path);
        let comparisons = read_table(comparison_path, parse_comparison_line)?;
        info!("Loading cohort table {:?}...", cohort_path);
        let cohorts = read_table(cohort_path, parse_cohort_line)?;
        info!(
            "Found {} comparison records, {} cohort records",
            comparisons.len(),
            cohorts.len()
        );
        Ok(Self::from_records(comparisons, cohorts))
    }

    pub fn comparison_ids(&self) -> impl Iterator<Item = &str> {
        self.comparisons.keys().map(String::as_str)
    }

    pub fn cohort_ids(&self) -> impl Iterator<Item = &str> {
        self.cohorts.keys().map(String::as_str)
    }
}

/// (child level, parent node index) keys of the children of `parents`.
fn child_keys(
    parents: impl Iterator<Item = (TaxonomyLevel, usize)>,
) -> FxHashSet<(TaxonomyLevel, usize)> {
    parents
        .filter_map(|(level, index)| level.next().map(|child| (child, index)))
        .collect()
}

#[async_trait(?Send)]
impl ComparisonSource for TableSource {
    async fn nodes_at_levels(
        &self,
        comparison_id: &str,
        levels: &[TaxonomyLevel],
    ) -> Result<Vec<ComparisonRecord>> {
        Ok(self
            .comparisons
            .get(comparison_id)
            .map(|recs| {
                recs.iter()
                    .filter(|r| levels.contains(&r.level))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn children_of(&self, parents: &[ComparisonRecord]) -> Result<Vec<ComparisonRecord>> {
        let mut by_comparison: FxHashMap<&str, Vec<&ComparisonRecord>> = FxHashMap::default();
        for parent in parents {
            by_comparison
                .entry(parent.comparison_id.as_str())
                .or_default()
                .push(parent);
        }
        let mut children = Vec::new();
        for (comparison_id, group) in by_comparison {
            let keys = child_keys(group.iter().map(|p| (p.level, p.node_index)));
            if let Some(recs) = self.comparisons.get(comparison_id) {
                children.extend(
                    recs.iter()
                        .filter(|r| r.parent_index.map_or(false, |p| keys.contains(&(r.level, p))))
                        .cloned(),
                );
            }
        }
        debug!("comparison children: {} for {} parents", children.len(), parents.len());
        Ok(children)
    }
}

#[async_trait(?Send)]
impl CohortSource for TableSource {
    async fn nodes_at_levels(
        &self,
        cohort_ids: &[String],
        levels: &[TaxonomyLevel],
    ) -> Result<Vec<CohortRecord>> {
        let mut found = Vec::new();
        for cohort_id in cohort_ids {
            if let Some(recs) = self.cohorts.get(cohort_id) {
                found.extend(recs.iter().filter(|r| levels.contains(&r.level)).cloned());
            }
        }
        Ok(found)
    }

    async fn children_of(
        &self,
        cohort_id: &str,
        parents: &[CohortRecord],
    ) -> Result<Vec<CohortRecord>> {
        let keys = child_keys(parents.iter().map(|p| (p.level, p.node_index)));
        let children: Vec<CohortRecord> = self
            .cohorts
            .get(cohort_id)
            .map(|recs| {
                recs.iter()
                    .filter(|r| r.parent_index.map_or(false, |p| keys.contains(&(r.level, p))))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        debug!(
            "cohort {} children: {} for {} parents",
            cohort_id,
            children.len(),
            parents.len()
        );
        Ok(children)
    }
}

fn read_table<T>(path: &Path, parse: fn(usize, &str) -> Result<T>) -> Result<Vec<T>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        records.push(parse(idx + 1, &line)?);
    }
    Ok(records)
}

fn parse_error(line: usize, message: impl Into<String>) -> Error {
    Error::Parse {
        line,
        message: message.into(),
    }
}

fn parse_field<T: std::str::FromStr>(line: usize, name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| parse_error(line, format!("invalid {} '{}'", name, value)))
}

fn parse_parent(line: usize, value: &str) -> Result<Option<usize>> {
    match value.trim() {
        "-" | "" => Ok(None),
        v => parse_field(line, "parent_index", v).map(Some),
    }
}

fn parse_list<T: std::str::FromStr>(line: usize, name: &str, value: &str) -> Result<Vec<T>> {
    let value = value.trim();
    if value == "-" || value.is_empty() {
        return Ok(Vec::new());
    }
    value
        .split(',')
        .map(|item| parse_field(line, name, item))
        .collect()
}

fn parse_level(line: usize, value: &str) -> Result<TaxonomyLevel> {
    value
        .parse::<TaxonomyLevel>()
        .map_err(|e| parse_error(line, e))
}

/// `comparison_id id name level node_index parent_index ranks`
pub fn parse_comparison_line(line: usize, text: &str) -> Result<ComparisonRecord> {
    let parts: Vec<&str> = text.split('\t').collect();
    if parts.len() < 7 {
        return Err(parse_error(
            line,
            format!("expected 7 comparison columns, found {}", parts.len()),
        ));
    }
    Ok(ComparisonRecord::new(
        parts[0].trim(),
        parts[1].trim(),
        parts[2].trim(),
        parse_level(line, parts[3])?,
        parse_field(line, "node_index", parts[4])?,
        parse_parent(line, parts[5])?,
        parse_list(line, "rank", parts[6])?,
    ))
}

fn parse_summary(line: usize, cols: &[&str]) -> Result<MetricSummary> {
    let histogram = Histogram::new(
        parse_list(line, "bin start", cols[3])?,
        parse_list(line, "bin end", cols[4])?,
        parse_list(line, "bin height", cols[5])?,
    )
    .map_err(|e| parse_error(line, e.to_string()))?;
    Ok(MetricSummary {
        mean: parse_field(line, "mean", cols[0])?,
        zero_count: parse_field(line, "zero count", cols[1])?,
        upper_quantile: parse_field(line, "upper quantile", cols[2])?,
        histogram,
    })
}

/// `cohort_id id name level node_index parent_index`, then `mean zero_count
/// upper_quantile bin_starts bin_ends bin_heights` for abundance, richness
/// and evenness.
pub fn parse_cohort_line(line: usize, text: &str) -> Result<CohortRecord> {
    let parts: Vec<&str> = text.split('\t').collect();
    if parts.len() < 24 {
        return Err(parse_error(
            line,
            format!("expected 24 cohort columns, found {}", parts.len()),
        ));
    }
    Ok(CohortRecord {
        cohort_id: parts[0].trim().to_string(),
        id: parts[1].trim().to_string(),
        name: parts[2].trim().to_string(),
        level: parse_level(line, parts[3])?,
        node_index: parse_field(line, "node_index", parts[4])?,
        parent_index: parse_parent(line, parts[5])?,
        abundance: parse_summary(line, &parts[6..12])?,
        richness: parse_summary(line, &parts[12..18])?,
        evenness: parse_summary(line, &parts[18..24])?,
    })
}
