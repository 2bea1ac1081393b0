//! Binned distributions for auxiliary charts.

use crate::error::{Error, Result};
use crate::records::MetricSummary;

/// One bar group of a distribution chart: a label and one value per cohort.
#[derive(Debug, Clone, PartialEq)]
pub struct DistributionBin {
    pub label: String,
    pub values: Vec<f64>,
}

/// Formats a bin edge without trailing zeros.
fn format_edge(value: f64) -> String {
    let text = format!("{:.3}", value);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text == "-0" {
        "0".to_string()
    } else {
        text.to_string()
    }
}

fn range_label(start: f64, end: f64, first: bool, last: bool) -> String {
    let open = if first { '(' } else { '[' };
    let close = if last { ']' } else { ')' };
    format!("{}{}-{}{}", open, format_edge(start), format_edge(end), close)
}

/// Builds the zero bin followed by one bin per histogram slot.
///
/// Every summary must share the same bin edges; labels come from the first.
pub fn binned_distribution(summaries: &[&MetricSummary]) -> Result<Vec<DistributionBin>> {
    let first = match summaries.first() {
        Some(first) => first,
        None => return Err(Error::NoCohorts),
    };
    let slots = first.histogram.len();
    if let Some(other) = summaries.iter().find(|s| s.histogram.len() != slots) {
        return Err(Error::MalformedHistogram(format!(
            "cohort histograms have {} and {} bins",
            slots,
            other.histogram.len()
        )));
    }

    let edges: Vec<(f64, f64)> = first.histogram.bins().map(|(s, e, _)| (s, e)).collect();
    for (cohort, summary) in summaries.iter().enumerate().skip(1) {
        let mismatch = summary
            .histogram
            .bins()
            .zip(&edges)
            .position(|((s, e, _), &(fs, fe))| s != fs || e != fe);
        if let Some(slot) = mismatch {
            return Err(Error::MalformedHistogram(format!(
                "cohort #{} bin {} edges differ from the first cohort's",
                cohort, slot
            )));
        }
    }

    let mut bins = Vec::with_capacity(slots + 1);
    bins.push(DistributionBin {
        label: "0".to_string(),
        values: summaries.iter().map(|s| s.zero_count as f64).collect(),
    });

    let heights: Vec<Vec<f64>> = summaries
        .iter()
        .map(|s| s.histogram.bins().map(|(_, _, h)| h).collect())
        .collect();
    for (i, (start, end, _)) in first.histogram.bins().enumerate() {
        bins.push(DistributionBin {
            label: range_label(start, end, i == 0, i + 1 == slots),
            values: heights.iter().map(|h| h[i]).collect(),
        });
    }
    Ok(bins)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Histogram;

    fn summary(zero_count: u64, starts: &[f64], ends: &[f64], heights: &[f64]) -> MetricSummary {
        MetricSummary {
            mean: 0.0,
            zero_count,
            upper_quantile: 0.0,
            histogram: Histogram::new(starts.to_vec(), ends.to_vec(), heights.to_vec()).unwrap(),
        }
    }

    #[test]
    fn test_labels_and_values() {
        let a = summary(4, &[0.0, 0.1, 0.2], &[0.1, 0.2, 0.3], &[1.0, 2.0, 3.0]);
        let b = summary(7, &[0.0, 0.1, 0.2], &[0.1, 0.2, 0.3], &[5.0, 6.0, 0.0]);
        let bins = binned_distribution(&[&a, &b]).unwrap();
        let labels: Vec<_> = bins.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, ["0", "(0-0.1)", "[0.1-0.2)", "[0.2-0.3]"]);
        assert_eq!(bins[0].values, vec![4.0, 7.0]);
        assert_eq!(bins[1].values, vec![1.0, 5.0]);
        assert_eq!(bins[3].values, vec![3.0, 0.0]);
    }

    #[test]
    fn test_single_slot_and_empty() {
        let one = summary(1, &[0.5], &[1.0], &[2.0]);
        let bins = binned_distribution(&[&one]).unwrap();
        assert_eq!(bins[1].label, "(0.5-1]");

        let empty = summary(3, &[], &[], &[]);
        let bins = binned_distribution(&[&empty]).unwrap();
        assert_eq!(bins.len(), 1);
        assert_eq!(bins[0].values, vec![3.0]);
    }

    #[test]
    fn test_mismatched_slots() {
        let a = summary(0, &[0.0], &[1.0], &[1.0]);
        let b = summary(0, &[0.0, 1.0], &[1.0, 2.0], &[1.0, 1.0]);
        assert!(binned_distribution(&[&a, &b]).is_err());
        assert!(binned_distribution(&[]).is_err());
    }

    #[test]
    fn test_mismatched_edges() {
        let a = summary(0, &[0.0, 0.1], &[0.1, 0.2], &[1.0, 1.0]);
        let b = summary(0, &[0.0, 0.1], &[0.1, 0.3], &[1.0, 1.0]);
        match binned_distribution(&[&a, &b]) {
            Err(Error::MalformedHistogram(message)) => assert!(message.contains("bin 1")),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
