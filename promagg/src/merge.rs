//! Merging and ordering of families gathered from many exporters.

use promagg_common::MetricFamily;
use tracing::trace;

/// Merge same-named families and put everything in a reproducible order.
///
/// Families are stable-sorted by name and folded into a fresh sequence: the
/// first family of a name is kept (supplying help and type) and the samples
/// of every later one are appended to it. Type and help of the merged-away
/// families are not compared. Samples inside each family are then sorted by
/// [`Metric::cmp_by_labels`](promagg_common::Metric::cmp_by_labels), which
/// makes the output independent of the order exporters answered in.
///
/// Tombstoned (empty-name) families never reach the output.
pub fn merge_families(mut families: Vec<MetricFamily>) -> Vec<MetricFamily> {
    families.sort_by(|a, b| a.name.cmp(&b.name));

    let mut merged: Vec<MetricFamily> = Vec::with_capacity(families.len());
    for family in families {
        if family.is_tombstone() {
            continue;
        }
        match merged.last_mut() {
            Some(kept) if kept.name == family.name => {
                trace!(family = %family.name, samples = family.metrics.len(), "Merging family");
                kept.metrics.extend(family.metrics);
            }
            _ => merged.push(family),
        }
    }

    for family in &mut merged {
        family.metrics.sort_by(|a, b| a.cmp_by_labels(b));
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use promagg_common::{LabelPair, Metric, MetricType, MetricValue};

    fn gauge_family(name: &str, agents: &[&str]) -> MetricFamily {
        agents.iter().fold(MetricFamily::new(name, MetricType::Gauge), |f, agent| {
            f.with_metric(Metric::new(MetricValue::Gauge(1.0)).with_label("agent", *agent))
        })
    }

    fn agents(family: &MetricFamily) -> Vec<&str> {
        family
            .metrics
            .iter()
            .map(|m| m.label("agent").unwrap_or_default())
            .collect()
    }

    #[test]
    fn test_same_name_families_merge() {
        let merged = merge_families(vec![gauge_family("up", &["B"]), gauge_family("up", &["A"])]);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].name, "up");
        assert_eq!(agents(&merged[0]), vec!["A", "B"]);
    }

    #[test]
    fn test_families_sorted_by_name() {
        let merged = merge_families(vec![
            gauge_family("zeta", &["A"]),
            gauge_family("alpha", &["A"]),
            gauge_family("mid", &["A"]),
            gauge_family("alpha", &["B"]),
        ]);

        let names: Vec<_> = merged.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
        assert_eq!(merged[0].metrics.len(), 2);
    }

    #[test]
    fn test_no_samples_lost() {
        let input = vec![
            gauge_family("a", &["x", "y"]),
            gauge_family("b", &["x"]),
            gauge_family("a", &["z"]),
            gauge_family("b", &["y", "z"]),
        ];
        let total: usize = input.iter().map(|f| f.metrics.len()).sum();

        let merged = merge_families(input);
        assert_eq!(merged.iter().map(|f| f.metrics.len()).sum::<usize>(), total);
    }

    #[test]
    fn test_tombstones_are_dropped() {
        let merged = merge_families(vec![gauge_family("", &["A"]), gauge_family("up", &["A"])]);

        assert_eq!(merged.len(), 1);
        assert!(merged.iter().all(|f| !f.is_tombstone()));
    }

    #[test]
    fn test_order_independent_of_arrival() {
        let from_a = vec![gauge_family("up", &["A"]), gauge_family("load", &["A"])];
        let from_b = vec![gauge_family("load", &["B"]), gauge_family("up", &["B"])];

        let a_first = merge_families(from_a.iter().chain(&from_b).cloned().collect());
        let b_first = merge_families(from_b.iter().chain(&from_a).cloned().collect());

        assert_eq!(a_first, b_first);
    }

    #[test]
    fn test_mismatched_types_merge_unconditionally() {
        let counter = MetricFamily::new("requests", MetricType::Counter)
            .with_help("from A")
            .with_metric(Metric::new(MetricValue::Counter(5.0)).with_label("agent", "A"));
        let gauge = MetricFamily::new("requests", MetricType::Gauge)
            .with_help("from B")
            .with_metric(Metric::new(MetricValue::Gauge(3.0)).with_label("agent", "B"));

        let merged = merge_families(vec![counter, gauge]);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].metric_type, MetricType::Counter);
        assert_eq!(merged[0].help.as_deref(), Some("from A"));
        assert_eq!(merged[0].metrics.len(), 2);
    }

    #[test]
    fn test_samples_sorted_by_concatenated_labels() {
        let family = MetricFamily::new("m", MetricType::Gauge)
            .with_metric(
                Metric::new(MetricValue::Gauge(1.0))
                    .with_label("agent", "A")
                    .with_label("zone", "b"),
            )
            .with_metric(
                Metric::new(MetricValue::Gauge(1.0))
                    .with_label("agent", "A")
                    .with_label("mode", "z"),
            )
            .with_metric(Metric::new(MetricValue::Gauge(1.0)).with_label("agent", "A"));

        let merged = merge_families(vec![family]);
        let signatures: Vec<_> = merged[0].metrics.iter().map(|m| m.label_signature()).collect();
        assert_eq!(signatures, vec!["agentA", "agentAmodez", "agentAzoneb"]);
        assert_eq!(merged[0].metrics[1].labels[1], LabelPair::new("mode", "z"));
    }
}
