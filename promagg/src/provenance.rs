//! Provenance labelling of exporter output.
//!
//! Every sample scraped from an exporter gets `(label_key, exporter_name)`
//! prepended to its label list, so the aggregated output can be traced back
//! to its source.

use promagg_common::{LabelPair, MetricFamily, ParseError, parse_text};
use thiserror::Error;

/// Why an exporter's body could not be turned into labelled families.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProvenanceError {
    #[error("could not parse: {0}")]
    Parse(#[from] ParseError),

    #[error("metric family {family:?} already has a {label:?} label")]
    LabelConflict { family: String, label: String },
}

/// Parse an exporter body and label every sample with its origin.
///
/// Fails as a whole: either every family is returned labelled, or none is.
pub fn parse_with_provenance(
    body: &[u8],
    label_key: &str,
    exporter: &str,
) -> Result<Vec<MetricFamily>, ProvenanceError> {
    let mut families = parse_text(body)?;
    inject_label(&mut families, label_key, exporter)?;
    Ok(families)
}

/// Prepend `(label_key, value)` as the first label of every sample.
pub fn inject_label(
    families: &mut [MetricFamily],
    label_key: &str,
    value: &str,
) -> Result<(), ProvenanceError> {
    // Check first so a conflict leaves the families untouched.
    for family in families.iter() {
        if family
            .metrics
            .iter()
            .any(|m| m.labels.iter().any(|l| l.name == label_key))
        {
            return Err(ProvenanceError::LabelConflict {
                family: family.name.clone(),
                label: label_key.to_string(),
            });
        }
    }

    for family in families.iter_mut() {
        for metric in &mut family.metrics {
            metric.labels.insert(0, LabelPair::new(label_key, value));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use promagg_common::{MetricType, MetricValue};

    #[test]
    fn test_label_is_prepended() {
        let families = parse_with_provenance(
            b"# TYPE http_requests_total counter\n\
              http_requests_total{code=\"200\",method=\"get\"} 10\n\
              http_requests_total{code=\"500\",method=\"get\"} 1\n",
            "agent",
            "web-1",
        )
        .unwrap();

        let family = &families[0];
        assert_eq!(family.metric_type, MetricType::Counter);
        for metric in &family.metrics {
            assert_eq!(metric.labels[0], LabelPair::new("agent", "web-1"));
            assert_eq!(metric.labels.len(), 3);
        }
        assert_eq!(family.metrics[0].labels[1], LabelPair::new("code", "200"));
    }

    #[test]
    fn test_unlabelled_sample_gets_single_label() {
        let families = parse_with_provenance(b"up 1\n", "agent", "A").unwrap();
        assert_eq!(families[0].metrics[0].labels, vec![LabelPair::new("agent", "A")]);
        assert_eq!(families[0].metrics[0].value, MetricValue::Untyped(1.0));
    }

    #[test]
    fn test_histogram_and_summary_samples_are_labelled() {
        let families = parse_with_provenance(
            b"# TYPE h histogram\n\
              h_bucket{le=\"1\"} 1\n\
              h_sum 1\n\
              h_count 1\n\
              # TYPE s summary\n\
              s{quantile=\"0.5\"} 2\n\
              s_sum 2\n\
              s_count 1\n",
            "agent",
            "A",
        )
        .unwrap();

        assert_eq!(families.len(), 2);
        for family in &families {
            assert_eq!(family.metrics.len(), 1);
            assert_eq!(family.metrics[0].labels, vec![LabelPair::new("agent", "A")]);
        }
    }

    #[test]
    fn test_parse_error_drops_everything() {
        let result = parse_with_provenance(b"up 1\ndown{ 0\n", "agent", "A");
        assert!(matches!(result, Err(ProvenanceError::Parse(_))));
    }

    #[test]
    fn test_truncated_body_is_rejected() {
        let result = parse_with_provenance(b"up 1\nup{a=\"b\"} 2", "agent", "A");
        assert!(matches!(
            result,
            Err(ProvenanceError::Parse(ParseError::UnexpectedEof { .. }))
        ));
    }

    #[test]
    fn test_existing_label_conflicts() {
        let result = parse_with_provenance(b"up{agent=\"x\"} 1\n", "agent", "A");
        assert_eq!(
            result,
            Err(ProvenanceError::LabelConflict {
                family: "up".to_string(),
                label: "agent".to_string()
            })
        );
    }
}
