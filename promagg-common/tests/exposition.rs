//! Integration tests for the exposition parser and encoders.

use promagg_common::{Format, LabelPair, MetricType, MetricValue, encode_families, parse_text};

const NODE_EXPORTER: &str = "\
# HELP node_cpu_seconds_total Seconds the CPUs spent in each mode.
# TYPE node_cpu_seconds_total counter
node_cpu_seconds_total{cpu=\"0\",mode=\"idle\"} 40385.63
node_cpu_seconds_total{cpu=\"0\",mode=\"user\"} 1187.07
node_cpu_seconds_total{cpu=\"1\",mode=\"idle\"} 40441.46
# HELP node_load1 1m load average.
# TYPE node_load1 gauge
node_load1 0.21
# HELP http_request_duration_seconds A histogram of the request duration.
# TYPE http_request_duration_seconds histogram
http_request_duration_seconds_bucket{handler=\"/\",le=\"0.05\"} 24054
http_request_duration_seconds_bucket{handler=\"/\",le=\"0.5\"} 129389
http_request_duration_seconds_bucket{handler=\"/\",le=\"+Inf\"} 144320
http_request_duration_seconds_sum{handler=\"/\"} 53423
http_request_duration_seconds_count{handler=\"/\"} 144320
# HELP go_gc_duration_seconds A summary of the pause duration of garbage collection cycles.
# TYPE go_gc_duration_seconds summary
go_gc_duration_seconds{quantile=\"0\"} 4.2e-05
go_gc_duration_seconds{quantile=\"0.5\"} 0.000113
go_gc_duration_seconds{quantile=\"1\"} 0.003
go_gc_duration_seconds_sum 0.14
go_gc_duration_seconds_count 1042
";

#[test]
fn test_parse_realistic_document() {
    let families = parse_text(NODE_EXPORTER.as_bytes()).expect("parse failed");

    let summary: Vec<_> = families
        .iter()
        .map(|f| (f.name.as_str(), f.metric_type, f.metrics.len()))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("node_cpu_seconds_total", MetricType::Counter, 3),
            ("node_load1", MetricType::Gauge, 1),
            ("http_request_duration_seconds", MetricType::Histogram, 1),
            ("go_gc_duration_seconds", MetricType::Summary, 1),
        ]
    );
}

#[test]
fn test_text_reencode_preserves_samples_and_labels() {
    let families = parse_text(NODE_EXPORTER.as_bytes()).unwrap();
    let encoded = encode_families(&families, Format::Text).expect("encode failed");
    let reparsed = parse_text(&encoded).expect("re-parse failed");

    assert_eq!(reparsed.len(), families.len());
    for (before, after) in families.iter().zip(&reparsed) {
        assert_eq!(before.name, after.name);
        assert_eq!(before.help, after.help);
        assert_eq!(before.metric_type, after.metric_type);
        assert_eq!(before.metrics.len(), after.metrics.len());
        for (m1, m2) in before.metrics.iter().zip(&after.metrics) {
            assert_eq!(m1.labels, m2.labels);
            assert_eq!(m1.value, m2.value);
        }
    }
}

#[test]
fn test_encoded_text_is_line_terminated() {
    let families = parse_text(b"up{job=\"a\"} 1\n").unwrap();
    let encoded = String::from_utf8(encode_families(&families, Format::Text).unwrap()).unwrap();

    assert_eq!(encoded, "# TYPE up untyped\nup{job=\"a\"} 1\n");
}

#[test]
fn test_protobuf_encoding_differs_from_text() {
    let families = parse_text(NODE_EXPORTER.as_bytes()).unwrap();
    let proto = encode_families(&families, Format::ProtoDelimited).unwrap();
    let text = encode_families(&families, Format::Text).unwrap();

    assert!(!proto.is_empty());
    assert_ne!(proto, text);
    // Two-byte varint length prefix, then field 1 (name) with wire type 2.
    assert_eq!(proto[2], 0x0a);
}

#[test]
fn test_histogram_values_survive_parsing() {
    let families = parse_text(NODE_EXPORTER.as_bytes()).unwrap();
    let histogram = &families[2].metrics[0];

    assert_eq!(histogram.labels, vec![LabelPair::new("handler", "/")]);
    let MetricValue::Histogram(h) = &histogram.value else {
        panic!("expected histogram value");
    };
    assert_eq!(h.sample_count, 144_320);
    assert_eq!(
        h.buckets.iter().map(|b| b.cumulative_count).collect::<Vec<_>>(),
        vec![24_054, 129_389, 144_320]
    );
}
