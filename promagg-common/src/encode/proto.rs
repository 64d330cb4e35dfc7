//! Delimited protocol buffer encoder (`io.prometheus.client.MetricFamily`).
//!
//! The message types mirror `metrics.proto` from the Prometheus client model;
//! only the fields this crate produces are declared.

use std::io::Write;

use prost::Message;

use super::{EncodeError, Encoder, check_family};
use crate::model::{self, MetricFamily, MetricValue};

#[derive(Clone, PartialEq, Message)]
pub struct LabelPair {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub value: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Gauge {
    #[prost(double, optional, tag = "1")]
    pub value: Option<f64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Counter {
    #[prost(double, optional, tag = "1")]
    pub value: Option<f64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Untyped {
    #[prost(double, optional, tag = "1")]
    pub value: Option<f64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Quantile {
    #[prost(double, optional, tag = "1")]
    pub quantile: Option<f64>,
    #[prost(double, optional, tag = "2")]
    pub value: Option<f64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Summary {
    #[prost(uint64, optional, tag = "1")]
    pub sample_count: Option<u64>,
    #[prost(double, optional, tag = "2")]
    pub sample_sum: Option<f64>,
    #[prost(message, repeated, tag = "3")]
    pub quantile: Vec<Quantile>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Bucket {
    #[prost(uint64, optional, tag = "1")]
    pub cumulative_count: Option<u64>,
    #[prost(double, optional, tag = "2")]
    pub upper_bound: Option<f64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Histogram {
    #[prost(uint64, optional, tag = "1")]
    pub sample_count: Option<u64>,
    #[prost(double, optional, tag = "2")]
    pub sample_sum: Option<f64>,
    #[prost(message, repeated, tag = "3")]
    pub bucket: Vec<Bucket>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Metric {
    #[prost(message, repeated, tag = "1")]
    pub label: Vec<LabelPair>,
    #[prost(message, optional, tag = "2")]
    pub gauge: Option<Gauge>,
    #[prost(message, optional, tag = "3")]
    pub counter: Option<Counter>,
    #[prost(message, optional, tag = "4")]
    pub summary: Option<Summary>,
    #[prost(message, optional, tag = "5")]
    pub untyped: Option<Untyped>,
    #[prost(int64, optional, tag = "6")]
    pub timestamp_ms: Option<i64>,
    #[prost(message, optional, tag = "7")]
    pub histogram: Option<Histogram>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ProtoMetricFamily {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub help: Option<String>,
    #[prost(enumeration = "ProtoMetricType", optional, tag = "3")]
    pub r#type: Option<i32>,
    #[prost(message, repeated, tag = "4")]
    pub metric: Vec<Metric>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ProtoMetricType {
    Counter = 0,
    Gauge = 1,
    Summary = 2,
    Untyped = 3,
    Histogram = 4,
}

impl From<model::MetricType> for ProtoMetricType {
    fn from(ty: model::MetricType) -> Self {
        match ty {
            model::MetricType::Counter => ProtoMetricType::Counter,
            model::MetricType::Gauge => ProtoMetricType::Gauge,
            model::MetricType::Summary => ProtoMetricType::Summary,
            model::MetricType::Untyped => ProtoMetricType::Untyped,
            model::MetricType::Histogram => ProtoMetricType::Histogram,
        }
    }
}

impl From<&model::Metric> for Metric {
    fn from(metric: &model::Metric) -> Self {
        let mut out = Metric {
            label: metric
                .labels
                .iter()
                .map(|l| LabelPair {
                    name: Some(l.name.clone()),
                    value: Some(l.value.clone()),
                })
                .collect(),
            timestamp_ms: metric.timestamp_ms,
            ..Default::default()
        };

        match &metric.value {
            MetricValue::Counter(v) => out.counter = Some(Counter { value: Some(*v) }),
            MetricValue::Gauge(v) => out.gauge = Some(Gauge { value: Some(*v) }),
            MetricValue::Untyped(v) => out.untyped = Some(Untyped { value: Some(*v) }),
            MetricValue::Summary(s) => {
                out.summary = Some(Summary {
                    sample_count: Some(s.sample_count),
                    sample_sum: Some(s.sample_sum),
                    quantile: s
                        .quantiles
                        .iter()
                        .map(|q| Quantile {
                            quantile: Some(q.quantile),
                            value: Some(q.value),
                        })
                        .collect(),
                })
            }
            MetricValue::Histogram(h) => {
                out.histogram = Some(Histogram {
                    sample_count: Some(h.sample_count),
                    sample_sum: Some(h.sample_sum),
                    bucket: h
                        .buckets
                        .iter()
                        .map(|b| Bucket {
                            cumulative_count: Some(b.cumulative_count),
                            upper_bound: Some(b.upper_bound),
                        })
                        .collect(),
                })
            }
        }
        out
    }
}

impl From<&MetricFamily> for ProtoMetricFamily {
    fn from(family: &MetricFamily) -> Self {
        ProtoMetricFamily {
            name: Some(family.name.clone()),
            help: family.help.clone(),
            r#type: Some(ProtoMetricType::from(family.metric_type) as i32),
            metric: family.metrics.iter().map(Metric::from).collect(),
        }
    }
}

/// Writes families as varint length-prefixed protocol buffer messages.
pub struct ProtoEncoder<W: Write> {
    writer: W,
    buf: Vec<u8>,
}

impl<W: Write> ProtoEncoder<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            buf: Vec::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Encoder for ProtoEncoder<W> {
    fn encode(&mut self, family: &MetricFamily) -> Result<(), EncodeError> {
        check_family(family)?;

        self.buf.clear();
        ProtoMetricFamily::from(family).encode_length_delimited(&mut self.buf)?;
        self.writer.write_all(&self.buf)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MetricType;

    #[test]
    fn test_delimited_roundtrip_through_prost() {
        let family = MetricFamily::new("up", MetricType::Gauge)
            .with_help("Target up.")
            .with_metric(model::Metric::new(MetricValue::Gauge(1.0)).with_label("agent", "A"))
            .with_metric(model::Metric::new(MetricValue::Gauge(0.0)).with_label("agent", "B"));

        let mut encoder = ProtoEncoder::new(Vec::new());
        encoder.encode(&family).unwrap();
        let bytes = encoder.into_inner();

        let decoded = ProtoMetricFamily::decode_length_delimited(bytes.as_slice()).unwrap();
        assert_eq!(decoded.name.as_deref(), Some("up"));
        assert_eq!(decoded.help.as_deref(), Some("Target up."));
        assert_eq!(decoded.r#type, Some(ProtoMetricType::Gauge as i32));
        assert_eq!(decoded.metric.len(), 2);
        assert_eq!(decoded.metric[0].label[0].value.as_deref(), Some("A"));
        assert_eq!(decoded.metric[1].gauge, Some(Gauge { value: Some(0.0) }));
    }

    #[test]
    fn test_multiple_families_are_concatenated() {
        let a = MetricFamily::new("a", MetricType::Counter)
            .with_metric(model::Metric::new(MetricValue::Counter(1.0)));
        let b = MetricFamily::new("b", MetricType::Untyped)
            .with_metric(model::Metric::new(MetricValue::Untyped(2.0)));

        let mut encoder = ProtoEncoder::new(Vec::new());
        encoder.encode(&a).unwrap();
        encoder.encode(&b).unwrap();
        let bytes = encoder.into_inner();

        let mut cursor = bytes.as_slice();
        let first = ProtoMetricFamily::decode_length_delimited(&mut cursor).unwrap();
        let second = ProtoMetricFamily::decode_length_delimited(&mut cursor).unwrap();
        assert_eq!(first.name.as_deref(), Some("a"));
        assert_eq!(second.name.as_deref(), Some("b"));
        assert!(cursor.is_empty());
    }
}
