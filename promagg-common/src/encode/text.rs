//! Text exposition format encoder.

use std::fmt::Write as _;
use std::io::Write;

use super::{EncodeError, Encoder, check_family, format_value};
use crate::model::{LabelPair, Metric, MetricFamily, MetricValue};

/// Writes families in the text exposition format, version 0.0.4.
pub struct TextEncoder<W: Write> {
    writer: W,
}

impl<W: Write> TextEncoder<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Encoder for TextEncoder<W> {
    fn encode(&mut self, family: &MetricFamily) -> Result<(), EncodeError> {
        check_family(family)?;

        // Render the whole family first so a failure never leaves half of it
        // in the writer.
        let mut out = String::with_capacity(64 + family.metrics.len() * 64);
        if let Some(help) = &family.help {
            let _ = writeln!(out, "# HELP {} {}", family.name, escape_help(help));
        }
        let _ = writeln!(out, "# TYPE {} {}", family.name, family.metric_type);

        for metric in &family.metrics {
            write_metric(&mut out, &family.name, metric);
        }

        self.writer.write_all(out.as_bytes())?;
        Ok(())
    }
}

fn write_metric(out: &mut String, name: &str, metric: &Metric) {
    match &metric.value {
        MetricValue::Counter(v) | MetricValue::Gauge(v) | MetricValue::Untyped(v) => {
            write_sample(out, name, "", metric, None, *v);
        }
        MetricValue::Summary(summary) => {
            for q in &summary.quantiles {
                write_sample(out, name, "", metric, Some(("quantile", q.quantile)), q.value);
            }
            write_sample(out, name, "_sum", metric, None, summary.sample_sum);
            write_sample(out, name, "_count", metric, None, summary.sample_count as f64);
        }
        MetricValue::Histogram(histogram) => {
            let mut saw_inf = false;
            for bucket in &histogram.buckets {
                saw_inf |= bucket.upper_bound == f64::INFINITY;
                write_sample(
                    out,
                    name,
                    "_bucket",
                    metric,
                    Some(("le", bucket.upper_bound)),
                    bucket.cumulative_count as f64,
                );
            }
            if !saw_inf {
                write_sample(
                    out,
                    name,
                    "_bucket",
                    metric,
                    Some(("le", f64::INFINITY)),
                    histogram.sample_count as f64,
                );
            }
            write_sample(out, name, "_sum", metric, None, histogram.sample_sum);
            write_sample(out, name, "_count", metric, None, histogram.sample_count as f64);
        }
    }
}

fn write_sample(
    out: &mut String,
    name: &str,
    suffix: &str,
    metric: &Metric,
    extra: Option<(&str, f64)>,
    value: f64,
) {
    out.push_str(name);
    out.push_str(suffix);
    write_labels(out, &metric.labels, extra);
    out.push(' ');
    out.push_str(&format_value(value));
    if let Some(ts) = metric.timestamp_ms {
        let _ = write!(out, " {}", ts);
    }
    out.push('\n');
}

fn write_labels(out: &mut String, labels: &[LabelPair], extra: Option<(&str, f64)>) {
    if labels.is_empty() && extra.is_none() {
        return;
    }

    out.push('{');
    let mut first = true;
    for label in labels {
        if !first {
            out.push(',');
        }
        first = false;
        let _ = write!(out, "{}=\"{}\"", label.name, escape_label_value(&label.value));
    }
    if let Some((key, bound)) = extra {
        if !first {
            out.push(',');
        }
        let _ = write!(out, "{}=\"{}\"", key, format_value(bound));
    }
    out.push('}');
}

/// Escape special characters in label values.
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Escape backslashes and newlines in HELP text.
fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}
