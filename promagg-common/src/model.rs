//! Exposition data model: metric families, samples and label pairs.

use std::cmp::Ordering;

/// Declared type of a metric family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
    Summary,
    #[default]
    Untyped,
}

impl MetricType {
    /// Name used in `# TYPE` lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
            MetricType::Histogram => "histogram",
            MetricType::Summary => "summary",
            MetricType::Untyped => "untyped",
        }
    }

    /// Parse the type token of a `# TYPE` line.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "counter" => Some(MetricType::Counter),
            "gauge" => Some(MetricType::Gauge),
            "histogram" => Some(MetricType::Histogram),
            "summary" => Some(MetricType::Summary),
            "untyped" => Some(MetricType::Untyped),
            _ => None,
        }
    }
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single label name/value pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelPair {
    pub name: String,
    pub value: String,
}

impl LabelPair {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// One quantile of a summary.
#[derive(Debug, Clone, PartialEq)]
pub struct Quantile {
    pub quantile: f64,
    pub value: f64,
}

/// One cumulative histogram bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    pub upper_bound: f64,
    pub cumulative_count: u64,
}

/// Summary observation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    pub sample_count: u64,
    pub sample_sum: f64,
    pub quantiles: Vec<Quantile>,
}

/// Histogram observation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Histogram {
    pub sample_count: u64,
    pub sample_sum: f64,
    pub buckets: Vec<Bucket>,
}

/// Type-specific value of a sample.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Counter(f64),
    Gauge(f64),
    Untyped(f64),
    Summary(Summary),
    Histogram(Histogram),
}

impl MetricValue {
    /// The family type this value belongs to.
    pub fn metric_type(&self) -> MetricType {
        match self {
            MetricValue::Counter(_) => MetricType::Counter,
            MetricValue::Gauge(_) => MetricType::Gauge,
            MetricValue::Untyped(_) => MetricType::Untyped,
            MetricValue::Summary(_) => MetricType::Summary,
            MetricValue::Histogram(_) => MetricType::Histogram,
        }
    }
}

/// A single sample: labels plus a typed value.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    /// Labels in exposition order.
    pub labels: Vec<LabelPair>,
    pub value: MetricValue,
    /// Optional timestamp in milliseconds since the Unix epoch.
    pub timestamp_ms: Option<i64>,
}

impl Metric {
    pub fn new(value: MetricValue) -> Self {
        Self {
            labels: Vec::new(),
            value,
            timestamp_ms: None,
        }
    }

    /// Append a label.
    pub fn with_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push(LabelPair::new(name, value));
        self
    }

    /// Look up a label value by name.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.value.as_str())
    }

    /// Concatenation of `name + value` over all labels, in label order.
    pub fn label_signature(&self) -> String {
        let len = self
            .labels
            .iter()
            .map(|l| l.name.len() + l.value.len())
            .sum();
        let mut signature = String::with_capacity(len);
        for label in &self.labels {
            signature.push_str(&label.name);
            signature.push_str(&label.value);
        }
        signature
    }

    /// Total order used to sort samples within a family.
    ///
    /// Primary key is the label signature; label lists that concatenate to
    /// the same string are ordered pairwise so the order stays total.
    pub fn cmp_by_labels(&self, other: &Metric) -> Ordering {
        self.label_signature()
            .cmp(&other.label_signature())
            .then_with(|| self.labels.cmp(&other.labels))
    }
}

/// A named group of samples sharing help text and type.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    pub help: Option<String>,
    pub metric_type: MetricType,
    pub metrics: Vec<Metric>,
}

impl MetricFamily {
    pub fn new(name: impl Into<String>, metric_type: MetricType) -> Self {
        Self {
            name: name.into(),
            help: None,
            metric_type,
            metrics: Vec::new(),
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metrics.push(metric);
        self
    }

    /// Whether this family was merged away and must not be emitted.
    pub fn is_tombstone(&self) -> bool {
        self.name.is_empty()
    }
}
