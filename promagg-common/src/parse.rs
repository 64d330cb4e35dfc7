//! Parser for the Prometheus text exposition format, version 0.0.4.
//!
//! The parser is all-or-nothing: the first malformed line fails the whole
//! document and no families are returned. Families are emitted in the order
//! they first appear; families that only carry `# HELP` / `# TYPE` lines and
//! no samples are dropped.

use std::collections::HashMap;

use thiserror::Error;

use crate::model::{
    Bucket, Histogram, LabelPair, Metric, MetricFamily, MetricType, MetricValue, Quantile, Summary,
};

/// Errors produced while decoding exposition text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("exposition text is not valid UTF-8")]
    InvalidUtf8,

    #[error("line {line}: unexpected end of input (missing trailing newline)")]
    UnexpectedEof { line: usize },

    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("line {line}: second HELP line for metric name {name:?}")]
    DuplicateHelp { line: usize, name: String },

    #[error("line {line}: second TYPE line for metric name {name:?}, or TYPE reported after samples")]
    DuplicateType { line: usize, name: String },

    #[error("line {line}: duplicate label name {label:?}")]
    DuplicateLabel { line: usize, label: String },
}

impl ParseError {
    fn syntax(line: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            line,
            message: message.into(),
        }
    }
}

/// Parse a complete exposition document into metric families.
pub fn parse_text(input: &[u8]) -> Result<Vec<MetricFamily>, ParseError> {
    let text = std::str::from_utf8(input).map_err(|_| ParseError::InvalidUtf8)?;

    if !text.is_empty() && !text.ends_with('\n') {
        let line = text.split('\n').count();
        return Err(ParseError::UnexpectedEof { line });
    }

    let mut parser = TextParser::default();
    for (idx, line) in text.split_terminator('\n').enumerate() {
        parser.parse_line(idx + 1, line)?;
    }

    Ok(parser.finish())
}

/// Role a sample line plays within its family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SampleKind {
    Plain,
    Sum,
    Count,
    Bucket,
}

#[derive(Debug)]
struct FamilyBuilder {
    name: String,
    help: Option<String>,
    metric_type: Option<MetricType>,
    metrics: Vec<Metric>,
    /// Sorted label set -> index into `metrics`, for summaries and histograms.
    groups: HashMap<Vec<LabelPair>, usize>,
}

impl FamilyBuilder {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            help: None,
            metric_type: None,
            metrics: Vec::new(),
            groups: HashMap::new(),
        }
    }

    fn build(self) -> MetricFamily {
        MetricFamily {
            name: self.name,
            help: self.help,
            metric_type: self.metric_type.unwrap_or_default(),
            metrics: self.metrics,
        }
    }

    /// Find or create the grouped metric for a summary/histogram label set.
    fn grouped_metric(&mut self, labels: Vec<LabelPair>, empty: MetricValue) -> &mut Metric {
        let mut key = labels.clone();
        key.sort();

        let idx = match self.groups.get(&key) {
            Some(&idx) => idx,
            None => {
                self.metrics.push(Metric {
                    labels,
                    value: empty,
                    timestamp_ms: None,
                });
                let idx = self.metrics.len() - 1;
                self.groups.insert(key, idx);
                idx
            }
        };
        &mut self.metrics[idx]
    }
}

#[derive(Debug, Default)]
struct TextParser {
    families: Vec<FamilyBuilder>,
    by_name: HashMap<String, usize>,
}

impl TextParser {
    fn finish(self) -> Vec<MetricFamily> {
        self.families
            .into_iter()
            .filter(|f| !f.metrics.is_empty())
            .map(FamilyBuilder::build)
            .collect()
    }

    fn family_index(&mut self, name: &str) -> usize {
        if let Some(&idx) = self.by_name.get(name) {
            return idx;
        }
        self.families.push(FamilyBuilder::new(name));
        let idx = self.families.len() - 1;
        self.by_name.insert(name.to_string(), idx);
        idx
    }

    fn parse_line(&mut self, line_no: usize, line: &str) -> Result<(), ParseError> {
        let trimmed = line.trim_start_matches([' ', '\t']);
        if trimmed.is_empty() {
            return Ok(());
        }
        if let Some(comment) = trimmed.strip_prefix('#') {
            return self.parse_comment(line_no, comment);
        }
        self.parse_sample(line_no, trimmed)
    }

    fn parse_comment(&mut self, line_no: usize, comment: &str) -> Result<(), ParseError> {
        let comment = comment.trim_start_matches([' ', '\t']);
        let (keyword, rest) = split_token(comment);
        if keyword != "HELP" && keyword != "TYPE" {
            return Ok(());
        }

        let rest = rest.trim_start_matches([' ', '\t']);
        let (name, rest) = split_token(rest);
        if !is_valid_metric_name(name) {
            return Err(ParseError::syntax(
                line_no,
                format!("invalid metric name {name:?} in comment"),
            ));
        }

        let idx = self.family_index(name);
        let family = &mut self.families[idx];

        if keyword == "HELP" {
            if family.help.is_some() {
                return Err(ParseError::DuplicateHelp {
                    line: line_no,
                    name: name.to_string(),
                });
            }
            // A single separator follows the name; the rest is the docstring.
            let text = rest.strip_prefix([' ', '\t']).unwrap_or(rest);
            family.help = Some(unescape_help(line_no, text)?);
            return Ok(());
        }

        if family.metric_type.is_some() {
            return Err(ParseError::DuplicateType {
                line: line_no,
                name: name.to_string(),
            });
        }
        let token = rest.trim_matches([' ', '\t']);
        let metric_type = MetricType::from_token(token).ok_or_else(|| {
            ParseError::syntax(line_no, format!("unknown metric type {token:?}"))
        })?;
        family.metric_type = Some(metric_type);
        Ok(())
    }

    fn parse_sample(&mut self, line_no: usize, line: &str) -> Result<(), ParseError> {
        let mut cursor = Cursor::new(line_no, line);

        let name = cursor.read_metric_name()?;
        cursor.skip_blank();
        let mut labels = if cursor.eat('{') {
            cursor.read_labels()?
        } else {
            Vec::new()
        };
        cursor.skip_blank();

        let value_token = cursor.read_token();
        if value_token.is_empty() {
            return Err(ParseError::syntax(line_no, "expected sample value"));
        }
        let value = parse_float(line_no, value_token)?;

        cursor.skip_blank();
        let timestamp_ms = match cursor.read_token() {
            "" => None,
            token => Some(token.parse::<i64>().map_err(|_| {
                ParseError::syntax(line_no, format!("invalid timestamp {token:?}"))
            })?),
        };
        cursor.skip_blank();
        if !cursor.is_done() {
            return Err(ParseError::syntax(
                line_no,
                format!("unexpected trailing text {:?}", cursor.rest()),
            ));
        }

        let (idx, kind) = self.resolve_family(name);
        let family = &mut self.families[idx];
        let metric_type = *family.metric_type.get_or_insert(MetricType::Untyped);

        match metric_type {
            MetricType::Counter | MetricType::Gauge | MetricType::Untyped => {
                let value = match metric_type {
                    MetricType::Counter => MetricValue::Counter(value),
                    MetricType::Gauge => MetricValue::Gauge(value),
                    _ => MetricValue::Untyped(value),
                };
                family.metrics.push(Metric {
                    labels,
                    value,
                    timestamp_ms,
                });
            }
            MetricType::Summary => {
                let quantile = match kind {
                    SampleKind::Plain => Some(take_bound(line_no, &mut labels, "quantile")?),
                    _ => None,
                };
                let metric =
                    family.grouped_metric(labels, MetricValue::Summary(Summary::default()));
                if timestamp_ms.is_some() {
                    metric.timestamp_ms = timestamp_ms;
                }
                let MetricValue::Summary(summary) = &mut metric.value else {
                    return Err(ParseError::syntax(line_no, "summary sample in non-summary group"));
                };
                match kind {
                    SampleKind::Sum => summary.sample_sum = value,
                    SampleKind::Count => summary.sample_count = parse_count(line_no, value)?,
                    _ => summary.quantiles.push(Quantile {
                        quantile: quantile.unwrap_or_default(),
                        value,
                    }),
                }
            }
            MetricType::Histogram => {
                let upper_bound = match kind {
                    SampleKind::Bucket => Some(take_bound(line_no, &mut labels, "le")?),
                    SampleKind::Plain => {
                        return Err(ParseError::syntax(
                            line_no,
                            format!("histogram sample {name:?} needs a _bucket, _sum or _count suffix"),
                        ));
                    }
                    _ => None,
                };
                let metric =
                    family.grouped_metric(labels, MetricValue::Histogram(Histogram::default()));
                if timestamp_ms.is_some() {
                    metric.timestamp_ms = timestamp_ms;
                }
                let MetricValue::Histogram(histogram) = &mut metric.value else {
                    return Err(ParseError::syntax(
                        line_no,
                        "histogram sample in non-histogram group",
                    ));
                };
                match kind {
                    SampleKind::Sum => histogram.sample_sum = value,
                    SampleKind::Count => histogram.sample_count = parse_count(line_no, value)?,
                    _ => histogram.buckets.push(Bucket {
                        upper_bound: upper_bound.unwrap_or(f64::INFINITY),
                        cumulative_count: parse_count(line_no, value)?,
                    }),
                }
            }
        }
        Ok(())
    }

    /// Map a sample name onto its family, honouring summary and histogram suffixes.
    fn resolve_family(&mut self, name: &str) -> (usize, SampleKind) {
        if let Some(&idx) = self.by_name.get(name) {
            return (idx, SampleKind::Plain);
        }

        for (suffix, kind) in [
            ("_sum", SampleKind::Sum),
            ("_count", SampleKind::Count),
            ("_bucket", SampleKind::Bucket),
        ] {
            let Some(base) = name.strip_suffix(suffix) else {
                continue;
            };
            if let Some(&idx) = self.by_name.get(base) {
                let accepts = match self.families[idx].metric_type {
                    Some(MetricType::Histogram) => true,
                    Some(MetricType::Summary) => kind != SampleKind::Bucket,
                    _ => false,
                };
                if accepts {
                    return (idx, kind);
                }
            }
        }

        (self.family_index(name), SampleKind::Plain)
    }
}

/// Byte cursor over a single sample line.
struct Cursor<'a> {
    line_no: usize,
    line: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(line_no: usize, line: &'a str) -> Self {
        Self {
            line_no,
            line,
            pos: 0,
        }
    }

    fn rest(&self) -> &'a str {
        &self.line[self.pos..]
    }

    fn is_done(&self) -> bool {
        self.pos >= self.line.len()
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> Result<(), ParseError> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(self.error(match self.peek() {
                Some(found) => format!("expected {c:?}, found {found:?}"),
                None => format!("expected {c:?}, found end of line"),
            }))
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::syntax(self.line_no, message)
    }

    fn skip_blank(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start_matches([' ', '\t']).len();
    }

    fn read_while(&mut self, accept: impl Fn(char) -> bool) -> &'a str {
        let rest = self.rest();
        let len = rest.find(|c: char| !accept(c)).unwrap_or(rest.len());
        self.pos += len;
        &rest[..len]
    }

    fn read_token(&mut self) -> &'a str {
        self.read_while(|c| c != ' ' && c != '\t')
    }

    fn read_metric_name(&mut self) -> Result<&'a str, ParseError> {
        let name = self.read_while(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':');
        if !is_valid_metric_name(name) {
            return Err(self.error(format!("invalid metric name in line {:?}", self.line)));
        }
        Ok(name)
    }

    fn read_labels(&mut self) -> Result<Vec<LabelPair>, ParseError> {
        let mut labels: Vec<LabelPair> = Vec::new();
        loop {
            self.skip_blank();
            if self.eat('}') {
                return Ok(labels);
            }

            let name = self.read_while(|c| c.is_ascii_alphanumeric() || c == '_');
            if !is_valid_label_name(name) {
                return Err(self.error(format!("invalid label name {:?}", name)));
            }
            if labels.iter().any(|l| l.name == name) {
                return Err(ParseError::DuplicateLabel {
                    line: self.line_no,
                    label: name.to_string(),
                });
            }

            self.skip_blank();
            self.expect('=')?;
            self.skip_blank();
            self.expect('"')?;
            let value = self.read_label_value()?;
            labels.push(LabelPair::new(name, value));

            self.skip_blank();
            if self.eat(',') {
                continue;
            }
            self.expect('}')?;
            return Ok(labels);
        }
    }

    /// Read an escaped label value up to and including the closing quote.
    fn read_label_value(&mut self) -> Result<String, ParseError> {
        let mut value = String::new();
        let mut chars = self.rest().char_indices();
        while let Some((offset, c)) = chars.next() {
            match c {
                '"' => {
                    self.pos += offset + 1;
                    return Ok(value);
                }
                '\\' => match chars.next() {
                    Some((_, '\\')) => value.push('\\'),
                    Some((_, '"')) => value.push('"'),
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, other)) => {
                        return Err(self.error(format!("invalid escape sequence '\\{other}'")));
                    }
                    None => break,
                },
                _ => value.push(c),
            }
        }
        Err(self.error("unterminated label value"))
    }
}

fn split_token(s: &str) -> (&str, &str) {
    match s.find([' ', '\t']) {
        Some(idx) => (&s[..idx], &s[idx..]),
        None => (s, ""),
    }
}

fn unescape_help(line_no: usize, text: &str) -> Result<String, ParseError> {
    let mut help = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            help.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => help.push('\\'),
            Some('n') => help.push('\n'),
            Some(other) => {
                return Err(ParseError::syntax(
                    line_no,
                    format!("invalid escape sequence '\\{other}' in HELP"),
                ));
            }
            None => {
                return Err(ParseError::syntax(line_no, "dangling escape in HELP"));
            }
        }
    }
    Ok(help)
}

fn parse_float(line_no: usize, token: &str) -> Result<f64, ParseError> {
    token
        .parse::<f64>()
        .map_err(|_| ParseError::syntax(line_no, format!("invalid float {token:?}")))
}

fn parse_count(line_no: usize, value: f64) -> Result<u64, ParseError> {
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 {
        Ok(value as u64)
    } else {
        Err(ParseError::syntax(
            line_no,
            format!("count {value} is not a non-negative integer"),
        ))
    }
}

/// Remove the `le`/`quantile` label from a sample and parse its bound.
fn take_bound(line_no: usize, labels: &mut Vec<LabelPair>, name: &str) -> Result<f64, ParseError> {
    let pos = labels
        .iter()
        .position(|l| l.name == name)
        .ok_or_else(|| ParseError::syntax(line_no, format!("missing {name:?} label")))?;
    let label = labels.remove(pos);
    parse_float(line_no, &label.value)
}

/// Whether `name` matches `[a-zA-Z_:][a-zA-Z0-9_:]*`.
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Whether `name` matches `[a-zA-Z_][a-zA-Z0-9_]*`.
pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
