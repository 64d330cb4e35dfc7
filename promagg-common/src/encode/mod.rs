//! Exposition encoders and content negotiation.
//!
//! Two wire formats are supported:
//! - [`Format::Text`]: text exposition format 0.0.4 (default)
//! - [`Format::ProtoDelimited`]: length-delimited `io.prometheus.client.MetricFamily`
//!   protocol buffer messages
//!
//! Every family is validated before a single byte of it is written, and
//! [`encode_families`] stops at the first failure, so callers never see a
//! partially encoded document.

mod proto;
mod text;

use thiserror::Error;
use tracing::trace;

use crate::model::{MetricFamily, MetricType};

pub use proto::ProtoEncoder;
pub use text::TextEncoder;

/// Errors produced while encoding metric families.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("metric family has no name")]
    MissingName,

    #[error("metric family {name:?} has no samples")]
    NoSamples { name: String },

    #[error("expected {expected} in metric family {name:?}, found {found}")]
    TypeMismatch {
        name: String,
        expected: MetricType,
        found: MetricType,
    },

    #[error("I/O error while encoding: {0}")]
    Io(#[from] std::io::Error),

    #[error("protobuf encoding failed: {0}")]
    Proto(#[from] prost::EncodeError),
}

/// A sequential metric family encoder.
pub trait Encoder {
    /// Encode one family. On error nothing of this family has been written.
    fn encode(&mut self, family: &MetricFamily) -> Result<(), EncodeError>;
}

/// Wire format negotiated with the scraping client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Format {
    /// Text exposition format 0.0.4.
    #[default]
    Text,
    /// Length-delimited protocol buffer messages.
    ProtoDelimited,
}

/// Media type of the text format.
pub const TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Media type of the delimited protocol buffer format.
pub const PROTO_DELIMITED_CONTENT_TYPE: &str =
    "application/vnd.google.protobuf; proto=io.prometheus.client.MetricFamily; encoding=delimited";

const PROTO_MEDIA_TYPE: &str = "application/vnd.google.protobuf";
const PROTO_MESSAGE: &str = "io.prometheus.client.MetricFamily";
const TEXT_VERSION: &str = "0.0.4";

impl Format {
    /// Value for the `Content-Type` response header.
    pub fn content_type(&self) -> &'static str {
        match self {
            Format::Text => TEXT_CONTENT_TYPE,
            Format::ProtoDelimited => PROTO_DELIMITED_CONTENT_TYPE,
        }
    }

    /// Select a format from an `Accept` header value.
    ///
    /// Media ranges are tried in order of descending `q` weight (ties keep
    /// header order). Unsupported or missing preferences fall back to text.
    pub fn negotiate(accept: Option<&str>) -> Format {
        let Some(accept) = accept else {
            return Format::Text;
        };

        let mut ranges: Vec<MediaRange<'_>> = accept.split(',').filter_map(MediaRange::parse).collect();
        ranges.sort_by(|a, b| b.q.total_cmp(&a.q));

        ranges
            .iter()
            .filter(|r| r.q > 0.0)
            .find_map(MediaRange::format)
            .unwrap_or_default()
    }
}

/// One entry of an `Accept` header.
#[derive(Debug)]
struct MediaRange<'a> {
    media_type: &'a str,
    params: Vec<(&'a str, &'a str)>,
    q: f32,
}

impl<'a> MediaRange<'a> {
    fn parse(entry: &'a str) -> Option<Self> {
        let mut parts = entry.split(';');
        let media_type = parts.next()?.trim();
        if media_type.is_empty() {
            return None;
        }

        let mut params = Vec::new();
        let mut q = 1.0;
        for param in parts {
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim().trim_matches('"');
            if key.eq_ignore_ascii_case("q") {
                // Weights outside [0, 1] (NaN included) disable the range.
                q = value
                    .parse::<f32>()
                    .ok()
                    .filter(|q| (0.0..=1.0).contains(q))
                    .unwrap_or(0.0);
            } else {
                params.push((key, value));
            }
        }

        Some(Self {
            media_type,
            params,
            q,
        })
    }

    fn param(&self, key: &str) -> Option<&'a str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| *v)
    }

    fn format(&self) -> Option<Format> {
        if self.media_type.eq_ignore_ascii_case(PROTO_MEDIA_TYPE)
            && self.param("proto") == Some(PROTO_MESSAGE)
            && self.param("encoding") == Some("delimited")
        {
            return Some(Format::ProtoDelimited);
        }
        if self.media_type.eq_ignore_ascii_case("text/plain") {
            match self.param("version") {
                None | Some(TEXT_VERSION) => return Some(Format::Text),
                Some(_) => {}
            }
        }
        None
    }
}

/// Check that a family can be encoded as declared.
pub(crate) fn check_family(family: &MetricFamily) -> Result<(), EncodeError> {
    if family.name.is_empty() {
        return Err(EncodeError::MissingName);
    }
    if family.metrics.is_empty() {
        return Err(EncodeError::NoSamples {
            name: family.name.clone(),
        });
    }
    for metric in &family.metrics {
        let found = metric.value.metric_type();
        if found != family.metric_type {
            return Err(EncodeError::TypeMismatch {
                name: family.name.clone(),
                expected: family.metric_type,
                found,
            });
        }
    }
    Ok(())
}

/// Encode `families` in order, aborting on the first failure.
pub fn encode_families(families: &[MetricFamily], format: Format) -> Result<Vec<u8>, EncodeError> {
    let mut out = Vec::with_capacity(families.len() * 256);
    match format {
        Format::Text => encode_all(&mut TextEncoder::new(&mut out), families)?,
        Format::ProtoDelimited => encode_all(&mut ProtoEncoder::new(&mut out), families)?,
    }
    trace!(?format, families = families.len(), bytes = out.len(), "Encoded families");
    Ok(out)
}

fn encode_all(encoder: &mut impl Encoder, families: &[MetricFamily]) -> Result<(), EncodeError> {
    for family in families {
        encoder.encode(family)?;
    }
    Ok(())
}

/// Format a float the way the exposition format spells it.
pub(crate) fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else {
        format!("{}", value)
    }
}
