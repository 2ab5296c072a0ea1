//! Deterministic construction of generation request locators.
//!
//! A locator is the complete URL for one generation call:
//! `<base>/image/<percent-encoded prompt>?<params>`. Parameters are emitted
//! in caller-supplied order, with two upstream quirks handled here:
//!
//! - the `image` reference payload must be the **final** query parameter —
//!   the API fails to parse the request otherwise;
//! - an absent, negative, or non-numeric `seed` is replaced with a fresh
//!   random value so identical prompts are not served from upstream caches.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS, NON_ALPHANUMERIC};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::form_urlencoded;

/// Default host for the generation API.
pub const DEFAULT_API_BASE: &str = "https://gen.pollinations.ai";

/// Exclusive upper bound for generated seeds (i32::MAX, matching upstream).
pub const SEED_RANGE: i64 = 2_147_483_647;

/// Parameters coerced to integers before being sent; dropped when the value
/// does not parse.
const INTEGER_PARAMS: [&str; 4] = ["width", "height", "seed", "duration"];

/// Escaping for the prompt path segment.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'/')
    .add(b'%')
    .add(b'\\')
    .add(b'^')
    .add(b'|');

/// Component escaping for the trailing image parameter (matches
/// `encodeURIComponent` semantics, which the upstream parser expects).
const QUERY_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// A scalar generation parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ParamValue {
    /// Blank strings are treated the same as absent parameters.
    pub fn is_blank(&self) -> bool {
        matches!(self, ParamValue::Str(s) if s.trim().is_empty())
    }

    /// Integer coercion: floats are floored, strings parsed; booleans never
    /// coerce.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            ParamValue::Float(v) if v.is_finite() => Some(v.floor() as i64),
            ParamValue::Float(_) => None,
            ParamValue::Str(s) => s.trim().parse::<f64>().ok().and_then(|v| {
                if v.is_finite() {
                    Some(v.floor() as i64)
                } else {
                    None
                }
            }),
            ParamValue::Bool(_) => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Str(v) => f.write_str(v),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Str(v)
    }
}

/// An ordered set of generation parameters.
///
/// Order is preserved because the upstream API is order-sensitive for the
/// image payload, and because stable ordering keeps locators deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Params(Vec<(String, ParamValue)>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a parameter, replacing an existing entry in place (original
    /// position kept) or appending a new one.
    pub fn set(&mut self, key: &str, value: impl Into<ParamValue>) -> &mut Self {
        let value = value.into();
        if let Some(entry) = self.0.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value;
        } else {
            self.0.push((key.to_string(), value));
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &str) -> Option<ParamValue> {
        let idx = self.0.iter().position(|(k, _)| k == key)?;
        Some(self.0.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Generate a fresh non-negative seed in the upstream's accepted range.
pub fn random_seed() -> i64 {
    rand::thread_rng().gen_range(0..SEED_RANGE)
}

/// Builds dispatchable locators for the generation endpoint.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    base: String,
}

impl RequestBuilder {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    /// Construct the request locator for a prompt and parameter set.
    ///
    /// Blank values are skipped, `width`/`height`/`seed`/`duration` are
    /// coerced to integers (dropped when they do not parse), a missing or
    /// invalid seed is replaced with a random one, and the `image` parameter
    /// is always appended last.
    pub fn build(&self, prompt: &str, params: &Params) -> String {
        let mut locator = format!(
            "{}/image/{}",
            self.base,
            utf8_percent_encode(prompt, PATH_SEGMENT)
        );

        let mut query = form_urlencoded::Serializer::new(String::new());
        let mut image_param: Option<String> = None;
        let mut seed_emitted = false;

        for (key, value) in params.iter() {
            if value.is_blank() {
                continue;
            }
            if key == "image" {
                image_param = Some(value.to_string());
                continue;
            }
            if key == "seed" {
                let seed = match value.as_int() {
                    Some(v) if v >= 0 => v,
                    _ => random_seed(),
                };
                query.append_pair("seed", &seed.to_string());
                seed_emitted = true;
                continue;
            }
            if INTEGER_PARAMS.contains(&key) {
                match value.as_int() {
                    Some(v) => {
                        query.append_pair(key, &v.to_string());
                    }
                    None => continue, // drop rather than send malformed
                }
                continue;
            }
            query.append_pair(key, &value.to_string());
        }

        if !seed_emitted {
            query.append_pair("seed", &random_seed().to_string());
        }

        let query = query.finish();
        if !query.is_empty() {
            locator.push('?');
            locator.push_str(&query);
        }

        // The API requires the image reference to be the final parameter.
        if let Some(image) = image_param {
            locator.push(if locator.contains('?') { '&' } else { '?' });
            locator.push_str("image=");
            locator.push_str(&utf8_percent_encode(&image, QUERY_COMPONENT).to_string());
        }

        locator
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE)
    }
}
