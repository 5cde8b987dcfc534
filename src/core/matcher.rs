// src/core/matcher.rs

//! Label matchers: the predicate language shared by silences, inhibition rules
//! and the routing tree.

use crate::core::errors::AlertError;
use crate::core::model::Labels;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode, strum_macros::EnumString,
)]
pub enum MatchOp {
    #[strum(serialize = "=")]
    Eq,
    #[strum(serialize = "!=")]
    NotEq,
    #[strum(serialize = "=~")]
    Regex,
    #[strum(serialize = "!~")]
    NotRegex,
}

impl MatchOp {
    fn symbol(self) -> &'static str {
        match self {
            MatchOp::Eq => "=",
            MatchOp::NotEq => "!=",
            MatchOp::Regex => "=~",
            MatchOp::NotRegex => "!~",
        }
    }
}

/// A single `name <op> value` predicate against a label set.
///
/// A missing label is treated as if it were present with an empty value, so
/// `severity!=critical` matches alerts that don't carry a `severity` label at all.
#[derive(Debug, Serialize, Deserialize)]
pub struct Matcher {
    pub name: String,
    pub value: String,
    pub op: MatchOp,
    #[serde(skip)]
    compiled: OnceLock<Regex>,
}

impl bincode::Encode for Matcher {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> Result<(), bincode::error::EncodeError> {
        bincode::Encode::encode(&self.name, encoder)?;
        bincode::Encode::encode(&self.value, encoder)?;
        bincode::Encode::encode(&self.op, encoder)
    }
}

impl<Context> bincode::Decode<Context> for Matcher {
    fn decode<D: bincode::de::Decoder<Context = Context>>(
        decoder: &mut D,
    ) -> Result<Self, bincode::error::DecodeError> {
        let name = bincode::Decode::decode(decoder)?;
        let value = bincode::Decode::decode(decoder)?;
        let op = bincode::Decode::decode(decoder)?;
        Ok(Matcher {
            name,
            value,
            op,
            compiled: OnceLock::new(),
        })
    }
}

impl<'de, Context> bincode::BorrowDecode<'de, Context> for Matcher {
    fn borrow_decode<D: bincode::de::BorrowDecoder<'de, Context = Context>>(
        decoder: &mut D,
    ) -> Result<Self, bincode::error::DecodeError> {
        let name = bincode::Decode::decode(decoder)?;
        let value = bincode::Decode::decode(decoder)?;
        let op = bincode::Decode::decode(decoder)?;
        Ok(Matcher {
            name,
            value,
            op,
            compiled: OnceLock::new(),
        })
    }
}

impl Matcher {
    pub fn new(name: impl Into<String>, op: MatchOp, value: impl Into<String>) -> Result<Self, AlertError> {
        let m = Matcher {
            name: name.into(),
            value: value.into(),
            op,
            compiled: OnceLock::new(),
        };
        if matches!(m.op, MatchOp::Regex | MatchOp::NotRegex) {
            m.regex()?;
        }
        Ok(m)
    }

    fn regex(&self) -> Result<&Regex, AlertError> {
        if let Some(r) = self.compiled.get() {
            return Ok(r);
        }
        let anchored = format!("^(?:{})$", self.value);
        let re = Regex::new(&anchored)
            .map_err(|e| AlertError::InvalidMatcher(format!("{}: {e}", self.value)))?;
        Ok(self.compiled.get_or_init(|| re))
    }

    pub fn matches_value(&self, value: &str) -> bool {
        match self.op {
            MatchOp::Eq => self.value == value,
            MatchOp::NotEq => self.value != value,
            MatchOp::Regex => self.regex().map(|r| r.is_match(value)).unwrap_or(false),
            MatchOp::NotRegex => self.regex().map(|r| !r.is_match(value)).unwrap_or(false),
        }
    }

    pub fn matches_labels(&self, labels: &Labels) -> bool {
        let value = labels.get(&self.name).map(String::as_str).unwrap_or("");
        self.matches_value(value)
    }

    /// True for matchers whose right-hand side names an exact, single value this
    /// matcher requires (`Eq`) -- used to decide bucket-index eligibility in the
    /// inhibitor and silencer.
    pub fn is_exact(&self) -> bool {
        matches!(self.op, MatchOp::Eq)
    }
}

impl std::fmt::Display for Matcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}\"{}\"", self.name, self.op.symbol(), self.value)
    }
}

impl Clone for Matcher {
    fn clone(&self) -> Self {
        Matcher {
            name: self.name.clone(),
            value: self.value.clone(),
            op: self.op,
            compiled: self.compiled.clone(),
        }
    }
}

/// A conjunction of matchers: an alert must satisfy all of them to match.
#[derive(Debug, Default, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Matchers(pub Vec<Matcher>);

impl Matchers {
    pub fn matches(&self, labels: &Labels) -> bool {
        self.0.iter().all(|m| m.matches_labels(labels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn eq_matches_exact_value() {
        let m = Matcher::new("severity", MatchOp::Eq, "critical").unwrap();
        assert!(m.matches_labels(&labels(&[("severity", "critical")])));
        assert!(!m.matches_labels(&labels(&[("severity", "warning")])));
    }

    #[test]
    fn missing_label_is_empty_string() {
        let m = Matcher::new("severity", MatchOp::NotEq, "critical").unwrap();
        assert!(m.matches_labels(&labels(&[("alertname", "Foo")])));
    }

    #[test]
    fn regex_is_anchored() {
        let m = Matcher::new("instance", MatchOp::Regex, "db.*").unwrap();
        assert!(m.matches_value("db1"));
        assert!(!m.matches_value("xdb1"));
    }

    #[test]
    fn invalid_regex_is_rejected() {
        let err = Matcher::new("instance", MatchOp::Regex, "(").unwrap_err();
        assert!(matches!(err, AlertError::InvalidMatcher(_)));
    }
}
