//! Hyperparameter values and finite search grids.
//!
//! A [`ParamGrid`] maps parameter names to finite candidate lists. Names are
//! namespaced with the pipeline stage they target, using a double-underscore
//! separator (`model__max_iter` addresses `max_iter` on the `model` stage).
//! Candidate enumeration is the cartesian product over all axes, in insertion
//! order, so a grid always expands to the same candidate sequence.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ChurnError, Result};

/// Separator between a stage name and a parameter name in grid keys.
pub const NAMESPACE_SEP: &str = "__";

/// A single typed hyperparameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

impl ParamValue {
    pub fn str(s: &str) -> Self {
        ParamValue::Str(s.to_string())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_usize(&self) -> Option<usize> {
        match self {
            ParamValue::Int(v) if *v >= 0 => Some(*v as usize),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Error for a value whose type does not match what the parameter expects.
    pub fn type_mismatch(&self, name: &str, expected: &str) -> ChurnError {
        ChurnError::InvalidParameter {
            name: name.to_string(),
            value: self.to_string(),
            reason: format!("expected {expected}"),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Str(v) => write!(f, "{v}"),
            ParamValue::Bool(v) => write!(f, "{v}"),
        }
    }
}

/// One fully specified grid point: parameter name -> chosen value.
pub type Candidate = Vec<(String, ParamValue)>;

/// An ordered mapping from parameter name to its finite candidate values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParamGrid {
    axes: Vec<(String, Vec<ParamValue>)>,
}

impl ParamGrid {
    pub fn new() -> Self {
        Self { axes: Vec::new() }
    }

    /// Add an axis. Later axes vary fastest during enumeration.
    pub fn add(mut self, name: &str, values: Vec<ParamValue>) -> Self {
        self.axes.push((name.to_string(), values));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.axes.iter().map(|(k, _)| k.as_str())
    }

    /// Number of grid points. An empty grid has exactly one (the defaults).
    pub fn n_candidates(&self) -> usize {
        self.axes.iter().map(|(_, v)| v.len().max(1)).product()
    }

    /// Return a copy of this grid with every key prefixed by `stage`.
    pub fn prefixed(&self, stage: &str) -> Self {
        Self {
            axes: self
                .axes
                .iter()
                .map(|(k, v)| (format!("{stage}{NAMESPACE_SEP}{k}"), v.clone()))
                .collect(),
        }
    }

    /// Enumerate all grid points as the cartesian product over axes.
    ///
    /// An empty grid yields a single empty candidate, which a search treats
    /// as "evaluate the defaults once".
    pub fn candidates(&self) -> Vec<Candidate> {
        let mut out: Vec<Candidate> = vec![Vec::new()];
        for (name, values) in &self.axes {
            let mut next = Vec::with_capacity(out.len() * values.len().max(1));
            for base in &out {
                for v in values {
                    let mut c = base.clone();
                    c.push((name.clone(), v.clone()));
                    next.push(c);
                }
            }
            if !values.is_empty() {
                out = next;
            }
        }
        out
    }
}

/// Split a namespaced key into `(stage, param)`.
pub fn split_key(key: &str) -> Result<(&str, &str)> {
    key.split_once(NAMESPACE_SEP).ok_or_else(|| {
        ChurnError::ConfigError(format!(
            "grid key '{key}' is not namespaced with a pipeline stage (expected 'stage{NAMESPACE_SEP}param')"
        ))
    })
}

/// Evenly spaced floats over `[start, stop]`, endpoints included.
pub fn linspace(start: f64, stop: f64, num: usize) -> Vec<ParamValue> {
    if num <= 1 {
        return vec![ParamValue::Float(start)];
    }
    let step = (stop - start) / (num - 1) as f64;
    (0..num)
        .map(|i| ParamValue::Float(start + step * i as f64))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cartesian_product_order() {
        let grid = ParamGrid::new()
            .add("a", vec![ParamValue::Int(1), ParamValue::Int(2)])
            .add("b", vec![ParamValue::str("x"), ParamValue::str("y")]);
        let cands = grid.candidates();
        assert_eq!(cands.len(), 4);
        assert_eq!(grid.n_candidates(), 4);
        assert_eq!(cands[0][0].1, ParamValue::Int(1));
        assert_eq!(cands[0][1].1, ParamValue::str("x"));
        assert_eq!(cands[3][0].1, ParamValue::Int(2));
        assert_eq!(cands[3][1].1, ParamValue::str("y"));
    }

    #[test]
    fn test_empty_grid_is_single_default_candidate() {
        let grid = ParamGrid::new();
        let cands = grid.candidates();
        assert_eq!(cands.len(), 1);
        assert!(cands[0].is_empty());
        assert_eq!(grid.n_candidates(), 1);
    }

    #[test]
    fn test_prefixing_and_split() {
        let grid = ParamGrid::new().add("max_iter", vec![ParamValue::Int(500)]);
        let grid = grid.prefixed("model");
        let key = grid.keys().next().unwrap().to_string();
        assert_eq!(key, "model__max_iter");
        let (stage, param) = split_key(&key).unwrap();
        assert_eq!(stage, "model");
        assert_eq!(param, "max_iter");
        assert!(split_key("no_namespace").is_err());
    }

    #[test]
    fn test_linspace_endpoints() {
        let vals = linspace(0.1, 2.0, 20);
        assert_eq!(vals.len(), 20);
        assert!((vals[0].as_f64().unwrap() - 0.1).abs() < 1e-12);
        assert!((vals[19].as_f64().unwrap() - 2.0).abs() < 1e-12);
    }
}
