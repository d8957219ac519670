//! Feature preprocessing stages: scaling and one-hot encoding.

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{ChurnError, Result};
use crate::pipeline::Transform;

/// Zero-mean unit-variance scaling over every column.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StandardScaler {
    means: Option<Array1<f64>>,
    stds: Option<Array1<f64>>,
}

impl StandardScaler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transform for StandardScaler {
    fn fit(&mut self, x: &Array2<f64>) -> Result<()> {
        if x.nrows() == 0 {
            return Err(ChurnError::DataError("cannot fit scaler on no rows".to_string()));
        }
        let means = x.mean_axis(Axis(0)).ok_or_else(|| {
            ChurnError::DataError("cannot compute column means".to_string())
        })?;
        let stds = x.std_axis(Axis(0), 0.0).mapv(|s| if s > 1e-12 { s } else { 1.0 });
        self.means = Some(means);
        self.stds = Some(stds);
        Ok(())
    }

    fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let (means, stds) = match (&self.means, &self.stds) {
            (Some(m), Some(s)) => (m, s),
            _ => return Err(ChurnError::ModelNotFitted),
        };
        if x.ncols() != means.len() {
            return Err(ChurnError::ShapeError {
                expected: format!("{} columns", means.len()),
                actual: format!("{} columns", x.ncols()),
            });
        }
        Ok((x - means) / stds)
    }

    fn clone_box(&self) -> Box<dyn Transform> {
        Box::new(self.clone())
    }
}

/// One-hot encoding of integer-coded columns. Categories unseen during fit
/// encode to all zeros.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OneHotEncoder {
    categories: Option<Vec<Vec<i64>>>,
}

impl OneHotEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn encode_into(
        categories: &[Vec<i64>],
        x: &Array2<f64>,
        out: &mut Array2<f64>,
        col_offset: usize,
    ) {
        let mut offset = col_offset;
        for (col, cats) in categories.iter().enumerate() {
            for i in 0..x.nrows() {
                let code = x[[i, col]].round() as i64;
                if let Ok(pos) = cats.binary_search(&code) {
                    out[[i, offset + pos]] = 1.0;
                }
            }
            offset += cats.len();
        }
    }
}

impl Transform for OneHotEncoder {
    fn fit(&mut self, x: &Array2<f64>) -> Result<()> {
        let mut categories = Vec::with_capacity(x.ncols());
        for col in x.columns() {
            let mut cats: Vec<i64> = col.iter().map(|v| v.round() as i64).collect();
            cats.sort_unstable();
            cats.dedup();
            categories.push(cats);
        }
        self.categories = Some(categories);
        Ok(())
    }

    fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let categories = self.categories.as_ref().ok_or(ChurnError::ModelNotFitted)?;
        if x.ncols() != categories.len() {
            return Err(ChurnError::ShapeError {
                expected: format!("{} columns", categories.len()),
                actual: format!("{} columns", x.ncols()),
            });
        }
        let width: usize = categories.iter().map(|c| c.len()).sum();
        let mut out = Array2::zeros((x.nrows(), width));
        Self::encode_into(categories, x, &mut out, 0);
        Ok(out)
    }

    fn clone_box(&self) -> Box<dyn Transform> {
        Box::new(self.clone())
    }
}

/// Column-wise preprocessor: scales the numeric columns and one-hot encodes
/// the categorical ones, emitting `[scaled numerics | one-hot categoricals]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnTransform {
    numeric: Vec<usize>,
    categorical: Vec<usize>,
    scaler: StandardScaler,
    encoder: OneHotEncoder,
}

impl ColumnTransform {
    pub fn new(numeric: Vec<usize>, categorical: Vec<usize>) -> Self {
        Self {
            numeric,
            categorical,
            scaler: StandardScaler::new(),
            encoder: OneHotEncoder::new(),
        }
    }

    fn check_columns(&self, x: &Array2<f64>) -> Result<()> {
        let max = self
            .numeric
            .iter()
            .chain(self.categorical.iter())
            .copied()
            .max();
        if let Some(max) = max {
            if max >= x.ncols() {
                return Err(ChurnError::ShapeError {
                    expected: format!("at least {} columns", max + 1),
                    actual: format!("{} columns", x.ncols()),
                });
            }
        }
        Ok(())
    }
}

impl Transform for ColumnTransform {
    fn fit(&mut self, x: &Array2<f64>) -> Result<()> {
        self.check_columns(x)?;
        if !self.numeric.is_empty() {
            self.scaler.fit(&x.select(Axis(1), &self.numeric))?;
        }
        if !self.categorical.is_empty() {
            self.encoder.fit(&x.select(Axis(1), &self.categorical))?;
        }
        Ok(())
    }

    fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.check_columns(x)?;
        let mut parts: Vec<Array2<f64>> = Vec::new();
        if !self.numeric.is_empty() {
            parts.push(self.scaler.transform(&x.select(Axis(1), &self.numeric))?);
        }
        if !self.categorical.is_empty() {
            parts.push(self.encoder.transform(&x.select(Axis(1), &self.categorical))?);
        }
        match parts.len() {
            0 => Ok(x.to_owned()),
            1 => Ok(parts.pop().unwrap_or_else(|| x.to_owned())),
            _ => {
                let views: Vec<_> = parts.iter().map(|p| p.view()).collect();
                Ok(ndarray::concatenate(Axis(1), &views)?)
            }
        }
    }

    fn clone_box(&self) -> Box<dyn Transform> {
        Box::new(self.clone())
    }
}
