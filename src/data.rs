//! Churn dataset loading: CSV to ndarray with label-encoded categoricals.

use ndarray::{Array1, Array2, Axis};
use polars::prelude::*;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::error::{ChurnError, Result};

pub const NUM_COLS: [&str; 3] = ["ClientPeriod", "MonthlySpending", "TotalSpent"];

pub const CAT_COLS: [&str; 16] = [
    "Sex",
    "IsSeniorCitizen",
    "HasPartner",
    "HasChild",
    "HasPhoneService",
    "HasMultiplePhoneNumbers",
    "HasInternetService",
    "HasOnlineSecurityService",
    "HasOnlineBackup",
    "HasDeviceProtection",
    "HasTechSupportAccess",
    "HasOnlineTV",
    "HasMovieSubscription",
    "HasContractPhone",
    "IsBillingPaperless",
    "PaymentMethod",
];

pub const TARGET_COL: &str = "Churn";

/// A loaded dataset: features with numeric columns first, then categorical
/// columns as integer codes, plus the binary target.
pub struct ChurnDataset {
    pub features: Array2<f64>,
    pub target: Array1<f64>,
    /// Indices of the numeric feature columns.
    pub numeric_indices: Vec<usize>,
    /// Indices of the categorical (code-valued) feature columns.
    pub categorical_indices: Vec<usize>,
}

fn numeric_column(df: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let col = df.column(name)?;
    let ca = col.cast(&DataType::Float64)?;
    let ca = ca.f64()?;
    Ok(ca.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

/// Label-encode a column by first occurrence order of its values.
fn encoded_column(df: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let col = df.column(name)?;
    let ca = col.cast(&DataType::String)?;
    let ca = ca.str()?;
    let mut codes: HashMap<String, f64> = HashMap::new();
    let mut out = Vec::with_capacity(df.height());
    for value in ca.into_iter() {
        let key = value.unwrap_or("").to_string();
        let next = codes.len() as f64;
        out.push(*codes.entry(key).or_insert(next));
    }
    Ok(out)
}

/// Load the churn CSV into feature/target arrays.
///
/// The target accepts 0/1 integers or Yes/No strings.
pub fn load_churn_csv(path: &Path) -> Result<ChurnDataset> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(1000))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;
    info!(rows = df.height(), cols = df.width(), "dataset loaded");

    let n = df.height();
    if n == 0 {
        return Err(ChurnError::DataError("dataset has no rows".to_string()));
    }

    let mut columns: Vec<Vec<f64>> = Vec::with_capacity(NUM_COLS.len() + CAT_COLS.len());
    for name in NUM_COLS {
        columns.push(numeric_column(&df, name)?);
    }
    for name in CAT_COLS {
        columns.push(encoded_column(&df, name)?);
    }

    let width = columns.len();
    let mut features = Array2::zeros((n, width));
    for (j, column) in columns.iter().enumerate() {
        for (i, &v) in column.iter().enumerate() {
            features[[i, j]] = v;
        }
    }

    let target_raw = df.column(TARGET_COL)?;
    let target: Vec<f64> = if target_raw.dtype() == &DataType::String {
        target_raw
            .cast(&DataType::String)?
            .str()?
            .into_iter()
            .map(|v| match v {
                Some("Yes") | Some("yes") | Some("1") => 1.0,
                _ => 0.0,
            })
            .collect()
    } else {
        numeric_column(&df, TARGET_COL)?
            .into_iter()
            .map(|v| if v > 0.5 { 1.0 } else { 0.0 })
            .collect()
    };

    Ok(ChurnDataset {
        features,
        target: Array1::from(target),
        numeric_indices: (0..NUM_COLS.len()).collect(),
        categorical_indices: (NUM_COLS.len()..width).collect(),
    })
}

/// Seeded shuffled train/validation split.
pub fn train_test_split(
    x: &Array2<f64>,
    y: &Array1<f64>,
    test_ratio: f64,
    seed: u64,
) -> Result<(Array2<f64>, Array2<f64>, Array1<f64>, Array1<f64>)> {
    if !(0.0 < test_ratio && test_ratio < 1.0) {
        return Err(ChurnError::ConfigError(format!(
            "test split ratio must be in (0, 1), got {test_ratio}"
        )));
    }
    let n = x.nrows();
    let n_test = ((n as f64 * test_ratio).round() as usize).clamp(1, n - 1);

    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    indices.shuffle(&mut rng);
    let (test_idx, train_idx) = indices.split_at(n_test);

    Ok((
        x.select(Axis(0), train_idx),
        x.select(Axis(0), test_idx),
        y.select(Axis(0), train_idx),
        y.select(Axis(0), test_idx),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_split_sizes_and_determinism() {
        let x = Array2::from_shape_fn((50, 2), |(i, j)| (i * 2 + j) as f64);
        let y = Array1::from_iter((0..50).map(|i| (i % 2) as f64));
        let (xtr, xte, ytr, yte) = train_test_split(&x, &y, 0.2, 42).unwrap();
        assert_eq!(xtr.nrows(), 40);
        assert_eq!(xte.nrows(), 10);
        assert_eq!(ytr.len(), 40);
        assert_eq!(yte.len(), 10);

        let (xtr2, _, _, _) = train_test_split(&x, &y, 0.2, 42).unwrap();
        assert_eq!(xtr, xtr2);
    }

    #[test]
    fn test_invalid_ratio_rejected() {
        let x = array![[1.0], [2.0]];
        let y = array![0.0, 1.0];
        assert!(train_test_split(&x, &y, 0.0, 0).is_err());
        assert!(train_test_split(&x, &y, 1.0, 0).is_err());
    }

    #[test]
    fn test_load_csv_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.csv");
        let mut header: Vec<&str> = NUM_COLS.to_vec();
        header.extend(CAT_COLS);
        header.push(TARGET_COL);
        let mut csv = header.join(",");
        csv.push('\n');
        for i in 0..6 {
            let mut row: Vec<String> =
                vec![format!("{i}"), format!("{}.5", i * 10), format!("{}", i * 100)];
            for c in 0..CAT_COLS.len() {
                row.push(if (i + c) % 2 == 0 { "A".to_string() } else { "B".to_string() });
            }
            row.push(if i % 2 == 0 { "Yes".to_string() } else { "No".to_string() });
            csv.push_str(&row.join(","));
            csv.push('\n');
        }
        std::fs::write(&path, csv).unwrap();

        let ds = load_churn_csv(&path).unwrap();
        assert_eq!(ds.features.dim(), (6, 19));
        assert_eq!(ds.numeric_indices, vec![0, 1, 2]);
        assert_eq!(ds.categorical_indices.len(), 16);
        assert_eq!(ds.target.iter().filter(|&&v| v > 0.5).count(), 3);
        // categorical codes are small integers
        assert!(ds
            .features
            .column(3)
            .iter()
            .all(|&v| v == 0.0 || v == 1.0));
    }
}
