//! Scoring metrics for binary classifiers.

use ndarray::Array1;

use crate::error::{ChurnError, Result};

/// Area under the ROC curve via the rank statistic.
///
/// `y_true` holds binary labels (0.0 / 1.0), `scores` the predicted score for
/// the positive class. Ties in `scores` receive their average rank, matching
/// the Mann-Whitney formulation. Fails if only one class is present, since
/// the curve is undefined.
pub fn roc_auc_score(y_true: &Array1<f64>, scores: &Array1<f64>) -> Result<f64> {
    if y_true.len() != scores.len() {
        return Err(ChurnError::ShapeError {
            expected: format!("{} scores", y_true.len()),
            actual: format!("{} scores", scores.len()),
        });
    }
    if y_true.is_empty() {
        return Err(ChurnError::ValidationError(
            "cannot compute ROC AUC on empty input".to_string(),
        ));
    }

    let n_pos = y_true.iter().filter(|&&y| y > 0.5).count();
    let n_neg = y_true.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return Err(ChurnError::ValidationError(
            "ROC AUC is undefined with a single class".to_string(),
        ));
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| {
        scores[a]
            .partial_cmp(&scores[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    // Average ranks over tied score groups, accumulate ranks of positives.
    let mut rank_sum_pos = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            if y_true[idx] > 0.5 {
                rank_sum_pos += avg_rank;
            }
        }
        i = j + 1;
    }

    let n_pos = n_pos as f64;
    let n_neg = n_neg as f64;
    Ok((rank_sum_pos - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg))
}

/// Mean of a score slice.
pub fn mean(scores: &[f64]) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    scores.iter().sum::<f64>() / scores.len() as f64
}

/// Population standard deviation of a score slice.
pub fn std_dev(scores: &[f64]) -> f64 {
    if scores.len() < 2 {
        return 0.0;
    }
    let m = mean(scores);
    (scores.iter().map(|s| (s - m).powi(2)).sum::<f64>() / scores.len() as f64).sqrt()
}
