use crate::artifacts::LabelTable;
use crate::types::{RankedIdentity, RankedResult, TOP_K};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RankError {
    #[error("{scores} decision scores for {labels} identity labels")]
    LabelCountMismatch { scores: usize, labels: usize },
    #[error("{0} classes, at least {TOP_K} required for a ranking")]
    TooFewClasses(usize),
    #[error("decision score {index} is not finite ({value})")]
    NonFiniteScore { index: usize, value: f64 },
}

/// Numerically stable softmax.
pub fn softmax(scores: &[f64]) -> Vec<f64> {
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Turn per-class decision scores into the top-5 identities.
///
/// Probabilities are computed over every class before truncation. Equal
/// probabilities keep ascending class order.
pub fn rank(scores: &[f64], labels: &LabelTable) -> Result<RankedResult, RankError> {
    if scores.len() != labels.len() {
        return Err(RankError::LabelCountMismatch {
            scores: scores.len(),
            labels: labels.len(),
        });
    }
    if scores.len() < TOP_K {
        return Err(RankError::TooFewClasses(scores.len()));
    }
    if let Some((index, &value)) = scores.iter().enumerate().find(|(_, s)| !s.is_finite()) {
        return Err(RankError::NonFiniteScore { index, value });
    }

    let probabilities = softmax(scores);
    let mut order: Vec<usize> = (0..probabilities.len()).collect();
    // sort_by is stable, so ties stay in ascending index order.
    order.sort_by(|&a, &b| probabilities[b].total_cmp(&probabilities[a]));

    let entries: [RankedIdentity; TOP_K] = std::array::from_fn(|position| {
        let class_index = order[position];
        RankedIdentity {
            class_index,
            // Lengths were checked against the table above.
            label: labels.get(class_index).unwrap_or_default().to_string(),
            probability: probabilities[class_index],
        }
    });

    Ok(RankedResult { entries })
}
