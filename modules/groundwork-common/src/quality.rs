use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Criterion and composite scores share a 1-5 scale.
pub const SCORE_MIN: f64 = 1.0;
pub const SCORE_MAX: f64 = 5.0;

/// Composite weights. Web resources score credibility, academic resources
/// score solidity; the absent criterion's weight is redistributed by
/// normalizing over the weights actually present.
pub const WEIGHT_RELEVANCE: f64 = 0.35;
pub const WEIGHT_CREDIBILITY: f64 = 0.25;
pub const WEIGHT_SOLIDITY: f64 = 0.20;
pub const WEIGHT_USEFULNESS: f64 = 0.20;

/// Per-criterion quality scores for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CriterionScores {
    pub relevance: f64,
    /// Scored for web resources only.
    pub credibility: Option<f64>,
    /// Scored for academic resources only.
    pub solidity: Option<f64>,
    pub usefulness: f64,
}

impl CriterionScores {
    pub fn web(relevance: f64, credibility: f64, usefulness: f64) -> Self {
        Self {
            relevance,
            credibility: Some(credibility),
            solidity: None,
            usefulness,
        }
    }

    pub fn academic(relevance: f64, solidity: f64, usefulness: f64) -> Self {
        Self {
            relevance,
            credibility: None,
            solidity: Some(solidity),
            usefulness,
        }
    }
}

/// Weighted composite over whichever criteria are present, rounded to two
/// decimals.
pub fn composite_score(scores: &CriterionScores) -> f64 {
    let mut weighted = scores.relevance * WEIGHT_RELEVANCE;
    let mut present = WEIGHT_RELEVANCE;
    if let Some(credibility) = scores.credibility {
        weighted += credibility * WEIGHT_CREDIBILITY;
        present += WEIGHT_CREDIBILITY;
    }
    if let Some(solidity) = scores.solidity {
        weighted += solidity * WEIGHT_SOLIDITY;
        present += WEIGHT_SOLIDITY;
    }
    weighted += scores.usefulness * WEIGHT_USEFULNESS;
    present += WEIGHT_USEFULNESS;
    round2(weighted / present)
}

/// Clamp a raw model score into the valid range.
pub fn clamp_score(value: f64) -> f64 {
    value.clamp(SCORE_MIN, SCORE_MAX)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn web_composite_uses_credibility_weight() {
        // (4*0.35 + 3*0.25 + 5*0.20) / 0.80 = 3.9375
        let scores = CriterionScores::web(4.0, 3.0, 5.0);
        assert_eq!(composite_score(&scores), 3.94);
    }

    #[test]
    fn academic_composite_renormalizes_over_present_weights() {
        // (4*0.35 + 3*0.20 + 5*0.20) / 0.75 = 4.0
        let scores = CriterionScores::academic(4.0, 3.0, 5.0);
        assert_eq!(composite_score(&scores), 4.0);
    }

    #[test]
    fn uniform_scores_compose_to_themselves() {
        assert_eq!(composite_score(&CriterionScores::web(5.0, 5.0, 5.0)), 5.0);
        assert_eq!(composite_score(&CriterionScores::academic(2.0, 2.0, 2.0)), 2.0);
    }

    #[test]
    fn composite_recomputation_is_stable() {
        let scores = CriterionScores::web(3.0, 4.0, 2.0);
        let first = composite_score(&scores);
        assert_eq!(composite_score(&scores), first);
    }

    #[test]
    fn clamp_score_bounds_out_of_range_values() {
        assert_eq!(clamp_score(7.0), 5.0);
        assert_eq!(clamp_score(0.0), 1.0);
        assert_eq!(clamp_score(3.5), 3.5);
    }
}
