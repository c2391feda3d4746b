//! Consensus merge of agent verdicts.

use serde::Serialize;

use super::models::{AgentAnalysis, AnalysisSource, Verdict};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub source: AnalysisSource,
    pub recommendation: Verdict,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusOutcome {
    pub decision: Verdict,
    /// In [0, 1].
    pub strength: f64,
    /// Every voter chose `decision`.
    pub agreement: bool,
    pub votes: Vec<Vote>,
}

/// Confidence-weighted majority over `analyses`.
///
/// A verdict's weight is the sum of its voters' confidences. The heaviest
/// verdict wins; equal weights go to the verdict of the most confident voter.
/// Strength is the winning weight minus all other weight, divided by the
/// number of voters. No voters yields a zero-strength HOLD.
pub fn merge_consensus(analyses: &[AgentAnalysis]) -> ConsensusOutcome {
    let votes: Vec<Vote> = analyses
        .iter()
        .map(|a| Vote {
            source: a.source,
            recommendation: a.recommendation,
            confidence: a.confidence.clamp(0.0, 1.0),
        })
        .collect();

    if votes.is_empty() {
        return ConsensusOutcome {
            decision: Verdict::Hold,
            strength: 0.0,
            agreement: false,
            votes,
        };
    }

    let weight_of = |v: Verdict| -> f64 {
        votes
            .iter()
            .filter(|vote| vote.recommendation == v)
            .map(|vote| vote.confidence)
            .sum()
    };

    let top_voter = votes
        .iter()
        .max_by(|a, b| {
            a.confidence
                .partial_cmp(&b.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|v| v.recommendation)
        .unwrap_or(Verdict::Hold);

    let mut decision = top_voter;
    let mut best = weight_of(top_voter);
    for verdict in Verdict::ALL {
        let w = weight_of(verdict);
        if w > best + f64::EPSILON {
            decision = verdict;
            best = w;
        }
    }

    let total: f64 = votes.iter().map(|v| v.confidence).sum();
    let opposing = total - best;
    let strength = ((best - opposing) / votes.len() as f64).clamp(0.0, 1.0);
    let agreement = votes.iter().all(|v| v.recommendation == decision);

    ConsensusOutcome {
        decision,
        strength,
        agreement,
        votes,
    }
}
