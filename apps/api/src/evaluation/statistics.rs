use serde::Serialize;

use crate::evaluation::qualification::QualificationTag;
use crate::evaluation::session::FinalEvaluation;

/// Score summary over the COMPLETE sessions of a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScoreStatistics {
    pub evaluated: usize,
    pub qualified: usize,
    pub not_qualified: usize,
    pub overqualified: usize,
    pub average_score: f64,
    pub highest_score: u8,
    pub lowest_score: u8,
}

impl ScoreStatistics {
    pub fn from_evaluations<'a>(evaluations: impl IntoIterator<Item = &'a FinalEvaluation>) -> Self {
        let mut stats = Self::default();
        let mut total: u64 = 0;
        for evaluation in evaluations {
            match evaluation.qualification_tag {
                QualificationTag::Qualified => stats.qualified += 1,
                QualificationTag::NotQualified => stats.not_qualified += 1,
                QualificationTag::Overqualified => stats.overqualified += 1,
            }
            let score = evaluation.overall_score;
            if stats.evaluated == 0 {
                stats.highest_score = score;
                stats.lowest_score = score;
            } else {
                stats.highest_score = stats.highest_score.max(score);
                stats.lowest_score = stats.lowest_score.min(score);
            }
            stats.evaluated += 1;
            total += u64::from(score);
        }
        if stats.evaluated > 0 {
            stats.average_score = total as f64 / stats.evaluated as f64;
        }
        stats
    }
}
