//! Match scorer — job/profile compatibility as a 40–95 score with a grade
//!
//! Raw cosine similarity in this embedding space clusters in a narrow band
//! (roughly 0.30–0.65) that reads as meaningless to an end user, so the
//! scorer rescales it linearly onto 40–95 and attaches a letter grade. The
//! band is configuration (`ScoringConfig`), not a constant — swapping the
//! embedding model means recalibrating the config.
//!
//! When the description contains a recognizable requirements section of
//! useful length, its sub-embedding is blended 0.6/0.4 with the full-text
//! embedding; otherwise the full text stands alone.

use regex::Regex;
use serde::{Deserialize, Serialize};

use vantage_core::config::ScoringConfig;
use vantage_core::index::cosine_similarity;
use vantage_core::pipeline::EmbeddingPipeline;

use crate::error::EngineError;
use crate::store::JobPosting;

/// Letter grade over the 40–95 score band. Declared worst-first so derived
/// ordering matches "better grade compares greater".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Grade {
    F,
    D,
    CMinus,
    C,
    CPlus,
    BMinus,
    B,
    BPlus,
    AMinus,
    A,
    APlus,
}

impl Grade {
    /// Contiguous, monotonic breakpoints: A+ ≥ 90 down to F < 40. Scores are
    /// clamped to 40–95 upstream, so F is unreachable in practice but keeps
    /// the mapping total.
    pub fn from_score(score: f32) -> Self {
        match score {
            s if s >= 90.0 => Grade::APlus,
            s if s >= 85.0 => Grade::A,
            s if s >= 80.0 => Grade::AMinus,
            s if s >= 75.0 => Grade::BPlus,
            s if s >= 70.0 => Grade::B,
            s if s >= 65.0 => Grade::BMinus,
            s if s >= 60.0 => Grade::CPlus,
            s if s >= 55.0 => Grade::C,
            s if s >= 50.0 => Grade::CMinus,
            s if s >= 40.0 => Grade::D,
            _ => Grade::F,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Grade::APlus => "A+",
            Grade::A => "A",
            Grade::AMinus => "A-",
            Grade::BPlus => "B+",
            Grade::B => "B",
            Grade::BMinus => "B-",
            Grade::CPlus => "C+",
            Grade::C => "C",
            Grade::CMinus => "C-",
            Grade::D => "D",
            Grade::F => "F",
        }
    }
}

impl std::fmt::Display for Grade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One scoring pass over one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchScore {
    pub score: f32,
    pub grade: Grade,
    pub used_requirements_split: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Pending,
    Complete,
    Error,
}

/// Per-job batch result. Jobs that fail to embed keep `status = Error` and
/// no score — never a defaulted mid-range one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobScore {
    pub job_id: String,
    pub status: MatchStatus,
    pub result: Option<MatchScore>,
}

/// Best-effort extraction of a requirements/qualifications subsection.
///
/// Pattern-matches common section headers; the extracted text must be at
/// least `min_chars` long to be trusted. Contract: section not found (or too
/// short) means `None`, and the caller falls back to the full text. This
/// function is the swap point for a more robust extractor later.
pub fn extract_requirements_section(text: &str, min_chars: usize) -> Option<String> {
    let header_patterns = [
        r"(?im)^\s*(?:key\s+|minimum\s+|basic\s+)?requirements?\s*:?\s*$",
        r"(?im)^\s*(?:minimum\s+|preferred\s+|basic\s+)?qualifications?\s*:?\s*$",
        r"(?im)^\s*what\s+you['\u{2019}]ll\s+(?:need|bring)\s*:?\s*$",
        r"(?im)^\s*what\s+we['\u{2019}]re\s+looking\s+for\s*:?\s*$",
        r"(?im)^\s*who\s+you\s+are\s*:?\s*$",
        r"(?im)^\s*must[\s-]haves?\s*:?\s*$",
        r"(?im)^\s*about\s+you\s*:?\s*$",
    ];

    // Earliest header wins when several match.
    let mut section_start: Option<usize> = None;
    for pattern in header_patterns.iter() {
        if let Ok(re) = Regex::new(pattern) {
            if let Some(m) = re.find(text) {
                let start = m.end();
                if section_start.map(|s| start < s).unwrap_or(true) {
                    section_start = Some(start);
                }
            }
        }
    }
    let start = section_start?;
    let rest = &text[start..];

    // Cut at the next section that is clearly something else.
    let boundary_pattern = r"(?im)^\s*(?:responsibilities|benefits|perks|compensation|salary|about\s+(?:us|the\s+(?:company|team|role))|what\s+we\s+offer|why\s+join|our\s+stack|interview\s+process|equal\s+opportunity)\b";
    let section = match Regex::new(boundary_pattern).ok().and_then(|re| re.find(rest)) {
        Some(boundary) => &rest[..boundary.start()],
        None => rest,
    };

    let section = section.trim();
    if section.chars().count() >= min_chars {
        Some(section.to_string())
    } else {
        None
    }
}

/// Linear map from the configured raw-similarity band onto the score band,
/// clamped at both ends, rounded to a whole percentage.
pub fn similarity_to_score(similarity: f32, config: &ScoringConfig) -> f32 {
    let span = config.similarity_ceiling - config.similarity_floor;
    if span <= 0.0 {
        return config.score_floor;
    }
    let t = ((similarity - config.similarity_floor) / span).clamp(0.0, 1.0);
    (config.score_floor + t * (config.score_ceiling - config.score_floor)).round()
}

pub struct MatchScorer {
    pipeline: EmbeddingPipeline,
    config: ScoringConfig,
}

impl MatchScorer {
    pub fn new(pipeline: EmbeddingPipeline, config: ScoringConfig) -> Self {
        Self { pipeline, config }
    }

    /// Score one job description against the profile vector.
    pub async fn score_job(
        &self,
        job_description: &str,
        profile_vector: &[f32],
    ) -> Result<MatchScore, EngineError> {
        let full = self
            .pipeline
            .embed(job_description)
            .await?
            .ok_or(EngineError::EmbeddingUnavailable)?;
        let full_similarity = cosine_similarity(&full.vector, profile_vector);

        let (blended, used_requirements_split) =
            match extract_requirements_section(job_description, self.config.min_requirements_chars)
            {
                Some(section) => match self.pipeline.embed(&section).await? {
                    Some(requirements) => {
                        let requirements_similarity =
                            cosine_similarity(&requirements.vector, profile_vector);
                        let w = self.config.requirements_weight;
                        (
                            w * requirements_similarity + (1.0 - w) * full_similarity,
                            true,
                        )
                    }
                    None => (full_similarity, false),
                },
                None => (full_similarity, false),
            };

        let score = similarity_to_score(blended, &self.config);
        Ok(MatchScore {
            score,
            grade: Grade::from_score(score),
            used_requirements_split,
        })
    }

    /// Score a batch of jobs, strictly sequentially to bound concurrent load
    /// on the pipeline. Each job's failure is isolated; results come back
    /// sorted score-descending with unscored jobs last.
    pub async fn score_jobs(
        &self,
        jobs: &[JobPosting],
        profile_vector: &[f32],
    ) -> Vec<JobScore> {
        let mut results = Vec::with_capacity(jobs.len());

        for job in jobs {
            match self.score_job(&job.description, profile_vector).await {
                Ok(match_score) => {
                    results.push(JobScore {
                        job_id: job.id.clone(),
                        status: MatchStatus::Complete,
                        result: Some(match_score),
                    });
                }
                Err(e) => {
                    tracing::warn!(job_id = %job.id, error = %e, "Job failed to score, continuing batch");
                    results.push(JobScore {
                        job_id: job.id.clone(),
                        status: MatchStatus::Error,
                        result: None,
                    });
                }
            }
        }

        results.sort_by(|a, b| {
            sort_key(b)
                .partial_cmp(&sort_key(a))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results
    }
}

fn sort_key(job_score: &JobScore) -> f32 {
    job_score
        .result
        .as_ref()
        .map(|m| m.score)
        .unwrap_or(f32::NEG_INFINITY)
}

// ============================================================================
// TESTS
// ============================================================================
