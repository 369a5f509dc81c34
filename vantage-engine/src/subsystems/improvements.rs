//! Resume improvement extractor — mines past tailoring sessions for reusable edits
//!
//! Diffs each original/AI-tailored resume pair at word granularity, groups
//! adjacent edits into sentence-like change pairs, filters out noise and
//! job-specific phrasing, classifies what kind of improvement each change is,
//! and renders the survivors as precedent to adapt rather than copy.
//!
//! The job-specificity filters are heuristics, not invariants: they live in
//! the policy block below (`is_job_specific`, `FLATTERY_PATTERNS`) and can be
//! replaced without touching the diff walk or classification.

use regex::Regex;
use serde::{Deserialize, Serialize};
use similar::{capture_diff_slices, Algorithm, DiffTag};
use std::collections::HashSet;

use vantage_core::config::ImprovementsConfig;

use crate::store::JobPosting;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImprovementKind {
    Phrasing,
    Quantification,
    SkillDescription,
}

/// One reusable improvement mined from a past tailoring session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeImprovement {
    pub kind: ImprovementKind,
    pub original: String,
    pub improved: String,
    /// Company of the job whose tailoring produced this change.
    pub source_job: String,
}

/// Extract reusable improvements from other jobs' tailoring sessions.
///
/// Jobs are considered most-recently-updated first, capped to a small window
/// to bound diffing cost. A job contributes only if it has a tailored resume
/// and either its own original resume or the provided default baseline.
pub fn extract_improvements(
    current_job_id: &str,
    jobs: &[JobPosting],
    default_resume_baseline: Option<&str>,
    max_results: usize,
    config: &ImprovementsConfig,
) -> Vec<ResumeImprovement> {
    let mut candidates: Vec<&JobPosting> = jobs
        .iter()
        .filter(|job| job.id != current_job_id)
        .filter(|job| {
            job.tailored_resume.is_some()
                && (job.original_resume.is_some() || default_resume_baseline.is_some())
        })
        .collect();
    candidates.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    candidates.truncate(config.max_source_jobs);

    let mut kept: Vec<ResumeImprovement> = Vec::new();

    for job in candidates {
        let tailored = match job.tailored_resume.as_deref() {
            Some(t) => t,
            None => continue,
        };
        let original = match job.original_resume.as_deref().or(default_resume_baseline) {
            Some(o) => o,
            None => continue,
        };

        for (original_span, improved_span) in change_pairs(original, tailored) {
            if !passes_filters(&original_span, &improved_span, &job.company, config) {
                continue;
            }
            // Dedup against everything already kept, across all source jobs.
            if kept
                .iter()
                .any(|k| token_overlap(&k.improved, &improved_span) > config.near_duplicate_ceiling)
            {
                continue;
            }

            let kind = classify_change(&original_span, &improved_span);
            kept.push(ResumeImprovement {
                kind,
                original: original_span,
                improved: improved_span,
                source_job: job.company.clone(),
            });

            if kept.len() >= max_results {
                return kept;
            }
        }
    }

    kept
}

/// Word-level diff, walked run-length-encoded: contiguous removed+added runs
/// accumulate into one change pair, flushed whenever an unchanged run is
/// encountered or at end of input. Pairs need text on both sides — a pure
/// insertion or deletion is not a rewrite.
fn change_pairs(original: &str, tailored: &str) -> Vec<(String, String)> {
    let original_words: Vec<&str> = original.split_whitespace().collect();
    let tailored_words: Vec<&str> = tailored.split_whitespace().collect();

    let ops = capture_diff_slices(Algorithm::Myers, &original_words, &tailored_words);

    let mut pairs = Vec::new();
    let mut pending_original: Vec<&str> = Vec::new();
    let mut pending_improved: Vec<&str> = Vec::new();

    let mut flush = |pending_original: &mut Vec<&str>, pending_improved: &mut Vec<&str>| {
        if !pending_original.is_empty() && !pending_improved.is_empty() {
            pairs.push((pending_original.join(" "), pending_improved.join(" ")));
        }
        pending_original.clear();
        pending_improved.clear();
    };

    for op in ops {
        match op.tag() {
            DiffTag::Equal => {
                flush(&mut pending_original, &mut pending_improved);
            }
            DiffTag::Delete => {
                pending_original.extend(&original_words[op.old_range()]);
            }
            DiffTag::Insert => {
                pending_improved.extend(&tailored_words[op.new_range()]);
            }
            DiffTag::Replace => {
                pending_original.extend(&original_words[op.old_range()]);
                pending_improved.extend(&tailored_words[op.new_range()]);
            }
        }
    }
    flush(&mut pending_original, &mut pending_improved);

    pairs
}

fn passes_filters(
    original: &str,
    improved: &str,
    company: &str,
    config: &ImprovementsConfig,
) -> bool {
    let original_len = original.chars().count();
    let improved_len = improved.chars().count();

    // Too short to be a coherent rewrite on either side.
    if original_len < config.min_fragment_chars || improved_len < config.min_fragment_chars {
        return false;
    }
    // A deletion is not an improvement.
    if improved_len < original_len {
        return false;
    }
    // Near-identical pairs are noise.
    if token_overlap(original, improved) > config.near_duplicate_ceiling {
        return false;
    }
    if is_job_specific(original, improved, company) {
        return false;
    }
    true
}

/// Token-overlap (Jaccard) similarity over lowercase word sets.
fn token_overlap(a: &str, b: &str) -> f32 {
    let tokens_a: HashSet<String> = tokenize(a);
    let tokens_b: HashSet<String> = tokenize(b);

    if tokens_a.is_empty() && tokens_b.is_empty() {
        return 1.0;
    }

    let intersection = tokens_a.intersection(&tokens_b).count();
    let union = tokens_a.union(&tokens_b).count();
    if union == 0 {
        return 0.0;
    }
    intersection as f32 / union as f32
}

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(String::from)
        .collect()
}

// ----------------------------------------------------------------------------
// Policy: job-specificity filters
// ----------------------------------------------------------------------------

/// Company-flattery phrasings that never generalize to other applications.
const FLATTERY_PATTERNS: [&str; 6] = [
    r"(?i)perfect\s+fit\s+for",
    r"(?i)excited\s+(?:to\s+join|about)\b",
    r"(?i)passionate\s+about\s+(?:joining|your)",
    r"(?i)thrilled\s+(?:to|about)\b",
    r"(?i)your\s+(?:company|team|mission)",
    r"(?i)dream\s+(?:job|company|role)",
];

/// A change is job-specific when it introduces the target company's name
/// where the original had none, or reads as company flattery.
pub fn is_job_specific(original: &str, improved: &str, company: &str) -> bool {
    let company = company.trim();
    if !company.is_empty() {
        let needle = company.to_lowercase();
        if improved.to_lowercase().contains(&needle)
            && !original.to_lowercase().contains(&needle)
        {
            return true;
        }
    }

    for pattern in FLATTERY_PATTERNS.iter() {
        if let Ok(re) = Regex::new(pattern) {
            if re.is_match(improved) {
                return true;
            }
        }
    }

    false
}

// ----------------------------------------------------------------------------
// Classification
// ----------------------------------------------------------------------------

const TECH_TERMS: [&str; 28] = [
    "api", "apis", "sql", "nosql", "python", "rust", "go", "java", "typescript", "kubernetes",
    "docker", "aws", "gcp", "azure", "cloud", "microservices", "distributed", "pipeline",
    "pipelines", "terraform", "react", "graphql", "grpc", "redis", "postgres", "kafka", "ci",
    "cd",
];

fn classify_change(original: &str, improved: &str) -> ImprovementKind {
    if introduces_metrics(original, improved) {
        return ImprovementKind::Quantification;
    }

    let grew_meaningfully =
        improved.chars().count() as f32 >= original.chars().count() as f32 * 1.15;
    if tech_term_count(improved) > tech_term_count(original) && grew_meaningfully {
        return ImprovementKind::SkillDescription;
    }

    ImprovementKind::Phrasing
}

/// True when the improved text carries numeric/metric content the original
/// did not.
fn introduces_metrics(original: &str, improved: &str) -> bool {
    let pattern = r"\d+(?:\.\d+)?\s*(?:%|percent\b|x\b)|[$€£]\s*\d+|\b\d{2,}(?:,\d{3})*\b";
    match Regex::new(pattern) {
        Ok(re) => re.find_iter(improved).count() > re.find_iter(original).count(),
        Err(_) => false,
    }
}

fn tech_term_count(text: &str) -> usize {
    tokenize(text)
        .iter()
        .filter(|token| TECH_TERMS.contains(&token.as_str()))
        .count()
}

// ----------------------------------------------------------------------------
// Rendering
// ----------------------------------------------------------------------------

/// Render improvements grouped by classification, framed as precedent to
/// adapt rather than copy verbatim.
pub fn render_improvements(improvements: &[ResumeImprovement]) -> String {
    if improvements.is_empty() {
        return String::new();
    }

    let mut out = String::from(
        "## Past Resume Improvements\n\nPatterns from earlier tailoring sessions. Adapt the approach to this job; never copy lines verbatim.\n",
    );

    let groups: [(ImprovementKind, &str); 3] = [
        (ImprovementKind::Quantification, "Quantified Impact"),
        (ImprovementKind::SkillDescription, "Skill Descriptions"),
        (ImprovementKind::Phrasing, "Phrasing Upgrades"),
    ];

    for (kind, label) in groups {
        let members: Vec<&ResumeImprovement> =
            improvements.iter().filter(|i| i.kind == kind).collect();
        if members.is_empty() {
            continue;
        }
        out.push_str(&format!("\n### {label}\n"));
        for improvement in members {
            out.push_str(&format!(
                "- \"{}\" → \"{}\"\n",
                improvement.original, improvement.improved
            ));
        }
    }

    out
}

// ============================================================================
// TESTS
// ============================================================================
