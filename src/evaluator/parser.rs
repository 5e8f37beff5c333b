// src/evaluator/parser.rs — Parse evaluator output into a structured outcome

use std::collections::HashMap;

use serde::Deserialize;

use super::score::{Dimension, ScoreBreakdown};
use super::EvaluationOutcome;
use crate::infra::errors::EvaluatorError;
use crate::util::truncate_str;

#[derive(Debug, Deserialize)]
struct RawOutput {
    #[serde(default)]
    avg_score: Option<f64>,
    #[serde(default)]
    score_breakdown: Option<HashMap<String, f64>>,
    #[serde(default)]
    completed_cases: Option<u32>,
    #[serde(default)]
    failed_cases: Option<u32>,
}

/// Parse evaluator stdout into an outcome.
///
/// Expected shape:
/// ```text
/// {"avg_score": 82.5,
///  "score_breakdown": {"functional_correctness": 26, "robustness": 17, ...},
///  "completed_cases": 4, "failed_cases": 0}
/// ```
/// Prose or markdown fences around the object are tolerated. A missing
/// `avg_score` is recomputed from the breakdown; a missing breakdown is spread
/// uniformly over the dimensions.
pub fn parse_evaluator_output(
    output: &str,
    expected_cases: usize,
) -> Result<EvaluationOutcome, EvaluatorError> {
    let json = extract_json_object(output).ok_or_else(|| {
        EvaluatorError::OutputParseFailed(format!(
            "no JSON object in output: {}",
            truncate_str(output.trim(), 200)
        ))
    })?;

    let raw: RawOutput = serde_json::from_str(json)
        .map_err(|e| EvaluatorError::OutputParseFailed(format!("invalid JSON: {e}")))?;

    let breakdown = raw.score_breakdown.as_ref().map(breakdown_from_map);

    let (avg_score, score_breakdown) = match (raw.avg_score, breakdown) {
        (Some(avg), Some(b)) => (avg, b),
        (Some(avg), None) => (avg, ScoreBreakdown::uniform(avg)),
        (None, Some(b)) => (b.total(), b),
        (None, None) => {
            return Err(EvaluatorError::OutputParseFailed(
                "output has neither avg_score nor score_breakdown".into(),
            ))
        }
    };

    if !avg_score.is_finite() {
        return Err(EvaluatorError::OutputParseFailed(format!(
            "avg_score is not a number: {avg_score}"
        )));
    }

    let failed_cases = raw.failed_cases.unwrap_or(0);
    let completed_cases = raw
        .completed_cases
        .unwrap_or_else(|| (expected_cases as u32).saturating_sub(failed_cases));

    Ok(EvaluationOutcome {
        avg_score: avg_score.clamp(0.0, 100.0),
        score_breakdown,
        completed_cases,
        failed_cases,
    })
}

fn breakdown_from_map(map: &HashMap<String, f64>) -> ScoreBreakdown {
    let mut b = ScoreBreakdown::default();
    for (key, value) in map {
        match Dimension::parse(key) {
            Some(dim) => b.set(dim, *value),
            None => tracing::debug!(dimension = %key, "Ignoring unknown score dimension"),
        }
    }
    b.clamped()
}

/// Slice out the outermost `{ ... }` of the first JSON object in `text`.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
