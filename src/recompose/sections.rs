// src/recompose/sections.rs — Built-in markdown section recomposer
//
// Splits a skill into heading-delimited sections and edits that list:
// sections are appended, replaced by advantage segments or dropped.
// Retained headings and the preamble before the first heading are never
// touched. Output is deterministic for a given seed, round and variant.

use std::collections::BTreeMap;

use async_trait::async_trait;
use pulldown_cmark::{Event, Parser, Tag, TagEnd};

use super::{RecomposeRequest, Recomposer, RetentionRules};
use crate::core::types::StrategyTag;
use crate::evaluator::score::Dimension;
use crate::project::AdvantageSegment;

/// One heading-delimited slice of a markdown document.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    /// `None` for the preamble before the first heading.
    pub heading: Option<String>,
    pub level: usize,
    pub text: String,
}

/// Split markdown at every heading, keeping the original text of each slice.
pub fn split_sections(markdown: &str) -> Vec<Section> {
    let mut headings: Vec<(usize, usize, String)> = Vec::new();
    let mut open: Option<(usize, usize, String)> = None;

    for (event, range) in Parser::new(markdown).into_offset_iter() {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                open = Some((range.start, level as usize, String::new()));
            }
            Event::Text(text) | Event::Code(text) => {
                if let Some((_, _, title)) = open.as_mut() {
                    title.push_str(&text);
                }
            }
            Event::End(TagEnd::Heading(_)) => {
                if let Some(heading) = open.take() {
                    headings.push(heading);
                }
            }
            _ => {}
        }
    }

    let mut sections = Vec::with_capacity(headings.len() + 1);
    let first = headings.first().map(|h| h.0).unwrap_or(markdown.len());
    if !markdown[..first].trim().is_empty() {
        sections.push(Section {
            heading: None,
            level: 0,
            text: markdown[..first].to_string(),
        });
    }
    for (i, (start, level, title)) in headings.iter().enumerate() {
        let end = headings.get(i + 1).map(|h| h.0).unwrap_or(markdown.len());
        sections.push(Section {
            heading: Some(title.trim().to_string()),
            level: *level,
            text: markdown[*start..end].to_string(),
        });
    }
    sections
}

/// Fallback instruction injected when no segment targets a dimension.
fn guidance(dim: Dimension) -> (&'static str, &'static str) {
    match dim {
        Dimension::FunctionalCorrectness => (
            "Correctness Check",
            "Before answering, verify the result against every requirement in the input.",
        ),
        Dimension::Robustness => (
            "Edge Cases",
            "Handle empty, malformed and boundary inputs explicitly instead of guessing.",
        ),
        Dimension::Readability => (
            "Clarity",
            "Prefer short sentences, descriptive names and a logical ordering of steps.",
        ),
        Dimension::Conciseness => (
            "Brevity",
            "Omit restatements of the task and any content the user did not ask for.",
        ),
        Dimension::ComplexityControl => (
            "Simplicity",
            "Choose the simplest approach that satisfies the requirements.",
        ),
        Dimension::FormatCompliance => (
            "Output Format",
            "Follow the requested output format exactly, with no extra wrapping text.",
        ),
    }
}

/// SplitMix64: small, seedable, good enough for sampling sections.
struct SplitMix64(u64);

impl SplitMix64 {
    fn next_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Uniform index in `0..n`. `n` must be non-zero.
    fn below(&mut self, n: usize) -> usize {
        (self.next_u64() % n as u64) as usize
    }

    fn coin(&mut self) -> bool {
        self.next_u64() & 1 == 1
    }
}

fn random_seed() -> u64 {
    let mut buf = [0u8; 8];
    match getrandom::getrandom(&mut buf) {
        Ok(()) => u64::from_le_bytes(buf),
        Err(e) => {
            tracing::warn!("OS randomness unavailable, seeding from clock: {}", e);
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64
        }
    }
}

/// Mutable section list with retention and change-budget enforcement.
struct Draft<'a> {
    sections: Vec<Section>,
    retention: &'a RetentionRules,
    changes: usize,
    body_level: usize,
}

impl<'a> Draft<'a> {
    fn new(content: &str, retention: &'a RetentionRules) -> Self {
        let sections = split_sections(content);
        let body_level = sections
            .iter()
            .filter(|s| s.heading.is_some() && s.level > 1)
            .map(|s| s.level)
            .min()
            .unwrap_or(2);
        Self {
            sections,
            retention,
            changes: 0,
            body_level,
        }
    }

    fn can_change(&self) -> bool {
        self.changes < self.retention.change_budget()
    }

    fn position(&self, heading: &str) -> Option<usize> {
        self.sections.iter().position(|s| {
            s.heading
                .as_deref()
                .is_some_and(|h| h.eq_ignore_ascii_case(heading.trim()))
        })
    }

    fn replaceable(&self, heading: &str) -> bool {
        self.position(heading).is_some() && !self.retention.retains(heading)
    }

    /// Indices of sections that may be dropped.
    fn removable(&self) -> Vec<usize> {
        self.sections
            .iter()
            .enumerate()
            .filter(|(_, s)| {
                s.heading
                    .as_deref()
                    .is_some_and(|h| !self.retention.retains(h))
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// Replace the section with the same heading, or append a new one.
    fn upsert(&mut self, heading: &str, body: &str) -> bool {
        if !self.can_change() || self.retention.retains(heading) {
            return false;
        }
        let section = Section {
            heading: Some(heading.trim().to_string()),
            level: self.body_level,
            text: format!(
                "{} {}\n\n{}\n",
                "#".repeat(self.body_level),
                heading.trim(),
                body.trim()
            ),
        };
        match self.position(heading) {
            Some(i) => self.sections[i] = section,
            None => self.sections.push(section),
        }
        self.changes += 1;
        true
    }

    fn upsert_segment(&mut self, segment: &AdvantageSegment) -> bool {
        self.upsert(&segment.heading, &segment.content)
    }

    fn upsert_guidance(&mut self, dim: Dimension) -> bool {
        let (heading, body) = guidance(dim);
        self.upsert(heading, body)
    }

    fn remove(&mut self, index: usize) -> bool {
        if !self.can_change() || !self.removable().contains(&index) {
            return false;
        }
        self.sections.remove(index);
        self.changes += 1;
        true
    }

    fn render(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            out.push_str(section.text.trim_end());
            out.push_str("\n\n");
        }
        let trimmed = out.trim_end().len();
        out.truncate(trimmed);
        out.push('\n');
        out
    }
}

/// Segments for `dim`, highest gain first.
fn ranked_for<'s>(segments: &'s [AdvantageSegment], dim: Dimension) -> Vec<&'s AdvantageSegment> {
    let mut pool: Vec<&AdvantageSegment> =
        segments.iter().filter(|s| s.dimension == dim).collect();
    pool.sort_by(|a, b| b.gain.total_cmp(&a.gain));
    pool
}

/// Deterministic recomposer working on markdown sections.
pub struct SectionRecomposer {
    seed: u64,
}

impl SectionRecomposer {
    /// Seeded from the OS when `seed` is `None`.
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            seed: seed.unwrap_or_else(random_seed),
        }
    }

    pub fn recompose(&self, request: &RecomposeRequest<'_>) -> String {
        let mut rng = SplitMix64(
            self.seed ^ ((request.round as u64) << 32) ^ request.variant as u64,
        );
        let mut draft = Draft::new(&request.base.content, request.retention);
        let segments = request.segments;
        let variant = request.variant;

        match request.strategy {
            StrategyTag::Greedy => {
                let dim = request
                    .breakdown
                    .map(|b| b.strongest_dimension())
                    .unwrap_or(Dimension::FunctionalCorrectness);
                let mut pool = ranked_for(segments, dim);
                if pool.is_empty() {
                    pool = segments.iter().collect();
                    pool.sort_by(|a, b| b.gain.total_cmp(&a.gain));
                }
                let applied = match pool.get(variant % pool.len().max(1)) {
                    Some(seg) => draft.upsert_segment(seg),
                    None => false,
                };
                if !applied {
                    draft.upsert_guidance(dim);
                }
            }
            StrategyTag::DimensionFocus => {
                Self::focus(&mut draft, request, variant);
            }
            StrategyTag::SegmentExplore => {
                let mut alternates: Vec<&AdvantageSegment> = segments
                    .iter()
                    .filter(|s| draft.replaceable(&s.heading))
                    .collect();
                if alternates.is_empty() {
                    alternates = segments
                        .iter()
                        .filter(|s| !request.retention.retains(&s.heading))
                        .collect();
                }
                if alternates.is_empty() {
                    Self::focus(&mut draft, request, variant);
                } else {
                    let pick = alternates[rng.below(alternates.len())];
                    draft.upsert_segment(pick);
                }
            }
            StrategyTag::CrossPollinate => {
                let mut by_source: BTreeMap<&str, Vec<&AdvantageSegment>> = BTreeMap::new();
                for seg in segments {
                    by_source.entry(seg.source_skill.as_str()).or_default().push(seg);
                }
                let mut applied = 0;
                for (_, mut pool) in by_source.into_iter().take(3) {
                    pool.sort_by(|a, b| b.gain.total_cmp(&a.gain));
                    if draft.upsert_segment(pool[variant % pool.len()]) {
                        applied += 1;
                    }
                }
                if applied == 0 {
                    Self::random_subset(&mut draft, segments, &mut rng);
                }
            }
            StrategyTag::RandomSubset => {
                Self::random_subset(&mut draft, segments, &mut rng);
            }
        }

        draft.render()
    }

    /// Target the lowest-scoring dimension.
    fn focus(draft: &mut Draft<'_>, request: &RecomposeRequest<'_>, variant: usize) {
        let dim = request
            .breakdown
            .map(|b| b.lowest_dimension())
            .unwrap_or(Dimension::ALL[variant % Dimension::ALL.len()]);
        let pool = ranked_for(request.segments, dim);
        let applied = match pool.get(variant % pool.len().max(1)) {
            Some(seg) => draft.upsert_segment(seg),
            None => false,
        };
        if !applied {
            draft.upsert_guidance(dim);
        }
    }

    fn random_subset(draft: &mut Draft<'_>, segments: &[AdvantageSegment], rng: &mut SplitMix64) {
        let removable = draft.removable();
        if removable.len() >= 2 && rng.coin() {
            let victim = removable[rng.below(removable.len())];
            draft.remove(victim);
        }

        let mut added = false;
        for seg in segments {
            if rng.coin() {
                added |= draft.upsert_segment(seg);
            }
        }
        if !added && !segments.is_empty() {
            added = draft.upsert_segment(&segments[rng.below(segments.len())]);
        }
        if !added && draft.changes == 0 {
            let dim = Dimension::ALL[rng.below(Dimension::ALL.len())];
            draft.upsert_guidance(dim);
        }
    }
}

#[async_trait]
impl Recomposer for SectionRecomposer {
    async fn generate(&self, request: &RecomposeRequest<'_>) -> anyhow::Result<String> {
        Ok(self.recompose(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::score::ScoreBreakdown;
    use crate::project::{SkillDocument, SkillRef};

    const BASE: &str = "Intro line.\n\n# Summarizer\n\n## Steps\n\nRead then write.\n\n## Output Format\n\nPlain text.\n";

    fn doc() -> SkillDocument {
        SkillDocument {
            skill_ref: SkillRef::new("seed"),
            name: "seed".into(),
            content: BASE.into(),
            last_score: None,
        }
    }

    fn segment(source: &str, dim: Dimension, heading: &str, gain: f64) -> AdvantageSegment {
        AdvantageSegment {
            source_skill: SkillRef::new(source),
            dimension: dim,
            heading: heading.into(),
            content: format!("Content for {heading}."),
            gain,
        }
    }

    fn request<'a>(
        base: &'a SkillDocument,
        strategy: StrategyTag,
        retention: &'a RetentionRules,
        breakdown: Option<&'a ScoreBreakdown>,
        segments: &'a [AdvantageSegment],
    ) -> RecomposeRequest<'a> {
        RecomposeRequest {
            base,
            strategy,
            retention,
            breakdown,
            segments,
            round: 1,
            variant: 0,
        }
    }

    // ─── Splitting ──────────────────────────────────────────────

    #[test]
    fn test_split_sections() {
        let sections = split_sections(BASE);
        assert_eq!(sections.len(), 4);
        assert_eq!(sections[0].heading, None);
        assert_eq!(sections[1].heading.as_deref(), Some("Summarizer"));
        assert_eq!(sections[1].level, 1);
        assert_eq!(sections[2].heading.as_deref(), Some("Steps"));
        assert!(sections[2].text.contains("Read then write."));
        assert_eq!(sections[3].level, 2);
    }

    #[test]
    fn test_split_without_headings() {
        let sections = split_sections("just text\n");
        assert_eq!(sections.len(), 1);
        assert!(sections[0].heading.is_none());
        assert!(split_sections("").is_empty());
    }

    // ─── Strategies ─────────────────────────────────────────────

    #[test]
    fn test_greedy_without_segments_adds_guidance() {
        let base = doc();
        let rules = RetentionRules::default();
        let out = SectionRecomposer::new(Some(1))
            .recompose(&request(&base, StrategyTag::Greedy, &rules, None, &[]));
        assert!(out.starts_with("Intro line."));
        assert!(out.contains("## Correctness Check"));
        assert!(out.contains("## Steps"));
    }

    #[test]
    fn test_dimension_focus_targets_lowest_dimension() {
        let base = doc();
        let rules = RetentionRules::default();
        let mut breakdown = ScoreBreakdown::uniform(80.0);
        breakdown.set(Dimension::Robustness, 2.0);
        let segments = vec![
            segment("a", Dimension::Readability, "Style", 5.0),
            segment("b", Dimension::Robustness, "Edge Handling", 1.0),
            segment("c", Dimension::Robustness, "Input Validation", 4.0),
        ];
        let out = SectionRecomposer::new(Some(1)).recompose(&request(
            &base,
            StrategyTag::DimensionFocus,
            &rules,
            Some(&breakdown),
            &segments,
        ));
        assert!(out.contains("## Input Validation"));
        assert!(!out.contains("## Style"));
    }

    #[test]
    fn test_retained_section_is_never_replaced() {
        let base = doc();
        let rules = RetentionRules {
            keep_sections: vec!["Output Format".into()],
            max_changes: None,
        };
        let segments = vec![segment("a", Dimension::FormatCompliance, "Output Format", 9.0)];
        let out = SectionRecomposer::new(Some(7)).recompose(&request(
            &base,
            StrategyTag::SegmentExplore,
            &rules,
            None,
            &segments,
        ));
        assert!(out.contains("Plain text."));
        assert!(!out.contains("Content for Output Format."));
    }

    #[test]
    fn test_segment_explore_substitutes_existing_section() {
        let base = doc();
        let rules = RetentionRules::default();
        let segments = vec![segment("a", Dimension::Readability, "Steps", 2.0)];
        let out = SectionRecomposer::new(Some(3)).recompose(&request(
            &base,
            StrategyTag::SegmentExplore,
            &rules,
            None,
            &segments,
        ));
        assert!(out.contains("Content for Steps."));
        assert!(!out.contains("Read then write."));
        assert_eq!(out.matches("## Steps").count(), 1);
    }

    #[test]
    fn test_cross_pollinate_blends_sources() {
        let base = doc();
        let rules = RetentionRules::default();
        let segments = vec![
            segment("alpha", Dimension::Robustness, "Guards", 3.0),
            segment("beta", Dimension::Conciseness, "Trim", 2.0),
        ];
        let out = SectionRecomposer::new(Some(5)).recompose(&request(
            &base,
            StrategyTag::CrossPollinate,
            &rules,
            None,
            &segments,
        ));
        assert!(out.contains("## Guards"));
        assert!(out.contains("## Trim"));
    }

    #[test]
    fn test_change_budget_limits_edits() {
        let base = doc();
        let rules = RetentionRules {
            keep_sections: vec![],
            max_changes: Some(1),
        };
        let segments = vec![
            segment("alpha", Dimension::Robustness, "Guards", 3.0),
            segment("beta", Dimension::Conciseness, "Trim", 2.0),
        ];
        let out = SectionRecomposer::new(Some(5)).recompose(&request(
            &base,
            StrategyTag::CrossPollinate,
            &rules,
            None,
            &segments,
        ));
        assert!(out.contains("## Guards"));
        assert!(!out.contains("## Trim"));
    }

    #[test]
    fn test_random_subset_is_seed_deterministic() {
        let base = doc();
        let rules = RetentionRules::default();
        let segments = vec![
            segment("a", Dimension::Robustness, "Guards", 3.0),
            segment("b", Dimension::Conciseness, "Trim", 2.0),
            segment("c", Dimension::Readability, "Tone", 1.0),
        ];
        let req = request(&base, StrategyTag::RandomSubset, &rules, None, &segments);
        let first = SectionRecomposer::new(Some(99)).recompose(&req);
        let second = SectionRecomposer::new(Some(99)).recompose(&req);
        assert_eq!(first, second);
        assert_ne!(first, BASE);
        assert!(first.starts_with("Intro line."));
    }

    #[tokio::test]
    async fn test_generate_via_trait() {
        let base = doc();
        let rules = RetentionRules::default();
        let recomposer: &dyn Recomposer = &SectionRecomposer::new(Some(2));
        let out = recomposer
            .generate(&request(&base, StrategyTag::RandomSubset, &rules, None, &[]))
            .await
            .unwrap();
        assert!(!out.trim().is_empty());
    }
}
