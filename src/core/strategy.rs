// src/core/strategy.rs — Strategy selection
//
// Pure functions from (mode, plateau level, available segments) to the
// strategy tag(s) used for a round. Escalation always changes strategy:
// levels 1..=3 never map to GREEDY outside standard mode.

use serde::{Deserialize, Serialize};

use super::types::{IterationMode, StrategyTag, MAX_PLATEAU_LEVEL};
use crate::project::AdvantageSegment;

/// Exploratory tags in escalation order. RANDOM_SUBSET is the last resort.
pub const ESCALATION_LADDER: [StrategyTag; 4] = [
    StrategyTag::DimensionFocus,
    StrategyTag::SegmentExplore,
    StrategyTag::CrossPollinate,
    StrategyTag::RandomSubset,
];

/// Plateau level → strategy mapping for non-standard modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyTable {
    pub level1: StrategyTag,
    pub level2: StrategyTag,
    pub level3: StrategyTag,
}

impl Default for StrategyTable {
    fn default() -> Self {
        Self {
            level1: StrategyTag::DimensionFocus,
            level2: StrategyTag::SegmentExplore,
            level3: StrategyTag::CrossPollinate,
        }
    }
}

impl StrategyTable {
    pub fn tag_for(&self, plateau_level: u8) -> StrategyTag {
        match plateau_level.min(MAX_PLATEAU_LEVEL) {
            0 => StrategyTag::Greedy,
            1 => self.level1,
            2 => self.level2,
            _ => self.level3,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for (level, tag) in [(1, self.level1), (2, self.level2), (3, self.level3)] {
            if tag == StrategyTag::Greedy {
                anyhow::bail!("strategy.level{level} must not be GREEDY");
            }
        }
        Ok(())
    }
}

/// What the analysis step has to offer the recomposer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AvailableSegments {
    pub total: usize,
    pub source_skills: usize,
}

impl AvailableSegments {
    pub fn from_segments(segments: &[AdvantageSegment]) -> Self {
        let mut sources: Vec<&str> = segments.iter().map(|s| s.source_skill.as_str()).collect();
        sources.sort_unstable();
        sources.dedup();
        Self {
            total: segments.len(),
            source_skills: sources.len(),
        }
    }
}

/// Swap segment-based tags for ones that can run without segments.
pub fn degrade(tag: StrategyTag, available: AvailableSegments) -> StrategyTag {
    match tag {
        StrategyTag::SegmentExplore if available.total == 0 => StrategyTag::DimensionFocus,
        StrategyTag::CrossPollinate if available.source_skills < 2 => StrategyTag::RandomSubset,
        other => other,
    }
}

/// The round's strategy.
pub fn select(
    table: &StrategyTable,
    mode: IterationMode,
    plateau_level: u8,
    available: AvailableSegments,
) -> StrategyTag {
    if mode == IterationMode::Standard || plateau_level == 0 {
        return StrategyTag::Greedy;
    }
    degrade(table.tag_for(plateau_level), available)
}

/// Standard mode never diversifies.
pub fn effective_beam_width(mode: IterationMode, beam_width: usize) -> usize {
    match mode {
        IterationMode::Standard => 1,
        _ => beam_width.max(1),
    }
}

/// One strategy per beam slot. The first slot always carries the round's
/// strategy; adaptive mode fans the rest out along the ladder.
pub fn plan_beam(
    table: &StrategyTable,
    mode: IterationMode,
    plateau_level: u8,
    available: AvailableSegments,
    beam_width: usize,
) -> Vec<StrategyTag> {
    let width = effective_beam_width(mode, beam_width);
    let primary = select(table, mode, plateau_level, available);

    match mode {
        IterationMode::Standard | IterationMode::Explore => vec![primary; width],
        IterationMode::Adaptive => {
            let start = ESCALATION_LADDER
                .iter()
                .position(|t| *t == primary)
                .map(|p| p + 1)
                .unwrap_or(0);
            let mut plan = Vec::with_capacity(width);
            plan.push(primary);
            for i in 0..width.saturating_sub(1) {
                let tag = ESCALATION_LADDER[(start + i) % ESCALATION_LADDER.len()];
                plan.push(degrade(tag, available));
            }
            plan
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::score::Dimension;
    use crate::project::SkillRef;

    const RICH: AvailableSegments = AvailableSegments {
        total: 6,
        source_skills: 3,
    };
    const NONE: AvailableSegments = AvailableSegments {
        total: 0,
        source_skills: 0,
    };

    // ─── select ─────────────────────────────────────────────────

    #[test]
    fn test_standard_is_always_greedy() {
        let table = StrategyTable::default();
        for level in 0..=MAX_PLATEAU_LEVEL {
            assert_eq!(
                select(&table, IterationMode::Standard, level, RICH),
                StrategyTag::Greedy
            );
        }
    }

    #[test]
    fn test_level_zero_is_greedy() {
        let table = StrategyTable::default();
        assert_eq!(select(&table, IterationMode::Explore, 0, RICH), StrategyTag::Greedy);
        assert_eq!(select(&table, IterationMode::Adaptive, 0, NONE), StrategyTag::Greedy);
    }

    #[test]
    fn test_escalation_never_greedy() {
        let table = StrategyTable::default();
        let availability = [
            RICH,
            NONE,
            AvailableSegments {
                total: 2,
                source_skills: 1,
            },
        ];
        for mode in [IterationMode::Explore, IterationMode::Adaptive] {
            for level in 1..=5u8 {
                for available in availability {
                    assert_ne!(select(&table, mode, level, available), StrategyTag::Greedy);
                    for tag in plan_beam(&table, mode, level, available, 4) {
                        assert_ne!(tag, StrategyTag::Greedy, "mode {mode} level {level}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_default_table_escalates() {
        let table = StrategyTable::default();
        assert_eq!(select(&table, IterationMode::Explore, 1, RICH), StrategyTag::DimensionFocus);
        assert_eq!(select(&table, IterationMode::Explore, 2, RICH), StrategyTag::SegmentExplore);
        assert_eq!(select(&table, IterationMode::Explore, 3, RICH), StrategyTag::CrossPollinate);
        assert_eq!(select(&table, IterationMode::Explore, 9, RICH), StrategyTag::CrossPollinate);
    }

    #[test]
    fn test_degradation_without_segments() {
        let table = StrategyTable::default();
        assert_eq!(select(&table, IterationMode::Explore, 2, NONE), StrategyTag::DimensionFocus);
        assert_eq!(select(&table, IterationMode::Explore, 3, NONE), StrategyTag::RandomSubset);
        let single_source = AvailableSegments {
            total: 3,
            source_skills: 1,
        };
        assert_eq!(
            select(&table, IterationMode::Explore, 3, single_source),
            StrategyTag::RandomSubset
        );
        assert_eq!(
            select(&table, IterationMode::Explore, 2, single_source),
            StrategyTag::SegmentExplore
        );
    }

    // ─── Beam planning ──────────────────────────────────────────

    #[test]
    fn test_standard_beam_is_single() {
        let plan = plan_beam(&StrategyTable::default(), IterationMode::Standard, 2, RICH, 5);
        assert_eq!(plan, vec![StrategyTag::Greedy]);
    }

    #[test]
    fn test_explore_beam_repeats_primary() {
        let plan = plan_beam(&StrategyTable::default(), IterationMode::Explore, 1, RICH, 3);
        assert_eq!(plan, vec![StrategyTag::DimensionFocus; 3]);
    }

    #[test]
    fn test_adaptive_beam_fans_out() {
        let plan = plan_beam(&StrategyTable::default(), IterationMode::Adaptive, 1, RICH, 4);
        assert_eq!(
            plan,
            vec![
                StrategyTag::DimensionFocus,
                StrategyTag::SegmentExplore,
                StrategyTag::CrossPollinate,
                StrategyTag::RandomSubset,
            ]
        );

        let at_rest = plan_beam(&StrategyTable::default(), IterationMode::Adaptive, 0, RICH, 2);
        assert_eq!(at_rest, vec![StrategyTag::Greedy, StrategyTag::DimensionFocus]);
    }

    #[test]
    fn test_zero_beam_width_is_one() {
        assert_eq!(effective_beam_width(IterationMode::Explore, 0), 1);
    }

    // ─── Table ──────────────────────────────────────────────────

    #[test]
    fn test_table_validation() {
        assert!(StrategyTable::default().validate().is_ok());
        let bad = StrategyTable {
            level3: StrategyTag::Greedy,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_available_segments_counts_sources() {
        let seg = |source: &str| AdvantageSegment {
            source_skill: SkillRef::new(source),
            dimension: Dimension::Robustness,
            heading: "h".into(),
            content: "c".into(),
            gain: 0.0,
        };
        let available = AvailableSegments::from_segments(&[seg("a"), seg("b"), seg("a")]);
        assert_eq!(available.total, 3);
        assert_eq!(available.source_skills, 2);
    }
}
