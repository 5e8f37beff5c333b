// src/evaluator/score.rs — Six-dimension score breakdown

use serde::{Deserialize, Serialize};

/// The fixed scoring dimensions. Weights sum to 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    FunctionalCorrectness,
    Robustness,
    Readability,
    Conciseness,
    ComplexityControl,
    FormatCompliance,
}

impl Dimension {
    pub const ALL: [Dimension; 6] = [
        Dimension::FunctionalCorrectness,
        Dimension::Robustness,
        Dimension::Readability,
        Dimension::Conciseness,
        Dimension::ComplexityControl,
        Dimension::FormatCompliance,
    ];

    pub fn weight(&self) -> f64 {
        match self {
            Dimension::FunctionalCorrectness => 30.0,
            Dimension::Robustness => 20.0,
            Dimension::Readability => 15.0,
            Dimension::Conciseness => 15.0,
            Dimension::ComplexityControl => 10.0,
            Dimension::FormatCompliance => 10.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::FunctionalCorrectness => "functional_correctness",
            Dimension::Robustness => "robustness",
            Dimension::Readability => "readability",
            Dimension::Conciseness => "conciseness",
            Dimension::ComplexityControl => "complexity_control",
            Dimension::FormatCompliance => "format_compliance",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Dimension::ALL
            .into_iter()
            .find(|d| d.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Points earned per dimension, each in `0..=weight`. The total is the
/// 0–100 average score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    #[serde(default)]
    pub functional_correctness: f64,
    #[serde(default)]
    pub robustness: f64,
    #[serde(default)]
    pub readability: f64,
    #[serde(default)]
    pub conciseness: f64,
    #[serde(default)]
    pub complexity_control: f64,
    #[serde(default)]
    pub format_compliance: f64,
}

impl ScoreBreakdown {
    /// A breakdown where every dimension earns the same fraction of its weight.
    pub fn uniform(total: f64) -> Self {
        let mut b = Self::default();
        let fraction = (total / 100.0).clamp(0.0, 1.0);
        for dim in Dimension::ALL {
            b.set(dim, dim.weight() * fraction);
        }
        b
    }

    pub fn get(&self, dim: Dimension) -> f64 {
        match dim {
            Dimension::FunctionalCorrectness => self.functional_correctness,
            Dimension::Robustness => self.robustness,
            Dimension::Readability => self.readability,
            Dimension::Conciseness => self.conciseness,
            Dimension::ComplexityControl => self.complexity_control,
            Dimension::FormatCompliance => self.format_compliance,
        }
    }

    pub fn set(&mut self, dim: Dimension, value: f64) {
        let slot = match dim {
            Dimension::FunctionalCorrectness => &mut self.functional_correctness,
            Dimension::Robustness => &mut self.robustness,
            Dimension::Readability => &mut self.readability,
            Dimension::Conciseness => &mut self.conciseness,
            Dimension::ComplexityControl => &mut self.complexity_control,
            Dimension::FormatCompliance => &mut self.format_compliance,
        };
        *slot = value;
    }

    pub fn total(&self) -> f64 {
        Dimension::ALL.iter().map(|d| self.get(*d)).sum()
    }

    /// Fraction of the dimension's weight earned (0.0–1.0).
    pub fn ratio(&self, dim: Dimension) -> f64 {
        self.get(dim) / dim.weight()
    }

    /// Clamp every dimension into `0..=weight`.
    pub fn clamped(mut self) -> Self {
        for dim in Dimension::ALL {
            let v = self.get(dim);
            let v = if v.is_finite() { v } else { 0.0 };
            self.set(dim, v.clamp(0.0, dim.weight()));
        }
        self
    }

    /// Dimension with the lowest earned fraction. Ties go to the heavier weight.
    pub fn lowest_dimension(&self) -> Dimension {
        let mut lowest = Dimension::ALL[0];
        for dim in Dimension::ALL.into_iter().skip(1) {
            if self.ratio(dim) < self.ratio(lowest) {
                lowest = dim;
            }
        }
        lowest
    }

    /// Dimension with the highest earned fraction. Ties go to the heavier weight.
    pub fn strongest_dimension(&self) -> Dimension {
        let mut best = Dimension::ALL[0];
        for dim in Dimension::ALL.into_iter().skip(1) {
            if self.ratio(dim) > self.ratio(best) {
                best = dim;
            }
        }
        best
    }

    pub fn mean(items: &[&ScoreBreakdown]) -> Option<ScoreBreakdown> {
        if items.is_empty() {
            return None;
        }
        let n = items.len() as f64;
        let mut out = ScoreBreakdown::default();
        for dim in Dimension::ALL {
            out.set(dim, items.iter().map(|b| b.get(dim)).sum::<f64>() / n);
        }
        Some(out)
    }
}
