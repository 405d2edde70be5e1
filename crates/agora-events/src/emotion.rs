//! Emotion Vectors
//!
//! Six bounded dimensions plus the baseline an agent drifts back toward.
//!
//! # Example
//!
//! ```
//! use agora_events::{Dimension, EmotionVector};
//!
//! let mut v = EmotionVector::default();
//! v.add(Dimension::Joy, 0.9);
//! assert_eq!(v.get(Dimension::Joy), 1.0);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One axis of the emotion vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Curiosity,
    Fatigue,
    Joy,
    Anxiety,
    Excitement,
    Frustration,
}

impl Dimension {
    /// Returns all dimensions in storage order.
    pub fn all() -> &'static [Dimension] {
        &[
            Dimension::Curiosity,
            Dimension::Fatigue,
            Dimension::Joy,
            Dimension::Anxiety,
            Dimension::Excitement,
            Dimension::Frustration,
        ]
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dimension::Curiosity => "curiosity",
            Dimension::Fatigue => "fatigue",
            Dimension::Joy => "joy",
            Dimension::Anxiety => "anxiety",
            Dimension::Excitement => "excitement",
            Dimension::Frustration => "frustration",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Dimension {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "curiosity" => Ok(Dimension::Curiosity),
            "fatigue" => Ok(Dimension::Fatigue),
            "joy" => Ok(Dimension::Joy),
            "anxiety" => Ok(Dimension::Anxiety),
            "excitement" => Ok(Dimension::Excitement),
            "frustration" => Ok(Dimension::Frustration),
            _ => Err(format!("unknown emotion dimension: '{}'", s)),
        }
    }
}

/// Six emotion scalars, each kept in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmotionVector {
    pub curiosity: f64,
    pub fatigue: f64,
    pub joy: f64,
    pub anxiety: f64,
    pub excitement: f64,
    pub frustration: f64,
}

impl Default for EmotionVector {
    fn default() -> Self {
        Self {
            curiosity: 0.5,
            fatigue: 0.0,
            joy: 0.5,
            anxiety: 0.2,
            excitement: 0.3,
            frustration: 0.1,
        }
    }
}

impl EmotionVector {
    /// Creates a vector with every dimension set to `value` (clamped).
    pub fn uniform(value: f64) -> Self {
        let v = clamp_unit(value);
        Self {
            curiosity: v,
            fatigue: v,
            joy: v,
            anxiety: v,
            excitement: v,
            frustration: v,
        }
    }

    pub fn get(&self, dim: Dimension) -> f64 {
        match dim {
            Dimension::Curiosity => self.curiosity,
            Dimension::Fatigue => self.fatigue,
            Dimension::Joy => self.joy,
            Dimension::Anxiety => self.anxiety,
            Dimension::Excitement => self.excitement,
            Dimension::Frustration => self.frustration,
        }
    }

    /// Sets a dimension, clamping into [0, 1].
    pub fn set(&mut self, dim: Dimension, value: f64) {
        let slot = match dim {
            Dimension::Curiosity => &mut self.curiosity,
            Dimension::Fatigue => &mut self.fatigue,
            Dimension::Joy => &mut self.joy,
            Dimension::Anxiety => &mut self.anxiety,
            Dimension::Excitement => &mut self.excitement,
            Dimension::Frustration => &mut self.frustration,
        };
        *slot = clamp_unit(value);
    }

    /// Adds a delta to a dimension, clamping into [0, 1].
    pub fn add(&mut self, dim: Dimension, delta: f64) {
        self.set(dim, self.get(dim) + delta);
    }

    /// Clamps every dimension into [0, 1]. NaN collapses to 0.
    pub fn clamp(&mut self) {
        for &dim in Dimension::all() {
            self.set(dim, self.get(dim));
        }
    }

    /// True when every dimension lies in [0, 1].
    pub fn is_bounded(&self) -> bool {
        Dimension::all()
            .iter()
            .all(|&d| (0.0..=1.0).contains(&self.get(d)))
    }

    /// Mean absolute difference across dimensions.
    pub fn mean_abs_diff(&self, other: &EmotionVector) -> f64 {
        let total: f64 = Dimension::all()
            .iter()
            .map(|&d| (self.get(d) - other.get(d)).abs())
            .sum();
        total / Dimension::all().len() as f64
    }

    /// True when all dimensions match within `tolerance`.
    pub fn approx_eq(&self, other: &EmotionVector, tolerance: f64) -> bool {
        Dimension::all()
            .iter()
            .all(|&d| (self.get(d) - other.get(d)).abs() <= tolerance)
    }
}

/// Current emotion, its slow-moving baseline, and the drift coefficient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionState {
    pub current: EmotionVector,
    pub baseline: EmotionVector,
    /// Fraction of the gap to the baseline closed each tick, in [0, 1].
    pub inertia: f64,
}

impl Default for EmotionState {
    fn default() -> Self {
        Self::new(EmotionVector::default(), 0.1)
    }
}

impl EmotionState {
    /// Creates a state whose baseline starts equal to the current vector.
    pub fn new(current: EmotionVector, inertia: f64) -> Self {
        let mut current = current;
        current.clamp();
        Self {
            current,
            baseline: current,
            inertia: clamp_unit(inertia),
        }
    }

    pub fn with_baseline(mut self, baseline: EmotionVector) -> Self {
        self.baseline = baseline;
        self.baseline.clamp();
        self
    }

    pub fn is_bounded(&self) -> bool {
        self.current.is_bounded() && self.baseline.is_bounded()
    }

    pub fn approx_eq(&self, other: &EmotionState, tolerance: f64) -> bool {
        self.current.approx_eq(&other.current, tolerance)
            && self.baseline.approx_eq(&other.baseline, tolerance)
            && (self.inertia - other.inertia).abs() <= tolerance
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
