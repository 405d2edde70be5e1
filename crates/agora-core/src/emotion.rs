//! Emotion state engine.
//!
//! Every tick an agent's emotion first drifts toward its baseline by the
//! inertia coefficient, then absorbs the tick's events (content seen,
//! engagement received, provider errors). Each event adds a configured
//! delta; every dimension is clamped to [0, 1] after each step.

use agora_events::{BaselineShift, Dimension, EmotionState, EmotionVector, EngagementKind, Snippet};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Signed change to each emotion dimension.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmotionDelta {
    pub curiosity: f64,
    pub fatigue: f64,
    pub joy: f64,
    pub anxiety: f64,
    pub excitement: f64,
    pub frustration: f64,
}

impl EmotionDelta {
    pub fn apply(&self, vector: &mut EmotionVector) {
        vector.add(Dimension::Curiosity, self.curiosity);
        vector.add(Dimension::Fatigue, self.fatigue);
        vector.add(Dimension::Joy, self.joy);
        vector.add(Dimension::Anxiety, self.anxiety);
        vector.add(Dimension::Excitement, self.excitement);
        vector.add(Dimension::Frustration, self.frustration);
    }
}

/// Emotion tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmotionConfig {
    /// Inertia given to newly seeded agents
    pub inertia: f64,
    /// Applied once per tick when the agent saw any content
    pub perceive: EmotionDelta,
    /// Extra delta when the content included a high-signal item
    pub high_signal: EmotionDelta,
    pub like: EmotionDelta,
    pub reply: EmotionDelta,
    pub ignored: EmotionDelta,
    /// Applied when a provider failure forced a skip
    pub error: EmotionDelta,
}

impl Default for EmotionConfig {
    fn default() -> Self {
        Self {
            inertia: 0.1,
            perceive: EmotionDelta {
                curiosity: 0.06,
                fatigue: 0.02,
                ..Default::default()
            },
            high_signal: EmotionDelta {
                curiosity: 0.04,
                excitement: 0.03,
                ..Default::default()
            },
            like: EmotionDelta {
                joy: 0.08,
                excitement: 0.05,
                frustration: -0.04,
                anxiety: -0.02,
                ..Default::default()
            },
            reply: EmotionDelta {
                joy: 0.1,
                excitement: 0.08,
                frustration: -0.05,
                anxiety: -0.03,
                ..Default::default()
            },
            ignored: EmotionDelta {
                frustration: 0.06,
                anxiety: 0.04,
                ..Default::default()
            },
            error: EmotionDelta {
                frustration: 0.05,
                anxiety: 0.03,
                ..Default::default()
            },
        }
    }
}

/// Voice derived from the current emotion vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Critical,
    Enthusiastic,
    Cautious,
    Tired,
    Objective,
}

impl Tone {
    pub fn of(vector: &EmotionVector) -> Self {
        if vector.frustration > 0.6 {
            Tone::Critical
        } else if vector.joy > 0.6 || vector.excitement > 0.6 {
            Tone::Enthusiastic
        } else if vector.anxiety > 0.6 {
            Tone::Cautious
        } else if vector.fatigue > 0.7 {
            Tone::Tired
        } else {
            Tone::Objective
        }
    }

    /// One-line writing instruction for this tone.
    pub fn guidance(self) -> &'static str {
        match self {
            Tone::Critical => "critical and skeptical",
            Tone::Enthusiastic => "enthusiastic and warm",
            Tone::Cautious => "cautious and hedged",
            Tone::Tired => "tired and minimalist",
            Tone::Objective => "objective and concise",
        }
    }
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tone::Critical => "critical",
            Tone::Enthusiastic => "enthusiastic",
            Tone::Cautious => "cautious",
            Tone::Tired => "tired",
            Tone::Objective => "objective",
        };
        write!(f, "{}", name)
    }
}

/// Sampling temperature in [0.1, 1.0]: livelier when curious or
/// excited, flatter when tired.
pub fn temperature(vector: &EmotionVector) -> f64 {
    let t = 0.5 + 0.4 * vector.curiosity + 0.2 * vector.excitement - 0.3 * vector.fatigue;
    t.clamp(0.1, 1.0)
}

#[derive(Debug, Clone, Default)]
pub struct EmotionEngine {
    config: EmotionConfig,
}

impl EmotionEngine {
    pub fn new(config: EmotionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EmotionConfig {
        &self.config
    }

    /// Moves `current` toward `baseline` by the state's inertia.
    pub fn drift(&self, state: &mut EmotionState) {
        let inertia = state.inertia.clamp(0.0, 1.0);
        for &dim in Dimension::all() {
            let current = state.current.get(dim);
            let target = state.baseline.get(dim);
            state.current.set(dim, current + inertia * (target - current));
        }
    }

    /// Reacts to the content seen this tick. Nothing seen, no change.
    pub fn perceive(&self, state: &mut EmotionState, content: &[Snippet]) {
        if content.is_empty() {
            return;
        }
        self.config.perceive.apply(&mut state.current);
        if content.iter().any(Snippet::is_high_signal) {
            self.config.high_signal.apply(&mut state.current);
        }
    }

    pub fn engage(&self, state: &mut EmotionState, kind: EngagementKind) {
        let delta = match kind {
            EngagementKind::Like => &self.config.like,
            EngagementKind::Reply => &self.config.reply,
            EngagementKind::Ignored => &self.config.ignored,
        };
        delta.apply(&mut state.current);
    }

    pub fn record_error(&self, state: &mut EmotionState) {
        self.config.error.apply(&mut state.current);
    }

    /// One tick's update: drift first, then events in arrival order.
    pub fn tick(&self, state: &mut EmotionState, content: &[Snippet], engagement: &[EngagementKind]) {
        self.drift(state);
        self.perceive(state, content);
        for &kind in engagement {
            self.engage(state, kind);
        }
    }

    /// Nudges the baseline by `magnitude` in the direction of `shift`.
    pub fn nudge_baseline(&self, state: &mut EmotionState, shift: BaselineShift, magnitude: f64) {
        let baseline = &mut state.baseline;
        match shift {
            BaselineShift::MorePositive => {
                baseline.add(Dimension::Joy, magnitude);
                baseline.add(Dimension::Frustration, -magnitude);
            }
            BaselineShift::MoreCalm => {
                baseline.add(Dimension::Anxiety, -magnitude);
                baseline.add(Dimension::Excitement, -magnitude);
            }
            BaselineShift::MoreDominant => {
                baseline.add(Dimension::Curiosity, magnitude);
                baseline.add(Dimension::Anxiety, -magnitude);
            }
            BaselineShift::None => {}
        }
    }
}
