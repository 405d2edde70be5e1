//! Decision policy.
//!
//! Turns an agent's emotion, its quota and the critic's verdict into
//! commit-or-skip. Each attempt walks a small state machine:
//!
//! ```text
//! Idle -> Evaluating -> Acting  -> Idle
//!                    -> Skipped -> Idle
//! ```
//!
//! Skipping is a normal outcome. A rejected draft simply re-enters
//! evaluation on the agent's next tick.

use agora_events::{ActionKind, AgentId, EmotionVector, QuotaCounter};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::critic::{RejectReason, Verdict};

/// Decision configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    /// Desire below this skips the tick
    pub activation_threshold: f64,
    /// Amplitude of the seeded desire jitter; 0 disables
    pub desire_jitter: f64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            activation_threshold: 0.3,
            desire_jitter: 0.05,
        }
    }
}

/// Why an attempt ended without publishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    LowDesire,
    QuotaExhausted,
    /// A comment was chosen but there was nothing to reply to.
    NoTarget,
    /// Every draft call failed.
    ProviderFailure,
    BelowThreshold,
    NoValidDraft,
    /// The quota was spent concurrently between check and commit.
    QuotaRace,
}

impl SkipReason {
    /// Skips caused by a failed call rather than by policy.
    pub fn is_failure(self) -> bool {
        matches!(self, SkipReason::ProviderFailure)
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SkipReason::LowDesire => "low_desire",
            SkipReason::QuotaExhausted => "quota_exhausted",
            SkipReason::NoTarget => "no_target",
            SkipReason::ProviderFailure => "provider_failure",
            SkipReason::BelowThreshold => "below_threshold",
            SkipReason::NoValidDraft => "no_valid_draft",
            SkipReason::QuotaRace => "quota_race",
        };
        write!(f, "{}", name)
    }
}

impl From<RejectReason> for SkipReason {
    fn from(reason: RejectReason) -> Self {
        match reason {
            RejectReason::BelowThreshold => SkipReason::BelowThreshold,
            RejectReason::NoValidDraft => SkipReason::NoValidDraft,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "reason")]
pub enum DecisionState {
    Idle,
    Evaluating,
    Acting,
    Skipped(SkipReason),
}

impl fmt::Display for DecisionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionState::Idle => write!(f, "idle"),
            DecisionState::Evaluating => write!(f, "evaluating"),
            DecisionState::Acting => write!(f, "acting"),
            DecisionState::Skipped(reason) => write!(f, "skipped({})", reason),
        }
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("illegal decision transition {from} -> {to}")]
pub struct TransitionError {
    pub from: DecisionState,
    pub to: DecisionState,
}

/// One agent's decision state machine.
#[derive(Debug, Clone)]
pub struct DecisionMachine {
    state: DecisionState,
    /// Terminal state of the last completed attempt.
    last_outcome: Option<DecisionState>,
}

impl Default for DecisionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionMachine {
    pub fn new() -> Self {
        Self {
            state: DecisionState::Idle,
            last_outcome: None,
        }
    }

    pub fn state(&self) -> DecisionState {
        self.state
    }

    pub fn last_outcome(&self) -> Option<DecisionState> {
        self.last_outcome
    }

    fn transition(&mut self, to: DecisionState) -> Result<(), TransitionError> {
        let legal = matches!(
            (self.state, to),
            (DecisionState::Idle, DecisionState::Evaluating)
                | (DecisionState::Evaluating, DecisionState::Acting)
                | (DecisionState::Evaluating, DecisionState::Skipped(_))
                | (DecisionState::Acting, DecisionState::Idle)
                | (DecisionState::Skipped(_), DecisionState::Idle)
        );
        if !legal {
            return Err(TransitionError {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    pub fn begin(&mut self) -> Result<(), TransitionError> {
        self.transition(DecisionState::Evaluating)
    }

    pub fn act(&mut self) -> Result<(), TransitionError> {
        self.transition(DecisionState::Acting)
    }

    pub fn skip(&mut self, reason: SkipReason) -> Result<(), TransitionError> {
        self.transition(DecisionState::Skipped(reason))
    }

    /// Returns to idle and reports the terminal state just left.
    pub fn finish(&mut self) -> Result<DecisionState, TransitionError> {
        let terminal = self.state;
        self.transition(DecisionState::Idle)?;
        self.last_outcome = Some(terminal);
        Ok(terminal)
    }
}

/// Urge to post and to comment this tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Desire {
    pub post: f64,
    pub comment: f64,
}

impl Desire {
    pub fn overall(&self) -> f64 {
        self.post.max(self.comment)
    }

    /// Posting wins ties.
    pub fn preferred(&self) -> ActionKind {
        if self.post >= self.comment {
            ActionKind::Post
        } else {
            ActionKind::Comment
        }
    }
}

/// Stable 64-bit FNV-1a hash, identical across runs and platforms.
pub fn stable_hash(text: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in text.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

/// Mixes the run seed, tick and agent into one RNG seed.
pub fn agent_seed(seed: u64, tick: u64, agent: &AgentId) -> u64 {
    let mut x = seed ^ tick.wrapping_mul(0x9e37_79b9_7f4a_7c15) ^ stable_hash(agent.as_str());
    // splitmix64 finalizer
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

#[derive(Debug, Clone, Default)]
pub struct DecisionPolicy {
    config: DecisionConfig,
}

impl DecisionPolicy {
    pub fn new(config: DecisionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DecisionConfig {
        &self.config
    }

    /// Jitter in [-amplitude, amplitude], fixed for (seed, tick, agent).
    pub fn jitter(&self, seed: u64, tick: u64, agent: &AgentId) -> f64 {
        let amplitude = self.config.desire_jitter.abs();
        if amplitude == 0.0 {
            return 0.0;
        }
        let mut rng = SmallRng::seed_from_u64(agent_seed(seed, tick, agent));
        rng.gen_range(-amplitude..=amplitude)
    }

    /// Desire rises with curiosity and excitement (posts) or joy
    /// (comments) and falls with fatigue and frustration.
    pub fn desire(
        &self,
        emotion: &EmotionVector,
        high_signal: bool,
        has_feed: bool,
        jitter: f64,
    ) -> Desire {
        let mut post = 0.2 + 0.35 * emotion.curiosity + 0.25 * emotion.excitement
            - 0.2 * emotion.fatigue
            - 0.1 * emotion.frustration;
        if high_signal {
            post += 0.15;
        }
        let mut comment = 0.15 + 0.3 * emotion.joy + 0.2 * emotion.curiosity
            - 0.15 * emotion.fatigue
            - 0.1 * emotion.frustration;
        if has_feed {
            comment += 0.1;
        }
        Desire {
            post: post + jitter,
            comment: comment + jitter,
        }
    }

    /// Steps 1 and 2: activation, then the preferred kind or its
    /// alternative when the preferred quota is spent.
    pub fn choose_kind(
        &self,
        desire: &Desire,
        quota: &QuotaCounter,
    ) -> Result<ActionKind, SkipReason> {
        if desire.overall() < self.config.activation_threshold {
            return Err(SkipReason::LowDesire);
        }
        let preferred = desire.preferred();
        if quota.remaining(preferred) > 0 {
            Ok(preferred)
        } else if quota.remaining(preferred.other()) > 0 {
            Ok(preferred.other())
        } else {
            Err(SkipReason::QuotaExhausted)
        }
    }

    /// Step 3: the draft to publish, or why nothing is published.
    pub fn resolve(&self, verdict: &Verdict) -> Result<usize, SkipReason> {
        match verdict {
            Verdict::Accepted { index, .. } => Ok(*index),
            Verdict::Rejected { reason, .. } => Err((*reason).into()),
        }
    }
}
