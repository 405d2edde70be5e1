//! Rumination Results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::content::AgentId;
use crate::timestamp::VirtualDay;

/// Direction of the nudge a rumination applies to the emotion baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineShift {
    MorePositive,
    MoreCalm,
    MoreDominant,
    None,
}

impl fmt::Display for BaselineShift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BaselineShift::MorePositive => write!(f, "more_positive"),
            BaselineShift::MoreCalm => write!(f, "more_calm"),
            BaselineShift::MoreDominant => write!(f, "more_dominant"),
            BaselineShift::None => write!(f, "none"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseShiftError(pub String);

impl fmt::Display for ParseShiftError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown baseline shift: '{}'", self.0)
    }
}

impl std::error::Error for ParseShiftError {}

impl FromStr for BaselineShift {
    type Err = ParseShiftError;

    /// Accepts `more_positive`, `more-positive`, `positive` and so on.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(&['-', ' '][..], "_");
        let key = normalized.strip_prefix("more_").unwrap_or(&normalized);
        match key {
            "positive" => Ok(BaselineShift::MorePositive),
            "calm" => Ok(BaselineShift::MoreCalm),
            "dominant" => Ok(BaselineShift::MoreDominant),
            "none" | "" => Ok(BaselineShift::None),
            _ => Err(ParseShiftError(s.to_string())),
        }
    }
}

/// Outcome of one agent's reflection over one virtual day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuminationResult {
    pub agent: AgentId,
    /// The day that was reflected on.
    pub day: VirtualDay,
    pub insight: String,
    #[serde(default)]
    pub persona_patch: Option<String>,
    pub baseline_shift: BaselineShift,
    /// True when the generator was unavailable and a rule-based
    /// reflection was used instead.
    #[serde(default)]
    pub heuristic: bool,
    pub created_at: DateTime<Utc>,
}
