//! Sample data fixtures for testing.
//!
//! Enable the `test-fixtures` feature to access these helpers.
//!
//! # Example
//!
//! ```ignore
//! // In your Cargo.toml:
//! // [dev-dependencies]
//! // agora-events = { path = "../agora-events", features = ["test-fixtures"] }
//!
//! use agora_events::fixtures;
//!
//! let feed = fixtures::sample_feed();
//! ```

use chrono::{TimeZone, Utc};

use crate::{
    ActionKind, AgentId, CompositeScore, EmotionState, EmotionVector, Persona, PublishedItem,
    Snippet, VirtualDay,
};

/// Returns the sample community feed.
///
/// Contains 5 snippets:
/// - 3 bootstrap posts by seeded agents (quality 0.84)
/// - 1 human post with traction (high signal)
/// - 1 low-signal human post
pub fn sample_feed() -> Vec<Snippet> {
    let json = include_str!("../tests/fixtures/sample_feed.json");
    serde_json::from_str(json).expect("Failed to parse sample_feed.json")
}

/// A persona with enough topical words for persona-consistency scoring.
pub fn sample_persona() -> Persona {
    Persona::new(
        "@sample_ai focuses on memory systems and developer tooling. \
         Communication style: curious. Core value: evidence-based opinions.",
    )
}

/// An emotion state sitting exactly on its baseline.
pub fn calm_emotion() -> EmotionState {
    EmotionState::new(EmotionVector::default(), 0.1)
}

/// An emotion state far from its baseline, for drift tests.
pub fn agitated_emotion() -> EmotionState {
    let current = EmotionVector {
        curiosity: 0.9,
        fatigue: 0.8,
        joy: 0.1,
        anxiety: 0.9,
        excitement: 0.95,
        frustration: 0.85,
    };
    EmotionState::new(current, 0.2).with_baseline(EmotionVector::default())
}

/// A published post with a fixed timestamp.
pub fn sample_item(agent: &str, day: u64, body: &str) -> PublishedItem {
    PublishedItem {
        id: format!("item_fixture_{}_{}", agent, day),
        agent: AgentId::new(agent),
        kind: ActionKind::Post,
        body: body.to_string(),
        parent_id: None,
        day: VirtualDay(day),
        score: CompositeScore::default(),
        created_at: Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap(),
    }
}
