//! Daily rumination.
//!
//! On the first tick of a new virtual day an agent looks back at the day
//! before: what it published, how the community responded, how far its
//! topics wandered from its persona, and a few standout community posts.
//! One wrapped generation call turns that into an insight, a short
//! persona patch and a baseline shift tag. If the call fails or the reply
//! cannot be parsed, a rule-based reflection is stored instead, so each
//! (agent, day) is closed exactly once.

use agora_events::{
    ActionKind, AgentId, BaselineShift, EmotionState, EngagementTally, Persona, Phase, PublishedItem,
    RuminationResult, Snippet, TraceEvent, VirtualDay,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

use crate::emotion::EmotionEngine;
use crate::error::StoreError;
use crate::provider::{GenerationRequest, Purpose};
use crate::reliability::ReliableGenerator;
use crate::store::Store;
use crate::text::{jaccard, tokens};

/// Rumination configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectionConfig {
    pub enabled: bool,
    /// Ruminations run per tick; the rest wait in a queue
    pub budget_per_tick: usize,
    pub max_patch_chars: usize,
    pub max_persona_chars: usize,
    /// Baseline nudge per shift
    pub shift_magnitude: f64,
    /// High-signal community items shown to the agent
    pub sample_size: usize,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            budget_per_tick: 2,
            max_patch_chars: 80,
            max_persona_chars: 360,
            shift_magnitude: 0.05,
            sample_size: 3,
            temperature: 0.4,
            max_tokens: 160,
        }
    }
}

/// What an agent looks back on.
#[derive(Debug, Clone, PartialEq)]
pub struct ReflectionSignals {
    pub items: Vec<PublishedItem>,
    pub tally: EngagementTally,
    /// 1 minus the token overlap between the day's items and the persona.
    pub topic_drift: f64,
    pub sample: Vec<Snippet>,
}

impl ReflectionSignals {
    fn count(&self, kind: ActionKind) -> usize {
        self.items.iter().filter(|i| i.kind == kind).count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReflection {
    pub insight: String,
    pub patch: Option<String>,
    pub shift: BaselineShift,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuminationOutcome {
    pub result: RuminationResult,
    /// False when the day had already been processed.
    pub fresh: bool,
    /// True when the generation call failed or its reply was unusable.
    pub call_failed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ReflectionEngine {
    config: ReflectionConfig,
    emotion: EmotionEngine,
}

impl ReflectionEngine {
    pub fn new(config: ReflectionConfig, emotion: EmotionEngine) -> Self {
        Self { config, emotion }
    }

    pub fn config(&self) -> &ReflectionConfig {
        &self.config
    }

    pub fn gather(
        &self,
        store: &dyn Store,
        agent: &AgentId,
        day: VirtualDay,
        persona: &Persona,
        feed: &[Snippet],
    ) -> Result<ReflectionSignals, StoreError> {
        let items = store.items_on_day(agent, day)?;
        let tally = store.engagement(agent, day)?;

        let topic_drift = if items.is_empty() {
            0.0
        } else {
            let bodies: Vec<&str> = items.iter().map(|i| i.body.as_str()).collect();
            1.0 - jaccard(&tokens(&bodies.join(" ")), &tokens(&persona.render()))
        };

        let mut sample: Vec<Snippet> = feed
            .iter()
            .filter(|s| s.is_high_signal() && s.author.as_ref() != Some(agent))
            .cloned()
            .collect();
        sample.sort_by(|a, b| b.signal_strength().total_cmp(&a.signal_strength()));
        sample.truncate(self.config.sample_size);

        Ok(ReflectionSignals {
            items,
            tally,
            topic_drift,
            sample,
        })
    }

    pub fn request(
        &self,
        persona: &Persona,
        emotion: &EmotionState,
        signals: &ReflectionSignals,
    ) -> GenerationRequest {
        let mut context = vec![
            format!("posts={}", signals.count(ActionKind::Post)),
            format!("comments={}", signals.count(ActionKind::Comment)),
            format!("likes={}", signals.tally.likes),
            format!("replies={}", signals.tally.replies),
            format!("ignored={}", signals.tally.ignored),
            format!("engagement_balance={:.2}", signals.tally.balance()),
            format!("topic_drift={:.2}", signals.topic_drift),
        ];
        for item in &signals.items {
            context.push(format!("own {}: {}", item.kind, item.body));
        }
        for snippet in &signals.sample {
            context.push(format!("community: {}", snippet.body));
        }

        let prompt = format!(
            "Look back on yesterday.\n{}\n\n\
             Your current mood: joy {:.2}, frustration {:.2}, anxiety {:.2}.\n\
             Reply on one line exactly as INSIGHT=<one sentence>;PATCH=<persona phrase under {} chars or none>;\
             SHIFT=<more_positive|more_calm|more_dominant|none>",
            context.join("\n"),
            emotion.current.joy,
            emotion.current.frustration,
            emotion.current.anxiety,
            self.config.max_patch_chars
        );
        GenerationRequest::new(Purpose::Reflect, persona.render(), prompt)
            .with_sampling(self.config.temperature, self.config.max_tokens)
            .with_context(context)
    }

    /// Parses `INSIGHT=...;PATCH=...;SHIFT=...`. Keys are case-insensitive
    /// and may appear in any order; the insight is required.
    pub fn parse_reply(text: &str) -> Option<ParsedReflection> {
        let upper = text.to_ascii_uppercase();
        let mut marks: Vec<(usize, &str)> = ["INSIGHT=", "PATCH=", "SHIFT="]
            .iter()
            .filter_map(|key| upper.find(key).map(|pos| (pos, *key)))
            .collect();
        marks.sort();

        let mut fields: BTreeMap<&str, String> = BTreeMap::new();
        for (i, (pos, key)) in marks.iter().enumerate() {
            let start = pos + key.len();
            let end = marks.get(i + 1).map(|(next, _)| *next).unwrap_or(text.len());
            let value = text[start..end].trim().trim_end_matches(';').trim();
            fields.insert(*key, value.to_string());
        }

        let insight = fields.get("INSIGHT=").filter(|s| !s.is_empty())?.clone();
        let patch = fields
            .get("PATCH=")
            .filter(|p| !p.is_empty() && !p.eq_ignore_ascii_case("none"))
            .cloned();
        let shift = fields
            .get("SHIFT=")
            .and_then(|s| s.parse::<BaselineShift>().ok())
            .unwrap_or(BaselineShift::None);
        Some(ParsedReflection {
            insight,
            patch,
            shift,
        })
    }

    /// Rule-based reflection from the engagement balance and the day's
    /// dominant off-persona topic.
    pub fn heuristic(&self, persona: &Persona, signals: &ReflectionSignals) -> ParsedReflection {
        let tally = &signals.tally;
        let balance = tally.balance();
        let shift = if tally.total() == 0 {
            BaselineShift::None
        } else if balance > 0.25 {
            BaselineShift::MorePositive
        } else if balance < -0.25 {
            BaselineShift::MoreCalm
        } else {
            BaselineShift::None
        };

        let persona_tokens = tokens(&persona.render());
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for item in &signals.items {
            for token in tokens(&item.body) {
                if !persona_tokens.contains(&token) {
                    *counts.entry(token).or_default() += 1;
                }
            }
        }
        // highest count, then alphabetical
        let top = counts
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
            .map(|(token, _)| token);

        ParsedReflection {
            insight: format!(
                "Published {} item(s); {} likes, {} replies, {} ignored.",
                signals.items.len(),
                tally.likes,
                tally.replies,
                tally.ignored
            ),
            patch: top.map(|token| format!("Recently curious about {}.", token)),
            shift,
        }
    }

    /// Reflects on `day` for `agent`, updating `persona` and `emotion` in
    /// place. A day already processed returns the stored result untouched.
    #[allow(clippy::too_many_arguments)]
    pub async fn ruminate(
        &self,
        store: &dyn Store,
        generator: &ReliableGenerator,
        agent: &AgentId,
        day: VirtualDay,
        persona: &mut Persona,
        emotion: &mut EmotionState,
        feed: &[Snippet],
        now: DateTime<Utc>,
    ) -> Result<RuminationOutcome, StoreError> {
        if let Some(stored) = store.rumination(agent, day)? {
            return Ok(RuminationOutcome {
                result: stored,
                fresh: false,
                call_failed: false,
            });
        }

        let signals = self.gather(store, agent, day, persona, feed)?;
        let request = self.request(persona, emotion, &signals);
        let parsed = match generator.generate(&request).await {
            Ok(reply) => Self::parse_reply(&reply.value),
            Err(failure) => {
                tracing::warn!("rumination call failed for {} on {}: {}", agent, day, failure);
                None
            }
        };
        let call_failed = parsed.is_none();
        let parsed = parsed.unwrap_or_else(|| self.heuristic(persona, &signals));

        let mut next_persona = persona.clone();
        let applied = parsed.patch.as_deref().and_then(|patch| {
            next_persona.apply_patch(
                patch,
                self.config.max_patch_chars,
                self.config.max_persona_chars,
            )
        });
        let mut next_emotion = emotion.clone();
        self.emotion
            .nudge_baseline(&mut next_emotion, parsed.shift, self.config.shift_magnitude);

        let result = RuminationResult {
            agent: agent.clone(),
            day,
            insight: parsed.insight,
            persona_patch: applied,
            baseline_shift: parsed.shift,
            heuristic: call_failed,
            created_at: now,
        };
        let (stored, inserted) = store.record_rumination(result, &next_persona, &next_emotion)?;
        if inserted {
            *persona = next_persona;
            *emotion = next_emotion;
            store.append_trace(
                TraceEvent::new(
                    agent.clone(),
                    Phase::Ruminate,
                    day,
                    format!("ruminated on {}: {}", day, stored.baseline_shift),
                    now,
                )
                .with_payload(json!({
                    "insight": stored.insight,
                    "persona_patch": stored.persona_patch,
                    "baseline_shift": stored.baseline_shift,
                    "heuristic": stored.heuristic,
                    "topic_drift": signals.topic_drift,
                    "likes": signals.tally.likes,
                    "replies": signals.tally.replies,
                    "ignored": signals.tally.ignored,
                })),
            )?;
            tracing::info!("{} ruminated on {} ({})", agent, day, stored.baseline_shift);
        } else {
            *persona = store.load_persona(agent)?;
            *emotion = store.load_emotion(agent)?;
        }

        Ok(RuminationOutcome {
            result: stored,
            fresh: inserted,
            call_failed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emotion::EmotionConfig;
    use crate::provider::Provider;
    use crate::store::MemoryStore;
    use agora_events::fixtures::{calm_emotion, sample_feed, sample_item, sample_persona};
    use agora_events::{EngagementKind, QuotaLimits};
    use std::time::Duration;

    fn engine() -> ReflectionEngine {
        ReflectionEngine::new(
            ReflectionConfig::default(),
            EmotionEngine::new(EmotionConfig::default()),
        )
    }

    fn setup() -> (MemoryStore, AgentId) {
        let store = MemoryStore::new();
        let agent = AgentId::new("sample_ai");
        store
            .register_agent(&agent, sample_persona(), calm_emotion())
            .unwrap();
        (store, agent)
    }

    #[test]
    fn test_parse_well_formed_reply() {
        let parsed = ReflectionEngine::parse_reply(
            "INSIGHT=Short posts landed better.;PATCH=Prefers concise takes.;SHIFT=more_positive",
        )
        .unwrap();
        assert_eq!(parsed.insight, "Short posts landed better.");
        assert_eq!(parsed.patch.as_deref(), Some("Prefers concise takes."));
        assert_eq!(parsed.shift, BaselineShift::MorePositive);
    }

    #[test]
    fn test_parse_is_lenient() {
        let parsed =
            ReflectionEngine::parse_reply("shift=calm; insight=Slow day; it happens. ;patch=none")
                .unwrap();
        assert_eq!(parsed.insight, "Slow day; it happens.");
        assert_eq!(parsed.patch, None);
        assert_eq!(parsed.shift, BaselineShift::MoreCalm);

        let odd = ReflectionEngine::parse_reply("INSIGHT=ok;SHIFT=sideways").unwrap();
        assert_eq!(odd.shift, BaselineShift::None);
    }

    #[test]
    fn test_parse_requires_insight() {
        assert!(ReflectionEngine::parse_reply("PATCH=x;SHIFT=none").is_none());
        assert!(ReflectionEngine::parse_reply("just chatting").is_none());
    }

    #[test]
    fn test_gather_collects_prior_day() {
        let (store, agent) = setup();
        let limits = QuotaLimits::default();
        store
            .commit_action(sample_item("sample_ai", 1, "Gardening tomatoes again"), &limits)
            .unwrap();
        store
            .commit_action(sample_item("sample_ai", 2, "Another day"), &limits)
            .unwrap();
        store
            .record_engagement(&agent, VirtualDay(1), EngagementKind::Like)
            .unwrap();

        let signals = engine()
            .gather(&store, &agent, VirtualDay(1), &sample_persona(), &sample_feed())
            .unwrap();
        assert_eq!(signals.items.len(), 1);
        assert_eq!(signals.tally.likes, 1);
        assert_eq!(signals.topic_drift, 1.0);
        assert_eq!(signals.sample.len(), 3);
        assert_eq!(signals.sample[0].id, "seed_001");
        assert!(signals.sample.iter().all(|s| s.id != "human_005"));
    }

    #[test]
    fn test_heuristic_shift_from_balance() {
        let engine = engine();
        let persona = sample_persona();
        let mut signals = ReflectionSignals {
            items: vec![
                sample_item("sample_ai", 1, "gardening tomatoes"),
                sample_item("sample_ai", 1, "more gardening"),
            ],
            tally: EngagementTally {
                likes: 3,
                replies: 1,
                ignored: 0,
            },
            topic_drift: 1.0,
            sample: Vec::new(),
        };
        let positive = engine.heuristic(&persona, &signals);
        assert_eq!(positive.shift, BaselineShift::MorePositive);
        assert_eq!(positive.patch.as_deref(), Some("Recently curious about gardening."));

        signals.tally = EngagementTally {
            likes: 0,
            replies: 0,
            ignored: 4,
        };
        assert_eq!(engine.heuristic(&persona, &signals).shift, BaselineShift::MoreCalm);

        signals.tally = EngagementTally::default();
        assert_eq!(engine.heuristic(&persona, &signals).shift, BaselineShift::None);
    }

    #[tokio::test]
    async fn test_ruminate_applies_patch_and_shift_once() {
        let (store, agent) = setup();
        let generator = ReliableGenerator::new(
            Provider::from_config(&crate::provider::ProviderConfig::Template),
            Duration::from_secs(5),
        );
        store
            .record_engagement(&agent, VirtualDay(0), EngagementKind::Reply)
            .unwrap();

        let engine = engine();
        let mut persona = sample_persona();
        let mut emotion = calm_emotion();
        let first = engine
            .ruminate(&store, &generator, &agent, VirtualDay(0), &mut persona, &mut emotion, &[], Utc::now())
            .await
            .unwrap();
        assert!(first.fresh);
        assert!(!first.call_failed);
        assert_eq!(first.result.baseline_shift, BaselineShift::MorePositive);
        assert!((emotion.baseline.joy - 0.55).abs() < 1e-9);
        assert_eq!(persona.patches.len(), 1);
        assert_eq!(store.load_persona(&agent).unwrap(), persona);

        let second = engine
            .ruminate(&store, &generator, &agent, VirtualDay(0), &mut persona, &mut emotion, &[], Utc::now())
            .await
            .unwrap();
        assert!(!second.fresh);
        assert_eq!(second.result, first.result);
        assert!((emotion.baseline.joy - 0.55).abs() < 1e-9);
        assert_eq!(persona.patches.len(), 1);

        let traces = store.recent_traces(10).unwrap();
        assert_eq!(traces.iter().filter(|t| t.phase == Phase::Ruminate).count(), 1);
    }

    #[tokio::test]
    async fn test_failed_call_still_closes_day() {
        let (store, agent) = setup();
        let generator = ReliableGenerator::new(Provider::Unavailable, Duration::from_secs(5));
        store
            .record_engagement(&agent, VirtualDay(3), EngagementKind::Ignored)
            .unwrap();

        let mut persona = sample_persona();
        let mut emotion = calm_emotion();
        let outcome = engine()
            .ruminate(&store, &generator, &agent, VirtualDay(3), &mut persona, &mut emotion, &[], Utc::now())
            .await
            .unwrap();
        assert!(outcome.fresh);
        assert!(outcome.call_failed);
        assert!(outcome.result.heuristic);
        assert_eq!(outcome.result.baseline_shift, BaselineShift::MoreCalm);
        assert!(store.rumination(&agent, VirtualDay(3)).unwrap().is_some());
    }
}
