//! One agent's pass through a tick.
//!
//! Observe, draft, critic, decide, act, then fold engagement back into
//! emotion. On the first tick of a new day the agent also ruminates
//! before observing. Every failure is caught here and classified into
//! one [`AgentStatus`]; nothing escapes to the scheduler.

use std::sync::Arc;

use agora_events::{
    ActionKind, AgentId, AgentStatus, Draft, EmotionState, Persona, Phase, PublishedItem,
    Snippet, TraceEvent, VirtualDay,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;

use crate::clock::VirtualClock;
use crate::critic::{CriticInput, CriticScorer, ScoredDraft, Verdict};
use crate::decision::{DecisionMachine, DecisionPolicy, DecisionState, Desire, SkipReason, TransitionError};
use crate::emotion::{temperature, EmotionEngine, Tone};
use crate::error::StoreError;
use crate::perception::PerceptionFeed;
use crate::provider::{GenerationRequest, JudgeContext, Purpose};
use crate::quota::QuotaLedger;
use crate::reflection::ReflectionEngine;
use crate::reliability::ReliableGenerator;
use crate::store::Store;
use crate::text::truncate_chars;

/// Community lines shown to the generator.
const CONTEXT_LINES: usize = 8;

#[derive(Debug, Error)]
enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// What the scheduler tells an agent about the tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickInput {
    pub tick_id: u64,
    pub day: VirtualDay,
    /// Prior day to ruminate on before deciding, if any.
    pub ruminate: Option<VirtualDay>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentOutcome {
    pub agent: AgentId,
    pub status: AgentStatus,
    /// Terminal decision state, when the attempt got that far.
    pub decision: Option<DecisionState>,
    pub published: Option<PublishedItem>,
    /// True when a fresh rumination was stored this tick.
    pub ruminated: bool,
    pub failed_calls: u32,
    pub error: Option<String>,
}

impl AgentOutcome {
    /// Outcome for an agent whose pipeline never ran or never finished.
    pub fn unfinished(agent: AgentId, status: AgentStatus, error: impl Into<String>) -> Self {
        Self {
            agent,
            status,
            decision: None,
            published: None,
            ruminated: false,
            failed_calls: 0,
            error: Some(error.into()),
        }
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self.decision {
            Some(DecisionState::Skipped(reason)) => Some(reason),
            _ => None,
        }
    }
}

/// Mutable record of how far an attempt got.
#[derive(Debug, Default)]
struct Progress {
    decision: Option<DecisionState>,
    published: Option<PublishedItem>,
    ruminated: bool,
    failed_calls: u32,
}

/// Shared, immutable wiring for agent pipelines.
pub struct Pipeline {
    pub store: Arc<dyn Store>,
    pub clock: Arc<VirtualClock>,
    pub ledger: QuotaLedger,
    pub emotion: EmotionEngine,
    pub generator: ReliableGenerator,
    pub critic: CriticScorer,
    pub policy: DecisionPolicy,
    pub reflection: ReflectionEngine,
    pub feed: Arc<dyn PerceptionFeed>,
    /// Run seed for desire jitter.
    pub seed: u64,
}

impl Pipeline {
    pub async fn run(&self, agent: &AgentId, input: TickInput) -> AgentOutcome {
        let mut progress = Progress::default();
        let result = self.run_inner(agent, input, &mut progress).await;

        let (status, error) = match result {
            Err(e) => {
                tracing::error!("tick {} agent {} failed: {}", input.tick_id, agent, e);
                (AgentStatus::Error, Some(e.to_string()))
            }
            Ok(()) => {
                // a failed call that ends in a skip is skip_error whatever
                // the skip reason; partial_error means it still acted
                let skipped = matches!(progress.decision, Some(DecisionState::Skipped(_)));
                let status = match progress.decision {
                    Some(DecisionState::Skipped(reason)) if reason.is_failure() => {
                        AgentStatus::SkipError
                    }
                    _ if progress.failed_calls == 0 => AgentStatus::Ok,
                    _ if skipped => AgentStatus::SkipError,
                    _ => AgentStatus::PartialError,
                };
                (status, None)
            }
        };

        AgentOutcome {
            agent: agent.clone(),
            status,
            decision: progress.decision,
            published: progress.published,
            ruminated: progress.ruminated,
            failed_calls: progress.failed_calls,
            error,
        }
    }

    async fn run_inner(
        &self,
        agent: &AgentId,
        input: TickInput,
        progress: &mut Progress,
    ) -> Result<(), PipelineError> {
        let day = input.day;
        let mut emotion = self.store.load_emotion(agent)?;
        let mut persona = self.store.load_persona(agent)?;
        self.ledger.reset_if_new_day(agent, day)?;

        let content = self.feed.fetch_context(agent);
        let engagement = self.feed.engagement(agent);

        if let Some(prior) = input.ruminate {
            let outcome = self
                .reflection
                .ruminate(
                    self.store.as_ref(),
                    &self.generator,
                    agent,
                    prior,
                    &mut persona,
                    &mut emotion,
                    &content,
                    self.clock.real_now(),
                )
                .await?;
            progress.ruminated = outcome.fresh;
            if outcome.call_failed {
                progress.failed_calls += 1;
            }
        }

        // Observe: inertia first, then this tick's events. Saved before any
        // provider call so a timed-out agent still moved.
        self.emotion.tick(&mut emotion, &content, &engagement);
        for &kind in &engagement {
            self.store.record_engagement(agent, day, kind)?;
        }
        self.store.save_emotion(agent, &emotion)?;
        let high_signal = content.iter().any(Snippet::is_high_signal);
        self.trace(agent, Phase::Perceive, day, format!("saw {} items", content.len()))
            .with_payload(json!({
                "seen": content.len(),
                "high_signal": high_signal,
                "engagement": engagement,
                "emotion": emotion.current,
            }))
            .persist(self.store.as_ref())?;

        let mut machine = DecisionMachine::new();
        machine.begin()?;

        let jitter = self.policy.jitter(self.seed, input.tick_id, agent);
        let desire = self
            .policy
            .desire(&emotion.current, high_signal, !content.is_empty(), jitter);
        let quota = self.ledger.get_quota(agent, day)?;
        let kind = match self.policy.choose_kind(&desire, &quota) {
            Ok(kind) => kind,
            Err(reason) => return self.skip(agent, day, &mut machine, reason, &desire, progress),
        };
        let target = match kind {
            ActionKind::Post => None,
            ActionKind::Comment => match pick_target(agent, &content) {
                Some(target) => Some(target),
                None => {
                    return self.skip(agent, day, &mut machine, SkipReason::NoTarget, &desire, progress)
                }
            },
        };

        let tone = Tone::of(&emotion.current);
        let context = context_lines(&content);
        let drafts = self
            .draft(agent, kind, target, &persona, &emotion, tone, &context, progress)
            .await;
        self.trace(
            agent,
            Phase::Draft,
            day,
            format!("{} {} draft(s)", drafts.len(), kind),
        )
        .with_payload(json!({
            "kind": kind,
            "drafts": drafts.iter().map(|d| &d.text).collect::<Vec<_>>(),
            "failed_calls": progress.failed_calls,
        }))
        .persist(self.store.as_ref())?;

        if drafts.is_empty() {
            self.emotion.record_error(&mut emotion);
            self.store.save_emotion(agent, &emotion)?;
            return self.skip(agent, day, &mut machine, SkipReason::ProviderFailure, &desire, progress);
        }

        let recent: Vec<String> = self
            .store
            .recent_items(agent, self.critic.config().history_window)?
            .into_iter()
            .map(|item| item.body)
            .collect();
        let rendered = persona.render();
        let critic_input = CriticInput {
            persona: &rendered,
            emotion: &emotion.current,
            tone,
            recent: &recent,
            context: &context,
        };
        let scored = self.score(&drafts, &critic_input, progress).await;
        let verdict = self.critic.select(&scored);
        self.trace(agent, Phase::Critic, day, verdict_summary(&verdict))
            .with_payload(json!({
                "scores": scored.iter().map(|s| json!({
                    "index": s.draft.index,
                    "valid": s.draft.valid,
                    "score": s.score,
                    "max_similarity": s.max_similarity,
                })).collect::<Vec<_>>(),
            }))
            .persist(self.store.as_ref())?;

        let index = match self.policy.resolve(&verdict) {
            Ok(index) => index,
            Err(reason) => return self.skip(agent, day, &mut machine, reason, &desire, progress),
        };
        let Some(chosen) = scored.iter().find(|s| s.draft.index == index) else {
            return self.skip(agent, day, &mut machine, SkipReason::NoValidDraft, &desire, progress);
        };

        let item = PublishedItem {
            id: String::new(),
            agent: agent.clone(),
            kind,
            body: chosen.draft.text.clone(),
            parent_id: target.map(|t| t.id.clone()),
            day,
            score: chosen.score,
            created_at: self.clock.real_now(),
        };
        let Some(stored) = self.ledger.commit(item)? else {
            return self.skip(agent, day, &mut machine, SkipReason::QuotaRace, &desire, progress);
        };
        machine.act()?;
        self.trace(agent, Phase::Post, day, format!("{} {}", kind, stored.id))
            .with_payload(json!({
                "item_id": stored.id,
                "kind": kind,
                "parent_id": stored.parent_id,
                "score": stored.score,
            }))
            .persist(self.store.as_ref())?;
        tracing::info!(
            "{} published {} {} (score {:.3})",
            agent,
            kind,
            stored.id,
            stored.score.total
        );
        progress.published = Some(stored);
        progress.decision = Some(machine.finish()?);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn draft(
        &self,
        agent: &AgentId,
        kind: ActionKind,
        target: Option<&Snippet>,
        persona: &Persona,
        emotion: &EmotionState,
        tone: Tone,
        context: &[String],
        progress: &mut Progress,
    ) -> Vec<Draft> {
        let purpose = match kind {
            ActionKind::Post => Purpose::Post,
            ActionKind::Comment => Purpose::Comment,
        };
        let prompt = draft_prompt(agent, kind, tone, target, context);
        let mut lines = context.to_vec();
        if let Some(target) = target {
            lines.insert(0, format!("target: {}", truncate_chars(&target.body, 140)));
        }

        let mut drafts = Vec::new();
        for index in 0..self.critic.config().candidates {
            let request = GenerationRequest::new(purpose, persona.render(), prompt.clone())
                .with_sampling(temperature(&emotion.current), 140)
                .with_variant(index as u32)
                .with_context(lines.clone());
            match self.generator.generate(&request).await {
                Ok(reply) => drafts.push(self.critic.validate(index, &reply.value)),
                Err(failure) => {
                    tracing::warn!("{} draft {} failed: {}", agent, index, failure);
                    progress.failed_calls += 1;
                    break;
                }
            }
        }
        drafts
    }

    async fn score(
        &self,
        drafts: &[Draft],
        input: &CriticInput<'_>,
        progress: &mut Progress,
    ) -> Vec<ScoredDraft> {
        let mut judge_up = self.critic.config().use_judge;
        let judge_context = JudgeContext {
            persona: input.persona.to_string(),
            tone: input.tone,
        };
        let mut scored = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let mut judged = None;
            if judge_up && draft.valid {
                match self.generator.judge(&draft.text, &judge_context).await {
                    Ok(reply) => judged = Some(reply.value),
                    Err(failure) => {
                        tracing::warn!("judge call failed: {}", failure);
                        progress.failed_calls += 1;
                        judge_up = false;
                    }
                }
            }
            scored.push(self.critic.score_draft(draft, input, judged));
        }
        scored
    }

    fn skip(
        &self,
        agent: &AgentId,
        day: VirtualDay,
        machine: &mut DecisionMachine,
        reason: SkipReason,
        desire: &Desire,
        progress: &mut Progress,
    ) -> Result<(), PipelineError> {
        machine.skip(reason)?;
        self.trace(agent, Phase::Decide, day, format!("skipped: {}", reason))
            .with_payload(json!({
                "reason": reason,
                "desire": desire,
            }))
            .persist(self.store.as_ref())?;
        tracing::debug!("{} skipped: {}", agent, reason);
        progress.decision = Some(machine.finish()?);
        Ok(())
    }

    fn trace(&self, agent: &AgentId, phase: Phase, day: VirtualDay, summary: String) -> PendingTrace {
        PendingTrace(TraceEvent::new(agent.clone(), phase, day, summary, self.now()))
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.real_now()
    }
}

/// A trace event being assembled.
struct PendingTrace(TraceEvent);

impl PendingTrace {
    fn with_payload(self, payload: serde_json::Value) -> Self {
        PendingTrace(self.0.with_payload(payload))
    }

    fn persist(self, store: &dyn Store) -> Result<(), StoreError> {
        store.append_trace(self.0)
    }
}

/// The strongest-signal snippet by someone else; ties go to the lowest id.
fn pick_target<'a>(agent: &AgentId, content: &'a [Snippet]) -> Option<&'a Snippet> {
    content
        .iter()
        .filter(|s| s.author.as_ref() != Some(agent))
        .max_by(|a, b| {
            a.signal_strength()
                .total_cmp(&b.signal_strength())
                .then_with(|| b.id.cmp(&a.id))
        })
}

fn context_lines(content: &[Snippet]) -> Vec<String> {
    content
        .iter()
        .take(CONTEXT_LINES)
        .map(|s| {
            let author = s.author.as_ref().map(|a| a.as_str()).unwrap_or("anon");
            format!("{}: {}", author, truncate_chars(&s.body, 140))
        })
        .collect()
}

fn draft_prompt(
    agent: &AgentId,
    kind: ActionKind,
    tone: Tone,
    target: Option<&Snippet>,
    context: &[String],
) -> String {
    let context = if context.is_empty() {
        "No notable context.".to_string()
    } else {
        context.join("\n")
    };
    match (kind, target) {
        (ActionKind::Comment, Some(target)) => format!(
            "Target post excerpt:\n{}\n\nCommunity context:\n{}\n\n\
             Write one short comment as @{}. Tone: {}. Return only the content text.",
            truncate_chars(&target.body, 140),
            context,
            agent,
            tone.guidance()
        ),
        _ => format!(
            "Community context:\n{}\n\nWrite one short public post as @{}. Tone: {}. \
             Keep it under 280 characters. High signal only. Return only the content text.",
            context,
            agent,
            tone.guidance()
        ),
    }
}

fn verdict_summary(verdict: &Verdict) -> String {
    match verdict {
        Verdict::Accepted { index, score } => {
            format!("accepted draft {} at {:.3}", index, score.total)
        }
        Verdict::Rejected { reason, best } => match best {
            Some((index, total)) => format!("rejected ({}), best draft {} at {:.3}", reason, index, total),
            None => format!("rejected ({})", reason),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_events::fixtures::sample_feed;

    #[test]
    fn test_pick_target_prefers_signal_and_skips_own() {
        let feed = sample_feed();
        let own = AgentId::new("seed_user_001_ai");
        let target = pick_target(&own, &feed).unwrap();
        // seed_003: 0.84 + 0.1
        assert_eq!(target.id, "seed_003");

        let other = AgentId::new("someone_else");
        assert_eq!(pick_target(&other, &feed).unwrap().id, "seed_001");
        assert!(pick_target(&own, &[]).is_none());
    }

    #[test]
    fn test_context_lines_are_bounded() {
        let many: Vec<Snippet> = (0..20)
            .map(|i| Snippet::new(format!("s{}", i), "x".repeat(500)))
            .collect();
        let lines = context_lines(&many);
        assert_eq!(lines.len(), CONTEXT_LINES);
        assert!(lines[0].starts_with("anon: "));
        assert!(lines[0].chars().count() <= 146);
    }

    #[test]
    fn test_comment_prompt_includes_target() {
        let target = Snippet::new("t", "Decay schedules for memory");
        let prompt = draft_prompt(
            &AgentId::new("a"),
            ActionKind::Comment,
            Tone::Cautious,
            Some(&target),
            &[],
        );
        assert!(prompt.contains("Decay schedules for memory"));
        assert!(prompt.contains("cautious"));
        assert!(prompt.contains("No notable context."));
    }
}
