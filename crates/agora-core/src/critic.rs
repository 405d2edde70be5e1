//! Critic scorer.
//!
//! Ranks the candidate drafts of one decision attempt by a weighted
//! composite of quality, persona consistency and emotion alignment, minus
//! a flat penalty for drafts too close to the agent's own recent output.

use agora_events::{CompositeScore, Draft, EmotionVector};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::emotion::Tone;
use crate::text::{jaccard, overlap, similarity, tokens};

/// Composite weights. They are not required to sum to one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub quality: f64,
    pub persona: f64,
    pub emotion: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            quality: 0.55,
            persona: 0.25,
            emotion: 0.20,
        }
    }
}

/// Critic configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CriticConfig {
    /// Drafts generated per decision attempt
    pub candidates: usize,
    /// Own published items compared for diversity
    pub history_window: usize,
    pub weights: ScoreWeights,
    /// Flat penalty for a too-similar draft
    pub penalty_weight: f64,
    /// Similarity at or above which the penalty applies
    pub min_similarity: f64,
    /// Minimum composite to publish
    pub quality_threshold: f64,
    /// Longest structurally valid draft, in characters
    pub max_chars: usize,
    /// Share of the rule heuristic when a judge score is available
    pub heuristic_share: f64,
    /// Ask the provider to judge each valid draft
    pub use_judge: bool,
    /// Community hashtags that earn the heuristic a bonus, matched
    /// case-insensitively
    pub bonus_tags: Vec<String>,
}

impl Default for CriticConfig {
    fn default() -> Self {
        Self {
            candidates: 3,
            history_window: 30,
            weights: ScoreWeights::default(),
            penalty_weight: 0.2,
            min_similarity: 0.55,
            quality_threshold: 0.7,
            max_chars: 280,
            heuristic_share: 0.6,
            use_judge: true,
            bonus_tags: vec!["#AI".to_string(), "#agora".to_string()],
        }
    }
}

/// Prompt scaffolding that must never be published as content.
const PROMPT_MARKERS: &[&str] = &[
    "INSIGHT=",
    "PATCH=",
    "SHIFT=",
    "Community context:",
    "Target post excerpt:",
    "Return only the content",
];

/// Everything the critic knows about the drafting agent.
#[derive(Debug, Clone, Copy)]
pub struct CriticInput<'a> {
    pub persona: &'a str,
    pub emotion: &'a EmotionVector,
    pub tone: Tone,
    /// Bodies of the agent's recent published items, newest first.
    pub recent: &'a [String],
    /// Community lines the drafts were written against.
    pub context: &'a [String],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDraft {
    pub draft: Draft,
    pub score: CompositeScore,
    /// Highest similarity to any recent item.
    pub max_similarity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    BelowThreshold,
    NoValidDraft,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::BelowThreshold => write!(f, "below_threshold"),
            RejectReason::NoValidDraft => write!(f, "no_valid_draft"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accepted { index: usize, score: CompositeScore },
    Rejected {
        reason: RejectReason,
        /// Best valid candidate, if any: (index, composite).
        best: Option<(usize, f64)>,
    },
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted { .. })
    }
}

#[derive(Debug, Clone, Default)]
pub struct CriticScorer {
    config: CriticConfig,
}

impl CriticScorer {
    pub fn new(config: CriticConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CriticConfig {
        &self.config
    }

    /// Wraps raw provider text as a draft, marking it malformed when it is
    /// empty, too long, or leaks prompt scaffolding.
    pub fn validate(&self, index: usize, raw: &str) -> Draft {
        let text = raw.trim().replace('\n', " ");
        let malformed = text.is_empty()
            || text.chars().count() > self.config.max_chars
            || PROMPT_MARKERS.iter().any(|m| text.contains(m));
        if malformed {
            Draft::malformed(index, text)
        } else {
            Draft::new(index, text)
        }
    }

    /// Structural quality heuristic in [0, 1], rounded to three places.
    pub fn heuristic_quality(&self, text: &str, context: &[String]) -> f64 {
        let len = text.trim().chars().count();
        let mut score: f64 = 0.35;
        if (40..=280).contains(&len) {
            score += 0.2;
        } else if len > 20 {
            score += 0.1;
        }
        let lower = text.to_lowercase();
        if self
            .config
            .bonus_tags
            .iter()
            .any(|tag| lower.contains(&tag.to_lowercase()))
        {
            score += 0.1;
        }
        if text.contains("http") {
            score += 0.05;
        }
        if text.matches('!').count() <= 2 {
            score += 0.05;
        }
        if !context.is_empty() {
            score += (overlap(text, &context.join(" ")) * 0.25).min(0.25);
        }
        (score.clamp(0.0, 1.0) * 1000.0).round() / 1000.0
    }

    /// Heuristic blended with the judge score when one is available.
    pub fn quality(&self, text: &str, context: &[String], judge: Option<f64>) -> f64 {
        let heuristic = self.heuristic_quality(text, context);
        match judge {
            Some(judged) => {
                let share = self.config.heuristic_share.clamp(0.0, 1.0);
                share * heuristic + (1.0 - share) * judged.clamp(0.0, 1.0)
            }
            None => heuristic,
        }
    }

    pub fn persona_consistency(&self, text: &str, persona: &str) -> f64 {
        let ours = tokens(text);
        let theirs = tokens(persona);
        if ours.is_empty() || theirs.is_empty() {
            return 0.0;
        }
        jaccard(&ours, &theirs)
    }

    pub fn emotion_alignment(&self, text: &str, tone: Tone, emotion: &EmotionVector) -> f64 {
        let lower = text.to_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| lower.contains(w));
        let mut score: f64 = 0.4;
        match tone {
            Tone::Enthusiastic if has(&["!", "excited", "love"][..]) => score += 0.3,
            Tone::Critical if has(&["however", "risk", "issue"][..]) => score += 0.3,
            Tone::Objective if has(&["because", "data", "tradeoff"][..]) => score += 0.2,
            _ => {}
        }
        if emotion.fatigue > 0.6 && text.chars().count() < 180 {
            score += 0.1;
        }
        score.min(1.0)
    }

    /// Penalty and the highest similarity to any of the last
    /// `history_window` items.
    pub fn diversity_penalty(&self, text: &str, recent: &[String]) -> (f64, f64) {
        let max_similarity = recent
            .iter()
            .take(self.config.history_window)
            .map(|prior| similarity(text, prior))
            .fold(0.0, f64::max);
        let penalty = if max_similarity >= self.config.min_similarity {
            self.config.penalty_weight
        } else {
            0.0
        };
        (penalty, max_similarity)
    }

    /// Scores a draft whose quality is already known.
    pub fn assess(&self, draft: &Draft, quality: f64, input: &CriticInput<'_>) -> ScoredDraft {
        if !draft.valid {
            return ScoredDraft {
                draft: draft.clone(),
                score: CompositeScore::zero(),
                max_similarity: 0.0,
            };
        }
        let persona = self.persona_consistency(&draft.text, input.persona);
        let emotion = self.emotion_alignment(&draft.text, input.tone, input.emotion);
        let (penalty, max_similarity) = self.diversity_penalty(&draft.text, input.recent);
        let w = &self.config.weights;
        let total = w.quality * quality + w.persona * persona + w.emotion * emotion - penalty;

        ScoredDraft {
            draft: draft.clone(),
            score: CompositeScore {
                quality,
                persona_consistency: persona,
                emotion_alignment: emotion,
                diversity_penalty: penalty,
                total,
            },
            max_similarity,
        }
    }

    pub fn score_draft(
        &self,
        draft: &Draft,
        input: &CriticInput<'_>,
        judge: Option<f64>,
    ) -> ScoredDraft {
        let quality = self.quality(&draft.text, input.context, judge);
        self.assess(draft, quality, input)
    }

    /// Picks the highest composite among valid drafts; ties go to the
    /// lowest index. Accepted only at or above the quality threshold.
    pub fn select(&self, scored: &[ScoredDraft]) -> Verdict {
        let mut best: Option<&ScoredDraft> = None;
        for candidate in scored.iter().filter(|s| s.draft.valid) {
            best = match best {
                None => Some(candidate),
                Some(current) => {
                    let better = candidate.score.total > current.score.total
                        || (candidate.score.total == current.score.total
                            && candidate.draft.index < current.draft.index);
                    Some(if better { candidate } else { current })
                }
            };
        }
        match best {
            None => Verdict::Rejected {
                reason: RejectReason::NoValidDraft,
                best: None,
            },
            Some(top) if top.score.total >= self.config.quality_threshold => Verdict::Accepted {
                index: top.draft.index,
                score: top.score,
            },
            Some(top) => Verdict::Rejected {
                reason: RejectReason::BelowThreshold,
                best: Some((top.draft.index, top.score.total)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_events::fixtures::sample_persona;

    fn quality_only() -> CriticScorer {
        CriticScorer::new(CriticConfig {
            weights: ScoreWeights {
                quality: 1.0,
                persona: 0.0,
                emotion: 0.0,
            },
            ..CriticConfig::default()
        })
    }

    fn input<'a>(persona: &'a str, emotion: &'a EmotionVector, recent: &'a [String]) -> CriticInput<'a> {
        CriticInput {
            persona,
            emotion,
            tone: Tone::Objective,
            recent,
            context: &[],
        }
    }

    #[test]
    fn test_validate_flags_malformed() {
        let critic = CriticScorer::default();
        assert!(critic.validate(0, "A fine post about tooling.").valid);
        assert!(!critic.validate(0, "   ").valid);
        assert!(!critic.validate(0, &"x".repeat(281)).valid);
        assert!(critic.validate(0, &"x".repeat(280)).valid);
        assert!(!critic.validate(0, "INSIGHT=leaked;PATCH=x").valid);
    }

    #[test]
    fn test_heuristic_quality_components() {
        let critic = CriticScorer::default();
        // 0.35 + 0.1 (len > 20) + 0.05 (few '!')
        let short = critic.heuristic_quality("a short line of text here", &[]);
        assert!((short - 0.5).abs() < 1e-9);

        // 0.35 + 0.2 (40..=280 chars) + 0.05
        let plain = critic.heuristic_quality("A fifty character draft about memory systems ok..", &[]);
        assert_eq!(plain, 0.6);

        let rich = critic.heuristic_quality(
            "Caching tradeoffs in memory systems are subtle; details at http://x #AI",
            &[],
        );
        // 0.35 + 0.2 + 0.1 (tag) + 0.05 (link) + 0.05
        assert_eq!(rich, 0.75);
    }

    #[test]
    fn test_only_community_tags_earn_the_bonus() {
        let critic = CriticScorer::default();
        let base = critic.heuristic_quality("Caching tradeoffs in memory systems are subtle.", &[]);
        let other_tag =
            critic.heuristic_quality("Caching tradeoffs in memory systems are subtle. #memory", &[]);
        let community =
            critic.heuristic_quality("Caching tradeoffs in memory systems are subtle. #Agora", &[]);
        assert_eq!(other_tag, base);
        assert_eq!(community, 0.7);

        let custom = CriticScorer::new(CriticConfig {
            bonus_tags: vec!["#memory".to_string()],
            ..CriticConfig::default()
        });
        assert_eq!(
            custom.heuristic_quality("Caching tradeoffs in memory systems are subtle. #memory", &[]),
            0.7
        );
    }

    #[test]
    fn test_quality_blends_judge() {
        let critic = CriticScorer::default();
        let text = "a short line of text here";
        let blended = critic.quality(text, &[], Some(1.0));
        assert!((blended - (0.6 * 0.5 + 0.4)).abs() < 1e-9);
        assert!((critic.quality(text, &[], None) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_emotion_alignment_rules() {
        let critic = CriticScorer::default();
        let calm = EmotionVector::default();
        assert!((critic.emotion_alignment("because data", Tone::Objective, &calm) - 0.6).abs() < 1e-9);
        assert!((critic.emotion_alignment("love it!", Tone::Enthusiastic, &calm) - 0.7).abs() < 1e-9);
        assert!((critic.emotion_alignment("plain", Tone::Critical, &calm) - 0.4).abs() < 1e-9);

        let tired = EmotionVector {
            fatigue: 0.8,
            ..EmotionVector::default()
        };
        assert!((critic.emotion_alignment("plain", Tone::Tired, &tired) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_persona_consistency() {
        let critic = CriticScorer::default();
        let persona = sample_persona().render();
        assert_eq!(critic.persona_consistency("", &persona), 0.0);
        let on_topic = critic.persona_consistency("memory systems and developer tooling", &persona);
        let off_topic = critic.persona_consistency("gardening tomatoes outside", &persona);
        assert!(on_topic > off_topic);
        assert_eq!(off_topic, 0.0);
    }

    #[test]
    fn test_diversity_penalty_only_for_near_copies() {
        let critic = CriticScorer::default();
        let recent = vec!["Caching tradeoffs in memory systems".to_string()];
        let (penalty, sim) = critic.diversity_penalty("Caching tradeoffs in memory systems", &recent);
        assert_eq!(penalty, 0.2);
        assert_eq!(sim, 1.0);

        let (penalty, _) = critic.diversity_penalty("Gardening with tomatoes", &recent);
        assert_eq!(penalty, 0.0);
    }

    #[test]
    fn test_diversity_window_limits_history() {
        let critic = CriticScorer::new(CriticConfig {
            history_window: 1,
            ..CriticConfig::default()
        });
        let recent = vec!["unrelated words entirely".to_string(), "the copied draft text".to_string()];
        let (penalty, _) = critic.diversity_penalty("the copied draft text", &recent);
        assert_eq!(penalty, 0.0);
    }

    #[test]
    fn test_penalized_best_draft_loses_and_rejects() {
        let critic = quality_only();
        let emotion = EmotionVector::default();
        let recent = vec!["Second draft about caching layers".to_string()];
        let inp = input("", &emotion, &recent);

        let drafts = [
            critic.validate(0, "First draft about observability"),
            critic.validate(1, "Second draft about caching layers"),
            critic.validate(2, "Third draft about release notes"),
        ];
        let scored: Vec<ScoredDraft> = drafts
            .iter()
            .zip([0.65, 0.80, 0.50])
            .map(|(d, q)| critic.assess(d, q, &inp))
            .collect();

        assert!((scored[1].score.total - 0.60).abs() < 1e-9);
        assert!((scored[1].score.raw_total() - 0.80).abs() < 1e-9);

        match critic.select(&scored) {
            Verdict::Rejected { reason, best } => {
                assert_eq!(reason, RejectReason::BelowThreshold);
                assert_eq!(reason.to_string(), "below_threshold");
                let (index, total) = best.unwrap();
                assert_eq!(index, 0);
                assert!((total - 0.65).abs() < 1e-9);
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_ties_break_by_lowest_index() {
        let critic = quality_only();
        let emotion = EmotionVector::default();
        let inp = input("", &emotion, &[]);
        let scored: Vec<ScoredDraft> = (0..3)
            .map(|i| critic.assess(&critic.validate(i, &format!("draft number {}", i)), 0.9, &inp))
            .collect();

        let mut reversed = scored.clone();
        reversed.reverse();
        for set in [&scored, &reversed] {
            match critic.select(set) {
                Verdict::Accepted { index, .. } => assert_eq!(index, 0),
                other => panic!("expected acceptance, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_malformed_never_selected() {
        let critic = quality_only();
        let emotion = EmotionVector::default();
        let inp = input("", &emotion, &[]);
        let bad = critic.assess(&Draft::malformed(0, "INSIGHT=x"), 1.0, &inp);
        assert_eq!(bad.score, CompositeScore::zero());

        assert_eq!(
            critic.select(&[bad]),
            Verdict::Rejected {
                reason: RejectReason::NoValidDraft,
                best: None
            }
        );
    }

    #[test]
    fn test_selection_is_deterministic() {
        let critic = CriticScorer::default();
        let emotion = EmotionVector::default();
        let persona = sample_persona().render();
        let inp = input(&persona, &emotion, &[]);
        let texts = [
            "Memory systems need better developer tooling because the data says so. #memory",
            "Tooling thoughts.",
            "Evidence beats opinions when tuning memory systems.",
        ];
        let run = || {
            let scored: Vec<ScoredDraft> = texts
                .iter()
                .enumerate()
                .map(|(i, t)| critic.score_draft(&critic.validate(i, t), &inp, Some(0.8)))
                .collect();
            critic.select(&scored)
        };
        assert_eq!(run(), run());
    }
}
