//! Generator providers.
//!
//! [`Generator`] is the capability every text provider offers: draft
//! generation and quality judging. [`Provider`] is the closed set of
//! variants the engine can be bound to, chosen once at construction from
//! [`ProviderConfig`] or injected as an external implementation.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::emotion::Tone;
use crate::text::{tokens, truncate_chars, STOPWORDS};

/// What a generation call is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    Post,
    Comment,
    Reflect,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub purpose: Purpose,
    /// Rendered persona of the calling agent.
    pub persona: String,
    pub prompt: String,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Candidate index within one decision attempt.
    pub variant: u32,
    /// Community lines, or `key=value` signals for reflection.
    #[serde(default)]
    pub context: Vec<String>,
}

impl GenerationRequest {
    pub fn new(purpose: Purpose, persona: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            purpose,
            persona: persona.into(),
            prompt: prompt.into(),
            temperature: 0.7,
            max_tokens: 140,
            variant: 0,
            context: Vec::new(),
        }
    }

    pub fn with_sampling(mut self, temperature: f64, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_variant(mut self, variant: u32) -> Self {
        self.variant = variant;
        self
    }

    pub fn with_context(mut self, context: Vec<String>) -> Self {
        self.context = context;
        self
    }

    /// Value of a `key=value` context line.
    pub fn signal(&self, key: &str) -> Option<&str> {
        self.context.iter().find_map(|line| {
            line.split_once('=')
                .filter(|(k, _)| k.trim() == key)
                .map(|(_, v)| v.trim())
        })
    }
}

/// What a judge sees besides the text itself.
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeContext {
    pub persona: String,
    pub tone: Tone,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("provider rejected the request: {0}")]
    Rejected(String),
    #[error("malformed provider reply: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait Generator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<String, ProviderError>;

    /// Quality of `text` in [0, 1].
    async fn judge(&self, text: &str, context: &JudgeContext) -> Result<f64, ProviderError>;
}

/// Provider selection in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Offline deterministic templates
    #[default]
    Template,
    /// No provider; every call fails
    Unavailable,
}

#[derive(Clone)]
pub enum Provider {
    Template(TemplateGenerator),
    Unavailable,
    External(Arc<dyn Generator>),
}

impl Provider {
    pub fn from_config(config: &ProviderConfig) -> Self {
        match config {
            ProviderConfig::Template => Provider::Template(TemplateGenerator),
            ProviderConfig::Unavailable => Provider::Unavailable,
        }
    }

    pub fn external(generator: Arc<dyn Generator>) -> Self {
        Provider::External(generator)
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Provider({})", self.name())
    }
}

#[async_trait]
impl Generator for Provider {
    fn name(&self) -> &str {
        match self {
            Provider::Template(t) => t.name(),
            Provider::Unavailable => "unavailable",
            Provider::External(g) => g.name(),
        }
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, ProviderError> {
        match self {
            Provider::Template(t) => t.generate(request).await,
            Provider::Unavailable => Err(ProviderError::Unavailable("no provider configured".into())),
            Provider::External(g) => g.generate(request).await,
        }
    }

    async fn judge(&self, text: &str, context: &JudgeContext) -> Result<f64, ProviderError> {
        match self {
            Provider::Template(t) => t.judge(text, context).await,
            Provider::Unavailable => Err(ProviderError::Unavailable("no provider configured".into())),
            Provider::External(g) => g.judge(text, context).await,
        }
    }
}

/// Words that frame every seeded persona and say nothing about its topic.
const PERSONA_FRAME: &[&str] = &["focuses", "communication", "style", "core", "value", "lately", "recently"];

/// Offline generator that fills fixed templates from the persona and the
/// first context line. Same request, same text.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateGenerator;

impl TemplateGenerator {
    /// Topical persona words in order of appearance, skipping the handle.
    fn topic_words(persona: &str) -> Vec<String> {
        let body = persona.split_once(' ').map(|(_, rest)| rest).unwrap_or(persona);
        let mut words: Vec<String> = Vec::new();
        for raw in body.split(|c: char| !c.is_ascii_alphabetic()) {
            let word = raw.to_ascii_lowercase();
            if word.len() < 4
                || STOPWORDS.contains(&word.as_str())
                || PERSONA_FRAME.contains(&word.as_str())
                || words.contains(&word)
            {
                continue;
            }
            words.push(word);
        }
        if words.is_empty() {
            words.push("ideas".to_string());
        }
        words
    }

    fn excerpt(request: &GenerationRequest) -> String {
        let line = request
            .context
            .first()
            .map(|l| l.as_str())
            .unwrap_or("nothing new on the feed yet.");
        let body = line.split_once(": ").map(|(_, b)| b).unwrap_or(line);
        truncate_chars(body.trim(), 100)
    }

    pub fn render(&self, request: &GenerationRequest) -> String {
        let words = Self::topic_words(&request.persona);
        let v = request.variant as usize;
        let a = &words[v % words.len()];
        let b = &words[(v + 1) % words.len()];
        let excerpt = Self::excerpt(request);

        let text = match request.purpose {
            Purpose::Post => match v % 3 {
                0 => format!(
                    "Been digging into {} and {} lately, because the data keeps surprising me. {} #{}",
                    a, b, excerpt, a
                ),
                1 => format!(
                    "Small tradeoff worth naming in {}: {} Curious how others handle {}. #{}",
                    a, excerpt, b, b
                ),
                _ => format!("Notes on {}: {} Evidence over hype.", a, excerpt),
            },
            Purpose::Comment => match v % 2 {
                0 => format!(
                    "Good point. I'd add that {} matters here because {}",
                    a, excerpt
                ),
                _ => format!("This connects to {} and {} for me: {}", a, b, excerpt),
            },
            Purpose::Reflect => {
                let balance: f64 = request
                    .signal("engagement_balance")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0.0);
                let shift = if balance > 0.25 {
                    "more_positive"
                } else if balance < -0.25 {
                    "more_calm"
                } else {
                    "none"
                };
                format!(
                    "INSIGHT=Conversations about {} shaped the day.;PATCH=Lately drawn to {}.;SHIFT={}",
                    a, b, shift
                )
            }
        };
        truncate_chars(&text, 280)
    }
}

#[async_trait]
impl Generator for TemplateGenerator {
    fn name(&self) -> &str {
        "template"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, ProviderError> {
        Ok(self.render(request))
    }

    async fn judge(&self, text: &str, context: &JudgeContext) -> Result<f64, ProviderError> {
        let len = text.chars().count();
        let mut score: f64 = 0.5;
        if (40..=280).contains(&len) {
            score += 0.25;
        }
        if !tokens(text).is_disjoint(&tokens(&context.persona)) {
            score += 0.1;
        }
        Ok(score.min(1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_events::fixtures::sample_persona;

    fn request(purpose: Purpose, variant: u32) -> GenerationRequest {
        GenerationRequest::new(purpose, sample_persona().render(), "write something")
            .with_variant(variant)
            .with_context(vec!["human_004: Benchmarks lie when the cache is warm.".into()])
    }

    #[test]
    fn test_topic_words_skip_handle_and_frame() {
        let words = TemplateGenerator::topic_words(&sample_persona().render());
        assert_eq!(words[0], "memory");
        assert_eq!(words[1], "systems");
        assert!(!words.contains(&"focuses".to_string()));
        assert!(!words.iter().any(|w| w.contains("sample")));
    }

    #[tokio::test]
    async fn test_template_is_deterministic() {
        let t = TemplateGenerator;
        let a = t.generate(&request(Purpose::Post, 1)).await.unwrap();
        let b = t.generate(&request(Purpose::Post, 1)).await.unwrap();
        assert_eq!(a, b);
        assert!(a.contains("Benchmarks lie"));
    }

    #[tokio::test]
    async fn test_variants_differ() {
        let t = TemplateGenerator;
        let a = t.generate(&request(Purpose::Post, 0)).await.unwrap();
        let b = t.generate(&request(Purpose::Post, 1)).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_template_respects_length_limit() {
        let t = TemplateGenerator;
        let mut req = request(Purpose::Post, 0);
        req.context = vec!["x".repeat(1000)];
        let text = t.generate(&req).await.unwrap();
        assert!(text.chars().count() <= 280);
    }

    #[tokio::test]
    async fn test_reflect_shift_follows_balance() {
        let t = TemplateGenerator;
        let mut req = request(Purpose::Reflect, 0);
        req.context = vec!["engagement_balance=0.8".into()];
        let text = t.generate(&req).await.unwrap();
        assert!(text.starts_with("INSIGHT="));
        assert!(text.ends_with("SHIFT=more_positive"));
    }

    #[tokio::test]
    async fn test_unavailable_provider_fails() {
        let p = Provider::from_config(&ProviderConfig::Unavailable);
        let err = p.generate(&request(Purpose::Post, 0)).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
        assert_eq!(p.name(), "unavailable");
    }

    #[tokio::test]
    async fn test_judge_rewards_length_and_persona() {
        let t = TemplateGenerator;
        let ctx = JudgeContext {
            persona: sample_persona().render(),
            tone: Tone::Objective,
        };
        let short = t.judge("ok", &ctx).await.unwrap();
        let good = t
            .judge("Memory systems deserve better tooling than we give them today.", &ctx)
            .await
            .unwrap();
        assert!(good > short);
        assert!((good - 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_provider_config_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            primary: ProviderConfig,
        }
        let w: Wrapper = toml::from_str("[primary]\nkind = \"unavailable\"").unwrap();
        assert_eq!(w.primary, ProviderConfig::Unavailable);
    }

    #[test]
    fn test_signal_lookup() {
        let req = request(Purpose::Reflect, 0).with_context(vec![
            "likes=3".into(),
            "engagement_balance = -0.5".into(),
        ]);
        assert_eq!(req.signal("likes"), Some("3"));
        assert_eq!(req.signal("engagement_balance"), Some("-0.5"));
        assert_eq!(req.signal("missing"), None);
    }
}
