//! Text generation backends behind a single `generate(prompt)` contract.
//!
//! The pipeline only sees [`Generator`]. Swapping the canned stand-in for a
//! hosted or local model means writing one more adapter; retry and timeout
//! policy are adapters too, so the pipeline itself never retries.

use rand::distributions::WeightedIndex;
use rand::prelude::Distribution;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::embedder::fnv1a64;

const FOLKLORE_RESPONSES_RON: &str = include_str!("../../story_data/responses.ron");

/// A generation failure. No partial output accompanies any variant.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("{backend} failed: {reason}")]
    Failed { backend: String, reason: String },
    #[error("{backend} timed out after {after:?}")]
    Timeout { backend: String, after: Duration },
    #[error("{backend} gave up after {attempts} attempts: {last}")]
    Exhausted {
        backend: String,
        attempts: u32,
        last: Box<GenerateError>,
    },
}

#[derive(Debug, Error)]
pub enum ResponsesError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("invalid responses: {0}")]
    Invalid(String),
}

/// Text in, text out, may fail.
pub trait Generator: Send + Sync {
    /// Short backend name used in errors and logs.
    fn name(&self) -> &str;

    /// Largest prompt, in characters, this backend accepts.
    fn max_prompt_chars(&self) -> Option<usize> {
        None
    }

    fn generate(&self, prompt: &str) -> Result<String, GenerateError>;
}

/// A weighted canned narrative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
    pub weight: u32,
    pub text: String,
}

/// Narratives returned when `keyword` occurs in the prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CannedRule {
    pub keyword: String,
    pub alternatives: Vec<Alternative>,
}

/// The full rule table for [`CannedGenerator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CannedResponses {
    pub rules: Vec<CannedRule>,
    pub fallback: Vec<Alternative>,
}

impl CannedResponses {
    pub fn load_from_ron(path: &Path) -> Result<Self, ResponsesError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }

    pub fn parse_ron(input: &str) -> Result<Self, ResponsesError> {
        let responses: CannedResponses = ron::from_str(input)?;
        responses.validate()?;
        Ok(responses)
    }

    pub fn validate(&self) -> Result<(), ResponsesError> {
        for rule in &self.rules {
            if rule.keyword.is_empty() {
                return Err(ResponsesError::Invalid("rule with empty keyword".to_string()));
            }
            check_alternatives(&rule.alternatives, &rule.keyword)?;
        }
        check_alternatives(&self.fallback, "fallback")
    }
}

fn check_alternatives(alternatives: &[Alternative], owner: &str) -> Result<(), ResponsesError> {
    let total = alternatives
        .iter()
        .try_fold(0u32, |sum, a| sum.checked_add(a.weight))
        .ok_or_else(|| {
            ResponsesError::Invalid(format!("'{}' weights add up to more than {}", owner, u32::MAX))
        })?;
    if total == 0 {
        return Err(ResponsesError::Invalid(format!(
            "'{}' has no alternative with a positive weight",
            owner
        )));
    }
    Ok(())
}

/// Rule-based stand-in for a language model.
///
/// Looks for each rule's keyword in the prompt (case sensitive), takes the
/// one found earliest, and answers with one of that rule's narratives, or with a
/// fallback narrative when nothing matches. The choice among alternatives
/// is seeded by the prompt, so a given prompt always gets the same story.
#[derive(Debug, Clone)]
pub struct CannedGenerator {
    responses: CannedResponses,
    seed: u64,
}

impl CannedGenerator {
    pub fn new(responses: CannedResponses, seed: u64) -> Result<Self, ResponsesError> {
        responses.validate()?;
        Ok(Self { responses, seed })
    }

    /// Fox, wooden-horse, and lone-traveler narratives.
    pub fn folklore(seed: u64) -> Result<Self, ResponsesError> {
        Self::parse_ron(FOLKLORE_RESPONSES_RON, seed)
    }

    pub fn load_from_ron(path: &Path, seed: u64) -> Result<Self, ResponsesError> {
        Ok(Self {
            responses: CannedResponses::load_from_ron(path)?,
            seed,
        })
    }

    pub fn parse_ron(input: &str, seed: u64) -> Result<Self, ResponsesError> {
        Ok(Self {
            responses: CannedResponses::parse_ron(input)?,
            seed,
        })
    }

    pub fn responses(&self) -> &CannedResponses {
        &self.responses
    }

    /// The rule whose keyword occurs earliest in `prompt`; rule order
    /// breaks ties.
    pub fn matching_rule(&self, prompt: &str) -> Option<&CannedRule> {
        self.responses
            .rules
            .iter()
            .filter_map(|rule| prompt.find(rule.keyword.as_str()).map(|pos| (pos, rule)))
            .min_by_key(|(pos, _)| *pos)
            .map(|(_, rule)| rule)
    }

    fn pick<'a>(&self, alternatives: &'a [Alternative], prompt: &str) -> Result<&'a str, GenerateError> {
        if let [only] = alternatives {
            return Ok(&only.text);
        }
        let dist = WeightedIndex::new(alternatives.iter().map(|a| a.weight)).map_err(|e| {
            GenerateError::Failed {
                backend: self.name().to_string(),
                reason: e.to_string(),
            }
        })?;
        let mut rng = StdRng::seed_from_u64(self.seed ^ fnv1a64(prompt.as_bytes()));
        Ok(&alternatives[dist.sample(&mut rng)].text)
    }
}

impl Generator for CannedGenerator {
    fn name(&self) -> &str {
        "canned"
    }

    fn generate(&self, prompt: &str) -> Result<String, GenerateError> {
        debug!(prompt, "canned generator received prompt");
        let alternatives = match self.matching_rule(prompt) {
            Some(rule) => {
                debug!(keyword = %rule.keyword, "keyword matched");
                &rule.alternatives
            }
            None => {
                debug!("no keyword matched, using fallback");
                &self.responses.fallback
            }
        };
        self.pick(alternatives, prompt).map(str::to_string)
    }
}

/// Retries a backend with linear backoff before giving up.
pub struct RetryGenerator<G> {
    inner: G,
    max_attempts: u32,
    backoff: Duration,
}

impl<G: Generator> RetryGenerator<G> {
    /// `max_attempts` counts the first call; values below 1 mean 1.
    pub fn new(inner: G, max_attempts: u32, backoff: Duration) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

impl<G: Generator> Generator for RetryGenerator<G> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn max_prompt_chars(&self) -> Option<usize> {
        self.inner.max_prompt_chars()
    }

    fn generate(&self, prompt: &str) -> Result<String, GenerateError> {
        let mut attempt = 1;
        loop {
            match self.inner.generate(prompt) {
                Ok(text) => return Ok(text),
                Err(e) if attempt >= self.max_attempts => {
                    return Err(GenerateError::Exhausted {
                        backend: self.inner.name().to_string(),
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    warn!(backend = self.inner.name(), attempt, error = %e, "generation failed, retrying");
                    thread::sleep(self.backoff * attempt);
                    attempt += 1;
                }
            }
        }
    }
}

/// Bounds how long a backend call may take.
///
/// The call runs on its own thread; past the deadline the caller gets
/// `Timeout` and the late result is discarded.
pub struct TimeoutGenerator<G> {
    inner: Arc<G>,
    timeout: Duration,
}

impl<G: Generator + 'static> TimeoutGenerator<G> {
    pub fn new(inner: G, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(inner),
            timeout,
        }
    }
}

impl<G: Generator + 'static> Generator for TimeoutGenerator<G> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn max_prompt_chars(&self) -> Option<usize> {
        self.inner.max_prompt_chars()
    }

    fn generate(&self, prompt: &str) -> Result<String, GenerateError> {
        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        let prompt = prompt.to_string();
        thread::Builder::new()
            .name(format!("{}-call", self.inner.name()))
            .spawn(move || {
                // The receiver is gone if we already timed out.
                let _ = tx.send(inner.generate(&prompt));
            })
            .map_err(|e| GenerateError::Failed {
                backend: self.inner.name().to_string(),
                reason: e.to_string(),
            })?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(GenerateError::Timeout {
                backend: self.inner.name().to_string(),
                after: self.timeout,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(GenerateError::Failed {
                backend: self.inner.name().to_string(),
                reason: "backend call ended without a result".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    const FOX: &str = "a young fox named Kiko";
    const HORSE: &str = "the clever strategist Odysseus";
    const TRAVELER: &str = "A lone traveler, guided by an ancient map";

    fn folklore() -> CannedGenerator {
        CannedGenerator::folklore(42).unwrap()
    }

    #[test]
    fn kitsune_prompt_gets_fox_story() {
        let story = folklore().generate("CONTEXT:\nKitsune are foxes").unwrap();
        assert!(story.contains(FOX));
    }

    #[test]
    fn trojan_horse_prompt_gets_odysseus_story() {
        let story = folklore().generate("the tale of the Trojan Horse").unwrap();
        assert!(story.contains(HORSE));
    }

    #[test]
    fn unmatched_prompt_falls_back() {
        let story = folklore().generate("quantum computers").unwrap();
        assert!(story.contains(TRAVELER));
        let empty = folklore().generate("").unwrap();
        assert!(empty.contains(TRAVELER));
    }

    #[test]
    fn keyword_match_is_case_sensitive() {
        let story = folklore().generate("kitsune").unwrap();
        assert!(story.contains(TRAVELER));
    }

    #[test]
    fn earliest_keyword_wins() {
        let story = folklore()
            .generate("Trojan Horse ... Kitsune")
            .unwrap();
        assert!(story.contains(HORSE));
        let story = folklore()
            .generate("Kitsune ... Trojan Horse")
            .unwrap();
        assert!(story.contains(FOX));
    }

    #[test]
    fn rule_order_breaks_ties_at_same_position() {
        let input = r#"(
            rules: [
                (keyword: "Troy", alternatives: [(weight: 1, text: "short")]),
                (keyword: "Troy's walls", alternatives: [(weight: 1, text: "long")]),
            ],
            fallback: [(weight: 1, text: "none")],
        )"#;
        let g = CannedGenerator::parse_ron(input, 1).unwrap();
        assert_eq!(g.generate("Troy's walls fell").unwrap(), "short");
        assert_eq!(g.matching_rule("Troy's walls").unwrap().keyword, "Troy");
    }

    const TWO_WAY: &str = r#"(
        rules: [
            (keyword: "fox", alternatives: [
                (weight: 1, text: "left"),
                (weight: 1, text: "right"),
            ]),
        ],
        fallback: [(weight: 1, text: "neither")],
    )"#;

    #[test]
    fn weighted_choice_is_deterministic_per_prompt() {
        let g = CannedGenerator::parse_ron(TWO_WAY, 7).unwrap();
        let first = g.generate("a fox prompt").unwrap();
        for _ in 0..10 {
            assert_eq!(g.generate("a fox prompt").unwrap(), first);
        }
    }

    #[test]
    fn weighted_choice_varies_with_seed() {
        let baseline = CannedGenerator::parse_ron(TWO_WAY, 0)
            .unwrap()
            .generate("fox")
            .unwrap();
        let found_different = (1..64).any(|seed| {
            CannedGenerator::parse_ron(TWO_WAY, seed)
                .unwrap()
                .generate("fox")
                .unwrap()
                != baseline
        });
        assert!(found_different, "Expected some seed to pick the other alternative");
    }

    #[test]
    fn zero_weight_alternative_never_chosen() {
        let input = r#"(
            rules: [],
            fallback: [(weight: 0, text: "never"), (weight: 3, text: "always")],
        )"#;
        let g = CannedGenerator::parse_ron(input, 1).unwrap();
        for prompt in ["a", "b", "c", "d", "e"] {
            assert_eq!(g.generate(prompt).unwrap(), "always");
        }
    }

    #[test]
    fn invalid_responses_rejected() {
        let no_fallback = r#"(rules: [], fallback: [])"#;
        assert!(matches!(
            CannedResponses::parse_ron(no_fallback),
            Err(ResponsesError::Invalid(_))
        ));
        let empty_keyword =
            r#"(rules: [(keyword: "", alternatives: [(weight: 1, text: "x")])], fallback: [(weight: 1, text: "y")])"#;
        assert!(matches!(
            CannedResponses::parse_ron(empty_keyword),
            Err(ResponsesError::Invalid(_))
        ));
    }

    #[test]
    fn overflowing_weights_rejected() {
        let heavy = r#"(
            rules: [],
            fallback: [(weight: 4000000000, text: "a"), (weight: 4000000000, text: "b")],
        )"#;
        let err = CannedGenerator::parse_ron(heavy, 1).unwrap_err();
        assert!(matches!(err, ResponsesError::Invalid(ref msg) if msg.contains("fallback")));

        let heavy_rule = r#"(
            rules: [(keyword: "fox", alternatives: [
                (weight: 4294967295, text: "a"),
                (weight: 1, text: "b"),
            ])],
            fallback: [(weight: 1, text: "c")],
        )"#;
        assert!(matches!(
            CannedResponses::parse_ron(heavy_rule),
            Err(ResponsesError::Invalid(_))
        ));

        let at_limit = r#"(
            rules: [],
            fallback: [(weight: 4294967294, text: "a"), (weight: 1, text: "b")],
        )"#;
        let g = CannedGenerator::parse_ron(at_limit, 1).unwrap();
        assert!(g.generate("x").is_ok());
    }

    /// Fails a set number of times, then succeeds.
    struct Flaky {
        failures_left: AtomicU32,
        calls: AtomicU32,
    }

    impl Flaky {
        fn new(failures: u32) -> Self {
            Self {
                failures_left: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
            }
        }
    }

    impl Generator for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        fn generate(&self, _prompt: &str) -> Result<String, GenerateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(GenerateError::Failed {
                    backend: "flaky".to_string(),
                    reason: "connection reset".to_string(),
                });
            }
            Ok("recovered".to_string())
        }
    }

    #[test]
    fn retry_recovers_from_transient_failures() {
        let g = RetryGenerator::new(Flaky::new(2), 3, Duration::from_millis(1));
        assert_eq!(g.generate("p").unwrap(), "recovered");
        assert_eq!(g.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn retry_gives_up_after_max_attempts() {
        let g = RetryGenerator::new(Flaky::new(10), 2, Duration::from_millis(1));
        let err = g.generate("p").unwrap_err();
        assert!(matches!(err, GenerateError::Exhausted { attempts: 2, .. }));
        assert_eq!(g.inner.calls.load(Ordering::SeqCst), 2);
    }

    struct Slow(Duration);

    impl Generator for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        fn generate(&self, _prompt: &str) -> Result<String, GenerateError> {
            thread::sleep(self.0);
            Ok("late".to_string())
        }
    }

    #[test]
    fn timeout_reports_generation_failure() {
        let g = TimeoutGenerator::new(Slow(Duration::from_millis(500)), Duration::from_millis(20));
        let err = g.generate("p").unwrap_err();
        assert!(matches!(err, GenerateError::Timeout { .. }));
    }

    #[test]
    fn timeout_passes_fast_results_through() {
        let g = TimeoutGenerator::new(folklore(), Duration::from_secs(5));
        let story = g.generate("Kitsune").unwrap();
        assert!(story.contains(FOX));
    }
}
