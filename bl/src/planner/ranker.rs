//! Ranking capability for gap ordering
//!
//! Two implementations: [`HeuristicRanker`] is deterministic and always
//! available; [`LlmRanker`] asks a model and degrades to the heuristic on any
//! failure or timeout. Callers pick one through [`RankerKind`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use handlebars::Handlebars;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::domain::Gap;
use crate::llm::{CompletionRequest, LlmClient, LlmError, create_client};

/// Feature ID to rank; lower ranks sort first
pub type Ranking = HashMap<String, i64>;

/// Errors from a ranking pass
#[derive(Debug, Error)]
pub enum RankError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Ranking timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid ranking response: {0}")]
    InvalidResponse(String),

    #[error("Failed to render ranking prompt: {0}")]
    Template(String),
}

/// Which ranker the planner gets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankerKind {
    #[default]
    Heuristic,
    Llm,
    None,
}

/// Supplies a priority value per gap
#[async_trait]
pub trait Ranker: Send + Sync {
    async fn rank(&self, gaps: &[Gap]) -> Result<Ranking, RankError>;
}

/// Build the ranker selected by config, or none
pub fn create_ranker(config: &Config) -> eyre::Result<Option<Arc<dyn Ranker>>> {
    debug!(oracle = ?config.planner.oracle, "create_ranker: called");
    match config.planner.oracle {
        RankerKind::None => Ok(None),
        RankerKind::Heuristic => Ok(Some(Arc::new(HeuristicRanker))),
        RankerKind::Llm => {
            let client = create_client(&config.llm)?;
            let timeout = Duration::from_millis(config.planner.oracle_timeout_ms);
            Ok(Some(Arc::new(LlmRanker::new(client, timeout))))
        }
    }
}

/// Gaps referenced by more of the other gaps rank first
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicRanker;

impl HeuristicRanker {
    /// How many other gaps mention each gap's feature ID as a whole word
    fn mention_counts(gaps: &[Gap]) -> Vec<(String, i64)> {
        gaps.iter()
            .map(|gap| {
                let count = match Regex::new(&format!(r"\b{}\b", regex::escape(&gap.feature_id))) {
                    Ok(re) => gaps
                        .iter()
                        .filter(|other| other.feature_id != gap.feature_id)
                        .filter(|other| re.is_match(&other.description) || re.is_match(&other.suggested_action))
                        .count() as i64,
                    Err(_) => 0,
                };
                (gap.feature_id.clone(), count)
            })
            .collect()
    }

    pub fn rank_sync(&self, gaps: &[Gap]) -> Ranking {
        let counts = Self::mention_counts(gaps);
        let max = counts.iter().map(|(_, c)| *c).max().unwrap_or(0);
        counts.into_iter().map(|(id, count)| (id, max - count)).collect()
    }
}

#[async_trait]
impl Ranker for HeuristicRanker {
    async fn rank(&self, gaps: &[Gap]) -> Result<Ranking, RankError> {
        debug!(gap_count = %gaps.len(), "HeuristicRanker::rank: called");
        Ok(self.rank_sync(gaps))
    }
}

const RANK_SYSTEM_PROMPT: &str = "You order software work items. Reply with a single JSON object mapping each \
feature ID to an integer rank, where 1 means implement first. Reply with JSON only.";

const RANK_TEMPLATE: &str = "Rank these unmet features by implementation order.\n\
{{#each gaps}}\n- {{this.feature_id}} [{{this.status}}]: {{this.description}}{{#if this.suggested_action}} (suggested: {{this.suggested_action}}){{/if}}\n{{/each}}";

/// Best-effort model-backed ranker
pub struct LlmRanker {
    client: Arc<dyn LlmClient>,
    timeout: Duration,
    fallback: HeuristicRanker,
    hbs: Handlebars<'static>,
}

impl LlmRanker {
    pub fn new(client: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        debug!(?timeout, "LlmRanker::new: called");
        let mut hbs = Handlebars::new();
        hbs.register_escape_fn(handlebars::no_escape);
        Self {
            client,
            timeout,
            fallback: HeuristicRanker,
            hbs,
        }
    }

    fn build_request(&self, gaps: &[Gap]) -> Result<CompletionRequest, RankError> {
        let prompt = self
            .hbs
            .render_template(RANK_TEMPLATE, &serde_json::json!({ "gaps": gaps }))
            .map_err(|e| RankError::Template(e.to_string()))?;

        Ok(CompletionRequest::new(RANK_SYSTEM_PROMPT, prompt).deterministic())
    }

    /// Ask the model; any error here is the caller's cue to fall back
    async fn try_rank(&self, gaps: &[Gap]) -> Result<Ranking, RankError> {
        let request = self.build_request(gaps)?;
        let response = tokio::time::timeout(self.timeout, self.client.complete(request))
            .await
            .map_err(|_| RankError::Timeout(self.timeout))??;

        if response.truncated {
            debug!("LlmRanker::try_rank: reply hit the token ceiling");
        }
        parse_ranking(&response.text, gaps)
    }
}

#[async_trait]
impl Ranker for LlmRanker {
    async fn rank(&self, gaps: &[Gap]) -> Result<Ranking, RankError> {
        debug!(gap_count = %gaps.len(), "LlmRanker::rank: called");
        match self.try_rank(gaps).await {
            Ok(ranking) => Ok(ranking),
            Err(e) => {
                warn!(error = %e, "LlmRanker::rank: oracle failed, using heuristic ranking");
                Ok(self.fallback.rank_sync(gaps))
            }
        }
    }
}

/// Extract the JSON object from a model reply, keeping only known feature IDs
fn parse_ranking(text: &str, gaps: &[Gap]) -> Result<Ranking, RankError> {
    let start = text.find('{');
    let end = text.rfind('}');
    let json = match (start, end) {
        (Some(s), Some(e)) if s < e => &text[s..=e],
        _ => return Err(RankError::InvalidResponse("no JSON object in reply".to_string())),
    };

    let raw: HashMap<String, serde_json::Value> =
        serde_json::from_str(json).map_err(|e| RankError::InvalidResponse(e.to_string()))?;

    let ranking: Ranking = raw
        .into_iter()
        .filter(|(id, _)| gaps.iter().any(|g| &g.feature_id == id))
        .filter_map(|(id, value)| value.as_i64().map(|rank| (id, rank)))
        .collect();

    if ranking.is_empty() {
        return Err(RankError::InvalidResponse("no usable ranks in reply".to_string()));
    }
    Ok(ranking)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    fn gaps() -> Vec<Gap> {
        vec![
            Gap::missing("auth", "Login flow"),
            Gap::missing("db", "Storage layer"),
            Gap::partial("api", "Endpoints need auth and db wiring").with_suggested_action("finish db pool"),
        ]
    }

    #[tokio::test]
    async fn test_heuristic_ranks_most_referenced_first() {
        let ranking = HeuristicRanker.rank(&gaps()).await.unwrap();
        // auth and db are each mentioned by api; nothing mentions api
        assert_eq!(ranking["auth"], 0);
        assert_eq!(ranking["db"], 0);
        assert_eq!(ranking["api"], 1);
    }

    #[test]
    fn test_heuristic_whole_word_only() {
        let gaps = vec![Gap::missing("F1", ""), Gap::missing("F10", "depends on F10 only")];
        let ranking = HeuristicRanker.rank_sync(&gaps);
        assert_eq!(ranking["F1"], ranking["F10"]);
    }

    #[tokio::test]
    async fn test_llm_ranker_parses_reply_and_uses_zero_temperature() {
        let client = Arc::new(MockLlmClient::new(vec![
            "Here you go:\n{\"api\": 1, \"db\": 2, \"auth\": 3, \"ghost\": 0}",
        ]));
        let ranker = LlmRanker::new(client.clone(), Duration::from_secs(5));

        let ranking = ranker.rank(&gaps()).await.unwrap();
        assert_eq!(ranking.len(), 3);
        assert_eq!(ranking["api"], 1);
        assert!(!ranking.contains_key("ghost"));

        let request = client.last_request().unwrap();
        assert_eq!(request.temperature, Some(0.0));
        assert!(request.prompt.contains("- db [MISSING]: Storage layer"));
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn test_llm_ranker_falls_back_on_error() {
        let client = Arc::new(MockLlmClient::failing("boom"));
        let ranker = LlmRanker::new(client, Duration::from_secs(5));

        let ranking = ranker.rank(&gaps()).await.unwrap();
        assert_eq!(ranking, HeuristicRanker.rank_sync(&gaps()));
    }

    #[tokio::test]
    async fn test_llm_ranker_falls_back_on_garbage() {
        let client = Arc::new(MockLlmClient::new(vec!["I cannot rank these."]));
        let ranker = LlmRanker::new(client, Duration::from_secs(5));

        let ranking = ranker.rank(&gaps()).await.unwrap();
        assert_eq!(ranking, HeuristicRanker.rank_sync(&gaps()));
    }

    #[tokio::test]
    async fn test_llm_ranker_falls_back_on_timeout() {
        let client = Arc::new(MockLlmClient::new(vec!["{\"api\": 1}"]).with_delay(Duration::from_millis(500)));
        let ranker = LlmRanker::new(client, Duration::from_millis(20));

        let ranking = ranker.rank(&gaps()).await.unwrap();
        assert_eq!(ranking, HeuristicRanker.rank_sync(&gaps()));
    }

    #[test]
    fn test_create_ranker_needs_key_only_for_llm() {
        let mut config = Config::default();
        config.llm.api_key_env = "BUILDLOOP_TEST_KEY_THAT_IS_NEVER_SET".to_string();
        assert!(create_ranker(&config).unwrap().is_some());

        config.planner.oracle = RankerKind::None;
        assert!(create_ranker(&config).unwrap().is_none());

        config.planner.oracle = RankerKind::Llm;
        let err = create_ranker(&config).err().unwrap();
        assert!(err.to_string().contains("BUILDLOOP_TEST_KEY_THAT_IS_NEVER_SET"));
    }

    #[test]
    fn test_ranker_kind_serde() {
        let kind: RankerKind = serde_yaml::from_str("llm").unwrap();
        assert_eq!(kind, RankerKind::Llm);
        let kind: RankerKind = serde_yaml::from_str("none").unwrap();
        assert_eq!(kind, RankerKind::None);
    }
}
