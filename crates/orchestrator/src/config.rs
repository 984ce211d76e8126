//! Process-start configuration loader (§6: "loaded from environment at process
//! start and immutable thereafter"). Modeled on the pack's `ConfigLoader`
//! trait-plus-`parse_env_var` pattern rather than pulling in the `config` crate.

use std::time::Duration;

use thiserror::Error;

use candidate_sourcer::SourcerConfig;
use reranker::RerankerConfig;
use scoring_context::ScoringContextConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} must be set")]
    Missing { key: &'static str },
    #[error("failed to parse {key}: {source}")]
    Invalid { key: &'static str, source: Box<dyn std::error::Error + Send + Sync> },
}

fn parse_env_var<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw.parse::<T>().map_err(|e| ConfigError::Invalid { key, source: Box::new(e) }),
        Err(_) => Ok(default),
    }
}

fn required_env_var<T>(key: &'static str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = std::env::var(key).map_err(|_| ConfigError::Missing { key })?;
    raw.parse::<T>().map_err(|e| ConfigError::Invalid { key, source: Box::new(e) })
}

/// Every environment-configurable knob named in §6, loaded once at process
/// start. Sub-crate configs (`ScoringContextConfig`, `SourcerConfig`,
/// `RerankerConfig`) are assembled here so a caller only has one entry point.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// No default: a dimension mismatch against the deployed `vector(D)`
    /// schema is a deploy-configuration bug, not a runtime condition.
    pub embedding_dimension: usize,
    pub neutral_rating_weight: f32,
    pub scoring_context: ScoringContextConfig,
    pub sourcer: SourcerConfig,
    pub reranker: RerankerConfig,
    /// Candidates fetched for `Similar` before optional reranking.
    pub sim_candidates_k: usize,
    /// Final result size for `Similar`.
    pub sim_top_n: usize,
    /// When false, `Similar` returns vector-index order (ascending distance)
    /// without running the full reranker.
    pub sim_rerank_enabled: bool,
    /// Default deadline for orchestrator operations when the caller doesn't
    /// supply one explicitly (§5: "each request carries a deadline").
    pub request_timeout: Duration,
}

impl Config {
    /// Loads `.env` (if present) then reads every variable named in §6.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let neutral_rating_weight = parse_env_var("NEUTRAL_RATING_WEIGHT", 0.2f32)?;
        let dislike_weight = parse_env_var("DISLIKE_WEIGHT", 0.35f64)?;
        let dislike_min_count = parse_env_var("DISLIKE_MIN_COUNT", 3usize)?;
        let scoring_context_limit = parse_env_var("SCORING_CONTEXT_LIMIT", 50usize)?;
        let rerank_fetch_multiplier = parse_env_var("RERANK_FETCH_MULTIPLIER", 5usize)?;
        let max_fetch_candidates = parse_env_var("MAX_FETCH_CANDIDATES", 500usize)?;
        let max_scoring_genres = parse_env_var("MAX_SCORING_GENRES", 5usize)?;
        let max_scoring_keywords = parse_env_var("MAX_SCORING_KEYWORDS", 5usize)?;
        let sim_candidates_k = parse_env_var("SIM_CANDIDATES_K", 100usize)?;
        let sim_top_n = parse_env_var("SIM_TOP_N", 20usize)?;
        let sim_rerank_enabled = parse_env_var("SIM_RERANK_ENABLED", true)?;
        let request_timeout_secs = parse_env_var("REQUEST_TIMEOUT_SECS", 5u64)?;

        Ok(Self {
            database_url: required_env_var("DATABASE_URL")?,
            embedding_dimension: required_env_var("EMBEDDING_DIMENSION")?,
            neutral_rating_weight,
            scoring_context: ScoringContextConfig {
                scoring_context_limit,
                max_scoring_genres,
                max_scoring_keywords,
            },
            sourcer: SourcerConfig { rerank_fetch_multiplier, max_fetch_candidates },
            reranker: RerankerConfig { dislike_weight, dislike_min_count },
            sim_candidates_k,
            sim_top_n,
            sim_rerank_enabled,
            request_timeout: Duration::from_secs(request_timeout_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn set(key: &str, value: &str) {
        std::env::set_var(key, value);
    }
    fn clear(key: &str) {
        std::env::remove_var(key);
    }

    #[test]
    fn from_env_applies_defaults_when_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        set("DATABASE_URL", "postgres://localhost/taste_kid");
        set("EMBEDDING_DIMENSION", "768");
        clear("NEUTRAL_RATING_WEIGHT");
        clear("DISLIKE_WEIGHT");

        let config = Config::from_env().unwrap();
        assert_eq!(config.embedding_dimension, 768);
        assert_eq!(config.neutral_rating_weight, 0.2);
        assert_eq!(config.reranker.dislike_weight, 0.35);
        assert_eq!(config.reranker.dislike_min_count, 3);

        clear("DATABASE_URL");
        clear("EMBEDDING_DIMENSION");
    }

    #[test]
    fn from_env_fails_without_required_database_url() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear("DATABASE_URL");
        clear("EMBEDDING_DIMENSION");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing { key: "DATABASE_URL" }));
    }

    #[test]
    fn from_env_respects_overrides() {
        let _guard = ENV_LOCK.lock().unwrap();
        set("DATABASE_URL", "postgres://localhost/taste_kid");
        set("EMBEDDING_DIMENSION", "1024");
        set("SIM_TOP_N", "10");

        let config = Config::from_env().unwrap();
        assert_eq!(config.embedding_dimension, 1024);
        assert_eq!(config.sim_top_n, 10);

        clear("DATABASE_URL");
        clear("EMBEDDING_DIMENSION");
        clear("SIM_TOP_N");
    }
}
