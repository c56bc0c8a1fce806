//! Model parameter resolution per deployment tier and feature.
//!
//! Parameter tables are built once (either the compiled-in defaults or a
//! TOML override file) and handed to a [`ConfigResolver`]. Resolution is a
//! plain lookup: an exhaustive `match` over [`DeploymentTier`] with no
//! fall-through, returning a borrowed, immutable [`FeatureConfig`].
//!
//! # Override file format
//!
//! ```toml
//! [local.chat]
//! model = "gpt-4o-mini"
//! temperature = 0.7
//! max_tokens = 1000
//!
//! [local.evaluation]
//! # ...
//! ```
//!
//! Every tier needs all three features (`chat`, `evaluation`,
//! `note_summary`). Missing tables are a parse error.

use std::env::VarError;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AiError, Result};

/// Environment variable consulted by [`DeploymentTier::from_env`].
pub const TIER_ENV_VAR: &str = "STUDYLOG_TIER";

/// Inclusive sampling temperature range accepted by providers.
pub const TEMPERATURE_RANGE: (f32, f32) = (0.0, 2.0);

// ---------------------------------------------------------------------------
// Tiers & features
// ---------------------------------------------------------------------------

/// Environment class a request is served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentTier {
    /// Developer machine.
    Local,
    /// Pre-release environment.
    Staging,
    /// Live environment.
    Production,
}

impl DeploymentTier {
    /// All tiers.
    #[must_use]
    pub fn all() -> &'static [DeploymentTier] {
        &[Self::Local, Self::Staging, Self::Production]
    }

    /// Read the tier from [`TIER_ENV_VAR`], defaulting to `Local` when unset.
    ///
    /// # Errors
    ///
    /// Returns [`AiError::Config`] if the variable holds an unknown tier or
    /// is not valid Unicode.
    pub fn from_env() -> Result<Self> {
        Self::from_env_value(std::env::var(TIER_ENV_VAR))
    }

    fn from_env_value(value: std::result::Result<String, VarError>) -> Result<Self> {
        match value {
            Ok(value) => value.parse(),
            Err(VarError::NotPresent) => Ok(Self::Local),
            Err(VarError::NotUnicode(raw)) => Err(AiError::Config(format!(
                "{TIER_ENV_VAR} is not valid Unicode: {raw:?}"
            ))),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for DeploymentTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentTier {
    type Err = AiError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "local" => Ok(Self::Local),
            "staging" => Ok(Self::Staging),
            "production" => Ok(Self::Production),
            other => Err(AiError::Config(format!("unknown deployment tier: '{other}'"))),
        }
    }
}

/// A named model use case with its own parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Conversational tutoring chat.
    Chat,
    /// Grading of answers and exercises.
    Evaluation,
    /// Summaries of study notes.
    NoteSummary,
}

impl Feature {
    /// All features.
    #[must_use]
    pub fn all() -> &'static [Feature] {
        &[Self::Chat, Self::Evaluation, Self::NoteSummary]
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Chat => "chat",
            Self::Evaluation => "evaluation",
            Self::NoteSummary => "note_summary",
        };
        write!(f, "{name}")
    }
}

// ---------------------------------------------------------------------------
// Parameter tables
// ---------------------------------------------------------------------------

/// Sampling parameters for one model call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParameters {
    /// Provider model identifier.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Output token ceiling.
    pub max_tokens: u32,
}

impl ModelParameters {
    /// Build a parameter set.
    #[must_use]
    pub fn new(model: impl Into<String>, temperature: f32, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            temperature,
            max_tokens,
        }
    }

    fn validate(&self, tier: DeploymentTier, feature: Feature) -> Result<()> {
        let (lo, hi) = TEMPERATURE_RANGE;
        if self.model.trim().is_empty() {
            return Err(AiError::Config(format!("{tier}.{feature}: model must not be empty")));
        }
        if !(lo..=hi).contains(&self.temperature) {
            return Err(AiError::Config(format!(
                "{tier}.{feature}: temperature {} outside [{lo}, {hi}]",
                self.temperature
            )));
        }
        if self.max_tokens == 0 {
            return Err(AiError::Config(format!("{tier}.{feature}: max_tokens must be positive")));
        }
        Ok(())
    }
}

/// Parameters for every feature. All three keys always exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeatureConfig {
    /// Conversational chat.
    pub chat: ModelParameters,
    /// Evaluation / grading.
    pub evaluation: ModelParameters,
    /// Note summarization.
    #[serde(alias = "noteSummary")]
    pub note_summary: ModelParameters,
}

impl FeatureConfig {
    /// Parameters for one feature.
    #[must_use]
    pub fn get(&self, feature: Feature) -> &ModelParameters {
        match feature {
            Feature::Chat => &self.chat,
            Feature::Evaluation => &self.evaluation,
            Feature::NoteSummary => &self.note_summary,
        }
    }

    fn validate(&self, tier: DeploymentTier) -> Result<()> {
        for feature in Feature::all() {
            self.get(*feature).validate(tier, *feature)?;
        }
        Ok(())
    }
}

/// Per-tier parameter tables, loadable from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelTables {
    /// Local development tier.
    pub local: FeatureConfig,
    /// Staging tier.
    pub staging: FeatureConfig,
    /// Production tier.
    pub production: FeatureConfig,
}

impl ModelTables {
    /// Compiled-in tables.
    ///
    /// Local uses the economical model everywhere; staging and production
    /// share the hosted table.
    #[must_use]
    pub fn builtin() -> Self {
        let local = FeatureConfig {
            chat: ModelParameters::new("gpt-4o-mini", 0.7, 1000),
            evaluation: ModelParameters::new("gpt-4o-mini", 0.3, 2000),
            note_summary: ModelParameters::new("gpt-4o-mini", 0.5, 1500),
        };
        let hosted = FeatureConfig {
            chat: ModelParameters::new("gpt-4o", 0.7, 1000),
            evaluation: ModelParameters::new("gpt-4o", 0.3, 2000),
            note_summary: ModelParameters::new("gpt-4o", 0.5, 1500),
        };

        Self {
            local,
            staging: hosted.clone(),
            production: hosted,
        }
    }

    /// Load tables from a TOML string and validate every entry.
    ///
    /// # Errors
    /// Returns `AiError::Config` if the TOML is invalid, a tier or feature
    /// table is missing, or a value is out of range.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let tables: Self = toml::from_str(toml_str).map_err(|e| AiError::Config(e.to_string()))?;
        tables.validate()?;
        Ok(tables)
    }

    /// Load tables from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), "loading model tables");
        Self::from_toml(&content)
    }

    /// Check every tier and feature entry.
    ///
    /// # Errors
    /// Returns `AiError::Config` naming the first offending entry.
    pub fn validate(&self) -> Result<()> {
        self.local.validate(DeploymentTier::Local)?;
        self.staging.validate(DeploymentTier::Staging)?;
        self.production.validate(DeploymentTier::Production)
    }
}

impl Default for ModelTables {
    fn default() -> Self {
        Self::builtin()
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Pure lookup from tier to feature parameters over injected tables.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    tables: ModelTables,
}

static GLOBAL: LazyLock<ConfigResolver> = LazyLock::new(|| ConfigResolver::new(ModelTables::builtin()));

impl ConfigResolver {
    /// Build a resolver over the given tables.
    #[must_use]
    pub fn new(tables: ModelTables) -> Self {
        Self { tables }
    }

    /// Process-wide resolver over the built-in tables, constructed once.
    #[must_use]
    pub fn global() -> &'static ConfigResolver {
        &GLOBAL
    }

    /// Feature parameters for a tier.
    #[must_use]
    pub fn resolve(&self, tier: DeploymentTier) -> &FeatureConfig {
        match tier {
            DeploymentTier::Local => &self.tables.local,
            DeploymentTier::Staging => &self.tables.staging,
            DeploymentTier::Production => &self.tables.production,
        }
    }

    /// Parameters for one feature on one tier.
    #[must_use]
    pub fn params(&self, tier: DeploymentTier, feature: Feature) -> &ModelParameters {
        self.resolve(tier).get(feature)
    }

    /// The tables this resolver reads from.
    #[must_use]
    pub fn tables(&self) -> &ModelTables {
        &self.tables
    }
}

/// Resolve against the built-in tables.
#[must_use]
pub fn resolve(tier: DeploymentTier) -> &'static FeatureConfig {
    ConfigResolver::global().resolve(tier)
}
