//! Runtime configuration.
//!
//! An optional YAML file named by `COUNCIL_CONFIG` forms the base layer and
//! environment variables override it field by field.

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::council::{Council, CouncilSettings, DEBATE_ROUNDS};
use crate::error::{CouncilError, Result};
use crate::gateway::{DeviceProfile, Gateway};
use crate::oracle::{GeminiOracle, Oracle};
use crate::storage::{FallbackBackend, LocalBackend, PersistenceBackend, RemoteBackend};

pub const CONFIG_PATH_VAR: &str = "COUNCIL_CONFIG";
const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Gemini,
    OpenRouter,
}

impl FromStr for Provider {
    type Err = CouncilError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "gemini" => Ok(Provider::Gemini),
            "openrouter" => Ok(Provider::OpenRouter),
            other => Err(CouncilError::Configuration(format!(
                "unknown provider '{}', expected gemini or openrouter",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub fast: String,
    pub pro: String,
    pub fast_doctor: String,
    pub drug: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        let settings = CouncilSettings::default();
        Self {
            fast: settings.fast_model,
            pro: settings.pro_model,
            fast_doctor: settings.fast_doctor_model,
            drug: settings.drug_model,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CouncilConfig {
    pub provider: Provider,
    pub gemini_api_key: Option<String>,
    pub gemini_base_url: Option<String>,
    pub openrouter_api_key: Option<String>,
    pub port: u16,
    pub remote_url: Option<String>,
    pub remote_token: Option<String>,
    pub device_profile: DeviceProfile,
    pub debate_rounds: usize,
    pub models: ModelConfig,
}

impl Default for CouncilConfig {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            gemini_api_key: None,
            gemini_base_url: None,
            openrouter_api_key: None,
            port: DEFAULT_PORT,
            remote_url: None,
            remote_token: None,
            device_profile: DeviceProfile::default(),
            debate_rounds: DEBATE_ROUNDS,
            models: ModelConfig::default(),
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl CouncilConfig {
    /// Loads the YAML base (if `COUNCIL_CONFIG` is set) and applies the
    /// process environment on top
    pub fn from_env() -> Result<Self> {
        Self::load(|key| std::env::var(key).ok())
    }

    pub fn load<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base = match non_blank(lookup(CONFIG_PATH_VAR)) {
            Some(path) => {
                info!(path = %path, "Loading council configuration file");
                let raw = std::fs::read_to_string(&path).map_err(|e| {
                    CouncilError::Configuration(format!("cannot read {}: {}", path, e))
                })?;
                Self::from_yaml(&raw)?
            }
            None => Self::default(),
        };
        let config = base.with_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw)
            .map_err(|e| CouncilError::Configuration(format!("invalid YAML configuration: {}", e)))
    }

    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| non_blank(lookup(key));

        if let Some(provider) = var("COUNCIL_PROVIDER") {
            self.provider = provider.parse()?;
        }
        if let Some(key) = var("GEMINI_API_KEY") {
            self.gemini_api_key = Some(key);
        }
        if let Some(url) = var("GEMINI_BASE_URL") {
            self.gemini_base_url = Some(url);
        }
        if let Some(key) = var("OPENROUTER_API_KEY") {
            self.openrouter_api_key = Some(key);
        }
        if let Some(port) = var("PORT") {
            self.port = port
                .parse()
                .map_err(|_| CouncilError::Configuration(format!("invalid PORT '{}'", port)))?;
        }
        if let Some(url) = var("COUNCIL_REMOTE_URL") {
            self.remote_url = Some(url);
        }
        if let Some(token) = var("COUNCIL_REMOTE_TOKEN") {
            self.remote_token = Some(token);
        }
        if let Some(profile) = var("COUNCIL_DEVICE_PROFILE") {
            self.device_profile = profile.parse()?;
        }
        if let Some(rounds) = var("COUNCIL_DEBATE_ROUNDS") {
            self.debate_rounds = rounds.parse().map_err(|_| {
                CouncilError::Configuration(format!("invalid COUNCIL_DEBATE_ROUNDS '{}'", rounds))
            })?;
        }
        if let Some(model) = var("COUNCIL_FAST_MODEL") {
            self.models.fast = model;
        }
        if let Some(model) = var("COUNCIL_PRO_MODEL") {
            self.models.pro = model;
        }
        if let Some(model) = var("COUNCIL_FAST_DOCTOR_MODEL") {
            self.models.fast_doctor = model;
        }
        if let Some(model) = var("COUNCIL_DRUG_MODEL") {
            self.models.drug = model;
        }
        Ok(self)
    }

    /// The selected provider must have a key
    pub fn validate(&self) -> Result<()> {
        if self.debate_rounds == 0 {
            return Err(CouncilError::Configuration(
                "debate_rounds must be at least 1".to_string(),
            ));
        }
        self.api_key().map(|_| ())
    }

    fn api_key(&self) -> Result<&str> {
        let (key, var) = match self.provider {
            Provider::Gemini => (&self.gemini_api_key, "GEMINI_API_KEY"),
            Provider::OpenRouter => (&self.openrouter_api_key, "OPENROUTER_API_KEY"),
        };
        key.as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| CouncilError::Configuration(format!("{} not set", var)))
    }

    pub fn build_oracle(&self) -> Result<Arc<dyn Oracle>> {
        let key = self.api_key()?;
        match self.provider {
            Provider::Gemini => {
                let mut oracle = GeminiOracle::new(key);
                if let Some(url) = &self.gemini_base_url {
                    oracle = oracle.with_base_url(url.as_str());
                }
                Ok(Arc::new(oracle))
            }
            #[cfg(feature = "rig")]
            Provider::OpenRouter => Ok(Arc::new(crate::oracle::RigOracle::new(key))),
            #[cfg(not(feature = "rig"))]
            Provider::OpenRouter => Err(CouncilError::Configuration(
                "the openrouter provider requires the `rig` feature".to_string(),
            )),
        }
    }

    pub fn build_gateway(&self) -> Result<Gateway> {
        Ok(Gateway::new(self.build_oracle()?).with_profile(self.device_profile))
    }

    /// Remote store with local fallback when a remote URL is configured,
    /// otherwise the in-process store alone
    pub fn build_persistence(&self) -> Arc<dyn PersistenceBackend> {
        let local: Arc<dyn PersistenceBackend> = Arc::new(LocalBackend::new());
        match &self.remote_url {
            Some(url) => {
                info!(remote = %url, "Using remote persistence with local fallback");
                let mut remote = RemoteBackend::new(url.as_str());
                if let Some(token) = &self.remote_token {
                    remote = remote.with_token(token.as_str());
                }
                Arc::new(FallbackBackend::new(Arc::new(remote), local))
            }
            None => {
                info!("Using in-memory persistence (set COUNCIL_REMOTE_URL for remote storage)");
                local
            }
        }
    }

    pub fn council_settings(&self) -> CouncilSettings {
        CouncilSettings {
            fast_model: self.models.fast.clone(),
            pro_model: self.models.pro.clone(),
            fast_doctor_model: self.models.fast_doctor.clone(),
            drug_model: self.models.drug.clone(),
            debate_rounds: self.debate_rounds,
            ..CouncilSettings::default()
        }
    }

    pub fn build_council(&self, cases: Arc<dyn PersistenceBackend>) -> Result<Council> {
        Ok(Council::new(self.build_gateway()?, cases).with_settings(self.council_settings()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_missing_key_is_configuration_error() {
        let result = CouncilConfig::load(env(&[]));
        match result {
            Err(CouncilError::Configuration(message)) => assert!(message.contains("GEMINI_API_KEY")),
            other => panic!("expected configuration error, got {:?}", other.map(|_| ())),
        }

        let result = CouncilConfig::load(env(&[
            ("COUNCIL_PROVIDER", "openrouter"),
            ("GEMINI_API_KEY", "g-key"),
        ]));
        assert!(matches!(result, Err(CouncilError::Configuration(m)) if m.contains("OPENROUTER_API_KEY")));
    }

    #[test]
    fn test_env_overrides() {
        let config = CouncilConfig::load(env(&[
            ("GEMINI_API_KEY", "g-key"),
            ("PORT", "8080"),
            ("COUNCIL_DEVICE_PROFILE", "Mobile"),
            ("COUNCIL_PRO_MODEL", "gemini-2.5-pro"),
            ("COUNCIL_REMOTE_URL", "   "),
        ]))
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.device_profile, DeviceProfile::Mobile);
        assert_eq!(config.remote_url, None);

        let settings = config.council_settings();
        assert_eq!(settings.pro_model, "gemini-2.5-pro");
        assert_eq!(settings.fast_model, "gemini-3-flash-preview");
        assert_eq!(settings.debate_rounds, DEBATE_ROUNDS);
    }

    #[test]
    fn test_yaml_base_layer() {
        let yaml = r#"
provider: openrouter
openrouter_api_key: from-file
debate_rounds: 2
models:
  fast: openai/gpt-4o-mini
"#;
        let config = CouncilConfig::from_yaml(yaml)
            .unwrap()
            .with_overrides(env(&[("OPENROUTER_API_KEY", "from-env")]))
            .unwrap();

        assert_eq!(config.provider, Provider::OpenRouter);
        assert_eq!(config.openrouter_api_key.as_deref(), Some("from-env"));
        assert_eq!(config.debate_rounds, 2);
        assert_eq!(config.models.fast, "openai/gpt-4o-mini");
        assert_eq!(config.models.drug, "gemini-2.5-flash");
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(CouncilConfig::load(env(&[("GEMINI_API_KEY", "k"), ("PORT", "http")])).is_err());
        assert!(CouncilConfig::load(env(&[("GEMINI_API_KEY", "k"), ("COUNCIL_PROVIDER", "azure")])).is_err());
        assert!(CouncilConfig::from_yaml("debate_rounds: [1").is_err());
    }

    #[test]
    fn test_gemini_oracle_built_from_key() {
        let config = CouncilConfig::load(env(&[("GEMINI_API_KEY", "k")])).unwrap();
        assert!(config.build_oracle().is_ok());
        assert_eq!(config.build_gateway().unwrap().profile(), DeviceProfile::Desktop);
    }
}
