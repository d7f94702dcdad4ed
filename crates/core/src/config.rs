use crate::error::ConfigError;
use std::path::PathBuf;
use url::Url;

pub const DEFAULT_LOCAL_MODEL: &str = "char-ngram";
pub const DEFAULT_HOSTED_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct Settings {
    /// `local` or `openai`.
    pub embedding_provider: String,
    pub embedding_model: String,
    /// `none` or `openai`.
    pub llm_provider: String,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub chat_model: String,
    pub top_k: usize,
    pub max_context_chars: usize,
    pub index_dir: PathBuf,
    pub samples_dir: PathBuf,
    pub batch_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            embedding_provider: "local".to_string(),
            embedding_model: DEFAULT_LOCAL_MODEL.to_string(),
            llm_provider: "none".to_string(),
            openai_api_key: String::new(),
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            chat_model: "gpt-4o-mini".to_string(),
            top_k: 5,
            max_context_chars: 6_000,
            index_dir: PathBuf::from("data/index"),
            samples_dir: PathBuf::from("data/samples"),
            batch_size: 48,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("top_k", self.top_k),
            ("max_context_chars", self.max_context_chars),
            ("batch_size", self.batch_size),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key,
                    details: "must be positive".to_string(),
                });
            }
        }

        Url::parse(&self.openai_base_url).map_err(|error| ConfigError::InvalidValue {
            key: "openai_base_url",
            details: error.to_string(),
        })?;

        Ok(())
    }

    /// The API key, or `None` when it is blank.
    pub fn api_key(&self) -> Option<&str> {
        let key = self.openai_api_key.trim();
        if key.is_empty() {
            None
        } else {
            Some(key)
        }
    }

    pub fn llm_enabled(&self) -> bool {
        self.llm_provider.trim().eq_ignore_ascii_case("openai") && self.api_key().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert!(!settings.llm_enabled());
    }

    #[test]
    fn zero_values_are_rejected() {
        let settings = Settings {
            top_k: 0,
            ..Settings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidValue { key: "top_k", .. })
        ));
    }

    #[test]
    fn malformed_base_url_is_rejected() {
        let settings = Settings {
            openai_base_url: "not a url".to_string(),
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn llm_needs_provider_and_key() {
        let settings = Settings {
            llm_provider: "OpenAI".to_string(),
            openai_api_key: "   ".to_string(),
            ..Settings::default()
        };
        assert!(!settings.llm_enabled());

        let settings = Settings {
            openai_api_key: "sk-test".to_string(),
            ..settings
        };
        assert!(settings.llm_enabled());
    }
}
