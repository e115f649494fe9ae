use crate::keycloak::KeycloakConfig;
use secrecy::{ExposeSecret, SecretString};
use std::env;
use thiserror::Error;
use url::Url;

pub const DEFAULT_API_URL: &str = "wss://ingress.aigent.ai/connector";
pub const DEFAULT_AUDIO_FILE: &str = "audio-file/sentences.wav";
pub const DEFAULT_CLIENT_ID: &str = "frontend";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid value for {var}: {reason}")]
    InvalidValue { var: String, reason: String },
}

/// Settings for one streaming run
#[derive(Debug)]
pub struct AppConfig {
    pub keycloak_username: String,
    pub keycloak_password: SecretString,
    pub keycloak_token_endpoint: String,
    pub keycloak_client_id: String,
    pub api_url: String,
    pub audio_file: String,
}

impl AppConfig {
    /// Load configuration from environment variables (and `.env`, if present)
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (for development)
        dotenvy::dotenv().ok();

        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Build configuration from any variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |var: &str| -> Result<String, ConfigError> {
            match lookup(var) {
                Some(value) if !value.trim().is_empty() => Ok(value),
                _ => Err(ConfigError::MissingEnvVar(var.to_string())),
            }
        };
        let optional = |var: &str, default: &str| -> String {
            lookup(var)
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let keycloak_username = required("KEYCLOAK_SERVICE_USERNAME")?;
        let keycloak_password = SecretString::from(required("KEYCLOAK_SERVICE_PASSWORD")?);
        let keycloak_token_endpoint = required("KEYCLOAK_TOKEN_ENDPOINT")?;
        Self::validate_url(
            "KEYCLOAK_TOKEN_ENDPOINT",
            &keycloak_token_endpoint,
            &["http", "https"],
        )?;

        let api_url = optional("AIGENT_API_URL", DEFAULT_API_URL);
        Self::validate_url("AIGENT_API_URL", &api_url, &["ws", "wss"])?;

        Ok(Self {
            keycloak_username,
            keycloak_password,
            keycloak_token_endpoint,
            keycloak_client_id: optional("KEYCLOAK_CLIENT_ID", DEFAULT_CLIENT_ID),
            api_url,
            audio_file: optional("AUDIO_FILE", DEFAULT_AUDIO_FILE),
        })
    }

    fn validate_url(var: &str, value: &str, schemes: &[&str]) -> Result<(), ConfigError> {
        let url = Url::parse(value).map_err(|e| ConfigError::InvalidValue {
            var: var.to_string(),
            reason: e.to_string(),
        })?;

        if !schemes.contains(&url.scheme()) {
            return Err(ConfigError::InvalidValue {
                var: var.to_string(),
                reason: format!("scheme must be one of {:?}, got '{}'", schemes, url.scheme()),
            });
        }
        Ok(())
    }

    /// Credential provider settings
    pub fn keycloak(&self) -> KeycloakConfig {
        let mut config = KeycloakConfig::new(
            self.keycloak_token_endpoint.clone(),
            self.keycloak_username.clone(),
            SecretString::from(self.keycloak_password.expose_secret().to_string()),
        );
        config.client_id = self.keycloak_client_id.clone();
        config
    }
}

/// Load configuration with helpful error messages for development
pub fn load_config() -> Result<AppConfig, ConfigError> {
    match AppConfig::load() {
        Ok(config) => {
            log::info!("Successfully loaded configuration");
            Ok(config)
        }
        Err(ConfigError::MissingEnvVar(var)) => {
            log::error!("Missing required environment variable: {}", var);
            log::error!("Create a .env file in the project root with:");
            log::error!("{}=...", var);
            Err(ConfigError::MissingEnvVar(var))
        }
        Err(e) => {
            log::error!("Configuration error: {}", e);
            Err(e)
        }
    }
}
