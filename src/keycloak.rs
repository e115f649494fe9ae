use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Token endpoint rejected credentials: {status} - {message}")]
    Rejected { status: u16, message: String },
    #[error("Token response did not contain an access token")]
    MissingToken,
    #[error("HTTP client error: {0}")]
    Client(String),
}

/// Source of bearer tokens for the stream connection
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn fetch_token(&self) -> Result<SecretString, AuthError>;
}

#[derive(Debug)]
pub struct KeycloakConfig {
    pub token_endpoint: String,
    pub username: String,
    pub password: SecretString,
    pub client_id: String,
    pub scope: String,
}

impl KeycloakConfig {
    pub fn new(token_endpoint: String, username: String, password: SecretString) -> Self {
        Self {
            token_endpoint,
            username,
            password,
            client_id: "frontend".to_string(),
            scope: "openid".to_string(),
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

/// Password-grant client for a Keycloak token endpoint
pub struct KeycloakClient {
    client: Client,
    config: KeycloakConfig,
}

impl KeycloakClient {
    pub fn new(config: KeycloakConfig) -> Result<Self, AuthError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AuthError::Client(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn form(&self) -> [(&str, &str); 5] {
        [
            ("grant_type", "password"),
            ("scope", self.config.scope.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("username", self.config.username.as_str()),
            ("password", self.config.password.expose_secret()),
        ]
    }
}

#[async_trait]
impl TokenProvider for KeycloakClient {
    // TODO: cache the token until it expires and use the refresh token
    async fn fetch_token(&self) -> Result<SecretString, AuthError> {
        log::debug!("🔑 Requesting token from {}", self.config.token_endpoint);

        let response = self
            .client
            .post(&self.config.token_endpoint)
            .form(&self.form())
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let body: TokenResponse = response.json().await?;
        match body.access_token {
            Some(token) if !token.is_empty() => {
                log::info!("🔑 Obtained access token for {}", self.config.username);
                Ok(SecretString::from(token))
            }
            _ => Err(AuthError::MissingToken),
        }
    }
}
