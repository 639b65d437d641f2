//! Access tokens for collaborators
//!
//! Tokens are HS256-signed by the account service with the shared
//! `JWT_SECRET`. The collaboration socket only verifies them and turns the
//! claims into a viewer identity; signing is here for tooling and tests.

use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One day
const DEFAULT_TTL_MINUTES: i64 = 24 * 60;

const DEFAULT_ISSUER: &str = "collab-notes";

#[derive(Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub ttl: Duration,
    /// Tokens from any other issuer are refused
    pub issuer: String,
}

impl JwtConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            ttl: Duration::minutes(DEFAULT_TTL_MINUTES),
            issuer: DEFAULT_ISSUER.to_string(),
        }
    }

    /// `JWT_SECRET` is required; `JWT_TTL_MINUTES` and `JWT_ISSUER` are optional
    pub fn from_env() -> Result<Self, JwtError> {
        let secret = std::env::var("JWT_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or(JwtError::MissingSecret)?;
        let mut config = Self::new(secret);

        if let Some(minutes) = std::env::var("JWT_TTL_MINUTES")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config = config.ttl_minutes(minutes);
        }
        if let Ok(issuer) = std::env::var("JWT_ISSUER") {
            config = config.issuer(issuer);
        }
        Ok(config)
    }

    pub fn ttl_minutes(mut self, minutes: i64) -> Self {
        self.ttl = Duration::minutes(minutes);
        self
    }

    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("JWT_SECRET environment variable not set")]
    MissingSecret,

    #[error("Token signing failed: {0}")]
    Signing(String),

    #[error("Token expired")]
    Expired,

    /// Bad signature, foreign issuer or a subject that is not a user id
    #[error("Invalid token")]
    Invalid,

    #[error("Malformed token: {0}")]
    Malformed(String),
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => JwtError::Expired,
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm | ErrorKind::InvalidIssuer => {
                JwtError::Invalid
            }
            _ => JwtError::Malformed(err.to_string()),
        }
    }
}

/// Claims carried by an access token
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    /// Name shown to the other viewers of a note
    pub username: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

impl Claims {
    pub fn user_id(&self) -> Result<Uuid, JwtError> {
        Uuid::parse_str(&self.sub).map_err(|_| JwtError::Invalid)
    }
}

/// Signs and verifies access tokens
#[derive(Clone)]
pub struct JwtService {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtService {
    pub fn new(config: JwtConfig) -> Self {
        let mut validation = Validation::default();
        validation.set_issuer(&[&config.issuer]);
        validation.leeway = 0;

        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
            config,
        }
    }

    pub fn from_env() -> Result<Self, JwtError> {
        Ok(Self::new(JwtConfig::from_env()?))
    }

    /// Sign a token for `user_id`. Returns the token and its expiry as a
    /// Unix timestamp.
    pub fn generate_access_token(
        &self,
        user_id: Uuid,
        username: &str,
    ) -> Result<(String, i64), JwtError> {
        let now = Utc::now();
        let exp = (now + self.config.ttl).timestamp();

        let claims = Claims {
            sub: user_id.to_string(),
            username: username.to_string(),
            iat: now.timestamp(),
            exp,
            iss: self.config.issuer.clone(),
        };

        let token = encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| JwtError::Signing(e.to_string()))?;
        Ok((token, exp))
    }

    pub fn validate_access_token(&self, token: &str) -> Result<Claims, JwtError> {
        Ok(decode::<Claims>(token, &self.decoding_key, &self.validation)?.claims)
    }

    /// Verify a token and return the user id and display name it carries
    pub fn identify(&self, token: &str) -> Result<(Uuid, String), JwtError> {
        let claims = self.validate_access_token(token)?;
        let user_id = claims.user_id()?;
        Ok((user_id, claims.username))
    }
}
