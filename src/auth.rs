use std::sync::Arc;

use axum::async_trait;
use axum::extract::{Extension, FromRequest, RequestParts, TypedHeader};
use axum::headers::authorization::Bearer;
use axum::headers::Authorization;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::clock::Clock;
use crate::credentials::Credentials;
use crate::err::Error;
use crate::models::{Session, UserSummary};
use crate::store::SessionStore;
use crate::token::{Claims, TokenError, TokenSigner};
use crate::AppState;

pub const DEFAULT_SESSION_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResult {
    Success(UserSummary),
    SessionExpired,
    InvalidSession,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggedIn {
    pub user: UserSummary,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Issues, validates and revokes login sessions.
///
/// A session is live while its signed token verifies *and* its row is still
/// stored with `expires_at` in the future. Deleting the row revokes the
/// token immediately even though the signature stays valid.
pub struct SessionAuthority {
    credentials: Arc<Credentials>,
    sessions: Arc<dyn SessionStore>,
    signer: TokenSigner,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl SessionAuthority {
    pub fn new(
        credentials: Arc<Credentials>,
        sessions: Arc<dyn SessionStore>,
        signer: TokenSigner,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        Self {
            credentials,
            sessions,
            signer,
            clock,
            ttl,
        }
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<LoggedIn, Error> {
        if username.is_empty() || password.is_empty() {
            return Err(Error::validation("Username and password are required"));
        }

        let user = match self.credentials.authenticate(username, password).await? {
            Some(user) => user,
            None => {
                log::warn!("Rejected login attempt");
                return Err(Error::InvalidCredentials);
            }
        };

        let issued_at = self.clock.now_utc();
        let expires_at = issued_at + self.ttl;
        let claims = Claims::new(user.id, &user.username, user.role, issued_at, expires_at);
        let token = self.signer.sign(&claims)?;

        self.sessions
            .insert_session(&Session {
                token: token.clone(),
                user_id: user.id,
                issued_at,
                expires_at,
            })
            .await?;
        log::info!("User `{}` logged in", user.username);

        Ok(LoggedIn {
            user: user.summary(),
            token,
            expires_at,
        })
    }

    pub async fn validate(&self, token: &str) -> Result<AuthResult, Error> {
        if token.is_empty() {
            return Ok(AuthResult::InvalidSession);
        }
        let now = self.clock.now_utc();

        match self.signer.verify(token, now) {
            Ok(_) => {}
            Err(TokenError::Expired) => return Ok(AuthResult::SessionExpired),
            Err(TokenError::InvalidKey) => return Err(TokenError::InvalidKey.into()),
            Err(_) => return Ok(AuthResult::InvalidSession),
        }

        // The user is read back from the store, never from the token claims.
        match self.sessions.find_live_session(token, now).await? {
            Some((_, user)) => Ok(AuthResult::Success(user.summary())),
            None => Ok(AuthResult::InvalidSession),
        }
    }

    /// Deleting a token that does not exist is not an error.
    pub async fn logout(&self, token: &str) -> Result<(), Error> {
        if self.sessions.delete_session(token).await? {
            log::info!("Session revoked");
        }
        Ok(())
    }

    pub async fn purge_expired(&self) -> Result<u64, Error> {
        self.sessions.purge_expired(self.clock.now_utc()).await
    }
}

/// Bearer token taken from the `Authorization` header.
pub struct BearerToken(pub String);

#[async_trait]
impl<B: Send> FromRequest<B> for BearerToken {
    type Rejection = Error;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request(req)
                .await
                .map_err(|_| Error::Unauthorized)?;
        Ok(BearerToken(bearer.token().to_string()))
    }
}

/// Extractor for handlers that require a live session.
pub struct Authenticated(pub UserSummary);

#[async_trait]
impl<B: Send> FromRequest<B> for Authenticated {
    type Rejection = Error;

    async fn from_request(req: &mut RequestParts<B>) -> Result<Self, Self::Rejection> {
        let BearerToken(token) = BearerToken::from_request(req).await?;
        let Extension(state) = Extension::<AppState>::from_request(req)
            .await
            .map_err(|_| Error::internal("MissingState", "application state is not installed"))?;

        match state.sessions.validate(&token).await? {
            AuthResult::Success(user) => Ok(Authenticated(user)),
            AuthResult::SessionExpired => {
                log::warn!("Rejected expired session");
                Err(Error::Unauthorized)
            }
            AuthResult::InvalidSession => {
                log::warn!("Rejected invalid session");
                Err(Error::Unauthorized)
            }
        }
    }
}
