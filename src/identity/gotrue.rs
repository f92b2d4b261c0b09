//! GoTrue-compatible hosted auth client.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{Account, AccountMetadata, IdentityProvider, OAuthProvider, Session, SignUp};
use crate::error::IdentityError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct UserBody {
    id: Uuid,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: Option<AccountMetadata>,
}

impl From<UserBody> for Account {
    fn from(body: UserBody) -> Self {
        Self {
            id: body.id,
            email: body.email.unwrap_or_default(),
            metadata: body.user_metadata.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SessionBody {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: UserBody,
}

impl From<SessionBody> for Session {
    fn from(body: SessionBody) -> Self {
        let expires_at = body
            .expires_at
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .unwrap_or_else(|| Utc::now() + chrono::Duration::seconds(body.expires_in.unwrap_or(3600)));
        Self {
            access_token: SecretString::from(body.access_token),
            refresh_token: SecretString::from(body.refresh_token),
            expires_at,
            account: body.user.into(),
        }
    }
}

/// Error bodies vary across GoTrue versions; take the first message field.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl ErrorBody {
    fn into_message(self) -> Option<String> {
        self.error_description
            .or(self.msg)
            .or(self.message)
            .or(self.error)
    }
}

/// HTTP client for a hosted GoTrue auth API (`{base}/auth/v1`).
pub struct GoTrueClient {
    http: Client,
    base_url: String,
    anon_key: SecretString,
}

impl GoTrueClient {
    /// Build a client for `base_url` (e.g. `https://xyz.supabase.co`).
    pub fn new(base_url: impl Into<String>, anon_key: SecretString) -> Result<Self, IdentityError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| IdentityError::Unavailable(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            anon_key,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1{}", self.base_url, path)
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header("apikey", self.anon_key.expose_secret())
    }

    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response, IdentityError> {
        let response = builder
            .send()
            .await
            .map_err(|e| IdentityError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status.is_server_error() {
            warn!(status = %status, "Identity provider server error");
            return Err(IdentityError::Unavailable(format!("HTTP {status}")));
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .ok()
            .and_then(ErrorBody::into_message)
            .unwrap_or_else(|| match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => "Not authorized".to_string(),
                _ => format!("Request failed with status {status}"),
            });
        debug!(status = %status, message = %message, "Identity provider rejected request");
        Err(IdentityError::Rejected { message })
    }

    async fn token_grant(
        &self,
        grant_type: &str,
        body: serde_json::Value,
    ) -> Result<Session, IdentityError> {
        let builder = self
            .http
            .post(self.endpoint("/token"))
            .query(&[("grant_type", grant_type)])
            .json(&body);
        let response = self.send(self.request(builder)).await?;
        let session: SessionBody = response
            .json()
            .await
            .map_err(|e| IdentityError::InvalidResponse(format!("token response: {e}")))?;
        Ok(session.into())
    }
}

#[async_trait]
impl IdentityProvider for GoTrueClient {
    fn name(&self) -> &str {
        "gotrue"
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &SecretString,
        metadata: AccountMetadata,
    ) -> Result<SignUp, IdentityError> {
        let builder = self.http.post(self.endpoint("/signup")).json(&json!({
            "email": email,
            "password": password.expose_secret(),
            "data": metadata,
        }));
        let response = self.send(self.request(builder)).await?;
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| IdentityError::InvalidResponse(format!("signup response: {e}")))?;

        // With autoconfirm on, signup answers with a full session; otherwise
        // it answers with the bare user awaiting email confirmation.
        if body.get("access_token").is_some() {
            let session: SessionBody = serde_json::from_value(body)
                .map_err(|e| IdentityError::InvalidResponse(format!("signup session: {e}")))?;
            let session: Session = session.into();
            Ok(SignUp {
                account: session.account.clone(),
                session: Some(session),
            })
        } else {
            let user: UserBody = serde_json::from_value(body)
                .map_err(|e| IdentityError::InvalidResponse(format!("signup user: {e}")))?;
            Ok(SignUp {
                account: user.into(),
                session: None,
            })
        }
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<Session, IdentityError> {
        self.token_grant(
            "password",
            json!({ "email": email, "password": password.expose_secret() }),
        )
        .await
    }

    fn authorize_url(
        &self,
        provider: OAuthProvider,
        redirect_to: &str,
        code_challenge: &str,
    ) -> Result<String, IdentityError> {
        let url = Url::parse_with_params(
            &self.endpoint("/authorize"),
            &[
                ("provider", provider.as_str()),
                ("redirect_to", redirect_to),
                ("code_challenge", code_challenge),
                ("code_challenge_method", "plain"),
            ],
        )
        .map_err(|e| IdentityError::InvalidResponse(format!("authorize url: {e}")))?;
        Ok(url.to_string())
    }

    async fn exchange_code_for_session(
        &self,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<Session, IdentityError> {
        self.token_grant(
            "pkce",
            json!({ "auth_code": code, "code_verifier": code_verifier.unwrap_or_default() }),
        )
        .await
    }

    async fn get_user(&self, access_token: &SecretString) -> Result<Account, IdentityError> {
        let builder = self
            .http
            .get(self.endpoint("/user"))
            .bearer_auth(access_token.expose_secret());
        let response = self.send(self.request(builder)).await?;
        let user: UserBody = response
            .json()
            .await
            .map_err(|e| IdentityError::InvalidResponse(format!("user response: {e}")))?;
        Ok(user.into())
    }

    async fn refresh_session(&self, refresh_token: &SecretString) -> Result<Session, IdentityError> {
        self.token_grant(
            "refresh_token",
            json!({ "refresh_token": refresh_token.expose_secret() }),
        )
        .await
    }

    async fn sign_out(&self, access_token: &SecretString) -> Result<(), IdentityError> {
        let builder = self
            .http
            .post(self.endpoint("/logout"))
            .bearer_auth(access_token.expose_secret());
        self.send(self.request(builder)).await?;
        Ok(())
    }
}
