//! Bearer-token verification against the identity provider.
//!
//! Tokens are checked with the `accounts:lookup` REST endpoint; the caller's
//! principal is the account's `localId`.

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

const LOOKUP_URL: &str = "https://identitytoolkit.googleapis.com/v1/accounts:lookup";

/// Principal recorded on uploads when anonymous uploads are allowed.
pub const ANONYMOUS: &str = "anonymous";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("No auth token provided")]
    Unauthorized,
    #[error("Invalid auth token")]
    InvalidToken,
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Unauthorized => "UNAUTHORIZED",
            AuthError::InvalidToken => "INVALID_TOKEN",
        }
    }
}

#[derive(Clone)]
pub struct IdentityVerifier {
    client: Client,
    api_key: Option<String>,
    allow_anonymous: bool,
}

impl IdentityVerifier {
    pub fn new(api_key: Option<String>, allow_anonymous: bool) -> Self {
        Self {
            client: Client::new(),
            api_key,
            allow_anonymous,
        }
    }

    /// Resolve the principal for an `Authorization` header value.
    pub async fn verify(&self, authorization: Option<&str>) -> Result<String, AuthError> {
        let Some(api_key) = self.api_key.as_deref() else {
            if self.allow_anonymous {
                return Ok(ANONYMOUS.to_string());
            }
            return match authorization.and_then(bearer_token) {
                Some(_) => Err(AuthError::InvalidToken),
                None => Err(AuthError::Unauthorized),
            };
        };

        let token = authorization
            .and_then(bearer_token)
            .ok_or(AuthError::Unauthorized)?;

        match self.lookup(api_key, token).await {
            Ok(Some(uid)) => {
                debug!("Verified token for {}", uid);
                Ok(uid)
            }
            Ok(None) => Err(AuthError::InvalidToken),
            Err(e) => {
                warn!("Token lookup failed: {:#}", e);
                Err(AuthError::InvalidToken)
            }
        }
    }

    async fn lookup(&self, api_key: &str, token: &str) -> anyhow::Result<Option<String>> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct LookupUser {
            local_id: String,
        }

        #[derive(Deserialize)]
        struct LookupResponse {
            #[serde(default)]
            users: Vec<LookupUser>,
        }

        let resp = self
            .client
            .post(LOOKUP_URL)
            .query(&[("key", api_key)])
            .json(&json!({ "idToken": token }))
            .send()
            .await?;

        if !resp.status().is_success() {
            debug!("accounts:lookup rejected token: {}", resp.status());
            return Ok(None);
        }

        let body: LookupResponse = resp.json().await?;
        Ok(body.users.into_iter().next().map(|u| u.local_id))
    }
}

/// Token from a `Bearer <token>` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token("Bearer abc.def"), Some("abc.def"));
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("Basic abc"), None);
    }

    #[tokio::test]
    async fn test_anonymous_policy() {
        let open = IdentityVerifier::new(None, true);
        assert_eq!(open.verify(None).await.unwrap(), ANONYMOUS);

        let closed = IdentityVerifier::new(None, false);
        assert_eq!(closed.verify(None).await, Err(AuthError::Unauthorized));
        assert_eq!(
            closed.verify(Some("Bearer token")).await,
            Err(AuthError::InvalidToken)
        );
    }

    #[tokio::test]
    async fn test_missing_token_with_api_key() {
        let verifier = IdentityVerifier::new(Some("key".into()), false);
        let err = verifier.verify(Some("Token xyz")).await.unwrap_err();
        assert_eq!(err.code(), "UNAUTHORIZED");
    }
}
