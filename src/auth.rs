use chrono::Utc;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use log::{debug, error};
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::srp::{PasswordVerifier, SrpClient};
use crate::types::{
    AuthenticationResult, AwsErrorResponse, GlobalSignOutRequest, InitiateAuthRequest,
    InitiateAuthResponse, RespondToAuthChallengeRequest,
};

const IDP_TARGET_PREFIX: &str = "AWSCognitoIdentityProviderService";
const AWS_JSON: &str = "application/x-amz-json-1.1";

/// Refresh access tokens this many seconds before they actually expire.
pub const TOKEN_EXPIRY_BUFFER_SECS: u64 = 60;

/// The Cognito token triple. Either all three are present or there is no
/// `TokenSet` at all.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub id_token: String,
    pub refresh_token: String,
}

// Hide token values in Debug output
impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"[REDACTED]")
            .field("id_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated(TokenSet),
    LoggedOut,
}

/// A signed-in (or not yet / no longer signed-in) Pentair identity.
#[derive(Debug, Clone)]
pub struct Session {
    username: Option<String>,
    state: SessionState,
}

impl Session {
    pub fn new(username: Option<String>) -> Self {
        Self {
            username,
            state: SessionState::Unauthenticated,
        }
    }

    /// Wrap previously issued tokens without checking them.
    pub fn from_tokens(tokens: TokenSet) -> Self {
        Self {
            username: None,
            state: SessionState::Authenticated(tokens),
        }
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.tokens().is_some()
    }

    /// The current token triple, or `None` unless authenticated with a
    /// non-empty access token.
    pub fn tokens(&self) -> Option<&TokenSet> {
        match &self.state {
            SessionState::Authenticated(tokens) if !tokens.access_token.is_empty() => Some(tokens),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExpiryClaims {
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct CognitoClaims {
    token_use: Option<String>,
    client_id: Option<String>,
}

/// Read the `exp` claim of a JWT without verifying its signature.
pub fn token_expiry(token: &str) -> Result<i64> {
    let mut validation = Validation::new(Algorithm::RS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;

    decode::<ExpiryClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims.exp)
        .map_err(|e| Error::auth_from("Malformed token", e))
}

/// Check if a JWT is expired or will expire within `buffer_seconds`.
/// Tokens that cannot be parsed count as expired.
pub fn is_token_expired(token: &str, buffer_seconds: u64) -> bool {
    match token_expiry(token) {
        Ok(exp) => Utc::now().timestamp() + buffer_seconds as i64 >= exp,
        Err(_) => true,
    }
}

/// POST an AWS JSON 1.1 action to a Cognito endpoint. Every failure,
/// transport included, is an authentication error.
pub(crate) async fn cognito_call<B, T>(
    http: &reqwest::Client,
    url: &str,
    target: &str,
    body: &B,
) -> Result<T>
where
    B: Serialize,
    T: DeserializeOwned,
{
    debug!("Calling {} at {}", target, url);

    let response = http
        .post(url)
        .header("X-Amz-Target", target)
        .header(CONTENT_TYPE, AWS_JSON)
        .body(serde_json::to_vec(body)?)
        .send()
        .await
        .map_err(|e| Error::auth_from(format!("{} request failed", target), e))?;

    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| Error::auth_from(format!("{} response could not be read", target), e))?;

    if status.is_success() {
        serde_json::from_str(&text)
            .map_err(|e| Error::auth_from(format!("Unexpected {} response", target), e))
    } else {
        let description = serde_json::from_str::<AwsErrorResponse>(&text)
            .map(|err| err.describe())
            .unwrap_or_else(|_| format!("status {}", status));
        debug!("{} failed: {}", target, description);
        Err(Error::auth(description))
    }
}

/// Signs users in to the Cognito user pool and keeps their tokens fresh.
pub struct Authenticator {
    http: reqwest::Client,
    config: ClientConfig,
}

impl Authenticator {
    pub fn new(http: reqwest::Client, config: ClientConfig) -> Self {
        Self { http, config }
    }

    async fn call<B: Serialize, T: DeserializeOwned>(&self, action: &str, body: &B) -> Result<T> {
        cognito_call(
            &self.http,
            &self.config.cognito_idp_url,
            &format!("{}.{}", IDP_TARGET_PREFIX, action),
            body,
        )
        .await
    }

    /// Sign in with username and password using SRP.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<Session> {
        debug!("Starting SRP authentication");

        let srp = SrpClient::new(self.config.pool_name()?)?;

        let response: InitiateAuthResponse = self
            .call(
                "InitiateAuth",
                &InitiateAuthRequest {
                    auth_flow: "USER_SRP_AUTH".to_string(),
                    auth_parameters: HashMap::from([
                        ("USERNAME".to_string(), username.to_string()),
                        ("SRP_A".to_string(), srp.srp_a()),
                    ]),
                    client_id: self.config.client_id.clone(),
                },
            )
            .await
            .inspect_err(|e| error!("{}", e))?;

        match response.challenge_name.as_deref() {
            Some("PASSWORD_VERIFIER") => {}
            Some(other) => {
                return Err(Error::auth(format!("Unsupported challenge: {}", other)));
            }
            None => return Err(Error::auth("Expected a PASSWORD_VERIFIER challenge")),
        }

        let params = &response.challenge_parameters;
        let challenge = PasswordVerifier {
            user_id_for_srp: challenge_param(params, "USER_ID_FOR_SRP")?,
            salt: challenge_param(params, "SALT")?,
            srp_b: challenge_param(params, "SRP_B")?,
            secret_block: challenge_param(params, "SECRET_BLOCK")?,
        };
        let claim = srp.password_claim(&challenge, password, Utc::now())?;

        let result: InitiateAuthResponse = self
            .call(
                "RespondToAuthChallenge",
                &RespondToAuthChallengeRequest {
                    challenge_name: "PASSWORD_VERIFIER".to_string(),
                    challenge_responses: HashMap::from([
                        ("TIMESTAMP".to_string(), claim.timestamp),
                        ("USERNAME".to_string(), claim.username),
                        (
                            "PASSWORD_CLAIM_SECRET_BLOCK".to_string(),
                            claim.secret_block,
                        ),
                        ("PASSWORD_CLAIM_SIGNATURE".to_string(), claim.signature),
                    ]),
                    client_id: self.config.client_id.clone(),
                    session: response.session,
                },
            )
            .await
            .inspect_err(|e| error!("{}", e))?;

        if let Some(challenge) = result.challenge_name {
            return Err(Error::auth(format!(
                "Additional challenge required: {}",
                challenge
            )));
        }

        let tokens = token_set(result.authentication_result, None)?;
        debug!("Authentication successful");

        Ok(Session {
            username: Some(username.to_string()),
            state: SessionState::Authenticated(tokens),
        })
    }

    /// Rehydrate a session from persisted tokens. Expired access tokens
    /// are refreshed, then both tokens are verified against the pool's keys.
    pub async fn restore_session(&self, tokens: TokenSet) -> Result<Session> {
        if tokens.access_token.is_empty() {
            return Err(Error::auth("No access token to restore"));
        }

        let mut session = Session::from_tokens(tokens);
        self.check_and_refresh(&mut session).await?;

        let tokens = session
            .tokens()
            .ok_or_else(|| Error::auth("Session lost its tokens"))?;
        self.verify_tokens(tokens)
            .await
            .inspect_err(|e| error!("{}", e))?;

        Ok(session)
    }

    /// Refresh the access and id tokens if the access token has expired.
    /// Returns whether a refresh happened. A failed refresh leaves the
    /// session unauthenticated.
    pub async fn check_and_refresh(&self, session: &mut Session) -> Result<bool> {
        let tokens = session
            .tokens()
            .ok_or_else(|| Error::auth("Not authenticated. Call authenticate() first."))?;

        if !is_token_expired(&tokens.access_token, TOKEN_EXPIRY_BUFFER_SECS) {
            return Ok(false);
        }

        debug!("Access token expired, refreshing");
        let refreshed = self.refresh(tokens).await;
        match refreshed {
            Ok(tokens) => {
                session.state = SessionState::Authenticated(tokens);
                debug!("Token refresh successful");
                Ok(true)
            }
            Err(e) => {
                error!("Token refresh failed: {}", e);
                session.state = SessionState::Unauthenticated;
                Err(e)
            }
        }
    }

    async fn refresh(&self, tokens: &TokenSet) -> Result<TokenSet> {
        let response: InitiateAuthResponse = self
            .call(
                "InitiateAuth",
                &InitiateAuthRequest {
                    auth_flow: "REFRESH_TOKEN_AUTH".to_string(),
                    auth_parameters: HashMap::from([(
                        "REFRESH_TOKEN".to_string(),
                        tokens.refresh_token.clone(),
                    )]),
                    client_id: self.config.client_id.clone(),
                },
            )
            .await?;

        token_set(response.authentication_result, Some(tokens))
    }

    /// Verify the signatures and claims of both tokens against the user
    /// pool's published keys.
    pub async fn verify_tokens(&self, tokens: &TokenSet) -> Result<()> {
        let url = self.config.jwks_url();
        debug!("Fetching signing keys from {}", url);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::auth_from("Could not fetch signing keys", e))?;
        if !response.status().is_success() {
            return Err(Error::auth(format!(
                "Could not fetch signing keys: status {}",
                response.status()
            )));
        }
        let jwks: JwkSet = response
            .json()
            .await
            .map_err(|e| Error::auth_from("Invalid signing key set", e))?;

        self.verify_token(&jwks, &tokens.access_token, "access")?;
        self.verify_token(&jwks, &tokens.id_token, "id")?;
        Ok(())
    }

    fn verify_token(&self, jwks: &JwkSet, token: &str, token_use: &str) -> Result<()> {
        let header = decode_header(token)
            .map_err(|e| Error::auth_from(format!("Malformed {} token", token_use), e))?;
        let kid = header
            .kid
            .ok_or_else(|| Error::auth(format!("{} token has no key id", token_use)))?;
        let jwk = jwks
            .find(&kid)
            .ok_or_else(|| Error::auth(format!("Unknown signing key {}", kid)))?;
        let key = DecodingKey::from_jwk(jwk)
            .map_err(|e| Error::auth_from("Unusable signing key", e))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[self.config.issuer()]);
        if token_use == "id" {
            validation.set_audience(&[&self.config.client_id]);
        } else {
            validation.validate_aud = false;
        }

        let claims = decode::<CognitoClaims>(token, &key, &validation)
            .map_err(|e| Error::auth_from(format!("Invalid {} token", token_use), e))?
            .claims;

        if claims.token_use.as_deref() != Some(token_use) {
            return Err(Error::auth(format!(
                "Expected token_use '{}', got {:?}",
                token_use, claims.token_use
            )));
        }
        if let Some(client_id) = &claims.client_id {
            if client_id != &self.config.client_id {
                return Err(Error::auth(format!(
                    "{} token was issued to another client",
                    token_use
                )));
            }
        }
        Ok(())
    }

    /// Sign out of every device and app the account is signed in to.
    pub async fn logout(&self, session: &mut Session) -> Result<()> {
        if session.tokens().is_none() {
            session.state = SessionState::LoggedOut;
            return Ok(());
        }

        self.check_and_refresh(session).await?;
        let access_token = session
            .tokens()
            .map(|tokens| tokens.access_token.clone())
            .ok_or_else(|| Error::auth("Session lost its tokens"))?;

        let _: serde_json::Value = self
            .call("GlobalSignOut", &GlobalSignOutRequest { access_token })
            .await?;

        session.state = SessionState::LoggedOut;
        debug!("Signed out of all sessions");
        Ok(())
    }
}

fn challenge_param(params: &HashMap<String, String>, key: &str) -> Result<String> {
    params
        .get(key)
        .cloned()
        .ok_or_else(|| Error::auth(format!("Challenge is missing {}", key)))
}

/// Build a token triple from an authentication result, filling gaps from
/// `previous` (a refresh does not return a new refresh token).
fn token_set(
    result: Option<AuthenticationResult>,
    previous: Option<&TokenSet>,
) -> Result<TokenSet> {
    let result = result.ok_or_else(|| Error::auth("No authentication result in response"))?;

    let id_token = result
        .id_token
        .or_else(|| previous.map(|p| p.id_token.clone()))
        .ok_or_else(|| Error::auth("No id token in response"))?;
    let refresh_token = result
        .refresh_token
        .or_else(|| previous.map(|p| p.refresh_token.clone()))
        .ok_or_else(|| Error::auth("No refresh token in response"))?;

    Ok(TokenSet {
        access_token: result.access_token,
        id_token,
        refresh_token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    #[derive(Serialize)]
    struct TestClaims {
        exp: i64,
    }

    fn token_expiring_in(seconds: i64) -> String {
        let claims = TestClaims {
            exp: Utc::now().timestamp() + seconds,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(b"test")).unwrap()
    }

    fn tokens(access_token: &str) -> TokenSet {
        TokenSet {
            access_token: access_token.to_string(),
            id_token: "id".to_string(),
            refresh_token: "refresh".to_string(),
        }
    }

    #[test]
    fn test_token_expiry_reads_exp_claim() {
        let exp = Utc::now().timestamp() + 60;
        let token = encode(
            &Header::default(),
            &TestClaims { exp },
            &EncodingKey::from_secret(b""),
        )
        .unwrap();
        assert_eq!(token_expiry(&token).unwrap(), exp);
    }

    #[test]
    fn test_token_expiration_check() {
        assert!(!is_token_expired(&token_expiring_in(3600), 60));
        assert!(is_token_expired(&token_expiring_in(30), 60));
        assert!(is_token_expired(&token_expiring_in(-10), 0));
        assert!(is_token_expired("eyJhbGciOiJIUzUxMiJ9.invalid.token", 0));
        assert!(is_token_expired("not-a-jwt", 0));
    }

    #[test]
    fn test_session_tokens() {
        let session = Session::from_tokens(tokens("access"));
        assert!(session.is_authenticated());
        assert_eq!(session.tokens().unwrap().refresh_token, "refresh");

        let session = Session::from_tokens(tokens(""));
        assert!(session.tokens().is_none());

        let session = Session::new(Some("me@example.com".to_string()));
        assert_eq!(session.state(), &SessionState::Unauthenticated);
        assert_eq!(session.username(), Some("me@example.com"));
        assert!(session.tokens().is_none());
    }

    #[test]
    fn test_token_set_debug_hides_values() {
        let debug = format!("{:?}", tokens("eyJsecret"));
        assert!(!debug.contains("eyJsecret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_token_set_keeps_refresh_token_on_refresh() {
        let previous = tokens("old");
        let result = AuthenticationResult {
            access_token: "new-access".to_string(),
            id_token: Some("new-id".to_string()),
            refresh_token: None,
            expires_in: Some(3600),
            token_type: Some("Bearer".to_string()),
        };
        let refreshed = token_set(Some(result), Some(&previous)).unwrap();
        assert_eq!(refreshed.access_token, "new-access");
        assert_eq!(refreshed.id_token, "new-id");
        assert_eq!(refreshed.refresh_token, "refresh");
    }

    #[tokio::test]
    async fn test_username_never_reaches_the_log() {
        use crate::test_log;
        use serde_json::json;
        use wiremock::matchers::{body_string_contains, header, method};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header(
                "x-amz-target",
                "AWSCognitoIdentityProviderService.InitiateAuth",
            ))
            .and(body_string_contains("USER_SRP_AUTH"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ChallengeName": "PASSWORD_VERIFIER",
                "ChallengeParameters": {
                    "USER_ID_FOR_SRP": "3b5f1c2d-user",
                    "SALT": "9a1f0e",
                    "SRP_B": "5f4dcc3b5aa765d61d8327deb882cf99",
                    "SECRET_BLOCK": "c2VjcmV0LWJsb2NrLWJ5dGVz"
                },
                "Session": "challenge-session"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(header(
                "x-amz-target",
                "AWSCognitoIdentityProviderService.RespondToAuthChallenge",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "AuthenticationResult": {
                    "AccessToken": "access",
                    "IdToken": "id",
                    "RefreshToken": "refresh"
                }
            })))
            .mount(&server)
            .await;

        let config = ClientConfig::new("us-west-2_abc123", "client", "pool", "us-west-2")
            .with_cognito_urls(server.uri(), server.uri());
        let authenticator = Authenticator::new(reqwest::Client::new(), config);

        test_log::start();
        let session = authenticator
            .authenticate("owner@example.com", "hunter2")
            .await
            .unwrap();
        let records = test_log::take();

        assert_eq!(session.username(), Some("owner@example.com"));
        assert!(records.iter().any(|(_, msg)| msg == "Authentication successful"));
        for (_, message) in &records {
            assert!(!message.contains("owner@example.com"), "{}", message);
            assert!(!message.contains("hunter2"), "{}", message);
        }
    }

    #[tokio::test]
    async fn test_failed_login_does_not_log_username() {
        use crate::test_log;
        use serde_json::json;
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "__type": "NotAuthorizedException",
                "message": "Incorrect username or password."
            })))
            .mount(&server)
            .await;

        let config = ClientConfig::new("us-west-2_abc123", "client", "pool", "us-west-2")
            .with_cognito_urls(server.uri(), server.uri());
        let authenticator = Authenticator::new(reqwest::Client::new(), config);

        test_log::start();
        let err = authenticator
            .authenticate("owner@example.com", "wrong")
            .await
            .unwrap_err();
        let records = test_log::take();

        assert!(err.is_auth());
        assert!(!records.is_empty());
        assert!(records
            .iter()
            .all(|(_, message)| !message.contains("owner@example.com")));
    }

    #[test]
    fn test_token_set_requires_full_triple_on_login() {
        let result = AuthenticationResult {
            access_token: "access".to_string(),
            id_token: Some("id".to_string()),
            refresh_token: None,
            expires_in: None,
            token_type: None,
        };
        assert!(token_set(Some(result), None).unwrap_err().is_auth());
        assert!(token_set(None, None).unwrap_err().is_auth());
    }
}
