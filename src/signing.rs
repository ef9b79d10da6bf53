//! Temporary AWS credentials from the Cognito identity pool, and AWS
//! Signature Version 4 for outbound API requests.

use aws_credential_types::Credentials;
use aws_sigv4::http_request::{self, SignableBody, SignableRequest, SigningParams, SigningSettings};
use aws_sigv4::sign::v4;
use aws_smithy_runtime_api::client::identity::Identity;
use chrono::{DateTime, Duration, TimeZone, Utc};
use log::debug;
use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION, HOST};
use std::collections::HashMap;
use std::fmt;
use std::time::SystemTime;

use crate::auth::{cognito_call, Session};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::types::{
    GetCredentialsForIdentityRequest, GetCredentialsForIdentityResponse, GetIdRequest,
    GetIdResponse,
};

pub const SERVICE: &str = "execute-api";
const IDENTITY_TARGET_PREFIX: &str = "AWSCognitoIdentityService";

const X_AMZ_DATE: &str = "x-amz-date";
const X_AMZ_SECURITY_TOKEN: &str = "x-amz-security-token";

/// Re-derive credentials this long before they expire.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Short-lived credentials for one identity token.
#[derive(Clone)]
pub struct SigningCredentials {
    pub access_key_id: String,
    pub secret_key: String,
    pub session_token: String,
    pub expiration: Option<DateTime<Utc>>,
    id_token: String,
}

impl SigningCredentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_key: impl Into<String>,
        session_token: impl Into<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_key: secret_key.into(),
            session_token: session_token.into(),
            expiration: None,
            id_token: String::new(),
        }
    }

    /// Usable for requests made with `id_token` at `now`.
    pub fn is_valid_for(&self, id_token: &str, now: DateTime<Utc>) -> bool {
        self.id_token == id_token
            && self
                .expiration
                .map_or(true, |exp| exp > now + Duration::seconds(EXPIRY_MARGIN_SECS))
    }
}

impl fmt::Debug for SigningCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_key", &"[REDACTED]")
            .field("session_token", &"[REDACTED]")
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// Exchanges identity tokens for signing credentials, keeping the last
/// result until the identity token changes or the credentials expire.
pub struct CredentialProvider {
    http: reqwest::Client,
    config: ClientConfig,
    cached: Option<SigningCredentials>,
}

impl CredentialProvider {
    pub fn new(http: reqwest::Client, config: ClientConfig) -> Self {
        Self {
            http,
            config,
            cached: None,
        }
    }

    pub fn cached(&self) -> Option<&SigningCredentials> {
        self.cached.as_ref()
    }

    /// Drop cached credentials, e.g. after logout.
    pub fn clear(&mut self) {
        self.cached = None;
    }

    pub async fn credentials(&mut self, session: &Session) -> Result<&SigningCredentials> {
        let id_token = session
            .tokens()
            .map(|tokens| tokens.id_token.clone())
            .ok_or_else(|| Error::auth("Not authenticated. Call authenticate() first."))?;

        let fresh = self
            .cached
            .as_ref()
            .is_some_and(|c| c.is_valid_for(&id_token, Utc::now()));
        if !fresh {
            self.cached = None;
            let credentials = self.fetch(&id_token).await?;
            self.cached = Some(credentials);
        }

        self.cached
            .as_ref()
            .ok_or_else(|| Error::auth("No signing credentials available"))
    }

    async fn fetch(&self, id_token: &str) -> Result<SigningCredentials> {
        debug!("Exchanging id token for identity pool credentials");

        let logins = HashMap::from([(self.config.login_provider(), id_token.to_string())]);

        let identity: GetIdResponse = cognito_call(
            &self.http,
            &self.config.cognito_identity_url,
            &format!("{}.GetId", IDENTITY_TARGET_PREFIX),
            &GetIdRequest {
                identity_pool_id: self.config.identity_pool_id.clone(),
                logins: logins.clone(),
            },
        )
        .await?;

        let response: GetCredentialsForIdentityResponse = cognito_call(
            &self.http,
            &self.config.cognito_identity_url,
            &format!("{}.GetCredentialsForIdentity", IDENTITY_TARGET_PREFIX),
            &GetCredentialsForIdentityRequest {
                identity_id: identity.identity_id,
                logins,
            },
        )
        .await?;

        let credentials = response.credentials;
        let expiration = credentials
            .expiration
            .and_then(|secs| Utc.timestamp_millis_opt((secs * 1000.0) as i64).single());

        debug!("Obtained identity pool credentials (expires {:?})", expiration);

        Ok(SigningCredentials {
            access_key_id: credentials.access_key_id,
            secret_key: credentials.secret_key,
            session_token: credentials.session_token,
            expiration,
            id_token: id_token.to_string(),
        })
    }
}

/// Sign `request` in place with AWS Signature Version 4.
///
/// Adds `host`, `x-amz-date`, `x-amz-security-token` and `authorization`.
/// Every other header already present is signed as well.
pub fn sign(
    request: &mut reqwest::Request,
    credentials: &SigningCredentials,
    region: &str,
    service: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let host = match request.url().port() {
        Some(port) => format!("{}:{}", request.url().host_str().unwrap_or_default(), port),
        None => request.url().host_str().unwrap_or_default().to_string(),
    };

    let headers = request.headers_mut();
    for name in [AUTHORIZATION.as_str(), X_AMZ_DATE, X_AMZ_SECURITY_TOKEN] {
        headers.remove(name);
    }
    headers.insert(HOST, header_value(&host)?);

    let session_token =
        (!credentials.session_token.is_empty()).then(|| credentials.session_token.clone());
    let identity: Identity = Credentials::new(
        &credentials.access_key_id,
        &credentials.secret_key,
        session_token,
        None,
        "cognito-identity",
    )
    .into();
    let params: SigningParams<'_> = v4::SigningParams::builder()
        .identity(&identity)
        .region(region)
        .name(service)
        .time(SystemTime::from(now))
        .settings(SigningSettings::default())
        .build()
        .map_err(|e| Error::Config(format!("Invalid signing parameters: {}", e)))?
        .into();

    let url = request.url().to_string();
    let unsigned = request
        .headers()
        .iter()
        .map(|(name, value)| {
            value
                .to_str()
                .map(|value| (name.as_str(), value))
                .map_err(|e| Error::Config(format!("Header {} cannot be signed: {}", name, e)))
        })
        .collect::<Result<Vec<_>>>()?;
    let body = request
        .body()
        .and_then(|body| body.as_bytes())
        .unwrap_or_default();

    let signable = SignableRequest::new(
        request.method().as_str(),
        url.as_str(),
        unsigned.into_iter(),
        SignableBody::Bytes(body),
    )
    .map_err(|e| Error::Config(format!("Request cannot be signed: {}", e)))?;
    let (instructions, _signature) = http_request::sign(signable, &params)
        .map_err(|e| Error::Config(format!("Request cannot be signed: {}", e)))?
        .into_parts();

    for (name, value) in instructions.headers() {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::Config(format!("Invalid header name '{}': {}", name, e)))?;
        request.headers_mut().insert(name, header_value(value)?);
    }

    Ok(())
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| Error::Config(format!("Invalid header value '{}': {}", value, e)))
}
