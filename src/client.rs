use chrono::Utc;
use log::{debug, error};
use reqwest::{Method, StatusCode, Url};
use serde_json::Value;

use crate::auth::{Authenticator, Session, TokenSet};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::redact::redact;
use crate::signing::{self, CredentialProvider, SERVICE};
use crate::types::{DeviceRecord, DevicesResponse};

pub const DEVICES_PATH: &str = "device/device-service/user/devices";
pub const ID_TOKEN_HEADER: &str = "x-amz-id-token";

/// Client for the Pentair Home cloud API.
///
/// Owns the session and the signing credentials derived from it, so every
/// call that may refresh tokens takes `&mut self`.
pub struct PentairClient {
    http: reqwest::Client,
    config: ClientConfig,
    authenticator: Authenticator,
    credentials: CredentialProvider,
    session: Session,
}

impl PentairClient {
    pub fn new(config: ClientConfig) -> Self {
        let http = reqwest::Client::new();
        Self {
            authenticator: Authenticator::new(http.clone(), config.clone()),
            credentials: CredentialProvider::new(http.clone(), config.clone()),
            session: Session::new(None),
            http,
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    /// The current token triple, for the caller to persist.
    pub fn tokens(&self) -> Option<&TokenSet> {
        self.session.tokens()
    }

    pub async fn authenticate(&mut self, username: &str, password: &str) -> Result<()> {
        self.session = self.authenticator.authenticate(username, password).await?;
        self.credentials.clear();
        Ok(())
    }

    pub async fn restore_session(&mut self, tokens: TokenSet) -> Result<()> {
        self.session = self.authenticator.restore_session(tokens).await?;
        self.credentials.clear();
        Ok(())
    }

    pub async fn check_and_refresh(&mut self) -> Result<bool> {
        self.authenticator.check_and_refresh(&mut self.session).await
    }

    /// Sign out everywhere, including the mobile app.
    pub async fn logout(&mut self) -> Result<()> {
        self.authenticator.logout(&mut self.session).await?;
        self.credentials.clear();
        Ok(())
    }

    pub async fn get_devices(&mut self) -> Result<Vec<DeviceRecord>> {
        debug!("Fetching devices");

        let body = self.request(Method::GET, DEVICES_PATH).await?;
        let devices = serde_json::from_value::<DevicesResponse>(body)?.into_devices();

        debug!("Found {} devices", devices.len());
        Ok(devices)
    }

    async fn request(&mut self, method: Method, path: &str) -> Result<Value> {
        let url = join_url(&self.config.base_url, path)?;
        debug!("Making {} request to {}", method, url);

        self.authenticator
            .check_and_refresh(&mut self.session)
            .await?;
        let id_token = self
            .session
            .tokens()
            .map(|tokens| tokens.id_token.clone())
            .ok_or_else(|| Error::auth("Not authenticated. Call authenticate() first."))?;

        let mut request = self
            .http
            .request(method, url)
            .header(ID_TOKEN_HEADER, id_token)
            .timeout(self.config.request_timeout)
            .build()?;

        let credentials = self.credentials.credentials(&self.session).await?;
        signing::sign(
            &mut request,
            credentials,
            &self.config.region,
            SERVICE,
            Utc::now(),
        )?;

        let response = self.http.execute(request).await?;
        let status = response.status();
        let body: Value = response.json().await?;

        debug!(
            "Received {} response from {}: {}",
            status.as_u16(),
            path,
            redact(&body)
        );

        if status != StatusCode::OK {
            error!("Status: {} - {}", status.as_u16(), redact(&body));
            return Err(Error::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(body)
    }
}

fn join_url(base_url: &str, path: &str) -> Result<Url> {
    Url::parse(base_url)
        .and_then(|base| base.join(path))
        .map_err(|e| Error::Config(format!("Invalid URL {}{}: {}", base_url, path, e)))
}
