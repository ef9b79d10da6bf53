use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::fields::{self, FieldValue};

/// One device as returned by the device service. Kept as the raw JSON
/// object; the accessors only read well-known keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceRecord(pub Map<String, Value>);

impl DeviceRecord {
    pub fn device_id(&self) -> Option<&str> {
        self.0.get("deviceId").and_then(Value::as_str)
    }

    pub fn device_type(&self) -> Option<&str> {
        self.0.get("deviceType").and_then(Value::as_str)
    }

    /// The user's nickname for the device, falling back to the product name.
    pub fn name(&self) -> Option<&str> {
        self.0
            .get("productInfo")
            .and_then(|info| info.get("nickName"))
            .and_then(Value::as_str)
            .or_else(|| self.0.get("pname").and_then(Value::as_str))
    }

    pub fn is_online(&self) -> bool {
        self.0
            .get("online")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn fields(&self) -> Option<&Map<String, Value>> {
        self.0.get("fields").and_then(Value::as_object)
    }

    pub fn translated_fields(&self) -> Vec<(String, FieldValue)> {
        self.fields()
            .map(fields::translate_fields)
            .unwrap_or_default()
    }
}

/// The device listing comes back either bare or wrapped.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum DevicesResponse {
    List(Vec<DeviceRecord>),
    Data { data: Vec<DeviceRecord> },
    Wrapped { response: DevicesData },
}

#[derive(Debug, Deserialize)]
pub struct DevicesData {
    pub data: Vec<DeviceRecord>,
}

impl DevicesResponse {
    pub fn into_devices(self) -> Vec<DeviceRecord> {
        match self {
            DevicesResponse::List(devices) => devices,
            DevicesResponse::Data { data } => data,
            DevicesResponse::Wrapped { response } => response.data,
        }
    }
}

// Cognito user pool (AWSCognitoIdentityProviderService)

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct InitiateAuthRequest {
    pub auth_flow: String,
    pub auth_parameters: HashMap<String, String>,
    pub client_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InitiateAuthResponse {
    pub challenge_name: Option<String>,
    #[serde(default)]
    pub challenge_parameters: HashMap<String, String>,
    pub session: Option<String>,
    pub authentication_result: Option<AuthenticationResult>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RespondToAuthChallengeRequest {
    pub challenge_name: String,
    pub challenge_responses: HashMap<String, String>,
    pub client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AuthenticationResult {
    pub access_token: String,
    pub id_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
    pub token_type: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GlobalSignOutRequest {
    pub access_token: String,
}

// Cognito identity pool (AWSCognitoIdentityService)

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetIdRequest {
    pub identity_pool_id: String,
    pub logins: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetIdResponse {
    pub identity_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetCredentialsForIdentityRequest {
    pub identity_id: String,
    pub logins: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetCredentialsForIdentityResponse {
    pub identity_id: Option<String>,
    pub credentials: IdentityCredentials,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IdentityCredentials {
    pub access_key_id: String,
    pub secret_key: String,
    pub session_token: String,
    /// Seconds since the epoch.
    pub expiration: Option<f64>,
}

/// Error body of the AWS JSON 1.1 protocol.
#[derive(Debug, Deserialize)]
pub struct AwsErrorResponse {
    #[serde(rename = "__type")]
    pub error_type: Option<String>,
    #[serde(alias = "Message")]
    pub message: Option<String>,
}

impl AwsErrorResponse {
    /// `NotAuthorizedException: Incorrect username or password.`
    pub fn describe(&self) -> String {
        let error_type = self
            .error_type
            .as_deref()
            .map(|t| t.rsplit('#').next().unwrap_or(t))
            .unwrap_or("UnknownError");
        match &self.message {
            Some(message) => format!("{}: {}", error_type, message),
            None => error_type.to_string(),
        }
    }
}
