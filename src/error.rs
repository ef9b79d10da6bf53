use std::fmt;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug)]
pub enum Error {
    Config(String),
    /// Bad credentials, failed refresh, rejected tokens or a failed
    /// identity-pool exchange. The caller should re-authenticate.
    Auth {
        message: String,
        source: Option<BoxError>,
    },
    /// Non-200 response from the Pentair API.
    Api {
        status: u16,
        body: serde_json::Value,
    },
    Http(reqwest::Error),
    Json(serde_json::Error),
}

impl Error {
    pub fn auth(message: impl Into<String>) -> Self {
        Error::Auth {
            message: message.into(),
            source: None,
        }
    }

    pub fn auth_from<E>(message: impl Into<String>, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Error::Auth {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Error::Auth { .. })
    }

    pub fn is_api(&self) -> bool {
        matches!(self, Error::Api { .. })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Auth {
                message,
                source: Some(source),
            } => write!(f, "Authentication error: {}: {}", message, source),
            Error::Auth {
                message,
                source: None,
            } => write!(f, "Authentication error: {}", message),
            Error::Api { status, body } => write!(f, "API error: status {} - {}", status, body),
            Error::Http(err) => write!(f, "HTTP error: {}", err),
            Error::Json(err) => write!(f, "JSON parsing error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Auth {
                source: Some(source),
                ..
            } => Some(source.as_ref()),
            Error::Http(err) => Some(err),
            Error::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Http(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_auth_error_display_includes_cause() {
        let cause = std::io::Error::new(std::io::ErrorKind::Other, "connection reset");
        let err = Error::auth_from("Login failed", cause);
        assert!(err.is_auth());
        assert_eq!(
            err.to_string(),
            "Authentication error: Login failed: connection reset"
        );
        assert!(err.source().is_some());
    }

    #[test]
    fn test_api_error_carries_status_and_body() {
        let err = Error::Api {
            status: 403,
            body: serde_json::json!({"message": "Forbidden"}),
        };
        assert!(err.is_api());
        assert!(!err.is_auth());
        assert_eq!(
            err.to_string(),
            r#"API error: status 403 - {"message":"Forbidden"}"#
        );
    }
}
