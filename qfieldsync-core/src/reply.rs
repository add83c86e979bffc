use serde::de::DeserializeOwned;
use thiserror::Error;

const MAX_REASON_CHARS: usize = 200;

/// Failure of a single cloud request. `Display` is the human-readable reason.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CloudError {
    #[error("{0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("{reason}")]
    Http { status: u16, reason: String },
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl CloudError {
    pub fn reason(&self) -> String {
        self.to_string()
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            CloudError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self.status(), Some(401 | 403))
    }
}

/// Turns a finished reply into the decoded payload or a normalized error.
pub fn decode_reply<T: DeserializeOwned>(status: u16, body: &[u8]) -> Result<T, CloudError> {
    if !(200..300).contains(&status) {
        return Err(CloudError::Http {
            status,
            reason: error_reason(status, body),
        });
    }

    serde_json::from_slice(body).map_err(|err| CloudError::Decode(err.to_string()))
}

/// Best-effort reason extraction from an error body.
///
/// Understands `{"detail": "..."}`, field error maps such as
/// `{"name": ["This field is required."]}` and short plain-text bodies.
pub fn error_reason(status: u16, body: &[u8]) -> String {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
        if let Some(detail) = value.get("detail").and_then(|d| d.as_str()) {
            return detail.to_owned();
        }

        if let Some(fields) = value.as_object() {
            let mut parts = Vec::new();
            for (field, messages) in fields {
                let text = match messages {
                    serde_json::Value::Array(items) => items
                        .iter()
                        .filter_map(|item| item.as_str())
                        .collect::<Vec<_>>()
                        .join(" "),
                    serde_json::Value::String(text) => text.clone(),
                    _ => continue,
                };
                if field == "non_field_errors" {
                    parts.push(text);
                } else {
                    parts.push(format!("{field}: {text}"));
                }
            }
            if !parts.is_empty() {
                return parts.join("; ");
            }
        }
    }

    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if !text.is_empty() && !text.starts_with('<') {
        return text.chars().take(MAX_REASON_CHARS).collect();
    }

    format!("HTTP status {status}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LoginResponse;

    #[test]
    fn success_decodes_payload() {
        let body = br#"{"token":"t","username":"ada"}"#;
        let login: LoginResponse = decode_reply(200, body).unwrap();
        assert_eq!(login.username, "ada");
    }

    #[test]
    fn success_with_missing_keys_is_decode_error() {
        let err = decode_reply::<LoginResponse>(200, br#"{"username":"ada"}"#).unwrap_err();
        assert!(matches!(err, CloudError::Decode(_)));
    }

    #[test]
    fn http_error_uses_detail() {
        let err = decode_reply::<LoginResponse>(401, br#"{"detail":"Invalid token."}"#).unwrap_err();
        assert_eq!(
            err,
            CloudError::Http {
                status: 401,
                reason: "Invalid token.".to_owned()
            }
        );
        assert!(err.is_unauthorized());
        assert_eq!(err.reason(), "Invalid token.");
    }

    #[test]
    fn field_errors_are_joined() {
        let reason = error_reason(
            400,
            br#"{"name":["This field is required."],"non_field_errors":["Bad."]}"#,
        );
        assert!(reason.contains("name: This field is required."));
        assert!(reason.contains("Bad."));
    }

    #[test]
    fn html_or_empty_body_falls_back_to_status() {
        assert_eq!(error_reason(502, b"<html>bad gateway</html>"), "HTTP status 502");
        assert_eq!(error_reason(500, b""), "HTTP status 500");
        assert_eq!(error_reason(500, b"boom"), "boom");
    }
}
