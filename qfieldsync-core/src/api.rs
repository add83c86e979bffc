//! REST routes shared by the cloud service and the client.

pub const LOGIN_PATH: &str = "/api/v1/auth/login/";
pub const LOGOUT_PATH: &str = "/api/v1/auth/logout/";
pub const USER_PATH: &str = "/api/v1/auth/user/";
pub const PROJECTS_PATH: &str = "/api/v1/projects/";

/// Scheme of the `Authorization` header value.
pub const TOKEN_SCHEME: &str = "Token";

pub fn project_path(project_id: &str) -> String {
    format!("/api/v1/projects/{project_id}/")
}

/// Listing of a project's files. Individual files live below this path.
pub fn files_path(project_id: &str) -> String {
    format!("/api/v1/files/{project_id}/")
}

pub fn authorization_value(token: &str) -> String {
    format!("{TOKEN_SCHEME} {token}")
}

/// Extracts the token from an `Authorization` header value.
pub fn parse_authorization(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    if scheme == TOKEN_SCHEME && !token.is_empty() {
        Some(token)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_roundtrip() {
        let header = authorization_value("abc123");
        assert_eq!(parse_authorization(&header), Some("abc123"));
        assert_eq!(parse_authorization("Bearer abc123"), None);
        assert_eq!(parse_authorization("Token "), None);
    }
}
