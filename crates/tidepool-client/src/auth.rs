//! Plain SASL credential selection for named buckets.
//!
//! The handshake itself happens in the connection layer; this module only
//! decides whether a bucket needs credentials and which ones.

use std::fmt;

/// Plain-auth credentials for a named bucket.
///
/// The `Debug` impl redacts the secret so it cannot leak into logs.
#[derive(Clone, PartialEq, Eq)]
pub struct PlainCredentials {
    username: String,
    password: String,
}

impl PlainCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for PlainCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlainCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Picks the credentials for a bucket, if it needs any.
///
/// The default bucket — unnamed or literally `"default"` — is open and gets
/// no authenticator. For any other bucket the password falls back in order:
/// the explicit parameter, the configured password, the bucket name itself.
pub fn bucket_credentials(
    bucket: Option<&str>,
    explicit: Option<&str>,
    configured: Option<&str>,
) -> Option<PlainCredentials> {
    let bucket = bucket.unwrap_or("");
    if bucket.is_empty() || bucket == "default" {
        return None;
    }
    let password = explicit.or(configured).unwrap_or(bucket);
    Some(PlainCredentials::new(bucket, password))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_bucket_is_open() {
        assert!(bucket_credentials(None, None, None).is_none());
        assert!(bucket_credentials(Some(""), Some("pw"), None).is_none());
        assert!(bucket_credentials(Some("default"), Some("pw"), None).is_none());
    }

    #[test]
    fn password_fallback_order() {
        let creds = bucket_credentials(Some("sessions"), Some("explicit"), Some("configured"));
        assert_eq!(creds.unwrap().password(), "explicit");

        let creds = bucket_credentials(Some("sessions"), None, Some("configured"));
        assert_eq!(creds.unwrap().password(), "configured");

        let creds = bucket_credentials(Some("sessions"), None, None).unwrap();
        assert_eq!(creds.username(), "sessions");
        assert_eq!(creds.password(), "sessions");
    }

    #[test]
    fn debug_redacts_the_secret() {
        let creds = PlainCredentials::new("sessions", "hunter2");
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("sessions"));
        assert!(!rendered.contains("hunter2"));
    }
}
