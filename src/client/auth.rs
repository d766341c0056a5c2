use serde::Deserialize;

/// Credentials presented to the Shopify Admin API.
///
/// Deserialized from the `authentication` block of the config, discriminated
/// by `auth_type`:
///
/// ```yaml
/// authentication:
///   auth_type: oauth
///   client_id: ...
///   client_secret: ...
///   access_token: shpat_...
/// ```
#[derive(Clone, Deserialize, PartialEq)]
#[serde(tag = "auth_type", rename_all = "snake_case")]
pub enum Auth {
    /// Credentials of a custom app installed through OAuth
    #[serde(rename = "oauth")]
    OAuthCredentials {
        client_id: String,
        client_secret: String,
        access_token: String,
    },
    /// An Admin API access token on its own
    #[serde(rename = "access_token")]
    BareToken { access_token: String },
}

impl Auth {
    pub fn bare(access_token: impl Into<String>) -> Self {
        Self::BareToken {
            access_token: access_token.into(),
        }
    }

    /// The token sent in the `X-Shopify-Access-Token` header.
    pub fn access_token(&self) -> &str {
        match self {
            Self::OAuthCredentials { access_token, .. } => access_token,
            Self::BareToken { access_token } => access_token,
        }
    }

    /// Replace the access token, keeping the variant (used for env overrides).
    pub fn with_access_token(self, token: String) -> Self {
        match self {
            Self::OAuthCredentials {
                client_id,
                client_secret,
                ..
            } => Self::OAuthCredentials {
                client_id,
                client_secret,
                access_token: token,
            },
            Self::BareToken { .. } => Self::BareToken {
                access_token: token,
            },
        }
    }

    /// Reject blank credentials before any request is made.
    pub fn validate(&self) -> Result<(), String> {
        if let Self::OAuthCredentials {
            client_id,
            client_secret,
            ..
        } = self
        {
            if client_id.trim().is_empty() {
                return Err("authentication.client_id is empty".to_string());
            }
            if client_secret.trim().is_empty() {
                return Err("authentication.client_secret is empty".to_string());
            }
        }
        if self.access_token().trim().is_empty() {
            return Err("authentication.access_token is empty".to_string());
        }
        Ok(())
    }
}

impl std::fmt::Display for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OAuthCredentials { .. } => write!(f, "OAuth"),
            Self::BareToken { .. } => write!(f, "AccessToken"),
        }
    }
}

// Secrets stay out of logs and panic messages.
impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OAuthCredentials { client_id, .. } => f
                .debug_struct("OAuthCredentials")
                .field("client_id", client_id)
                .field("client_secret", &"<redacted>")
                .field("access_token", &"<redacted>")
                .finish(),
            Self::BareToken { .. } => f
                .debug_struct("BareToken")
                .field("access_token", &"<redacted>")
                .finish(),
        }
    }
}
