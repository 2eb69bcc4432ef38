//! Authentication collaborator.

use std::collections::HashMap;

use async_trait::async_trait;
use beacon_core::PrincipalId;
use beacon_settings::AuthSettings;

use crate::transport::Credentials;

/// Outcome of authenticating a new connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthDecision {
    /// Admit the connection, optionally tagged with a principal.
    Allow {
        /// Identity used for audience filtering.
        principal: Option<PrincipalId>,
    },
    /// Refuse the connection.
    Deny {
        /// Logged and reported to the caller of `attach`.
        reason: String,
    },
}

/// Decides whether a connection may join the hub.
#[async_trait]
pub trait Authenticator: Send + Sync + 'static {
    /// Inspect the presented credentials.
    async fn authenticate(&self, credentials: &Credentials) -> AuthDecision;
}

/// Admits everyone without a principal.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

#[async_trait]
impl Authenticator for AllowAll {
    async fn authenticate(&self, _credentials: &Credentials) -> AuthDecision {
        AuthDecision::Allow { principal: None }
    }
}

/// Admits connections presenting one of a fixed set of bearer tokens.
/// The principal is the label configured for the token.
#[derive(Clone, Debug, Default)]
pub struct StaticTokenAuthenticator {
    tokens: HashMap<String, PrincipalId>,
}

impl StaticTokenAuthenticator {
    /// Build from `(token, principal)` pairs.
    pub fn new<I, T, P>(tokens: I) -> Self
    where
        I: IntoIterator<Item = (T, P)>,
        T: Into<String>,
        P: Into<PrincipalId>,
    {
        Self {
            tokens: tokens.into_iter().map(|(t, p)| (t.into(), p.into())).collect(),
        }
    }

    /// Build from the `auth` settings section.
    pub fn from_settings(settings: &AuthSettings) -> Self {
        Self::new(settings.tokens.iter().map(|(t, p)| (t.clone(), p.clone())))
    }

    /// Number of accepted tokens.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether no tokens are configured.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl Authenticator for StaticTokenAuthenticator {
    async fn authenticate(&self, credentials: &Credentials) -> AuthDecision {
        let Some(token) = credentials.token.as_deref() else {
            return AuthDecision::Deny {
                reason: "missing token".into(),
            };
        };
        match self.tokens.get(token) {
            Some(principal) => AuthDecision::Allow {
                principal: Some(principal.clone()),
            },
            None => AuthDecision::Deny {
                reason: "unknown token".into(),
            },
        }
    }
}
