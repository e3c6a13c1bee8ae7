//! Credentials used to open transports.

use async_trait::async_trait;
use realtime_wire::{error_info, ErrorInfo};
use std::time::SystemTime;

/// An access token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Token string sent to the broker
    pub token: String,
    /// When the token stops being valid
    pub expires: Option<SystemTime>,
    /// Client id bound to the token
    pub client_id: Option<String>,
}

impl Token {
    /// Token without expiry or client id
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires: None,
            client_id: None,
        }
    }
}

/// Source of tokens for the connection
#[async_trait]
pub trait Auth: Send + Sync {
    /// Whether a new token can be obtained
    fn can_renew(&self) -> bool;

    /// Token to present on the next transport, if any
    fn current_token(&self) -> Option<Token>;

    /// Obtain a new token and make it current
    async fn renew_token(&self) -> Result<Token, ErrorInfo>;
}

/// Fixed token supplied by configuration; cannot be renewed
#[derive(Debug, Default)]
pub struct StaticTokenAuth {
    token: Option<Token>,
}

impl StaticTokenAuth {
    /// Use `token` for every transport
    pub fn new(token: Option<Token>) -> Self {
        Self { token }
    }
}

#[async_trait]
impl Auth for StaticTokenAuth {
    fn can_renew(&self) -> bool {
        false
    }

    fn current_token(&self) -> Option<Token> {
        self.token.clone()
    }

    async fn renew_token(&self) -> Result<Token, ErrorInfo> {
        Err(ErrorInfo::new(
            error_info::TOKEN_NOT_RENEWABLE,
            Some(403),
            "Token is static and cannot be renewed",
        ))
    }
}
