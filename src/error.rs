use thiserror::Error;

#[derive(Debug, Error)]
pub enum RedeemError {
    /// Network or session failure talking to the redemption service or a feed URL.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("store I/O error: {0}")]
    StoreIo(String),

    #[error("store is corrupt or from a newer version: {0}")]
    StoreCorrupt(String),

    #[error("unsupported flag combination: {0}")]
    UnsupportedFlag(String),

    #[error("invalid code: {0}")]
    InvalidCode(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("feed error: {0}")]
    Feed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RedeemError {
    /// Whether the error must abort the whole run rather than a single attempt.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, RedeemError::Transport(_) | RedeemError::Feed(_))
    }
}

impl From<reqwest::Error> for RedeemError {
    fn from(e: reqwest::Error) -> Self {
        RedeemError::Transport(e.to_string())
    }
}

impl From<rusqlite::Error> for RedeemError {
    fn from(e: rusqlite::Error) -> Self {
        RedeemError::StoreIo(e.to_string())
    }
}

impl From<tokio_rusqlite::Error> for RedeemError {
    fn from(e: tokio_rusqlite::Error) -> Self {
        match e {
            tokio_rusqlite::Error::Other(inner) => match inner.downcast::<RedeemError>() {
                Ok(redeem) => *redeem,
                Err(other) => RedeemError::StoreIo(other.to_string()),
            },
            other => RedeemError::StoreIo(other.to_string()),
        }
    }
}

impl From<RedeemError> for tokio_rusqlite::Error {
    fn from(e: RedeemError) -> Self {
        tokio_rusqlite::Error::Other(Box::new(e))
    }
}

pub type Result<T> = std::result::Result<T, RedeemError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_survive_the_connection_thread() {
        let wrapped: tokio_rusqlite::Error =
            RedeemError::StoreCorrupt("schema 9 > 3".to_string()).into();
        let back: RedeemError = wrapped.into();
        assert!(matches!(back, RedeemError::StoreCorrupt(msg) if msg.contains("schema 9")));
    }

    #[test]
    fn transport_errors_are_not_fatal() {
        assert!(!RedeemError::Transport("timeout".into()).is_fatal());
        assert!(RedeemError::StoreIo("disk full".into()).is_fatal());
        assert!(RedeemError::UnsupportedFlag("--schedule".into()).is_fatal());
    }
}
