use std::fmt;

#[derive(Debug)]
pub enum GatewayError {
    Http(reqwest::Error),
    Persistence(String),
    Internal(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Http(e) => write!(f, "http error: {}", e),
            GatewayError::Persistence(msg) => write!(f, "persistence error: {}", msg),
            GatewayError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        GatewayError::Http(e)
    }
}
