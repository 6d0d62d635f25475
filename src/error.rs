use std::error::Error as StdError;
use std::fmt;

use tokio_tungstenite::tungstenite;

/// Client error variants.
#[non_exhaustive]
#[derive(Debug)]
pub enum Error {
    /// The server address is not a valid URL
    Endpoint(url::ParseError),
    /// The server address uses a scheme other than `ws` or `wss`
    UnsupportedScheme(String),
    /// The sub-protocol token is not a valid header value
    SubProtocol(tungstenite::http::header::InvalidHeaderValue),
    /// Error establishing or reading the WebSocket connection
    Connection(tungstenite::Error),
    /// Error decoding a message payload into a typed value
    Decode(serde_json::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Endpoint(e) => write!(f, "invalid server address: {e}"),
            Self::UnsupportedScheme(scheme) => {
                write!(f, "unsupported URL scheme {scheme:?}, expected ws or wss")
            }
            Self::SubProtocol(e) => write!(f, "invalid sub-protocol token: {e}"),
            Self::Connection(e) => write!(f, "WebSocket connection error: {e}"),
            Self::Decode(e) => write!(f, "failed to decode message payload: {e}"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Endpoint(e) => Some(e),
            Self::SubProtocol(e) => Some(e),
            Self::Connection(e) => Some(e),
            Self::Decode(e) => Some(e),
            Self::UnsupportedScheme(_) => None,
        }
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Self::Endpoint(e)
    }
}

impl From<tungstenite::Error> for Error {
    fn from(e: tungstenite::Error) -> Self {
        Self::Connection(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_scheme_display() {
        let error = Error::UnsupportedScheme("https".to_owned());
        assert_eq!(
            error.to_string(),
            "unsupported URL scheme \"https\", expected ws or wss"
        );
    }

    #[test]
    fn decode_error_exposes_source() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let error: Error = json_err.into();
        assert!(error.source().is_some(), "decode error should carry a source");
        assert!(error.to_string().starts_with("failed to decode"));
    }
}
