/// Boxed error used as the source of transport and decoding failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error that describes a failed correlation or resolution step.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A credential, secret key, or store record does not exist.
    /// `tried` names every candidate consulted, in order, when the lookup
    /// walked a fallback chain.
    #[error("{what} not found{}", tried_suffix(.tried))]
    NotFound { what: String, tried: Vec<String> },
    /// A network call or remote service failed.
    #[error("{context}")]
    Transport {
        context: String,
        #[source]
        source: Option<BoxError>,
    },
    /// A record was found but could not be decoded.
    #[error("malformed {what}")]
    Malformed {
        what: String,
        #[source]
        source: Option<BoxError>,
    },
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
    #[error("invalid timeframe start {value:?}")]
    InvalidStart {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("invalid timeframe end {value:?}")]
    InvalidEnd {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("timeframe end {end} is before start {start}")]
    InvalidRange {
        start: chrono::DateTime<chrono::Utc>,
        end: chrono::DateTime<chrono::Utc>,
    },
}

fn tried_suffix(tried: &[String]) -> String {
    if tried.is_empty() {
        String::new()
    } else {
        format!(" (tried {})", tried.join(", "))
    }
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound {
            what: what.into(),
            tried: Vec::new(),
        }
    }

    pub fn transport(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Transport {
            context: context.into(),
            source: Some(source.into()),
        }
    }

    pub fn malformed(what: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Malformed {
            what: what.into(),
            source: Some(source.into()),
        }
    }

    /// Returns true if this error signals simple absence rather than failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod test {
    use super::Error;

    #[test]
    fn test_display() {
        let err = Error::NotFound {
            what: "dynatrace credentials".to_string(),
            tried: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(err.to_string(), "dynatrace credentials not found (tried a, b)");
        assert!(err.is_not_found());

        let err = Error::not_found("secret key DT_TENANT");
        assert_eq!(err.to_string(), "secret key DT_TENANT not found");

        let err = Error::transport("GET /events: 500 Internal Server Error: boom", "boom");
        assert_eq!(err.to_string(), "GET /events: 500 Internal Server Error: boom");
        assert!(!err.is_not_found());
    }
}
