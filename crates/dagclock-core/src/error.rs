use std::fmt;

/// Machine-readable error codes shared by the store, vector and index layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    StoreClosed,
    EmptyKey,
    EmptyValue,
    BackendFailure,
    CorruptVector,
    EventNotFound,
    ConfigParseError,
    MedianInconsistent,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::StoreClosed => "E1001",
            Self::EmptyKey => "E1002",
            Self::EmptyValue => "E1003",
            Self::BackendFailure => "E1004",
            Self::CorruptVector => "E2001",
            Self::EventNotFound => "E2002",
            Self::ConfigParseError => "E3001",
            Self::MedianInconsistent => "E9001",
        }
    }

    /// Short human-facing summary for logs.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::StoreClosed => "Overlay store is closed",
            Self::EmptyKey => "Empty key",
            Self::EmptyValue => "Empty value",
            Self::BackendFailure => "Persistent store failure",
            Self::CorruptVector => "Stored vector is corrupted",
            Self::EventNotFound => "Event not indexed",
            Self::ConfigParseError => "Config file parse error",
            Self::MedianInconsistent => "Median time sanity check failed",
        }
    }

    /// Optional remediation hint for operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::StoreClosed => Some("The index was closed; reopen it before processing events."),
            Self::EmptyKey | Self::EmptyValue => None,
            Self::BackendFailure => Some("Check disk space and permissions of the vector database."),
            Self::CorruptVector => Some("Drop the vector database and reindex the current epoch."),
            Self::EventNotFound => Some("Index parent events before their descendants."),
            Self::ConfigParseError => Some("Fix syntax in the vector clock config and retry."),
            Self::MedianInconsistent => {
                Some("The weight table and vector disagree. Report a bug with logs.")
            }
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
