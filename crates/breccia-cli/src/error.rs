//! Error types for protocol parsing.

use breccia_core::NotationError;

/// Errors raised while parsing protocol commands.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The `position` command had no usable position.
    #[error("malformed position command")]
    MalformedPosition,
    /// A position notation string failed to parse.
    #[error("invalid position notation: {0}")]
    InvalidNotation(#[from] NotationError),
    /// A move token in a `position ... moves` tail failed to parse or apply.
    #[error("invalid move: \"{token}\"")]
    InvalidMove {
        /// The offending token.
        token: String,
    },
    /// A numeric argument was missing or malformed.
    #[error("invalid {field} argument: \"{found}\"")]
    InvalidNumber {
        /// Which argument was malformed.
        field: &'static str,
        /// What was found instead of a number.
        found: String,
    },
}

#[cfg(test)]
mod tests {
    use super::ProtocolError;

    #[test]
    fn display_messages() {
        let err = ProtocolError::InvalidMove {
            token: "e9e9".to_string(),
        };
        assert_eq!(format!("{err}"), "invalid move: \"e9e9\"");

        let err = ProtocolError::InvalidNumber {
            field: "depth",
            found: "abc".to_string(),
        };
        assert!(format!("{err}").contains("depth"));
    }
}
