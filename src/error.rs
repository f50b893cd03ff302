use serde::{Deserialize, Serialize};

pub type Error = anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// The broad category of a failure, as reported to CLI and MCP callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// The home directory or `config.json` is missing or invalid.
    Config,
    /// Reading or writing the SQLite store failed.
    Database,
    /// The caller asked for something that cannot be done, e.g. an invalid expense.
    Request,
    /// The MCP service could not start or stopped unexpectedly.
    Service,
    /// A computed result failed its own consistency checks.
    Internal,
}

serde_plain::derive_display_from_serialize!(ErrorType);

/// Turns any error into the public form returned by command handlers: the category first, then
/// the full chain of context messages.
pub(crate) trait IntoResult<T> {
    fn pub_result(self, error_type: ErrorType) -> Result<T>;
}

impl<T, E> IntoResult<T> for std::result::Result<T, E>
where
    E: Into<Error>,
{
    fn pub_result(self, error_type: ErrorType) -> Result<T> {
        self.map_err(|e| {
            let e: Error = e.into();
            anyhow::anyhow!("{error_type} error: {e:#}")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_pub_result_keeps_context_chain() {
        let result: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "no such file",
        ));
        let err = result
            .context("Unable to open the ledger")
            .pub_result(ErrorType::Database)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "database error: Unable to open the ledger: no such file"
        );
    }

    #[test]
    fn test_error_type_display() {
        assert_eq!(ErrorType::Request.to_string(), "request");
        assert_eq!(ErrorType::Internal.to_string(), "internal");
    }
}
