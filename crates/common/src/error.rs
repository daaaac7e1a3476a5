//! Common error types

use thiserror::Error;

/// Common error type for configuration and workspace-level failures.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display_includes_context() {
        let err = Error::Config("qps_per_key must be greater than 0".into());
        assert_eq!(
            err.to_string(),
            "Configuration error: qps_per_key must be greater than 0"
        );
    }

    #[test]
    fn io_error_converts_and_displays() {
        let err: Error =
            std::io::Error::new(std::io::ErrorKind::NotFound, "keys file not found").into();
        assert!(err.to_string().starts_with("I/O error:"), "got: {err}");
    }

    #[test]
    fn toml_error_converts() {
        let parse_err = toml::from_str::<toml::Value>("not [ valid").unwrap_err();
        let err: Error = parse_err.into();
        assert!(err.to_string().starts_with("TOML parse error:"));
    }
}
