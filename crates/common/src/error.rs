//! Configuration loading errors

use thiserror::Error;

/// Errors raised while loading or validating configuration
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

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
    fn error_display_includes_context() {
        let config_err = Error::Config("redirect_uri must be http(s)".into());
        assert_eq!(
            config_err.to_string(),
            "Configuration error: redirect_uri must be http(s)"
        );

        let missing = Error::Missing("client_secret");
        assert_eq!(missing.to_string(), "Missing required setting: client_secret");

        let io_err = Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "file not found",
        ));
        assert!(
            io_err.to_string().starts_with("I/O error:"),
            "got: {}",
            io_err
        );
    }

    #[test]
    fn error_debug_includes_variant() {
        let err = Error::Missing("client_id");
        let debug = format!("{:?}", err);
        assert!(
            debug.contains("Missing"),
            "Debug should include variant name, got: {debug}"
        );
    }
}
