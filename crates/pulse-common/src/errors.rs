use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ParseError(String),

    #[error("config validation error: {0}")]
    ValidationError(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PulseError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("sync error: {0}")]
    Sync(String),

    #[error("relay error: {0}")]
    Relay(String),

    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = ConfigError::FileNotFound(PathBuf::from("/tmp/missing.toml"));
        assert_eq!(err.to_string(), "config file not found: /tmp/missing.toml");

        let err = ConfigError::ParseError("unexpected token".into());
        assert_eq!(err.to_string(), "config parse error: unexpected token");

        let err = ConfigError::ValidationError("heartbeat_interval must be > 0".into());
        assert_eq!(
            err.to_string(),
            "config validation error: heartbeat_interval must be > 0"
        );
    }

    #[test]
    fn pulse_error_from_config() {
        let config_err = ConfigError::ParseError("bad toml".into());
        let err: PulseError = config_err.into();
        assert!(matches!(err, PulseError::Config(_)));
        assert!(err.to_string().contains("bad toml"));
    }

    #[test]
    fn pulse_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err: PulseError = io_err.into();
        assert!(matches!(err, PulseError::Io(_)));
        assert!(err.to_string().contains("file missing"));
    }

    #[test]
    fn pulse_error_other_variants() {
        let err = PulseError::Sync("roster entry timed out".into());
        assert_eq!(err.to_string(), "sync error: roster entry timed out");

        let err = PulseError::Relay("port in use".into());
        assert_eq!(err.to_string(), "relay error: port in use");

        let err = PulseError::Other("something went wrong".into());
        assert_eq!(err.to_string(), "something went wrong");
    }
}
