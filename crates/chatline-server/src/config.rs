use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ServerError;

/// Which generator answers chat requests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum GeneratorKind {
    #[default]
    #[value(name = "openai")]
    OpenAi,
    Echo,
}

impl FromStr for GeneratorKind {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "echo" => Ok(Self::Echo),
            other => Err(ServerError::Config(format!(
                "unknown generator {other:?} (expected openai or echo)"
            ))),
        }
    }
}

/// Runtime settings for the chat server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub generator: GeneratorKind,
    /// Upper bound on one streamed reply.
    pub session_timeout: Duration,
    /// Records buffered between a session task and its response body.
    pub stream_buffer: usize,
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            environment: "development".to_string(),
            generator: GeneratorKind::default(),
            session_timeout: Duration::from_secs(300),
            stream_buffer: 64,
            allowed_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ServerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable source; unset keys keep
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ServerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(host) = get("HOST") {
            config.host = host.trim().to_string();
        }
        if let Some(port) = get("PORT") {
            config.port = parse(&port, "PORT")?;
        }
        if let Some(environment) = get("ENVIRONMENT") {
            config.environment = environment.trim().to_string();
        }
        if let Some(generator) = get("CHATLINE_GENERATOR") {
            config.generator = generator.parse()?;
        }
        if let Some(secs) = get("CHATLINE_SESSION_TIMEOUT_SECS") {
            config.session_timeout = Duration::from_secs(parse(&secs, "CHATLINE_SESSION_TIMEOUT_SECS")?);
        }
        if let Some(buffer) = get("CHATLINE_STREAM_BUFFER") {
            config.stream_buffer = parse(&buffer, "CHATLINE_STREAM_BUFFER")?;
            if config.stream_buffer == 0 {
                return Err(ServerError::Config(
                    "CHATLINE_STREAM_BUFFER must be greater than 0".into(),
                ));
            }
        }
        if let Some(origins) = get("CHATLINE_ALLOWED_ORIGINS") {
            config.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(ToOwned::to_owned)
                .collect();
        }
        Ok(config)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }
}

fn parse<T: FromStr>(raw: &str, key: &str) -> Result<T, ServerError> {
    raw.trim()
        .parse()
        .map_err(|_| ServerError::Config(format!("invalid {key} value {raw:?}")))
}

/// Loads `.env` from the crate directory, then from the working directory.
pub fn load_dotenv() {
    let _ = dotenvy::from_path(Path::new(
        format!("{}/.env", env!("CARGO_MANIFEST_DIR")).as_str(),
    ));
    dotenvy::dotenv().ok();
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = ServerConfig::from_lookup(lookup(&[])).expect("config");
        assert_eq!(config.bind_addr(), "127.0.0.1:8000");
        assert_eq!(config.generator, GeneratorKind::OpenAi);
        assert_eq!(config.session_timeout, Duration::from_secs(300));
        assert_eq!(config.allowed_origins, vec!["http://localhost:3000"]);
        assert!(config.is_development());
    }

    #[test]
    fn reads_every_key() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("HOST", "0.0.0.0"),
            ("PORT", "9001"),
            ("ENVIRONMENT", "production"),
            ("CHATLINE_GENERATOR", "Echo"),
            ("CHATLINE_SESSION_TIMEOUT_SECS", "5"),
            ("CHATLINE_STREAM_BUFFER", "8"),
            ("CHATLINE_ALLOWED_ORIGINS", "http://a.test, http://b.test,"),
        ]))
        .expect("config");
        assert_eq!(config.bind_addr(), "0.0.0.0:9001");
        assert_eq!(config.generator, GeneratorKind::Echo);
        assert_eq!(config.session_timeout, Duration::from_secs(5));
        assert_eq!(config.stream_buffer, 8);
        assert_eq!(config.allowed_origins, vec!["http://a.test", "http://b.test"]);
        assert!(!config.is_development());
    }

    #[test]
    fn invalid_values_are_config_errors() {
        let err = ServerConfig::from_lookup(lookup(&[("PORT", "eighty")])).expect_err("port");
        assert!(err.to_string().contains("PORT"));
        let err = ServerConfig::from_lookup(lookup(&[("CHATLINE_GENERATOR", "llama")]))
            .expect_err("generator");
        assert!(err.to_string().contains("llama"));
        let err = ServerConfig::from_lookup(lookup(&[("CHATLINE_STREAM_BUFFER", "0")]))
            .expect_err("buffer");
        assert!(matches!(err, ServerError::Config(_)));
    }
}
