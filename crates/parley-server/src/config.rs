use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "secret",
];

const DEFAULT_MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub upload_dir: PathBuf,
    pub public_url: String,
    pub max_upload_bytes: usize,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = lookup("PARLEY_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("PARLEY_JWT_SECRET is unset or still a placeholder; set it in your .env file");
        }

        let host = lookup("PARLEY_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = match lookup("PARLEY_PORT") {
            Some(port) => port.parse().context("PARLEY_PORT must be a port number")?,
            None => 3000,
        };
        let db_path = lookup("PARLEY_DB_PATH")
            .unwrap_or_else(|| "parley.db".into())
            .into();
        let upload_dir = lookup("PARLEY_UPLOAD_DIR")
            .unwrap_or_else(|| "./uploads".into())
            .into();
        let public_url =
            lookup("PARLEY_PUBLIC_URL").unwrap_or_else(|| format!("http://{}:{}", host, port));
        let max_upload_bytes = match lookup("PARLEY_MAX_UPLOAD_BYTES") {
            Some(bytes) => bytes
                .parse()
                .context("PARLEY_MAX_UPLOAD_BYTES must be a byte count")?,
            None => DEFAULT_MAX_UPLOAD_BYTES,
        };

        Ok(Self {
            host,
            port,
            db_path,
            jwt_secret,
            upload_dir,
            public_url,
            max_upload_bytes,
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<ServerConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = config(&[("PARLEY_JWT_SECRET", "a-real-secret")]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.db_path, PathBuf::from("parley.db"));
        assert_eq!(config.public_url, "http://0.0.0.0:3000");
        assert_eq!(config.max_upload_bytes, 25 * 1024 * 1024);
        assert_eq!(config.addr().unwrap().port(), 3000);
    }

    #[test]
    fn placeholder_secret_is_refused() {
        assert!(config(&[]).is_err());
        assert!(config(&[("PARLEY_JWT_SECRET", "dev-secret-change-me")]).is_err());
    }

    #[test]
    fn bad_port_is_an_error() {
        let result = config(&[("PARLEY_JWT_SECRET", "a-real-secret"), ("PARLEY_PORT", "http")]);
        assert!(result.is_err());
    }
}
