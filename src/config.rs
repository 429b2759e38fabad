use std::{env, path::PathBuf, str::FromStr};

use anyhow::{Context, Result, anyhow};

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_STORAGE_ROOT: &str = "storage/public";
const DEFAULT_SESSION_TTL_DAYS: i64 = 7;
const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Deployment environment. Only `local` unlocks the debug routes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AppEnv {
    Local,
    Production,
    Other(String),
}

impl AppEnv {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" | "development" | "dev" => AppEnv::Local,
            "" | "production" | "prod" => AppEnv::Production,
            other => AppEnv::Other(other.to_string()),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, AppEnv::Local)
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub app_env: AppEnv,
    pub app_url: String,
    pub storage_root: PathBuf,
    pub session_ttl_days: i64,
    pub max_connections: u32,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|value| !value.trim().is_empty())
            .context("DATABASE_URL env var is missing")?;

        let port = parse_or(&lookup, "PORT", DEFAULT_PORT)?;
        let session_ttl_days = parse_or(&lookup, "SESSION_TTL_DAYS", DEFAULT_SESSION_TTL_DAYS)?;
        if session_ttl_days <= 0 {
            return Err(anyhow!("SESSION_TTL_DAYS must be positive"));
        }
        let max_connections =
            parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?;

        let app_env = lookup("APP_ENV")
            .map(|value| AppEnv::parse(&value))
            .unwrap_or(AppEnv::Production);

        let app_url = lookup("APP_URL")
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| format!("http://localhost:{port}"));

        let storage_root = lookup("STORAGE_ROOT")
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_ROOT));

        Ok(Self {
            database_url,
            port,
            app_env,
            app_url,
            storage_root,
            session_ttl_days,
            max_connections,
        })
    }

    /// Session cookies are only marked `Secure` outside local development.
    pub fn secure_cookies(&self) -> bool {
        !self.app_env.is_local()
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw}")),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn applies_defaults() {
        let config =
            AppConfig::from_lookup(lookup_from(&[("DATABASE_URL", "postgres://db/edutrail")]))
                .expect("config");

        assert_eq!(config.port, 8080);
        assert_eq!(config.app_env, AppEnv::Production);
        assert_eq!(config.app_url, "http://localhost:8080");
        assert_eq!(config.storage_root, PathBuf::from("storage/public"));
        assert_eq!(config.session_ttl_days, 7);
        assert!(config.secure_cookies());
    }

    #[test]
    fn requires_database_url() {
        let err = AppConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn trims_trailing_slash_from_app_url() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://db/edutrail"),
            ("APP_URL", "https://edutrail.example/"),
            ("APP_ENV", "local"),
        ]))
        .expect("config");

        assert_eq!(config.app_url, "https://edutrail.example");
        assert!(config.app_env.is_local());
        assert!(!config.secure_cookies());
    }

    #[test]
    fn rejects_invalid_port() {
        let err = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://db/edutrail"),
            ("PORT", "eighty"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn rejects_non_positive_session_ttl() {
        let result = AppConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://db/edutrail"),
            ("SESSION_TTL_DAYS", "0"),
        ]));
        assert!(result.is_err());
    }
}
