// Configuration
//
// Layering, lowest to highest precedence:
//   1. built-in defaults
//   2. optional config file (format chosen by extension)
//   3. KEEL__* environment variables (`__` separates sections)
//   4. explicit overrides applied by the caller (CLI flags)

use crate::domain::journal::DEFAULT_JOURNAL_TABLE;
use crate::domain::JournalTable;
use crate::error::{AppError, Result};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "KEEL";
pub const DEFAULT_PORT: u16 = 5432;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_MIGRATION_DIR: &str = "migrations";

/// Characters left alone in userinfo and path segments
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub migrations: MigrationsConfig,
}

/// Connection settings: either a full `url` or discrete fields
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub tls: Option<TlsConfig>,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub mode: SslMode,
    pub ca_file: Option<PathBuf>,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    Disable,
    #[default]
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MigrationsConfig {
    pub directory: PathBuf,
    pub table: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: None,
            port: DEFAULT_PORT,
            username: None,
            password: None,
            database: None,
            tls: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(DEFAULT_MIGRATION_DIR),
            table: DEFAULT_JOURNAL_TABLE.to_string(),
        }
    }
}

impl Settings {
    /// Load settings from an optional file plus the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__"),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        Ok(settings)
    }
}

impl MigrationsConfig {
    pub fn journal_table(&self) -> Result<JournalTable> {
        Ok(JournalTable::new(self.table.clone())?)
    }
}

impl DatabaseConfig {
    /// Connection URL for the pool
    ///
    /// An explicit `url` wins. Otherwise a Postgres URL is assembled from the
    /// discrete fields with credentials percent-encoded and TLS material
    /// passed as `sslmode`/`sslrootcert`/`sslcert`/`sslkey`.
    pub fn connection_url(&self) -> Result<String> {
        if let Some(url) = self.url.as_deref().filter(|u| !u.trim().is_empty()) {
            return Ok(url.trim().to_string());
        }

        let host = self.host.as_deref().ok_or_else(|| {
            AppError::Config("database.url or database.host must be set".to_string())
        })?;
        let database = self
            .database
            .as_deref()
            .ok_or_else(|| AppError::Config("database.database must be set".to_string()))?;

        let mut url = String::from("postgres://");
        if let Some(user) = self.username.as_deref() {
            url.push_str(&encode(user));
            if let Some(password) = self.password.as_deref() {
                url.push(':');
                url.push_str(&encode(password));
            }
            url.push('@');
        }
        url.push_str(host);
        url.push(':');
        url.push_str(&self.port.to_string());
        url.push('/');
        url.push_str(&encode(database));

        if let Some(tls) = &self.tls {
            let mut params = vec![format!("sslmode={}", tls.mode.as_str())];
            for (key, file) in [
                ("sslrootcert", &tls.ca_file),
                ("sslcert", &tls.cert_file),
                ("sslkey", &tls.key_file),
            ] {
                if let Some(file) = file {
                    params.push(format!("{}={}", key, encode(&tls_file(key, file)?)));
                }
            }
            url.push('?');
            url.push_str(&params.join("&"));
        }

        Ok(url)
    }
}

fn encode(s: &str) -> String {
    utf8_percent_encode(s, COMPONENT).to_string()
}

fn tls_file(key: &str, path: &Path) -> Result<String> {
    if !path.is_file() {
        return Err(AppError::Config(format!(
            "{} file not found: {}",
            key,
            path.display()
        )));
    }
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| AppError::Config(format!("{} path is not UTF-8: {}", key, path.display())))
}

/// Mask the password in a connection URL, for logging
pub fn sanitize_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((userinfo, host_part)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match userinfo.split_once(':') {
        Some((user, _)) => format!("{}://{}:***@{}", scheme, user, host_part),
        None => url.to_string(),
    }
}
