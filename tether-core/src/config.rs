//! Link settings, loaded once from a TOML file and never mutated.
//!
//! ```toml
//! server-socket = "127.0.0.1"
//! server-port = 8443
//! certificate = "certificate.crt"
//! peer-name = "control.example"
//! allow-self-signed = false
//!
//! [authentication]
//! password = "secret"
//! passwordless = false
//! public-key = "public.pem"
//! ```
//!
//! Relative paths resolve against the directory holding the settings file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SocketError;
use crate::packet::LoginPacket;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Settings {
    /// Control node host name or address.
    pub server_socket: String,
    pub server_port: u16,
    /// PEM file holding the CA certificate(s) to trust.
    pub certificate: PathBuf,
    /// Name the server certificate must be valid for. Defaults to
    /// `server-socket`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_name: Option<String>,
    /// Also accept a server certificate that is its own issuer.
    pub allow_self_signed: bool,
    /// Seconds between keep-alive packets.
    pub keep_alive_interval: u64,
    /// Most outbound packets held back while unauthenticated.
    pub waiting_queue_limit: usize,
    pub authentication: AuthenticationSettings,

    #[serde(skip)]
    base_dir: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AuthenticationSettings {
    pub password: String,
    /// Authenticate with the public key instead of the password.
    pub passwordless: bool,
    /// Key material sent to the node, relative to the settings file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<PathBuf>,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_socket: "127.0.0.1".into(),
            server_port: 8443,
            certificate: PathBuf::from("certificate.crt"),
            peer_name: None,
            allow_self_signed: false,
            keep_alive_interval: 10,
            waiting_queue_limit: 4096,
            authentication: AuthenticationSettings::default(),
            base_dir: PathBuf::from("."),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl Settings {
    pub fn load(path: &Path) -> Result<Self, SocketError> {
        let contents = std::fs::read_to_string(path)?;
        let mut settings = Self::from_toml_str(&contents)?;
        if let Some(dir) = path.parent() {
            settings.base_dir = dir.to_path_buf();
        }
        Ok(settings)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, SocketError> {
        Ok(toml::from_str(contents)?)
    }

    /// Resolve relative paths against `dir` instead of the file location.
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.server_socket, self.server_port)
    }

    pub fn peer_name(&self) -> &str {
        self.peer_name.as_deref().unwrap_or(&self.server_socket)
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn ca_path(&self) -> PathBuf {
        self.resolve(&self.certificate)
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.keep_alive_interval.max(1))
    }

    /// Build the login packet for these credentials.
    pub fn login_packet(&self) -> Result<LoginPacket, SocketError> {
        let auth = &self.authentication;
        let mut login = LoginPacket::with_password(auth.password.clone());

        match &auth.public_key {
            Some(path) => {
                let path = self.resolve(path);
                login.public_key_data = std::fs::read(&path).map_err(|e| {
                    SocketError::Configuration(format!(
                        "cannot read public key {}: {e}",
                        path.display()
                    ))
                })?;
                login.is_public_key_auth = auth.passwordless;
            }
            None if auth.passwordless => {
                return Err(SocketError::Configuration(
                    "passwordless authentication needs a public-key file".into(),
                ));
            }
            None => {}
        }

        Ok(login)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        server-socket = "node.example"
        server-port = 19132
        certificate = "certs/ca.crt"
        allow-self-signed = true

        [authentication]
        password = "secret"
    "#;

    #[test]
    fn parses_kebab_case_keys() {
        let settings = Settings::from_toml_str(SAMPLE).unwrap();
        assert_eq!(settings.address(), "node.example:19132");
        assert!(settings.allow_self_signed);
        assert_eq!(settings.authentication.password, "secret");
        assert_eq!(settings.keep_alive_interval(), Duration::from_secs(10));
    }

    #[test]
    fn peer_name_defaults_to_host() {
        let settings = Settings::from_toml_str(SAMPLE).unwrap();
        assert_eq!(settings.peer_name(), "node.example");

        let settings = Settings {
            peer_name: Some("control.example".into()),
            ..settings
        };
        assert_eq!(settings.peer_name(), "control.example");
    }

    #[test]
    fn relative_paths_follow_the_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tether.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.ca_path(), dir.path().join("certs/ca.crt"));
    }

    #[test]
    fn roundtrip_settings() {
        let text = toml::to_string_pretty(&Settings::default()).unwrap();
        assert!(text.contains("server-socket"));
        let parsed = Settings::from_toml_str(&text).unwrap();
        assert_eq!(parsed.server_port, 8443);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        assert!(matches!(
            Settings::from_toml_str("server-port = \"nope\""),
            Err(SocketError::Settings(_))
        ));
    }

    #[test]
    fn password_login() {
        let settings = Settings::from_toml_str(SAMPLE).unwrap();
        let login = settings.login_packet().unwrap();
        assert_eq!(login.password, "secret");
        assert!(!login.is_public_key_auth);
        assert!(login.public_key_data.is_empty());
    }

    #[test]
    fn public_key_login_reads_key_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("public.pem"), b"KEY").unwrap();

        let mut settings = Settings::default().with_base_dir(dir.path());
        settings.authentication.passwordless = true;
        settings.authentication.public_key = Some("public.pem".into());

        let login = settings.login_packet().unwrap();
        assert!(login.is_public_key_auth);
        assert_eq!(login.public_key_data, b"KEY");
    }

    #[test]
    fn passwordless_without_key_is_refused() {
        let mut settings = Settings::default();
        settings.authentication.passwordless = true;
        assert!(matches!(
            settings.login_packet(),
            Err(SocketError::Configuration(_))
        ));
    }
}
