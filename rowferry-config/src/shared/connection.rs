use secrecy::SecretString;
use serde::Deserialize;

/// Connection settings for one MySQL endpoint.
///
/// This intentionally does not implement [`serde::Serialize`] to avoid
/// accidentally leaking the password into serialized forms.
#[derive(Debug, Clone, Deserialize)]
pub struct MySqlConnectionConfig {
    /// Hostname or IP address of the server.
    pub host: String,
    /// TCP port, default 3306.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Username for authentication.
    pub username: String,
    /// Password for authentication.
    pub password: Option<SecretString>,
    /// TLS settings for this endpoint.
    ///
    /// Source and target TLS are derived independently; enabling TLS on one
    /// endpoint says nothing about the other.
    #[serde(default = "TlsConfig::disabled")]
    pub tls: TlsConfig,
}

fn default_port() -> u16 {
    3306
}

/// TLS settings for a single database endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    /// Whether TLS is required with server certificate verification.
    pub enabled: bool,
    /// PEM-encoded trusted root certificates. Empty means the system roots.
    #[serde(default)]
    pub trusted_root_certs: String,
}

impl TlsConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            trusted_root_certs: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_with_defaults() {
        let config: MySqlConnectionConfig = serde_json::from_str(
            r#"{"host": "db.internal", "username": "ferry", "password": "hunter2"}"#,
        )
        .unwrap();

        assert_eq!(config.host, "db.internal");
        assert_eq!(config.port, 3306);
        assert!(!config.tls.enabled);
    }

    #[test]
    fn debug_does_not_leak_password() {
        let config: MySqlConnectionConfig = serde_json::from_str(
            r#"{"host": "db.internal", "username": "ferry", "password": "hunter2"}"#,
        )
        .unwrap();

        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
    }
}
