//! Connection-option builders for the two endpoints.
//!
//! Pooled queries go through sqlx; the replication protocol goes through
//! mysql_async, which is the only client that speaks the binlog dump
//! command. Both builders derive their TLS settings strictly from the
//! endpoint's own configuration block.

use std::time::Duration;

use mysql_async::{Opts, OptsBuilder, SslOpts};
use secrecy::ExposeSecret;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlSslMode};

use rowferry_config::shared::MySqlConnectionConfig;

/// Timeout for acquiring a pooled connection.
const POOL_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Builds sqlx connect options for one endpoint.
pub fn pool_connect_options(config: &MySqlConnectionConfig) -> MySqlConnectOptions {
    let mut options = MySqlConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.username);

    if let Some(password) = &config.password {
        options = options.password(password.expose_secret());
    }

    options = if config.tls.enabled {
        let options = options.ssl_mode(MySqlSslMode::VerifyCa);
        if config.tls.trusted_root_certs.is_empty() {
            options
        } else {
            options.ssl_ca_from_pem(config.tls.trusted_root_certs.clone().into_bytes())
        }
    } else {
        options.ssl_mode(MySqlSslMode::Preferred)
    };

    options
}

/// Opens a connection pool against one endpoint.
pub async fn connect_pool(
    config: &MySqlConnectionConfig,
    max_connections: u32,
) -> Result<MySqlPool, sqlx::Error> {
    MySqlPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(POOL_ACQUIRE_TIMEOUT)
        .connect_with(pool_connect_options(config))
        .await
}

/// Builds mysql_async options for the replication connection.
pub fn binlog_connect_opts(config: &MySqlConnectionConfig) -> Opts {
    let mut builder = OptsBuilder::default()
        .ip_or_hostname(&config.host)
        .tcp_port(config.port)
        .user(Some(&config.username))
        .prefer_socket(Some(false));

    if let Some(password) = &config.password {
        builder = builder.pass(Some(password.expose_secret()));
    }

    if config.tls.enabled {
        builder = builder.ssl_opts(Some(SslOpts::default()));
    }

    builder.into()
}
