//! Connection acquisition: pooled and dedicated PostgreSQL connections.
//!
//! The operator draws connections from a deadpool pool (the reuse path) or
//! opens a dedicated single connection per call. TLS goes through rustls;
//! the ssl_mode values match PostgreSQL's standard `sslmode` parameter.

use std::sync::Arc;
use std::time::Duration;

use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use rustls::ClientConfig;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, Config as PgConfig};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{info, warn};

use crate::config::ConnectOptions;
use crate::error::{BulkError, Result};

/// Connection establishment timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// SSL verification modes for PostgreSQL connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Plain TCP, no TLS.
    #[default]
    Disable,
    /// TLS without server certificate verification.
    Require,
    /// Certificate verification against the webpki roots.
    VerifyCa,
    /// Full certificate and hostname verification.
    VerifyFull,
}

impl SslMode {
    /// Parse an SSL mode from its `sslmode` string form.
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "disable" | "" => Ok(SslMode::Disable),
            "require" => Ok(SslMode::Require),
            "verify-ca" => Ok(SslMode::VerifyCa),
            "verify-full" => Ok(SslMode::VerifyFull),
            other => Err(BulkError::Validation(format!(
                "invalid ssl_mode '{}'. Valid values: disable, require, verify-ca, verify-full",
                other
            ))),
        }
    }

    /// Whether this mode needs a TLS connector at all.
    pub fn requires_tls(&self) -> bool {
        !matches!(self, SslMode::Disable)
    }

    /// Build a rustls connector for this mode, or `None` for plain TCP.
    pub(crate) fn connector(&self) -> Result<Option<MakeRustlsConnect>> {
        if !self.requires_tls() {
            return Ok(None);
        }

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = match self {
            SslMode::Disable => unreachable!(),
            SslMode::Require => {
                warn!(
                    "ssl_mode=require enables TLS but does NOT verify the server \
                     certificate; use verify-full in production"
                );
                ClientConfig::builder()
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(NoVerifier))
                    .with_no_client_auth()
            }
            SslMode::VerifyCa | SslMode::VerifyFull => {
                info!("certificate verification enabled");
                ClientConfig::builder()
                    .with_root_certificates(root_store)
                    .with_no_client_auth()
            }
        };

        Ok(Some(MakeRustlsConnect::new(config)))
    }
}

fn pg_config(options: &ConnectOptions) -> PgConfig {
    let mut config = PgConfig::new();
    config.host(&options.host);
    config.port(options.port);
    config.dbname(&options.dbname);
    config.user(&options.user);
    config.password(&options.password);
    config.keepalives(true);
    config.keepalives_idle(Duration::from_secs(30));
    config.connect_timeout(CONNECT_TIMEOUT);
    config
}

/// Build a connection pool from connect options.
pub fn build_pool(options: &ConnectOptions, max_size: usize) -> Result<Pool> {
    let config = pg_config(options);
    let mgr_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };

    let mode = SslMode::parse(&options.ssl_mode)?;
    let mgr = match mode.connector()? {
        Some(tls) => Manager::from_config(config, tls, mgr_config),
        None => {
            warn!("PostgreSQL TLS is disabled; credentials travel in plaintext");
            Manager::from_config(config, tokio_postgres::NoTls, mgr_config)
        }
    };

    Pool::builder(mgr)
        .max_size(max_size)
        .build()
        .map_err(|e| BulkError::connection(e.to_string(), "building connection pool"))
}

/// Open one dedicated connection and spawn its driver task.
///
/// The returned handle must be aborted (or the client dropped) when the
/// session ends; the caller owns both.
pub async fn connect_dedicated(options: &ConnectOptions) -> Result<(Client, JoinHandle<()>)> {
    let config = pg_config(options);
    let mode = SslMode::parse(&options.ssl_mode)?;

    match mode.connector()? {
        Some(tls) => {
            let (client, connection) = config
                .connect(tls)
                .await
                .map_err(|e| BulkError::connection(e.to_string(), "opening dedicated connection"))?;
            let driver = tokio::spawn(async move {
                if let Err(e) = connection.await {
                    warn!("dedicated connection closed with error: {}", e);
                }
            });
            Ok((client, driver))
        }
        None => {
            let (client, connection) = config
                .connect(tokio_postgres::NoTls)
                .await
                .map_err(|e| BulkError::connection(e.to_string(), "opening dedicated connection"))?;
            let driver = tokio::spawn(async move {
                if let Err(e) = connection.await {
                    warn!("dedicated connection closed with error: {}", e);
                }
            });
            Ok((client, driver))
        }
    }
}

/// Certificate verifier that accepts any certificate, for `ssl_mode=require`.
#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
