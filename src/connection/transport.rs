//! TCP/TLS session establishment
//!
//! Socket tuning, optional TLS and the greeting check. Every failure to
//! establish the session is reported as [`NntpError::Connect`],
//! [`NntpError::Tls`] or [`NntpError::Timeout`].

use crate::config::ProviderConfig;
use crate::error::{NntpError, Result};
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tracing::{debug, warn};

use super::state::ConnectionState;
use super::{AsyncStream, NntpConnection};

const TCP_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// BufReader capacity for article bodies (256KB)
const BUFREADER_CAPACITY: usize = 256 * 1024;

const RECV_BUFFER_SIZE: usize = 4 * 1024 * 1024;
const SEND_BUFFER_SIZE: usize = 64 * 1024;

/// Certificate verifier that accepts every certificate
///
/// **Security Warning:** only for providers with self-signed certificates,
/// selected through [`ProviderConfig::allow_insecure_tls`].
#[derive(Debug)]
pub(super) struct DangerousAcceptAnyCertificate;

impl ServerCertVerifier for DangerousAcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
            SignatureScheme::ED448,
        ]
    }
}

fn resolve(config: &ProviderConfig) -> Result<SocketAddr> {
    let addr = format!("{}:{}", config.host, config.port);
    addr.to_socket_addrs()
        .map_err(|e| NntpError::Connect(format!("Failed to resolve {}: {}", addr, e)))?
        .next()
        .ok_or_else(|| NntpError::Connect(format!("No address resolved for {}", addr)))
}

/// Open a tuned TCP socket to the provider
async fn open_tcp(config: &ProviderConfig) -> Result<TcpStream> {
    use socket2::{Domain, Protocol, Socket, Type};

    let socket_addr = resolve(config)?;
    let domain = if socket_addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| NntpError::Connect(e.to_string()))?;

    // Request/response protocol: small commands must go out immediately
    socket
        .set_nodelay(true)
        .map_err(|e| NntpError::Connect(e.to_string()))?;

    if let Err(e) = socket.set_recv_buffer_size(RECV_BUFFER_SIZE) {
        warn!(
            "Failed to set receive buffer size to {} bytes: {}",
            RECV_BUFFER_SIZE, e
        );
    }
    if let Err(e) = socket.set_send_buffer_size(SEND_BUFFER_SIZE) {
        warn!(
            "Failed to set send buffer size to {} bytes: {}",
            SEND_BUFFER_SIZE, e
        );
    }

    // socket2's connect blocks; switch to non-blocking only after it succeeds
    let tcp_stream = timeout(
        TCP_CONNECT_TIMEOUT,
        tokio::task::spawn_blocking(move || -> std::io::Result<std::net::TcpStream> {
            socket.connect(&socket_addr.into())?;
            socket.set_nonblocking(true)?;
            Ok(socket.into())
        }),
    )
    .await
    .map_err(|_| NntpError::Timeout)?
    .map_err(|e| NntpError::Connect(format!("Connect task failed: {}", e)))?
    .map_err(|e| NntpError::Connect(format!("{}: {}", socket_addr, e)))?;

    TcpStream::from_std(tcp_stream).map_err(|e| NntpError::Connect(e.to_string()))
}

fn tls_config(config: &ProviderConfig) -> ClientConfig {
    use tokio_rustls::rustls::crypto::{CryptoProvider, ring};
    let _ = CryptoProvider::install_default(ring::default_provider());

    if config.allow_insecure_tls {
        warn!(
            "TLS certificate validation disabled for {}",
            config.server_id()
        );
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(DangerousAcceptAnyCertificate))
            .with_no_client_auth()
    } else {
        let mut root_store = RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth()
    }
}

impl NntpConnection {
    /// Connect to the provider, with TLS when configured
    ///
    /// Does not authenticate; call [`authenticate`](Self::authenticate) next,
    /// or use [`TcpConnectionFactory`](super::TcpConnectionFactory) which does
    /// both.
    ///
    /// # Errors
    ///
    /// - [`NntpError::Connect`] - resolution or TCP connect failed
    /// - [`NntpError::Tls`] - TLS handshake failed
    /// - [`NntpError::Timeout`] - connect or handshake took too long
    /// - [`NntpError::Protocol`] - the server greeted with an error code
    pub async fn connect(config: Arc<ProviderConfig>) -> Result<Self> {
        debug!("Connecting to NNTP server {}", config.server_id());

        let tcp_stream = open_tcp(&config).await?;

        let stream: Box<dyn AsyncStream> = if config.use_tls {
            let connector = TlsConnector::from(Arc::new(tls_config(&config)));
            let server_name = ServerName::try_from(config.host.as_str())
                .map_err(|e| NntpError::Tls(format!("Invalid domain: {}", e)))?
                .to_owned();

            let tls_stream = timeout(
                TLS_HANDSHAKE_TIMEOUT,
                connector.connect(server_name, tcp_stream),
            )
            .await
            .map_err(|_| NntpError::Timeout)?
            .map_err(|e| NntpError::Tls(format!("TLS handshake failed: {}", e)))?;
            Box::new(tls_stream)
        } else {
            Box::new(tcp_stream)
        };

        Self::from_stream(stream, config).await
    }

    /// Run the session over an already-established stream
    ///
    /// Reads and checks the greeting. Used by [`connect`](Self::connect) and
    /// by tests driving the protocol over in-memory pipes.
    pub async fn from_stream(
        stream: Box<dyn AsyncStream>,
        config: Arc<ProviderConfig>,
    ) -> Result<Self> {
        let mut conn = Self {
            stream: BufReader::with_capacity(BUFREADER_CAPACITY, stream),
            state: ConnectionState::Connected,
            config,
            is_broken: false,
            awaiting_response: false,
        };

        let greeting = conn.read_response().await?;
        debug!("Server greeting: {} {}", greeting.code, greeting.message);

        if !greeting.is_success() {
            return Err(NntpError::Protocol {
                code: greeting.code,
                message: greeting.message,
            });
        }

        if !conn.config.has_credentials() {
            conn.state = ConnectionState::Ready;
        }

        Ok(conn)
    }
}
