use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use anyhow::{anyhow, Context};
use futures::future::poll_fn;
use hyper::{client::conn::SendRequest, Body, Request, Response};
use rustls::{
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    crypto::{verify_tls12_signature, verify_tls13_signature, WebPkiSupportedAlgorithms},
    pki_types::{CertificateDer, ServerName, UnixTime},
    ClientConfig, DigitallySignedStruct, SignatureScheme,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    time::timeout,
};
use tokio_rustls::TlsConnector;
use tracing::{debug, trace, warn};
use trust_dns_resolver::{
    config::{ResolverConfig, ResolverOpts},
    TokioAsyncResolver,
};

use crate::config::Config;

/// Opens connections to the run's target: plain TCP, or TCP wrapped in TLS for
/// `https` targets.
#[derive(Clone)]
pub struct Connector {
    addr: SocketAddr,
    tls: Option<Tls>,
}

#[derive(Clone)]
struct Tls {
    connector: TlsConnector,
    server_name: ServerName<'static>,
}

impl Connector {
    pub fn plain(addr: SocketAddr) -> Self {
        Connector { addr, tls: None }
    }

    /// A connector for `addr` that speaks TLS when the configured target does.
    pub fn new(addr: SocketAddr, config: &Config) -> Result<Self, anyhow::Error> {
        if !config.tls {
            return Ok(Connector::plain(addr));
        }
        let server_name = ServerName::try_from(config.host.clone())
            .with_context(|| format!("'{}' is not a valid TLS server name", config.host))?;
        Ok(Connector {
            addr,
            tls: Some(Tls {
                connector: TlsConnector::from(Arc::new(insecure_tls_config())),
                server_name,
            }),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Connects and completes the handshakes, each step bounded by `budget`.
    pub async fn open(&self, budget: Duration) -> Result<Connection, anyhow::Error> {
        let addr = self.addr;
        let stream = match timeout(budget, TcpStream::connect(addr)).await {
            Err(_) => return Err(anyhow!("connect timeout")),
            Ok(Err(e)) => return Err(anyhow!(e)),
            Ok(Ok(stream)) => stream,
        };
        stream.set_nodelay(true)?;

        match &self.tls {
            None => Connection::handshake(stream, addr, budget).await,
            Some(tls) => {
                let connect = tls.connector.connect(tls.server_name.clone(), stream);
                let stream = match timeout(budget, connect).await {
                    Err(_) => return Err(anyhow!("tls handshake timeout")),
                    Ok(Err(e)) => return Err(anyhow!(e)),
                    Ok(Ok(stream)) => stream,
                };
                Connection::handshake(stream, addr, budget).await
            }
        }
    }
}

/// One HTTP/1.1 client connection. The connection driver runs on its own task and
/// shuts down once this handle is dropped.
pub struct Connection {
    sender: SendRequest<Body>,
}

impl Connection {
    async fn handshake<T>(io: T, addr: SocketAddr, budget: Duration) -> Result<Self, anyhow::Error>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sender, conn) = match timeout(budget, hyper::client::conn::handshake(io)).await {
            Err(_) => return Err(anyhow!("handshake timeout")),
            Ok(Err(e)) => return Err(anyhow!(e)),
            Ok(Ok(handshake)) => handshake,
        };

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                trace!(%addr, error = %e, "connection closed with error");
            }
        });

        Ok(Connection { sender })
    }

    /// Resolves once the connection can take another request; fails if the peer closed it.
    pub async fn ready(&mut self) -> Result<(), hyper::Error> {
        poll_fn(|cx| self.sender.poll_ready(cx)).await
    }

    pub async fn send(&mut self, req: Request<Body>) -> Result<Response<Body>, hyper::Error> {
        self.sender.send_request(req).await
    }
}

/// Certificates are not checked: the target is whatever the user pointed the
/// benchmark at. Handshake signatures are still verified.
fn insecure_tls_config() -> ClientConfig {
    let algorithms = rustls::crypto::ring::default_provider().signature_verification_algorithms;
    ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AnyCertificate { algorithms }))
        .with_no_client_auth()
}

#[derive(Debug)]
struct AnyCertificate {
    algorithms: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for AnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

/// Resolves `host` to the socket address every worker connects to.
pub async fn resolve(host: &str, port: u16) -> Result<SocketAddr, anyhow::Error> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    let resolver =
        TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())?;
    let start = tokio::time::Instant::now();
    let ips = resolver
        .lookup_ip(host)
        .await
        .with_context(|| format!("failed to resolve {}", host))?;
    debug!(host, elapsed_ms = start.elapsed().as_millis() as u64, "DNS resolution done");

    match ips.iter().next() {
        Some(ip) => Ok(SocketAddr::new(ip, port)),
        None => Err(anyhow!("no addresses found for {}", host)),
    }
}

/// Raises the open file limit so every worker can hold a socket.
pub fn raise_nofile_limit(concurrency: usize) {
    let wanted = (concurrency as u64).saturating_add(64);
    match rlimit::increase_nofile_limit(wanted) {
        Ok(limit) if limit < wanted => warn!(
            limit,
            wanted, "open file limit is below the concurrency level, connects may fail"
        ),
        Ok(limit) => debug!(limit, "open file limit raised"),
        Err(e) => warn!(error = %e, "failed to raise the open file limit"),
    }
}
