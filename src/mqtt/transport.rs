//! Broker addressing, socket setup and TLS upgrade

use rumqttc::tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use rumqttc::tokio_rustls::rustls::client::Resumption;
use rumqttc::tokio_rustls::rustls::pki_types::pem::PemObject;
use rumqttc::tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rumqttc::tokio_rustls::rustls::{
    self, ClientConfig as RustlsConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
};
use rumqttc::tokio_rustls::TlsConnector;
use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tracing::{debug, info, warn};

use super::config::{TcpOptions, TlsOptions};
use super::error::ClientError;

pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> ByteStream for T {}

/// Plain or TLS transport, erased
pub type BoxedStream = Box<dyn ByteStream>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Tcp,
    Tls,
}

/// Parsed broker address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
}

impl Target {
    pub fn is_secure(&self) -> bool {
        self.scheme == Scheme::Tls
    }

    /// `Some` when the host needs no name resolution
    pub fn literal_ip(&self) -> Option<IpAddr> {
        self.host.parse().ok()
    }

    fn invalid(target: &str, reason: &str) -> ClientError {
        ClientError::InvalidTarget {
            target: target.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl FromStr for Target {
    type Err = ClientError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = match raw.split_once("://") {
            Some(("tcp" | "mqtt", rest)) => (Scheme::Tcp, rest),
            Some(("tls" | "ssl" | "mqtts", rest)) => (Scheme::Tls, rest),
            Some((other, _)) => {
                return Err(Self::invalid(raw, &format!("unknown scheme '{}'", other)))
            }
            None => (Scheme::Tcp, raw),
        };

        let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
            let (host, tail) = bracketed
                .split_once(']')
                .ok_or_else(|| Self::invalid(raw, "unterminated '['"))?;
            let port = tail
                .strip_prefix(':')
                .ok_or_else(|| Self::invalid(raw, "missing port"))?;
            (host, port)
        } else {
            let (host, port) = rest
                .rsplit_once(':')
                .ok_or_else(|| Self::invalid(raw, "missing port"))?;
            if host.contains(':') {
                return Err(Self::invalid(raw, "IPv6 hosts must be bracketed"));
            }
            (host, port)
        };

        if host.is_empty() {
            return Err(Self::invalid(raw, "missing host"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| Self::invalid(raw, "port is not a number"))?;

        Ok(Target {
            scheme,
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = match self.scheme {
            Scheme::Tcp => "tcp",
            Scheme::Tls => "tls",
        };
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", scheme, self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", scheme, self.host, self.port)
        }
    }
}

/// Resolves a hostname to the first address the resolver returns
pub async fn resolve(target: &Target) -> Result<SocketAddr, ClientError> {
    let failure = |source| ClientError::ResolutionError {
        host: target.host.clone(),
        source,
    };
    let mut addrs = lookup_host((target.host.as_str(), target.port))
        .await
        .map_err(failure)?;
    let addr = addrs.next().ok_or_else(|| {
        failure(io::Error::new(
            io::ErrorKind::NotFound,
            "resolver returned no addresses",
        ))
    })?;
    debug!("Resolved {} to {}", target.host, addr);
    Ok(addr)
}

/// Opens a TCP connection with the socket options applied
pub async fn connect_tcp(addr: SocketAddr, options: &TcpOptions) -> Result<TcpStream, ClientError> {
    let failure = |source| ClientError::TransportError {
        addr: addr.to_string(),
        source,
    };

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(failure)?;

    socket.set_keepalive(options.keepalive).map_err(failure)?;
    if let Some(linger) = options.linger() {
        socket.set_linger(Some(linger)).map_err(failure)?;
    }
    if options.recv_buffer > 0 {
        socket
            .set_recv_buffer_size(options.recv_buffer)
            .map_err(failure)?;
    }
    if options.send_buffer > 0 {
        socket
            .set_send_buffer_size(options.send_buffer)
            .map_err(failure)?;
    }

    let stream = socket.connect(addr).await.map_err(failure)?;
    stream.set_nodelay(options.nodelay).map_err(failure)?;
    info!("TCP connection established to {}", addr);
    Ok(stream)
}

/// Builds the TLS connector for a run. Reusing one connector reuses its session cache.
pub fn tls_connector(options: &TlsOptions) -> Result<TlsConnector, ClientError> {
    let builder = RustlsConfig::builder();
    let mut config = if options.skip_verify {
        warn!("TLS certificate verification disabled");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
            .with_no_client_auth()
    } else {
        let ca_file = options.ca_file.as_ref().ok_or_else(|| {
            ClientError::HandshakeError(
                "certificate verification needs a CA file (tls.ca_file)".to_string(),
            )
        })?;
        let mut roots = RootCertStore::empty();
        let certs = CertificateDer::pem_file_iter(ca_file).map_err(|e| {
            ClientError::HandshakeError(format!("cannot read {}: {}", ca_file.display(), e))
        })?;
        for cert in certs {
            let cert = cert.map_err(|e| ClientError::HandshakeError(e.to_string()))?;
            roots
                .add(cert)
                .map_err(|e| ClientError::HandshakeError(e.to_string()))?;
        }
        builder.with_root_certificates(roots).with_no_client_auth()
    };

    if !options.session_ticket {
        config.resumption = Resumption::disabled();
    }
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Performs the TLS handshake over an established TCP stream
pub async fn upgrade(
    connector: &TlsConnector,
    host: &str,
    stream: TcpStream,
) -> Result<BoxedStream, ClientError> {
    let name = ServerName::try_from(host.to_string())
        .map_err(|e| ClientError::HandshakeError(format!("invalid server name {}: {}", host, e)))?;
    let tls = connector
        .connect(name, stream)
        .await
        .map_err(|e| ClientError::HandshakeError(e.to_string()))?;
    info!("TLS handshake completed with {}", host);
    Ok(Box::new(tls))
}

#[derive(Debug)]
struct AcceptAnyCertificate;

impl ServerCertVerifier for AcceptAnyCertificate {
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
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("127.0.0.1:1883", Scheme::Tcp, "127.0.0.1", 1883)]
    #[case("tcp://broker.local:1883", Scheme::Tcp, "broker.local", 1883)]
    #[case("mqtt://broker.local:1884", Scheme::Tcp, "broker.local", 1884)]
    #[case("tls://broker.local:8883", Scheme::Tls, "broker.local", 8883)]
    #[case("mqtts://broker.local:8883", Scheme::Tls, "broker.local", 8883)]
    #[case("[::1]:1883", Scheme::Tcp, "::1", 1883)]
    #[case("tls://[fe80::1]:8883", Scheme::Tls, "fe80::1", 8883)]
    fn parses_targets(
        #[case] raw: &str,
        #[case] scheme: Scheme,
        #[case] host: &str,
        #[case] port: u16,
    ) {
        let target: Target = raw.parse().unwrap();
        assert_eq!(target.scheme, scheme);
        assert_eq!(target.host, host);
        assert_eq!(target.port, port);
    }

    #[rstest]
    #[case("broker.local")]
    #[case("broker.local:http")]
    #[case(":1883")]
    #[case("ws://broker.local:80")]
    #[case("::1:1883")]
    #[case("[::1:1883")]
    fn rejects_malformed_targets(#[case] raw: &str) {
        assert!(matches!(
            raw.parse::<Target>(),
            Err(ClientError::InvalidTarget { .. })
        ));
    }

    #[test]
    fn literal_addresses_skip_resolution() {
        let ip: Target = "10.0.0.1:1883".parse().unwrap();
        let name: Target = "broker.local:1883".parse().unwrap();
        assert!(ip.literal_ip().is_some());
        assert!(name.literal_ip().is_none());
    }

    #[test]
    fn display_round_trips_ipv6_brackets() {
        let target: Target = "tls://[::1]:8883".parse().unwrap();
        assert_eq!(target.to_string(), "tls://[::1]:8883");
    }

    #[test]
    fn verification_without_ca_file_is_refused() {
        let options = TlsOptions {
            skip_verify: false,
            session_ticket: false,
            ca_file: None,
        };
        assert!(matches!(
            tls_connector(&options),
            Err(ClientError::HandshakeError(_))
        ));
    }

    #[tokio::test]
    async fn connects_with_tuned_socket() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let options = TcpOptions {
            linger_secs: Some(0),
            recv_buffer: 16 * 1024,
            send_buffer: 16 * 1024,
            ..TcpOptions::default()
        };

        let (stream, accepted) = tokio::join!(connect_tcp(addr, &options), listener.accept());
        let stream = stream.unwrap();
        accepted.unwrap();
        assert!(stream.nodelay().unwrap());
    }
}
