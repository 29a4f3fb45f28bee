//! 集成测试共享夹具：自签名证书、rustls 配置与套接字对。

#![allow(dead_code)]

use std::{
    os::unix::net::UnixStream,
    sync::{Arc, Once},
    thread,
    time::Duration,
};

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use rustls::{
    ClientConfig, RootCertStore, ServerConfig, SupportedProtocolVersion,
    crypto::{CryptoProvider, ring},
};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use sealport_transport_tls::{
    BlockingHandshake, HandshakeParts, NonBlockingHandshake, RustlsEngine, SocketHandle,
};
use tracing_subscriber::EnvFilter;

pub const SERVER_NAME: &str = "sealport.test";

pub struct TlsFixture {
    pub server: Arc<ServerConfig>,
    pub client: Arc<ClientConfig>,
}

/// 按 `RUST_LOG` 输出握手日志，便于排查失败用例；重复调用无副作用。
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(ring::default_provider())
}

/// 默认协议版本（TLS 1.3 优先）的服务端/客户端配置。
pub fn fixture() -> TlsFixture {
    fixture_with_versions(rustls::DEFAULT_VERSIONS)
}

pub fn fixture_with_versions(versions: &[&'static SupportedProtocolVersion]) -> TlsFixture {
    init_tracing();
    let mut params =
        CertificateParams::new(vec![SERVER_NAME.to_owned()]).expect("certificate params");
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, SERVER_NAME);
    params.distinguished_name = dn;

    let key_pair = KeyPair::generate().expect("key pair");
    let certificate = params.self_signed(&key_pair).expect("self-signed certificate");
    let cert_der: CertificateDer<'static> = certificate.der().clone();
    let key_der = PrivateKeyDer::try_from(key_pair.serialize_der()).expect("private key");

    let server = ServerConfig::builder_with_provider(provider())
        .with_protocol_versions(versions)
        .expect("server protocol versions")
        .with_no_client_auth()
        .with_single_cert(vec![cert_der.clone()], key_der)
        .expect("server config");

    let mut roots = RootCertStore::empty();
    roots.add(cert_der).expect("trust anchor");
    let client = ClientConfig::builder_with_provider(provider())
        .with_protocol_versions(versions)
        .expect("client protocol versions")
        .with_root_certificates(roots)
        .with_no_client_auth();

    TlsFixture {
        server: Arc::new(server),
        client: Arc::new(client),
    }
}

pub fn server_name() -> ServerName<'static> {
    ServerName::try_from(SERVER_NAME).expect("server name")
}

pub fn socket_pair() -> (SocketHandle<UnixStream>, SocketHandle<UnixStream>) {
    let (left, right) = UnixStream::pair().expect("socket pair");
    (SocketHandle::new(left), SocketHandle::new(right))
}

pub fn client_engine(fixture: &TlsFixture) -> RustlsEngine {
    RustlsEngine::client(fixture.client.clone(), server_name()).expect("client engine")
}

pub fn server_engine(fixture: &TlsFixture) -> RustlsEngine {
    RustlsEngine::server(fixture.server.clone()).expect("server engine")
}

/// 在一对套接字上完成握手（服务端非阻塞，客户端阻塞），返回双方引擎。
pub fn established(
    fixture: &TlsFixture,
) -> (HandshakeParts<RustlsEngine>, HandshakeParts<RustlsEngine>) {
    established_with(client_engine(fixture), server_engine(fixture))
}

pub fn established_with(
    client_side: RustlsEngine,
    server_side: RustlsEngine,
) -> (HandshakeParts<RustlsEngine>, HandshakeParts<RustlsEngine>) {
    let (server_socket, client_socket) = socket_pair();
    established_on(&client_socket, &server_socket, client_side, server_side)
}

/// 在调用方持有的套接字上完成握手，握手后可继续在同一对套接字上收发分帧数据。
pub fn established_on(
    client_socket: &SocketHandle<UnixStream>,
    server_socket: &SocketHandle<UnixStream>,
    client_side: RustlsEngine,
    server_side: RustlsEngine,
) -> (HandshakeParts<RustlsEngine>, HandshakeParts<RustlsEngine>) {
    thread::scope(|scope| {
        let server = scope.spawn(|| {
            let mut handshake = NonBlockingHandshake::new(server_socket, server_side)
                .with_timeout(Duration::from_secs(10));
            assert!(handshake.run().expect("server handshake"));
            handshake.into_parts()
        });
        let client = scope.spawn(|| {
            let mut handshake = BlockingHandshake::new(client_socket, client_side);
            assert!(handshake.run().expect("client handshake"));
            handshake.into_parts()
        });
        (
            client.join().expect("client thread"),
            server.join().expect("server thread"),
        )
    })
}
