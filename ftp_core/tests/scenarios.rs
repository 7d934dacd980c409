//! End-to-end scenarios driven entirely over real `TcpStream`s against a
//! `Connection` spawned the same way `ftpd`'s accept loop spawns one: no
//! mocked transport, no direct calls into `controlchan` internals.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::{DigitallySignedStruct, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio_util::sync::CancellationToken;

use ftp_core::adapter::tls::load_server_tls_config;
use ftp_core::config::PassivePortRange;
use ftp_core::controlchan::handlers::default_registry;
use ftp_core::membership::{Authenticator, InMemoryAuthenticator};
use ftp_core::vfs::{LocalFs, Vfs};
use ftp_core::{Connection, ServerConfig};

fn test_config(root: PathBuf, promiscuous: bool) -> Arc<ServerConfig> {
    Arc::new(ServerConfig {
        control_bind: "127.0.0.1:0".parse().unwrap(),
        implicit_tls_bind: None,
        passive_ports: PassivePortRange::new(52000, 52100).unwrap(),
        passive_advertise_addr: None,
        cert_path: None,
        key_path: None,
        root_dir: root,
        promiscuous,
        idle_timeout: Duration::from_secs(30),
        tls_handshake_timeout: Duration::from_secs(10),
        active_connect_timeout: Duration::from_secs(10),
        passive_accept_timeout: Duration::from_secs(10),
        utf8_opt_in: false,
        greeting: "scenario test server".to_string(),
    })
}

/// Spawns a `Connection` over a freshly accepted socket and returns the
/// control client plus a join handle for the server task.
async fn spawn_session(
    config: Arc<ServerConfig>,
    authenticator: Arc<dyn Authenticator>,
    vfs: Arc<dyn Vfs>,
    tls_config: Option<Arc<rustls::ServerConfig>>,
    implicit: bool,
) -> (TcpStream, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let registry = Arc::new(default_registry());

    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let conn = Connection::accept(socket, 1, config, authenticator, vfs, registry, tls_config, implicit)
            .await
            .unwrap();
        conn.run(CancellationToken::new()).await;
    });

    let mut client = TcpStream::connect(addr).await.unwrap();
    let mut buf = [0u8; 512];
    let n = client.read(&mut buf).await.unwrap();
    assert!(String::from_utf8_lossy(&buf[..n]).starts_with("220"), "expected greeting");

    (client, server)
}

async fn send(client: &mut TcpStream, line: &str) {
    client.write_all(line.as_bytes()).await.unwrap();
    client.write_all(b"\r\n").await.unwrap();
}

/// Reads exactly one reply line off the control connection. Two replies
/// written back-to-back by the server (e.g. `ABOR`'s `426` then `226`) can
/// legitimately land in the same `read()`, so this keeps whatever comes
/// after the first CRLF buffered for the next call instead of assuming one
/// `read()` is one reply.
async fn read_reply(client: &mut TcpStream, leftover: &mut Vec<u8>) -> String {
    loop {
        if let Some(pos) = leftover.windows(2).position(|w| w == b"\r\n") {
            let line: Vec<u8> = leftover.drain(..pos + 2).collect();
            return String::from_utf8_lossy(&line).into_owned();
        }
        let mut buf = [0u8; 4096];
        let n = client.read(&mut buf).await.unwrap();
        assert!(n > 0, "control connection closed while waiting for a reply");
        leftover.extend_from_slice(&buf[..n]);
    }
}

/// Parses a `227 ... (h1,h2,h3,h4,p1,p2)` reply into the data socket's address.
fn parse_pasv(reply: &str) -> SocketAddr {
    let start = reply.find('(').unwrap();
    let end = reply.find(')').unwrap();
    let nums: Vec<u16> = reply[start + 1..end].split(',').map(|p| p.trim().parse().unwrap()).collect();
    let ip = Ipv4Addr::new(nums[0] as u8, nums[1] as u8, nums[2] as u8, nums[3] as u8);
    let port = (nums[4] << 8) | nums[5];
    SocketAddr::new(IpAddr::V4(ip), port)
}

/// An anonymous session lists an empty root directory and sees the
/// transfer-complete reply.
#[tokio::test]
async fn s1_anonymous_list_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path().to_path_buf(), true);
    let authenticator: Arc<dyn Authenticator> = Arc::new(InMemoryAuthenticator::new(dir.path().to_path_buf(), true));
    let vfs: Arc<dyn Vfs> = Arc::new(LocalFs::new(dir.path().to_path_buf()));

    let (mut client, server) = spawn_session(config, authenticator, vfs, None, false).await;
    let mut leftover = Vec::new();

    send(&mut client, "USER anonymous").await;
    assert!(read_reply(&mut client, &mut leftover).await.starts_with("331"));
    send(&mut client, "PASS anyone@example.com").await;
    assert!(read_reply(&mut client, &mut leftover).await.starts_with("230"));

    send(&mut client, "PASV").await;
    let pasv_reply = read_reply(&mut client, &mut leftover).await;
    assert!(pasv_reply.starts_with("227"));
    let data_addr = parse_pasv(&pasv_reply);

    send(&mut client, "LIST").await;
    // The server's datachan.open() blocks in listener.accept() until a data
    // connection actually arrives, and only then sends 150 — so the data
    // socket must be dialed before waiting on that reply.
    let mut data = TcpStream::connect(data_addr).await.unwrap();
    assert!(read_reply(&mut client, &mut leftover).await.starts_with("150"));

    let mut listing = Vec::new();
    data.read_to_end(&mut listing).await.unwrap();
    assert!(listing.is_empty(), "freshly created root should list as empty");

    assert!(read_reply(&mut client, &mut leftover).await.starts_with("226"));

    send(&mut client, "QUIT").await;
    let _ = read_reply(&mut client, &mut leftover).await;
    server.await.unwrap();
}

#[derive(Debug)]
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
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
            SignatureScheme::ED25519,
        ]
    }
}

/// An explicit `AUTH TLS` hot upgrade completes and the control channel
/// keeps working over the secured adapter.
#[tokio::test]
async fn s2_explicit_auth_tls_hot_upgrade_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let manifest_dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR"));
    let tls_config = load_server_tls_config(&manifest_dir.join("tests/fixtures/cert.pem"), &manifest_dir.join("tests/fixtures/key.pem")).unwrap();

    let config = test_config(dir.path().to_path_buf(), true);
    let authenticator: Arc<dyn Authenticator> = Arc::new(InMemoryAuthenticator::new(dir.path().to_path_buf(), true));
    let vfs: Arc<dyn Vfs> = Arc::new(LocalFs::new(dir.path().to_path_buf()));

    let (mut client, server) = spawn_session(config, authenticator, vfs, Some(tls_config), false).await;
    let mut leftover = Vec::new();

    send(&mut client, "AUTH TLS").await;
    assert!(read_reply(&mut client, &mut leftover).await.starts_with("234"));

    let client_tls_config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
        .with_no_client_auth();
    let connector = tokio_rustls::TlsConnector::from(Arc::new(client_tls_config));
    let server_name = ServerName::try_from("localhost").unwrap();
    let mut tls_client = connector.connect(server_name, client).await.unwrap();

    tls_client.write_all(b"PWD\r\n").await.unwrap();
    let mut buf = [0u8; 512];
    let n = tls_client.read(&mut buf).await.unwrap();
    assert!(String::from_utf8_lossy(&buf[..n]).starts_with("257"), "PWD over the upgraded channel should still work");

    tls_client.write_all(b"QUIT\r\n").await.unwrap();
    let n = tls_client.read(&mut buf).await.unwrap();
    assert!(String::from_utf8_lossy(&buf[..n]).starts_with("221"));

    server.await.unwrap();
}

/// RNFR/RNTO renames a file, and the rename is visible on disk.
#[tokio::test]
async fn s3_rename_moves_the_file_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("old.txt"), b"payload").unwrap();

    let config = test_config(dir.path().to_path_buf(), true);
    let mut auth = InMemoryAuthenticator::new(dir.path().to_path_buf(), false);
    auth.add_user("alice", "secret", dir.path().to_path_buf(), false);
    let authenticator: Arc<dyn Authenticator> = Arc::new(auth);
    let vfs: Arc<dyn Vfs> = Arc::new(LocalFs::new(dir.path().to_path_buf()));

    let (mut client, server) = spawn_session(config, authenticator, vfs, None, false).await;
    let mut leftover = Vec::new();

    send(&mut client, "USER alice").await;
    let _ = read_reply(&mut client, &mut leftover).await;
    send(&mut client, "PASS secret").await;
    assert!(read_reply(&mut client, &mut leftover).await.starts_with("230"));

    send(&mut client, "RNFR old.txt").await;
    assert!(read_reply(&mut client, &mut leftover).await.starts_with("350"));
    send(&mut client, "RNTO new.txt").await;
    assert!(read_reply(&mut client, &mut leftover).await.starts_with("250"));

    assert!(!dir.path().join("old.txt").exists());
    assert_eq!(std::fs::read(dir.path().join("new.txt")).unwrap(), b"payload");

    send(&mut client, "QUIT").await;
    let _ = read_reply(&mut client, &mut leftover).await;
    server.await.unwrap();
}

/// `REST` followed by `STOR` resumes a partial upload at the requested
/// offset instead of overwriting from the start.
#[tokio::test]
async fn s4_rest_then_stor_resumes_at_the_offset() {
    let dir = tempfile::tempdir().unwrap();
    let existing = b"0123456789";
    std::fs::write(dir.path().join("partial.bin"), existing).unwrap();

    let config = test_config(dir.path().to_path_buf(), true);
    let mut auth = InMemoryAuthenticator::new(dir.path().to_path_buf(), false);
    auth.add_user("alice", "secret", dir.path().to_path_buf(), false);
    let authenticator: Arc<dyn Authenticator> = Arc::new(auth);
    let vfs: Arc<dyn Vfs> = Arc::new(LocalFs::new(dir.path().to_path_buf()));

    let (mut client, server) = spawn_session(config, authenticator, vfs, None, false).await;
    let mut leftover = Vec::new();

    send(&mut client, "USER alice").await;
    let _ = read_reply(&mut client, &mut leftover).await;
    send(&mut client, "PASS secret").await;
    assert!(read_reply(&mut client, &mut leftover).await.starts_with("230"));

    send(&mut client, "TYPE I").await;
    assert!(read_reply(&mut client, &mut leftover).await.starts_with("200"));

    send(&mut client, "PASV").await;
    let pasv_reply = read_reply(&mut client, &mut leftover).await;
    let data_addr = parse_pasv(&pasv_reply);

    send(&mut client, "REST 10").await;
    assert!(read_reply(&mut client, &mut leftover).await.starts_with("350"));

    send(&mut client, "STOR partial.bin").await;
    let mut data = TcpStream::connect(data_addr).await.unwrap();
    assert!(read_reply(&mut client, &mut leftover).await.starts_with("150"));

    data.write_all(b"ABCDEF").await.unwrap();
    data.shutdown().await.unwrap();
    drop(data);

    assert!(read_reply(&mut client, &mut leftover).await.starts_with("226"));

    let contents = std::fs::read(dir.path().join("partial.bin")).unwrap();
    assert_eq!(contents, b"0123456789ABCDEF");

    send(&mut client, "QUIT").await;
    let _ = read_reply(&mut client, &mut leftover).await;
    server.await.unwrap();
}

/// `ABOR` sent mid-`RETR` produces the `426`-then-`226` ordering and
/// does not tear the control connection down.
#[tokio::test]
async fn s5_abor_mid_retr_yields_426_then_226() {
    let dir = tempfile::tempdir().unwrap();
    // Large enough that, with the data-connection peer never reading, the
    // producer side blocks on a full socket buffer well before finishing —
    // the abort is then observed deterministically instead of racing completion.
    let big = vec![b'x'; 32 * 1024 * 1024];
    std::fs::write(dir.path().join("big.bin"), &big).unwrap();

    let config = test_config(dir.path().to_path_buf(), true);
    let mut auth = InMemoryAuthenticator::new(dir.path().to_path_buf(), false);
    auth.add_user("alice", "secret", dir.path().to_path_buf(), false);
    let authenticator: Arc<dyn Authenticator> = Arc::new(auth);
    let vfs: Arc<dyn Vfs> = Arc::new(LocalFs::new(dir.path().to_path_buf()));

    let (mut client, server) = spawn_session(config, authenticator, vfs, None, false).await;
    let mut leftover = Vec::new();

    send(&mut client, "USER alice").await;
    let _ = read_reply(&mut client, &mut leftover).await;
    send(&mut client, "PASS secret").await;
    assert!(read_reply(&mut client, &mut leftover).await.starts_with("230"));

    send(&mut client, "TYPE I").await;
    assert!(read_reply(&mut client, &mut leftover).await.starts_with("200"));

    send(&mut client, "PASV").await;
    let pasv_reply = read_reply(&mut client, &mut leftover).await;
    let data_addr = parse_pasv(&pasv_reply);

    send(&mut client, "RETR big.bin").await;
    // Connect but never read from the data socket, before waiting on 150 —
    // the server's datachan.open() is blocked in accept() until this dial.
    let _data = TcpStream::connect(data_addr).await.unwrap();
    assert!(read_reply(&mut client, &mut leftover).await.starts_with("150"));

    send(&mut client, "ABOR").await;
    let first = read_reply(&mut client, &mut leftover).await;
    assert!(first.starts_with("426"), "expected 426 for the aborted transfer, got {first}");
    let second = read_reply(&mut client, &mut leftover).await;
    assert!(second.starts_with("226"), "expected 226 for ABOR itself, got {second}");

    send(&mut client, "NOOP").await;
    assert!(read_reply(&mut client, &mut leftover).await.starts_with("200"), "control connection must survive the abort");

    send(&mut client, "QUIT").await;
    let _ = read_reply(&mut client, &mut leftover).await;
    server.await.unwrap();
}

/// A read-only account (anonymous) is rejected with `550` on a write-path
/// command before the VFS is ever touched.
#[tokio::test]
async fn s7_read_only_account_cannot_store_or_delete() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("existing.txt"), b"hello").unwrap();

    let config = test_config(dir.path().to_path_buf(), true);
    let authenticator: Arc<dyn Authenticator> = Arc::new(InMemoryAuthenticator::new(dir.path().to_path_buf(), true));
    let vfs: Arc<dyn Vfs> = Arc::new(LocalFs::new(dir.path().to_path_buf()));

    let (mut client, server) = spawn_session(config, authenticator, vfs, None, false).await;
    let mut leftover = Vec::new();

    send(&mut client, "USER anonymous").await;
    assert!(read_reply(&mut client, &mut leftover).await.starts_with("331"));
    send(&mut client, "PASS anyone@example.com").await;
    assert!(read_reply(&mut client, &mut leftover).await.starts_with("230"));

    send(&mut client, "STOR new.txt").await;
    assert!(read_reply(&mut client, &mut leftover).await.starts_with("550"));
    assert!(!dir.path().join("new.txt").exists());

    send(&mut client, "DELE existing.txt").await;
    assert!(read_reply(&mut client, &mut leftover).await.starts_with("550"));
    assert!(dir.path().join("existing.txt").exists());

    send(&mut client, "MKD sub").await;
    assert!(read_reply(&mut client, &mut leftover).await.starts_with("550"));
    assert!(!dir.path().join("sub").exists());

    send(&mut client, "QUIT").await;
    let _ = read_reply(&mut client, &mut leftover).await;
    server.await.unwrap();
}

/// With promiscuous mode off, a data connection from a peer other than
/// the control connection's is rejected.
#[tokio::test]
async fn s6_non_promiscuous_rejects_wrong_peer_data_connection() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();

    let config = test_config(dir.path().to_path_buf(), false);
    let mut auth = InMemoryAuthenticator::new(dir.path().to_path_buf(), false);
    auth.add_user("alice", "secret", dir.path().to_path_buf(), false);
    let authenticator: Arc<dyn Authenticator> = Arc::new(auth);
    let vfs: Arc<dyn Vfs> = Arc::new(LocalFs::new(dir.path().to_path_buf()));

    let (mut client, server) = spawn_session(config, authenticator, vfs, None, false).await;
    let mut leftover = Vec::new();

    send(&mut client, "USER alice").await;
    let _ = read_reply(&mut client, &mut leftover).await;
    send(&mut client, "PASS secret").await;
    assert!(read_reply(&mut client, &mut leftover).await.starts_with("230"));

    send(&mut client, "PASV").await;
    let pasv_reply = read_reply(&mut client, &mut leftover).await;
    let data_addr = parse_pasv(&pasv_reply);

    send(&mut client, "RETR a.txt").await;

    // Dial the data port from a different loopback address than the control
    // connection used (127.0.0.1), simulating a foreign peer. The manager
    // rejects this before ever sending 150, so the first (and only) reply
    // RETR produces here is the 425.
    let socket = TcpSocket::new_v4().unwrap();
    socket.bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 2)), 0)).unwrap();
    let _wrong_peer = socket.connect(data_addr).await.unwrap();

    let reply = read_reply(&mut client, &mut leftover).await;
    assert!(reply.starts_with("425"), "expected 425 for the mismatched data-connection peer, got {reply}");

    send(&mut client, "QUIT").await;
    let _ = read_reply(&mut client, &mut leftover).await;
    server.await.unwrap();
}
