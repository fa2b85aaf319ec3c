//! Accept loop tests over real TCP and TLS on a loopback port.

use securefetch_client::{connect, ClientConfig};
use securefetch_core::{AuthStatus, DirectoryEntry, Error};
use securefetch_server::{Server, ServerConfig};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::oneshot;

const USER: &str = "GroupProject";
const PASSWORD: &str = "correct horse";

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

struct Running {
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    task: tokio::task::JoinHandle<securefetch_core::Result<()>>,
    _root: tempfile::TempDir,
}

async fn start_server() -> Running {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("a.txt"), b"0123456789").unwrap();

    let config = ServerConfig {
        listen_address: "127.0.0.1".to_string(),
        port: 0,
        cert_path: fixture("cert.pem"),
        key_path: fixture("key.pem"),
        root_dir: root.path().to_path_buf(),
        username: Some(USER.to_string()),
        password: Some(PASSWORD.to_string()),
        pbkdf2_iterations: 1_000,
        ..ServerConfig::default()
    };
    let server = Server::new(config).unwrap();
    let listener = server.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(server.serve(listener, async {
        let _ = stopped.await;
    }));
    Running {
        addr,
        stop,
        task,
        _root: root,
    }
}

fn client_config(addr: SocketAddr) -> ClientConfig {
    ClientConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        ca_cert: Some(fixture("ca.pem")),
        server_name: Some("localhost".to_string()),
        connect_timeout_secs: 5,
        ..ClientConfig::default()
    }
}

#[tokio::test]
async fn stalled_connections_do_not_block_other_clients() {
    let server = start_server().await;

    // connects but never starts the TLS handshake
    let _stalled = TcpStream::connect(server.addr).await.unwrap();

    // authenticated and idle for the rest of the test
    let mut idle = connect(&client_config(server.addr)).await.unwrap();
    assert_eq!(idle.authenticate(USER, PASSWORD).await.unwrap(), AuthStatus::Accepted);

    let config = client_config(server.addr);
    let outcome = tokio::time::timeout(Duration::from_secs(10), async {
        let mut client = connect(&config).await?;
        let status = client.authenticate(USER, PASSWORD).await?;
        let entries = client.list().await?;
        let mut content = Vec::new();
        let state = client.get_file("a.txt", &mut content, |_| {}).await?;
        client.exit().await?;
        Ok::<_, Error>((status, entries, content, state.bytes_transferred()))
    })
    .await
    .expect("second client finished while others were stalled");

    let (status, entries, content, bytes) = outcome.unwrap();
    assert_eq!(status, AuthStatus::Accepted);
    assert_eq!(entries, vec![DirectoryEntry::file("a.txt", 10)]);
    assert_eq!(content, b"0123456789");
    assert_eq!(bytes, 10);

    // the idle session is still served
    assert_eq!(idle.list().await.unwrap().len(), 1);
    idle.exit().await.unwrap();

    server.stop.send(()).unwrap();
    server.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn untrusted_server_certificate_is_refused() {
    let server = start_server().await;
    let config = ClientConfig {
        ca_cert: Some(fixture("cert.pem")),
        ..client_config(server.addr)
    };

    let result = connect(&config).await;
    assert!(matches!(result, Err(Error::Tls(_))));

    server.stop.send(()).unwrap();
    server.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn wrong_password_over_tls() {
    let server = start_server().await;
    let mut client = connect(&client_config(server.addr)).await.unwrap();
    assert_eq!(
        client.authenticate(USER, "wrong").await.unwrap(),
        AuthStatus::Rejected {
            remaining: securefetch_core::MAX_AUTH_ATTEMPTS - 1
        }
    );
    assert_eq!(client.authenticate(USER, PASSWORD).await.unwrap(), AuthStatus::Accepted);
    client.exit().await.unwrap();

    server.stop.send(()).unwrap();
    server.task.await.unwrap().unwrap();
}
