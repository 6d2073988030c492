//! Shared helpers for channel-level tests

#![allow(dead_code)]

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{
    AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf,
};

use custody_core::{Origin, RootSeed};
use custody_daemon::ipc::{Dispatcher, InitParams, RequestHandler};
use custody_daemon::{InitOutcome, Vault, VaultClient, VaultConfig};

pub const PEER: &str = "unix:uid=1000";

const RECV_LIMIT: Duration = Duration::from_secs(10);

pub fn vault(redirect: Option<&str>) -> Arc<Vault> {
    let config = VaultConfig {
        cookie_redirect_url: redirect.map(str::to_string),
        ..VaultConfig::default()
    };
    let root = RootSeed::from_entropy(&[21u8; 32]).unwrap();
    Arc::new(Vault::new(root, &config).unwrap())
}

/// Run `dispatcher` on one end of a pipe and hand back the other end
pub fn serve<H: RequestHandler>(
    dispatcher: Arc<Dispatcher<H>>,
    peer: Option<&str>,
) -> DuplexStream {
    serve_with_buffer(dispatcher, peer, 256 * 1024)
}

/// Like [`serve`], with `buffer` bytes of pipe capacity in each direction
pub fn serve_with_buffer<H: RequestHandler>(
    dispatcher: Arc<Dispatcher<H>>,
    peer: Option<&str>,
    buffer: usize,
) -> DuplexStream {
    let (client, server) = tokio::io::duplex(buffer);
    let peer = peer.map(|p| Origin::new(p).unwrap());
    tokio::spawn(async move {
        let _ = dispatcher.run(server, peer).await;
    });
    client
}

pub fn trusted() -> InitParams {
    InitParams {
        use_origin: true,
        cookie: None,
    }
}

pub fn untrusted(cookie: Option<&str>) -> InitParams {
    InitParams {
        use_origin: false,
        cookie: cookie.map(str::to_string),
    }
}

pub async fn inited(stream: DuplexStream, init: InitParams) -> VaultClient {
    match VaultClient::handshake(stream, init).await.unwrap() {
        InitOutcome::Inited(client) => client,
        InitOutcome::Redirect { url } => panic!("unexpected redirect to {}", url),
    }
}

/// Line-level view of one end of a channel
pub struct RawPeer {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
}

impl RawPeer {
    pub fn new(stream: DuplexStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    pub fn into_parts(
        self,
    ) -> (
        Lines<BufReader<ReadHalf<DuplexStream>>>,
        WriteHalf<DuplexStream>,
    ) {
        (self.lines, self.writer)
    }

    pub async fn send(&mut self, message: Value) {
        self.writer
            .write_all(format!("{}\n", message).as_bytes())
            .await
            .unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Next message, or None once the other side closed
    pub async fn recv(&mut self) -> Option<Value> {
        let line = tokio::time::timeout(RECV_LIMIT, self.lines.next_line())
            .await
            .expect("timed out waiting for a message")
            .unwrap()?;
        Some(serde_json::from_str(&line).unwrap())
    }

    pub async fn expect(&mut self) -> Value {
        self.recv().await.expect("channel closed")
    }

    /// Read the ready banner and complete a trusted init
    pub async fn init_trusted(&mut self) {
        assert_eq!(self.expect().await, serde_json::json!({"ready": true}));
        self.send(serde_json::json!({"init": {"useOrigin": true}, "callback": "init"}))
            .await;
        let reply = self.expect().await;
        assert_eq!(reply["callback"], "init");
        assert_eq!(reply["result"], "inited");
    }
}
