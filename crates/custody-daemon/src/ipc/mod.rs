//! Message channel between callers and the vault
//!
//! Newline-delimited JSON over a Unix domain socket, one vault session per
//! connection. The dispatcher is generic over the stream so the same code
//! runs over in-memory pipes.

mod client;
mod connection;
mod dispatcher;
mod server;
mod types;
mod unix;

// Public API
pub use client::{InitOutcome, VaultClient};
pub use connection::{IpcClientTransport, IpcTransport, PlatformClient, PlatformTransport};
pub use dispatcher::{Dispatcher, Established, PendingTable, RequestHandler};
pub use server::IpcServer;
pub use types::{
    parse_inbound, Body, DecryptParams, DeriveParams, EncryptParams, ErrorPayload,
    GetProofParams, Inbound, InitParams, KeyInfoParams, KeyRef, NoParams, Outbound, PubexRef,
    Ready, RecoverParams, Reply, Request, RevokeCookieParams, SetupPurposeParams, SignParams,
    SignResult, VerifyProofParams, CALLBACK_KEY, INIT_TAG, RESULT_INITED, RESULT_REDIRECT,
};
pub use unix::peer_origin;
