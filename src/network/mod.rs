//! Peer-to-peer networking
//!
//! Framed wire messages, the per-node protocol state machine and the TCP
//! server that feeds it. Each connection carries one message; replies go out
//! on fresh connections through a `Transport`.

pub mod context;
pub mod message;
pub mod node;
pub mod server;
pub mod transport;

pub use context::{NodeContext, Outbound, SyncState};
pub use message::{Message, OpType, COMMAND_LENGTH, NODE_VERSION};
pub use node::Nodes;
pub use server::{send_tx, Server, CENTRAL_NODE};
pub use transport::{TcpTransport, Transport};
