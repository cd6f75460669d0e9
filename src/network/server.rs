use crate::core::Transaction;
use crate::error::{BlockchainError, Result};
use crate::network::context::{NodeContext, Outbound};
use crate::network::message::{Message, TxData};
use crate::network::Transport;
use log::{debug, error, info, warn};
use std::io::Read;
use std::net::{Shutdown, TcpListener, TcpStream};
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub const CENTRAL_NODE: &str = "127.0.0.1:2001";

/// TCP front of a node: one thread per inbound connection, each carrying a
/// single framed message.
#[derive(Clone)]
pub struct Server {
    context: Arc<NodeContext>,
    transport: Arc<dyn Transport>,
    read_timeout: Duration,
}

impl Server {
    pub fn new(
        context: Arc<NodeContext>,
        transport: Arc<dyn Transport>,
        read_timeout: Duration,
    ) -> Server {
        Server {
            context,
            transport,
            read_timeout,
        }
    }

    pub fn get_context(&self) -> &Arc<NodeContext> {
        &self.context
    }

    /// Binds the node address, announces this node to its known peers and
    /// serves connections until the process is stopped.
    pub fn run(&self) -> Result<()> {
        let addr = self.context.node_addr();
        let listener = TcpListener::bind(addr)
            .map_err(|e| BlockchainError::Network(format!("Failed to bind to {addr}: {e}")))?;
        info!("Server listening on {addr}");

        self.deliver(self.context.handshake()?)?;

        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let server = self.clone();
                    thread::spawn(move || {
                        if let Err(e) = server.handle_connection(stream) {
                            if e.is_fatal() {
                                error!("Storage failure, shutting down: {e}");
                                process::exit(1);
                            }
                            warn!("Dropped connection: {e}");
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {e}");
                }
            }
        }

        Ok(())
    }

    fn handle_connection(&self, mut stream: TcpStream) -> Result<()> {
        stream
            .set_read_timeout(Some(self.read_timeout))
            .map_err(|e| BlockchainError::Network(format!("Failed to set read timeout: {e}")))?;

        let mut frame = vec![];
        stream
            .read_to_end(&mut frame)
            .map_err(|e| BlockchainError::Network(format!("Failed to read request: {e}")))?;
        if let Err(e) = stream.shutdown(Shutdown::Both) {
            debug!("Failed to close connection: {e}");
        }

        self.serve(&frame)
    }

    /// Decodes one frame, runs it through the node and delivers the replies.
    pub fn serve(&self, frame: &[u8]) -> Result<()> {
        let message = Message::decode(frame)?;
        let outbound = self.context.handle(message)?;
        self.deliver(outbound)
    }

    /// Sends each message once. A peer that cannot be reached is dropped from
    /// the known nodes; the remaining messages still go out.
    pub fn deliver(&self, outbound: Vec<Outbound>) -> Result<()> {
        for Outbound { addr, message } in outbound {
            let frame = message.encode()?;
            info!("Sending {} to {addr}", message.command());
            if let Err(e) = self.transport.send(&addr, &frame) {
                warn!("Peer {addr} is not available, removing it: {e}");
                self.context.evict_peer(&addr)?;
            }
        }
        Ok(())
    }
}

/// Hands a signed transaction to the node at `addr`.
pub fn send_tx(
    transport: &dyn Transport,
    addr_from: &str,
    addr: &str,
    tx: &Transaction,
) -> Result<()> {
    let message = Message::Tx(TxData {
        addr_from: addr_from.to_string(),
        transaction: tx.serialize()?,
    });
    transport.send(addr, &message.encode()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::message::{GetBlocks, Inv, OpType};
    use crate::testnet::TestChain;
    use std::io::Write;
    use std::sync::Mutex;

    struct RecordingTransport {
        sent: Mutex<Vec<(String, Vec<u8>)>>,
        unreachable: Vec<String>,
    }

    impl Transport for RecordingTransport {
        fn send(&self, addr: &str, frame: &[u8]) -> Result<()> {
            if self.unreachable.iter().any(|a| a == addr) {
                return Err(BlockchainError::Network(format!("{addr} refused")));
            }
            self.sent.lock().unwrap().push((addr.to_string(), frame.to_vec()));
            Ok(())
        }
    }

    fn server(
        chain: &TestChain,
        peers: &[&str],
        unreachable: &[&str],
    ) -> (Server, Arc<RecordingTransport>) {
        let peers: Vec<String> = peers.iter().map(|p| p.to_string()).collect();
        let context =
            NodeContext::new("127.0.0.1:4000", None, &peers, chain.blockchain.clone()).unwrap();
        let transport = Arc::new(RecordingTransport {
            sent: Mutex::new(vec![]),
            unreachable: unreachable.iter().map(|p| p.to_string()).collect(),
        });
        let server = Server::new(Arc::new(context), transport.clone(), Duration::from_secs(1));
        (server, transport)
    }

    #[test]
    fn test_serve_replies_with_inventory() {
        let chain = TestChain::new();
        let (server, transport) = server(&chain, &[], &[]);
        let request = Message::GetBlocks(GetBlocks {
            addr_from: "127.0.0.1:4001".to_string(),
        });

        server.serve(&request.encode().unwrap()).unwrap();

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "127.0.0.1:4001");
        let reply = Message::decode(&sent[0].1).unwrap();
        match reply {
            Message::Inv(Inv { op_type, items, .. }) => {
                assert_eq!(op_type, OpType::Block);
                assert_eq!(items.len(), 1);
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[test]
    fn test_unreachable_peer_is_evicted() {
        let chain = TestChain::new();
        let (server, transport) = server(
            &chain,
            &["127.0.0.1:4001", "127.0.0.1:4002"],
            &["127.0.0.1:4001"],
        );

        server.deliver(server.get_context().handshake().unwrap()).unwrap();

        assert_eq!(
            server.get_context().known_peers().unwrap(),
            vec!["127.0.0.1:4002".to_string()]
        );
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_connection_is_read_to_end_then_served() {
        let chain = TestChain::new();
        let (server, transport) = server(&chain, &[], &[]);
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let frame = Message::GetBlocks(GetBlocks {
            addr_from: "127.0.0.1:4001".to_string(),
        })
        .encode()
        .unwrap();

        let client = thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream.write_all(&frame).unwrap();
            stream.shutdown(Shutdown::Write).unwrap();
        });
        let (stream, _) = listener.accept().unwrap();
        server.handle_connection(stream).unwrap();
        client.join().unwrap();

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "127.0.0.1:4001");
    }

    #[test]
    fn test_garbage_frame_is_protocol_error() {
        let chain = TestChain::new();
        let (server, transport) = server(&chain, &[], &[]);

        assert!(matches!(
            server.serve(b"nonsense-frame-bytes"),
            Err(BlockchainError::Protocol(_))
        ));
        assert!(transport.sent.lock().unwrap().is_empty());
    }
}
