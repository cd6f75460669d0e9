use crate::core::{Block, Blockchain, MiningCoordinator, Transaction};
use crate::error::{BlockchainError, Result};
use crate::network::message::{
    Addr, BlockData, GetBlocks, GetData, Inv, Message, OpType, TxData, Version, NODE_VERSION,
};
use crate::network::Nodes;
use crate::storage::{BlockInTransit, MemoryPool, UTXOSet};
use data_encoding::HEXLOWER;
use log::{debug, info, warn};
use std::sync::{Mutex, MutexGuard};

/// A message waiting to be delivered to `addr`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub addr: String,
    pub message: Message,
}

impl Outbound {
    fn new(addr: &str, message: Message) -> Outbound {
        Outbound {
            addr: addr.to_string(),
            message,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Syncing { remaining: usize },
}

// Everything handlers mutate. Only reachable through NodeContext's lock.
struct NodeState {
    utxo_set: UTXOSet,
    mempool: MemoryPool,
    blocks_in_transit: BlockInTransit,
    known_nodes: Nodes,
}

/// One node's view of the network: its chain, pending transactions and
/// peers. Handlers run one at a time under the state lock and hand back the
/// messages to send; sending happens after the lock is released.
pub struct NodeContext {
    node_addr: String,
    miner: Option<MiningCoordinator>,
    state: Mutex<NodeState>,
}

impl NodeContext {
    pub fn new(
        node_addr: &str,
        mining_addr: Option<&str>,
        known_nodes: &[String],
        blockchain: Blockchain,
    ) -> Result<NodeContext> {
        let miner = mining_addr.map(MiningCoordinator::new).transpose()?;

        let mut nodes = Nodes::new();
        for addr in known_nodes.iter().filter(|addr| addr.as_str() != node_addr) {
            nodes.add_node(addr);
        }

        Ok(NodeContext {
            node_addr: node_addr.to_string(),
            miner,
            state: Mutex::new(NodeState {
                utxo_set: UTXOSet::new(blockchain),
                mempool: MemoryPool::new(),
                blocks_in_transit: BlockInTransit::new(),
                known_nodes: nodes,
            }),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, NodeState>> {
        self.state
            .lock()
            .map_err(|_| BlockchainError::Database("Node state lock poisoned".to_string()))
    }

    pub fn node_addr(&self) -> &str {
        self.node_addr.as_str()
    }

    pub fn is_miner(&self) -> bool {
        self.miner.is_some()
    }

    pub fn blockchain(&self) -> Result<Blockchain> {
        Ok(self.lock()?.utxo_set.get_blockchain().clone())
    }

    pub fn known_peers(&self) -> Result<Vec<String>> {
        Ok(self.lock()?.known_nodes.get_nodes().to_vec())
    }

    pub fn mempool_len(&self) -> Result<usize> {
        Ok(self.lock()?.mempool.len())
    }

    pub fn mempool_contains(&self, txid_hex: &str) -> Result<bool> {
        Ok(self.lock()?.mempool.contains(txid_hex))
    }

    pub fn blocks_in_transit(&self) -> Result<Vec<Vec<u8>>> {
        Ok(self.lock()?.blocks_in_transit.get_items().to_vec())
    }

    pub fn sync_state(&self) -> Result<SyncState> {
        let state = self.lock()?;
        if state.blocks_in_transit.is_empty() {
            Ok(SyncState::Idle)
        } else {
            Ok(SyncState::Syncing {
                remaining: state.blocks_in_transit.len(),
            })
        }
    }

    /// Drops a peer that could not be reached.
    pub fn evict_peer(&self, addr: &str) -> Result<bool> {
        Ok(self.lock()?.known_nodes.evict_node(addr))
    }

    /// Writes everything sled still buffers for the chain and UTXO trees.
    pub fn flush(&self) -> Result<()> {
        self.lock()?.utxo_set.get_blockchain().flush()
    }

    /// `version` for every known peer, sent once at startup.
    pub fn handshake(&self) -> Result<Vec<Outbound>> {
        let state = self.lock()?;
        let version = self.version_message(&state)?;
        Ok(state
            .known_nodes
            .get_nodes_except(&[self.node_addr.as_str()])
            .iter()
            .map(|addr| Outbound::new(addr, version.clone()))
            .collect())
    }

    /// Applies one inbound message and returns what has to be sent in reply.
    pub fn handle(&self, message: Message) -> Result<Vec<Outbound>> {
        info!(
            "Received {} from {}",
            message.command(),
            message.addr_from().unwrap_or("unknown")
        );

        let mut state = self.lock()?;
        match message {
            Message::Version(m) => self.handle_version(&mut state, m),
            Message::Addr(m) => self.handle_addr(&mut state, m),
            Message::GetBlocks(m) => self.handle_get_blocks(&state, m),
            Message::Inv(m) => self.handle_inv(&mut state, m),
            Message::GetData(m) => self.handle_get_data(&state, m),
            Message::Block(m) => self.handle_block(&mut state, m),
            Message::Tx(m) => self.handle_tx(&mut state, m),
        }
    }

    fn version_message(&self, state: &NodeState) -> Result<Message> {
        Ok(Message::Version(Version {
            version: NODE_VERSION,
            best_height: wire_height(state.utxo_set.get_blockchain())?,
            addr_from: self.node_addr.clone(),
        }))
    }

    fn get_blocks_message(&self) -> Message {
        Message::GetBlocks(GetBlocks {
            addr_from: self.node_addr.clone(),
        })
    }

    fn get_data_message(&self, op_type: OpType, id: &[u8]) -> Message {
        Message::GetData(GetData {
            addr_from: self.node_addr.clone(),
            op_type,
            id: id.to_vec(),
        })
    }

    fn inv_message(&self, op_type: OpType, items: Vec<Vec<u8>>) -> Message {
        Message::Inv(Inv {
            addr_from: self.node_addr.clone(),
            op_type,
            items,
        })
    }

    // Only the side that is behind asks for blocks; the side ahead just
    // answers with its own version.
    fn handle_version(&self, state: &mut NodeState, version: Version) -> Result<Vec<Outbound>> {
        let sender = version.addr_from.as_str();
        if sender != self.node_addr && state.known_nodes.add_node(sender) {
            info!("Added peer {sender}");
        }

        let local_height = wire_height(state.utxo_set.get_blockchain())?;
        debug!(
            "Version from {sender}: theirs {}, ours {local_height}",
            version.best_height
        );

        if local_height < version.best_height {
            Ok(vec![Outbound::new(sender, self.get_blocks_message())])
        } else if local_height > version.best_height {
            Ok(vec![Outbound::new(sender, self.version_message(state)?)])
        } else {
            Ok(vec![])
        }
    }

    fn handle_addr(&self, state: &mut NodeState, addr: Addr) -> Result<Vec<Outbound>> {
        for peer in &addr.addr_list {
            if peer != &self.node_addr && state.known_nodes.add_node(peer) {
                info!("Learned peer {peer}");
            }
        }
        info!("There are {} known nodes", state.known_nodes.len());

        Ok(state
            .known_nodes
            .get_nodes_except(&[self.node_addr.as_str()])
            .iter()
            .map(|peer| Outbound::new(peer, self.get_blocks_message()))
            .collect())
    }

    fn handle_get_blocks(&self, state: &NodeState, get_blocks: GetBlocks) -> Result<Vec<Outbound>> {
        let hashes = state.utxo_set.get_blockchain().get_block_hashes()?;
        Ok(vec![Outbound::new(
            &get_blocks.addr_from,
            self.inv_message(OpType::Block, hashes),
        )])
    }

    fn handle_inv(&self, state: &mut NodeState, inv: Inv) -> Result<Vec<Outbound>> {
        info!(
            "Inventory from {}: {} {} item(s)",
            inv.addr_from,
            inv.items.len(),
            inv.op_type
        );

        match inv.op_type {
            OpType::Block => {
                // oldest first, so every block arrives after the ones it spends from
                let mut items = inv.items;
                items.reverse();
                state.blocks_in_transit.replace(&items);
                let Some(block_hash) = state.blocks_in_transit.first().map(<[u8]>::to_vec) else {
                    return Ok(vec![]);
                };
                state.blocks_in_transit.remove(&block_hash);
                Ok(vec![Outbound::new(
                    &inv.addr_from,
                    self.get_data_message(OpType::Block, &block_hash),
                )])
            }
            OpType::Tx => {
                let Some(txid) = inv.items.first() else {
                    return Ok(vec![]);
                };
                if state.mempool.contains(&HEXLOWER.encode(txid)) {
                    debug!("Transaction {} already pending", HEXLOWER.encode(txid));
                    return Ok(vec![]);
                }
                Ok(vec![Outbound::new(
                    &inv.addr_from,
                    self.get_data_message(OpType::Tx, txid),
                )])
            }
        }
    }

    fn handle_get_data(&self, state: &NodeState, get_data: GetData) -> Result<Vec<Outbound>> {
        let reply = match get_data.op_type {
            OpType::Block => match state.utxo_set.get_blockchain().get_block(&get_data.id)? {
                Some(block) => Message::Block(BlockData {
                    addr_from: self.node_addr.clone(),
                    block: block.serialize()?,
                }),
                None => {
                    debug!("Requested block {} not found", String::from_utf8_lossy(&get_data.id));
                    return Ok(vec![]);
                }
            },
            OpType::Tx => match state.mempool.get(&HEXLOWER.encode(&get_data.id)) {
                Some(tx) => Message::Tx(TxData {
                    addr_from: self.node_addr.clone(),
                    transaction: tx.serialize()?,
                }),
                None => {
                    debug!("Requested transaction {} not pending", HEXLOWER.encode(&get_data.id));
                    return Ok(vec![]);
                }
            },
        };
        Ok(vec![Outbound::new(&get_data.addr_from, reply)])
    }

    fn handle_block(&self, state: &mut NodeState, data: BlockData) -> Result<Vec<Outbound>> {
        let block = Block::deserialize(&data.block)?;

        let blockchain = state.utxo_set.get_blockchain();
        if blockchain.validate_block(&block)? {
            blockchain.add_block(&block)?;
            info!("Added block {} from {}", block.get_hash(), data.addr_from);
        } else {
            warn!("Rejected block {} from {}", block.get_hash(), data.addr_from);
        }

        if let Some(next) = state.blocks_in_transit.first().map(<[u8]>::to_vec) {
            state.blocks_in_transit.remove(&next);
            return Ok(vec![Outbound::new(
                &data.addr_from,
                self.get_data_message(OpType::Block, &next),
            )]);
        }

        // sync batch done
        state.utxo_set.reindex()?;
        state.utxo_set.get_blockchain().flush()?;
        Ok(vec![])
    }

    fn handle_tx(&self, state: &mut NodeState, data: TxData) -> Result<Vec<Outbound>> {
        let tx = Transaction::deserialize(&data.transaction)?;
        let txid = tx.get_id().to_vec();

        if !state.mempool.add(tx) {
            debug!("Transaction {} already pending", HEXLOWER.encode(&txid));
            return Ok(vec![]);
        }
        info!("Transaction {} added to the memory pool", HEXLOWER.encode(&txid));

        let mut outbound: Vec<Outbound> = state
            .known_nodes
            .get_nodes_except(&[self.node_addr.as_str(), data.addr_from.as_str()])
            .iter()
            .map(|peer| Outbound::new(peer, self.inv_message(OpType::Tx, vec![txid.clone()])))
            .collect();

        if let Some(miner) = &self.miner {
            if miner.should_mine(&state.mempool) {
                let NodeState {
                    utxo_set,
                    mempool,
                    known_nodes,
                    ..
                } = state;
                match miner.mine_pending(utxo_set, mempool) {
                    Ok(blocks) => {
                        if !blocks.is_empty() {
                            utxo_set.get_blockchain().flush()?;
                        }
                        let peers = known_nodes.get_nodes_except(&[self.node_addr.as_str()]);
                        for block in blocks {
                            for peer in &peers {
                                outbound.push(Outbound::new(
                                    peer,
                                    self.inv_message(OpType::Block, vec![block.get_hash_bytes()]),
                                ));
                            }
                        }
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => warn!("Mining round abandoned: {e}"),
                }
            }
        }

        Ok(outbound)
    }
}

// -1 stands for "no blocks at all" on the wire
fn wire_height(blockchain: &Blockchain) -> Result<i64> {
    match blockchain.get_best_height()? {
        Some(height) => i64::try_from(height)
            .map_err(|e| BlockchainError::Database(format!("Height out of range: {e}"))),
        None => Ok(-1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testnet::{create_temp_dir, with_broken_signature, TestChain};
    use crate::wallet::Wallet;

    const SELF_ADDR: &str = "127.0.0.1:3000";
    const PEER_ADDR: &str = "127.0.0.1:3001";

    fn context(chain: &TestChain, miner: Option<&str>) -> NodeContext {
        NodeContext::new(SELF_ADDR, miner, &[], chain.blockchain.clone()).unwrap()
    }

    fn version_from(addr: &str, best_height: i64) -> Message {
        Message::Version(Version {
            version: NODE_VERSION,
            best_height,
            addr_from: addr.to_string(),
        })
    }

    #[test]
    fn test_known_nodes_skip_self() {
        let chain = TestChain::new();
        let ctx = NodeContext::new(
            SELF_ADDR,
            None,
            &[SELF_ADDR.to_string(), PEER_ADDR.to_string()],
            chain.blockchain.clone(),
        )
        .unwrap();

        assert_eq!(ctx.known_peers().unwrap(), vec![PEER_ADDR.to_string()]);
        let handshake = ctx.handshake().unwrap();
        assert_eq!(handshake.len(), 1);
        assert_eq!(handshake[0].message, version_from(SELF_ADDR, 0));
    }

    #[test]
    fn test_version_from_taller_peer_requests_blocks() {
        let chain = TestChain::new();
        let ctx = context(&chain, None);

        let out = ctx.handle(version_from(PEER_ADDR, 5)).unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].addr, PEER_ADDR);
        assert!(matches!(out[0].message, Message::GetBlocks(_)));
        assert!(ctx.known_peers().unwrap().contains(&PEER_ADDR.to_string()));
    }

    #[test]
    fn test_version_from_shorter_peer_only_answers_version() {
        let chain = TestChain::new();
        chain.mint(2);
        let ctx = context(&chain, None);

        let out = ctx.handle(version_from(PEER_ADDR, -1)).unwrap();

        assert_eq!(out, vec![Outbound::new(PEER_ADDR, version_from(SELF_ADDR, 2))]);
    }

    #[test]
    fn test_version_at_equal_height_is_quiet() {
        let chain = TestChain::new();
        let ctx = context(&chain, None);
        assert!(ctx.handle(version_from(PEER_ADDR, 0)).unwrap().is_empty());
    }

    #[test]
    fn test_empty_store_reports_minus_one() {
        let dir = create_temp_dir().unwrap();
        let blockchain = Blockchain::open_blockchain(&dir.path().join("empty")).unwrap();
        let ctx = NodeContext::new(SELF_ADDR, None, &[PEER_ADDR.to_string()], blockchain).unwrap();

        let handshake = ctx.handshake().unwrap();
        assert_eq!(handshake[0].message, version_from(SELF_ADDR, -1));
    }

    #[test]
    fn test_addr_adds_peers_and_requests_blocks() {
        let chain = TestChain::new();
        let ctx = context(&chain, None);

        let out = ctx
            .handle(Message::Addr(Addr {
                addr_list: vec![PEER_ADDR.to_string(), SELF_ADDR.to_string()],
            }))
            .unwrap();

        assert_eq!(ctx.known_peers().unwrap(), vec![PEER_ADDR.to_string()]);
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0].message, Message::GetBlocks(_)));
    }

    #[test]
    fn test_inv_for_pending_tx_is_ignored() {
        let chain = TestChain::new();
        let ctx = context(&chain, None);
        let tx = chain.pay(&Wallet::new().unwrap(), 5);
        ctx.handle(Message::Tx(TxData {
            addr_from: PEER_ADDR.to_string(),
            transaction: tx.serialize().unwrap(),
        }))
        .unwrap();

        let inv = |id: Vec<u8>| {
            Message::Inv(Inv {
                addr_from: PEER_ADDR.to_string(),
                op_type: OpType::Tx,
                items: vec![id],
            })
        };
        assert!(ctx.handle(inv(tx.get_id().to_vec())).unwrap().is_empty());

        let unseen = ctx.handle(inv(vec![9; 32])).unwrap();
        assert_eq!(unseen.len(), 1);
        assert!(matches!(unseen[0].message, Message::GetData(_)));
    }

    #[test]
    fn test_block_inv_pulls_one_at_a_time() {
        let chain = TestChain::new();
        let ctx = context(&chain, None);

        let out = ctx
            .handle(Message::Inv(Inv {
                addr_from: PEER_ADDR.to_string(),
                op_type: OpType::Block,
                items: vec![b"h3".to_vec(), b"h2".to_vec(), b"h1".to_vec()],
            }))
            .unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(
            out[0].message,
            Message::GetData(GetData {
                addr_from: SELF_ADDR.to_string(),
                op_type: OpType::Block,
                id: b"h1".to_vec(),
            })
        );
        assert_eq!(ctx.blocks_in_transit().unwrap(), vec![b"h2".to_vec(), b"h3".to_vec()]);
        assert_eq!(ctx.sync_state().unwrap(), SyncState::Syncing { remaining: 2 });
    }

    #[test]
    fn test_block_failing_pow_is_not_appended() {
        let chain = TestChain::new();
        let ctx = context(&chain, None);

        let other = TestChain::new();
        let block = other.mint(1).remove(0);
        let hash = block.get_hash().as_bytes().to_vec();
        let mut bytes = block.serialize().unwrap();
        let at = bytes
            .windows(hash.len())
            .position(|window| window == hash.as_slice())
            .unwrap();
        // stored hash no longer matches the header
        bytes[at] = b'1';
        let forged = Block::deserialize(&bytes).unwrap();

        let out = ctx
            .handle(Message::Block(BlockData {
                addr_from: PEER_ADDR.to_string(),
                block: bytes,
            }))
            .unwrap();

        assert!(out.is_empty());
        let blockchain = ctx.blockchain().unwrap();
        assert!(blockchain.get_block(forged.get_hash().as_bytes()).unwrap().is_none());
        assert_eq!(blockchain.get_best_height().unwrap(), Some(0));
    }

    #[test]
    fn test_block_with_badly_signed_transaction_is_rejected() {
        let chain = TestChain::new();
        let ctx = context(&chain, None);
        let tip = chain.blockchain.get_tip_hash().unwrap().unwrap();
        let payment = chain.pay(&Wallet::new().unwrap(), 10);
        let genesis_txid = payment.get_vin()[0].get_txid().to_vec();
        let broken = with_broken_signature(&payment);
        let block = Block::new_block(tip.clone(), &[broken], 1).unwrap();

        let out = ctx
            .handle(Message::Block(BlockData {
                addr_from: PEER_ADDR.to_string(),
                block: block.serialize().unwrap(),
            }))
            .unwrap();

        assert!(out.is_empty());
        assert_eq!(chain.blockchain.get_tip_hash().unwrap(), Some(tip));
        assert!(chain
            .blockchain
            .get_block(block.get_hash().as_bytes())
            .unwrap()
            .is_none());
        assert!(chain.utxo_set.is_unspent(&genesis_txid, 0).unwrap());
    }

    #[test]
    fn test_flush_keeps_synced_blocks() {
        let chain = TestChain::new();
        let ctx = context(&chain, None);
        let blocks = chain.mint(1);

        ctx.flush().unwrap();
        assert_eq!(
            chain.blockchain.get_tip_hash().unwrap().as_deref(),
            Some(blocks[0].get_hash())
        );
    }

    #[test]
    fn test_getdata_tx_only_answers_from_mempool() {
        let chain = TestChain::new();
        let ctx = context(&chain, None);
        let genesis = chain.blockchain.get_block_by_height(0).unwrap().unwrap();
        let coinbase_id = genesis.get_transactions()[0].get_id().to_vec();

        let out = ctx
            .handle(Message::GetData(GetData {
                addr_from: PEER_ADDR.to_string(),
                op_type: OpType::Tx,
                id: coinbase_id,
            }))
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_tx_relayed_except_to_sender() {
        let chain = TestChain::new();
        let third = "127.0.0.1:3002";
        let ctx = NodeContext::new(
            SELF_ADDR,
            None,
            &[PEER_ADDR.to_string(), third.to_string()],
            chain.blockchain.clone(),
        )
        .unwrap();
        let tx = chain.pay(&Wallet::new().unwrap(), 5);
        let msg = Message::Tx(TxData {
            addr_from: PEER_ADDR.to_string(),
            transaction: tx.serialize().unwrap(),
        });

        let out = ctx.handle(msg.clone()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].addr, third);
        assert!(matches!(&out[0].message, Message::Inv(inv) if inv.op_type == OpType::Tx));

        assert!(ctx.handle(msg).unwrap().is_empty());
        assert_eq!(ctx.mempool_len().unwrap(), 1);
    }

    #[test]
    fn test_miner_mines_at_threshold_and_announces() {
        let chain = TestChain::new();
        let second_payer = Wallet::new().unwrap();
        let funding = chain.pay(&second_payer, 10);
        let block = chain.blockchain.mine_block(&[funding]).unwrap();
        chain.utxo_set.update(&block).unwrap();

        let miner_address = Wallet::new().unwrap().get_address();
        let ctx = NodeContext::new(
            SELF_ADDR,
            Some(&miner_address),
            &[PEER_ADDR.to_string()],
            chain.blockchain.clone(),
        )
        .unwrap();

        let recipient = Wallet::new().unwrap();
        let from_owner = chain.pay(&recipient, 5);
        let from_second = Transaction::new_utxo_transaction(
            &second_payer,
            &recipient.get_address(),
            5,
            &chain.utxo_set,
        )
        .unwrap();

        let tx_message = |tx: &Transaction| {
            Message::Tx(TxData {
                addr_from: PEER_ADDR.to_string(),
                transaction: tx.serialize().unwrap(),
            })
        };
        assert!(ctx.handle(tx_message(&from_owner)).unwrap().is_empty());
        let out = ctx.handle(tx_message(&from_second)).unwrap();

        assert_eq!(ctx.mempool_len().unwrap(), 0);
        assert_eq!(chain.blockchain.get_best_height().unwrap(), Some(2));
        let tip = chain.blockchain.get_tip_hash().unwrap().unwrap();
        assert_eq!(
            out,
            vec![Outbound::new(
                PEER_ADDR,
                Message::Inv(Inv {
                    addr_from: SELF_ADDR.to_string(),
                    op_type: OpType::Block,
                    items: vec![tip.into_bytes()],
                })
            )]
        );
        assert_eq!(
            chain.utxo_set.get_balance(&recipient.get_pub_key_hash()).unwrap(),
            10
        );
    }
}
