// This is my entry point for the ledger CLI
// Every subcommand maps onto one library operation; the node itself lives in `startnode`
use clap::Parser;
use log::{error, info, LevelFilter};
use p2p_ledger::{
    convert_address, hash_pub_key, pub_key_hash_from_address, send_tx, Blockchain,
    BlockchainError, Command, NodeContext, Opt, ProofOfWork, Server, TcpTransport, Transaction,
    UTXOSet, Wallets, CENTRAL_NODE, GLOBAL_CONFIG,
};
use std::process;
use std::sync::Arc;

fn main() {
    // Info by default, RUST_LOG still wins when I set it
    env_logger::builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let opt = Opt::parse();

    if let Err(e) = run_command(opt.command) {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn run_command(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    // I clone the global config so CLI overrides stay local to this command
    let config = GLOBAL_CONFIG.clone();

    match command {
        Command::Createblockchain { address } => {
            let wallets = Wallets::load(&config.wallet_path())?;
            let address = wallets.resolve_address(&address)?;

            let blockchain = Blockchain::create_blockchain(&address, &config.chain_path())?;
            let utxo_set = UTXOSet::new(blockchain);
            utxo_set.reindex()?;
            println!("Done!");
        }
        Command::Createwallet { alias } => {
            let mut wallets = Wallets::load(&config.wallet_path())?;
            let address = wallets.create_wallet(alias.as_deref())?;
            println!("Your new address: {address}")
        }
        Command::GetBalance { address } => {
            let wallets = Wallets::load(&config.wallet_path())?;
            let address = wallets.resolve_address(&address)?;
            let pub_key_hash = pub_key_hash_from_address(&address)?;

            let utxo_set = UTXOSet::new(Blockchain::open_blockchain(&config.chain_path())?);
            let balance = utxo_set.get_balance(&pub_key_hash)?;
            println!("Balance of {address}: {balance}");
        }
        Command::ListAddresses => {
            let wallets = Wallets::load(&config.wallet_path())?;
            for address in wallets.get_addresses() {
                match wallets.alias_of(&address) {
                    Some(alias) => println!("{address} ({alias})"),
                    None => println!("{address}"),
                }
            }
        }
        Command::Send {
            from,
            to,
            amount,
            mine,
        } => {
            let wallets = Wallets::load(&config.wallet_path())?;
            let from = wallets.resolve_address(&from)?;
            let to = wallets.resolve_address(&to)?;
            // I can only sign for keys this node holds
            let wallet = wallets.get_wallet(&from).ok_or_else(|| {
                BlockchainError::Wallet(format!("No local wallet for address {from}"))
            })?;

            let blockchain = Blockchain::open_blockchain(&config.chain_path())?;
            let utxo_set = UTXOSet::new(blockchain.clone());
            let transaction = Transaction::new_utxo_transaction(wallet, &to, amount, &utxo_set)?;

            if mine {
                // Mining locally means the sender collects the block reward
                let coinbase = Transaction::new_coinbase_tx(&from)?;
                let block = blockchain.mine_block(&[transaction, coinbase])?;
                utxo_set.update(&block)?;
                info!("Transaction mined in block {}", block.get_hash());
            } else {
                let known_nodes = config.get_known_nodes();
                let node = known_nodes.first().map(String::as_str).unwrap_or(CENTRAL_NODE);
                let transport = TcpTransport::new(config.connect_timeout());
                send_tx(&transport, &config.get_node_addr(), node, &transaction)?;
                info!("Transaction {} sent to {node}", transaction.get_id_hex());
            }
            println!("Success!")
        }
        Command::Mint { minter } => {
            let wallets = Wallets::load(&config.wallet_path())?;
            let minter = wallets.resolve_address(&minter)?;

            let blockchain = Blockchain::open_blockchain(&config.chain_path())?;
            let coinbase = Transaction::new_coinbase_tx(&minter)?;
            let block = blockchain.mine_block(&[coinbase])?;
            UTXOSet::new(blockchain).update(&block)?;
            println!("Minted block {} at height {}", block.get_hash(), block.get_height());
        }
        Command::Printchain => {
            let blockchain = Blockchain::open_blockchain(&config.chain_path())?;
            for block in blockchain.iterator()? {
                let block = block?;
                println!("Pre block hash: {}", block.get_pre_block_hash());
                println!("Cur block hash: {}", block.get_hash());
                println!("Cur block Timestamp: {}", block.get_timestamp());
                println!("Height: {}", block.get_height());
                println!("Nonce: {}", block.get_nonce());
                println!("PoW: {}", ProofOfWork::validate(&block));

                for tx in block.get_transactions() {
                    println!("- Transaction txid_hex: {}", tx.get_id_hex());

                    if !tx.is_coinbase() {
                        for input in tx.get_vin() {
                            let pub_key_hash = hash_pub_key(input.get_pub_key());
                            println!(
                                "-- Input txid = {}, vout = {}, from = {}",
                                input.get_txid_hex(),
                                input.get_vout(),
                                convert_address(&pub_key_hash),
                            )
                        }
                    }
                    for output in tx.get_vout() {
                        println!(
                            "-- Output value = {}, to = {}",
                            output.get_value(),
                            convert_address(output.get_pub_key_hash()),
                        )
                    }
                }
                println!()
            }
        }
        Command::Reindexutxo => {
            let utxo_set = UTXOSet::new(Blockchain::open_blockchain(&config.chain_path())?);
            utxo_set.reindex()?;
            let count = utxo_set.count_transactions()?;
            println!("Done! There are {count} transactions in the UTXO set.");
        }
        Command::StartNode { miner } => {
            if let Some(miner) = miner {
                let wallets = Wallets::load(&config.wallet_path())?;
                let addr = wallets.resolve_address(&miner)?;
                println!("Mining is on. Address to receive rewards: {addr}");
                config.set_mining_addr(addr);
            }

            let node_addr = config.get_node_addr();
            // An empty store is fine here: a fresh node syncs its chain from peers
            let blockchain = Blockchain::open_blockchain(&config.chain_path())?;
            let context = Arc::new(NodeContext::new(
                &node_addr,
                config.get_mining_addr().as_deref(),
                &config.get_known_nodes(),
                blockchain,
            )?);

            // SIGINT/SIGTERM: close storage and stop, whatever is in flight
            let shutdown_context = Arc::clone(&context);
            ctrlc::set_handler(move || {
                info!("Shutting down node, flushing storage");
                if let Err(e) = shutdown_context.flush() {
                    error!("Failed to flush storage: {e}");
                    process::exit(1);
                }
                process::exit(0);
            })?;

            let transport = Arc::new(TcpTransport::new(config.connect_timeout()));
            let server = Server::new(context, transport, config.read_timeout());
            server.run()?
        }
    }
    Ok(())
}
