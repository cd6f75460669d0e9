use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "p2p-ledger")]
pub struct Opt {
    #[command(subcommand)]
    pub command: Command,
}

/// Addresses may also be given as a wallet alias from this node's wallet file.
#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(name = "createblockchain", about = "Create a new blockchain")]
    Createblockchain {
        #[arg(help = "The address or alias to send the genesis block reward to")]
        address: String,
    },
    #[command(name = "createwallet", about = "Create a new wallet")]
    Createwallet {
        #[arg(long, help = "Name to refer to the new wallet by")]
        alias: Option<String>,
    },
    #[command(
        name = "getbalance",
        about = "Get the wallet balance of the target address"
    )]
    GetBalance {
        #[arg(help = "The wallet address or alias")]
        address: String,
    },
    #[command(name = "listaddresses", about = "Print local wallet addresses")]
    ListAddresses,
    #[command(name = "send", about = "Send value between addresses")]
    Send {
        #[arg(help = "Source wallet address or alias")]
        from: String,
        #[arg(help = "Destination wallet address or alias")]
        to: String,
        #[arg(help = "Amount to send")]
        amount: u64,
        #[arg(long, help = "Mine the transaction on this node instead of sending it out")]
        mine: bool,
    },
    #[command(name = "mint", about = "Mine a block holding only a coinbase reward")]
    Mint {
        #[arg(help = "The address or alias receiving the reward")]
        minter: String,
    },
    #[command(name = "printchain", about = "Print all blocks in the blockchain")]
    Printchain,
    #[command(name = "reindexutxo", about = "Rebuild UTXO index set")]
    Reindexutxo,
    #[command(name = "startnode", about = "Start a ledger node")]
    StartNode {
        #[arg(long, help = "Enable mining mode and send rewards to ADDRESS")]
        miner: Option<String>,
    },
}
