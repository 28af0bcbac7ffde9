//! BTS (Bitcoin document timestamp) CLI client

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use bts_client::{ClientConfig, HeaderStore};
use bts_core::{carrier_transaction, hash_file, verify_proof_file, HeaderChain};
use bts_types::{Decodable, Encodable, PartialMerkleTree, Proof, Transaction};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bts")]
#[command(about = "Bitcoin document timestamp client", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory, overrides the configuration file
    #[arg(short = 'd', long)]
    data_dir: Option<PathBuf>,

    /// Log more (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the SHA-256 digest of a file
    Hash {
        /// File to hash
        file: PathBuf,
    },

    /// Print the unfunded carrier transaction for a file
    Carrier {
        /// File to commit to
        file: PathBuf,
    },

    /// Show the contents of a proof file
    Inspect {
        /// Proof file
        proof: PathBuf,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Verify a proof file against the document next to it
    Verify {
        /// Proof file (the document path plus the proof suffix)
        proof: PathBuf,
    },

    /// Manage the local block header chain
    Headers {
        #[command(subcommand)]
        command: HeaderCommands,
    },
}

#[derive(Subcommand)]
enum HeaderCommands {
    /// Append raw 80-byte headers from a file
    Import {
        /// File of concatenated serialized headers
        file: PathBuf,
    },

    /// Show the chain tip
    Tip,
}

fn init_logging(config: &ClientConfig, verbose: u8) {
    let default_level = match verbose {
        0 => config.log_level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_headers(config: &ClientConfig) -> Result<HeaderStore> {
    let path = config.header_db_path();
    HeaderStore::open(&path).with_context(|| format!("opening header store {}", path.display()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ClientConfig::load(cli.config.as_deref())?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    init_logging(&config, cli.verbose);

    match cli.command {
        Commands::Hash { file } => {
            let digest = hash_file(&file).with_context(|| format!("reading {}", file.display()))?;
            println!("{}  {}", digest, file.display());
        }

        Commands::Carrier { file } => {
            let digest = hash_file(&file).with_context(|| format!("reading {}", file.display()))?;
            let tx = carrier_transaction(&digest);
            println!("{}", hex::encode(tx.to_bytes()));
        }

        Commands::Inspect { proof, json } => {
            let bytes =
                std::fs::read(&proof).with_context(|| format!("reading {}", proof.display()))?;
            let record = Proof::deserialize(&bytes)?;

            if json {
                println!("{}", record.to_json()?);
                return Ok(());
            }

            let tx = Transaction::from_bytes(&record.carrier_transaction)?;
            let tree = PartialMerkleTree::from_bytes(&record.partial_merkle_tree)?;
            let matches = tree.extract_matches()?;
            let carried = tx
                .first_data_output()
                .and_then(|output| output.script_pubkey.op_return_payload())
                .map(hex::encode)
                .unwrap_or_else(|| "(none)".to_string());

            println!("Timestamp Proof");
            println!("===============");
            println!("Block Hash:    {}", record.block_hash);
            println!("Merkle Root:   {}", matches.root);
            println!("Block Txs:     {}", tree.total_transactions());
            println!("Carrier Txid:  {}", tx.txid());
            println!("Embedded Data: {}", carried);
            for txid in &matches.txids {
                println!("Matched Txid:  {}", txid);
            }
        }

        Commands::Verify { proof } => {
            let store = open_headers(&config)?;
            let verified = verify_proof_file(&proof, &config.tracker.proof_suffix, &store)?;

            println!("Proof verified successfully");
            println!("Document:  {}", verified.document.display());
            println!("Digest:    {}", verified.digest);
            println!("Txid:      {}", verified.txid);
            println!("Block:     {}", verified.header.block_hash());
            println!("Existed:   {}", verified.header.timestamp());
        }

        Commands::Headers { command } => {
            let store = open_headers(&config)?;
            match command {
                HeaderCommands::Import { file } => {
                    let bytes = std::fs::read(&file)
                        .with_context(|| format!("reading {}", file.display()))?;
                    let added = store.import(&bytes)?;
                    println!("Imported {} headers ({} stored)", added, store.len());
                }
                HeaderCommands::Tip => match store.tip_hash()? {
                    Some(_) => {
                        let tip = store.tip()?;
                        println!("Tip:     {}", tip.block_hash());
                        println!("Time:    {}", tip.timestamp());
                        println!("Headers: {}", store.len());
                    }
                    None => println!("No headers stored"),
                },
            }
        }
    }

    Ok(())
}
