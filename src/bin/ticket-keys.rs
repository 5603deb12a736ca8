use std::fs;
use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use clap::{Args, Parser, Subcommand};
use serde_json::json;

use ticket_gate::tickets::ring::persist;
use ticket_gate::tickets::{KeyRing, KeySnapshot, KeySource, SessionTicketKey};

#[derive(Parser)]
#[command(name = "ticket-keys")]
#[command(about = "Session ticket key management for ticket-gate", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate fresh keys and print them as base64
    Generate {
        #[arg(short, long, default_value_t = 2)]
        count: usize,
        /// Also write the raw keys to this file
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// List key names, newest first, as JSON
    Inspect {
        #[command(flatten)]
        source: KeyArgs,
    },
    /// Rotate a key file once, exactly as the running gate would
    Rotate {
        #[arg(short, long)]
        file: PathBuf,
        #[arg(long)]
        max_keys: Option<usize>,
    },
    /// Seal ticket state with the newest key and print the ticket as hex
    Mint {
        #[command(flatten)]
        source: KeyArgs,
        /// Ticket plaintext, hex encoded
        #[arg(long)]
        state: String,
    },
    /// Report which key, if any, opens a hex ticket
    Verify {
        #[command(flatten)]
        source: KeyArgs,
        #[arg(long)]
        ticket: String,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct KeyArgs {
    /// Base64 of N × 32 key bytes
    #[arg(long)]
    keys: Option<String>,
    /// Flat binary key file
    #[arg(long)]
    file: Option<PathBuf>,
}

impl KeyArgs {
    fn snapshot(&self) -> Result<KeySnapshot, Box<dyn std::error::Error>> {
        let snapshot = match (&self.keys, &self.file) {
            (Some(encoded), _) => KeySnapshot::from_base64(encoded)?,
            (None, Some(path)) => KeySnapshot::from_bytes(&fs::read(path)?)?,
            (None, None) => return Err("one of --keys or --file is required".into()),
        };
        Ok(snapshot)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Generate { count, out } => {
            let keys = (0..count).map(|_| SessionTicketKey::generate()).collect();
            let snapshot = KeySnapshot::from_keys(keys)?;
            if let Some(path) = out {
                persist(&path, &snapshot)?;
                eprintln!("wrote {} keys to {}", snapshot.len(), path.display());
            }
            println!("{}", snapshot.to_base64());
        }
        Commands::Inspect { source } => {
            let snapshot = source.snapshot()?;
            print_json(&describe(&snapshot))?;
        }
        Commands::Rotate { file, max_keys } => {
            let ring = KeyRing::initialize(KeySource::File {
                path: file.clone(),
                max_keys,
            })?;
            let rotated = ring.rotate();
            let mut report = describe(&ring.current_keys());
            report["rotated"] = json!(rotated);
            report["file"] = json!(file.display().to_string());
            print_json(&report)?;
        }
        Commands::Mint { source, state } => {
            let snapshot = source.snapshot()?;
            let ticket = snapshot
                .seal(&hex::decode(state)?)
                .ok_or("failed to seal ticket state")?;
            println!("{}", hex::encode(ticket));
        }
        Commands::Verify { source, ticket } => {
            let snapshot = source.snapshot()?;
            let ticket = hex::decode(ticket)?;
            let opened = snapshot
                .keys()
                .iter()
                .enumerate()
                .find_map(|(index, key)| key.open(&ticket).map(|state| (index, key, state)));
            let report = match opened {
                Some((index, key, state)) => json!({
                    "valid": true,
                    "key_index": index,
                    "key_name": hex::encode(key.name()),
                    "state_base64": BASE64.encode(state),
                }),
                None => json!({ "valid": false }),
            };
            print_json(&report)?;
        }
    }

    Ok(())
}

fn describe(snapshot: &KeySnapshot) -> serde_json::Value {
    let names: Vec<_> = snapshot
        .keys()
        .iter()
        .map(|key| hex::encode(key.name()))
        .collect();
    json!({ "count": snapshot.len(), "key_names": names })
}

fn print_json(value: &serde_json::Value) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
