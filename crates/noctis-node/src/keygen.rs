//! noctis-keygen — mint and use WOTS+ one-time keypairs.
//!
//! Every RFQ action needs a fresh keypair: the scheme is strictly one-time
//! and the service rejects any reused signature. `generate` emits a keypair
//! as JSON; `sign` consumes a key file and a message, printing the detached
//! signature as hex. A key file that has signed once must be discarded.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use noctis_crypto::WotsKeyPair;

#[derive(Parser, Debug)]
#[command(name = "noctis-keygen", version, about = "WOTS+ one-time keypair tool")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a fresh keypair and print (or write) it as JSON.
    Generate {
        /// Write the keypair JSON here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Sign a message with a stored keypair. One use only.
    Sign {
        /// Key file produced by `generate`.
        #[arg(long)]
        key_file: PathBuf,
        /// The exact canonical message string to sign.
        #[arg(long)]
        message: String,
    },
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyFile {
    public_key: String,
    secret_seed: String,
}

fn main() -> anyhow::Result<()> {
    match Args::parse().command {
        Command::Generate { out } => {
            let kp = WotsKeyPair::generate();
            let file = KeyFile {
                public_key: kp.public_key.to_hex(),
                secret_seed: hex::encode(kp.secret_seed_bytes()),
            };
            let json = serde_json::to_string_pretty(&file)?;
            match out {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("writing {}", path.display()))?;
                    eprintln!("keypair written to {}", path.display());
                }
                None => println!("{json}"),
            }
        }
        Command::Sign { key_file, message } => {
            let json = std::fs::read_to_string(&key_file)
                .with_context(|| format!("reading {}", key_file.display()))?;
            let file: KeyFile = serde_json::from_str(&json).context("parsing key file")?;

            let pk = hex::decode(&file.public_key).context("decoding public key")?;
            let seed_bytes = hex::decode(&file.secret_seed).context("decoding secret seed")?;
            let seed: [u8; 32] = seed_bytes
                .as_slice()
                .try_into()
                .map_err(|_| anyhow::anyhow!("secret seed must be 32 bytes"))?;

            let kp = WotsKeyPair::from_raw(pk, seed);
            let signature = kp.sign(message.as_bytes());
            println!("{}", hex::encode(&signature.0));
            eprintln!("WARNING: this keypair is now spent; do not sign again with it");
        }
    }
    Ok(())
}
