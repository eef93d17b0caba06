//! Minimal query/submit tool against a node's RPC endpoint.
//!
//! Exit codes are a stable contract for tooling:
//! 0 success, 1 generic error, 2 invalid argument, 3 network error,
//! 4 consensus/state rejection (e.g. invalid nonce).

use clap::{Parser, Subcommand};
use computechain::types::Tx;

#[derive(Parser, Debug)]
#[command(name = "cpc-cli", about = "ComputeChain RPC client")]
struct Args {
    /// Node RPC base URL.
    #[arg(long, default_value = "http://127.0.0.1:9001")]
    rpc: String,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Chain tip, epoch and economic counters.
    Status,
    /// Balance and nonce of an account.
    Account { address: String },
    /// A single validator record.
    Validator { address: String },
    /// All validators sorted by performance score.
    Leaderboard,
    /// Currently jailed validators.
    Jailed,
    /// Delegations of a delegator.
    Delegations { address: String },
    /// Submit a signed transaction from a JSON file.
    Submit { file: String },
}

const EXIT_GENERIC: i32 = 1;
const EXIT_INVALID_ARG: i32 = 2;
const EXIT_NETWORK: i32 = 3;
const EXIT_STATE: i32 = 4;

fn die(code: i32, msg: impl std::fmt::Display) -> ! {
    eprintln!("{msg}");
    std::process::exit(code);
}

async fn get_json(client: &reqwest::Client, url: String) -> serde_json::Value {
    let resp = match client.get(&url).send().await {
        Ok(r) => r,
        Err(e) => die(EXIT_NETWORK, format!("network error: {e}")),
    };
    if !resp.status().is_success() {
        die(EXIT_GENERIC, format!("{} -> {}", url, resp.status()));
    }
    match resp.json().await {
        Ok(v) => v,
        Err(e) => die(EXIT_GENERIC, format!("bad response: {e}")),
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let client = reqwest::Client::new();
    let base = args.rpc.trim_end_matches('/');

    let out = match args.cmd {
        Cmd::Status => get_json(&client, format!("{base}/status")).await,
        Cmd::Account { address } => get_json(&client, format!("{base}/account/{address}")).await,
        Cmd::Validator { address } => get_json(&client, format!("{base}/validator/{address}")).await,
        Cmd::Leaderboard => get_json(&client, format!("{base}/validators/leaderboard")).await,
        Cmd::Jailed => get_json(&client, format!("{base}/validators/jailed")).await,
        Cmd::Delegations { address } => {
            get_json(&client, format!("{base}/delegations/{address}")).await
        }
        Cmd::Submit { file } => {
            let raw = match std::fs::read_to_string(&file) {
                Ok(raw) => raw,
                Err(e) => die(EXIT_INVALID_ARG, format!("cannot read {file}: {e}")),
            };
            let tx: Tx = match serde_json::from_str(&raw) {
                Ok(tx) => tx,
                Err(e) => die(EXIT_INVALID_ARG, format!("bad transaction json: {e}")),
            };
            let resp = match client.post(format!("{base}/tx")).json(&tx).send().await {
                Ok(r) => r,
                Err(e) => die(EXIT_NETWORK, format!("network error: {e}")),
            };
            let body: serde_json::Value = match resp.json().await {
                Ok(v) => v,
                Err(e) => die(EXIT_GENERIC, format!("bad response: {e}")),
            };
            if body.get("status").and_then(|s| s.as_str()) == Some("Rejected") {
                eprintln!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
                std::process::exit(EXIT_STATE);
            }
            body
        }
    };

    println!("{}", serde_json::to_string_pretty(&out).unwrap_or_default());
}
