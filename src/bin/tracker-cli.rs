//! Command-line client for a running tracker.

use clap::{Parser, Subcommand};
use peer_tracker::http::RegisterNode;
use std::net::Ipv4Addr;

#[derive(Parser)]
#[command(name = "tracker-cli")]
#[command(about = "Register and look up peers on a peer-tracker", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register (or re-register) a node
    Register {
        #[arg(long)]
        id: u64,
        #[arg(long)]
        port: u16,
        /// Defaults to the address the tracker sees this client connect from
        #[arg(long)]
        address: Option<Ipv4Addr>,
    },
    /// Look up a node's address
    Lookup {
        #[arg(long)]
        id: u64,
    },
    /// Check the tracker answers
    Ping,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let res = match cli.command {
        Commands::Register { id, port, address } => {
            client
                .put(format!("{}/nodes/{}", cli.url, id))
                .json(&RegisterNode { port, address })
                .send()
                .await?
        }
        Commands::Lookup { id } => client.get(format!("{}/nodes/{}", cli.url, id)).send().await?,
        Commands::Ping => client.get(format!("{}/", cli.url)).send().await?,
    };
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if let Some(retry_after) = res.headers().get(reqwest::header::RETRY_AFTER) {
        eprintln!("Rate limited, retry after {}s", retry_after.to_str().unwrap_or("?"));
    }
    let body = res.text().await?;

    if status.is_success() {
        match serde_json::from_str::<serde_json::Value>(&body) {
            Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
            Err(_) => println!("{} {}", status, body),
        }
        Ok(())
    } else {
        eprintln!("Error: {} - {}", status, body);
        std::process::exit(1);
    }
}
