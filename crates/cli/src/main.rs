//! Offloadq CLI - operator introspection for worker daemons

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tabled::{Table, Tabled};

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:9530";

#[derive(Parser)]
#[command(name = "offloadq")]
#[command(about = "Offloadq worker daemon CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// RPC server URL of the worker daemon
    #[arg(long, env = "OFFLOADQ_RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Liveness check of the worker daemon
    Health,

    /// Show the worker fleet status
    Status,

    /// Show per-queue message and consumer counts
    Queues {
        /// Restrict to one provider namespace (e.g. ITL.Compute)
        #[arg(short, long)]
        namespace: Option<String>,
    },
}

#[derive(Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: serde_json::Value,
    id: u64,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    #[allow(dead_code)]
    jsonrpc: String,
    #[allow(dead_code)]
    id: u64,
    result: Option<serde_json::Value>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

#[derive(Tabled)]
struct WorkerRow {
    #[tabled(rename = "WORKER")]
    worker_id: String,
    #[tabled(rename = "NAMESPACE")]
    namespace: String,
    #[tabled(rename = "RUNNING")]
    running: String,
    #[tabled(rename = "PROCESSED")]
    processed: u64,
    #[tabled(rename = "FAILED")]
    failed: u64,
}

#[derive(Tabled)]
struct QueueRow {
    #[tabled(rename = "QUEUE")]
    queue: String,
    #[tabled(rename = "MESSAGES")]
    messages: u64,
    #[tabled(rename = "CONSUMERS")]
    consumers: u64,
}

async fn call_rpc(url: &str, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
    let request = JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        method: method.to_string(),
        params,
        id: 1,
    };

    let client = reqwest::Client::new();
    let response: JsonRpcResponse = client
        .post(url)
        .json(&request)
        .send()
        .await
        .context("Failed to connect to daemon")?
        .json()
        .await
        .context("Failed to parse response")?;

    if let Some(error) = response.error {
        anyhow::bail!("RPC error ({}): {}", error.code, error.message);
    }

    response
        .result
        .ok_or_else(|| anyhow::anyhow!("No result in response"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Health => {
            let result = call_rpc(&cli.rpc_url, "health.v1", json!({})).await?;
            println!("{}", "✓ Daemon is alive".green().bold());
            println!();
            println!("  {} {}", "Version:".bold(), result["version"]);
            println!(
                "  {} {} seconds",
                "Uptime:".bold(),
                result["uptime_secs"]
            );
        }

        Commands::Status => {
            println!("{}", "Worker Fleet Status".cyan().bold());
            println!();

            let status = call_rpc(&cli.rpc_url, "workers.status.v1", json!({})).await?;
            println!(
                "  {} {} ({} active)",
                "Workers:".bold(),
                status["total_workers"],
                status["active_workers"]
            );
            println!(
                "  {} {}",
                "Jobs processed:".bold(),
                status["total_jobs_processed"]
            );
            println!("  {} {}", "Jobs failed:".bold(), status["total_jobs_failed"]);
            println!();

            let rows: Vec<WorkerRow> = status["workers"]
                .as_array()
                .map(|workers| {
                    workers
                        .iter()
                        .map(|w| WorkerRow {
                            worker_id: w["worker_id"].as_str().unwrap_or("?").to_string(),
                            namespace: w["provider_namespace"]
                                .as_str()
                                .unwrap_or("?")
                                .to_string(),
                            running: if w["is_running"].as_bool().unwrap_or(false) {
                                "yes".green().to_string()
                            } else {
                                "no".red().to_string()
                            },
                            processed: w["jobs_processed"].as_u64().unwrap_or(0),
                            failed: w["jobs_failed"].as_u64().unwrap_or(0),
                        })
                        .collect()
                })
                .unwrap_or_default();

            if rows.is_empty() {
                println!("{}", "No workers registered".yellow());
            } else {
                println!("{}", Table::new(rows));
            }
        }

        Commands::Queues { namespace } => {
            let params = match &namespace {
                Some(ns) => json!({ "namespace": ns }),
                None => json!({}),
            };
            let result = call_rpc(&cli.rpc_url, "queues.stats.v1", params).await?;

            let Some(namespaces) = result["namespaces"].as_object() else {
                anyhow::bail!("Malformed response: missing namespaces");
            };

            for (ns, stats) in namespaces {
                let connected = stats["connected"].as_bool().unwrap_or(false);
                let state = if connected {
                    "connected".green()
                } else {
                    "disconnected".red()
                };
                println!("{} ({})", ns.cyan().bold(), state);

                let rows: Vec<QueueRow> = stats["queues"]
                    .as_object()
                    .map(|queues| {
                        queues
                            .iter()
                            .map(|(name, q)| QueueRow {
                                queue: name.clone(),
                                messages: q["message_count"].as_u64().unwrap_or(0),
                                consumers: q["consumer_count"].as_u64().unwrap_or(0),
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                println!("{}", Table::new(rows));
                println!();
            }
        }
    }

    Ok(())
}
