//! `lakesync` — operator CLI
//!
//! Subcommands: `serve` runs the gateway HTTP server; `push-test`,
//! `pull-test`, and `flush` exercise a running gateway; `migrate-adapter`
//! streams deltas between warehouses; `list-connectors` prints the
//! configured sources. Exit codes: 0 success, 1 handled error, 2 usage
//! error (from clap).

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lakesync_cdc::load_connectors;
use lakesync_core::{
    sign_token, ColumnDelta, DatabaseAdapter, DeltaOp, Hlc, HlcClock, LakeSyncError, Result,
    RowDelta,
};
use lakesync_gateway::{FlushFormat, GatewayConfig, SyncGateway};
use lakesync_lake::ParquetLake;
use lakesync_warehouse::{
    migrate_adapter, MemoryAdapter, MySqlDialect, MySqlExecutor, PgExecutor, PostgresDialect,
    SqlAdapter,
};

#[derive(Parser)]
#[command(name = "lakesync", version, about = "LakeSync sync pipeline operator tooling")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Json,
    Parquet,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway HTTP server
    Serve {
        #[arg(long, default_value = "0.0.0.0:8080")]
        addr: String,
        #[arg(long, default_value = "lakesync")]
        gateway_id: String,
        #[arg(long, env = "LAKESYNC_JWT_SECRET")]
        secret: String,
        /// Filesystem path backing the lake
        #[arg(long, default_value = "./lake")]
        lake_path: PathBuf,
        #[arg(long, default_value_t = 4 * 1024 * 1024)]
        max_buffer_bytes: usize,
        #[arg(long, default_value_t = 30_000)]
        max_buffer_age_ms: u64,
        #[arg(long, value_enum, default_value = "json")]
        format: FormatArg,
    },

    /// Push a batch of generated test deltas to a running gateway
    PushTest {
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        url: String,
        #[arg(long, default_value = "lakesync")]
        gateway_id: String,
        #[arg(long, env = "LAKESYNC_JWT_SECRET")]
        secret: String,
        #[arg(long, default_value = "cli-test")]
        client_id: String,
        #[arg(long, default_value = "cli_smoke")]
        table: String,
        #[arg(long, default_value_t = 3)]
        count: usize,
    },

    /// Pull deltas from a running gateway and print them
    PullTest {
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        url: String,
        #[arg(long, default_value = "lakesync")]
        gateway_id: String,
        #[arg(long, env = "LAKESYNC_JWT_SECRET")]
        secret: String,
        #[arg(long, default_value = "cli-test")]
        client_id: String,
        /// Decimal HLC cursor to pull from
        #[arg(long, default_value = "0")]
        since: String,
        #[arg(long, default_value_t = 100)]
        max_deltas: usize,
    },

    /// Ask a running gateway to flush its buffer
    Flush {
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        url: String,
    },

    /// Copy all deltas from one warehouse adapter to another
    MigrateAdapter {
        /// Source: postgres://…, mysql://…, or memory:
        #[arg(long)]
        from: String,
        /// Destination: postgres://…, mysql://…, or memory:
        #[arg(long)]
        to: String,
        #[arg(long, default_value_t = 500)]
        batch_size: usize,
    },

    /// Print the configured source connectors
    ListConnectors {
        #[arg(long, default_value = "connectors.json")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lakesync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error[{}]: {e}", e.code());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Serve {
            addr,
            gateway_id,
            secret,
            lake_path,
            max_buffer_bytes,
            max_buffer_age_ms,
            format,
        } => {
            let config = GatewayConfig::new(gateway_id)
                .with_jwt_secret(secret)
                .with_max_buffer_bytes(max_buffer_bytes)
                .with_max_buffer_age_ms(max_buffer_age_ms)
                .with_flush_format(match format {
                    FormatArg::Json => FlushFormat::Json,
                    FormatArg::Parquet => FlushFormat::Parquet,
                });
            let lake = Arc::new(ParquetLake::local(&lake_path)?);
            let gateway = SyncGateway::builder(config).with_lake(lake).start()?;
            lakesync_gateway::serve(gateway, &addr).await
        }

        Command::PushTest { url, gateway_id, secret, client_id, table, count } => {
            let token = sign_token(&secret, &client_id, &gateway_id, 1)?;
            let clock = HlcClock::system();
            let deltas: Vec<RowDelta> = (0..count)
                .map(|i| {
                    RowDelta::new(
                        DeltaOp::Insert,
                        table.clone(),
                        format!("row-{i}"),
                        client_id.clone(),
                        clock.now(),
                        vec![
                            ColumnDelta::new("seq", json!(i)),
                            ColumnDelta::new("label", json!(format!("push-test-{i}"))),
                        ],
                    )
                })
                .collect();

            let body = json!({"clientId": client_id, "deltas": deltas, "lastSeenHlc": "0"});
            let response = post_json(&format!("{url}/push"), Some(&token), body).await?;
            println!("{response}");
            Ok(())
        }

        Command::PullTest { url, gateway_id, secret, client_id, since, max_deltas } => {
            let token = sign_token(&secret, &client_id, &gateway_id, 1)?;
            let since: Hlc = since.parse()?;
            let body = json!({
                "clientId": client_id,
                "sinceHlc": since.to_string(),
                "maxDeltas": max_deltas,
            });
            let response = post_json(&format!("{url}/pull"), Some(&token), body).await?;
            println!("{response}");
            Ok(())
        }

        Command::Flush { url } => {
            let response = post_json(&format!("{url}/flush"), None, json!({})).await?;
            println!("{response}");
            Ok(())
        }

        Command::MigrateAdapter { from, to, batch_size } => {
            let source = adapter_for(&from).await?;
            let destination = adapter_for(&to).await?;
            let migrated =
                migrate_adapter(source.as_ref(), destination.as_ref(), batch_size).await?;
            info!(migrated, from = %from, to = %to, "Migration finished");
            println!("{}", json!({"migrated": migrated}));
            source.close().await?;
            destination.close().await
        }

        Command::ListConnectors { config } => {
            let connectors = load_connectors(&config)?;
            for connector in &connectors {
                println!(
                    "{}",
                    json!({"name": connector.name(), "type": connector.type_name()})
                );
            }
            info!(count = connectors.len(), "Connectors listed");
            Ok(())
        }
    }
}

/// Build a warehouse adapter from a connection URL
async fn adapter_for(url: &str) -> Result<Arc<dyn DatabaseAdapter>> {
    if url == "memory:" {
        return Ok(Arc::new(MemoryAdapter::new()));
    }
    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        let executor = Arc::new(PgExecutor::connect(url).await?);
        return Ok(Arc::new(SqlAdapter::connect(executor, Arc::new(PostgresDialect)).await?));
    }
    if url.starts_with("mysql://") {
        let executor = Arc::new(MySqlExecutor::connect(url).await?);
        return Ok(Arc::new(SqlAdapter::connect(executor, Arc::new(MySqlDialect)).await?));
    }
    Err(LakeSyncError::Config(format!(
        "unsupported adapter url '{url}' (expected postgres://, mysql://, or memory:)"
    )))
}

async fn post_json(
    url: &str,
    token: Option<&str>,
    body: serde_json::Value,
) -> Result<serde_json::Value> {
    let client = reqwest::Client::new();
    let mut request = client.post(url).json(&body);
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }
    let response = request
        .send()
        .await
        .map_err(|e| LakeSyncError::Http(format!("request to {url}: {e}")))?;
    let status = response.status();
    let payload: serde_json::Value = response
        .json()
        .await
        .map_err(|e| LakeSyncError::Serialization(e.to_string()))?;
    if !status.is_success() {
        return Err(LakeSyncError::Http(format!("{url} returned {status}: {payload}")));
    }
    Ok(payload)
}
