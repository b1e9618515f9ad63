//! steemwatch CLI — stream Steem blocks and account history as JSON lines.
//!
//! Usage:
//! ```bash
//! # Follow the chain from the head block, full blocks
//! steemwatch --server ws://127.0.0.1:8090
//!
//! # Operations of blocks 1000..2000, then everything from head-100 on
//! steemwatch -o -r 1000:2000 -r -100:
//!
//! # Full history of one account
//! steemwatch --account alice
//! ```

mod args;
mod logging;
mod output;
mod range;

use std::env;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;

use steemwatch_core::api::DatabaseApi;
use steemwatch_core::transport::RpcClient;
use steemwatch_core::TransportError;
use steemwatch_stream::{
    BlockEntry, BlockIterator, BlockStreamConfig, HistoryIterator, HistoryStreamConfig,
    StreamError, WaiterConfig,
};
use steemwatch_ws::{WsSession, WsSessionConfig};

use crate::args::{Command, WatchOptions};

#[tokio::main]
async fn main() {
    let argv: Vec<String> = env::args().skip(1).collect();
    let default_server = env::var(args::SERVER_ENV).unwrap_or_else(|_| args::DEFAULT_SERVER.into());

    let opts = match args::parse_args(&argv, &default_server) {
        Ok(Command::Watch(opts)) => opts,
        Ok(Command::Help) => {
            print_usage();
            return;
        }
        Ok(Command::Version) => {
            println!("steemwatch {}", env!("CARGO_PKG_VERSION"));
            return;
        }
        Err(e) => {
            eprintln!("Error: {e:#}");
            print_usage();
            process::exit(2);
        }
    };

    logging::init_tracing("info");

    if let Err(e) = run(opts).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("steemwatch {}", env!("CARGO_PKG_VERSION"));
    println!("Watch Steem blocks on stdout\n");
    println!("USAGE:");
    println!("    steemwatch [FLAGS]\n");
    println!("FLAGS:");
    println!("    -s, --server <URL>      Websocket API server  [env: {}, default: {}]", args::SERVER_ENV, args::DEFAULT_SERVER);
    println!("    -b, --blocks            Print full blocks (default)");
    println!("    -H, --headers           Print block headers");
    println!("    -t, --tx                Print transactions");
    println!("    -o, --ops               Print operations");
    println!("    -r, --range <RANGE>     Block range start:end, repeatable (default: follow head)");
    println!("    -a, --account <NAME>    Print the account's full history");
    println!("    -c, --chunk-size <N>    Records fetched per round trip");
    println!("    -V, --version           Print version");
    println!("    -h, --help              Print this help\n");
    println!("RANGES:");
    println!("    A:B  blocks A..B-1    A  block A only    A:  from A, forever");
    println!("    bounds: decimal, 0x10, 10h, or +N / -N relative to the head block");
}

async fn run(opts: WatchOptions) -> Result<()> {
    let session = WsSession::new(WsSessionConfig::new(&opts.server));
    session.start();

    let on_interrupt = session.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, shutting down");
            on_interrupt.stop();
        }
    });

    let result = watch(&session, &opts).await;
    let stopped = session.shutdown_token().is_cancelled();
    session.stop();
    match result {
        Err(e) if stopped && is_shutdown(&e) => Ok(()),
        other => other,
    }
}

async fn watch(session: &WsSession, opts: &WatchOptions) -> Result<()> {
    session.wait_until_connected().await?;
    let client: Arc<dyn RpcClient> = Arc::new(session.clone());

    if let Some(account) = &opts.account {
        let mut config = HistoryStreamConfig::default();
        if let Some(size) = opts.chunk_size {
            config.chunk_size = size;
        }
        let mut history = HistoryIterator::new(client.clone(), account.as_str(), config);
        loop {
            match history.next().await {
                Ok(Some(entry)) => emit(&serde_json::to_value(&entry)?)?,
                Ok(None) => break,
                Err(e) => await_reconnect(session, e).await?,
            }
        }
    }

    if opts.ranges.is_empty() {
        return Ok(());
    }
    let head = DatabaseApi::new(client.clone())
        .get_dynamic_global_properties()
        .await?
        .head_block_number;
    tracing::info!(head, "connected to node");

    for expr in &opts.ranges {
        let range = range::parse_range(head, expr).with_context(|| format!("bad range `{expr}`"))?;
        let mut config = BlockStreamConfig {
            waiter: WaiterConfig {
                cancel: session.shutdown_token().child_token(),
                ..WaiterConfig::default()
            },
            ..BlockStreamConfig::default()
        };
        if let Some(size) = opts.chunk_size {
            config.chunk_size = size;
        }

        let mut blocks = BlockIterator::new(client.clone(), range, config);
        loop {
            match blocks.next().await {
                Ok(Some(entry)) => print_block(opts, &entry)?,
                Ok(None) => break,
                Err(e) => await_reconnect(session, e).await?,
            }
        }
    }
    Ok(())
}

/// Iterators keep their position when a call fails, so a dropped
/// connection is ridden out by waiting for the session to reconnect.
/// Any other error is returned.
async fn await_reconnect(session: &WsSession, err: StreamError) -> Result<()> {
    if !err.is_connection_closed() || session.shutdown_token().is_cancelled() {
        return Err(err.into());
    }
    tracing::warn!(error = %err, "connection lost, resuming after reconnect");
    session.wait_until_connected().await?;
    Ok(())
}

fn print_block(opts: &WatchOptions, entry: &BlockEntry) -> Result<()> {
    if opts.blocks {
        emit(&entry.block)?;
    }
    if opts.headers {
        emit(&output::header_record(entry))?;
    }
    if opts.tx {
        for tx in output::tx_records(entry) {
            emit(&tx)?;
        }
    }
    if opts.ops {
        for op in output::op_records(entry) {
            emit(&op)?;
        }
    }
    Ok(())
}

/// Compact JSON, keys sorted, one record per line.
fn emit(record: &Value) -> Result<()> {
    println!("{}", serde_json::to_string(record)?);
    Ok(())
}

fn is_shutdown(err: &anyhow::Error) -> bool {
    let transport = match err.downcast_ref::<StreamError>() {
        Some(StreamError::Cancelled) => return true,
        Some(StreamError::Transport(e)) => Some(e),
        _ => err.downcast_ref::<TransportError>(),
    };
    matches!(
        transport,
        Some(TransportError::Shutdown | TransportError::ConnectionClosed)
    )
}
