//! chainlog CLI — inspect the engine and run a local demo.
//!
//! Usage:
//! ```bash
//! chainlog demo
//! chainlog info
//! ```

use std::env;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use chainlog_core::filter::Filter;
use chainlog_core::types::{Address, Hash};
use chainlog_engine::config::PollerConfig;
use chainlog_engine::service::{IndexerService, LogIndexer};
use chainlog_engine::sim::{SimChain, SimLog};
use chainlog_storage::memory::MemoryLogStore;

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    match args[1].as_str() {
        "info" => cmd_info(),
        "demo" => cmd_demo(),
        "version" | "--version" | "-V" => {
            println!("chainlog {}", env!("CARGO_PKG_VERSION"));
        }
        "help" | "--help" | "-h" => print_usage(),
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    }
}

fn print_usage() {
    println!("chainlog {}", env!("CARGO_PKG_VERSION"));
    println!("Reorg-safe, filter-driven chain log indexing engine\n");
    println!("USAGE:");
    println!("    chainlog <COMMAND>\n");
    println!("COMMANDS:");
    println!("    demo     Index a simulated chain end to end and print results");
    println!("    info     Show ChainLog configuration info");
    println!("    version  Print version");
    println!("    help     Print this help");
}

fn cmd_info() {
    let defaults = PollerConfig::default();
    println!("ChainLog v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default poll interval: {:?}", defaults.poll_interval);
    println!("  Default max reorg depth: {} blocks", defaults.max_reorg_depth);
    println!("  Default backfill batch: {} blocks/call", defaults.backfill_batch_size);
    println!("  Default persist batch: {} blocks/txn", defaults.persist_batch_size);
    println!("  Storage backends: memory, SQLite (feature: sqlite)");
}

/// Spin up the whole stack against an in-process simulated chain: register
/// a filter, sync, reorg the tail, and show the repaired query results.
fn cmd_demo() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("failed to start runtime: {err}");
            process::exit(1);
        }
    };
    if let Err(err) = runtime.block_on(run_demo()) {
        eprintln!("demo failed: {err}");
        process::exit(1);
    }
}

async fn run_demo() -> Result<(), chainlog_core::error::PollerError> {
    let token = Address::from_u64(0xAA);
    let transfer = Hash::from_u64(0x01);

    let chain = Arc::new(SimChain::with_height(0));
    let config = PollerConfig::default()
        .poll_interval(Duration::from_millis(20))
        .start_block(0);
    let service = IndexerService::new(chain.clone(), MemoryLogStore::new(), config);

    service
        .register_filter(Filter::new("transfers").address(token).event_sig(transfer))
        .await?;
    service.start().await?;

    println!("== producing blocks 1..=5, logs at 2 and 4 ==");
    chain.push_block(vec![]);
    chain.push_block(vec![SimLog::new(token, transfer)]);
    chain.push_block(vec![]);
    chain.push_block(vec![SimLog::new(token, transfer)]);
    chain.push_block(vec![]);
    wait_for_height(&service, 5).await;

    for log in service.logs(0, 5, transfer, token).await? {
        println!("  log at block {} (hash {})", log.block_number, log.block_hash);
    }
    if let Some(confirmed) = service.latest_log_with_confs(transfer, token, 2).await? {
        println!("  latest with 2 confirmations: block {}", confirmed.block_number);
    }

    println!("== reorging blocks 4..=5 away ==");
    chain.fork_at(4);
    chain.push_block(vec![]);
    chain.push_block(vec![SimLog::new(token, transfer)]); // replacement log at 5
    chain.push_block(vec![]);
    wait_for_height(&service, 6).await;

    for log in service.logs(0, 6, transfer, token).await? {
        println!("  log at block {} (hash {})", log.block_number, log.block_hash);
    }

    service.stop().await?;
    println!("== done ==");
    Ok(())
}

async fn wait_for_height<C, S>(service: &IndexerService<C, S>, height: i64)
where
    C: chainlog_engine::client::ChainClient + 'static,
    S: chainlog_core::store::LogStore + 'static,
{
    for _ in 0..200 {
        if let Ok(Some(block)) = service.latest_block().await {
            if block.number >= height {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
