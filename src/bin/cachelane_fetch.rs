//! cachelane-fetch: run one GET through the cached execution pipeline.
//!
//! Usage:
//!   cachelane-fetch <url> [--ttl <secs>] [--main] [--header <name:value>]...
//!   cachelane-fetch stats
//!   cachelane-fetch clear

use anyhow::{bail, Context};
use cachelane::telemetry::{self, TracingLogListener};
use cachelane::{Json, RequestConfig, RequestExecutor};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

struct FetchArgs {
    url: String,
    ttl: Option<u64>,
    main_priority: bool,
    headers: Vec<(String, String)>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
    telemetry::set_log_listener(Arc::new(TracingLogListener));

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let result = match args[1].as_str() {
        "stats" => cmd_stats().await,
        "clear" => cmd_clear().await,
        "version" | "--version" | "-V" => {
            println!("cachelane-fetch {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        _ => match parse_fetch_args(&args[1..]) {
            Ok(fetch) => cmd_fetch(fetch).await,
            Err(e) => {
                eprintln!("{e}");
                eprintln!();
                print_usage();
                std::process::exit(1);
            }
        },
    };

    telemetry::flush(Duration::from_secs(1));
    result
}

fn print_usage() {
    println!(
        r#"cachelane-fetch: cached HTTP GET

USAGE:
    cachelane-fetch <URL> [OPTIONS]
    cachelane-fetch <COMMAND>

OPTIONS:
    --ttl <secs>                Cache the response for this long
    --main                      Run on the serial primary lane
    --header <name:value>       Extra request header (repeatable)

COMMANDS:
    stats                       Show cache location and disk usage
    clear                       Remove every cached response
    version                     Show version information
    help                        Show this help message

ENVIRONMENT:
    CACHELANE_CACHE_DIR                 Cache directory
    CACHELANE_DISK_CAPACITY_BYTES       Disk budget (default 150 MiB)
    CACHELANE_MEMORY_CAPACITY_BYTES     Memory budget (default 0)
    CACHELANE_SECONDARY_CONCURRENCY     Secondary lane width
    RUST_LOG                            Log filter (default warn)"#
    );
}

fn parse_fetch_args(args: &[String]) -> anyhow::Result<FetchArgs> {
    let mut iter = args.iter();
    let mut fetch = FetchArgs {
        url: String::new(),
        ttl: None,
        main_priority: false,
        headers: Vec::new(),
    };

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--ttl" => {
                let secs = iter.next().context("--ttl needs a value")?;
                fetch.ttl = Some(secs.parse().with_context(|| format!("invalid --ttl {secs:?}"))?);
            }
            "--main" => fetch.main_priority = true,
            "--header" => {
                let raw = iter.next().context("--header needs a value")?;
                let Some((name, value)) = raw.split_once(':') else {
                    bail!("header must look like name:value, got {raw:?}");
                };
                fetch.headers.push((name.trim().to_string(), value.trim().to_string()));
            }
            other if other.starts_with("--") => bail!("Unknown option: {other}"),
            url if fetch.url.is_empty() => fetch.url = url.to_string(),
            extra => bail!("Unexpected argument: {extra}"),
        }
    }

    if fetch.url.is_empty() {
        bail!("missing URL");
    }
    Ok(fetch)
}

async fn cmd_fetch(args: FetchArgs) -> anyhow::Result<()> {
    let executor = RequestExecutor::builder()
        .log_tag("cachelane-fetch")
        .build()
        .await?;

    let mut config = RequestConfig::<Json<Value>>::get(&args.url).main_priority(args.main_priority);
    for (name, value) in &args.headers {
        config = config.header(name, value);
    }
    if let Some(ttl) = args.ttl {
        config = config.auto_cache(true).cache_for(Duration::from_secs(ttl));
    }

    let started = Instant::now();
    let stats_before = executor.cache().stats();
    let Json(body) = executor.execute(config).await?;
    let stats_after = executor.cache().stats();

    let source = if stats_after.hits > stats_before.hits {
        "cache"
    } else if stats_after.stale_hits > stats_before.stale_hits {
        "stale cache"
    } else {
        "network"
    };
    eprintln!("{} ({}, {} ms)", args.url, source, started.elapsed().as_millis());
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

async fn cmd_stats() -> anyhow::Result<()> {
    let executor = RequestExecutor::builder().build().await?;
    let cache = executor.cache();
    println!("directory:     {}", cache.config().resolved_directory().display());
    println!("entries:       {}", cache.len().await);
    println!(
        "disk usage:    {} / {} bytes",
        cache.disk_usage().await,
        cache.config().disk_capacity
    );
    println!("memory budget: {} bytes", cache.config().memory_capacity);
    for lane in executor.lanes() {
        println!("{:<9} lane: max {} concurrent", lane.lane.name(), lane.max_concurrency);
    }
    Ok(())
}

async fn cmd_clear() -> anyhow::Result<()> {
    let executor = RequestExecutor::builder().build().await?;
    let before = executor.cache().len().await;
    executor.cache().clear().await?;
    println!("removed {before} cached responses");
    Ok(())
}
