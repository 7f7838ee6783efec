//! # Pipeline Benchmark Harness
//!
//! Purpose: Compare one-command-per-round-trip against pipelined batches on a
//! live RESP server, so the cost of network round trips stays visible.
//!
//! ## Design Principles
//! 1. **Same Workload Twice**: Both modes issue the same SET/GET sequence.
//! 2. **Allocation Control**: Keys and values are built before timing starts.
//! 3. **Machine-Readable Output**: The report is printed as one JSON document.
//!
//! Usage: `bench_pipeline [op_count] [batch_size] [value_size]`, with the
//! server taken from `HKV_ADDR` or a JSON client config at `HKV_CONFIG`.

use std::env;
use std::fs;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hkv_pipeline::{ClientConfig, ClientError, ErrorKind, KVClient};

const DEFAULT_OP_COUNT: usize = 100_000;
const DEFAULT_BATCH_SIZE: usize = 64;
const DEFAULT_VALUE_SIZE: usize = 128;
const KEY_SPACE: usize = 1 << 12;

struct BenchConfig {
    op_count: usize,
    batch_size: usize,
    value_size: usize,
}

impl BenchConfig {
    fn from_args() -> Self {
        let mut args = env::args().skip(1);
        BenchConfig {
            op_count: parse_usize(args.next(), DEFAULT_OP_COUNT),
            batch_size: parse_usize(args.next(), DEFAULT_BATCH_SIZE).max(1),
            value_size: parse_usize(args.next(), DEFAULT_VALUE_SIZE),
        }
    }
}

fn parse_usize(value: Option<String>, fallback: usize) -> usize {
    value.and_then(|raw| raw.parse().ok()).unwrap_or(fallback)
}

#[derive(Debug, Serialize)]
struct ModeReport {
    mode: &'static str,
    ops: usize,
    errors: usize,
    secs: f64,
    ops_per_sec: f64,
    micros_per_op: f64,
}

impl ModeReport {
    fn new(mode: &'static str, ops: usize, errors: usize, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        ModeReport {
            mode,
            ops,
            errors,
            secs,
            ops_per_sec: ops as f64 / secs,
            micros_per_op: secs * 1e6 / ops as f64,
        }
    }
}

#[derive(Debug, Serialize)]
struct Report {
    addr: String,
    batch_size: usize,
    value_size: usize,
    results: Vec<ModeReport>,
}

fn load_client_config() -> Result<ClientConfig> {
    let mut config = match env::var("HKV_CONFIG") {
        Ok(path) => {
            let raw = fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            ClientConfig::from_json(&raw).with_context(|| format!("parsing {path}"))?
        }
        Err(_) => ClientConfig::default(),
    };
    if let Ok(addr) = env::var("HKV_ADDR") {
        config.addr = addr;
    }
    if config.read_timeout.is_none() {
        config.read_timeout = Some(Duration::from_secs(5));
    }
    Ok(config)
}

fn build_keys(count: usize) -> Vec<Vec<u8>> {
    (0..count).map(|idx| format!("bench:{idx:05}").into_bytes()).collect()
}

/// Errors that mean the server is unreachable rather than one bad command.
fn is_fatal(err: &ClientError) -> bool {
    matches!(err.kind(), ErrorKind::Transport | ErrorKind::Acquisition)
}

fn run_sequential(client: &KVClient, keys: &[Vec<u8>], value: &[u8], ops: usize) -> Result<ModeReport> {
    let mut errors = 0;
    let start = Instant::now();
    for op in 0..ops {
        let key = &keys[op % keys.len()];
        let result = if op % 2 == 0 {
            client.set(key, value)
        } else {
            client.get(key).map(|_| ())
        };
        if let Err(err) = result {
            if is_fatal(&err) {
                bail!("sequential op {op} failed: {err}");
            }
            warn!(op, %err, "command failed");
            errors += 1;
        }
    }
    Ok(ModeReport::new("sequential", ops, errors, start.elapsed()))
}

fn run_pipelined(
    client: &KVClient,
    keys: &[Vec<u8>],
    value: &[u8],
    ops: usize,
    batch_size: usize,
) -> Result<ModeReport> {
    let mut pipe = client.pipeline();
    let mut errors = 0;
    let mut op = 0;
    let start = Instant::now();
    while op < ops {
        let end = (op + batch_size).min(ops);
        for idx in op..end {
            let key = &keys[idx % keys.len()];
            if idx % 2 == 0 {
                pipe.set(key, value)?;
            } else {
                pipe.get(key)?;
            }
        }
        let outcome = pipe.exec()?;
        if let Some(err) = outcome.error() {
            if is_fatal(err) {
                bail!("pipelined batch failed: {err}");
            }
            warn!(%err, "batch finished with command errors");
            errors += outcome.commands().iter().filter(|cmd| cmd.err().is_some()).count();
        }
        op = end;
    }
    pipe.close();
    Ok(ModeReport::new("pipelined", ops, errors, start.elapsed()))
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(err) = run() {
        eprintln!("bench_pipeline failed: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let bench = BenchConfig::from_args();
    let config = load_client_config()?;
    let addr = config.addr.clone();
    let client = KVClient::with_config(config).context("building client")?;

    client.ping(None).with_context(|| format!("pinging {addr}"))?;
    info!(%addr, ops = bench.op_count, batch = bench.batch_size, "starting benchmark");

    let keys = build_keys(KEY_SPACE);
    let value = vec![b'v'; bench.value_size];

    let sequential = run_sequential(&client, &keys, &value, bench.op_count)?;
    info!(ops_per_sec = sequential.ops_per_sec, "sequential done");
    let pipelined = run_pipelined(&client, &keys, &value, bench.op_count, bench.batch_size)?;
    info!(ops_per_sec = pipelined.ops_per_sec, "pipelined done");

    let report = Report {
        addr,
        batch_size: bench.batch_size,
        value_size: bench.value_size,
        results: vec![sequential, pipelined],
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
