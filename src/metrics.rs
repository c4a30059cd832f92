use anyhow::Result;
use lazy_static::lazy_static;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};
use std::thread;
use tracing::{error, info};

fn counter(name: &str, help: &str) -> IntCounter {
    let c = IntCounter::new(name, help).expect("valid counter definition");
    let _ = REGISTRY.register(Box::new(c.clone()));
    c
}

fn gauge(name: &str, help: &str) -> IntGauge {
    let g = IntGauge::new(name, help).expect("valid gauge definition");
    let _ = REGISTRY.register(Box::new(g.clone()));
    g
}

// Prefix metrics with `tessera_` for namespacing.
lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref MINING_ATTEMPTS: IntCounter = counter("tessera_mining_attempts_total", "Hash attempts made by the miner");
    pub static ref MINING_FOUND: IntCounter = counter("tessera_mining_blocks_found_total", "Blocks solved by the local miner");
    pub static ref MINING_SOLVE_TIME_MS: Histogram = {
        let h = Histogram::with_opts(HistogramOpts::new("tessera_mining_solve_ms", "Wall time to solve a block template"))
            .expect("valid histogram definition");
        let _ = REGISTRY.register(Box::new(h.clone()));
        h
    };
    pub static ref BLOCKS_APPENDED: IntCounter = counter("tessera_blocks_appended_total", "Blocks appended to the chain");
    pub static ref BLOCKS_REJECTED: IntCounter = counter("tessera_blocks_rejected_total", "Blocks refused by validation");
    pub static ref TX_ADMITTED: IntCounter = counter("tessera_tx_admitted_total", "Transactions accepted into the pool");
    pub static ref TX_REJECTED: IntCounter = counter("tessera_tx_rejected_total", "Transactions refused at admission");
    pub static ref CHAIN_HEIGHT: IntGauge = gauge("tessera_chain_height", "Index of the chain tip");
    pub static ref DIFFICULTY: IntGauge = gauge("tessera_difficulty", "Difficulty required of the next block");
    pub static ref BRIDGE_INITIATED: IntCounter = counter("tessera_bridge_initiated_total", "Bridge transfers initiated");
    pub static ref BRIDGE_COMPLETED: IntCounter = counter("tessera_bridge_completed_total", "Bridge transfers completed");
    pub static ref BRIDGE_FAILED: IntCounter = counter("tessera_bridge_failed_total", "Bridge transfers failed");
    pub static ref BRIDGE_VERIFY_OK: IntCounter = counter("tessera_bridge_signatures_ok_total", "Validator signatures accepted");
    pub static ref BRIDGE_VERIFY_FAIL: IntCounter = counter("tessera_bridge_signatures_failed_total", "Validator signatures rejected");
    pub static ref BRIDGE_REPLAY_ATTEMPTS: IntCounter = counter("tessera_bridge_replay_attempts_total", "Source transactions claimed twice");
    pub static ref BRIDGE_RPC_ERRORS: IntCounter = counter("tessera_bridge_rpc_errors_total", "Chain RPC calls that failed");
    pub static ref BRIDGE_STALLED: IntGauge = gauge("tessera_bridge_stalled", "Transfers currently past the stall timeout");
}

/// Render every registered metric in the text exposition format.
pub fn render() -> Result<Vec<u8>> {
    let mut buffer = vec![];
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(buffer)
}

pub fn serve(cfg: crate::config::Metrics) -> Result<()> {
    // Touch the statics so the endpoint lists every series from the start.
    lazy_static::initialize(&MINING_ATTEMPTS);
    lazy_static::initialize(&MINING_FOUND);
    lazy_static::initialize(&MINING_SOLVE_TIME_MS);
    lazy_static::initialize(&BLOCKS_APPENDED);
    lazy_static::initialize(&BLOCKS_REJECTED);
    lazy_static::initialize(&TX_ADMITTED);
    lazy_static::initialize(&TX_REJECTED);
    lazy_static::initialize(&CHAIN_HEIGHT);
    lazy_static::initialize(&DIFFICULTY);
    lazy_static::initialize(&BRIDGE_INITIATED);
    lazy_static::initialize(&BRIDGE_COMPLETED);
    lazy_static::initialize(&BRIDGE_FAILED);
    lazy_static::initialize(&BRIDGE_VERIFY_OK);
    lazy_static::initialize(&BRIDGE_VERIFY_FAIL);
    lazy_static::initialize(&BRIDGE_REPLAY_ATTEMPTS);
    lazy_static::initialize(&BRIDGE_RPC_ERRORS);
    lazy_static::initialize(&BRIDGE_STALLED);

    let bind_addr = cfg.bind.clone();
    let server = tiny_http::Server::http(&bind_addr)
        .map_err(|e| anyhow::anyhow!("could not start metrics server on {}: {}", bind_addr, e))?;
    info!(bind = %bind_addr, "metrics endpoint listening");

    thread::Builder::new().name("metrics".into()).spawn(move || {
        let header = tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"text/plain; version=0.0.4"[..]).ok();
        for request in server.incoming_requests() {
            let buffer = match render() {
                Ok(b) => b,
                Err(e) => {
                    error!("could not encode metrics: {}", e);
                    continue;
                }
            };
            let mut response = tiny_http::Response::from_data(buffer);
            if let Some(h) = header.clone() {
                response = response.with_header(h);
            }
            let _ = request.respond(response);
        }
    })?;

    Ok(())
}
