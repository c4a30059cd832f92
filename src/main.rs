use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

use tessera::{
    config, crypto, logging, metrics, miner, storage,
    coordinator::BridgeCoordinator,
    harness::{Harness, HarnessConfig},
    ledger::Ledger,
    rpc::{ChainRpc, LedgerRpc, SimulatedChain},
    storage::{MemoryStore, RecordStore},
    validator::{LocalValidator, ValidatorNode, ValidatorRegistry},
    Dilithium3, Keypair, Miner, SignatureScheme,
};

#[derive(Parser)]
#[command(author, version, about = "tessera node: PoW ledger with a validator-attested bridge")]
struct Cli {
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    cmd: Option<Cmd>,
}

#[derive(Subcommand)]
enum Cmd {
    /// Mine blocks into the local chain and exit
    Mine {
        #[arg(long, default_value_t = 1)]
        blocks: u64,
    },
    /// Re-validate the stored chain from genesis
    Verify,
    /// Print the confirmed balance of a hex address
    Balance { address: String },
    /// Run the adversarial bridge harness against simulated chains
    Harness {
        #[arg(long, default_value_t = 3)]
        qubits: u32,
        #[arg(long, default_value_t = 4)]
        iterations: usize,
        #[arg(long, default_value_t = 7)]
        seed: u64,
    },
    /// Mine (if enabled) and run the bridge monitor until Ctrl+C
    Run,
}

fn load_config(path: &str) -> anyhow::Result<config::Config> {
    if !std::path::Path::new(path).exists() {
        eprintln!("⚠️  No config at '{path}', using built-in defaults");
        return Ok(config::Config::default());
    }
    config::load(path)
}

fn reward_address(cfg: &config::Mining) -> anyhow::Result<crypto::Address> {
    match &cfg.reward_address {
        Some(hex_addr) => crypto::parse_address(hex_addr),
        None => {
            let kp = Keypair::generate();
            warn!(address = %hex::encode(kp.address()), "no reward address configured, paying a throwaway key");
            Ok(kp.address())
        }
    }
}

fn open_ledger(cfg: &config::Config, store: Arc<dyn RecordStore>) -> anyhow::Result<Arc<Ledger>> {
    let scheme: Arc<dyn SignatureScheme> = Arc::new(Dilithium3);
    Ok(Arc::new(Ledger::open(cfg.ledger.clone(), scheme, store)?))
}

/// Register `count` in-process validators so the configured threshold can be met.
fn local_validators(
    registry: &ValidatorRegistry,
    token: &str,
    network: &str,
    count: usize,
) -> anyhow::Result<Vec<Arc<dyn ValidatorNode>>> {
    let scheme: Arc<dyn SignatureScheme> = Arc::new(Dilithium3);
    let mut nodes: Vec<Arc<dyn ValidatorNode>> = Vec::with_capacity(count);
    for i in 0..count {
        let id = format!("local-{i}");
        let node = LocalValidator::new(&id, scheme.clone());
        if registry.get(&id).is_some() {
            registry.remove_validator(token, &id)?;
        }
        registry.add_validator(token, &id, node.public_key(), network)?;
        nodes.push(Arc::new(node));
    }
    Ok(nodes)
}

async fn run_harness(cfg: config::Config, qubits: u32, iterations: usize, seed: u64) -> anyhow::Result<()> {
    let store = MemoryStore::shared();
    let token = cfg
        .bridge
        .admin_token
        .clone()
        .unwrap_or_else(|| hex::encode(rand::random::<[u8; 16]>()));
    let mut bridge_cfg = cfg.bridge.clone();
    bridge_cfg.admin_token = Some(token.clone());

    let source = SimulatedChain::shared(&bridge_cfg.source_network);
    let target = SimulatedChain::shared(&bridge_cfg.target_network);
    let registry = Arc::new(ValidatorRegistry::open(
        &bridge_cfg.bridge_id,
        Some(token.clone()),
        Arc::new(Dilithium3),
        store.clone(),
    )?);
    let nodes = local_validators(&registry, &token, &bridge_cfg.target_network, bridge_cfg.validator_threshold)?;
    let coordinator = Arc::new(
        BridgeCoordinator::open(&bridge_cfg, source.clone(), target, registry, store)?.with_validators(nodes),
    );

    let harness = Harness::new(
        coordinator.clone(),
        source,
        HarnessConfig {
            qubits,
            iterations,
            seed,
            min_amount: bridge_cfg.min_transfer_amount,
            max_amount: bridge_cfg.max_transfer_amount,
            admin_token: Some(token),
            ..HarnessConfig::default()
        },
    );
    let report = harness.run().await?;
    let status = coordinator.status().await?;

    println!("🧪 harness finished");
    println!("   transfers executed: {}", report.transfers_executed);
    println!("   pairs probed:       {}", report.pairs_probed);
    println!("   replay probes:      {}", report.replay_probes);
    println!("   completed/failed:   {}/{}", status.completed, status.failed);
    println!("   findings:           {}", report.findings.len());
    for f in &report.findings {
        println!("     [{:?}] {:?}: {} ({})", f.severity, f.kind, f.detail, f.transaction_ids.join(", "));
    }
    println!("   resistance score:   {:.3}", report.resistance_score);
    Ok(())
}

async fn run_node(cfg: config::Config) -> anyhow::Result<()> {
    let db = storage::open(&cfg.storage)?;
    let store: Arc<dyn RecordStore> = db.clone();
    let ledger = open_ledger(&cfg, store.clone())?;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut handles = Vec::new();

    if cfg.mining.enabled {
        let m = Arc::new(Miner::from_config(&cfg.mining));
        let to = reward_address(&cfg.mining)?;
        handles.push(miner::spawn(ledger.clone(), m, to, shutdown_tx.subscribe()));
    }

    let registry = Arc::new(ValidatorRegistry::open(
        &cfg.bridge.bridge_id,
        cfg.bridge.admin_token.clone(),
        Arc::new(Dilithium3),
        store.clone(),
    )?);
    // Local keys do not survive a restart, so the local set is re-registered.
    let nodes = match &cfg.bridge.admin_token {
        Some(token) => local_validators(&registry, token, &cfg.bridge.target_network, cfg.bridge.validator_threshold)?,
        None => {
            warn!("no admin token configured, validator membership is read-only");
            Vec::new()
        }
    };
    let source: Arc<dyn ChainRpc> = Arc::new(LedgerRpc::new(&cfg.bridge.source_network, ledger.clone()));
    let target: Arc<dyn ChainRpc> = SimulatedChain::shared(&cfg.bridge.target_network);
    let coordinator = Arc::new(
        BridgeCoordinator::open(&cfg.bridge, source, target, registry, store)?.with_validators(nodes),
    );
    handles.push(coordinator.clone().spawn_monitor(shutdown_tx.subscribe()));

    let metrics_bind = cfg.metrics.bind.clone();
    let metrics_enabled = cfg.metrics.enabled;
    if metrics_enabled {
        metrics::serve(cfg.metrics)?;
    }

    println!("\n🚀 tessera node is running!");
    println!("   ⛓️  Height: {} (difficulty {})", ledger.height(), ledger.difficulty());
    if metrics_enabled {
        println!("   📊 Metrics available on http://{metrics_bind}");
    }
    println!("   ⛏️  Mining: {}", if cfg.mining.enabled { "enabled" } else { "disabled" });
    println!("   🌉 Bridge: {} (config v{})", coordinator.bridge_id(), coordinator.config_version());
    println!("   Press Ctrl+C to stop");

    match signal::ctrl_c().await {
        Ok(()) => {
            println!("\n🛑 Shutdown signal received, cleaning up...");
            let _ = shutdown_tx.send(());
            for h in handles {
                if let Err(e) = h.await {
                    warn!("task ended abnormally: {}", e);
                }
            }
            if let Err(e) = ledger.flush() {
                eprintln!("Warning: database flush failed: {e}");
            } else {
                println!("✅ Database flushed");
            }
            println!("👋 tessera node stopped");
            Ok(())
        }
        Err(err) => {
            eprintln!("Error waiting for shutdown signal: {err}");
            Err(err.into())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;
    logging::init(&cfg.logging)?;

    match cli.cmd.unwrap_or(Cmd::Run) {
        Cmd::Mine { blocks } => {
            let db = storage::open(&cfg.storage)?;
            let ledger = open_ledger(&cfg, db)?;
            let m = Arc::new(Miner::from_config(&cfg.mining));
            let to = reward_address(&cfg.mining)?;
            for _ in 0..blocks {
                if let Some(block) = ledger.mine_block(&m, to).await? {
                    println!("⛏️  block {} {} (difficulty {})", block.index, hex::encode(block.hash), block.difficulty);
                }
            }
            ledger.flush()?;
            info!(height = ledger.height(), "mining finished");
            Ok(())
        }
        Cmd::Verify => {
            let db = storage::open(&cfg.storage)?;
            let ledger = open_ledger(&cfg, db)?;
            if ledger.is_chain_valid() {
                println!("✅ chain valid, {} blocks", ledger.len());
                Ok(())
            } else {
                Err(anyhow::anyhow!("chain failed validation"))
            }
        }
        Cmd::Balance { address } => {
            let addr = crypto::parse_address(&address)?;
            let db = storage::open(&cfg.storage)?;
            let ledger = open_ledger(&cfg, db)?;
            println!("💰 {}: {}", address, ledger.balance_of(&addr));
            Ok(())
        }
        Cmd::Harness { qubits, iterations, seed } => run_harness(cfg, qubits, iterations, seed).await,
        Cmd::Run => run_node(cfg).await,
    }
}
