use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tally_hlc::{ManualClock, NodeId, WallClock};
use tally_merkle::Hash;
use tally_store::{CellAddress, MemoryPersistence, Replica, ReplicaConfigBuilder};
use tally_sync::{MemoryTransport, Reconciler, Result, SyncConfigBuilder, SyncServer};
use tracing::{info, warn};

const START_MILLIS: i64 = 1_700_000_000_000;
const ROWS: usize = 16;
const COLUMNS: [&str; 3] = ["amount", "category", "note"];

/// Statistics collected during a simulation run
#[derive(Clone, Debug)]
pub struct SimulationStats {
    pub num_clients: usize,
    pub edits_per_client: usize,
    pub cycles: usize,
    pub rounds: usize,
    pub messages_sent: usize,
    pub messages_received: usize,
    pub total_time: Duration,
    pub avg_cycle_time: Duration,
    pub converged: bool,
    /// Hub root hash after the last pass.
    pub merkle: Hash,
}

impl SimulationStats {
    pub fn print(&self) {
        println!("\n╔════════════════════════════════════════════════════════════╗");
        println!("║              Simulation Statistics                         ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║  Clients:                   {:>30} ║", self.num_clients);
        println!("║  Edits per Client:          {:>30} ║", self.edits_per_client);
        println!("║  Sync Cycles:               {:>30} ║", self.cycles);
        println!("║  Transfer Rounds:           {:>30} ║", self.rounds);
        println!("║  Messages Pushed:           {:>30} ║", self.messages_sent);
        println!("║  Messages Pulled:           {:>30} ║", self.messages_received);
        println!("║  Total Time:                {:>29}s ║", format!("{:.3}", self.total_time.as_secs_f64()));
        println!("║  Average Cycle Time:        {:>28}µs ║", self.avg_cycle_time.as_micros());
        println!("║  Converged:                 {:>30} ║", self.converged);
        println!("║  Hub Root:                  {:>30} ║", self.merkle.short());
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

fn open_replica(wall: Arc<dyn WallClock>, prune_keep: Option<usize>) -> Result<Arc<Replica>> {
    let config = ReplicaConfigBuilder::new()
        .node_id(NodeId::random())
        .prune_keep(prune_keep)
        .build();
    Ok(Arc::new(Replica::open(MemoryPersistence::new(), wall, config)?))
}

/// Random offline edits on one client, spread over several hours.
fn edit_offline(replica: &Replica, wall: &ManualClock, rng: &mut StdRng, edits: usize) -> Result<()> {
    for _ in 0..edits {
        wall.advance(rng.gen_range(0..90_000));
        let address = CellAddress::new(
            "budget",
            format!("row-{}", rng.gen_range(0..ROWS)),
            COLUMNS[rng.gen_range(0..COLUMNS.len())],
        );
        if rng.gen_bool(0.1) {
            replica.edit(address, None::<f64>)?;
        } else {
            replica.edit(address, rng.gen_range(-5_000i64..5_000))?;
        }
    }
    Ok(())
}

/// Clients edit offline, then reconcile concurrently through a shared hub.
///
/// Two passes are run: the first carries every client's edits to the hub,
/// the second brings every client up to date with the hub.
pub async fn simulate_hub(num_clients: usize, edits_per_client: usize, seed: u64) -> Result<SimulationStats> {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║        Hub Reconciliation Simulation                       ║");
    println!("║  Clients: {} | Edits/Client: {} | Seed: {}", num_clients, edits_per_client, seed);
    println!("╚════════════════════════════════════════════════════════════╝");

    let start = Instant::now();
    let mut rng = StdRng::seed_from_u64(seed);
    let wall = Arc::new(ManualClock::new(START_MILLIS));

    let hub = open_replica(wall.clone(), Some(2))?;
    let server = Arc::new(SyncServer::new(Arc::clone(&hub)));

    println!("\n[Phase 1/2] Editing offline...");

    let mut clients = Vec::with_capacity(num_clients);
    for idx in 0..num_clients {
        // Mix pruned and unpruned tries.
        let prune_keep = match idx % 3 {
            0 => Some(2),
            1 => Some(1),
            _ => None,
        };
        let client = open_replica(wall.clone(), prune_keep)?;
        edit_offline(&client, &wall, &mut rng, edits_per_client)?;
        clients.push(client);
    }

    println!("[Phase 1/2] ✓ Completed");
    println!("[Phase 2/2] Reconciling through the hub...");

    let sync_config = SyncConfigBuilder::new().page_size(64).build();
    let mut reconcilers: Vec<_> = clients
        .iter()
        .map(|client| {
            Reconciler::with_config(
                Arc::clone(client),
                MemoryTransport::connect(Arc::clone(&server)),
                sync_config.clone(),
            )
        })
        .collect();

    let mut stats = SimulationStats {
        num_clients,
        edits_per_client,
        cycles: 0,
        rounds: 0,
        messages_sent: 0,
        messages_received: 0,
        total_time: Duration::ZERO,
        avg_cycle_time: Duration::ZERO,
        converged: false,
        merkle: Hash::zero(),
    };
    let mut cycle_times = Vec::new();

    for pass in 1..=2 {
        let pass_start = Instant::now();
        let reports = join_all(reconcilers.iter_mut().map(|r| r.run_cycle())).await;
        let elapsed = pass_start.elapsed();

        for report in reports {
            let report = report?;
            stats.cycles += 1;
            stats.rounds += report.rounds;
            stats.messages_sent += report.sent;
            stats.messages_received += report.received;
            cycle_times.push(elapsed / num_clients.max(1) as u32);
        }
        info!(pass, hub_messages = hub.len(), "pass complete");
    }

    stats.merkle = hub.merkle().hash();
    stats.converged = clients.iter().all(|client| {
        let agrees = client.cells() == hub.cells() && client.merkle().hash() == stats.merkle;
        if !agrees {
            warn!(node = %client.node(), "client did not converge");
        }
        agrees
    });

    stats.total_time = start.elapsed();
    if !cycle_times.is_empty() {
        stats.avg_cycle_time = cycle_times.iter().sum::<Duration>() / cycle_times.len() as u32;
    }

    println!("[Phase 2/2] ✓ Completed");
    Ok(stats)
}

/// Hub simulations at growing client counts.
pub async fn simulate_scaling(max_clients: usize, step_size: usize) -> Result<()> {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║      Scaling Analysis - Reconciliation vs Clients          ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    let mut current = step_size;
    while current <= max_clients {
        let stats = simulate_hub(current, 50, current as u64).await?;
        stats.print();
        current += step_size;
    }
    Ok(())
}
