use simulation::{simulate_hub, simulate_scaling};
use tracing_subscriber::EnvFilter;
pub mod simulation;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("failed to start runtime: {}", err);
            std::process::exit(1);
        }
    };
    if let Err(err) = rt.block_on(async_main()) {
        eprintln!("\n✗ Simulation failed: {}", err);
        std::process::exit(1);
    }
}

async fn async_main() -> tally_sync::Result<()> {
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            OFFLINE RECONCILIATION SIMULATIONS               ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    // Small hub
    let stats = simulate_hub(4, 100, 1).await?;
    stats.print();

    // Larger hub, more history per client
    let stats = simulate_hub(10, 500, 2).await?;
    stats.print();

    simulate_scaling(20, 5).await?;

    println!("\n✓ All simulations completed successfully!");
    Ok(())
}
