mod scenario;

use clap::Parser;
use prometheus::TextEncoder;
use scenario::Scenario;
use serial_queue::{QueueConfig, SerialQueue};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "sq-demo")]
#[command(about = "Runs staggered async items through a serial queue", long_about = None)]
struct Args {
    /// Number of items to submit
    #[arg(short, long, default_value = "10")]
    items: u64,

    /// Item i sleeps base_delay_ms / i before finishing
    #[arg(short, long, default_value = "1000")]
    base_delay_ms: u64,

    /// Make item i return an error (repeatable)
    #[arg(long)]
    fail: Vec<u64>,

    /// Cancel item i right after submitting it (repeatable)
    #[arg(long)]
    cancel: Vec<u64>,

    /// Queue name (overrides the config file)
    #[arg(long)]
    name: Option<String>,

    /// Path to configuration file
    #[arg(long)]
    config: Option<String>,

    /// Print the queue's metrics in Prometheus text format when done
    #[arg(long)]
    metrics: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        QueueConfig::from_file(config_path)?
    } else {
        QueueConfig::default()
    };

    // Override with CLI args
    if let Some(name) = args.name {
        config.name = name;
    }

    let queue = SerialQueue::with_config(config);
    let scenario = Scenario {
        items: args.items,
        base_delay_ms: args.base_delay_ms,
        fail: args.fail.into_iter().collect(),
        cancel: args.cancel.into_iter().collect(),
    };

    tracing::info!(
        "Submitting {} items to queue '{}'",
        scenario.items,
        queue.name()
    );

    let report = scenario.run(&queue).await;
    let stats = queue.stats();

    println!("finished order: {:?}", report.finished);
    println!(
        "submitted={} completed={} failed={} cancelled={} panicked={}",
        stats.submitted, stats.completed, stats.failed, stats.cancelled, stats.panicked
    );

    if args.metrics {
        let encoder = TextEncoder::new();
        print!("{}", encoder.encode_to_string(&queue.metrics_registry().gather())?);
    }

    if !report.in_order() {
        anyhow::bail!("items finished out of submission order: {:?}", report.finished);
    }

    Ok(())
}
