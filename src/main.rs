use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use futures::future::try_join_all;
use tokio::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

use armthrottle::config::ThrottleConfig;
use armthrottle::ratelimit::{read_cost, service_for, Operation};
use armthrottle::{Throttle, WaitContext};

#[derive(Debug, Parser)]
#[command(name = "armthrottle", version, about = "Inspect and exercise the ARM call throttle")]
struct Cli {
    /// YAML configuration file (ARMTHROTTLE__* environment variables override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the effective rate table
    Rates {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the service and read cost of resource types
    Classify {
        #[arg(required = true)]
        resource_types: Vec<String>,
    },
    /// Admit a batch of concurrent calls and report how long they took
    Simulate {
        #[arg(long)]
        resource_type: String,
        #[arg(long, default_value_t = 10)]
        count: usize,
        #[arg(long, default_value = "simulated-subscription")]
        scope: String,
        /// Simulate list calls instead of refreshes
        #[arg(long)]
        list: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = match &cli.config {
        Some(path) => ThrottleConfig::from_file(path)?,
        None => ThrottleConfig::default(),
    };

    match cli.command {
        Command::Rates { json } => print_rates(&config, json)?,
        Command::Classify { resource_types } => {
            for ty in resource_types {
                println!("{ty}\tservice={}\tread_cost={}", service_for(&ty), read_cost(&ty));
            }
        }
        Command::Simulate {
            resource_type,
            count,
            scope,
            list,
        } => simulate(&config, &resource_type, count, &scope, list).await?,
    }

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn print_rates(config: &ThrottleConfig, json: bool) -> anyhow::Result<()> {
    let table = config.rate_table()?;

    if json {
        let rows: Vec<_> = table
            .iter()
            .map(|(service, operation, rate)| {
                serde_json::json!({
                    "service": service,
                    "operation": operation,
                    "rate_per_second": rate.per_second,
                    "burst": rate.burst,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("{:<10}{:<8}{:>10}{:>8}", "SERVICE", "OP", "RATE/S", "BURST");
    for (service, operation, rate) in table.iter() {
        println!(
            "{:<10}{:<8}{:>10.2}{:>8}",
            service.as_str(),
            operation.as_str(),
            rate.per_second,
            rate.burst
        );
    }
    Ok(())
}

async fn simulate(
    config: &ThrottleConfig,
    resource_type: &str,
    count: usize,
    scope: &str,
    list: bool,
) -> anyhow::Result<()> {
    let throttle = Arc::new(Throttle::new(config)?);
    let operation = if list { Operation::List } else { Operation::Read };

    info!(
        resource_type = %resource_type,
        service = %service_for(resource_type),
        operation = %operation,
        count,
        "Starting simulation"
    );

    let start = Instant::now();
    let calls = (0..count).map(|_| {
        let throttle = Arc::clone(&throttle);
        async move {
            let ctx = WaitContext::new();
            if list {
                throttle.wait_for_resource_list(&ctx, scope, resource_type).await?;
            } else {
                throttle.wait_for_resource_refresh(&ctx, scope, resource_type).await?;
            }
            Ok::<_, armthrottle::ThrottleError>(start.elapsed())
        }
    });
    let mut admitted = try_join_all(calls).await?;
    admitted.sort();

    let total = start.elapsed();
    let last = admitted.last().copied().unwrap_or_default();
    println!(
        "admitted {count} {operation} calls for {resource_type} in {:.3}s (last admission at {:.3}s)",
        total.as_secs_f64(),
        last.as_secs_f64()
    );
    Ok(())
}
