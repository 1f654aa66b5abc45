use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use tracing::{info, warn};

use vitalwatch::data::duration::format_duration;
use vitalwatch::{logging, Dashboard, FeedServer, ProgressEngine, RiskLevel, Settings};

#[derive(Parser, Debug)]
#[command(name = "vitalwatch")]
#[command(about = "Live vital-sign telemetry client with a simulated feed", version)]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect to the vitals feed and log what the dashboard sees
    Monitor {
        /// Also run the progress simulation
        #[arg(long)]
        simulate: bool,
    },
    /// Run the simulated vitals feed
    Serve {
        /// Address to listen on (overrides serve.bind)
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Run one progress simulation to completion
    Simulate,
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose);

    let settings = Settings::load(args.config.as_deref())?;
    let rt = tokio::runtime::Runtime::new()?;

    match args.command {
        Command::Monitor { simulate } => rt.block_on(run_monitor(settings, simulate)),
        Command::Serve { bind } => rt.block_on(run_feed(settings, bind)),
        Command::Simulate => rt.block_on(run_simulation(settings)),
    }
}

/// Log samples, scores, connectivity and forecast changes until Ctrl-C
async fn run_monitor(settings: Settings, simulate: bool) -> Result<()> {
    let dashboard = Dashboard::connect(&settings)?;

    let mut connectivity = dashboard.watch_connectivity();
    let mut vitals = dashboard.watch_vitals();
    let mut stability = dashboard.watch_stability();
    let mut progress = dashboard.progress().subscribe();
    if simulate {
        dashboard.progress().start()?;
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut risk = RiskLevel::Moderate;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Interrupted, closing feed connection");
                break;
            }
            Ok(()) = connectivity.changed() => {
                let state = *connectivity.borrow_and_update();
                info!("Feed: {}", state);
            }
            Ok(()) = vitals.changed() => {
                let latest = vitals.borrow_and_update().clone();
                let Some(sample) = latest else { continue };
                info!(
                    heart_rate = sample.heart_rate,
                    bp = %sample.bp,
                    accuracy = ?sample.accuracy,
                    "Vitals"
                );

                let forecast = dashboard.forecast();
                if forecast.risk_level != risk {
                    risk = forecast.risk_level;
                    if forecast.is_alert() {
                        warn!(
                            spike_risk = forecast.spike_risk_pct,
                            "Forecast {}: {}",
                            risk.label(),
                            forecast.recommendation()
                        );
                    } else {
                        info!(
                            spike_risk = forecast.spike_risk_pct,
                            "Forecast {}: {}",
                            risk.label(),
                            forecast.recommendation()
                        );
                    }
                }
            }
            Ok(()) = stability.changed() => {
                let score = *stability.borrow_and_update();
                info!("Stability: {}", score);
            }
            Ok(()) = progress.changed(), if simulate => {
                let run = progress.borrow_and_update().clone();
                info!(progress = run.progress, "{}", run.log);
            }
        }
    }

    dashboard.close();
    dashboard.shutdown().await;
    Ok(())
}

async fn run_feed(settings: Settings, bind: Option<String>) -> Result<()> {
    let interval = settings.serve.interval()?;
    let addr = bind.unwrap_or(settings.serve.bind);
    info!(interval = %format_duration(interval), "Starting simulated vitals feed");

    tokio::select! {
        result = FeedServer::new(interval).bind_and_run(&addr) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping feed");
            Ok(())
        }
    }
}

async fn run_simulation(settings: Settings) -> Result<()> {
    let tick = settings.simulation.tick()?;
    let engine = ProgressEngine::with_settings(tick, settings.simulation.log_mapping);
    let mut progress = engine.subscribe();
    info!(
        tick = %format_duration(tick),
        mapping = ?engine.log_mapping(),
        "Starting progress simulation"
    );

    engine.start()?;
    while progress.changed().await.is_ok() {
        let run = progress.borrow_and_update().clone();
        println!("{:>3}%  {}", run.progress, run.log);
        if !run.running {
            break;
        }
    }
    Ok(())
}
