//! Drone Traffic Simulator CLI
//!
//! Loads points of interest and per-drone waypoint files, runs the fleet
//! against the simulated clock and logs a summary.

use anyhow::{Context, Result};
use chrono::NaiveTime;
use clap::Parser;
use drone_domain::DroneId;
use drone_traffic::{ConfigError, Dispatcher, SimConfig, config, loader};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "drone-traffic")]
#[command(about = "Simulate drones reporting traffic around points of interest")]
struct Args {
    /// Directory holding the input files
    #[arg(short, long, default_value = ".")]
    data_dir: PathBuf,

    /// Points of interest file, relative to the data directory
    #[arg(long, default_value = "tube.csv")]
    poi_file: PathBuf,

    /// Drone ids; each reads `<id>.csv` from the data directory
    #[arg(short = 'i', long, value_delimiter = ',', default_value = "5937,6043")]
    drones: Vec<u32>,

    /// Simulated start time (HH:MM:SS)
    #[arg(long, value_parser = parse_time)]
    start: Option<NaiveTime>,

    /// Simulated end time (HH:MM:SS)
    #[arg(long, value_parser = parse_time)]
    end: Option<NaiveTime>,

    /// Real milliseconds per simulated second
    #[arg(long)]
    sample_interval_ms: Option<u64>,

    /// Drone control loop period in milliseconds
    #[arg(long)]
    agent_tick_ms: Option<u64>,

    /// Report radius in meters
    #[arg(long)]
    radius_m: Option<f64>,

    /// Per-tick crash probability
    #[arg(long)]
    crash_rate: Option<f64>,

    /// RNG seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// Print the final summary as JSON on stdout
    #[arg(long)]
    summary_json: bool,
}

impl Args {
    fn config(&self) -> Result<SimConfig> {
        let mut config = SimConfig::from_env()?;
        if let Some(start) = self.start {
            config.start_time = start;
        }
        if let Some(end) = self.end {
            config.end_time = end;
        }
        if let Some(ms) = self.sample_interval_ms {
            config.sample_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = self.agent_tick_ms {
            config.agent_tick = Duration::from_millis(ms);
        }
        if let Some(radius) = self.radius_m {
            config.report_radius_m = radius;
        }
        if let Some(rate) = self.crash_rate {
            config.crash_rate = rate;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        config.validate()?;
        Ok(config)
    }
}

fn parse_time(value: &str) -> Result<NaiveTime, ConfigError> {
    config::parse_time("time", value)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("drone_traffic=info".parse()?))
        .init();

    let args = Args::parse();
    let config = args.config()?;

    let poi_path = args.data_dir.join(&args.poi_file);
    let points = loader::load_points_of_interest(&poi_path)
        .with_context(|| format!("loading points of interest from {}", poi_path.display()))?;
    let ids: Vec<DroneId> = args.drones.iter().copied().map(DroneId).collect();
    let routes = loader::load_routes(&args.data_dir, &ids).context("loading drone routes")?;

    info!(
        "Starting simulation: {} drones, {} points of interest, {} -> {}",
        routes.len(),
        points.len(),
        config.start_time,
        config.end_time
    );

    let summary = Dispatcher::new(routes, points, config)?
        .run_to_completion()
        .await?;

    info!(
        "Simulation finished at {} ({:?}), {} traffic reports",
        summary.stopped_at,
        summary.stop_reason,
        summary.reports.len()
    );
    for agent in &summary.agents {
        info!(
            "  drone {} - {:?} after {} legs at {}",
            agent.drone_id, agent.outcome, agent.legs_completed, agent.final_position
        );
    }

    if args.summary_json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    Ok(())
}
