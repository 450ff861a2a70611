// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! simbus testbed CLI
//!
//! Runs the controller, driver and physics services together with a
//! runtime driving closed-loop rollouts, all in one process.
//!
//! # Usage
//!
//! ```bash
//! # Built-in defaults
//! simbus-testbed run
//!
//! # Override the rollout size
//! simbus-testbed run --sessions 8 --steps 200
//!
//! # Using configuration file
//! simbus-testbed run --config testbed.toml
//!
//! # Generate and check a configuration file
//! simbus-testbed gen-config --output testbed.toml
//! simbus-testbed validate --config testbed.toml
//! ```

use clap::{Parser, Subcommand};
use simbus_services::config::SceneConfig;
use simbus_services::{RolloutReport, Testbed, TestbedConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// simbus vehicle-simulation testbed
#[derive(Parser, Debug)]
#[command(name = "simbus-testbed")]
#[command(about = "Run simulation services and rollouts over an in-process simbus domain")]
#[command(version)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the services and the configured rollouts
    Run {
        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Concurrent rollouts (overrides the config)
        #[arg(long)]
        sessions: Option<usize>,

        /// Steps per rollout (overrides the config)
        #[arg(long)]
        steps: Option<usize>,
    },

    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "testbed.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Run {
            config,
            sessions,
            steps,
        } => {
            let mut config = match config {
                Some(path) => TestbedConfig::from_file(path)?,
                None => TestbedConfig::default(),
            };
            if let Some(sessions) = sessions {
                config.rollout.sessions = sessions;
            }
            if let Some(steps) = steps {
                config.rollout.steps = steps;
            }
            init_logging(args.log_level.as_deref().unwrap_or(&config.log_level));
            cmd_run(config).await
        }
        Commands::GenConfig { output } => {
            init_logging(args.log_level.as_deref().unwrap_or("info"));
            cmd_gen_config(output)
        }
        Commands::Validate { config } => {
            init_logging(args.log_level.as_deref().unwrap_or("info"));
            cmd_validate(config)
        }
    }
}

async fn cmd_run(config: TestbedConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("simbus testbed v{}", env!("CARGO_PKG_VERSION"));
    println!("=====================================");
    println!(
        "Scene: {}, {} session(s) x {} step(s) of {} us",
        config.rollout.scene_id,
        config.rollout.sessions,
        config.rollout.steps,
        config.rollout.step_us
    );
    println!();

    let testbed = Testbed::new(config)?;
    let reports = testbed.run().await?;
    print_reports(&reports);

    let stats = testbed.driver().worker_stats();
    println!();
    println!(
        "Policy worker: {} batches, {} items (avg batch {:.2}), {} failed",
        stats.batches,
        stats.items,
        stats.average_batch_size(),
        stats.failed_batches
    );
    println!("Scene loads: {}", testbed.physics().scene_loads());
    Ok(())
}

fn print_reports(reports: &[RolloutReport]) {
    println!("--- Rollouts ---");
    for report in reports {
        let pose = &report.final_pose.pose;
        println!(
            "  {}: {} steps, {:.1} m, {} empty drives",
            report.session_uuid, report.steps, report.distance, report.empty_drives
        );
        println!(
            "      final ({:.2}, {:.2}, {:.2}) yaw {:.3}, {:.2} m/s",
            pose.vec.x,
            pose.vec.y,
            pose.vec.z,
            pose.yaw(),
            report.final_speed
        );
    }
}

fn cmd_gen_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = TestbedConfig {
        name: "example-testbed".into(),
        ..TestbedConfig::default()
    };
    config.physics.scenes.push(SceneConfig {
        id: "raised-plateau".into(),
        ground_height: 1.5,
    });

    let toml_str = toml::to_string_pretty(&config)?;
    let content = format!(
        r#"# simbus testbed configuration
# Generated by simbus-testbed gen-config

{}
"#,
        toml_str
    );

    std::fs::write(&output, content)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    match TestbedConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!("Testbed: {}", config.name);
            println!("Domain: {}", config.domain_id);
            println!("Cameras: {}", config.driver.use_cameras.join(", "));
            println!("Scenes:");
            for scene in &config.physics.scenes {
                println!("  {} (ground at {} m)", scene.id, scene.ground_height);
            }
            println!(
                "Rollout: {} session(s) x {} step(s) on {}",
                config.rollout.sessions, config.rollout.steps, config.rollout.scene_id
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}
