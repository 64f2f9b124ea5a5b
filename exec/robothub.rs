// Copyright 2025 HEM Sp. z o.o.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use log::{error, info, LevelFilter};
use robothub::config::HubConfig;
use robothub::run_robothub;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn to_level_filter(self) -> LevelFilter {
        match self {
            LogLevel::Trace => LevelFilter::Trace,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Error => LevelFilter::Error,
        }
    }
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Set the log level, RUST_LOG takes precedence
    #[arg(short, long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    /// Directory for the command, feedback and state info logs
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Do not write event logs
    #[arg(long)]
    no_event_log: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(cli.log_level.to_level_filter())
        .parse_default_env()
        .init();

    let mut config = match &cli.config {
        Some(path) => HubConfig::load(path)?,
        None => HubConfig::default(),
    };
    if let Some(log_dir) = cli.log_dir {
        config.log_dir = log_dir;
    }
    if cli.no_event_log {
        config.event_log = false;
    }

    let hub = match run_robothub(&config).await {
        Ok(hub) => hub,
        Err(e) if e.is_address_in_use() => {
            error!("{}: address in use, is another robothub instance running?", e);
            return Err(e.into());
        }
        Err(e) => {
            error!("Failed to start robothub: {}", e);
            return Err(e.into());
        }
    };

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C signal")?;
    info!("Received Ctrl+C signal, exiting...");
    hub.shutdown().await?;
    Ok(())
}
