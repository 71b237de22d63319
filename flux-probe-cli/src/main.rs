// Copyright 2025 The Drasi Authors.
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

use std::env;
use std::process;

use anyhow::Result;
use flux_probe::{Probe, ProbeConfig, PublishPlan};
use log::{error, info, warn};

#[tokio::main]
async fn main() {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Err(e) = run(|key| env::var(key).ok()).await {
        error!("{e:#}");
        process::exit(1);
    }
}

/// Plan named by `PROBE_PLAN`, or the stock flux readings when it is unset
/// or blank.
fn select_plan<F>(lookup: F) -> Result<PublishPlan>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup("PROBE_PLAN") {
        Some(path) if !path.trim().is_empty() => PublishPlan::from_file(path.trim()),
        _ => PublishPlan::flux_rules(),
    }
}

async fn run<F>(lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let config = ProbeConfig::from_lookup(&lookup)?;
    let plan = select_plan(&lookup)?;
    let probe = Probe::new(config, plan)?;

    info!("Connecting to {}...", probe.config().broker_addr());
    let report = probe.run().await?;

    if !report.failed.is_empty() {
        warn!("Failed to publish to: {}", report.failed.join(", "));
    }
    if !report.settled {
        warn!(
            "Delivery unconfirmed: {} of {} publishes sent, {} acknowledged",
            report.progress.sent,
            report.published.len(),
            report.progress.acknowledged
        );
    }
    info!("Test completed.");
    Ok(())
}
