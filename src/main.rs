//! Station entry point
//!
//! Loads the station configuration (path from `XMCD_DAQ_CONFIG`, default
//! `config/xmcd_daq.toml`), demagnetizes the sample and runs one hysteresis
//! scan. Ctrl-C cancels the run at the next settle or scan point.

use anyhow::Result;
use tracing::{error, info, warn};
use xmcd_daq::config::DEFAULT_CONFIG_PATH;
use xmcd_daq::prelude::*;
use xmcd_daq::tracing_init;

/// Degauss steps before the scan
const DEGAUSS_CYCLES: usize = 50;

#[tokio::main]
async fn main() -> Result<()> {
    let path =
        std::env::var("XMCD_DAQ_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = StationConfig::load_validated(&path)?;
    tracing_init::init_from_config(&config)?;

    info!(station = %config.application.name, config = %path, "Starting");

    let station = StationDevices::from_config(&config)?;
    info!(?station, "Devices ready");

    let ctx = RunContext::default();
    let canceller = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            canceller.cancel();
        }
    });

    let trajectory = HysteresisSweep::new(config.scan.sweep_high, config.scan.sweep_low).build();
    let sequencer = station.sequencer(&config, ctx.clone())?;

    let outcome = async {
        demagnetize(station.magnet.as_ref(), SATURATION_CURRENT, DEGAUSS_CYCLES, &ctx).await?;
        sequencer.run(&trajectory).await
    }
    .await;

    match outcome {
        Ok(report) => {
            info!(
                points = report.points.len(),
                bracketed = report.bracketed_indices().len(),
                degraded = report.degraded_count(),
                final_exposure_s = report.final_exposure_s,
                "Scan complete"
            );
            Ok(())
        }
        Err(e) if e.is_abort() => {
            warn!(error = %e, "Run cancelled");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Run failed");
            Err(e.into())
        }
    }
}
