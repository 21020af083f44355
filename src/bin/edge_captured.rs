//! edge_captured - turntable capture daemon
//!
//! This daemon:
//! 1. Loads configuration (file named by EDGE_CAPTURE_CONFIG, then env)
//! 2. Prepares the jobs root
//! 3. Serves the capture command API until Ctrl-C

use anyhow::{Context, Result};
use std::sync::{mpsc, Arc};

use edge_capture::{
    api::{ApiConfig, ApiServer},
    pipeline_from_config, EdgeConfig,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = EdgeConfig::load()?;
    std::fs::create_dir_all(&cfg.jobs_root)
        .with_context(|| format!("create jobs root {}", cfg.jobs_root.display()))?;

    let pipeline = Arc::new(pipeline_from_config(&cfg));
    let api_config = ApiConfig {
        addr: cfg.api_addr.clone(),
        defaults: cfg.defaults,
    };
    let api_handle = ApiServer::new(api_config, pipeline).spawn()?;
    log::info!("edge-capture listening on {}", api_handle.addr);
    log::info!(
        "jobs root={} backends={:?} simulate={}",
        cfg.jobs_root.display(),
        cfg.capture.backends,
        cfg.capture.simulate
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("error setting Ctrl-C handler")?;

    log::info!("edge_captured waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;

    Ok(())
}
