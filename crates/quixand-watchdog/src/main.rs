//! Detached per-sandbox reaper process, grounded in
//! `quixand/core/watchdog.py::main`. One process per sandbox: the Adapter
//! spawns this binary with a single `sandbox_id` argument and it polls the
//! State Store until the sandbox is reaped or its state entry vanishes.

use std::process::ExitCode;
use std::sync::Arc;

use quixand_core::adapter::DockerAdapter;
use quixand_core::config::Config;
use quixand_core::runtime;
use quixand_core::watchdog::Watchdog;

fn main() -> ExitCode {
    env_logger::init();

    let sandbox_id = match std::env::args().nth(1) {
        Some(id) => id,
        None => {
            eprintln!("usage: quixand-watchdog <sandbox_id>");
            return ExitCode::from(2);
        }
    };

    let runtime_rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build watchdog tokio runtime");

    runtime_rt.block_on(async move {
        let config = Config::from_env();
        let rt = match runtime::connect(&config.runtime).await {
            Ok(rt) => rt,
            Err(e) => {
                log::warn!("watchdog for {sandbox_id} could not connect to runtime: {e}, exiting");
                return ExitCode::SUCCESS;
            }
        };
        let adapter = Arc::new(DockerAdapter::new(rt, config));
        let watchdog = Watchdog::new(adapter, sandbox_id.clone());
        if let Err(e) = watchdog.run().await {
            log::warn!("watchdog for {sandbox_id} exited with error: {e}");
        }
        ExitCode::SUCCESS
    })
}
