//! `fs_server`: the file server base layer on an in-memory filesystem,
//! driven by a loopback kernel.

mod env;
mod logging;
mod selfcheck;

use std::process::ExitCode;

use env::ServerConfig;

fn main() -> ExitCode {
    logger::init();
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("[main] bad configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(level) = config.log_level {
        logger::init_with_level(level);
    }
    log::info!(
        "[main] page cache: {}",
        config
            .cache
            .as_ref()
            .map_or("off".into(), |c| c.strategy.to_string())
    );

    match selfcheck::run(&config) {
        Ok(()) => {
            log::info!("[main] self-check passed");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("[main] self-check failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
