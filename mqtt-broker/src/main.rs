mod broker;
mod config;
mod error;
mod handler;
mod init;
mod logger;
mod oracle;
mod reactor;
mod session;

use std::{net::{SocketAddr, TcpListener}, path::Path, time::Duration};

use broker::Broker;
use config::BrokerConfig;
use init::BrokerEnv;

/// Pause before rebinding after a fatal reactor error (§4.7), so a
/// persistently broken listen socket doesn't spin the process.
const RESTART_BACKOFF: Duration = Duration::from_secs(1);

fn main() {
    let config_path = Path::new("config.toml");
    let env = BrokerEnv::new(config_path).init_env();
    let config = env.config();

    if !config.enabled() {
        log::info!("INHIBIT: connection.enabled = false, not binding a listener.");
        return;
    }

    let port = config.port();
    let addr = format!("0.0.0.0:{port}");

    // outer process-level loop: a fatal reactor error resets all sessions,
    // the pending queue, and the retained store, then restarts (§4.7/§7).
    loop {
        let config = match BrokerConfig::try_from(config_path) {
            Ok(config) => config,
            Err(err) => {
                log::error!("could not reload {}: {err}", config_path.display());
                std::thread::sleep(RESTART_BACKOFF);
                continue;
            }
        };

        if !oracle::network_available() {
            log::error!("network availability oracle reports DOWN, not binding {addr}");
            std::thread::sleep(RESTART_BACKOFF);
            continue;
        }

        let listener = match TcpListener::bind(&addr) {
            Ok(listener) => listener,
            Err(err) => {
                log::error!("failed to bind {addr}: {err}");
                std::thread::sleep(RESTART_BACKOFF);
                continue;
            }
        };

        log::info!("listening on {addr}");

        let mut broker = Broker::new(config);

        if let Ok(SocketAddr::V4(bound)) = listener.local_addr() {
            broker.set_bound_address(*bound.ip());
        }

        match reactor::run(&mut broker, &listener) {
            Ok(()) => return,
            Err(err) => {
                log::error!("reactor stopped with a fatal error: {err}, restarting");
                std::thread::sleep(RESTART_BACKOFF);
            }
        }
    }
}
