//! Daemon entry point: load configuration, install logging, run the
//! reactor until a termination signal arrives.

use std::path::PathBuf;

use clap::Parser;
use xbee868_monitor::config::Config;
use xbee868_monitor::supervisor::Supervisor;

/// Decode XBee 868 telemetry and serve it over a local IPC socket.
#[derive(Parser, Debug)]
struct Args {
    /// Enable verbose (debug-level) logging.
    #[arg(long)]
    debug: bool,

    /// Path to the TOML configuration file.
    #[arg(long, default_value = "/etc/xbee-868-monitor.conf")]
    config: PathBuf,

    /// Path to the IPC socket to bind.
    #[arg(long, default_value = "/var/run/xbee-868/monitor.socket")]
    socket: PathBuf,
}

fn main() {
    let args = Args::parse();
    xbee868_monitor::logging::init(args.debug);

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, path = %args.config.display(), "failed to load configuration");
            std::process::exit(1);
        }
    };

    let supervisor = match Supervisor::start(config, args.socket) {
        Ok(supervisor) => supervisor,
        Err(err) => {
            tracing::error!(error = %err, "failed to start supervisor");
            std::process::exit(1);
        }
    };

    supervisor.run();
}
