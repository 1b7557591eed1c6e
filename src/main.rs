use std::env;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use aevumdb::core::config::Config;
use aevumdb::server::server::Server;
use aevumdb::store::controller::Store;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Signal handlers only flip a flag; a watcher thread turns it into a stop.
extern "C" fn handle_signal(_signal: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

fn print_help(binary: &str) {
    println!("Usage: {} [DATA_PATH] [PORT]", binary);
    println!("Options:");
    println!("  DATA_PATH   Directory to store database files (Default: ./aevum_data)");
    println!("  PORT        TCP port to listen on (Default: 5555)");
    println!("  --help      Show this help message");
}

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.get(1).map_or(false, |arg| arg == "--help") {
        print_help(&args[0]);
        return;
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut config = Config::default();
    if let Some(path) = args.get(1) {
        config.data_dir = path.into();
    }
    if let Some(port) = args.get(2) {
        match port.parse() {
            Ok(port) => config.port = port,
            Err(_) => {
                error!(port = %port, "System: invalid port argument");
                process::exit(1);
            }
        }
    }
    if let Ok(key) = env::var("AEVUM_ROOT_KEY") {
        if !key.is_empty() {
            config.bootstrap_key = key;
        }
    }

    unsafe {
        libc::signal(libc::SIGINT, handle_signal as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handle_signal as libc::sighandler_t);
    }

    info!("System: booting AevumDB kernel");
    info!(path = %config.data_dir.display(), "Config: persistence path");
    info!(port = config.port, "Config: network interface");

    let store = match Store::open(&config) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "System: storage initialization failed");
            process::exit(1);
        }
    };

    let server = match Server::bind(store, config.port, config.worker_threads) {
        Ok(server) => Arc::new(server),
        Err(e) => {
            error!(error = %e, "System: failed to bind server socket");
            process::exit(1);
        }
    };

    let watcher = Arc::clone(&server);
    thread::spawn(move || loop {
        if SHUTDOWN.load(Ordering::SeqCst) {
            warn!("System: interrupt received, initiating graceful shutdown");
            watcher.stop();
            break;
        }
        thread::sleep(Duration::from_millis(200));
    });

    server.run();
    info!("System: shutdown complete");
}
