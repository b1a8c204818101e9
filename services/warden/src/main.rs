mod daemon;
mod listener;
mod session;

use clap::{App, Arg};
use masque::config::{ChangeMask, Config};
use masque::logging;
use masque::net::{Acceptor, RebindHandle};
use masque::pool::{WorkerPool, WouldBlock};
use signal_hook::consts::SIGHUP;
use signal_hook::iterator::Signals;
use std::env;
use std::net::Ipv4Addr;
use std::path::Path;
use std::process;
use std::sync::Arc;
use std::thread;

const CONFIG_PATH: &str = "server.conf";
const LOG_PATH: &str = "./server.log";
const POOL_NAME: &str = "clients";

fn main() {
    let matches = App::new("Masque file-encryption server")
        .version("0.1.0")
        .about("Serves directory listings and parallel XOR file encryption over TCP.")
        .arg(
            Arg::with_name("address")
                .short("a")
                .takes_value(true)
                .help("The server's IP address. Default is localhost"),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .takes_value(true)
                .help("The server's port. Default is 8888"),
        )
        .arg(
            Arg::with_name("local")
                .short("L")
                .help("Listen on localhost, overriding the configuration file"),
        )
        .arg(
            Arg::with_name("root")
                .short("c")
                .takes_value(true)
                .help("Set the server's root directory"),
        )
        .arg(
            Arg::with_name("clients")
                .short("u")
                .takes_value(true)
                .help("Set the maximum number of concurrent clients"),
        )
        .arg(
            Arg::with_name("interactive")
                .short("I")
                .help("Do not daemonize (no effect on Windows)"),
        )
        .get_matches();

    // Daemonize first so every thread below lives in the detached process.
    let interactive = matches.is_present("interactive") || cfg!(not(unix));
    if !interactive {
        if let Err(err) = daemon::daemonize() {
            eprintln!("failed to daemonize: {}", err);
            process::exit(1);
        }
    }

    let log = if interactive {
        logging::init()
    } else {
        logging::file(LOG_PATH)
    };

    // Configuration file is the base; command line flags win over it.
    let mut config = match Config::load(CONFIG_PATH, &log) {
        Ok(config) => config,
        Err(err) => {
            logging::crit!(log, "could not load configuration"; "err" => ?err);
            process::exit(1);
        }
    };
    if let Err(message) = apply_cli(&mut config, &matches) {
        logging::crit!(log, "invalid command line value"; "err" => message);
        process::exit(1);
    }

    logging::info!(log, "starting";
                   "addr" => %config.socket_addr(),
                   "root" => %config.root_dir.display(),
                   "max_clients" => config.max_clients);

    // Apply the root directory; fall back to the working directory when the
    // configured one is unusable.
    if config.root_dir != Path::new(".") {
        if let Err(err) = env::set_current_dir(&config.root_dir) {
            logging::error!(log, "could not set root directory, staying put";
                            "root" => %config.root_dir.display(),
                            "err" => ?err);
            config.root_dir = ".".into();
        }
    }

    let pool = Arc::new(WorkerPool::new(POOL_NAME, config.max_clients, &log));

    let (acceptor, rebind) = match Acceptor::bind(config.socket_addr(), &log) {
        Ok(bound) => bound,
        Err(err) => {
            logging::crit!(log, "failed to create server socket"; "err" => ?err);
            process::exit(1);
        }
    };

    let listener_pool = pool.clone();
    let listener_log = log.new(logging::o!("thread" => "listener"));
    thread::Builder::new()
        .name("listener".to_string())
        .spawn(move || listener::listen(acceptor, listener_pool, listener_log))
        .unwrap_or_else(|err| {
            logging::crit!(log, "failed to spawn listener"; "err" => ?err);
            process::exit(1);
        });

    supervise(config, pool, rebind, log);
}

/// Reconfiguration supervisor: the main thread parks on the hang-up signal
/// and applies one full re-read / diff / apply pass per trigger.
fn supervise(
    mut active: Config,
    pool: Arc<WorkerPool>,
    rebind: RebindHandle,
    log: logging::Logger,
) -> ! {
    let mut signals =
        Signals::new(&[SIGHUP]).expect("failed to install reconfiguration trigger");

    loop {
        for _ in signals.wait() {
            logging::info!(log, "hang-up received, updating configuration");

            let fresh = match active.reload(CONFIG_PATH, &log) {
                Ok(fresh) => fresh,
                Err(err) => {
                    logging::error!(log, "failed to re-read configuration"; "err" => ?err);
                    continue;
                }
            };
            apply_reconfig(&mut active, fresh, &pool, &rebind, &log);
        }
    }
}

/// One apply pass over a freshly loaded configuration. A step that fails
/// reverts its field in memory and never brings the process down; fields
/// that did not change are not touched.
fn apply_reconfig(
    active: &mut Config,
    fresh: Config,
    pool: &WorkerPool,
    rebind: &RebindHandle,
    log: &logging::Logger,
) {
    let mask: ChangeMask = active.diff(&fresh);

    if mask.address || mask.port {
        let addr = fresh.socket_addr();
        match rebind.rebind(addr) {
            Ok(()) => {
                logging::info!(log, "changing server address"; "addr" => %addr);
                active.address = fresh.address;
                active.port = fresh.port;
            }
            Err(err) => {
                logging::error!(log, "rebind request failed, reverting"; "err" => ?err);
            }
        }
    }

    if mask.max_clients {
        logging::info!(log, "changing client count";
                       "from" => pool.size(),
                       "to" => fresh.max_clients);
        match pool.resize(fresh.max_clients) {
            Ok(()) => active.max_clients = fresh.max_clients,
            Err(WouldBlock) => {
                logging::warn!(log, "cannot resize client pool now, try again";
                               "busy" => pool.size() - pool.idle());
                active.max_clients = pool.size();
            }
        }
    }

    if mask.root_dir {
        match env::set_current_dir(&fresh.root_dir) {
            Ok(()) => {
                logging::info!(log, "root directory changed";
                               "root" => %fresh.root_dir.display());
                active.root_dir = fresh.root_dir.clone();
            }
            Err(err) => {
                logging::error!(log, "could not set root directory, reverting";
                                "root" => %fresh.root_dir.display(),
                                "err" => ?err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use masque::net::Acceptor;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_resize_refusal_reverts_client_cap() {
        let (_acceptor, rebind) =
            Acceptor::bind(([127, 0, 0, 1], 0).into(), None).unwrap();
        let pool = WorkerPool::new("clients", 2, None);
        let log = logging::discard();

        // Occupy both workers so a shrink below two must be refused.
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let gate_rx = Arc::new(std::sync::Mutex::new(gate_rx));
        let (started_tx, started_rx) = mpsc::channel();
        for _ in 0..2 {
            let gate = gate_rx.clone();
            let started = started_tx.clone();
            pool.submit(
                Box::new(move || {
                    started.send(()).unwrap();
                    gate.lock().unwrap().recv().ok();
                    0
                }),
                true,
            )
            .unwrap_or_else(|_| panic!("blocking submit refused"));
        }
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let mut active = Config::default();
        active.max_clients = 2;
        let mut fresh = active.clone();
        fresh.max_clients = 1;

        apply_reconfig(&mut active, fresh, &pool, &rebind, &log);

        // The shrink was refused: pool untouched, in-memory value reverted
        // to the pool's actual size.
        assert_eq!(pool.size(), 2);
        assert_eq!(active.max_clients, 2);

        // Both encryptions (stand-ins) run to completion afterwards.
        gate_tx.send(()).unwrap();
        gate_tx.send(()).unwrap();
        pool.shutdown(true).ok();
    }

    #[test]
    fn test_unchanged_fields_left_alone() {
        let (_acceptor, rebind) =
            Acceptor::bind(([127, 0, 0, 1], 0).into(), None).unwrap();
        let pool = WorkerPool::new("clients", 2, None);
        let log = logging::discard();

        let mut active = Config::default();
        active.max_clients = 2;
        let fresh = active.clone();

        apply_reconfig(&mut active, fresh, &pool, &rebind, &log);
        assert_eq!(active, {
            let mut expected = Config::default();
            expected.max_clients = 2;
            expected
        });
        assert_eq!(pool.size(), 2);
        pool.shutdown(true).ok();
    }

    #[test]
    fn test_grow_applies_and_sticks() {
        let (_acceptor, rebind) =
            Acceptor::bind(([127, 0, 0, 1], 0).into(), None).unwrap();
        let pool = WorkerPool::new("clients", 2, None);
        let log = logging::discard();

        let mut active = Config::default();
        active.max_clients = 2;
        let mut fresh = active.clone();
        fresh.max_clients = 5;

        apply_reconfig(&mut active, fresh, &pool, &rebind, &log);
        assert_eq!(pool.size(), 5);
        assert_eq!(active.max_clients, 5);
        pool.shutdown(true).ok();
    }
}

/// Command line flags override the file-loaded configuration. `-L` forces
/// localhost regardless of both.
fn apply_cli(config: &mut Config, matches: &clap::ArgMatches) -> Result<(), String> {
    if let Some(address) = matches.value_of("address") {
        config.address = address
            .parse()
            .map_err(|_| format!("bad address: {}", address))?;
    }
    if let Some(port) = matches.value_of("port") {
        config.port = match port.parse::<u16>() {
            Ok(port) if port > 0 => port,
            _ => return Err(format!("bad port: {}", port)),
        };
    }
    if matches.is_present("local") {
        config.address = Ipv4Addr::LOCALHOST;
    }
    if let Some(root) = matches.value_of("root") {
        config.root_dir = root.into();
    }
    if let Some(clients) = matches.value_of("clients") {
        config.max_clients = match clients.parse::<usize>() {
            Ok(count) if count > 0 => count,
            _ => return Err(format!("bad client count: {}", clients)),
        };
    }
    Ok(())
}
