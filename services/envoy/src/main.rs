mod repl;

use clap::{App, Arg};
use masque::config::ClientConfig;
use masque::logging;
use masque::net::Connection;
use masque::proto;
use repl::CommandQueue;
use std::net::Ipv4Addr;
use std::process;

const CONFIG_PATH: &str = "./client.conf";

fn main() {
    let matches = App::new("Masque file-encryption client")
        .version("0.1.0")
        .about("Talks to a masque server, interactively or in single-command mode.")
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
                .help("Connect to localhost, overriding the configuration file"),
        )
        .arg(
            Arg::with_name("list")
                .short("l")
                .help("Single command execution: non-recursive listing"),
        )
        .arg(
            Arg::with_name("listrec")
                .short("r")
                .help("Single command execution: recursive listing"),
        )
        .arg(
            Arg::with_name("encrypt")
                .short("e")
                .takes_value(true)
                .number_of_values(2)
                .value_names(&["PATH", "SEED"])
                .help("Single command execution: encrypt PATH with SEED"),
        )
        .arg(
            Arg::with_name("decrypt")
                .short("d")
                .takes_value(true)
                .number_of_values(2)
                .value_names(&["PATH", "SEED"])
                .help("Single command execution: decrypt PATH with SEED"),
        )
        .get_matches();

    let log = logging::init();

    let mut config = match ClientConfig::load(CONFIG_PATH, &log) {
        Ok(config) => config,
        Err(err) => {
            logging::crit!(log, "could not load configuration"; "err" => ?err);
            process::exit(1);
        }
    };
    if let Some(address) = matches.value_of("address") {
        config.address = match address.parse() {
            Ok(address) => address,
            Err(_) => {
                logging::crit!(log, "bad address"; "value" => address);
                process::exit(1);
            }
        };
    }
    if let Some(port) = matches.value_of("port") {
        config.port = match port.parse::<u16>() {
            Ok(port) if port > 0 => port,
            _ => {
                logging::crit!(log, "bad port"; "value" => port);
                process::exit(1);
            }
        };
    }
    if matches.is_present("local") {
        config.address = Ipv4Addr::LOCALHOST;
    }

    let addr = config.socket_addr();
    println!("Connecting to {}...", addr);

    let mut server = match Connection::connect(addr) {
        Ok(server) => server,
        Err(err) => {
            logging::crit!(log, "could not connect"; "addr" => %addr, "err" => ?err);
            process::exit(1);
        }
    };

    // The server opens the conversation; anything but the greeting means we
    // are not welcome.
    match server.receive() {
        Ok(ref greeting) if greeting.starts_with(proto::RESP_ACCEPTED) => {
            println!("Connected.");
        }
        Ok(ref greeting) if greeting.starts_with(proto::RESP_BUSY) => {
            eprintln!("Connection refused: server is busy");
            process::exit(1);
        }
        Ok(greeting) => {
            eprintln!("Could not interpret server response: {}", greeting);
            process::exit(1);
        }
        Err(err) => {
            logging::crit!(log, "no confirmation from server"; "err" => ?err);
            process::exit(1);
        }
    }

    let queue = CommandQueue::new();
    let comm = repl::spawn_comm(server, queue.clone(), log.new(logging::o!()));

    // Single-shot flags enqueue one command plus the exit sentinel.
    let single = if matches.is_present("list") {
        Some(proto::CMD_LIST.to_string())
    } else if matches.is_present("listrec") {
        Some(proto::CMD_LIST_RECURSIVE.to_string())
    } else if let Some(mut values) = matches.values_of("encrypt") {
        let path = values.next().unwrap_or_default();
        let seed = values.next().unwrap_or_default();
        Some(format!("{}{} {}", proto::CMD_ENCRYPT, path, seed))
    } else if let Some(mut values) = matches.values_of("decrypt") {
        let path = values.next().unwrap_or_default();
        let seed = values.next().unwrap_or_default();
        Some(format!("{}{} {}", proto::CMD_DECRYPT, path, seed))
    } else {
        None
    };

    if let Some(command) = single {
        queue.push(Some(command));
        queue.push(None);
        let code = comm.join().unwrap_or(1);
        process::exit(code);
    }

    process::exit(repl::interact(queue, comm));
}
