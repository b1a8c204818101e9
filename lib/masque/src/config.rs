use crate::logging;
use std::fs;
use std::io::{self, Write};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

pub const DEFAULT_ADDRESS: Ipv4Addr = Ipv4Addr::LOCALHOST;
pub const DEFAULT_PORT: u16 = 8888;
pub const DEFAULT_ROOT_DIR: &str = ".";
pub const DEFAULT_MAX_CLIENTS: usize = 4;

const KEY_ADDRESS: &str = "server_addr";
const KEY_PORT: &str = "server_port";
const KEY_ROOT_DIR: &str = "current_root_dir";
const KEY_MAX_CLIENTS: &str = "max_client_connect";

/// Server configuration, persisted as `key=value` lines. Mutated only by
/// the reconfiguration supervisor; everyone else works on snapshots.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Config {
    pub address: Ipv4Addr,
    pub port: u16,
    pub root_dir: PathBuf,
    pub max_clients: usize,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            address: DEFAULT_ADDRESS,
            port: DEFAULT_PORT,
            root_dir: PathBuf::from(DEFAULT_ROOT_DIR),
            max_clients: DEFAULT_MAX_CLIENTS,
        }
    }
}

/// Which fields changed between two configuration snapshots.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub struct ChangeMask {
    pub address: bool,
    pub port: bool,
    pub root_dir: bool,
    pub max_clients: bool,
}

impl ChangeMask {
    #[inline]
    pub fn any(&self) -> bool {
        self.address || self.port || self.root_dir || self.max_clients
    }
}

impl Config {
    /// Loads the configuration file, creating it with defaults when it does
    /// not exist yet.
    pub fn load<'a, P, L>(path: P, log: L) -> io::Result<Config>
    where
        P: AsRef<Path>,
        L: Into<Option<&'a logging::Logger>>,
    {
        let log = match log.into() {
            Some(log) => log.clone(),
            None => logging::discard(),
        };

        if !path.as_ref().exists() {
            let config = Config::default();
            config.store(&path)?;
            logging::info!(log, "created default configuration file";
                           "path" => %path.as_ref().display());
            return Ok(config);
        }

        Config::default().reload(path, &log)
    }

    /// Re-reads the file on top of `self`: recognized keys replace current
    /// values, everything else is discarded with a warning.
    pub fn reload<'a, P, L>(&self, path: P, log: L) -> io::Result<Config>
    where
        P: AsRef<Path>,
        L: Into<Option<&'a logging::Logger>>,
    {
        let log = match log.into() {
            Some(log) => log.clone(),
            None => logging::discard(),
        };

        let text = fs::read_to_string(&path)?;
        let mut config = self.clone();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = match line.split_once('=') {
                Some(pair) => pair,
                None => {
                    logging::warn!(log, "corrupted configuration line discarded"; "line" => line);
                    continue;
                }
            };
            match key {
                KEY_ADDRESS => match value.parse() {
                    Ok(address) => config.address = address,
                    Err(_) => {
                        logging::warn!(log, "malformed address discarded"; "value" => value)
                    }
                },
                KEY_PORT => match value.parse::<u16>() {
                    Ok(port) if port > 0 => config.port = port,
                    _ => logging::warn!(log, "malformed port discarded"; "value" => value),
                },
                KEY_ROOT_DIR => config.root_dir = PathBuf::from(value),
                KEY_MAX_CLIENTS => match value.parse::<usize>() {
                    Ok(count) if count > 0 => config.max_clients = count,
                    _ => {
                        logging::warn!(log, "malformed client cap discarded"; "value" => value)
                    }
                },
                _ => logging::warn!(log, "unrecognized configuration key discarded"; "key" => key),
            }
        }

        Ok(config)
    }

    /// Writes the configuration back as `key=value` lines.
    pub fn store<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = fs::File::create(path)?;
        writeln!(file, "{}={}", KEY_ADDRESS, self.address)?;
        writeln!(file, "{}={}", KEY_PORT, self.port)?;
        writeln!(file, "{}={}", KEY_ROOT_DIR, self.root_dir.display())?;
        writeln!(file, "{}={}", KEY_MAX_CLIENTS, self.max_clients)?;
        Ok(())
    }

    /// Change mask of `fresh` relative to `self`.
    pub fn diff(&self, fresh: &Config) -> ChangeMask {
        ChangeMask {
            address: self.address != fresh.address,
            port: self.port != fresh.port,
            root_dir: self.root_dir != fresh.root_dir,
            max_clients: self.max_clients != fresh.max_clients,
        }
    }

    #[inline]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::from((self.address, self.port))
    }
}

/// Client-side configuration; only the server coordinates are persisted.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ClientConfig {
    pub address: Ipv4Addr,
    pub port: u16,
}

impl Default for ClientConfig {
    fn default() -> ClientConfig {
        ClientConfig {
            address: DEFAULT_ADDRESS,
            port: DEFAULT_PORT,
        }
    }
}

impl ClientConfig {
    pub fn load<'a, P, L>(path: P, log: L) -> io::Result<ClientConfig>
    where
        P: AsRef<Path>,
        L: Into<Option<&'a logging::Logger>>,
    {
        let log = match log.into() {
            Some(log) => log.clone(),
            None => logging::discard(),
        };

        if !path.as_ref().exists() {
            let config = ClientConfig::default();
            config.store(&path)?;
            logging::info!(log, "created default configuration file";
                           "path" => %path.as_ref().display());
            return Ok(config);
        }

        let text = fs::read_to_string(&path)?;
        let mut config = ClientConfig::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = match line.split_once('=') {
                Some(pair) => pair,
                None => {
                    logging::warn!(log, "corrupted configuration line discarded"; "line" => line);
                    continue;
                }
            };
            match key {
                KEY_ADDRESS => match value.parse() {
                    Ok(address) => config.address = address,
                    Err(_) => {
                        logging::warn!(log, "malformed address discarded"; "value" => value)
                    }
                },
                KEY_PORT => match value.parse::<u16>() {
                    Ok(port) if port > 0 => config.port = port,
                    _ => logging::warn!(log, "malformed port discarded"; "value" => value),
                },
                _ => logging::warn!(log, "unrecognized configuration key discarded"; "key" => key),
            }
        }
        Ok(config)
    }

    pub fn store<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = fs::File::create(path)?;
        writeln!(file, "{}={}", KEY_ADDRESS, self.address)?;
        writeln!(file, "{}={}", KEY_PORT, self.port)?;
        Ok(())
    }

    #[inline]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::from((self.address, self.port))
    }
}
