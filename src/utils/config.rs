use std::error::Error;

use ini::Ini;
use serde::Serialize;

use crate::utils::cli::Cli;
use crate::utils::constants::{
    CHECK_PREDECESSOR_SLEEP_MILLIS, DEFAULT_HASH_BIT_LENGTH, FIX_FINGERS_SLEEP_MILLIS,
    STABILIZE_SLEEP_MILLIS,
};

/// Fully resolved node configuration: built-in defaults, overridden by the
/// INI file, overridden by command line flags.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub id: Option<u64>,
    pub known_host: Option<String>,
    pub known_port: Option<u16>,
    pub known_id: Option<u64>,
    pub hash_bits: u8,
    pub stabilize_interval_millis: u64,
    pub fix_fingers_interval_millis: u64,
    pub check_predecessor_interval_millis: u64,
    pub web_address: Option<String>,
    pub debug: bool,
}

impl Config {
    pub fn load(cli: &Cli) -> Result<Config, Box<dyn Error + Send + Sync>> {
        let file = match &cli.config_file {
            Some(path) => Some(Ini::load_from_file(path)?),
            None => None,
        };

        let file_get = |section: &str, key: &str| -> Option<String> {
            file.as_ref()
                .and_then(|ini| ini.section(Some(section)))
                .and_then(|properties| properties.get(key))
                .map(|value| value.to_string())
        };

        let grpc_address = cli
            .grpc_address
            .clone()
            .or_else(|| file_get("node", "grpc"))
            .ok_or("own gRPC address is missing (use --grpc or the [node] grpc key)")?;
        let (host, port) = split_address(&grpc_address)?;

        let peer_address = cli.peer.clone().or_else(|| file_get("known", "grpc"));
        let (known_host, known_port) = match &peer_address {
            Some(address) => {
                let (peer_host, peer_port) = split_address(address)?;
                (Some(peer_host), Some(peer_port))
            }
            None => (None, None),
        };

        let hash_bits = match cli.hash_bits {
            Some(bits) => bits,
            None => match file_get("node", "bits") {
                Some(raw) => raw.parse()?,
                None => DEFAULT_HASH_BIT_LENGTH,
            },
        };
        if hash_bits == 0 || hash_bits > 64 {
            return Err(format!("identifier space width {} is outside 1..=64", hash_bits).into());
        }

        let id = match cli.id {
            Some(id) => Some(id),
            None => file_get("node", "id").map(|raw| raw.parse()).transpose()?,
        };
        let known_id = match cli.peer_id {
            Some(id) => Some(id),
            None => file_get("known", "id").map(|raw| raw.parse()).transpose()?,
        };

        let interval = |key: &str, default: u64| -> Result<u64, Box<dyn Error + Send + Sync>> {
            match file_get("maintenance", key) {
                Some(raw) => Ok(raw.parse()?),
                None => Ok(default),
            }
        };

        Ok(Config {
            host,
            port,
            id,
            known_host,
            known_port,
            known_id,
            hash_bits,
            stabilize_interval_millis: interval("stabilize_millis", STABILIZE_SLEEP_MILLIS)?,
            fix_fingers_interval_millis: interval("fix_fingers_millis", FIX_FINGERS_SLEEP_MILLIS)?,
            check_predecessor_interval_millis: interval(
                "check_predecessor_millis",
                CHECK_PREDECESSOR_SLEEP_MILLIS,
            )?,
            web_address: cli.web_address.clone().or_else(|| file_get("node", "web")),
            debug: cli.debug || file_get("node", "debug").as_deref() == Some("true"),
        })
    }

    pub fn grpc_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn split_address(address: &str) -> Result<(String, u16), Box<dyn Error + Send + Sync>> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| format!("malformed address '{}', expected host:port", address))?;
    if host.is_empty() {
        return Err(format!("malformed address '{}', host is empty", address).into());
    }
    Ok((host.to_string(), port.parse()?))
}
