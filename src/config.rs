use crate::error::ConfigError;
use alloy::primitives::{Address, U256};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::str::FromStr;

const DEFAULT_LEDGER_DB_PATH: &str = "./user_balances.db";
const DEFAULT_POOL_DATA_PATH: &str = "data/pool.json";
const DEFAULT_API_LISTEN_ADDR: &str = "0.0.0.0:8080";

/// Default watch list used when `WATCHED_CONTRACTS` is unset.
const DEFAULT_WATCHED_CONTRACTS: &str = "USD0++=0x35D8949372D46B7a3D5A56006AE77B215fc69bC0";

#[derive(Debug, Clone)]
pub struct WatchedContract {
    pub name: String,
    pub address: Address,
    pub start_block: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub rpc_url: String,
    pub contracts: Vec<WatchedContract>,
    pub ledger_db_path: String,
    pub pool_data_path: String,
    pub api_listen_addr: String,
}

fn validate_http_url(name: &str, raw: &str) -> Result<(), ConfigError> {
    let parsed = raw.parse::<reqwest::Url>().map_err(|e| {
        ConfigError::InvalidConfig(format!("{name} must be a valid URL, got `{raw}`: {e}"))
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::InvalidConfig(format!(
            "{name} must use http(s) scheme, got `{other}`"
        ))),
    }
}

fn parse_start_block(raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse::<u64>().map_err(|_| {
        ConfigError::InvalidConfig(format!("START_BLOCK must be a valid u64, got `{raw}`"))
    })
}

/// Parse a comma-separated watch list of `name=address` or
/// `name=address@start_block` entries. Entries without an explicit start
/// block inherit `default_start`.
fn parse_watch_list(raw: &str, default_start: u64) -> Result<Vec<WatchedContract>, ConfigError> {
    let mut contracts = Vec::new();
    for item in raw.split(',') {
        let entry = item.trim();
        if entry.is_empty() {
            continue;
        }
        let (name, rest) = entry.split_once('=').ok_or_else(|| {
            ConfigError::InvalidConfig(format!(
                "WATCHED_CONTRACTS entry must be name=address[@start_block], got `{entry}`"
            ))
        })?;
        let (addr_raw, start_block) = match rest.split_once('@') {
            Some((addr, block)) => (addr, parse_watch_start(block, entry)?),
            None => (rest, default_start),
        };
        let address = Address::from_str(addr_raw.trim()).map_err(|e| {
            ConfigError::InvalidConfig(format!(
                "WATCHED_CONTRACTS entry `{entry}` has an invalid address: {e}"
            ))
        })?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ConfigError::InvalidConfig(format!(
                "WATCHED_CONTRACTS entry `{entry}` has an empty name"
            )));
        }
        contracts.push(WatchedContract {
            name: name.to_string(),
            address,
            start_block,
        });
    }
    if contracts.is_empty() {
        return Err(ConfigError::InvalidConfig(
            "WATCHED_CONTRACTS resolved to an empty watch list".to_string(),
        ));
    }
    Ok(contracts)
}

fn parse_watch_start(raw: &str, entry: &str) -> Result<u64, ConfigError> {
    raw.trim().parse::<u64>().map_err(|_| {
        ConfigError::InvalidConfig(format!(
            "WATCHED_CONTRACTS entry `{entry}` has an invalid start block `{raw}`"
        ))
    })
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let rpc_url = env::var("RPC_URL")
            .map_err(|_| ConfigError::MissingConfig("RPC_URL must be set".to_string()))?;
        validate_http_url("RPC_URL", &rpc_url)?;

        let start_block_raw = env::var("START_BLOCK")
            .map_err(|_| ConfigError::MissingConfig("START_BLOCK must be set".to_string()))?;
        let start_block = parse_start_block(&start_block_raw)?;

        let watch_raw =
            env::var("WATCHED_CONTRACTS").unwrap_or_else(|_| DEFAULT_WATCHED_CONTRACTS.to_string());
        let contracts = parse_watch_list(&watch_raw, start_block)?;

        Ok(Self {
            rpc_url,
            contracts,
            ledger_db_path: env::var("LEDGER_DB_PATH")
                .unwrap_or_else(|_| DEFAULT_LEDGER_DB_PATH.to_string()),
            pool_data_path: env::var("POOL_DATA_PATH")
                .unwrap_or_else(|_| DEFAULT_POOL_DATA_PATH.to_string()),
            api_listen_addr: env::var("API_LISTEN_ADDR")
                .unwrap_or_else(|_| DEFAULT_API_LISTEN_ADDR.to_string()),
        })
    }
}

/// On-disk pool table shape: `{"dataSources": [{address, name, pointsMultiplier}]}`.
#[derive(Debug, Deserialize)]
struct PoolFile {
    #[serde(rename = "dataSources")]
    data_sources: Vec<PoolInfoRaw>,
}

#[derive(Debug, Deserialize)]
struct PoolInfoRaw {
    address: Address,
    name: String,
    #[serde(rename = "pointsMultiplier")]
    points_multiplier: String,
}

#[derive(Debug, Clone)]
pub struct PoolEntry {
    pub name: String,
    pub multiplier: U256,
}

/// Static per-contract multiplier table. Loaded once at startup; read-only
/// for the lifetime of the process.
#[derive(Debug, Default)]
pub struct PoolTable {
    pools: HashMap<Address, PoolEntry>,
}

impl PoolTable {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::InvalidConfig(format!(
                "failed to read pool table {}: {e}",
                path.display()
            ))
        })?;
        let file: PoolFile = serde_json::from_str(&raw).map_err(|e| {
            ConfigError::InvalidConfig(format!(
                "failed to parse pool table {}: {e}",
                path.display()
            ))
        })?;

        let mut pools = HashMap::with_capacity(file.data_sources.len());
        for pool in file.data_sources {
            // Multipliers are decimal strings in the file; a malformed entry
            // is a startup error, not a silent zero at query time.
            let multiplier =
                U256::from_str_radix(pool.points_multiplier.trim(), 10).map_err(|_| {
                    ConfigError::InvalidConfig(format!(
                        "pool `{}` has an invalid pointsMultiplier `{}`",
                        pool.name, pool.points_multiplier
                    ))
                })?;
            pools.insert(
                pool.address,
                PoolEntry {
                    name: pool.name,
                    multiplier,
                },
            );
        }
        Ok(Self { pools })
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (Address, String, U256)>) -> Self {
        let pools = entries
            .into_iter()
            .map(|(address, name, multiplier)| (address, PoolEntry { name, multiplier }))
            .collect();
        Self { pools }
    }

    pub fn get(&self, address: &Address) -> Option<&PoolEntry> {
        self.pools.get(address)
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}
