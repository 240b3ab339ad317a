use alloy::primitives::Address;
use eyre::{eyre, Result, WrapErr};
use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Main configuration for the relayer
#[derive(Debug, Clone)]
pub struct Config {
    pub origin: ChainEndpoint,
    pub destination: ChainEndpoint,
    pub signer: SignerConfig,
    /// `None` runs with the in-memory ledger
    pub database: Option<DatabaseConfig>,
    pub relayer: RelayerConfig,
    pub api: ApiConfig,
}

/// One monitored chain and its bridge deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEndpoint {
    /// "origin" or "destination"; used in logs and metrics
    pub name: String,
    pub rpc_url: String,
    pub chain_id: u64,
    pub bridge_address: Address,
    /// First block to scan when no cursor has been persisted yet
    pub start_block: Option<u64>,
}

/// Key used to sign on both chains
#[derive(Clone)]
pub struct SignerConfig {
    pub private_key: String,
}

/// Custom Debug that redacts private_key to prevent accidental log leakage.
impl fmt::Debug for SignerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignerConfig")
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Database configuration
#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Custom Debug that redacts the database URL (may contain credentials).
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"<redacted>")
            .finish()
    }
}

/// Relayer configuration
#[derive(Debug, Clone)]
pub struct RelayerConfig {
    pub poll_interval_ms: u64,
    pub finality_blocks: u64,
    pub max_block_range: u64,
    pub max_concurrent_relays: usize,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            finality_blocks: default_finality_blocks(),
            max_block_range: default_max_block_range(),
            max_concurrent_relays: default_max_concurrent_relays(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

/// Health / metrics server
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub port: u16,
}

/// Default functions
fn default_finality_blocks() -> u64 {
    1
}

fn default_poll_interval() -> u64 {
    2000
}

fn default_max_block_range() -> u64 {
    2000
}

fn default_max_concurrent_relays() -> usize {
    8
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    2000
}

fn default_api_port() -> u16 {
    9090
}

fn required<F>(get: &F, key: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    get(key).ok_or_else(|| eyre!("{} environment variable is required", key))
}

fn parsed<F, T>(get: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| eyre!("{} is invalid: {}", key, e)),
        None => Ok(None),
    }
}

fn endpoint<F>(get: &F, name: &str, prefix: &str) -> Result<ChainEndpoint>
where
    F: Fn(&str) -> Option<String>,
{
    let chain_id_key = format!("{}_CHAIN_ID", prefix);
    let chain_id: u64 = parsed(get, &chain_id_key)?
        .ok_or_else(|| eyre!("{} environment variable is required", chain_id_key))?;

    let address_key = format!("{}_BRIDGE_ADDRESS", prefix);
    let raw_address = required(get, &address_key)?;
    if raw_address.len() != 42 || !raw_address.starts_with("0x") {
        return Err(eyre!(
            "{} must be a valid hex address (42 chars with 0x prefix)",
            address_key
        ));
    }
    let bridge_address: Address = raw_address
        .parse()
        .wrap_err_with(|| format!("{} is not a valid address", address_key))?;

    Ok(ChainEndpoint {
        name: name.to_string(),
        rpc_url: required(get, &format!("{}_RPC_URL", prefix))?,
        chain_id,
        bridge_address,
        start_block: parsed(get, &format!("{}_START_BLOCK", prefix))?,
    })
}

impl Config {
    /// Load configuration from environment variables
    /// Loads .env file if present, then reads from environment
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env")
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::from_lookup(|key| env::var(key).ok().filter(|v| !v.is_empty()))
    }

    /// Build the configuration from an arbitrary variable source
    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let origin = endpoint(&get, "origin", "ORIGIN")?;
        let destination = endpoint(&get, "destination", "DESTINATION")?;

        let signer = SignerConfig {
            private_key: required(&get, "PRIVATE_KEY")?,
        };

        let database = get("DATABASE_URL").map(|url| DatabaseConfig { url });

        let relayer = RelayerConfig {
            poll_interval_ms: parsed(&get, "POLL_INTERVAL_MS")?
                .unwrap_or(default_poll_interval()),
            finality_blocks: parsed(&get, "FINALITY_BLOCKS")?
                .unwrap_or(default_finality_blocks()),
            max_block_range: parsed(&get, "MAX_BLOCK_RANGE")?
                .unwrap_or(default_max_block_range()),
            max_concurrent_relays: parsed(&get, "MAX_CONCURRENT_RELAYS")?
                .unwrap_or(default_max_concurrent_relays()),
            retry_attempts: parsed(&get, "RETRY_ATTEMPTS")?.unwrap_or(default_retry_attempts()),
            retry_delay_ms: parsed(&get, "RETRY_DELAY_MS")?.unwrap_or(default_retry_delay()),
        };

        let api = ApiConfig {
            port: parsed(&get, "API_PORT")?.unwrap_or(default_api_port()),
        };

        let config = Config {
            origin,
            destination,
            signer,
            database,
            relayer,
            api,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        for endpoint in [&self.origin, &self.destination] {
            if endpoint.rpc_url.is_empty() {
                return Err(eyre!("{} rpc_url cannot be empty", endpoint.name));
            }
            if endpoint.bridge_address == Address::ZERO {
                return Err(eyre!("{} bridge_address cannot be zero", endpoint.name));
            }
        }

        // Both watchers would key the same cursor and race each other
        if self.origin.chain_id == self.destination.chain_id {
            return Err(eyre!(
                "origin and destination chain ids must differ (both are {})",
                self.origin.chain_id
            ));
        }

        let key = self.signer.private_key.trim_start_matches("0x");
        if key.len() != 64 || !key.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(eyre!("PRIVATE_KEY must be 32 bytes of hex (optionally 0x-prefixed)"));
        }

        if let Some(db) = &self.database {
            if db.url.is_empty() {
                return Err(eyre!("database.url cannot be empty"));
            }
        }

        if self.relayer.max_block_range == 0 {
            return Err(eyre!("MAX_BLOCK_RANGE must be at least 1"));
        }

        if self.relayer.max_concurrent_relays == 0 {
            return Err(eyre!("MAX_CONCURRENT_RELAYS must be at least 1"));
        }

        if self.relayer.poll_interval_ms == 0 {
            return Err(eyre!("POLL_INTERVAL_MS must be positive"));
        }

        Ok(())
    }
}
