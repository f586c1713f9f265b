//! Server configuration.
//!
//! Loads configuration from a TOML file with support for environment variable
//! expansion in string values. Variables use `$VAR` or `${VAR}` syntax.
//!
//! # Example Configuration
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 3000
//!
//! [chain]
//! endpoints = [
//!     "https://api.mainnet-beta.solana.com",
//!     "https://solana-rpc.publicnode.com",
//! ]
//! recipient = "$PAYMENT_WALLET"
//! mint = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"
//!
//! [pricing]
//! mode = "fixed"
//! currency = "USDC"
//!
//! [pricing.prices]
//! process = "0.25"
//! process_priority = "0.50"
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` — Path to configuration file (default: `config.toml`)
//! - `HOST` — Override server bind address
//! - `PORT` — Override server port
//! - Secrets (wallet address, RPC API keys) referenced by `$VAR` in the file

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;

use tollgate::types::ServiceKind;

/// Top-level server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (default: `0.0.0.0`).
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Server port (default: `3000`).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Chain access and payment destination.
    pub chain: ChainConfig,

    /// Free tier and rate limit knobs.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Pricing strategy selection.
    pub pricing: PricingConfig,

    /// Callback delivery knobs.
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

/// Chain access and payment destination.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// RPC endpoints in priority order. The first healthy one wins.
    pub endpoints: Vec<String>,

    /// The service's receiving wallet address.
    /// Supports `$VAR` / `${VAR}` for environment variable expansion.
    pub recipient: String,

    /// Mint address of the accepted settlement token.
    pub mint: String,

    /// Maximum accepted transaction age in seconds (default: 300).
    #[serde(default = "default_freshness_secs")]
    pub freshness_secs: u64,
}

/// Free tier and rate limit knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Free requests granted per agent identity over process lifetime.
    #[serde(default = "default_free_tier")]
    pub free_tier: u32,

    /// Requests per minute per agent identity.
    #[serde(default = "default_agent_per_minute")]
    pub agent_per_minute: u32,

    /// Requests per minute per network origin.
    #[serde(default = "default_origin_per_minute")]
    pub origin_per_minute: u32,

    /// Allow plain-HTTP and private-network callback URLs. Off in
    /// production; on for local development against localhost receivers.
    #[serde(default)]
    pub allow_insecure_callbacks: bool,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            free_tier: default_free_tier(),
            agent_per_minute: default_agent_per_minute(),
            origin_per_minute: default_origin_per_minute(),
            allow_insecure_callbacks: false,
        }
    }
}

/// Pricing strategy selection.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PricingConfig {
    /// Stable-valued token: charge the USD target one-to-one.
    Fixed {
        /// Display name of the settlement token.
        currency: String,
        /// USD target per operation key.
        prices: HashMap<String, Decimal>,
        /// Absolute tolerance in token units (default: 0).
        #[serde(default)]
        tolerance: Decimal,
    },
    /// Volatile token: convert USD targets through an external rate.
    Oracle {
        /// Display name of the settlement token.
        currency: String,
        /// USD target per operation key.
        prices: HashMap<String, Decimal>,
        /// Rate source URL returning `{"<id>": {"usd": <rate>}}`.
        rate_url: String,
        /// Asset identifier within the rate source response.
        rate_asset: String,
        /// Rate used before the first fetch and after failures.
        fallback_rate: Decimal,
        /// Percentage band as a fraction (default: 0.05).
        #[serde(default = "default_tolerance_pct")]
        tolerance_pct: Decimal,
        /// How long a fetched rate stays fresh, in seconds (default: 300).
        #[serde(default = "default_rate_cache_secs")]
        cache_ttl_secs: u64,
    },
}

impl PricingConfig {
    /// Parses the operation-key price table into `ServiceKind` targets.
    ///
    /// # Errors
    ///
    /// Returns the offending key when it matches no known operation.
    pub fn price_table(&self) -> Result<HashMap<ServiceKind, Decimal>, String> {
        let raw = match self {
            Self::Fixed { prices, .. } | Self::Oracle { prices, .. } => prices,
        };
        let mut table = HashMap::with_capacity(raw.len());
        for (key, price) in raw {
            let kind = ServiceKind::all()
                .into_iter()
                .find(|k| k.key() == key)
                .ok_or_else(|| format!("unknown operation in price table: {key}"))?;
            table.insert(kind, *price);
        }
        Ok(table)
    }
}

/// Callback delivery knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Delay before each retry, in seconds. Length bounds the retry count.
    #[serde(default = "default_retry_delays")]
    pub retry_delays_secs: Vec<u64>,

    /// Per-attempt delivery timeout in seconds (default: 10).
    #[serde(default = "default_delivery_timeout_secs")]
    pub timeout_secs: u64,

    /// How long completed results stay pollable, in seconds (default: 24h).
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            retry_delays_secs: default_retry_delays(),
            timeout_secs: default_delivery_timeout_secs(),
            retention_secs: default_retention_secs(),
        }
    }
}

impl DeliveryConfig {
    /// Retry delays as durations.
    #[must_use]
    pub fn retry_delays(&self) -> Vec<Duration> {
        self.retry_delays_secs
            .iter()
            .map(|&s| Duration::from_secs(s))
            .collect()
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0))
}

fn default_port() -> u16 {
    3000
}

fn default_freshness_secs() -> u64 {
    300
}

fn default_free_tier() -> u32 {
    1
}

fn default_agent_per_minute() -> u32 {
    10
}

fn default_origin_per_minute() -> u32 {
    60
}

fn default_tolerance_pct() -> Decimal {
    Decimal::new(5, 2)
}

fn default_rate_cache_secs() -> u64 {
    300
}

fn default_retry_delays() -> Vec<u64> {
    vec![5, 15, 60]
}

fn default_delivery_timeout_secs() -> u64 {
    10
}

fn default_retention_secs() -> u64 {
    24 * 60 * 60
}

impl ServerConfig {
    /// Loads configuration from the path given by the `CONFIG` environment
    /// variable, falling back to `config.toml` in the current directory.
    ///
    /// After loading, all string values with `$VAR` / `${VAR}` references
    /// are expanded from the process environment. `HOST` and `PORT` env vars
    /// override the file values.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// price table names an unknown operation.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let path = std::env::var("CONFIG").unwrap_or_else(|_| "config.toml".to_owned());
        Self::load_from(&path)
    }

    /// Loads configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        if !Path::new(path).exists() {
            return Err(format!("config file not found: {path}").into());
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parses a TOML string, expanding environment variables first.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed TOML or an invalid price table.
    pub fn parse(content: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let expanded = expand_env_vars(content);
        let mut config: Self = toml::from_str(&expanded)?;

        // Fail fast on an unusable price table rather than at first quote.
        config.pricing.price_table()?;
        if config.chain.endpoints.is_empty() {
            return Err("chain.endpoints must list at least one RPC endpoint".into());
        }

        // Allow HOST / PORT env overrides
        if let Ok(host) = std::env::var("HOST") {
            if let Ok(addr) = host.parse() {
                config.host = addr;
            }
        }
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(p) = port.parse() {
                config.port = p;
            }
        }

        Ok(config)
    }
}

/// Expands `$VAR` and `${VAR}` patterns in a string from environment variables.
///
/// Unresolved variables are left as-is.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' {
            let braced = chars.peek() == Some(&'{');
            if braced {
                chars.next(); // consume '{'
            }

            let mut var_name = String::new();
            while let Some(&c) = chars.peek() {
                if braced {
                    if c == '}' {
                        chars.next();
                        break;
                    }
                } else if !c.is_ascii_alphanumeric() && c != '_' {
                    break;
                }
                var_name.push(c);
                chars.next();
            }

            if var_name.is_empty() {
                result.push('$');
                if braced {
                    result.push('{');
                }
            } else if let Ok(val) = std::env::var(&var_name) {
                result.push_str(&val);
            } else {
                // Leave unresolved variable as-is
                result.push('$');
                if braced {
                    result.push('{');
                }
                result.push_str(&var_name);
                if braced {
                    result.push('}');
                }
            }
        } else {
            result.push(ch);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [chain]
        endpoints = ["https://api.mainnet-beta.solana.com"]
        recipient = "SvcWa11et"
        mint = "USDCmint"

        [pricing]
        mode = "fixed"
        currency = "USDC"

        [pricing.prices]
        process = "0.25"
        process_priority = "0.50"
    "#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = ServerConfig::parse(MINIMAL).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.limits.free_tier, 1);
        assert_eq!(config.limits.agent_per_minute, 10);
        assert_eq!(config.delivery.retry_delays_secs, vec![5, 15, 60]);
        assert_eq!(config.delivery.timeout_secs, 10);
        assert_eq!(config.chain.freshness_secs, 300);
    }

    #[test]
    fn price_table_maps_operation_keys() {
        let config = ServerConfig::parse(MINIMAL).unwrap();
        let table = config.pricing.price_table().unwrap();
        assert_eq!(
            table.get(&ServiceKind::Standard),
            Some(&Decimal::new(25, 2))
        );
        assert_eq!(
            table.get(&ServiceKind::Priority),
            Some(&Decimal::new(50, 2))
        );
    }

    #[test]
    fn unknown_price_key_is_rejected() {
        let bad = MINIMAL.replace("process_priority", "process_turbo");
        assert!(ServerConfig::parse(&bad).is_err());
    }

    #[test]
    fn empty_endpoint_list_is_rejected() {
        let bad = MINIMAL.replace(
            r#"endpoints = ["https://api.mainnet-beta.solana.com"]"#,
            "endpoints = []",
        );
        assert!(ServerConfig::parse(&bad).is_err());
    }

    #[test]
    fn oracle_mode_parses() {
        let toml = r#"
            [chain]
            endpoints = ["https://api.mainnet-beta.solana.com"]
            recipient = "SvcWa11et"
            mint = "So11111111111111111111111111111111111111112"

            [pricing]
            mode = "oracle"
            currency = "SOL"
            rate_url = "https://api.coingecko.com/api/v3/simple/price?ids=solana&vs_currencies=usd"
            rate_asset = "solana"
            fallback_rate = "200"

            [pricing.prices]
            process = "0.25"
        "#;
        let config = ServerConfig::parse(toml).unwrap();
        match config.pricing {
            PricingConfig::Oracle {
                fallback_rate,
                tolerance_pct,
                cache_ttl_secs,
                ..
            } => {
                assert_eq!(fallback_rate, Decimal::new(200, 0));
                assert_eq!(tolerance_pct, Decimal::new(5, 2));
                assert_eq!(cache_ttl_secs, 300);
            }
            PricingConfig::Fixed { .. } => panic!("expected oracle mode"),
        }
    }

    #[test]
    fn env_vars_expand_in_strings() {
        // Same process env for all tests; use a name nothing else sets.
        unsafe { std::env::set_var("TOLLGATE_TEST_WALLET", "Expanded1") };
        let toml = MINIMAL.replace("SvcWa11et", "$TOLLGATE_TEST_WALLET");
        let config = ServerConfig::parse(&toml).unwrap();
        assert_eq!(config.chain.recipient, "Expanded1");
    }

    #[test]
    fn unresolved_vars_are_left_alone() {
        assert_eq!(
            expand_env_vars("key = \"$TOLLGATE_DOES_NOT_EXIST\""),
            "key = \"$TOLLGATE_DOES_NOT_EXIST\""
        );
    }
}
