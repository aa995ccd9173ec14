//! Typed startup configuration (§4.9, §6 Environment). Loaded once from the
//! process environment (optionally seeded by a local `.env`) into an
//! immutable `Config`. Parsing is a pure function over a `&HashMap<String,
//! String>` so it can be unit tested without mutating the real environment.

use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("environment variable {key} has invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub admin_api_key: String,
    pub chain_rpc_url: String,
    pub deposit_address: String,
    pub hot_wallet_privkey: String,
    pub db_url: String,

    pub t_bet: Duration,
    pub t_cash: Duration,
    pub c_conf: u64,
    pub c_reorg: u64,
    pub b_min_wei: u128,
    pub b_max_wei: u128,
    pub liability_factor: f64,
    pub min_stake_wei: u128,
    pub max_stake_wei: u128,
    pub cap_mult: f64,
    pub house_edge: f64,

    /// Cashout timing buffer, `B` in §4.2. Not listed among the named
    /// tunables of §6 but configurable per §4.1's Open Question resolution.
    pub cashout_buffer: Duration,
    pub n_retry: u32,
    pub per_player_cooldown: Duration,
    pub round_cap: u32,
}

impl Config {
    /// Load from the real process environment, after optionally loading a
    /// local `.env` file (a no-op in production where the file is absent).
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_map(&vars)
    }

    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let required = |key: &'static str| -> Result<String, ConfigError> {
            vars.get(key).cloned().ok_or(ConfigError::Missing(key))
        };
        let parse_u64 = |key: &'static str, default: u64| -> Result<u64, ConfigError> {
            match vars.get(key) {
                None => Ok(default),
                Some(v) => v.parse().map_err(|e| ConfigError::Invalid {
                    key,
                    value: v.clone(),
                    reason: format!("{e}"),
                }),
            }
        };
        let parse_u128 = |key: &'static str, default: u128| -> Result<u128, ConfigError> {
            match vars.get(key) {
                None => Ok(default),
                Some(v) => v.parse().map_err(|e| ConfigError::Invalid {
                    key,
                    value: v.clone(),
                    reason: format!("{e}"),
                }),
            }
        };
        let parse_f64 = |key: &'static str, default: f64| -> Result<f64, ConfigError> {
            match vars.get(key) {
                None => Ok(default),
                Some(v) => v.parse().map_err(|e| ConfigError::Invalid {
                    key,
                    value: v.clone(),
                    reason: format!("{e}"),
                }),
            }
        };

        let t_bet_s = parse_u64("T_BET", 15)?;
        let t_cash_s = parse_u64("T_CASH", 3)?;
        let c_conf = parse_u64("C_CONF", 12)?;
        let c_reorg = parse_u64("C_REORG", 25)?;
        let b_min_wei = parse_u128("B_MIN", 0)?;
        let b_max_wei = parse_u128("B_MAX", u128::MAX)?;
        let liability_factor = parse_f64("LIABILITY_FACTOR", 0.8)?;
        let min_stake_wei = parse_u128("MIN_STAKE", 1)?;
        let max_stake_wei = parse_u128("MAX_STAKE", u128::MAX)?;
        let cap_mult = parse_f64("CAP_MULT", 100.0)?;
        let house_edge = parse_f64("HOUSE_EDGE", 0.01)?;
        let cashout_buffer_ms = parse_u64("CASHOUT_BUFFER_MS", 50)?;
        let n_retry = parse_u64("N_RETRY", 5)?;
        let cooldown_ms = parse_u64("PER_PLAYER_COOLDOWN_MS", 500)?;
        let round_cap = parse_u64("ROUND_CAP", 10_000)?;

        if t_bet_s == 0 {
            return Err(ConfigError::Invalid {
                key: "T_BET",
                value: t_bet_s.to_string(),
                reason: "must be > 0".into(),
            });
        }
        if t_cash_s == 0 {
            return Err(ConfigError::Invalid {
                key: "T_CASH",
                value: t_cash_s.to_string(),
                reason: "must be > 0".into(),
            });
        }
        if !(0.0..1.0).contains(&house_edge) {
            return Err(ConfigError::Invalid {
                key: "HOUSE_EDGE",
                value: house_edge.to_string(),
                reason: "must be in [0, 1)".into(),
            });
        }
        if min_stake_wei == 0 || min_stake_wei > max_stake_wei {
            return Err(ConfigError::Invalid {
                key: "MIN_STAKE",
                value: min_stake_wei.to_string(),
                reason: "must be > 0 and <= MAX_STAKE".into(),
            });
        }

        Ok(Config {
            jwt_secret: required("JWT_SECRET")?,
            admin_api_key: required("ADMIN_API_KEY")?,
            chain_rpc_url: required("CHAIN_RPC_URL")?,
            deposit_address: required("DEPOSIT_ADDRESS")?,
            hot_wallet_privkey: required("HOT_WALLET_PRIVKEY")?,
            db_url: required("DB_URL")?,
            t_bet: Duration::from_secs(t_bet_s),
            t_cash: Duration::from_secs(t_cash_s),
            c_conf,
            c_reorg,
            b_min_wei,
            b_max_wei,
            liability_factor,
            min_stake_wei,
            max_stake_wei,
            cap_mult,
            house_edge,
            cashout_buffer: Duration::from_millis(cashout_buffer_ms),
            n_retry: n_retry as u32,
            per_player_cooldown: Duration::from_millis(cooldown_ms),
            round_cap: round_cap as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_env() -> HashMap<String, String> {
        [
            ("JWT_SECRET", "s3cr3t"),
            ("ADMIN_API_KEY", "adminkey"),
            ("CHAIN_RPC_URL", "https://rpc.example"),
            ("DEPOSIT_ADDRESS", "0xdeadbeef"),
            ("HOT_WALLET_PRIVKEY", "0xprivkey"),
            ("DB_URL", "postgres://localhost/crashcore"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn loads_defaults_when_optional_vars_absent() {
        let cfg = Config::from_map(&base_env()).unwrap();
        assert_eq!(cfg.t_bet, Duration::from_secs(15));
        assert_eq!(cfg.t_cash, Duration::from_secs(3));
        assert_eq!(cfg.c_conf, 12);
        assert_eq!(cfg.c_reorg, 25);
        assert!((cfg.house_edge - 0.01).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_required_key_fails() {
        let mut env = base_env();
        env.remove("DB_URL");
        let err = Config::from_map(&env).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DB_URL")));
    }

    #[test]
    fn zero_betting_window_is_rejected() {
        let mut env = base_env();
        env.insert("T_BET".into(), "0".into());
        let err = Config::from_map(&env).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "T_BET", .. }));
    }

    #[test]
    fn house_edge_out_of_range_is_rejected() {
        let mut env = base_env();
        env.insert("HOUSE_EDGE".into(), "1.5".into());
        let err = Config::from_map(&env).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "HOUSE_EDGE", .. }));
    }
}
