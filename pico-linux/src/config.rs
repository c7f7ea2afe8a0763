//! Load config from file and environment.

use serde::Deserialize;
use std::path::PathBuf;
use tracing::warn;

/// Daemon configuration. File: ~/.config/picoconfig/config.toml or /etc/picoconfig/config.toml.
/// Env overrides: PICOCONFIG_LINK_ADDR, PICOCONFIG_ROUND_TRIP_BUDGET, PICOCONFIG_TICK_MS.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Address of the byte link (serial-over-TCP bridge). Default 127.0.0.1:4000.
    #[serde(default = "default_link_addr")]
    pub link_addr: String,
    /// Response budget in milliseconds.
    #[serde(default = "default_round_trip_budget")]
    pub round_trip_budget: u32,
    /// Engine tick period in milliseconds (default 10).
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Registers served to the peer.
    #[serde(default)]
    pub registers: Vec<RegisterConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterConfig {
    pub id: u8,
    #[serde(default)]
    pub value: Vec<u8>,
}

fn default_link_addr() -> String {
    "127.0.0.1:4000".to_string()
}
fn default_round_trip_budget() -> u32 {
    pico_core::DEFAULT_ROUND_TRIP_BUDGET
}
fn default_tick_ms() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            link_addr: default_link_addr(),
            round_trip_budget: default_round_trip_budget(),
            tick_ms: default_tick_ms(),
            registers: Vec::new(),
        }
    }
}

impl Config {
    pub fn engine_config(&self) -> pico_core::Config {
        pico_core::Config::with_round_trip_budget(self.round_trip_budget)
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let c = load_file().unwrap_or_default();
    apply_overrides(c, |k| std::env::var(k).ok())
}

fn apply_overrides(mut c: Config, var: impl Fn(&str) -> Option<String>) -> Config {
    if let Some(s) = var("PICOCONFIG_LINK_ADDR") {
        c.link_addr = s;
    }
    if let Some(s) = var("PICOCONFIG_ROUND_TRIP_BUDGET") {
        match s.parse::<u32>() {
            Ok(v) => c.round_trip_budget = v,
            Err(_) => warn!(value = %s, "ignoring invalid PICOCONFIG_ROUND_TRIP_BUDGET"),
        }
    }
    if let Some(s) = var("PICOCONFIG_TICK_MS") {
        match s.parse::<u64>() {
            Ok(v) if v > 0 => c.tick_ms = v,
            _ => warn!(value = %s, "ignoring invalid PICOCONFIG_TICK_MS"),
        }
    }
    c
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/picoconfig/config.toml"));
    }
    out.push(PathBuf::from("/etc/picoconfig/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            match std::fs::read_to_string(&p) {
                Ok(s) => match toml::from_str::<Config>(&s) {
                    Ok(c) => return Some(c),
                    Err(e) => warn!(path = %p.display(), error = %e, "invalid config file"),
                },
                Err(e) => warn!(path = %p.display(), error = %e, "cannot read config file"),
            }
            break;
        }
    }
    None
}
