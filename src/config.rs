//! Configuration for the query gateway.
//!
//! Layered the way the teacher layers `config/general.rs` + `config/mod.rs`:
//! a `#[serde(default = "...")]` struct with associated `default_*()`
//! functions, stored behind an `ArcSwap` so a SIGHUP reload can swap it out
//! without disturbing in-flight requests.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use arc_swap::ArcSwap;
use once_cell::sync::Lazy;
use serde_derive::{Deserialize, Serialize};

use crate::errors::Error;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// One `host:port` the gateway listens on for client HTTP traffic.
/// An `s` suffix on the port in the CLI/config surface marks the listener as
/// TLS-fronted; TLS termination itself is an external collaborator (spec.md
/// §1), so this flag is carried as metadata only and acted on by whatever
/// reverse proxy or `native-tls`-style layer sits in front.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSpec {
    pub port: u16,
    pub tls: bool,
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tls {
            write!(f, "{}s", self.port)
        } else {
            write!(f, "{}", self.port)
        }
    }
}

impl FromStr for PortSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(digits) = s.strip_suffix('s') {
            let port = digits
                .parse()
                .map_err(|_| Error::BadConfig(format!("invalid port spec {s:?}")))?;
            Ok(PortSpec { port, tls: true })
        } else {
            let port = s
                .parse()
                .map_err(|_| Error::BadConfig(format!("invalid port spec {s:?}")))?;
            Ok(PortSpec { port, tls: false })
        }
    }
}

/// General configuration, mirroring spec.md §6's "Configuration surface".
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct General {
    #[serde(default = "General::default_http_ports")]
    pub http_ports: Vec<PortSpec>,

    #[serde(default = "General::default_metrics_host")]
    pub metrics_host: IpAddr,

    #[serde(default = "General::default_metrics_port")]
    pub metrics_port: u16,

    #[serde(default = "General::default_document_root")]
    pub document_root: String,

    #[serde(default = "General::default_engine_host")]
    pub engine_host: String,

    #[serde(default = "General::default_engine_port")]
    pub engine_port: u16,

    #[serde(default = "General::default_tmp_dir")]
    pub tmp_dir: String,

    #[serde(default = "General::default_max_sessions")]
    pub max_sessions: usize,

    #[serde(default = "General::default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub save_instance_id: u32,

    #[serde(default)]
    pub use_aio: bool,

    #[serde(default = "General::default_engine_log_path")]
    pub engine_log_path: String,

    #[serde(default = "General::default_pid_file")]
    pub pid_file: String,
}

/// Hard cap on `max_sessions`, per spec.md §6 ("max sessions ... hard cap 100").
pub const MAX_SESSIONS_CAP: usize = 100;
/// Floor on `timeout_secs`, per spec.md §6 ("timeout ... min 60").
pub const TIMEOUT_FLOOR_SECS: u64 = 60;

impl General {
    pub fn default_http_ports() -> Vec<PortSpec> {
        vec![
            PortSpec {
                port: 8080,
                tls: false,
            },
            PortSpec {
                port: 8083,
                tls: true,
            },
        ]
    }

    pub fn default_metrics_host() -> IpAddr {
        IpAddr::from([0, 0, 0, 0])
    }

    pub fn default_metrics_port() -> u16 {
        9090
    }

    pub fn default_document_root() -> String {
        String::new()
    }

    pub fn default_engine_host() -> String {
        "localhost".to_string()
    }

    pub fn default_engine_port() -> u16 {
        1239
    }

    pub fn default_tmp_dir() -> String {
        "/tmp".to_string()
    }

    pub fn default_max_sessions() -> usize {
        50
    }

    pub fn default_timeout_secs() -> u64 {
        60
    }

    pub fn default_engine_log_path() -> String {
        String::new()
    }

    pub fn default_pid_file() -> String {
        "/tmp/query-gateway.pid".to_string()
    }

    /// Clamp `max_sessions` to [1, MAX_SESSIONS_CAP] the way the original
    /// refuses more than 100 slots outright.
    pub fn effective_max_sessions(&self) -> usize {
        self.max_sessions.clamp(1, MAX_SESSIONS_CAP)
    }

    /// Floor `timeout_secs` at TIMEOUT_FLOOR_SECS.
    pub fn effective_timeout_secs(&self) -> u64 {
        self.timeout_secs.max(TIMEOUT_FLOOR_SECS)
    }
}

impl Default for General {
    fn default() -> General {
        General {
            http_ports: Self::default_http_ports(),
            metrics_host: Self::default_metrics_host(),
            metrics_port: Self::default_metrics_port(),
            document_root: Self::default_document_root(),
            engine_host: Self::default_engine_host(),
            engine_port: Self::default_engine_port(),
            tmp_dir: Self::default_tmp_dir(),
            max_sessions: Self::default_max_sessions(),
            timeout_secs: Self::default_timeout_secs(),
            save_instance_id: 0,
            use_aio: false,
            engine_log_path: Self::default_engine_log_path(),
            pid_file: Self::default_pid_file(),
        }
    }
}

/// Configuration wrapper, kept as a thin struct around `General` in case
/// future revisions grow sibling sections the way the teacher's `Config`
/// grows `prometheus`/`talos`/`pools` alongside `general`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub general: General,
}

/// Globally available configuration, swapped atomically on SIGHUP reload.
static CONFIG: Lazy<ArcSwap<Config>> = Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// Get a read-only snapshot of the configuration from anywhere in the app.
pub fn get_config() -> std::sync::Arc<Config> {
    CONFIG.load_full()
}

pub fn set_config(config: Config) {
    CONFIG.store(std::sync::Arc::new(config));
}

/// Parse the configuration file located at `path` (TOML only — this gateway
/// has a single flat config with no multi-pool include-file merging, so the
/// teacher's YAML/include-merge machinery has no remaining use here).
pub async fn parse(path: &str) -> Result<Config, Error> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|err| Error::BadConfig(format!("could not open {path:?}: {err}")))?;
    let config: Config = toml::from_str(&contents)
        .map_err(|err| Error::BadConfig(format!("TOML parse error in {path:?}: {err}")))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_spec_parses_plain_and_tls() {
        assert_eq!(
            "8080".parse::<PortSpec>().unwrap(),
            PortSpec {
                port: 8080,
                tls: false
            }
        );
        assert_eq!(
            "8083s".parse::<PortSpec>().unwrap(),
            PortSpec {
                port: 8083,
                tls: true
            }
        );
    }

    #[test]
    fn defaults_match_spec() {
        let general = General::default();
        assert_eq!(general.effective_max_sessions(), 50);
        assert_eq!(general.effective_timeout_secs(), 60);
        assert_eq!(general.engine_port, 1239);
        assert_eq!(general.tmp_dir, "/tmp");
    }

    #[test]
    fn max_sessions_clamps_to_hard_cap() {
        let mut general = General::default();
        general.max_sessions = 10_000;
        assert_eq!(general.effective_max_sessions(), MAX_SESSIONS_CAP);
    }

    #[test]
    fn timeout_floors_at_sixty() {
        let mut general = General::default();
        general.timeout_secs = 1;
        assert_eq!(general.effective_timeout_secs(), TIMEOUT_FLOOR_SECS);
    }
}
