//! Command-line surface for the query gateway. Every flag mirrors a field
//! of [`crate::config::General`] and overrides it after the config file is
//! loaded, the way the teacher layers CLI flags over its TOML config.

use std::fmt;

use clap::{Parser, ValueEnum};
use tracing::Level;

/// Stateless HTTP gateway in front of the analytic engine's native query
/// protocol.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[arg(default_value_t = String::from("query-gateway.toml"), env = "QUERY_GATEWAY_CONFIG_FILE")]
    pub config_file: String,

    #[arg(short = 'p', long = "http-ports", value_delimiter = ',')]
    pub http_ports: Option<Vec<String>>,

    #[arg(short = 'r', long = "document-root")]
    pub document_root: Option<String>,

    #[arg(short = 'n', long = "engine-host")]
    pub engine_host: Option<String>,

    #[arg(short = 's', long = "engine-port")]
    pub engine_port: Option<u16>,

    #[arg(short = 't', long = "tmp-dir")]
    pub tmp_dir: Option<String>,

    #[arg(short = 'm', long = "max-sessions")]
    pub max_sessions: Option<usize>,

    #[arg(short = 'o', long = "timeout")]
    pub timeout_secs: Option<u64>,

    #[arg(short = 'i', long = "save-instance")]
    pub save_instance_id: Option<u32>,

    #[arg(short = 'a', long = "accelerated-save", default_value_t = false)]
    pub use_aio: bool,

    #[arg(short = 'f', long, default_value_t = false, help = "stay in the foreground instead of daemonizing")]
    pub foreground: bool,

    #[arg(short, long, default_value_t = tracing::Level::INFO, env)]
    pub log_level: Level,

    #[clap(short = 'F', long, value_enum, default_value_t = LogFormat::Text, env)]
    pub log_format: LogFormat,

    #[arg(long, default_value_t = false, env, help = "disable colors in the log output")]
    pub no_color: bool,
}

pub fn parse() -> Args {
    Args::parse()
}

#[derive(ValueEnum, Clone, Debug)]
pub enum LogFormat {
    Text,
    Structured,
    Debug,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Structured => write!(f, "structured"),
            LogFormat::Debug => write!(f, "debug"),
        }
    }
}
