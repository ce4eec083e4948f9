pub mod args;
pub mod logger;
pub mod server;

pub use args::{parse, Args};
pub use logger::init_logging;
pub use server::run_server;

use crate::config::{Config, General, PortSpec};
use crate::errors::Error;

/// Load configuration from `args.config_file` if present, falling back to
/// defaults, then apply any CLI overrides on top. Mirrors the teacher's
/// "file provides the baseline, flags win" layering.
pub async fn load_config(args: &Args) -> Result<Config, Error> {
    let mut config = if tokio::fs::metadata(&args.config_file).await.is_ok() {
        crate::config::parse(&args.config_file).await?
    } else {
        Config::default()
    };

    apply_overrides(&mut config.general, args)?;
    Ok(config)
}

fn apply_overrides(general: &mut General, args: &Args) -> Result<(), Error> {
    if let Some(ports) = &args.http_ports {
        general.http_ports = ports
            .iter()
            .map(|s| s.parse::<PortSpec>())
            .collect::<Result<Vec<_>, _>>()?;
    }
    if let Some(root) = &args.document_root {
        general.document_root = root.clone();
    }
    if let Some(host) = &args.engine_host {
        general.engine_host = host.clone();
    }
    if let Some(port) = args.engine_port {
        general.engine_port = port;
    }
    if let Some(dir) = &args.tmp_dir {
        general.tmp_dir = dir.clone();
    }
    if let Some(max) = args.max_sessions {
        general.max_sessions = max;
    }
    if let Some(timeout) = args.timeout_secs {
        general.timeout_secs = timeout;
    }
    if let Some(instance) = args.save_instance_id {
        general.save_instance_id = instance;
    }
    if args.use_aio {
        general.use_aio = true;
    }
    Ok(())
}
