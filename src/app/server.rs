//! Process bootstrap: listener setup for every configured HTTP port, the
//! metrics exporter task, and the signal-driven shutdown/reload loop.
//!
//! Grounded in the teacher's `run_server`: a hand-built multi-thread runtime,
//! `TcpSocket` configured with `reuseaddr`/`reuseport`/`nodelay`/zero-linger,
//! and a `tokio::select!` loop over SIGHUP/SIGINT/SIGTERM. The postgres
//! wire-protocol accept loop is replaced with the gateway's HTTP request/
//! response cycle; TLS setup and binary-upgrade fd inheritance have no
//! counterpart here (TLS termination is an external collaborator, and there
//! is no hot-upgrade requirement) and are dropped rather than ported.

use std::net::ToSocketAddrs;
use std::time::Duration;

use socket2::SockRef;
use tokio::net::TcpSocket;
#[cfg(not(windows))]
use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tokio::runtime::Builder;
use tracing::{error, info, warn};

use crate::app::args::Args;
use crate::config::{set_config, Config};
use crate::dispatcher::dispatch;
use crate::http;
use crate::pool;

pub fn run_server(args: Args, config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = Builder::new_multi_thread()
        .enable_all()
        .thread_name("worker-query-gateway")
        .build()?;

    let config_file = args.config_file.clone();
    if !args.foreground {
        info!("daemonizing is not supported by this build; staying in the foreground");
    }

    runtime.block_on(async move {
        if !config.general.pid_file.is_empty() {
            if let Err(err) = tokio::fs::write(&config.general.pid_file, std::process::id().to_string()).await {
                warn!("could not write pid file {}: {err}", config.general.pid_file);
            }
        }

        pool::init(
            config.general.effective_max_sessions(),
            config.general.effective_timeout_secs(),
            config.general.tmp_dir.clone(),
            config.general.engine_host.clone(),
            config.general.engine_port,
        );

        for port in &config.general.http_ports {
            let listener = bind_listener(port.port)?;
            info!("listening on {} (tls={})", port.port, port.tls);
            tokio::task::spawn(accept_loop(listener));
        }

        let metrics_addr = format!("{}:{}", config.general.metrics_host, config.general.metrics_port);
        tokio::task::spawn(async move {
            crate::prometheus::start_prometheus_server(&metrics_addr).await;
        });

        #[cfg(not(windows))]
        let mut sighup = unix_signal(SignalKind::hangup())?;
        #[cfg(not(windows))]
        let mut sigterm = unix_signal(SignalKind::terminate())?;
        #[cfg(not(windows))]
        let mut sigint = unix_signal(SignalKind::interrupt())?;

        info!("query gateway ready");
        loop {
            #[cfg(not(windows))]
            tokio::select! {
                _ = sighup.recv() => {
                    info!("reloading config");
                    match crate::config::parse(&config_file).await {
                        Ok(new_config) => set_config(new_config),
                        Err(err) => error!("config reload failed: {err}"),
                    }
                }
                _ = sigint.recv() => {
                    info!("got SIGINT, shutting down");
                    shutdown().await;
                    break;
                }
                _ = sigterm.recv() => {
                    info!("got SIGTERM, shutting down");
                    shutdown().await;
                    break;
                }
            }
            #[cfg(windows)]
            {
                tokio::signal::ctrl_c().await.ok();
                shutdown().await;
                break;
            }
        }

        Ok::<(), Box<dyn std::error::Error>>(())
    })?;

    Ok(())
}

fn bind_listener(port: u16) -> std::io::Result<tokio::net::TcpListener> {
    let addr = format!("0.0.0.0:{port}")
        .to_socket_addrs()?
        .next()
        .expect("resolves to at least one address");

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.set_reuseport(true)?;
    socket.set_nodelay(true)?;
    {
        let sock_ref = SockRef::from(&socket);
        sock_ref.set_linger(Some(Duration::from_secs(0)))?;
    }
    socket.bind(addr)?;
    socket.listen(1024)
}

async fn accept_loop(listener: tokio::net::TcpListener) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                warn!("accept failed: {err}");
                continue;
            }
        };
        tokio::task::spawn(async move {
            if let Err(err) = serve_connection(stream).await {
                warn!("connection from {peer} failed: {err}");
            }
        });
    }
}

async fn serve_connection(mut stream: tokio::net::TcpStream) -> std::io::Result<()> {
    let request = http::read_request(&mut stream).await?;
    let response = dispatch(request).await;
    http::write_response(&mut stream, &response).await
}

/// Drain every session slot before the process exits, so the engine never
/// sees connections dangling from a killed gateway.
///
/// `Slot::cleanup` calls `Handle::block_on` to disconnect the engine
/// connections, which panics if run directly on a task already being
/// driven by this same `runtime.block_on` call in `run_server`. Running it
/// inside `spawn_blocking` gives it its own blocking-pool thread, where
/// `block_on` is legal, matching how `pool::SessionPool::acquire` and
/// `executor::run` already bridge this sync section to the async engine
/// adapter.
async fn shutdown() {
    let _ = tokio::task::spawn_blocking(|| {
        for slot in pool::get().slots() {
            if !slot.is_available() {
                slot.cleanup();
            }
        }
    })
    .await;
}
