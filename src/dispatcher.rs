//! Request Dispatcher: maps request paths to session-pool, executor, and
//! drain operations, extracting every parameter from the query string
//! (spec.md §4.5, §6).
//!
//! Grounded in `prometheus/server.rs`'s hand-rolled-`TcpStream` HTTP handler
//! shape, generalized from one fixed response to the gateway's full route
//! table. Every blocking call into the pool (`acquire`, `execute`, `cancel`,
//! `read_bytes`/`read_lines`) runs on a `spawn_blocking` task — the
//! "parallel workers" model of spec.md §5, where a query may hold a worker
//! for its full duration without starving the async reactor.

use std::path::{Component, Path, PathBuf};

use tracing::{info, warn};

use crate::config::get_config;
use crate::drain;
use crate::errors::Error;
use crate::executor::{self, ExecuteParams};
use crate::http::{Request, Response};
use crate::pool;

/// Session ids are logged truncated to this many characters — the
/// original's `SESSIONID_SHOW_LEN` convention (a real operational
/// affordance, not an artifact of the source language).
const SESSIONID_SHOW_LEN: usize = 6;

fn short(id: &str) -> &str {
    &id[..id.len().min(SESSIONID_SHOW_LEN)]
}

pub async fn dispatch(req: Request) -> Response {
    crate::prometheus::record_request(&req.path);
    let result = route(req).await;
    match result {
        Ok(response) => response,
        Err(err) => {
            warn!("request failed: {err}");
            Response::text(err.status_code(), err.to_string())
        }
    }
}

async fn route(req: Request) -> Result<Response, Error> {
    match (req.method.as_str(), req.path.as_str()) {
        ("GET", "/new_session") => new_session(req).await,
        ("GET" | "POST", "/release_session") => release_session(req).await,
        ("GET" | "POST", "/cancel") => cancel(req).await,
        ("POST" | "PUT", "/upload") => upload(req).await,
        ("GET", "/execute_query") => execute_query(req).await,
        ("GET", "/read_bytes") => read_bytes(req).await,
        ("GET", "/read_lines") => read_lines(req).await,
        ("GET", "/version") => Ok(Response::text(200, crate::config::VERSION)),
        ("GET", "/get_log") => get_log().await,
        ("GET", path) => static_file(path).await,
        _ => Ok(Response::text(404, "not found")),
    }
}

async fn new_session(req: Request) -> Result<Response, Error> {
    let user = req.param("user").map(str::to_string);
    let password = req.param("password").map(str::to_string);
    let id = tokio::task::spawn_blocking(move || {
        pool::get().acquire(user.as_deref(), password.as_deref())
    })
    .await
    .expect("blocking acquire task panicked")?;
    info!("new_session[{}]: ok", short(&id));
    Ok(Response::text(200, id))
}

async fn release_session(req: Request) -> Result<Response, Error> {
    let id = required(&req, "id")?.to_string();
    tokio::task::spawn_blocking(move || pool::get().release(&id))
        .await
        .expect("blocking release task panicked")?;
    Ok(Response::text(200, ""))
}

async fn cancel(req: Request) -> Result<Response, Error> {
    let id = required(&req, "id")?.to_string();
    tokio::task::spawn_blocking(move || executor::cancel(&id))
        .await
        .expect("blocking cancel task panicked")?;
    Ok(Response::text(200, ""))
}

async fn upload(mut req: Request) -> Result<Response, Error> {
    let id = required(&req, "id")?.to_string();
    if req.body.is_empty() {
        return Err(Error::EmptyUpload);
    }
    let body = std::mem::take(&mut req.body);

    let path = tokio::task::spawn_blocking(move || -> Result<String, Error> {
        let slot = pool::get().find(&id).ok_or(crate::pool::PoolError::NotFound)?;
        slot.mark_busy();
        let result = slot.with_lock(|inner| -> Result<String, Error> {
            let input_path = inner
                .staging
                .as_ref()
                .expect("unavailable slot has staging buffers")
                .input_path
                .clone();
            std::fs::write(&input_path, &body)?;
            Ok(input_path.display().to_string())
        });
        slot.mark_idle();
        result
    })
    .await
    .expect("blocking upload task panicked")?;

    Ok(Response::text(200, path))
}

async fn execute_query(req: Request) -> Result<Response, Error> {
    let id = required(&req, "id")?.to_string();
    let query = required(&req, "query")?.to_string();
    let params = ExecuteParams {
        id,
        query,
        save: req.param("save").map(str::to_string),
        prefix: req.param("prefix").map(str::to_string),
        release: req.param("release").map(|v| v != "0").unwrap_or(false),
    };

    let query_id = tokio::task::spawn_blocking(move || executor::execute(&params))
        .await
        .expect("blocking execute task panicked")?;
    Ok(Response::text(200, query_id))
}

async fn read_bytes(req: Request) -> Result<Response, Error> {
    let id = required(&req, "id")?.to_string();
    let n = parse_n(&req)?;
    let bytes = tokio::task::spawn_blocking(move || drain::read_bytes(&id, n))
        .await
        .expect("blocking read_bytes task panicked")?;
    Ok(Response::octet_stream(bytes))
}

async fn read_lines(req: Request) -> Result<Response, Error> {
    let id = required(&req, "id")?.to_string();
    let n = parse_n(&req)?;
    let bytes = tokio::task::spawn_blocking(move || drain::read_lines(&id, n))
        .await
        .expect("blocking read_lines task panicked")?;
    Ok(Response {
        status: 200,
        content_type: "text/plain",
        body: bytes,
    })
}

async fn get_log() -> Result<Response, Error> {
    let config = get_config();
    if config.general.engine_log_path.is_empty() {
        return Ok(Response::text(200, ""));
    }
    let path = config.general.engine_log_path.clone();
    let tail = tokio::task::spawn_blocking(move || tail_log(&path, 200))
        .await
        .expect("blocking get_log task panicked")?;
    Ok(Response::text(200, tail))
}

/// Tail the last `lines` lines of the configured engine log. Supplements
/// spec.md §6's `/get_log` endpoint with a direct read of a configured log
/// path instead of the original's `ps axu | grep SciDB` discovery, which is
/// an artifact of the original's single-host co-location assumption rather
/// than behavior worth preserving (spec.md §10).
fn tail_log(path: &str, lines: usize) -> Result<String, Error> {
    let contents = std::fs::read_to_string(path)?;
    let tail: Vec<&str> = contents.lines().rev().take(lines).collect();
    Ok(tail.into_iter().rev().collect::<Vec<_>>().join("\n"))
}

/// Serve `{document_root}/{path}`, defaulting to `index.html` at `/`.
/// Any path component containing `.htpasswd` is rejected outright
/// (spec.md §6, 403), and `..` components are rejected to keep the
/// served tree inside `document_root`.
async fn static_file(path: &str) -> Result<Response, Error> {
    let config = get_config();
    if config.general.document_root.is_empty() {
        return Ok(Response::text(404, "not found"));
    }

    if path.contains(".htpasswd") {
        return Err(Error::ForbiddenPath);
    }

    let relative = if path == "/" { "index.html" } else { path.trim_start_matches('/') };
    let mut full = PathBuf::from(&config.general.document_root);
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => full.push(part),
            Component::CurDir => {}
            _ => return Err(Error::ForbiddenPath),
        }
    }

    let contents = tokio::fs::read(&full).await?;
    let content_type = content_type_for(&full);
    Ok(Response {
        status: 200,
        content_type,
        body: contents,
    })
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

fn required<'a>(req: &'a Request, key: &str) -> Result<&'a str, Error> {
    req.param(key).filter(|v| !v.is_empty()).ok_or(Error::MissingArguments)
}

fn parse_n(req: &Request) -> Result<i64, Error> {
    required(req, "n")?
        .parse::<i64>()
        .map_err(|_| Error::MissingArguments)
}
