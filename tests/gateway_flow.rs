//! End-to-end flow test driving the request dispatcher against a fake
//! engine, mirroring spec.md §8's scenario 1 plus a couple of the drain
//! error scenarios (5 and 4). Grounded in the teacher's `tests/bdd` style of
//! standing up a real listener with `portpicker` and exercising the service
//! as a black box, scaled down to this gateway's single-binary shape (no
//! cucumber harness — the whole flow fits in one sequential test).

use std::collections::HashMap;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use query_gateway::config::{self, Config, General};
use query_gateway::dispatcher::dispatch;
use query_gateway::http::Request;
use query_gateway::pool;

/// A minimal stand-in for the analytic engine, speaking the gateway's own
/// AUTH/PREPARE/EXECUTE/COMPLETE/QUERY-cancel line protocol
/// (`src/engine/client.rs`). On `COMPLETE` it writes canned CSV content to
/// whatever path the matching `PREPARE`'s `save(...)` wrapping named, so
/// `/read_lines` has real staged output to drain.
async fn run_fake_engine(listener: TcpListener) {
    loop {
        let (stream, _) = match listener.accept().await {
            Ok(pair) => pair,
            Err(_) => return,
        };
        tokio::spawn(handle_fake_connection(stream));
    }
}

async fn handle_fake_connection(stream: TcpStream) {
    let mut reader = BufReader::new(stream);
    let mut output_path: Option<String> = None;
    let mut next_query_id = 1u64;

    loop {
        let mut line = String::new();
        let n = match reader.read_line(&mut line).await {
            Ok(n) => n,
            Err(_) => return,
        };
        if n == 0 {
            return;
        }
        let line = line.trim_end().to_string();

        if line.starts_with("AUTH") {
            write_line(&mut reader, "OK").await;
        } else if let Some(rest) = line.strip_prefix("PREPARE ") {
            output_path = extract_save_path(rest);
            let id = next_query_id;
            next_query_id += 1;
            write_line(&mut reader, &format!("OK 1.{id}")).await;
        } else if line.starts_with("EXECUTE ") {
            write_line(&mut reader, "OK").await;
        } else if line.starts_with("COMPLETE ") {
            if let Some(path) = &output_path {
                let _ = std::fs::write(path, "a,b\n1,2\n3,4\n");
            }
            write_line(&mut reader, "OK").await;
        } else if line.starts_with("QUERY cancel") {
            write_line(&mut reader, "OK").await;
        } else if line.starts_with("QUIT") {
            return;
        } else {
            write_line(&mut reader, "ERR unknown command").await;
        }
    }
}

async fn write_line(reader: &mut BufReader<TcpStream>, line: &str) {
    let stream = reader.get_mut();
    let _ = stream.write_all(line.as_bytes()).await;
    let _ = stream.write_all(b"\n").await;
    let _ = stream.flush().await;
}

/// Pull the staging path out of `save(<query>, '<path>', <instance>,
/// '<format>')` — the first single-quoted segment.
fn extract_save_path(prepare_text: &str) -> Option<String> {
    let start = prepare_text.find('\'')? + 1;
    let rest = &prepare_text[start..];
    let end = rest.find('\'')?;
    Some(rest[..end].to_string())
}

fn request(method: &str, path: &str, query: &[(&str, &str)]) -> Request {
    let mut map = HashMap::new();
    for (k, v) in query {
        map.insert(k.to_string(), v.to_string());
    }
    Request {
        method: method.to_string(),
        path: path.to_string(),
        query: map,
        body: Vec::new(),
    }
}

fn body_text(response: &query_gateway::http::Response) -> String {
    String::from_utf8(response.body.clone()).expect("response body is valid utf8")
}

#[tokio::test]
async fn end_to_end_acquire_execute_drain_release() {
    let tmp_dir = tempfile::tempdir().unwrap();

    let engine_port = portpicker::pick_unused_port().expect("no free local port for fake engine");
    let engine_listener = TcpListener::bind(("127.0.0.1", engine_port)).await.unwrap();
    tokio::spawn(run_fake_engine(engine_listener));

    let general = General {
        tmp_dir: tmp_dir.path().to_string_lossy().to_string(),
        engine_host: "127.0.0.1".to_string(),
        engine_port,
        max_sessions: 4,
        timeout_secs: 60,
        ..General::default()
    };
    config::set_config(Config {
        general: general.clone(),
    });
    pool::init(
        general.effective_max_sessions(),
        general.effective_timeout_secs(),
        general.tmp_dir.clone(),
        general.engine_host.clone(),
        general.engine_port,
    );

    // --- scenario 1: acquire, execute with save=csv+, read_lines, release ---
    let resp = dispatch(request("GET", "/new_session", &[])).await;
    assert_eq!(resp.status, 200);
    let id = body_text(&resp);
    assert_eq!(id.len(), 32);

    let resp = dispatch(request(
        "GET",
        "/execute_query",
        &[("id", &id), ("query", "list('instances')"), ("save", "csv+")],
    ))
    .await;
    assert_eq!(resp.status, 200, "execute_query failed: {}", body_text(&resp));
    let query_id: u64 = body_text(&resp).parse().expect("numeric query id");
    assert!(query_id > 0);

    let resp = dispatch(request("GET", "/read_lines", &[("id", &id), ("n", "1000")])).await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.content_type, "text/plain");
    assert_eq!(body_text(&resp), "a,b\n1,2\n3,4\n");

    // A second read_lines call finds the cursor already at EOF (scenario-3
    // style law: sequential drains never repeat bytes already returned).
    let resp = dispatch(request("GET", "/read_lines", &[("id", &id), ("n", "1000")])).await;
    assert_eq!(resp.status, 416);

    let resp = dispatch(request("GET", "/release_session", &[("id", &id)])).await;
    assert_eq!(resp.status, 200);

    // Releasing returns the slot to AVAILABLE: a second lookup 404s, and no
    // staging files remain on disk (spec.md §8 invariants).
    assert!(pool::get().find(&id).is_none());
    let leftover = std::fs::read_dir(tmp_dir.path()).unwrap().count();
    assert_eq!(leftover, 0, "staging files must be unlinked on release");

    // --- scenario 5: save=csv+ (text) then /read_bytes mismatches format ---
    let resp = dispatch(request("GET", "/new_session", &[])).await;
    assert_eq!(resp.status, 200);
    let id2 = body_text(&resp);

    let resp = dispatch(request(
        "GET",
        "/execute_query",
        &[("id", &id2), ("query", "list('instances')"), ("save", "csv+")],
    ))
    .await;
    assert_eq!(resp.status, 200);

    let resp = dispatch(request("GET", "/read_bytes", &[("id", &id2), ("n", "16")])).await;
    assert_eq!(resp.status, 416);
    assert_eq!(body_text(&resp), "output not saved in binary format");

    // --- scenario 4: no save at all, /read_bytes is 410 Gone ---
    let resp = dispatch(request("GET", "/new_session", &[])).await;
    assert_eq!(resp.status, 200);
    let id3 = body_text(&resp);

    let resp = dispatch(request("GET", "/read_bytes", &[("id", &id3), ("n", "16")])).await;
    assert_eq!(resp.status, 410);

    let resp = dispatch(request("GET", "/cancel", &[("id", &id3)])).await;
    assert_eq!(resp.status, 409, "no query in flight on id3 yet");

    // Clean up the remaining two sessions so the pool doesn't leak staging
    // files past the end of the test.
    let resp = dispatch(request("GET", "/release_session", &[("id", &id2)])).await;
    assert_eq!(resp.status, 200);
    let resp = dispatch(request("GET", "/release_session", &[("id", &id3)])).await;
    assert_eq!(resp.status, 200);

    // --- lookup failures against an id that now names nothing at all ---
    // Kept inside this same test function rather than a separate
    // `#[tokio::test]`: the session pool is a single process-wide
    // `OnceCell` (spec.md §4.1's singleton), so a second test function
    // calling `dispatch` before this one has run `pool::init` would panic.
    let resp = dispatch(request("GET", "/release_session", &[("id", "does-not-exist")])).await;
    assert_eq!(resp.status, 404);

    let resp = dispatch(request("GET", "/execute_query", &[("id", "nope"), ("query", "scan(x)")])).await;
    assert_eq!(resp.status, 404);

    let resp = dispatch(request("GET", "/execute_query", &[("id", "nope")])).await;
    assert_eq!(resp.status, 400, "missing required `query` param");
}
