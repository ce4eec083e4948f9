//! Minimal hand-rolled HTTP/1.1 request-line, header, and query-string
//! parsing, in the teacher's own style of speaking raw `TcpStream` rather
//! than reaching for a framework — see `prometheus/server.rs`'s
//! `handle_metrics_request`, generalized here from a single fixed response
//! to full method/path/query/body handling (spec.md §4.5, §6).

use std::collections::HashMap;

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// A parsed request: method, path (without query string), query-string
/// parameters, and body bytes (only populated for `/upload`).
pub struct Request {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }
}

/// A response to write back: status line, content type, and body.
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Response {
    pub fn text(status: u16, body: impl Into<String>) -> Response {
        Response {
            status,
            content_type: "text/plain",
            body: body.into().into_bytes(),
        }
    }

    pub fn octet_stream(body: Vec<u8>) -> Response {
        Response {
            status: 200,
            content_type: "application/octet-stream",
            body,
        }
    }
}

fn status_line(status: u16) -> &'static str {
    match status {
        200 => "200 OK",
        400 => "400 Bad Request",
        401 => "401 Unauthorized",
        403 => "403 Forbidden",
        404 => "404 Not Found",
        406 => "406 Not Acceptable",
        409 => "409 Conflict",
        410 => "410 Gone",
        416 => "416 Range Not Satisfiable",
        500 => "500 Internal Server Error",
        502 => "502 Bad Gateway",
        503 => "503 Service Unavailable",
        _ => "500 Internal Server Error",
    }
}

/// Read a single HTTP/1.1 request off `stream`: request line, headers (to
/// find `Content-Length`), and the body if one is declared.
pub async fn read_request(stream: &mut TcpStream) -> std::io::Result<Request> {
    let mut reader = BufReader::new(stream);
    let mut header_bytes = Vec::new();
    let mut byte = [0u8; 1];
    // Read until the blank line terminating the header block.
    while !header_bytes.ends_with(b"\r\n\r\n") {
        let n = reader.read(&mut byte).await?;
        if n == 0 {
            break;
        }
        header_bytes.push(byte[0]);
    }

    let header_text = String::from_utf8_lossy(&header_bytes);
    let mut lines = header_text.lines();
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("GET").to_string();
    let target = parts.next().unwrap_or("/").to_string();

    let mut content_length = 0usize;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }

    let (path, query) = split_target(&target);

    let mut body = vec![0u8; content_length];
    if content_length > 0 {
        reader.read_exact(&mut body).await?;
    }

    Ok(Request {
        method,
        path,
        query,
        body,
    })
}

pub async fn write_response(stream: &mut TcpStream, response: &Response) -> std::io::Result<()> {
    let headers = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nCache-Control: no-cache\r\nAccess-Control-Allow-Origin: *\r\nConnection: close\r\n\r\n",
        status_line(response.status),
        response.content_type,
        response.body.len(),
    );
    stream.write_all(headers.as_bytes()).await?;
    stream.write_all(&response.body).await?;
    stream.flush().await
}

/// Split a request target into its path and query-string map. `id=abc&n=10`
/// becomes `{"id": "abc", "n": "10"}`; a key with no `=` maps to an empty
/// string.
fn split_target(target: &str) -> (String, HashMap<String, String>) {
    match target.split_once('?') {
        Some((path, query)) => (path.to_string(), parse_query(query)),
        None => (target.to_string(), HashMap::new()),
    }
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (url_decode(k), url_decode(v)),
            None => (url_decode(pair), String::new()),
        })
        .collect()
}

/// Decode `application/x-www-form-urlencoded`-style `%XX` escapes and `+`.
fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                if let Ok(byte) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                    out.push(byte);
                    i += 3;
                } else {
                    out.push(bytes[i]);
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_target_parses_path_and_query() {
        let (path, query) = split_target("/execute_query?id=abc123&query=scan%28foo%29&save=csv%2B");
        assert_eq!(path, "/execute_query");
        assert_eq!(query.get("id").unwrap(), "abc123");
        assert_eq!(query.get("query").unwrap(), "scan(foo)");
        assert_eq!(query.get("save").unwrap(), "csv+");
    }

    #[test]
    fn split_target_without_query() {
        let (path, query) = split_target("/version");
        assert_eq!(path, "/version");
        assert!(query.is_empty());
    }

    #[test]
    fn url_decode_handles_plus_and_percent_escapes() {
        assert_eq!(url_decode("a+b%2Bc"), "a b+c");
    }
}
