//! Concrete engine connection: a blocking-style client over a plain TCP
//! socket to the engine's query coordinator. The wire protocol itself is an
//! external collaborator (spec.md §1) — this adapter only needs to present
//! connect/prepare/execute-prepared/complete/cancel/disconnect, so it speaks
//! a minimal newline-delimited command/response protocol rather than
//! reimplementing any particular analytic database's native framing.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use super::{EngineError, QueryId};

/// One connection into the engine. A [`crate::pool::Slot`] holds two of
/// these: `conn[0]` for the primary query, `conn[1]` reserved for
/// out-of-band cancel, per spec.md §3.
pub struct EngineClient {
    reader: BufReader<TcpStream>,
}

impl EngineClient {
    /// Open a new connection and perform the engine's auth handshake.
    pub async fn connect(
        host: &str,
        port: u16,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Result<EngineClient, EngineError> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|err| EngineError::ConnectFailed(err.to_string()))?;
        let mut client = EngineClient {
            reader: BufReader::new(stream),
        };
        client
            .send_line(&format!(
                "AUTH {} {}",
                user.unwrap_or(""),
                password.unwrap_or("")
            ))
            .await
            .map_err(|err| EngineError::ConnectFailed(err.to_string()))?;
        let reply = client
            .read_line()
            .await
            .map_err(|err| EngineError::ConnectFailed(err.to_string()))?;
        if let Some(message) = reply.strip_prefix("ERR ") {
            return Err(EngineError::AuthFailed(message.to_string()));
        }
        Ok(client)
    }

    /// Prepare `query` for execution. Returns the query id the engine
    /// assigned, which is also what a later `cancel` on the sibling
    /// connection targets.
    pub async fn prepare(&mut self, query: &str) -> Result<QueryId, EngineError> {
        self.send_line(&format!("PREPARE {query}"))
            .await
            .map_err(transport_err)?;
        let reply = self.read_line().await.map_err(transport_err)?;
        parse_query_id_reply(&reply)
    }

    /// Execute the query previously prepared as `query_id`. Blocks until the
    /// engine finishes the execution phase (not `complete`, which may block
    /// further on result materialization).
    pub async fn execute_prepared(&mut self, query_id: QueryId) -> Result<(), EngineError> {
        self.send_line(&format!(
            "EXECUTE {}.{}",
            query_id.coordinator_id, query_id.query_id
        ))
        .await
        .map_err(transport_err)?;
        let reply = self.read_line().await.map_err(transport_err)?;
        expect_ok(&reply)
    }

    /// Block until the query's result has been fully materialized (into the
    /// save-wrapped staging buffer, if any). This is the engine call the
    /// gateway's worker can spend arbitrarily long inside.
    pub async fn complete(&mut self, query_id: QueryId) -> Result<(), EngineError> {
        self.send_line(&format!(
            "COMPLETE {}.{}",
            query_id.coordinator_id, query_id.query_id
        ))
        .await
        .map_err(transport_err)?;
        let reply = self.read_line().await.map_err(transport_err)?;
        expect_ok(&reply)
    }

    /// Inject a cancel for `query_id` over this connection. Intended to be
    /// called on `conn[1]` while `conn[0]` is blocked in `complete`.
    pub async fn cancel(&mut self, query_id: QueryId) -> Result<(), EngineError> {
        self.send_line(&format!(
            "QUERY cancel('{}.{}')",
            query_id.coordinator_id, query_id.query_id
        ))
        .await
        .map_err(transport_err)?;
        let reply = self.read_line().await.map_err(transport_err)?;
        expect_ok(&reply)
    }

    /// Gracefully disconnect. Errors here are not actionable — the slot is
    /// being torn down regardless — so callers log and move on.
    pub async fn disconnect(mut self) {
        let _ = self.send_line("QUIT").await;
    }

    async fn send_line(&mut self, line: &str) -> std::io::Result<()> {
        let stream = self.reader.get_mut();
        stream.write_all(line.as_bytes()).await?;
        stream.write_all(b"\n").await?;
        stream.flush().await
    }

    async fn read_line(&mut self) -> std::io::Result<String> {
        let mut line = String::new();
        self.reader.read_line(&mut line).await?;
        Ok(line.trim_end().to_string())
    }
}

/// A failure at the transport layer (socket write/read) is always
/// connection-fatal — there is no engine reply to classify, the connection
/// itself is gone. Distinct from [`EngineError::from_query_error`], which
/// classifies the engine's own "ERR ..." text per spec.md §4.3.
fn transport_err(err: std::io::Error) -> EngineError {
    crate::prometheus::record_engine_error(crate::engine::ErrorClass::ConnectionFatal);
    EngineError::ConnectionFatal(err.to_string())
}

fn expect_ok(reply: &str) -> Result<(), EngineError> {
    if let Some(message) = reply.strip_prefix("ERR ") {
        return Err(EngineError::from_query_error(message.to_string()));
    }
    Ok(())
}

fn parse_query_id_reply(reply: &str) -> Result<QueryId, EngineError> {
    if let Some(message) = reply.strip_prefix("ERR ") {
        return Err(EngineError::from_query_error(message.to_string()));
    }
    let ids = reply
        .strip_prefix("OK ")
        .ok_or_else(|| EngineError::from_query_error(format!("malformed reply {reply:?}")))?;
    let (coord, qid) = ids
        .split_once('.')
        .ok_or_else(|| EngineError::from_query_error(format!("malformed query id {ids:?}")))?;
    let coordinator_id: u64 = coord
        .parse()
        .map_err(|_| EngineError::from_query_error(format!("malformed coordinator id {coord:?}")))?;
    let query_id: u64 = qid
        .parse()
        .map_err(|_| EngineError::from_query_error(format!("malformed query id {qid:?}")))?;
    Ok(QueryId {
        coordinator_id,
        query_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ok_query_id_reply() {
        let id = parse_query_id_reply("OK 12.345").unwrap();
        assert_eq!(id.coordinator_id, 12);
        assert_eq!(id.query_id, 345);
    }

    #[test]
    fn parses_error_reply_as_query_local() {
        let err = parse_query_id_reply("ERR syntax error").unwrap_err();
        assert!(matches!(err, EngineError::QueryLocal(_)));
    }

    #[test]
    fn parses_connection_fatal_reply() {
        let err = parse_query_id_reply("ERR SCIDB_LE_CONNECTION_ERROR").unwrap_err();
        assert!(matches!(err, EngineError::ConnectionFatal(_)));
    }
}
