//! Query Executor: prefix statements, save-wrapping, prepare/execute/complete
//! orchestration, and cancel dispatch (spec.md §4.3).
//!
//! Grounded in `original_source/src/shim.c`'s `execute_query`/`cancel` for the
//! exact wrapping templates and the deliberately naive `;`-split (spec.md's
//! Open Questions flag upgrading it as a behavior change, not a bug fix).
//! Mirrors `pool::SessionPool::acquire`'s style of bridging the slot's sync,
//! `ReentrantMutex`-guarded critical section to the engine adapter's async
//! methods via `Handle::block_on` — callers run this from a blocking-pool
//! task (`tokio::task::spawn_blocking`), never directly on a runtime worker.

use std::path::Path;

use crate::engine::{EngineError, QueryId};
use crate::errors::Error;
use crate::pool::{self, PoolError, SaveKind, Slot, SlotState};

/// Parameters extracted from `/execute_query`'s query string (spec.md §4.3).
pub struct ExecuteParams {
    pub id: String,
    pub query: String,
    pub save: Option<String>,
    pub prefix: Option<String>,
    pub release: bool,
}

/// Run the full execute sequence (spec.md §4.3 steps 1-9). Returns the
/// numeric portion of the query id as the response body.
pub fn execute(params: &ExecuteParams) -> Result<String, Error> {
    let slot = pool::get().find(&params.id).ok_or(PoolError::NotFound)?;
    slot.mark_busy();

    let outcome = run(slot, params);

    match &outcome {
        Err(Error::Engine(EngineError::ConnectionFatal(_))) => slot.cleanup(),
        _ if params.release && outcome.is_ok() => slot.cleanup(),
        _ => slot.mark_idle(),
    }

    outcome
}

/// `/cancel`: inject a cancel on `conn[1]` while `conn[0]` is still blocked
/// in `complete`. Does not touch the slot's lifecycle — the originating
/// client remains responsible for release (spec.md §4.3).
///
/// Uses only `find` (the slot's `identity` lock) and `with_cancel` (the
/// slot's `cancel_slot` lock) — never `with_lock`, which a concurrent
/// `execute` call may be holding for the entire duration of `complete`. If
/// cancel instead waited on that lock, it could never reach the running
/// query it's meant to interrupt.
pub fn cancel(id: &str) -> Result<(), Error> {
    let slot = pool::get().find(id).ok_or(PoolError::NotFound)?;
    let handle = tokio::runtime::Handle::current();

    slot.with_cancel(|cancel| {
        if cancel.query_id.is_none() {
            return Err(Error::Pool(PoolError::CancelNoQuery));
        }
        let conn1 = cancel
            .conn
            .as_mut()
            .expect("unavailable slot has both engine connections");
        handle
            .block_on(conn1.cancel(cancel.query_id))
            .map_err(Error::Engine)
    })
}

fn run(slot: &Slot, params: &ExecuteParams) -> Result<String, Error> {
    let handle = tokio::runtime::Handle::current();
    let config = crate::config::get_config();

    let query_id = slot.with_lock(|inner| {
        if let Some(prefix) = &params.prefix {
            for statement in prefix.split(';').map(str::trim).filter(|s| !s.is_empty()) {
                let conn0 = inner.conn0.as_mut().expect("unavailable slot has conn0");
                let id = handle.block_on(conn0.prepare(statement))?;
                handle.block_on(conn0.execute_prepared(id))?;
                handle.block_on(conn0.complete(id))?;
            }
        }

        let query_text = match &params.save {
            Some(save) => {
                let output_path = inner
                    .staging
                    .as_ref()
                    .expect("unavailable slot has staging buffers")
                    .output_path
                    .clone();
                let (wrapped, kind) = wrap_save(
                    &params.query,
                    save,
                    &output_path,
                    config.general.save_instance_id,
                    config.general.use_aio,
                );
                inner.save_kind = kind;
                wrapped
            }
            // spec.md §10: a query with no `save=` leaves the slot's
            // existing save_kind untouched, rather than resetting it.
            None => params.query.clone(),
        };

        let conn0 = inner.conn0.as_mut().expect("unavailable slot has conn0");
        let query_id = handle.block_on(conn0.prepare(&query_text))?;
        slot.with_cancel(|cancel| cancel.query_id = query_id);
        slot.set_state(SlotState::Querying);
        handle.block_on(conn0.execute_prepared(query_id))?;
        handle.block_on(conn0.complete(query_id))?;
        slot.set_state(SlotState::Completed);

        Ok(query_id)
    })?;

    Ok(query_id.to_string())
}

/// Wrap `query` in a save operator targeting `output_path`, per spec.md
/// §4.3's two rewriting modes.
fn wrap_save(
    query: &str,
    save: &str,
    output_path: &Path,
    save_instance_id: u32,
    use_aio: bool,
) -> (String, SaveKind) {
    let output_path = output_path.display();
    let kind = if save.starts_with('(') || save == "arrow" {
        SaveKind::Binary
    } else {
        SaveKind::Text
    };

    let accelerated = use_aio && (save.starts_with('(') || matches!(save, "csv+" | "lcsv+" | "arrow"));
    let wrapped = if accelerated {
        format!(
            "aio_save({query}, 'path={output_path}', 'instance={save_instance_id}', 'format={save}')"
        )
    } else {
        format!("save({query}, '{output_path}', {save_instance_id}, '{save}')")
    };

    (wrapped, kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn path() -> PathBuf {
        PathBuf::from("/tmp/query-gateway-xyz-out")
    }

    #[test]
    fn default_wrapping_uses_save() {
        let (wrapped, kind) = wrap_save("scan(foo)", "csv+", &path(), 0, false);
        assert_eq!(
            wrapped,
            "save(scan(foo), '/tmp/query-gateway-xyz-out', 0, 'csv+')"
        );
        assert_eq!(kind, SaveKind::Text);
    }

    #[test]
    fn binary_format_sets_save_kind_binary() {
        let (_, kind) = wrap_save("scan(foo)", "(int64,double)", &path(), 0, false);
        assert_eq!(kind, SaveKind::Binary);
        let (_, kind) = wrap_save("scan(foo)", "arrow", &path(), 0, false);
        assert_eq!(kind, SaveKind::Binary);
    }

    #[test]
    fn accelerated_wrapping_requires_aio_and_matching_format() {
        let (wrapped, _) = wrap_save("scan(foo)", "arrow", &path(), 7, true);
        assert!(wrapped.starts_with("aio_save("));
        assert!(wrapped.contains("instance=7"));

        // Without USE_AIO, even an eligible format falls back to `save(...)`.
        let (wrapped, _) = wrap_save("scan(foo)", "arrow", &path(), 7, false);
        assert!(wrapped.starts_with("save("));

        // A format not in the accelerated set never triggers aio_save, even
        // with USE_AIO on.
        let (wrapped, _) = wrap_save("scan(foo)", "csv", &path(), 0, true);
        assert!(wrapped.starts_with("save("));
    }

    #[test]
    fn prefix_split_is_naive_on_semicolons() {
        let stmts: Vec<&str> = "create array foo<x:int64>[i=0:9];; load(foo, '/tmp/a')  ;"
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        assert_eq!(stmts, vec!["create array foo<x:int64>[i=0:9]", "load(foo, '/tmp/a')"]);
    }
}
