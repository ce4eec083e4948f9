//! Session Pool: a fixed-size array of [`Slot`]s with admission control and
//! lazy orphan reclamation (spec.md §4.1).
//!
//! Grounded in the teacher's `POOLS: Lazy<ArcSwap<PoolMap>>` global-registry
//! idiom, generalized from a growable bb8-style pool-per-user map to the
//! fixed-size slot array the allocation algorithm here requires.

mod errors;
mod slot;
mod staging;

pub use errors::{DrainError, PoolError};
pub use slot::{SaveKind, Slot, SlotState, NO_SESSION, SESSIONID_LEN};
pub use staging::StagingPaths;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use rand::Rng;

use crate::engine::EngineClient;

/// Charset the gateway draws session ids from. `"NA"` is reserved and sits
/// outside it, so it can never be generated (spec.md §4.1).
const SESSIONID_CHARSET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

pub struct SessionPool {
    slots: Vec<Slot>,
    /// Serializes allocation decisions (scan-for-available, reap-choice, id
    /// generation). Never held across engine I/O (spec.md §5) — released
    /// before `init_slot` opens engine connections.
    admission: Mutex<()>,
    timeout_secs: u64,
    tmp_dir: String,
    engine_host: String,
    engine_port: u16,
}

static POOL: OnceCell<SessionPool> = OnceCell::new();

/// Initialize the process-wide pool singleton. Must be called exactly once,
/// at server startup.
pub fn init(max_sessions: usize, timeout_secs: u64, tmp_dir: String, engine_host: String, engine_port: u16) {
    let slots = (0..max_sessions).map(Slot::new).collect();
    let pool = SessionPool {
        slots,
        admission: Mutex::new(()),
        timeout_secs,
        tmp_dir,
        engine_host,
        engine_port,
    };
    let _ = POOL.set(pool);
}

pub fn get() -> &'static SessionPool {
    POOL.get().expect("pool::init must run before pool::get")
}

impl SessionPool {
    /// Allocation algorithm from spec.md §4.1: scan for an AVAILABLE slot;
    /// if none, reap the first non-busy orphan whose idle age exceeds the
    /// timeout; otherwise report exhaustion.
    pub fn acquire(&self, user: Option<&str>, password: Option<&str>) -> Result<String, PoolError> {
        let reserved = {
            let _admission = self.admission.lock();

            if let Some(slot) = self.slots.iter().find(|s| !s.is_busy() && s.is_available()) {
                slot.mark_busy();
                Some(slot)
            } else {
                let mut reaped = None;
                for slot in &self.slots {
                    if slot.is_busy() {
                        continue;
                    }
                    if slot.idle_age().as_secs() > self.timeout_secs {
                        slot.cleanup();
                        slot.mark_busy();
                        crate::prometheus::record_session_reaped();
                        reaped = Some(slot);
                        break;
                    }
                }
                reaped
            }
        };

        let Some(slot) = reserved else {
            return Err(PoolError::OutOfResources);
        };

        self.init_slot(slot, user, password)
    }

    fn init_slot(
        &self,
        slot: &Slot,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Result<String, PoolError> {
        let id = self.generate_id();
        let staging = match StagingPaths::create(&self.tmp_dir, &id) {
            Ok(staging) => staging,
            Err(err) => {
                slot.mark_idle();
                return Err(err);
            }
        };

        let handle = tokio::runtime::Handle::current();
        let connect = || {
            handle.block_on(EngineClient::connect(
                &self.engine_host,
                self.engine_port,
                user,
                password,
            ))
        };

        let conn0 = match connect() {
            Ok(conn) => conn,
            Err(err) => {
                staging.cleanup();
                slot.mark_idle();
                return Err(map_connect_error(err));
            }
        };
        let conn1 = match connect() {
            Ok(conn) => conn,
            Err(err) => {
                staging.cleanup();
                slot.mark_idle();
                return Err(map_connect_error(err));
            }
        };

        slot.with_lock(|inner| {
            inner.conn0 = Some(conn0);
            inner.staging = Some(staging);
        });
        slot.with_cancel(|cancel| cancel.conn = Some(conn1));
        // Claim last: this is the write that makes the slot findable by
        // id and drops it out of the available-slot scan for good, so it
        // must happen only after conn0/conn1/staging are all in place.
        slot.claim(&id);
        slot.mark_idle();
        Ok(id)
    }

    /// Generate a 32-char id over [0-9a-z], retrying on collision with any
    /// currently-UNAVAILABLE slot id.
    fn generate_id(&self) -> String {
        loop {
            let candidate = random_session_id();
            if !self.slots.iter().any(|s| s.matches_id(&candidate)) {
                return candidate;
            }
        }
    }

    /// Returns a slot only if it is UNAVAILABLE and its id matches. Linear —
    /// the pool is small by design (spec.md §4.1).
    pub fn find(&self, id: &str) -> Option<&Slot> {
        self.slots.iter().find(|s| s.matches_id(id))
    }

    /// Disconnect both engine connections, clean the slot, return it to
    /// AVAILABLE.
    pub fn release(&self, id: &str) -> Result<(), PoolError> {
        let slot = self.find(id).ok_or(PoolError::NotFound)?;
        slot.cleanup();
        Ok(())
    }

    /// All slots, for metrics aggregation and the shutdown drain.
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }
}

fn random_session_id() -> String {
    let mut rng = rand::rng();
    (0..SESSIONID_LEN)
        .map(|_| {
            let idx = rng.random_range(0..SESSIONID_CHARSET.len());
            SESSIONID_CHARSET[idx] as char
        })
        .collect()
}

fn map_connect_error(err: crate::engine::EngineError) -> PoolError {
    use crate::engine::EngineError;
    match err {
        EngineError::AuthFailed(msg) => PoolError::AuthFailed(msg),
        EngineError::ConnectFailed(msg)
        | EngineError::ConnectionFatal(msg)
        | EngineError::QueryLocal(msg) => PoolError::ConnectFailed(msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_session_id_has_spec_length_and_charset() {
        let id = random_session_id();
        assert_eq!(id.len(), SESSIONID_LEN);
        assert!(id.bytes().all(|b| SESSIONID_CHARSET.contains(&b)));
        assert_ne!(id, NO_SESSION);
    }
}
