//! Session Slot: the central entity of spec.md §3, bundling two engine
//! connections, staging buffer paths, lazily-opened drain handles, and the
//! slot's locks.
//!
//! The slot is guarded by three independent locks rather than one, which is
//! what lets `/cancel` (spec.md §4.3, §5) reach `conn[1]` while a
//! long-running query is blocked in `complete` on `conn0`:
//!
//! - `identity`: `id`/`state`, read by every `find`/`matches_id`/
//!   `is_available` lookup. Only ever held for a field read or a plain enum
//!   assignment, never across engine I/O.
//! - `inner`: `conn0`, staging paths, `save_kind`, drain handles — held by
//!   the executor for the full duration of prepare/execute/complete.
//! - `cancel_slot`: `conn[1]` plus the query id it targets. A worker blocked
//!   on `inner` for `complete` never touches this lock, so `/cancel` never
//!   waits behind it.

use std::cell::RefCell;
use std::fs::File;
use std::io::BufReader;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, ReentrantMutex};
use quanta::Instant;

use crate::engine::{EngineClient, QueryId};
use crate::utils::clock;

use super::staging::StagingPaths;

pub const SESSIONID_LEN: usize = 32;
/// Reserved id meaning "this slot is AVAILABLE" — never generated, since it
/// sits outside the session id charset (spec.md §4.1).
pub const NO_SESSION: &str = "NA";

/// Tagged slot state, replacing the implicit state the original tracks via
/// `query_id`/`save_kind` alone — per spec.md §9's REDESIGN FLAGS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Available,
    /// Acquired, engine connections open, no query has run yet.
    Connected,
    /// A query has been prepared/executed and `complete` is in flight or
    /// just returned.
    Querying,
    /// `complete` returned; results (if any) are staged and drainable.
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveKind {
    None,
    Binary,
    Text,
}

/// Lazily-opened descriptors used by [`crate::drain`]. Opened on first
/// drain call and cached for subsequent cursor-forwarding reads.
#[derive(Default)]
pub struct DrainHandles {
    pub bytes_file: Option<File>,
    pub lines_reader: Option<BufReader<File>>,
}

/// `id`/`state`, behind a lock of their own so a lookup never has to wait on
/// whichever of `inner`/`cancel_slot` a long-running operation is holding.
struct Identity {
    id: String,
    state: SlotState,
}

/// Everything around the primary engine connection that mutates together
/// across prepare/execute/complete, guarded by the slot's reentrant lock.
/// `ReentrantMutex` only hands out `&SlotInner`, so mutable fields live
/// behind `RefCell` — the standard parking_lot idiom for recursive-lock-
/// guarded interior mutability.
pub struct SlotInner {
    pub conn0: Option<EngineClient>,
    pub staging: Option<StagingPaths>,
    pub save_kind: SaveKind,
    pub drain: DrainHandles,
}

impl SlotInner {
    fn empty() -> SlotInner {
        SlotInner {
            conn0: None,
            staging: None,
            save_kind: SaveKind::None,
            drain: DrainHandles::default(),
        }
    }
}

/// `conn[1]` plus the query id a `/cancel` call targets (spec.md §3). Kept
/// out of `SlotInner` deliberately: an executor blocked in `complete` on
/// `conn0` holds `inner`'s lock for the whole call, and `/cancel` must never
/// be made to wait behind it.
#[derive(Default)]
pub struct CancelSlot {
    pub conn: Option<EngineClient>,
    pub query_id: QueryId,
}

pub struct Slot {
    pub index: usize,
    /// Set for the duration of any in-flight operation against this slot.
    /// Inspected (not locked) by the reaper so a busy slot is never chosen
    /// for reclamation — the REDESIGN-FLAGS-preferred replacement for the
    /// original's future-timestamp trick (spec.md §9).
    busy: AtomicBool,
    /// Used only for orphan-age computation; not load-bearing for
    /// correctness the way `busy` is.
    last_activity: Mutex<Instant>,
    identity: Mutex<Identity>,
    inner: ReentrantMutex<RefCell<SlotInner>>,
    cancel_slot: Mutex<CancelSlot>,
}

impl Slot {
    pub fn new(index: usize) -> Slot {
        Slot {
            index,
            busy: AtomicBool::new(false),
            last_activity: Mutex::new(clock::now()),
            identity: Mutex::new(Identity {
                id: NO_SESSION.to_string(),
                state: SlotState::Available,
            }),
            inner: ReentrantMutex::new(RefCell::new(SlotInner::empty())),
            cancel_slot: Mutex::new(CancelSlot::default()),
        }
    }

    /// Lock the slot's primary-connection state for the duration of `f`.
    /// Reentrant: a nested call from the same worker will not deadlock.
    /// Held by the executor across the full prepare/execute/complete
    /// sequence — never take this lock from the `/cancel` path.
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut SlotInner) -> R) -> R {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        f(&mut inner)
    }

    /// Lock just `conn[1]`/`query_id`, independent of [`Slot::with_lock`].
    /// This is what `/cancel` uses so it never contends with a worker
    /// blocked in `complete` on `conn0` (spec.md §4.3, §5).
    pub fn with_cancel<R>(&self, f: impl FnOnce(&mut CancelSlot) -> R) -> R {
        let mut cancel = self.cancel_slot.lock();
        f(&mut cancel)
    }

    /// Move the slot to `state`. Used mid-execution for the
    /// Connected → Querying → Completed transitions; briefly takes the
    /// identity lock so lookups are never blocked on it.
    pub fn set_state(&self, state: SlotState) {
        self.identity.lock().state = state;
    }

    pub fn is_available(&self) -> bool {
        self.identity.lock().state == SlotState::Available
    }

    pub fn id(&self) -> String {
        self.identity.lock().id.clone()
    }

    pub fn matches_id(&self, id: &str) -> bool {
        let identity = self.identity.lock();
        identity.state != SlotState::Available && identity.id == id
    }

    pub fn mark_busy(&self) {
        self.busy.store(true, Ordering::SeqCst);
    }

    pub fn mark_idle(&self) {
        self.busy.store(false, Ordering::SeqCst);
        *self.last_activity.lock() = clock::now();
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Age since the slot's last recorded activity. Only meaningful when
    /// the slot is UNAVAILABLE and not busy.
    pub fn idle_age(&self) -> std::time::Duration {
        clock::now().duration_since(*self.last_activity.lock())
    }

    /// Claim the slot during acquisition: assign its id and move it to
    /// CONNECTED. Called after engine connections and staging buffers are
    /// already set up, but the result is visible to `is_available`/
    /// `matches_id` the instant it runs — a second `acquire` must never be
    /// able to pick this slot again (spec.md §4.1).
    pub fn claim(&self, id: &str) {
        let mut identity = self.identity.lock();
        identity.id = id.to_string();
        identity.state = SlotState::Connected;
    }

    /// Reset the slot to AVAILABLE: closes engine connections, unlinks
    /// staging files, clears drain handles, and resets id/query_id/save_kind
    /// to their AVAILABLE-state values (spec.md §4.2, §8 invariants).
    pub fn cleanup(&self) {
        let (conn0, staging) = self.with_lock(|inner| {
            let conn0 = inner.conn0.take();
            let staging = inner.staging.take();
            inner.drain = DrainHandles::default();
            inner.save_kind = SaveKind::None;
            (conn0, staging)
        });

        let conn1 = self.with_cancel(|cancel| {
            cancel.query_id = QueryId::NONE;
            cancel.conn.take()
        });

        {
            let mut identity = self.identity.lock();
            identity.id = NO_SESSION.to_string();
            identity.state = SlotState::Available;
        }

        if let Some(staging) = staging {
            staging.cleanup();
        }

        let handle = tokio::runtime::Handle::try_current();
        if let Ok(handle) = handle {
            if let Some(conn0) = conn0 {
                handle.block_on(conn0.disconnect());
            }
            if let Some(conn1) = conn1 {
                handle.block_on(conn1.disconnect());
            }
        }

        *self.last_activity.lock() = clock::now();
        self.busy.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_slot_is_available_with_na_id() {
        let slot = Slot::new(0);
        assert!(slot.is_available());
        assert_eq!(slot.id(), NO_SESSION);
    }

    #[test]
    fn busy_flag_round_trips() {
        let slot = Slot::new(0);
        assert!(!slot.is_busy());
        slot.mark_busy();
        assert!(slot.is_busy());
        slot.mark_idle();
        assert!(!slot.is_busy());
    }

    #[test]
    fn matches_id_false_when_available() {
        let slot = Slot::new(0);
        assert!(!slot.matches_id(NO_SESSION));
        assert!(!slot.matches_id("anything"));
    }

    #[test]
    fn claim_makes_the_slot_findable() {
        let slot = Slot::new(0);
        slot.claim("somesession0000000000000000000");
        assert!(!slot.is_available());
        assert!(slot.matches_id("somesession0000000000000000000"));
    }

    #[test]
    fn with_lock_is_reentrant() {
        let slot = Slot::new(0);
        slot.with_lock(|outer| {
            outer.save_kind = SaveKind::Text;
            slot.with_lock(|inner| {
                assert_eq!(inner.save_kind, SaveKind::Text);
            });
        });
    }

    #[test]
    fn cleanup_resets_to_available() {
        let slot = Slot::new(0);
        slot.claim("somesession0000000000000000000");
        slot.with_lock(|inner| inner.save_kind = SaveKind::Text);
        slot.cleanup();
        assert!(slot.is_available());
        assert_eq!(slot.id(), NO_SESSION);
        slot.with_lock(|inner| assert_eq!(inner.save_kind, SaveKind::None));
    }

    /// Regression test for the `/cancel` deadlock (spec.md §8 scenario 6):
    /// `with_cancel` must never wait on `with_lock`'s lock. A thread holding
    /// `inner` for 200ms must not delay a concurrent `with_cancel` call by
    /// anywhere near that long.
    #[test]
    fn with_cancel_does_not_block_on_inner_lock() {
        use std::sync::mpsc;
        use std::sync::Arc;
        use std::thread;
        use std::time::{Duration, Instant};

        let slot = Arc::new(Slot::new(0));
        let holder = Arc::clone(&slot);
        let (holding, _holding_rx) = mpsc::channel::<()>();

        let join = thread::spawn(move || {
            holder.with_lock(|_inner| {
                let _ = holding.send(());
                thread::sleep(Duration::from_millis(200));
            });
        });

        // Give the other thread a head start so it is certainly inside
        // `with_lock` before we measure.
        thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        slot.with_cancel(|cancel| cancel.query_id = QueryId::NONE);
        assert!(
            started.elapsed() < Duration::from_millis(100),
            "with_cancel waited on the inner lock"
        );

        join.join().unwrap();
    }
}
