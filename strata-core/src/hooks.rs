//! Fault-injection hooks on the persistence pipeline.
//!
//! A test arms a hook at a [`HookPoint`] with a [`HookAction`]. When the
//! journal store reaches that point it consults the registry, which can pause
//! the pipeline until released, fail the step with an I/O error, or simulate a
//! controller panic.
//!
//! # Example
//!
//! ```
//! use strata_core::hooks::{HookAction, HookPoint, HookRegistry};
//! use strata_core::types::ControllerId;
//!
//! let hooks = HookRegistry::new(ControllerId::SpA);
//! hooks.add_hook(HookPoint::LiveRegionWrite, HookAction::Crash);
//! assert!(hooks.reached(HookPoint::LiveRegionWrite).is_err());
//! assert!(hooks.is_crashed());
//! ```

use crate::error::{Result, StrataError};
use crate::types::ControllerId;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Named points in the persistence pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    /// Writing the journal payload.
    JournalRegionWrite,
    /// Payload durable, header not yet marked valid.
    BeforeMarkJournalValid,
    /// Header valid, live region not yet touched.
    AfterJournalValid,
    /// Writing entries to the live region.
    LiveRegionWrite,
    /// Live region durable, header not yet invalidated.
    BeforeInvalidateHeader,
    /// Entry to the persist step; `Fail` here rejects the transaction.
    ReturnFailedTransaction,
}

impl HookPoint {
    fn operation(&self) -> &'static str {
        match self {
            Self::JournalRegionWrite => "journal write",
            Self::BeforeMarkJournalValid => "header validate",
            Self::AfterJournalValid => "live apply",
            Self::LiveRegionWrite => "live write",
            Self::BeforeInvalidateHeader => "header invalidate",
            Self::ReturnFailedTransaction => "persist",
        }
    }
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::JournalRegionWrite => "journal_region_write",
            Self::BeforeMarkJournalValid => "before_mark_journal_valid",
            Self::AfterJournalValid => "after_journal_valid",
            Self::LiveRegionWrite => "live_region_write",
            Self::BeforeInvalidateHeader => "before_invalidate_header",
            Self::ReturnFailedTransaction => "return_failed_transaction",
        };
        write!(f, "{name}")
    }
}

/// What happens when the pipeline reaches an armed point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    /// Block until the hook is released or removed, or the node crashes.
    Pause,
    /// Simulate a controller panic. At write points the write is torn first.
    Crash,
    /// Report an I/O error for the step.
    Fail,
}

#[derive(Debug)]
struct ArmedHook {
    action: HookAction,
    hits: u64,
    released: bool,
}

#[derive(Debug, Default)]
struct HookTable {
    hooks: HashMap<HookPoint, ArmedHook>,
    crashed: bool,
}

/// Per-controller hook registry and simulated panic switch.
#[derive(Debug)]
pub struct HookRegistry {
    node: ControllerId,
    table: Mutex<HookTable>,
    changed: Condvar,
}

impl HookRegistry {
    /// Empty registry for `node`.
    pub fn new(node: ControllerId) -> Self {
        Self {
            node,
            table: Mutex::new(HookTable::default()),
            changed: Condvar::new(),
        }
    }

    /// The controller this registry belongs to.
    pub fn node(&self) -> ControllerId {
        self.node
    }

    /// Arm `point`, replacing any hook already there.
    pub fn add_hook(&self, point: HookPoint, action: HookAction) {
        let mut table = self.table.lock();
        table.hooks.insert(
            point,
            ArmedHook {
                action,
                hits: 0,
                released: false,
            },
        );
        tracing::debug!(node = %self.node, point = %point, ?action, "Hook armed");
    }

    /// Disarm `point`. A paused pipeline continues.
    pub fn remove_hook(&self, point: HookPoint) -> Result<()> {
        let mut table = self.table.lock();
        if table.hooks.remove(&point).is_none() {
            return Err(StrataError::HookNotArmed { point });
        }
        self.changed.notify_all();
        Ok(())
    }

    /// Let a paused pipeline continue. The hook stays armed but passes through.
    pub fn release_hook(&self, point: HookPoint) -> Result<()> {
        let mut table = self.table.lock();
        let hook = table
            .hooks
            .get_mut(&point)
            .ok_or(StrataError::HookNotArmed { point })?;
        hook.released = true;
        self.changed.notify_all();
        tracing::debug!(node = %self.node, point = %point, "Hook released");
        Ok(())
    }

    /// Block until the pipeline has reached `point` at least once.
    pub fn wait_hook(&self, point: HookPoint, timeout: Duration) -> Result<()> {
        let deadline = Instant::now().checked_add(timeout);
        let mut table = self.table.lock();
        loop {
            match table.hooks.get(&point) {
                None => return Err(StrataError::HookNotArmed { point }),
                Some(hook) if hook.hits > 0 => return Ok(()),
                Some(_) => {}
            }
            let timed_out = match deadline {
                Some(deadline) => self.changed.wait_until(&mut table, deadline).timed_out(),
                None => {
                    self.changed.wait(&mut table);
                    false
                }
            };
            if timed_out {
                let reached = table.hooks.get(&point).is_some_and(|h| h.hits > 0);
                if reached {
                    return Ok(());
                }
                return Err(StrataError::HookTimeout {
                    point,
                    timeout_ms: millis(timeout),
                });
            }
        }
    }

    /// How many times the pipeline reached `point` since it was armed.
    pub fn hits(&self, point: HookPoint) -> u64 {
        self.table.lock().hooks.get(&point).map_or(0, |h| h.hits)
    }

    /// Action that will fire at `point`, if the hook is live.
    pub fn armed(&self, point: HookPoint) -> Option<HookAction> {
        let table = self.table.lock();
        if table.crashed {
            return None;
        }
        table
            .hooks
            .get(&point)
            .filter(|h| !h.released)
            .map(|h| h.action)
    }

    /// Called by the pipeline at `point`.
    ///
    /// Returns `Ok` when the pipeline may proceed.
    pub fn reached(&self, point: HookPoint) -> Result<()> {
        let mut table = self.table.lock();
        if table.crashed {
            return Err(self.crashed_error());
        }
        let Some(hook) = table.hooks.get_mut(&point) else {
            return Ok(());
        };
        if hook.released {
            return Ok(());
        }
        hook.hits += 1;
        let action = hook.action;
        self.changed.notify_all();
        tracing::debug!(node = %self.node, point = %point, ?action, "Hook reached");

        match action {
            HookAction::Fail => Err(StrataError::JournalIo {
                operation: point.operation(),
                cause: format!("injected failure at {point}"),
            }),
            HookAction::Crash => {
                table.crashed = true;
                self.changed.notify_all();
                tracing::warn!(node = %self.node, point = %point, "Simulated controller panic");
                Err(self.crashed_error())
            }
            HookAction::Pause => loop {
                if table.crashed {
                    return Err(self.crashed_error());
                }
                match table.hooks.get(&point) {
                    Some(hook) if !hook.released => self.changed.wait(&mut table),
                    _ => return Ok(()),
                }
            },
        }
    }

    /// Simulate a panic: every later pipeline step fails, paused steps abort.
    pub fn crash(&self) {
        let mut table = self.table.lock();
        table.crashed = true;
        self.changed.notify_all();
        tracing::warn!(node = %self.node, "Controller crashed");
    }

    /// Bring a crashed controller back with no hooks armed.
    pub fn revive(&self) {
        let mut table = self.table.lock();
        table.crashed = false;
        table.hooks.clear();
        self.changed.notify_all();
    }

    /// Whether the controller has crashed.
    pub fn is_crashed(&self) -> bool {
        self.table.lock().crashed
    }

    /// Fail with `NodeCrashed` if the controller has crashed.
    pub fn ensure_alive(&self) -> Result<()> {
        if self.is_crashed() {
            return Err(self.crashed_error());
        }
        Ok(())
    }

    fn crashed_error(&self) -> StrataError {
        StrataError::NodeCrashed { node: self.node }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn unarmed_points_pass() {
        let hooks = HookRegistry::new(ControllerId::SpA);
        assert!(hooks.reached(HookPoint::JournalRegionWrite).is_ok());
        assert_eq!(hooks.armed(HookPoint::JournalRegionWrite), None);
    }

    #[test]
    fn fail_reports_io_error() {
        let hooks = HookRegistry::new(ControllerId::SpA);
        hooks.add_hook(HookPoint::ReturnFailedTransaction, HookAction::Fail);

        let err = hooks.reached(HookPoint::ReturnFailedTransaction).unwrap_err();
        assert_eq!(err.code(), "E301");
        assert_eq!(hooks.hits(HookPoint::ReturnFailedTransaction), 1);
        assert!(!hooks.is_crashed());
    }

    #[test]
    fn crash_is_sticky() {
        let hooks = HookRegistry::new(ControllerId::SpB);
        hooks.add_hook(HookPoint::LiveRegionWrite, HookAction::Crash);

        let err = hooks.reached(HookPoint::LiveRegionWrite).unwrap_err();
        assert!(matches!(err, StrataError::NodeCrashed { node: ControllerId::SpB }));
        assert!(hooks.reached(HookPoint::JournalRegionWrite).is_err());

        hooks.revive();
        assert!(hooks.reached(HookPoint::LiveRegionWrite).is_ok());
    }

    #[test]
    fn pause_until_released() {
        let hooks = Arc::new(HookRegistry::new(ControllerId::SpA));
        hooks.add_hook(HookPoint::BeforeMarkJournalValid, HookAction::Pause);

        let pipeline = {
            let hooks = Arc::clone(&hooks);
            thread::spawn(move || hooks.reached(HookPoint::BeforeMarkJournalValid))
        };

        hooks
            .wait_hook(HookPoint::BeforeMarkJournalValid, Duration::from_secs(5))
            .unwrap();
        hooks.release_hook(HookPoint::BeforeMarkJournalValid).unwrap();

        assert!(pipeline.join().unwrap().is_ok());
    }

    #[test]
    fn crash_aborts_paused_pipeline() {
        let hooks = Arc::new(HookRegistry::new(ControllerId::SpA));
        hooks.add_hook(HookPoint::AfterJournalValid, HookAction::Pause);

        let pipeline = {
            let hooks = Arc::clone(&hooks);
            thread::spawn(move || hooks.reached(HookPoint::AfterJournalValid))
        };

        hooks
            .wait_hook(HookPoint::AfterJournalValid, Duration::from_secs(5))
            .unwrap();
        hooks.crash();

        let err = pipeline.join().unwrap().unwrap_err();
        assert_eq!(err.code(), "E501");
    }

    #[test]
    fn wait_times_out() {
        let hooks = HookRegistry::new(ControllerId::SpA);
        hooks.add_hook(HookPoint::BeforeInvalidateHeader, HookAction::Pause);

        let err = hooks
            .wait_hook(HookPoint::BeforeInvalidateHeader, Duration::from_millis(20))
            .unwrap_err();
        assert_eq!(err.code(), "E601");

        let err = hooks
            .wait_hook(HookPoint::LiveRegionWrite, Duration::from_millis(1))
            .unwrap_err();
        assert_eq!(err.code(), "E602");
    }

    #[test]
    fn timeout_millis_saturate() {
        let hooks = HookRegistry::new(ControllerId::SpA);
        hooks.add_hook(HookPoint::LiveRegionWrite, HookAction::Pause);
        let err = hooks
            .wait_hook(HookPoint::LiveRegionWrite, Duration::from_millis(15))
            .unwrap_err();
        assert!(matches!(err, StrataError::HookTimeout { timeout_ms: 15, .. }));

        assert_eq!(millis(Duration::MAX), u64::MAX);
        assert_eq!(millis(Duration::from_secs(3)), 3000);
    }
}
