//! Validity state machine shared by server and client connections.
//!
//! ```text
//! Invalid --start--> Pending --ok--> Valid
//!    ^                  |              |
//!    +---- failure / invalidate -------+
//! ```
//!
//! Every `start` opens a new epoch. Workers carry the epoch they were spawned
//! in, so a worker left over from an earlier run can neither validate nor
//! invalidate a restarted connection.

use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::MessagingError;
use crate::sync::lock;

/// Validity of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Invalid,
    Pending,
    Valid,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Invalid => "invalid",
            ConnectionState::Pending => "pending",
            ConnectionState::Valid => "valid",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) type InvalidationHandler = Arc<dyn Fn() + Send + Sync>;

pub(crate) struct Lifecycle {
    inner: Mutex<LifecycleInner>,
    changed: Condvar,
}

struct LifecycleInner {
    state: ConnectionState,
    epoch: u64,
    last_error: Option<Arc<MessagingError>>,
    subscribers: Vec<Sender<ConnectionState>>,
    handler: Option<InvalidationHandler>,
}

impl LifecycleInner {
    fn transition(&mut self, state: ConnectionState) {
        debug!(from = %self.state, to = %state, epoch = self.epoch, "connection state change");
        self.state = state;
        self.subscribers.retain(|tx| tx.send(state).is_ok());
    }
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(LifecycleInner {
                state: ConnectionState::Invalid,
                epoch: 0,
                last_error: None,
                subscribers: Vec::new(),
                handler: None,
            }),
            changed: Condvar::new(),
        }
    }

    /// Move `Invalid -> Pending` and open a new epoch.
    ///
    /// # Panics
    ///
    /// Panics unless the connection is `Invalid`.
    pub(crate) fn begin_start(&self) -> u64 {
        let mut inner = lock(&self.inner);
        assert!(
            inner.state == ConnectionState::Invalid,
            "start() called on a {} connection",
            inner.state
        );
        inner.epoch += 1;
        inner.last_error = None;
        inner.transition(ConnectionState::Pending);
        self.changed.notify_all();
        inner.epoch
    }

    /// Move `Pending -> Valid` if `epoch` is still the current run.
    pub(crate) fn mark_valid(&self, epoch: u64) -> bool {
        let mut inner = lock(&self.inner);
        if inner.epoch != epoch || inner.state != ConnectionState::Pending {
            return false;
        }
        inner.transition(ConnectionState::Valid);
        self.changed.notify_all();
        true
    }

    /// Move to `Invalid`, recording `error` as the cause.
    ///
    /// With `Some(epoch)`, only acts if that epoch is still current. Returns
    /// the epoch this call ended, or `None` if it changed nothing. Resources
    /// of that epoch are the caller's to release; a `start` may already have
    /// opened the next one. The invalidation handler runs on the calling
    /// thread, after the state lock is released.
    pub(crate) fn invalidate(
        &self,
        epoch: Option<u64>,
        error: Option<MessagingError>,
    ) -> Option<u64> {
        let (ended, handler) = {
            let mut inner = lock(&self.inner);
            if epoch.is_some_and(|epoch| epoch != inner.epoch)
                || inner.state == ConnectionState::Invalid
            {
                return None;
            }
            if let Some(error) = error {
                inner.last_error = Some(Arc::new(error));
            }
            inner.transition(ConnectionState::Invalid);
            self.changed.notify_all();
            (inner.epoch, inner.handler.clone())
        };

        if let Some(handler) = handler {
            handler();
        }
        Some(ended)
    }

    pub(crate) fn state(&self) -> ConnectionState {
        lock(&self.inner).state
    }

    /// Whether workers of `epoch` should keep running.
    pub(crate) fn is_live(&self, epoch: u64) -> bool {
        let inner = lock(&self.inner);
        inner.epoch == epoch && inner.state != ConnectionState::Invalid
    }

    pub(crate) fn subscribe(&self) -> Receiver<ConnectionState> {
        let (tx, rx) = mpsc::channel();
        lock(&self.inner).subscribers.push(tx);
        rx
    }

    pub(crate) fn wait_for(&self, state: ConnectionState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = lock(&self.inner);
        while inner.state != state {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            inner = match self.changed.wait_timeout(inner, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }

    pub(crate) fn last_error(&self) -> Option<Arc<MessagingError>> {
        lock(&self.inner).last_error.clone()
    }

    pub(crate) fn set_handler(&self, handler: Option<InvalidationHandler>) {
        lock(&self.inner).handler = handler;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use super::*;

    fn counting_handler(lifecycle: &Lifecycle) -> Arc<AtomicUsize> {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        lifecycle.set_handler(Some(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })));
        fired
    }

    #[test]
    fn full_cycle_notifies_subscribers_in_order() {
        let lifecycle = Lifecycle::new();
        let rx = lifecycle.subscribe();

        let epoch = lifecycle.begin_start();
        assert!(lifecycle.mark_valid(epoch));
        assert!(lifecycle.invalidate(None, None).is_some());

        let seen: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            seen,
            vec![
                ConnectionState::Pending,
                ConnectionState::Valid,
                ConnectionState::Invalid
            ]
        );
    }

    #[test]
    fn handler_fires_once_per_transition() {
        let lifecycle = Lifecycle::new();
        let fired = counting_handler(&lifecycle);

        let epoch = lifecycle.begin_start();
        lifecycle.mark_valid(epoch);
        assert_eq!(lifecycle.invalidate(None, None), Some(epoch));
        assert_eq!(lifecycle.invalidate(None, None), None);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        let epoch = lifecycle.begin_start();
        assert_eq!(
            lifecycle.invalidate(Some(epoch), Some(MessagingError::Cancelled)),
            Some(epoch)
        );
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn stale_epoch_cannot_touch_new_run() {
        let lifecycle = Lifecycle::new();
        let first = lifecycle.begin_start();
        lifecycle.invalidate(None, None);

        let second = lifecycle.begin_start();
        assert!(!lifecycle.mark_valid(first));
        assert_eq!(lifecycle.invalidate(Some(first), None), None);
        assert!(!lifecycle.is_live(first));
        assert!(lifecycle.is_live(second));
        assert_eq!(lifecycle.state(), ConnectionState::Pending);
    }

    #[test]
    fn last_error_is_kept_until_restart() {
        let lifecycle = Lifecycle::new();
        let epoch = lifecycle.begin_start();
        lifecycle.invalidate(
            Some(epoch),
            Some(MessagingError::AdmissionRejected("nope".to_string())),
        );
        assert!(matches!(
            lifecycle.last_error().as_deref(),
            Some(MessagingError::AdmissionRejected(_))
        ));

        lifecycle.begin_start();
        assert!(lifecycle.last_error().is_none());
    }

    #[test]
    #[should_panic(expected = "start() called on a pending connection")]
    fn start_while_pending_panics() {
        let lifecycle = Lifecycle::new();
        lifecycle.begin_start();
        lifecycle.begin_start();
    }

    #[test]
    fn wait_for_sees_change_from_other_thread() {
        let lifecycle = Arc::new(Lifecycle::new());
        let epoch = lifecycle.begin_start();

        let remote = Arc::clone(&lifecycle);
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.mark_valid(epoch);
        });

        assert!(lifecycle.wait_for(ConnectionState::Valid, Duration::from_secs(5)));
        worker.join().unwrap();
        assert!(!lifecycle.wait_for(ConnectionState::Invalid, Duration::from_millis(10)));
    }

    #[test]
    fn dropped_subscriber_is_pruned() {
        let lifecycle = Lifecycle::new();
        drop(lifecycle.subscribe());
        let kept = lifecycle.subscribe();
        lifecycle.begin_start();
        assert_eq!(lock(&lifecycle.inner).subscribers.len(), 1);
        assert_eq!(kept.recv().unwrap(), ConnectionState::Pending);
    }
}
