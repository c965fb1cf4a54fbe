//! Run flags shared by the tail loop, the heartbeat and the supervisor.
//!
//! Both flags live in one watch channel, so every transition is a single
//! atomic update and waiters wake on the change instead of polling.

use std::sync::Arc;

use tokio::sync::watch;

/// Snapshot of the run flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags {
    /// The tail loop may keep streaming.
    pub tailing: bool,
    /// The heartbeat may keep probing.
    pub heartbeat: bool,
}

/// Shared run flags.
#[derive(Debug, Clone)]
pub struct Signals {
    tx: Arc<watch::Sender<Flags>>,
}

impl Default for Signals {
    fn default() -> Self {
        Self::new()
    }
}

impl Signals {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tx: Arc::new(watch::channel(Flags::default()).0),
        }
    }

    #[must_use]
    pub fn flags(&self) -> Flags {
        *self.tx.borrow()
    }

    #[must_use]
    pub fn tailing(&self) -> bool {
        self.flags().tailing
    }

    #[must_use]
    pub fn heartbeat_active(&self) -> bool {
        self.flags().heartbeat
    }

    /// Set the tailing flag, returning its previous value.
    pub fn set_tailing(&self, on: bool) -> bool {
        self.update(|flags| std::mem::replace(&mut flags.tailing, on))
    }

    /// Set the heartbeat flag, returning its previous value.
    pub fn set_heartbeat(&self, on: bool) -> bool {
        self.update(|flags| std::mem::replace(&mut flags.heartbeat, on))
    }

    /// Turn both flags off.
    pub fn clear(&self) {
        self.tx.send_if_modified(|flags| {
            let changed = *flags != Flags::default();
            *flags = Flags::default();
            changed
        });
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Flags> {
        self.tx.subscribe()
    }

    fn update(&self, apply: impl FnOnce(&mut Flags) -> bool) -> bool {
        let mut previous = false;
        self.tx.send_if_modified(|flags| {
            let before = *flags;
            previous = apply(flags);
            *flags != before
        });
        previous
    }
}

/// Resolve once the tailing flag is off.
pub async fn tailing_stopped(rx: &mut watch::Receiver<Flags>) {
    let _ = rx.wait_for(|flags| !flags.tailing).await;
}

/// Resolve once the heartbeat flag is off.
pub async fn heartbeat_stopped(rx: &mut watch::Receiver<Flags>) {
    let _ = rx.wait_for(|flags| !flags.heartbeat).await;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_set_returns_previous() {
        let signals = Signals::new();
        assert!(!signals.set_tailing(true));
        assert!(signals.set_tailing(true));
        assert!(signals.tailing());
        assert!(!signals.heartbeat_active());
    }

    #[test]
    fn test_clear() {
        let signals = Signals::new();
        signals.set_tailing(true);
        signals.set_heartbeat(true);
        signals.clear();
        assert_eq!(signals.flags(), Flags::default());
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_change() {
        let signals = Signals::new();
        signals.set_tailing(true);

        let mut rx = signals.subscribe();
        let waiter = tokio::spawn(async move { tailing_stopped(&mut rx).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        signals.set_tailing(false);
        tokio_test::assert_ok!(tokio_test::assert_ok!(
            tokio::time::timeout(Duration::from_secs(1), waiter).await
        ));
    }

    #[tokio::test]
    async fn test_already_stopped_resolves_immediately() {
        let signals = Signals::new();
        let mut rx = signals.subscribe();
        tokio_test::assert_ready!(tokio_test::task::spawn(heartbeat_stopped(&mut rx)).poll());
    }
}
