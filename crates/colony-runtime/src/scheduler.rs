//! Durable completion scheduler.
//!
//! The engine arms one delayed signal per active order through a
//! [`DelayedSignals`] facility. Signals are a cache of database truth: the
//! reconciler rebuilds them at startup and completion re-checks the order
//! before acting, so a lost or duplicated signal is harmless.

use chrono::{DateTime, Utc};
use colony_core::{ConstructionOrder, OrderId, SettlementId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::clock::Clock;

/// Payload delivered when an order's finish time is reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompletionSignal {
    pub order_id: OrderId,
    pub settlement_id: SettlementId,
}

impl CompletionSignal {
    pub fn for_order(order: &ConstructionOrder) -> Self {
        Self {
            order_id: order.id,
            settlement_id: order.settlement_id,
        }
    }
}

pub fn signal_key(order: OrderId) -> String {
    format!("construction:{order}")
}

/// A delayed-signal facility. Arming an existing key replaces it.
pub trait DelayedSignals: Send + Sync {
    fn arm(&self, key: &str, delay: Duration, payload: CompletionSignal);
    /// Returns whether a signal was armed under `key`.
    fn disarm(&self, key: &str) -> bool;
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

/// In-process timers: one tokio task per key, delivering into a channel
/// drained by the completion worker.
pub struct TokioTimers {
    tx: mpsc::UnboundedSender<CompletionSignal>,
    runtime: tokio::runtime::Handle,
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl TokioTimers {
    /// Must be called from within a tokio runtime.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<CompletionSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let timers = Arc::new(Self {
            tx,
            runtime: tokio::runtime::Handle::current(),
            timers: Mutex::new(HashMap::new()),
        });
        (timers, rx)
    }

    pub fn armed(&self) -> usize {
        lock(&self.timers).values().filter(|h| !h.is_finished()).count()
    }
}

impl DelayedSignals for TokioTimers {
    fn arm(&self, key: &str, delay: Duration, payload: CompletionSignal) {
        let tx = self.tx.clone();
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            // receiver gone means the worker shut down
            let _ = tx.send(payload);
        });
        let mut timers = lock(&self.timers);
        timers.retain(|_, h| !h.is_finished());
        if let Some(prev) = timers.insert(key.to_string(), handle) {
            prev.abort();
        }
    }

    fn disarm(&self, key: &str) -> bool {
        match lock(&self.timers).remove(key) {
            Some(h) => {
                let live = !h.is_finished();
                h.abort();
                live
            }
            None => false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArmedSignal {
    pub due: DateTime<Utc>,
    pub payload: CompletionSignal,
}

/// Recording facility: nothing fires until [`ManualSignals::fire_due`].
pub struct ManualSignals {
    clock: Arc<dyn Clock>,
    armed: Mutex<BTreeMap<String, ArmedSignal>>,
}

impl ManualSignals {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            armed: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<ArmedSignal> {
        lock(&self.armed).get(key).copied()
    }

    pub fn len(&self) -> usize {
        lock(&self.armed).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes and returns every signal due at `now`, earliest first.
    pub fn fire_due(&self, now: DateTime<Utc>) -> Vec<CompletionSignal> {
        let mut armed = lock(&self.armed);
        let due: Vec<String> = armed
            .iter()
            .filter(|(_, s)| s.due <= now)
            .map(|(k, _)| k.clone())
            .collect();
        let mut fired: Vec<ArmedSignal> = due.iter().filter_map(|k| armed.remove(k)).collect();
        fired.sort_by_key(|s| (s.due, s.payload.order_id));
        fired.into_iter().map(|s| s.payload).collect()
    }

    /// Forgets every armed signal, as a process crash would.
    pub fn clear(&self) {
        lock(&self.armed).clear();
    }
}

impl DelayedSignals for ManualSignals {
    fn arm(&self, key: &str, delay: Duration, payload: CompletionSignal) {
        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
        let due = self.clock.now() + delay;
        lock(&self.armed).insert(key.to_string(), ArmedSignal { due, payload });
    }

    fn disarm(&self, key: &str) -> bool {
        lock(&self.armed).remove(key).is_some()
    }
}

/// Arms and disarms completion signals for orders.
#[derive(Clone)]
pub struct CompletionScheduler {
    signals: Arc<dyn DelayedSignals>,
    clock: Arc<dyn Clock>,
}

impl CompletionScheduler {
    pub fn new(signals: Arc<dyn DelayedSignals>, clock: Arc<dyn Clock>) -> Self {
        Self { signals, clock }
    }

    /// Disarms, then arms the order's signal for `max(0, finish - now)`.
    pub fn schedule(&self, order: &ConstructionOrder) {
        let key = signal_key(order.id);
        self.signals.disarm(&key);
        let delay = order
            .remaining(self.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        debug!(order_id = %order.id, settlement_id = %order.settlement_id, delay_ms = delay.as_millis() as u64, "completion armed");
        self.signals.arm(&key, delay, CompletionSignal::for_order(order));
    }

    /// Best-effort; a signal that still fires later is a no-op.
    pub fn unschedule(&self, order: OrderId) {
        if self.signals.disarm(&signal_key(order)) {
            debug!(order_id = %order, "completion disarmed");
        }
    }
}
