// ── Repeat correlator ──
//
// Matches repeat numbers reported by the node to the print that caused
// them. Prints come from an unsynchronized external printer, so there is
// exactly one "currently printing" slot per node: the next capture binds
// to whatever occupies it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use labelval_api::InspectionEvent;
use labelval_api::events::StateChange;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::controller::EventObserver;
use crate::error::CoreError;
use crate::state::{DeviceState, NodeStatus};

/// How many bound repeat numbers are remembered for duplicate suppression.
const SEEN_WINDOW: usize = 64;

/// Identifies one armed print.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ticket(u64);

impl std::fmt::Display for Ticket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum FaultReason {
    /// No repeat arrived within the correlation timeout.
    #[strum(serialize = "timed out")]
    TimedOut,
    /// A job or mode change invalidated repeat numbering.
    #[strum(serialize = "discarded")]
    Discarded,
}

/// Outcome of one print, delivered in the order it was decided.
#[derive(Debug)]
pub enum Correlation<R> {
    Ready {
        ticket: Ticket,
        repeat: u32,
        request: R,
    },
    Faulted {
        ticket: Ticket,
        request: R,
        reason: FaultReason,
    },
}

impl<R> Correlation<R> {
    pub fn ticket(&self) -> Ticket {
        match self {
            Self::Ready { ticket, .. } | Self::Faulted { ticket, .. } => *ticket,
        }
    }
}

struct Pending<R> {
    ticket: Ticket,
    request: R,
    permit: OwnedSemaphorePermit,
    expiry: JoinHandle<()>,
}

/// A repeat bound to a print but not yet completed by the consumer.
struct Bound<R> {
    ticket: Ticket,
    /// Held back because the next repeat was already bound.
    deferred: Option<R>,
}

struct State<R> {
    pending: Option<Pending<R>>,
    bound: BTreeMap<u32, Bound<R>>,
    seen: BTreeSet<u32>,
}

struct Shared<R> {
    timeout: Duration,
    slot: Arc<Semaphore>,
    next_ticket: AtomicU64,
    state: Mutex<State<R>>,
    tx: mpsc::UnboundedSender<Correlation<R>>,
}

/// Single-slot print/repeat correlator for one node.
///
/// Cheaply cloneable. Outcomes are delivered on the receiver returned by
/// [`new`](Self::new); the consumer calls [`complete`](Self::complete)
/// once it has processed a `Ready` repeat.
pub struct RepeatCorrelator<R> {
    shared: Arc<Shared<R>>,
}

impl<R> Clone for RepeatCorrelator<R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<R: Send + 'static> RepeatCorrelator<R> {
    /// Prints that see no repeat within `timeout` are faulted.
    pub fn new(timeout: Duration) -> (Self, mpsc::UnboundedReceiver<Correlation<R>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            timeout,
            slot: Arc::new(Semaphore::new(1)),
            next_ticket: AtomicU64::new(0),
            state: Mutex::new(State {
                pending: None,
                bound: BTreeMap::new(),
                seen: BTreeSet::new(),
            }),
            tx,
        });
        (Self { shared }, rx)
    }

    /// Whether a print is waiting for its repeat.
    pub fn is_printing(&self) -> bool {
        self.shared.lock().pending.is_some()
    }

    /// Arm the slot for a print, or reject if one is already in flight.
    pub fn begin_print(&self, request: R) -> Result<Ticket, CoreError> {
        let permit = Arc::clone(&self.shared.slot)
            .try_acquire_owned()
            .map_err(|_| CoreError::PrintInFlight)?;
        Ok(self.arm(request, permit))
    }

    /// Wait for the slot to free up, then arm it.
    pub async fn queue_print(&self, request: R) -> Result<Ticket, CoreError> {
        let permit = Arc::clone(&self.shared.slot)
            .acquire_owned()
            .await
            .map_err(|_| CoreError::Cancelled)?;
        Ok(self.arm(request, permit))
    }

    fn arm(&self, request: R, permit: OwnedSemaphorePermit) -> Ticket {
        let ticket = Ticket(self.shared.next_ticket.fetch_add(1, Ordering::Relaxed) + 1);
        let weak: Weak<Shared<R>> = Arc::downgrade(&self.shared);
        let timeout = self.shared.timeout;
        let expiry = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(shared) = weak.upgrade() {
                shared.expire(ticket);
            }
        });

        self.shared.lock().pending = Some(Pending {
            ticket,
            request,
            permit,
            expiry,
        });
        debug!(%ticket, "print armed");
        ticket
    }

    /// Bind a reported repeat to the print in flight.
    ///
    /// Ignored when nothing is printing or the repeat was already bound.
    /// When `repeat + 1` is already bound, the outcome is held back until
    /// that repeat completes.
    pub fn bind(&self, repeat: u32) {
        let shared = &self.shared;
        let mut state = shared.lock();
        if state.seen.contains(&repeat) {
            debug!(repeat, "repeat already bound");
            return;
        }
        let Some(pending) = state.pending.take() else {
            debug!(repeat, "repeat with no print in flight");
            return;
        };
        pending.expiry.abort();
        drop(pending.permit);

        state.seen.insert(repeat);
        while state.seen.len() > SEEN_WINDOW {
            state.seen.pop_first();
        }

        let ticket = pending.ticket;
        let next_known = repeat
            .checked_add(1)
            .is_some_and(|next| state.bound.contains_key(&next));
        if next_known {
            debug!(repeat, %ticket, "deferring until next repeat completes");
            state.bound.insert(
                repeat,
                Bound {
                    ticket,
                    deferred: Some(pending.request),
                },
            );
        } else {
            debug!(repeat, %ticket, "print correlated");
            state.bound.insert(
                repeat,
                Bound {
                    ticket,
                    deferred: None,
                },
            );
            shared.send(Correlation::Ready {
                ticket,
                repeat,
                request: pending.request,
            });
        }
    }

    /// Mark a `Ready` repeat processed, releasing a repeat deferred on it.
    pub fn complete(&self, repeat: u32) {
        let shared = &self.shared;
        let mut state = shared.lock();
        state.bound.remove(&repeat);

        let Some(prev) = repeat.checked_sub(1) else {
            return;
        };
        if let Some(entry) = state.bound.get_mut(&prev) {
            if let Some(request) = entry.deferred.take() {
                debug!(repeat = prev, "releasing deferred repeat");
                shared.send(Correlation::Ready {
                    ticket: entry.ticket,
                    repeat: prev,
                    request,
                });
            }
        }
    }

    /// Withdraw the print in flight (for example when the printer itself
    /// failed). Returns its request if `ticket` was still pending.
    pub fn abandon(&self, ticket: Ticket) -> Option<R> {
        let mut state = self.shared.lock();
        if state.pending.as_ref().is_none_or(|p| p.ticket != ticket) {
            return None;
        }
        let pending = state.pending.take()?;
        pending.expiry.abort();
        debug!(%ticket, "print abandoned");
        Some(pending.request)
    }

    /// Discard all correlation state. The print in flight and any deferred
    /// repeats are faulted as [`FaultReason::Discarded`].
    pub fn reset(&self) {
        let shared = &self.shared;
        let mut state = shared.lock();

        if let Some(pending) = state.pending.take() {
            pending.expiry.abort();
            warn!(ticket = %pending.ticket, "in-flight print discarded");
            shared.send(Correlation::Faulted {
                ticket: pending.ticket,
                request: pending.request,
                reason: FaultReason::Discarded,
            });
        }
        for (_, entry) in std::mem::take(&mut state.bound) {
            if let Some(request) = entry.deferred {
                shared.send(Correlation::Faulted {
                    ticket: entry.ticket,
                    request,
                    reason: FaultReason::Discarded,
                });
            }
        }
        state.seen.clear();
    }
}

impl<R> Shared<R> {
    fn lock(&self) -> MutexGuard<'_, State<R>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, outcome: Correlation<R>) {
        if self.tx.send(outcome).is_err() {
            debug!("correlation receiver dropped");
        }
    }

    fn expire(&self, ticket: Ticket) {
        let mut state = self.lock();
        if state.pending.as_ref().is_none_or(|p| p.ticket != ticket) {
            return;
        }
        let Some(pending) = state.pending.take() else {
            return;
        };
        warn!(%ticket, timeout = ?self.timeout, "no repeat for print");
        self.send(Correlation::Faulted {
            ticket,
            request: pending.request,
            reason: FaultReason::TimedOut,
        });
    }
}

/// Entering Editing, or Running from anything but Paused, restarts the
/// node's repeat numbering.
fn restarts_numbering(change: &StateChange) -> bool {
    match DeviceState::from_wire(&change.to_state) {
        Some(DeviceState::Editing) => true,
        Some(DeviceState::Running) => {
            DeviceState::from_wire(&change.from_state) != Some(DeviceState::Paused)
        }
        _ => false,
    }
}

impl<R: Send + 'static> EventObserver for RepeatCorrelator<R> {
    fn on_event(&self, event: &InspectionEvent, status: &NodeStatus) {
        match event {
            InspectionEvent::SetupCapture(n) => self.bind(n.repeat),
            // While editing, label ends come from inspections, not prints.
            InspectionEvent::LabelEnd(n) if status.state != DeviceState::Editing => {
                self.bind(n.repeat);
            }
            InspectionEvent::StateChange(change) if restarts_numbering(change) => self.reset(),
            _ => {}
        }
    }
}
