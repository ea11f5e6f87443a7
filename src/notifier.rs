use crate::error::TaskError;
use crate::task::TaskId;

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{debug, error, trace};

pub(crate) type SettledListener = dyn Fn() + Send + Sync + 'static;
pub(crate) type SuccessListener<T> = dyn Fn(&T, TaskId) + Send + Sync + 'static;
pub(crate) type ErrorListener<E> = dyn Fn(&TaskError<E>, TaskId) + Send + Sync + 'static;

// --- ListenerSet ---

/// An ordered registry of callbacks keyed by registration token.
///
/// Firing always works on a snapshot, so a listener may register or remove
/// listeners (itself included) while a pass is in progress.
pub(crate) struct ListenerSet<F: ?Sized> {
  kind: &'static str,
  entries: RwLock<ListenerEntries<F>>,
}

struct ListenerEntries<F: ?Sized> {
  next_token: u64,
  listeners: Vec<(u64, Arc<F>)>,
}

impl<F: ?Sized> fmt::Debug for ListenerSet<F> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ListenerSet")
      .field("kind", &self.kind)
      .field("listener_count", &self.entries.read().listeners.len())
      .finish()
  }
}

impl<F: ?Sized + Send + Sync + 'static> ListenerSet<F> {
  pub(crate) fn new(kind: &'static str) -> Arc<Self> {
    Arc::new(Self {
      kind,
      entries: RwLock::new(ListenerEntries {
        next_token: 0,
        listeners: Vec::new(),
      }),
    })
  }

  pub(crate) fn add(self: &Arc<Self>, listener: Arc<F>) -> Subscription {
    let token = {
      let mut entries = self.entries.write();
      let token = entries.next_token;
      entries.next_token += 1;
      entries.listeners.push((token, listener));
      debug!(kind = self.kind, token, "Registered listener. Total: {}", entries.listeners.len());
      token
    };

    let registry: Weak<Self> = Arc::downgrade(self);
    Subscription {
      kind: self.kind,
      remover: Some(Box::new(move || {
        if let Some(registry) = registry.upgrade() {
          registry.remove(token);
        }
      })),
    }
  }

  fn remove(&self, token: u64) -> bool {
    let mut entries = self.entries.write();
    let before = entries.listeners.len();
    entries.listeners.retain(|(t, _)| *t != token);
    let removed = entries.listeners.len() != before;
    debug!(kind = self.kind, token, removed, "Removed listener.");
    removed
  }

  pub(crate) fn len(&self) -> usize {
    self.entries.read().listeners.len()
  }

  fn snapshot(&self) -> Vec<Arc<F>> {
    self.entries.read().listeners.iter().map(|(_, l)| l.clone()).collect()
  }

  /// Invokes every listener registered at the start of the pass, in
  /// registration order. A panicking listener is logged and skipped.
  pub(crate) fn fire(&self, pool_name: &str, invoke: impl Fn(&F)) {
    let snapshot = self.snapshot();
    if snapshot.is_empty() {
      trace!(%pool_name, kind = self.kind, "No listeners registered, dropping notification.");
      return;
    }
    trace!(%pool_name, kind = self.kind, "Dispatching notification to {} listeners.", snapshot.len());

    for listener in snapshot.iter() {
      let result = catch_unwind(AssertUnwindSafe(|| invoke(listener.as_ref())));
      if result.is_err() {
        error!(%pool_name, kind = self.kind, "A listener panicked during execution.");
      }
    }
  }
}

// --- Subscription ---

/// Returned by the `TaskPool::on_*` registrations; call `unsubscribe` to
/// remove the listener.
///
/// Dropping a `Subscription` leaves the listener registered.
pub struct Subscription {
  kind: &'static str,
  remover: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl Subscription {
  /// Removes the listener. Has no effect on a notification pass that is
  /// already running, or if the pool is gone.
  pub fn unsubscribe(mut self) {
    if let Some(remover) = self.remover.take() {
      remover();
    }
  }
}

impl fmt::Debug for Subscription {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Subscription")
      .field("kind", &self.kind)
      .field("active", &self.remover.is_some())
      .finish()
  }
}

// --- Listeners ---

/// The three independent listener lists a pool owns.
pub(crate) struct Listeners<T: 'static, E: 'static> {
  pub(crate) settled: Arc<ListenerSet<SettledListener>>,
  pub(crate) success: Arc<ListenerSet<SuccessListener<T>>>,
  pub(crate) error: Arc<ListenerSet<ErrorListener<E>>>,
}

impl<T: 'static, E: 'static> Listeners<T, E> {
  pub(crate) fn new() -> Self {
    Self {
      settled: ListenerSet::new("settled"),
      success: ListenerSet::new("success"),
      error: ListenerSet::new("error"),
    }
  }

  pub(crate) fn notify_settled(&self, pool_name: &str) {
    self.settled.fire(pool_name, |listener| listener());
  }

  pub(crate) fn notify_outcome(&self, pool_name: &str, task_id: TaskId, outcome: &Result<T, TaskError<E>>) {
    match outcome {
      Ok(value) => self.success.fire(pool_name, |listener| listener(value, task_id)),
      Err(task_error) => self.error.fire(pool_name, |listener| listener(task_error, task_id)),
    }
  }
}

impl<T: 'static, E: 'static> fmt::Debug for Listeners<T, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Listeners")
      .field("settled", &self.settled.len())
      .field("success", &self.success.len())
      .field("error", &self.error.len())
      .finish()
  }
}
