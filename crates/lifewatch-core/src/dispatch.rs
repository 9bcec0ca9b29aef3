#![forbid(unsafe_code)]

//! Control-loop dispatch: the single serial queue that owns all lifecycle and
//! value-holder state.
//!
//! Every thread that touches lifewatch objects gets its own [`ControlLoop`],
//! stored thread-locally. Registries and value holders capture the loop of the
//! thread that created them; that thread is their control thread and the only
//! place their state is mutated.
//!
//! # Cross-thread handoff
//!
//! Objects living on a control thread are `!Send`. To reach them from another
//! thread they register as a [`Mailbox`] and hand out a [`MailboxId`] plus a
//! [`LoopHandle`] (`Send + Sync`). Producers send `u64` tokens through the
//! handle; the control thread delivers them on its next turn.
//!
//! # Ordering
//!
//! Local tasks ([`ControlLoop::dispatch`]) and remote letters share one FIFO,
//! so work is processed in the order it was enqueued regardless of origin.
//!
//! # Failure Modes
//!
//! - **Mailbox released**: letters addressed to it are dropped on delivery.
//! - **Control thread gone**: sends through a stale [`LoopHandle`] are
//!   dropped and reported as `false`.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use crate::config::DispatchConfig;
use crate::error::DispatchError;

static NEXT_LOOP_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_MAILBOX_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: RefCell<Option<ControlLoop>> = const { RefCell::new(None) };
}

/// Receiver of tokens sent from any thread.
///
/// Implementors live on the control thread; [`deliver`](Mailbox::deliver)
/// always runs there.
pub trait Mailbox {
    fn deliver(&self, token: u64);
}

/// Address of a registered [`Mailbox`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MailboxId(u64);

impl MailboxId {
    /// Get the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

enum Envelope {
    Task(u64),
    Letter { mailbox: MailboxId, token: u64 },
}

struct LoopInner {
    id: u64,
    thread: ThreadId,
    config: DispatchConfig,
    tx: mpsc::Sender<Envelope>,
    rx: mpsc::Receiver<Envelope>,
    tasks: RefCell<HashMap<u64, Box<dyn FnOnce()>>>,
    mailboxes: RefCell<HashMap<MailboxId, Weak<dyn Mailbox>>>,
    next_task: Cell<u64>,
}

/// The serial queue of one control thread.
///
/// Cheap to clone; all clones refer to the same queue.
#[derive(Clone)]
pub struct ControlLoop {
    inner: Rc<LoopInner>,
}

impl fmt::Debug for ControlLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlLoop")
            .field("id", &self.inner.id)
            .field("thread", &self.inner.thread)
            .field("config", &self.inner.config)
            .field("queued_tasks", &self.inner.tasks.borrow().len())
            .field("mailboxes", &self.inner.mailboxes.borrow().len())
            .finish()
    }
}

impl ControlLoop {
    /// The loop of the calling thread, installed with environment defaults on
    /// first use.
    #[must_use]
    pub fn current() -> Self {
        CURRENT.with(|slot| {
            slot.borrow_mut()
                .get_or_insert_with(|| Self::build(DispatchConfig::from_env()))
                .clone()
        })
    }

    /// The loop of the calling thread, if one was installed and thread-local
    /// storage is still reachable.
    #[must_use]
    pub fn try_current() -> Option<Self> {
        CURRENT.try_with(|slot| slot.borrow().clone()).ok().flatten()
    }

    /// Install a loop with an explicit configuration on the calling thread.
    ///
    /// Must happen before anything on this thread calls [`current`](Self::current).
    pub fn install(config: DispatchConfig) -> Result<Self, DispatchError> {
        CURRENT.with(|slot| {
            let mut slot = slot.borrow_mut();
            if slot.is_some() {
                return Err(DispatchError::AlreadyInstalled {
                    thread: format!("{:?}", thread::current().id()),
                });
            }
            let control = Self::build(config);
            *slot = Some(control.clone());
            Ok(control)
        })
    }

    fn build(config: DispatchConfig) -> Self {
        let (tx, rx) = mpsc::channel();
        let id = NEXT_LOOP_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            message = "dispatch.install",
            loop_id = id,
            strict = config.strict_thread_checks,
            max_tasks_per_turn = config.max_tasks_per_turn
        );
        Self {
            inner: Rc::new(LoopInner {
                id,
                thread: thread::current().id(),
                config,
                tx,
                rx,
                tasks: RefCell::new(HashMap::new()),
                mailboxes: RefCell::new(HashMap::new()),
                next_task: Cell::new(1),
            }),
        }
    }

    /// Unique id of this loop.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The configuration this loop was installed with.
    #[must_use]
    pub fn config(&self) -> &DispatchConfig {
        &self.inner.config
    }

    /// Whether the calling thread is this loop's control thread.
    #[must_use]
    pub fn is_control_thread(&self) -> bool {
        thread::current().id() == self.inner.thread
    }

    /// Enforce that `op` runs on the control thread.
    ///
    /// # Panics
    ///
    /// Panics when strict thread checks are enabled and the caller is on a
    /// different thread.
    pub fn assert_control_thread(&self, op: &'static str) {
        if self.inner.config.strict_thread_checks {
            assert!(
                self.is_control_thread(),
                "{op} must run on the control thread"
            );
        }
    }

    /// A `Send + Sync` handle for reaching this loop from other threads.
    #[must_use]
    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            loop_id: self.inner.id,
            thread: self.inner.thread,
            tx: self.inner.tx.clone(),
        }
    }

    /// Run `task` on a later turn of this loop.
    pub fn dispatch(&self, task: impl FnOnce() + 'static) {
        let key = self.inner.next_task.get();
        self.inner.next_task.set(key + 1);
        self.inner.tasks.borrow_mut().insert(key, Box::new(task));
        // The receiver lives in `inner`, so the channel cannot be disconnected here.
        let _ = self.inner.tx.send(Envelope::Task(key));
    }

    /// Register a mailbox; letters for it are delivered while it is alive.
    pub fn register_mailbox(&self, mailbox: Weak<dyn Mailbox>) -> MailboxId {
        let id = MailboxId(NEXT_MAILBOX_ID.fetch_add(1, Ordering::Relaxed));
        self.inner.mailboxes.borrow_mut().insert(id, mailbox);
        id
    }

    /// Forget a mailbox. Pending letters for it are dropped on delivery.
    pub fn unregister_mailbox(&self, id: MailboxId) {
        if let Ok(mut mailboxes) = self.inner.mailboxes.try_borrow_mut() {
            mailboxes.remove(&id);
        }
    }

    /// Process queued work until the queue is empty or the per-turn cap is
    /// reached. Returns the number of envelopes processed.
    pub fn run_until_idle(&self) -> usize {
        self.assert_control_thread("ControlLoop::run_until_idle");
        let limit = self.inner.config.max_tasks_per_turn;
        let mut processed = 0;
        while processed < limit {
            let Ok(envelope) = self.inner.rx.try_recv() else {
                break;
            };
            self.process(envelope);
            processed += 1;
        }
        processed
    }

    /// Block for up to `timeout` waiting for work, then drain the queue.
    ///
    /// Returns the number of envelopes processed (zero on timeout).
    pub fn run_once_blocking(&self, timeout: Duration) -> usize {
        self.assert_control_thread("ControlLoop::run_once_blocking");
        match self.inner.rx.recv_timeout(timeout) {
            Ok(envelope) => {
                self.process(envelope);
                1 + self.run_until_idle()
            }
            Err(_) => 0,
        }
    }

    fn process(&self, envelope: Envelope) {
        match envelope {
            Envelope::Task(key) => {
                let task = self.inner.tasks.borrow_mut().remove(&key);
                if let Some(task) = task {
                    tracing::trace!(message = "dispatch.task", loop_id = self.inner.id, key);
                    task();
                }
            }
            Envelope::Letter { mailbox, token } => {
                self.deliver_local(mailbox, token);
            }
        }
    }

    fn deliver_local(&self, mailbox: MailboxId, token: u64) -> bool {
        let target = self.inner.mailboxes.borrow().get(&mailbox).cloned();
        match target.and_then(|weak| weak.upgrade()) {
            Some(target) => {
                tracing::trace!(
                    message = "dispatch.letter",
                    loop_id = self.inner.id,
                    mailbox = mailbox.raw(),
                    token
                );
                target.deliver(token);
                true
            }
            None => {
                self.unregister_mailbox(mailbox);
                tracing::debug!(
                    message = "dispatch.letter_dropped",
                    loop_id = self.inner.id,
                    mailbox = mailbox.raw(),
                    token
                );
                false
            }
        }
    }
}

/// Thread-safe address of a [`ControlLoop`].
#[derive(Clone)]
pub struct LoopHandle {
    loop_id: u64,
    thread: ThreadId,
    tx: mpsc::Sender<Envelope>,
}

impl fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopHandle")
            .field("loop_id", &self.loop_id)
            .field("thread", &self.thread)
            .finish()
    }
}

impl LoopHandle {
    /// Id of the loop this handle addresses.
    #[must_use]
    pub fn loop_id(&self) -> u64 {
        self.loop_id
    }

    /// Whether the calling thread is the addressed loop's control thread.
    #[must_use]
    pub fn is_control_thread(&self) -> bool {
        thread::current().id() == self.thread
    }

    /// Queue `token` for `mailbox`; it is delivered on a later turn even when
    /// called from the control thread itself.
    ///
    /// Returns `false` if the control thread has gone away.
    pub fn enqueue(&self, mailbox: MailboxId, token: u64) -> bool {
        match self.tx.send(Envelope::Letter { mailbox, token }) {
            Ok(()) => true,
            Err(_) => {
                tracing::debug!(
                    message = "dispatch.loop_gone",
                    loop_id = self.loop_id,
                    mailbox = mailbox.raw(),
                    token
                );
                false
            }
        }
    }

    /// Deliver `token` right away when called on the control thread,
    /// otherwise queue it. Never blocks.
    pub fn deliver(&self, mailbox: MailboxId, token: u64) -> bool {
        if self.is_control_thread()
            && let Some(control) = ControlLoop::try_current()
            && control.id() == self.loop_id
        {
            return control.deliver_local(mailbox, token);
        }
        self.enqueue(mailbox, token)
    }
}
