use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// A one-way cancellation signal shared by every kernel thread.
///
/// Blocking waits select on [`watch`](#method.watch): it never yields a
/// value, it only disconnects once the signal ends. A signal can be derived
/// from a parent with [`child`](#method.child) and then also ends whenever
/// the parent does.
#[derive(Clone)]
pub struct EndSignal {
    inner: Arc<SignalInner>,
}

struct SignalInner {
    ended: AtomicBool,
    trigger: Mutex<Option<Sender<()>>>,
    watch: Receiver<()>,
    children: Mutex<Vec<Weak<SignalInner>>>,
}

impl SignalInner {
    fn end(&self) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        // dropping the sender disconnects every watcher
        self.trigger.lock().take();

        let children: Vec<_> = self.children.lock().drain(..).collect();
        for child in children {
            if let Some(child) = child.upgrade() {
                child.end();
            }
        }
    }
}

impl EndSignal {
    /// A signal that has not ended.
    pub fn new() -> Self {
        let (trigger, watch) = crossbeam_channel::bounded(0);
        EndSignal {
            inner: Arc::new(SignalInner {
                ended: AtomicBool::new(false),
                trigger: Mutex::new(Some(trigger)),
                watch,
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    /// A new signal that ends with this one, but can also end on its own.
    pub fn child(&self) -> EndSignal {
        let child = EndSignal::new();
        {
            let mut children = self.inner.children.lock();
            // checked under the lock so a concurrent end() cannot miss the child
            if !self.is_ended() {
                children.retain(|weak| weak.strong_count() > 0);
                children.push(Arc::downgrade(&child.inner));
                return child;
            }
        }
        child.end();
        child
    }

    /// End this signal and every child. Idempotent.
    pub fn end(&self) {
        self.inner.end();
    }

    /// Whether `end` was called on this signal or a parent.
    pub fn is_ended(&self) -> bool {
        self.inner.ended.load(Ordering::SeqCst)
    }

    pub(crate) fn watch(&self) -> &Receiver<()> {
        &self.inner.watch
    }
}

impl Default for EndSignal {
    fn default() -> Self {
        EndSignal::new()
    }
}

impl ::std::fmt::Debug for EndSignal {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        f.debug_struct("EndSignal")
            .field("ended", &self.is_ended())
            .finish()
    }
}
