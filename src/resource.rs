//! Port I/O and IRQ ownership
//!
//! The driver never touches hardware directly. It asks an
//! [`IoResourceManager`] for exclusive access to a port range and an
//! [`IrqManager`] for an interrupt line; both hand back claims that are
//! released explicitly or on drop.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use spin::RwLock;

use crate::error::{IdeError, IdeResult};

/// Byte/word access to a claimed port range, offsets relative to the base
pub trait IoResource: Send + Sync {
    fn base(&self) -> u16;
    fn len(&self) -> u16;
    fn in_byte(&self, offset: u16) -> u8;
    fn out_byte(&self, offset: u16, value: u8);
    fn in_word(&self, offset: u16) -> u16;
    fn out_word(&self, offset: u16, value: u16);
    /// Give the range back; later calls are no-ops
    fn release(&self);
}

pub trait IoResourceManager: Send + Sync {
    /// Claim `len` ports starting at `base` for `owner`
    fn claim_io(&self, owner: &str, base: u16, len: u16) -> IdeResult<Box<dyn IoResource>>;
}

/// Interrupt callback; receives the line that fired
pub type IrqHandler = Arc<dyn Fn(u8) + Send + Sync>;

pub trait IrqClaim: Send + Sync {
    fn irq(&self) -> u8;
    /// Unregister the handler; later calls are no-ops
    fn release(&self);
}

pub trait IrqManager: Send + Sync {
    fn register_irq(&self, owner: &str, irq: u8, handler: IrqHandler) -> IdeResult<Box<dyn IrqClaim>>;
}

/// Per-line interrupt statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IrqLineStats {
    pub dispatched: u64,
    pub unhandled: u64,
}

struct HandlerEntry {
    id: u64,
    owner: String,
    handler: IrqHandler,
}

struct DispatcherInner {
    handlers: RwLock<BTreeMap<u8, Vec<HandlerEntry>>>,
    next_id: AtomicU64,
    dispatched: Vec<AtomicU64>,
    unhandled: Vec<AtomicU64>,
}

impl DispatcherInner {
    fn remove(&self, irq: u8, id: u64) {
        let mut handlers = self.handlers.write();
        if let Some(entries) = handlers.get_mut(&irq) {
            entries.retain(|entry| entry.id != id);
            if entries.is_empty() {
                handlers.remove(&irq);
            }
        }
    }
}

/// Interrupt handler table keyed by line.
///
/// Lines may be shared; [`IrqDispatcher::dispatch`] runs every handler
/// registered on the line. The platform's interrupt entry calls
/// `dispatch`, the simulated channel does the same.
#[derive(Clone)]
pub struct IrqDispatcher {
    inner: Arc<DispatcherInner>,
}

impl IrqDispatcher {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                handlers: RwLock::new(BTreeMap::new()),
                next_id: AtomicU64::new(1),
                dispatched: (0..256).map(|_| AtomicU64::new(0)).collect(),
                unhandled: (0..256).map(|_| AtomicU64::new(0)).collect(),
            }),
        }
    }

    /// Run the handlers registered on `irq`; returns whether any ran
    pub fn dispatch(&self, irq: u8) -> bool {
        // Handlers run outside the table lock so they may release their own claim
        let handlers: Vec<IrqHandler> = self
            .inner
            .handlers
            .read()
            .get(&irq)
            .map(|entries| entries.iter().map(|entry| entry.handler.clone()).collect())
            .unwrap_or_default();

        self.inner.dispatched[irq as usize].fetch_add(1, Ordering::Relaxed);
        if handlers.is_empty() {
            self.inner.unhandled[irq as usize].fetch_add(1, Ordering::Relaxed);
            return false;
        }

        for handler in handlers {
            handler(irq);
        }
        true
    }

    pub fn handler_count(&self, irq: u8) -> usize {
        self.inner.handlers.read().get(&irq).map_or(0, |entries| entries.len())
    }

    /// Owners registered on `irq`, in registration order
    pub fn owners(&self, irq: u8) -> Vec<String> {
        self.inner
            .handlers
            .read()
            .get(&irq)
            .map(|entries| entries.iter().map(|entry| entry.owner.clone()).collect())
            .unwrap_or_default()
    }

    pub fn stats(&self, irq: u8) -> IrqLineStats {
        IrqLineStats {
            dispatched: self.inner.dispatched[irq as usize].load(Ordering::Relaxed),
            unhandled: self.inner.unhandled[irq as usize].load(Ordering::Relaxed),
        }
    }
}

impl Default for IrqDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for IrqDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines: Vec<u8> = self.inner.handlers.read().keys().copied().collect();
        f.debug_struct("IrqDispatcher").field("lines", &lines).finish()
    }
}

impl IrqManager for IrqDispatcher {
    fn register_irq(&self, owner: &str, irq: u8, handler: IrqHandler) -> IdeResult<Box<dyn IrqClaim>> {
        if owner.is_empty() {
            return Err(IdeError::InvalidParameter);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .handlers
            .write()
            .entry(irq)
            .or_insert_with(Vec::new)
            .push(HandlerEntry {
                id,
                owner: owner.to_string(),
                handler,
            });

        Ok(Box::new(DispatcherClaim {
            irq,
            id,
            dispatcher: Arc::downgrade(&self.inner),
            released: AtomicBool::new(false),
        }))
    }
}

struct DispatcherClaim {
    irq: u8,
    id: u64,
    dispatcher: Weak<DispatcherInner>,
    released: AtomicBool,
}

impl IrqClaim for DispatcherClaim {
    fn irq(&self) -> u8 {
        self.irq
    }

    fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(inner) = self.dispatcher.upgrade() {
            inner.remove(self.irq, self.id);
        }
    }
}

impl Drop for DispatcherClaim {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_handler(counter: &Arc<AtomicUsize>) -> IrqHandler {
        let counter = counter.clone();
        Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn shared_lines_run_every_handler() {
        let dispatcher = IrqDispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let first = dispatcher.register_irq("ide0", 14, counting_handler(&hits)).unwrap();
        let _second = dispatcher.register_irq("ide1", 14, counting_handler(&hits)).unwrap();
        assert_eq!(dispatcher.owners(14), vec!["ide0".to_string(), "ide1".to_string()]);

        assert!(dispatcher.dispatch(14));
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        first.release();
        first.release();
        assert_eq!(dispatcher.handler_count(14), 1);
        dispatcher.dispatch(14);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn dropped_claim_unregisters() {
        let dispatcher = IrqDispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));
        drop(dispatcher.register_irq("ide0", 15, counting_handler(&hits)).unwrap());

        assert!(!dispatcher.dispatch(15));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.stats(15), IrqLineStats { dispatched: 1, unhandled: 1 });
    }
}
