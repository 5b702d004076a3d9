//! Collaborators the driver consumes from the surrounding system

use std::fmt;
use std::sync::Arc;

use crate::logging::Logger;
use crate::resource::{IoResourceManager, IrqManager};
use crate::time::Clock;

/// Port claims, IRQ registration, time and logging, passed to every
/// component at construction
#[derive(Clone)]
pub struct Platform {
    pub io: Arc<dyn IoResourceManager>,
    pub irq: Arc<dyn IrqManager>,
    pub clock: Arc<dyn Clock>,
    pub logger: Logger,
}

impl Platform {
    pub fn new(
        io: Arc<dyn IoResourceManager>,
        irq: Arc<dyn IrqManager>,
        clock: Arc<dyn Clock>,
        logger: Logger,
    ) -> Self {
        Self {
            io,
            irq,
            clock,
            logger,
        }
    }

    /// Real port I/O on x86_64, interrupts delivered through `dispatcher`
    #[cfg(target_arch = "x86_64")]
    pub fn hardware(dispatcher: crate::resource::IrqDispatcher) -> Self {
        Self::new(
            Arc::new(crate::drivers::port_io::PortIoManager::new()),
            Arc::new(dispatcher),
            Arc::new(crate::time::SystemClock::new()),
            Logger::with_facade(),
        )
    }

    /// Same collaborators, logging under `<module>.<name>`
    pub fn scoped(&self, name: &str) -> Platform {
        Platform {
            logger: self.logger.scoped(name),
            ..self.clone()
        }
    }
}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Platform").field("logger", &self.logger).finish()
    }
}
