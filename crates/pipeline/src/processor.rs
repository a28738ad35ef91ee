//! Processor chain - per-client event transforms
//!
//! Processors run synchronously on the publish path, before the event
//! enters the queue. A processor may mutate the event, annotate it, or
//! drop it by returning `None`. Concrete processors live with the
//! embedding application; the pipeline only knows the trait.
//!
//! The acknowledgement tag is stamped after the chain has run, so
//! processors never observe it.

use std::sync::Arc;

use skiff_event::Event;

use crate::error::Result;

/// One event transform
///
/// Implementations must be cheap: they run inline on every publish.
pub trait Processor: Send + Sync {
    /// Transform the event; `Ok(None)` drops it
    fn run(&self, event: Event) -> Result<Option<Event>>;

    /// Name of this processor for logging
    fn name(&self) -> &'static str;
}

/// Ordered sequence of processors
#[derive(Default)]
pub struct Chain {
    processors: Vec<Box<dyn Processor>>,
}

impl Chain {
    /// An empty, no-op chain
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(processors: Vec<Box<dyn Processor>>) -> Self {
        Self { processors }
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Processor names, for diagnostics
    pub fn names(&self) -> Vec<&'static str> {
        self.processors.iter().map(|p| p.name()).collect()
    }

    /// Run the chain; stops at the first drop or error
    pub fn run(&self, event: Event) -> Result<Option<Event>> {
        let mut current = event;
        for processor in &self.processors {
            match processor.run(current)? {
                Some(event) => current = event,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain").field("names", &self.names()).finish()
    }
}

/// Builds effective per-client chains from the pipeline-wide processors
///
/// The client's own processors run first (most specific wins on field
/// collisions), then the pipeline-wide chain.
#[derive(Debug, Clone, Default)]
pub struct ProcessorSupport {
    global: Arc<Chain>,
}

impl ProcessorSupport {
    pub fn new(global: Chain) -> Self {
        Self {
            global: Arc::new(global),
        }
    }

    /// Compose a client's processors with the pipeline-wide chain
    pub fn client_chain(&self, own: Chain) -> ClientChain {
        ClientChain {
            own,
            global: Arc::clone(&self.global),
        }
    }
}

/// A client's composed processing chain
#[derive(Debug)]
pub struct ClientChain {
    own: Chain,
    global: Arc<Chain>,
}

impl ClientChain {
    /// Run client processors, then the pipeline-wide chain
    pub fn run(&self, event: Event) -> Result<Option<Event>> {
        let Some(event) = self.own.run(event)? else {
            return Ok(None);
        };
        self.global.run(event)
    }

    pub fn is_empty(&self) -> bool {
        self.own.is_empty() && self.global.is_empty()
    }
}
