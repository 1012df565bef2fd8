//! Hooks for reacting to things the engine does.
//!
//! Subscribers register async closures with [`EventHooks`]. [`EventHandlers`] turns them into channel-backed
//! handlers, and the [`EventProducers`] it hands out are passed to the API objects that publish events.
mod channel;
mod event_types;
mod hooks;

pub use channel::{EventHandler, EventProducer, Handler};
pub use event_types::*;
pub use hooks::{EventHandlers, EventHooks, EventProducers};
