//! Event consumer: an AMQP topic-exchange subscriber that dispatches
//! incoming domain events to handlers, with retry-via-requeue and
//! dead-letter-queue semantics driven by an `x-retry-count` header.

pub mod consumer;
pub mod dispatch;

pub use consumer::Consumer;
pub use dispatch::{EventHandler, HandlerOutcome};
