//! The iteration engine — the heart of agentd.
//!
//! One turn follows a **think → act** cycle:
//!
//! 1. **Receive** a user message
//! 2. **Assemble** the prompt (system instruction + recalled memories +
//!    recent history)
//! 3. **Stream** from the configured model provider
//! 4. **If tool calls**: execute them through the session's tool pool,
//!    append the results, loop back to step 2
//! 5. **If text only**: the turn is complete
//!
//! The loop continues until the model responds without tool calls or
//! the per-turn iteration bound is reached. Every step is relayed to
//! the caller as a [`TurnEvent`].

pub mod context;
pub mod engine;
pub mod turn_event;

pub use context::SessionContext;
pub use engine::{EngineSettings, IterationEngine};
pub use turn_event::TurnEvent;
