//! Cross-cutting services module
//!
//! Currently the event dispatcher that routes outbound-call and pipeline
//! telemetry to the `log` facade.

pub mod events;

pub use events::{
    CaptchaPollEvent, EventDispatcher, EventHandler, LoggingHandler, RelayEvent, RequestEvent,
    ResponseEvent, StepEvent,
};
