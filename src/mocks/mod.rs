//! Deterministic test doubles.
//!
//! A [`ManualClock`] paired with an advancing [`TrackingSleeper`] lets every
//! wait in the fetch layer complete instantly while virtual time moves
//! forward by exactly the requested amount. [`MockTransport`] replays a
//! scripted sequence of outcomes and [`RecordingHooks`] keeps an ordered log
//! of lifecycle events.

mod clock;
mod hooks;
mod transport;

pub use clock::{ManualClock, TrackingSleeper};
pub use hooks::{HookEvent, RecordingHooks};
pub use transport::{MockOutcome, MockResponse, MockTransport};
