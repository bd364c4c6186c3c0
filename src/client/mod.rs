//! Session management: connection lifecycle, receive worker and the
//! receive-side pipeline

pub mod pipeline;
pub mod session;
pub mod state;
mod worker;

pub use pipeline::Pipeline;
pub use session::Session;
pub use state::{SessionState, SessionStats, StateCell, StatsSnapshot};
