//! Sessions: one dispatcher per connection, each walking the
//! `Initializing → Negotiated → Active → Closing → Closed` lifecycle.

pub mod dispatcher;
pub mod inflight;
pub mod manager;
pub mod state;

pub use dispatcher::{DispatchOptions, Dispatcher};
pub use inflight::InFlightTable;
pub use manager::{SessionInfo, SessionManager};
pub use state::SessionState;
