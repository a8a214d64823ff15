//! Long-running runtime: poll timer + change queue + control socket.

mod error;
pub mod paths;
pub mod protocol;
pub mod queue;
mod runtime;

pub use error::DaemonError;
pub use protocol::{
    request_notify, request_poll, request_status, request_stop, send_request, DaemonRequest,
    DaemonResponse,
};
pub use queue::{ChangeHandler, ChangeQueue, QueueStats, QueueWorker, Submitted};
pub use runtime::{
    init_tracing, run, run_with_session, start_blocking, PollStats, TickSource, TickSummary,
};
