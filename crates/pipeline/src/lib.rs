//! Pull-loop pipeline: records streamed webhook events, reports dead letters, and replays.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod replay;
mod sink;
mod worker;

pub use error::Error;
pub use replay::{ReplayReport, Replayer, ReplayerOptions};
pub use sink::{ChannelSink, DeadLetterSink, LogSink};
pub use worker::{BatchReport, Outcome, Worker, WorkerOptions};
