//! Host engine: session slots, the transmit sequencer and event dispatch
//!
//! [`Host`] owns every session and drives all protocol layers from the two
//! controller entry points plus the housekeeping and feedback jobs.

mod classic;
mod discovery;
pub mod dispatch;
pub mod feedback;
pub mod mailbox;
pub mod pool;
pub mod sequencer;
pub mod session;

#[cfg(test)]
mod tests;

pub use dispatch::Host;
pub use feedback::FeedbackQueue;
pub use mailbox::{OracleMailbox, OracleOp};
pub use pool::SessionPool;
pub use sequencer::{Bringup, BringupProgress, BringupStep, Sequencer, TxItem};
pub use session::{ConnFlags, DeviceSession, PageParams, SessionId, MAX_SESSIONS};
