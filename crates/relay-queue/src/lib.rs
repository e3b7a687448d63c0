//! Relay queue core.
//!
//! Requests enter through [`RelayIntake`] into the Requested collection. A
//! single [`Dispatcher`] moves them into Queued and hands one record per tick
//! to the [`Submitter`], which signs it with the custodial account, submits
//! it and records the terminal outcome.

pub mod config;
pub mod dispatcher;
pub mod intake;
pub mod submitter;
pub mod transitions;

#[cfg(test)]
mod testing;

pub use config::QueueConfig;
pub use dispatcher::{wake_channel, DispatchEvent, DispatchEventHandler, Dispatcher, TickReport};
pub use intake::{Accepted, RelayIntake, RelaySubmission};
pub use submitter::{SubmitOutcome, Submitter};
