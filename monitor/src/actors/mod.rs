//! Actor runtime for the monitoring core.
//!
//! Three actors: `TraceStoreActor` owns canonical state, `PushChannelActor`
//! and `PollSchedulerActor` feed it. The two channels never touch each
//! other's internals; they observe effects only through the store.

pub mod poller;
pub mod push_channel;
pub mod trace_store;

pub use poller::{PollSchedulerActor, PollSchedulerArguments, PollerMsg};
pub use push_channel::{PushChannelActor, PushChannelArguments, PushChannelMsg};
pub use trace_store::{
    PollingHints, StoreSnapshot, TraceStoreActor, TraceStoreArguments, TraceStoreMsg,
};
