//! Trace monitoring core.
//!
//! Keeps a client-side view of agent traces consistent across two concurrent
//! update channels - a push event stream and adaptive polling - and rebuilds
//! linear conversation transcripts from persisted trace trees.
//!
//! The `TraceStoreActor` is the single owner of canonical state; the push
//! channel and the poll scheduler only write through its mailbox. The
//! conversation module is pure and performs no I/O.

pub mod actors;
pub mod client;
pub mod config;
pub mod conversation;
