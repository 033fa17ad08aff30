//! Local authoritative stores that push every write, best-effort, to a
//! subscriber set that can change at runtime.
//!
//! Two applications share the same fan-out machinery:
//!
//! - an eventually consistent key/value [`replica`] that sends each local
//!   write to its peers as a `key:value` line over a fresh TCP connection;
//! - a paper storage server ([`paper_server`]) that notifies connected
//!   clients through bounded channels and publishes to a queue on the
//!   [`broker`].
//!
//! Modules:
//!
//! - [`store`] and [`papers`] hold the authoritative local state.
//! - [`registry`] tracks subscribers; [`propagation`] fans a message out to
//!   them without waiting for any acknowledgment.
//! - [`ingress`] applies updates pushed by peers.
//! - [`wire`] is the peer line format, [`message`] the JSON line protocols.
//! - [`broker`] is the durable-queue broker plus its publisher and consumer.
//! - [`paper_client`] is the interactive client for the paper server.
//! - [`cli`], [`config`] and [`console`] cover flags, validated settings and
//!   interactive commands.
//! - [`error`] has the typed errors callers match on.

pub mod broker;
pub mod cli;
pub mod config;
pub mod console;
pub mod error;
pub mod ingress;
pub mod message;
pub mod paper_client;
pub mod paper_server;
pub mod papers;
pub mod propagation;
pub mod registry;
pub mod replica;
pub mod store;
pub mod wire;
