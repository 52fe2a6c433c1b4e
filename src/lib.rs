//! Group Runner: admission-controlled execution of per-group worker
//! containers plus the scheduling loop that feeds it.
//!
//! The crate orchestrates *when* and *how many* units of work run, never
//! *what* they do: message handling, container spawning, persistence and
//! chat transports are injected collaborators behind the traits in
//! [`container`], [`store`] and [`registry`].

pub mod config;
pub mod container;
pub mod error;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod store;
