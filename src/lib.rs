//! Integrated gang scheduler core for a partitioned virtualization platform.
//!
//! Time-multiplexes a set of domains (each a fixed VCPU/CPU-mask pair) onto
//! a shared pool of CPUs so that every VCPU of a domain runs simultaneously
//! with its siblings (the *gang invariant*), across four policy classes:
//! exclusive, time-triggered, event-triggered, and best-effort.
//!
//! `#![no_std]` outside test builds: the real deployment target is a
//! hypervisor scheduler running with interrupts disabled, where there is no
//! heap-backed standard library, only `alloc`. Unit tests run under `std`
//! so they can use the ordinary `#[test]` harness instead of a custom
//! bare-metal one.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod admission;
pub mod bitset;
pub mod config;
pub mod control;
pub mod decision;
pub mod domain;
pub mod error;
pub mod hostif;
pub mod lifecycle;
pub mod local;
pub mod queue;
pub mod reconfig;
pub mod ticket;
pub mod time;
pub mod topology;
pub mod waitset;
pub mod wire;

pub use config::GangConfig;
pub use control::GangScheduler;
pub use domain::{DomId, Domain, MuxPolicy};
pub use error::{GangError, GangResult};
