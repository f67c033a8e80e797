#![doc = include_str!("../README.md")]

pub mod cache;
pub mod cli;
pub mod config;
pub mod daemonize;
pub mod error;
pub mod hash;
pub mod list;
pub mod pipe;
pub mod protocol;
pub mod queue;
pub mod reactor;
pub mod readiness;
pub mod round_robin;
pub mod session;
pub mod socket;
pub mod worker;
