//! beatops: command-line beat tracking.
//!
//! The CLI resolves its options into a [`config::Config`], builds one
//! [`pipeline::Pipeline`] from it and runs that pipeline over one file
//! ([`single`]) or many ([`batch`]).

pub mod batch;
pub mod cli;
pub mod config;
pub mod evaluate;
pub mod pipeline;
pub mod single;
