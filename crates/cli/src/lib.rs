//! Operator CLI for warmline session pools.

pub mod cli;
pub mod commands;
pub mod config;
pub mod logging;
pub mod output;
pub mod token;
