//! Binary support for `pw-server`: CLI, logging, the served object graph and
//! the transport accept loops.

pub mod cli;
pub mod logging;
pub mod objects;
pub mod serve;
