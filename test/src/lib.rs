//! Integration harness for the meshmap workspace: peer wrappers that move
//! wire frames between engines, and a shared storage spy for restart and
//! persistence scenarios.

pub mod helpers;

pub use helpers::*;
