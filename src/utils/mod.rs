//! Process bootstrap and retry helpers shared by the binaries and workers.

pub mod bootstrap;
pub mod retry;
