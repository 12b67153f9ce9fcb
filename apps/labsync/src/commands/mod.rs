//! Subcommand implementations. Each exposes its `clap` arguments and an
//! `execute` function.

pub mod identity;
pub mod migrate;
pub mod runs;
pub mod serve;
pub mod sync;
