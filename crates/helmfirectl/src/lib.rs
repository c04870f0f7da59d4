//! helmfirectl - command-line front end for helmfire.
//!
//! `sync` deploys a helmfile with inline substitutions; the substitution
//! commands talk to a running daemon when there is one.

pub mod cli;
pub mod commands;
pub mod errors;
pub mod output;
