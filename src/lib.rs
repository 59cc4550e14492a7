#![warn(missing_docs)]

//! <div class="warning">
//!
//! Note: API is unstable, and may change in `0.x` versions.
//!
//! </div>
//!
//! # As a library
//!
//! As a library, usually you prefer to use [`materialize`] to download
//! one post with its embedded metadata, and [`api`] to talk to the
//! e621 API directly.
//!
//! See [`materialize::Materializer#example`] for example.
//!
//! # As a binary
//!
//! In addition to the above, you also need [`cli`] to build the command line.
//!
//! See `main.rs` to know how to assemble these modules as a binary.

pub mod api;
#[cfg(feature = "cli")]
pub mod cli;
pub mod materialize;

pub mod config;
pub mod download;
pub mod embed;
pub mod hash;
pub mod retry;
pub mod tags;

#[cfg(test)]
pub(crate) mod test_helpers;
