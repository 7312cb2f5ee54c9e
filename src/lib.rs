#![doc = include_str!("../README.md")]
#![warn(
    missing_docs,
    rustdoc::missing_crate_level_docs,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss
)]
#![allow(clippy::match_like_matches_macro)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod client;
mod cmap;
mod db;
pub mod error;
mod hello;
pub mod options;
pub(crate) mod runtime;
mod sdam;
#[cfg(test)]
mod test;

pub use bson;

pub use crate::{
    client::{session::ClientSession, Client},
    cmap::Command,
    db::Database,
};

/// A boxed future.
pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;
