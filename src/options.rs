//! Contains the types needed to configure a [`Client`](crate::Client).
//!
//! The options structs in this module use the
//! [`typed-builder`](https://crates.io/crates/typed-builder) crate to derive a
//! type-safe builder API. For example, a [`ClientOptions`] with only the seed
//! list and an application name set can be created as follows:
//!
//! ```rust
//! # use quilldb::options::{ClientOptions, ServerAddress};
//! # fn build() -> quilldb::error::Result<()> {
//! let options = ClientOptions::builder()
//!     .hosts(vec![ServerAddress::parse("db1.example.com:29017")?])
//!     .app_name("inventory-service".to_string())
//!     .build();
//! # Ok(())
//! # }
//! ```

pub use crate::client::options::*;
