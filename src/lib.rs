// Allow some clippy lints that are too pedantic for this project
#![allow(clippy::enum_variant_names)]
#![allow(clippy::doc_overindented_list_items)]

//! # CMap Oxide
//!
//! Reproducible conversion of CJK CMap resources to gzip-compressed JSON.
//!
//! ## Core Features
//!
//! - **CID tables**: Adobe `cid2code.txt` tables → one `<cmap>.json.gz` per
//!   horizontal/vertical CMap plus `to-unicode-<registry>.json.gz`
//! - **Legacy migration**: `*.pickle.gz` CMaps from older releases → JSON
//! - **Reproducible output**: gzip headers carry no timestamp and no file
//!   name, so regenerating an artifact yields identical bytes
//!
//! ## Quick Start
//!
//! ```no_run
//! use cmap_oxide::cmap;
//! use cmap_oxide::config::ConvertConfig;
//! use cmap_oxide::legacy;
//! use std::path::{Path, PathBuf};
//!
//! # fn main() -> cmap_oxide::Result<()> {
//! let config = ConvertConfig::new().with_codec("UniJIS-UCS2", "utf-16be");
//! cmap::convert_tables(
//!     &[PathBuf::from("cid2code_Adobe_Japan1.txt")],
//!     "Adobe-Japan1",
//!     Path::new("cmap"),
//!     &config,
//! )?;
//!
//! legacy::convert_pickle_to_json(Path::new("H.pickle.gz"), Path::new("H.json.gz"))?;
//! # Ok(())
//! # }
//! ```
//!
//! ## License
//!
//! Licensed under either of:
//!
//! * Apache License, Version 2.0 (<http://www.apache.org/licenses/LICENSE-2.0>)
//! * MIT license (<http://opensource.org/licenses/MIT>)
//!
//! at your option.

#![warn(missing_docs)]

// Error handling
pub mod error;

// Configuration
pub mod config;

// Reproducible gzip writer
pub mod compression;

// CID table conversion
pub mod cmap;

// Legacy pickle migration
pub mod legacy;

// Re-exports
pub use cmap::{CMapConverter, CMapDocument, ToUnicodeDocument};
pub use compression::compress;
pub use config::ConvertConfig;
pub use error::{Error, Result};

// Version info
/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
