//! # axml-rewrite
//!
//! In-place resource ID rewriting for Android binary XML resource trees,
//! applied while the tree is being parsed so that a replacement resource
//! package can transparently substitute resources for an original package at
//! inflation time.
//!
//! The crate splits into a small set of layers:
//!
//! - [`abi`] resolves the four private `libandroidfw.so` entry points by
//!   mangled name, selecting 32/64-bit symbol variants by pointer width.
//! - [`layout`] is the versioned schema for the wire format and for the
//!   parser's private in-memory structures; all offset arithmetic and
//!   endianness conversion lives here.
//! - [`engine`] walks a document through the [`engine::XmlCursor`] capability
//!   trait and rewrites app-owned attribute-name IDs and reference values via
//!   an [`engine::IdTranslator`], always leaving the parser restartable.
//! - [`live`] implements the cursor over a foreign platform parser;
//!   [`mem`] implements it over an owned buffer for host-side use and tests.
//! - [`hook`] ties it together as once-per-process initialization plus the
//!   rewrite entry point.
//!
//! Substitution policy is out of scope: deciding *which* replacement ID to
//! use is entirely the translator's business.

pub mod abi;
pub mod engine;
pub mod hook;
pub mod layout;
pub mod live;
pub mod mem;
mod tests;

pub use engine::{
    rewrite_document, IdTranslator, PackageRef, ParseEvent, RewriteStats, TranslateFault,
    XmlCursor,
};
pub use hook::{initialize, is_initialized, RewriteError};
pub use layout::{is_app_resource, TypedValue, APP_PACKAGE_THRESHOLD};
