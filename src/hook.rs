//! Process-wide installation of the rewrite feature.
//!
//! Symbol binding and translator registration happen exactly once; the outcome
//! (success or failure) is cached, so concurrent first calls race only on who
//! performs the initialization, never on observing a half-built state. A
//! failed initialization leaves the feature disabled for the process lifetime;
//! there is no retry and no degraded rewrite path.

use std::ffi::c_void;

use log::{debug, warn};
use once_cell::sync::OnceCell;

use crate::abi::AndroidFw;
use crate::engine::{self, IdTranslator, PackageRef, RewriteStats, TranslateFault};
use crate::layout::ParserLayout;
use crate::live::{LiveCursor, OverlayError};

struct Hook {
    abi: AndroidFw,
    layout: ParserLayout,
    translator: Box<dyn IdTranslator + Send + Sync>,
}

static HOOK: OnceCell<Option<Hook>> = OnceCell::new();

/// Binds the platform symbols and registers `translator`, once per process.
///
/// Returns whether the feature is usable. On the first call the outcome is
/// cached; later calls return the cached outcome and drop their translator
/// unused. Failure is reported only through the return value and a warning
/// log, matching the caller's expectation that the surrounding framework
/// decides how loud to be.
pub fn initialize<T>(translator: T) -> bool
where
    T: IdTranslator + Send + Sync + 'static,
{
    HOOK.get_or_init(|| match AndroidFw::bind() {
        Ok(abi) => Some(Hook {
            abi,
            layout: ParserLayout::current(),
            translator: Box::new(translator),
        }),
        Err(err) => {
            warn!("resource rewriting disabled: {err}");
            None
        }
    })
    .is_some()
}

/// Whether [`initialize`] has run and succeeded.
pub fn is_initialized() -> bool {
    matches!(HOOK.get(), Some(Some(_)))
}

/// Failures of the rewrite entry point.
#[derive(Debug)]
pub enum RewriteError {
    /// [`initialize`] has not succeeded in this process.
    Uninitialized,
    /// The parser overlay could not be established.
    Overlay(OverlayError),
    /// The registered translator faulted; carried through unchanged after the
    /// mandatory parser restart.
    Fault(TranslateFault),
}

impl std::fmt::Display for RewriteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RewriteError::Uninitialized => write!(f, "resource rewriting is not initialized"),
            RewriteError::Overlay(err) => write!(f, "{err}"),
            RewriteError::Fault(fault) => write!(f, "{fault}"),
        }
    }
}

impl std::error::Error for RewriteError {}

/// Rewrites a live platform parser in place, walking it from its current
/// position to the end of the document and restarting it before returning.
///
/// A null `parser` is a no-op, mirroring the platform hook contract.
///
/// # Safety
///
/// `parser` must be null or point to a `ResXMLParser` owned by the calling
/// thread for the duration of the call.
pub unsafe fn rewrite_document(
    parser: *mut c_void,
    original: PackageRef,
    replacement: PackageRef,
) -> Result<RewriteStats, RewriteError> {
    let hook = match HOOK.get() {
        Some(Some(hook)) => hook,
        _ => return Err(RewriteError::Uninitialized),
    };
    if parser.is_null() {
        debug!("rewrite requested for a null parser; skipping");
        return Ok(RewriteStats::default());
    }
    let mut cursor =
        LiveCursor::from_raw(parser, &hook.abi, hook.layout).map_err(RewriteError::Overlay)?;
    engine::rewrite_document(&mut cursor, hook.translator.as_ref(), original, replacement)
        .map_err(RewriteError::Fault)
}
