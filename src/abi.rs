//! Symbol binding against the platform resource framework.
//!
//! `libandroidfw.so` exports no stable C API for its XML parser; the entry
//! points used here are private C++ methods resolved by mangled name. Under
//! the Itanium C++ ABI a non-virtual member function is callable as a plain C
//! function taking `this` first, which is how the typed pointers below are
//! declared. The mangled name of `getAttributeNameID` and `stringAt` differs
//! between pointer widths because the index parameter type does.
//!
//! Binding is all-or-nothing: the feature either gets all four entry points or
//! none, and a failed bind closes the library handle again. Symbol absence is
//! an ABI contract this crate cannot control; it means the platform build is
//! unsupported and the feature must fail closed.

use std::ffi::c_void;

use libloading::Library;

/// Selects the 32-bit or 64-bit variant of a width-dependent constant.
pub const fn lp_select<T: Copy>(lp32: T, lp64: T) -> T {
    if cfg!(target_pointer_width = "64") {
        lp64
    } else {
        lp32
    }
}

/// Path of the platform resource framework library.
pub const FRAMEWORK_LIBRARY: &str = lp_select(
    "/system/lib/libandroidfw.so",
    "/system/lib64/libandroidfw.so",
);

const SYM_NEXT: &[u8] = b"_ZN7android12ResXMLParser4nextEv";
const SYM_RESTART: &[u8] = b"_ZN7android12ResXMLParser7restartEv";
const SYM_GET_ATTRIBUTE_NAME_ID: &[u8] = lp_select(
    b"_ZNK7android12ResXMLParser18getAttributeNameIDEj",
    b"_ZNK7android12ResXMLParser18getAttributeNameIDEm",
);
const SYM_STRING_AT: &[u8] = lp_select(
    b"_ZNK7android13ResStringPool8stringAtEjPj",
    b"_ZNK7android13ResStringPool8stringAtEmPm",
);

/// `android::ResXMLParser::next()`
pub type NextFn = unsafe extern "C" fn(*mut c_void) -> i32;
/// `android::ResXMLParser::restart()`
pub type RestartFn = unsafe extern "C" fn(*mut c_void) -> i32;
/// `android::ResXMLParser::getAttributeNameID(size_t)`
pub type GetAttributeNameIdFn = unsafe extern "C" fn(*const c_void, usize) -> i32;
/// `android::ResStringPool::stringAt(size_t, size_t*)`, returning a UTF-16
/// pointer plus code-unit length or null.
pub type StringAtFn = unsafe extern "C" fn(*const c_void, usize, *mut usize) -> *const u16;

/// Binding failures. Neither is retried; the rewrite feature stays disabled
/// for the process lifetime.
#[derive(Debug)]
pub enum BindError {
    /// The framework library could not be opened.
    LibraryOpen(String, String),
    /// The library opened but a required symbol is absent.
    MissingSymbol(&'static str),
}

impl std::fmt::Display for BindError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BindError::LibraryOpen(path, reason) => {
                write!(f, "cannot open {path}: {reason}")
            }
            BindError::MissingSymbol(name) => {
                write!(f, "required symbol {name} not found in framework library")
            }
        }
    }
}

impl std::error::Error for BindError {}

/// The four resolved entry points plus the library handle that keeps them
/// alive. Intended to be bound once and treated as read-only process state.
pub struct AndroidFw {
    // Held for its Drop: the resolved pointers are only valid while the
    // library stays mapped.
    _library: Library,
    next: NextFn,
    restart: RestartFn,
    get_attribute_name_id: GetAttributeNameIdFn,
    string_at: StringAtFn,
}

impl AndroidFw {
    /// Binds against the platform framework library at its fixed path.
    pub fn bind() -> Result<AndroidFw, BindError> {
        AndroidFw::bind_from(FRAMEWORK_LIBRARY)
    }

    /// Binds against a framework library at `path`. All four symbols must
    /// resolve; on any failure the handle is dropped before returning.
    pub fn bind_from(path: &str) -> Result<AndroidFw, BindError> {
        let library = unsafe { Library::new(path) }
            .map_err(|err| BindError::LibraryOpen(path.to_string(), err.to_string()))?;
        let (next, restart, get_attribute_name_id, string_at) = unsafe {
            (
                *library
                    .get::<NextFn>(SYM_NEXT)
                    .map_err(|_| BindError::MissingSymbol("ResXMLParser::next"))?,
                *library
                    .get::<RestartFn>(SYM_RESTART)
                    .map_err(|_| BindError::MissingSymbol("ResXMLParser::restart"))?,
                *library
                    .get::<GetAttributeNameIdFn>(SYM_GET_ATTRIBUTE_NAME_ID)
                    .map_err(|_| BindError::MissingSymbol("ResXMLParser::getAttributeNameID"))?,
                *library
                    .get::<StringAtFn>(SYM_STRING_AT)
                    .map_err(|_| BindError::MissingSymbol("ResStringPool::stringAt"))?,
            )
        };
        Ok(AndroidFw {
            _library: library,
            next,
            restart,
            get_attribute_name_id,
            string_at,
        })
    }

    pub fn next(&self) -> NextFn {
        self.next
    }

    pub fn restart(&self) -> RestartFn {
        self.restart
    }

    pub fn get_attribute_name_id(&self) -> GetAttributeNameIdFn {
        self.get_attribute_name_id
    }

    pub fn string_at(&self) -> StringAtFn {
        self.string_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lp_select_matches_pointer_width() {
        let selected = lp_select(32u32, 64u32);
        if cfg!(target_pointer_width = "64") {
            assert_eq!(selected, 64);
            assert!(FRAMEWORK_LIBRARY.contains("lib64"));
        } else {
            assert_eq!(selected, 32);
            assert!(!FRAMEWORK_LIBRARY.contains("lib64"));
        }
    }

    #[test]
    fn bind_fails_cleanly_on_missing_library() {
        match AndroidFw::bind_from("/nonexistent/libandroidfw.so") {
            Err(BindError::LibraryOpen(path, _)) => {
                assert_eq!(path, "/nonexistent/libandroidfw.so");
            }
            Err(other) => panic!("unexpected bind error: {other}"),
            Ok(_) => panic!("bind against a missing library must fail"),
        }
    }
}
