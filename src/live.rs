//! Cursor over a live `ResXMLParser` owned by the platform.
//!
//! The parser object and its tree are foreign memory: this module never
//! allocates or frees them, it only steps the parser through the bound entry
//! points and overlays the documented [`ParserLayout`] offsets to reach the
//! tag records, the resource-ID table and the string pool.
//!
//! Two kinds of memory are involved and they differ in byte order. Fields of
//! the parser and tree objects themselves (event code, pointers, counts) are
//! host-native values written by C++ code. The document data they point at --
//! tag records, attribute arrays, the resource-ID table -- is the mapped wire
//! format and is read and written through the explicit conversions in
//! [`crate::layout`].

use std::ffi::c_void;

use crate::abi::AndroidFw;
use crate::engine::{ParseEvent, XmlCursor};
use crate::layout::{self, is_known_event_code, ParserLayout, TypedValue};

/// Failures establishing an overlay over a foreign parser. These are typed
/// "unsupported" conditions, never a reason to touch the memory anyway.
#[derive(Debug, PartialEq, Eq)]
pub enum OverlayError {
    /// Caller handed over a null parser pointer.
    NullParser,
    /// The tree back-reference read through the layout was null.
    NullTree,
    /// The self-test read of the event-code field produced a value the
    /// platform parser cannot report; the layout does not match this build.
    LayoutMismatch(i32),
}

impl std::fmt::Display for OverlayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverlayError::NullParser => write!(f, "parser pointer is null"),
            OverlayError::NullTree => write!(f, "parser has no tree back-reference"),
            OverlayError::LayoutMismatch(code) => write!(
                f,
                "event-code self-test read {code:#x}; parser layout does not match this platform"
            ),
        }
    }
}

impl std::error::Error for OverlayError {}

unsafe fn read_ptr(base: *const u8, offset: usize) -> *const u8 {
    (base.add(offset) as *const *const u8).read_unaligned()
}

unsafe fn read_native_usize(base: *const u8, offset: usize) -> usize {
    (base.add(offset) as *const usize).read_unaligned()
}

unsafe fn read_native_i32(base: *const u8, offset: usize) -> i32 {
    (base.add(offset) as *const i32).read_unaligned()
}

/// [`XmlCursor`] implementation driving a foreign parser through resolved
/// symbols plus the raw structural overlay.
pub struct LiveCursor<'a> {
    abi: &'a AndroidFw,
    layout: ParserLayout,
    parser: *mut c_void,
    tree: *const u8,
    last_event: ParseEvent,
}

impl<'a> LiveCursor<'a> {
    /// Establishes an overlay over `parser`.
    ///
    /// The layout is gated by a plausibility self-test: the event-code field
    /// read through the claimed offset must hold a value the parser can
    /// actually report. A mismatch is reported as unsupported rather than
    /// risking writes through a wrong layout.
    ///
    /// # Safety
    ///
    /// `parser` must point to a live `ResXMLParser` produced by the same
    /// platform library the symbols were bound from, and the calling thread
    /// must have exclusive use of it for the cursor's lifetime.
    pub unsafe fn from_raw(
        parser: *mut c_void,
        abi: &'a AndroidFw,
        layout: ParserLayout,
    ) -> Result<LiveCursor<'a>, OverlayError> {
        if parser.is_null() {
            return Err(OverlayError::NullParser);
        }
        let base = parser as *const u8;
        let code = read_native_i32(base, layout.event_code);
        if !is_known_event_code(code) {
            return Err(OverlayError::LayoutMismatch(code));
        }
        let tree = read_ptr(base, layout.tree);
        if tree.is_null() {
            return Err(OverlayError::NullTree);
        }
        Ok(LiveCursor {
            abi,
            layout,
            parser,
            tree,
            last_event: ParseEvent::from_code(code),
        })
    }

    fn data_end(&self) -> *const u8 {
        unsafe { read_ptr(self.tree, self.layout.tree_data_end) }
    }

    /// The current tag's attrExt record as a byte slice bounded by the tree's
    /// recorded document end. A record falling outside that bound reports no
    /// attributes; platform-produced trees are otherwise trusted.
    fn current_ext(&self) -> Option<&[u8]> {
        if self.last_event != ParseEvent::StartTag {
            return None;
        }
        unsafe {
            let ext = read_ptr(self.parser as *const u8, self.layout.cur_ext);
            let end = self.data_end();
            if ext.is_null() || end.is_null() || ext >= end {
                return None;
            }
            let len = end as usize - ext as usize;
            if len < layout::ATTR_EXT_HEADER_SIZE {
                return None;
            }
            Some(std::slice::from_raw_parts(ext, len))
        }
    }

    fn current_ext_mut(&mut self) -> Option<&mut [u8]> {
        let len = self.current_ext()?.len();
        unsafe {
            let ext = read_ptr(self.parser as *const u8, self.layout.cur_ext) as *mut u8;
            Some(std::slice::from_raw_parts_mut(ext, len))
        }
    }

    /// The resource-ID table as a wire-order byte slice.
    fn res_id_table(&self) -> Option<&[u8]> {
        unsafe {
            let ids = read_ptr(self.tree, self.layout.tree_res_ids);
            if ids.is_null() {
                return None;
            }
            let count = read_native_usize(self.tree, self.layout.tree_num_res_ids);
            Some(std::slice::from_raw_parts(ids, count.saturating_mul(4)))
        }
    }

    fn res_id_table_mut(&mut self) -> Option<&mut [u8]> {
        let len = self.res_id_table()?.len();
        unsafe {
            let ids = read_ptr(self.tree, self.layout.tree_res_ids) as *mut u8;
            Some(std::slice::from_raw_parts_mut(ids, len))
        }
    }
}

impl XmlCursor for LiveCursor<'_> {
    fn next(&mut self) -> ParseEvent {
        let code = unsafe { (self.abi.next())(self.parser) };
        self.last_event = ParseEvent::from_code(code);
        self.last_event
    }

    fn restart(&mut self) {
        unsafe {
            (self.abi.restart())(self.parser);
        }
        self.last_event = ParseEvent::StartDocument;
    }

    fn attribute_count(&self) -> usize {
        self.current_ext()
            .and_then(layout::attribute_count)
            .unwrap_or(0)
    }

    fn attribute_name_id(&self, index: usize) -> i32 {
        if self.last_event != ParseEvent::StartTag {
            return -1;
        }
        unsafe { (self.abi.get_attribute_name_id())(self.parser as *const c_void, index) }
    }

    fn attribute_value(&self, index: usize) -> Option<TypedValue> {
        let ext = self.current_ext()?;
        let range = layout::attribute_range(ext, index)?;
        layout::attribute_value(&ext[range])
    }

    fn set_attribute_data(&mut self, index: usize, data: u32) -> bool {
        let Some(ext) = self.current_ext_mut() else {
            return false;
        };
        match layout::attribute_range(ext, index) {
            Some(range) => layout::set_attribute_data(&mut ext[range], data),
            None => false,
        }
    }

    fn resource_id_count(&self) -> usize {
        self.res_id_table().map_or(0, |table| table.len() / 4)
    }

    fn resource_id(&self, index: usize) -> Option<u32> {
        layout::read_u32(self.res_id_table()?, index * 4)
    }

    fn set_resource_id(&mut self, index: usize, id: u32) -> bool {
        match self.res_id_table_mut() {
            Some(table) => layout::write_u32(table, index * 4, id),
            None => false,
        }
    }

    fn string_at(&self, index: usize) -> Option<String> {
        unsafe {
            let pool = self.tree.add(self.layout.tree_strings) as *const c_void;
            let mut len: usize = 0;
            let units = (self.abi.string_at())(pool, index, &mut len);
            if units.is_null() {
                return None;
            }
            let slice = std::slice::from_raw_parts(units, len);
            Some(String::from_utf16_lossy(slice))
        }
    }
}
