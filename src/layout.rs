//! Binary layout schema for Android's compiled XML resource format and for the
//! private in-memory structures of the platform parser.
//!
//! Every record here is foreign: either part of the on-disk `RES_XML` chunk
//! stream or part of `libandroidfw.so`'s internal `ResXMLParser`/`ResXMLTree`
//! objects. This module owns all offset arithmetic and all wire-endianness
//! conversion so that a layout revision is a single localized change. The wire
//! format is little-endian on every shipped platform; reads and writes still go
//! through explicit conversions rather than assuming host order.

use std::ops::Range;

pub const RES_STRING_POOL_TYPE: u16 = 0x0001;
pub const RES_XML_TYPE: u16 = 0x0003;
pub const RES_XML_START_NAMESPACE_TYPE: u16 = 0x0100;
pub const RES_XML_END_NAMESPACE_TYPE: u16 = 0x0101;
pub const RES_XML_START_ELEMENT_TYPE: u16 = 0x0102;
pub const RES_XML_END_ELEMENT_TYPE: u16 = 0x0103;
pub const RES_XML_CDATA_TYPE: u16 = 0x0104;
pub const RES_XML_RESOURCE_MAP_TYPE: u16 = 0x0180;

// Parser event codes. The tag events reuse their chunk-type values.
pub const EVENT_BAD_DOCUMENT: i32 = -1;
pub const EVENT_START_DOCUMENT: i32 = 0;
pub const EVENT_END_DOCUMENT: i32 = 1;
pub const EVENT_FIRST_CHUNK: i32 = RES_XML_START_NAMESPACE_TYPE as i32;
pub const EVENT_START_TAG: i32 = RES_XML_START_ELEMENT_TYPE as i32;
pub const EVENT_LAST_CHUNK: i32 = RES_XML_CDATA_TYPE as i32;

pub const NO_ENTRY_INDEX: u32 = 0xFFFF_FFFF;

// Res_value data types. Only TYPE_REFERENCE qualifies for value rewriting.
pub const TYPE_NULL: u8 = 0x00;
pub const TYPE_REFERENCE: u8 = 0x01;
pub const TYPE_STRING: u8 = 0x03;
pub const TYPE_INT_DEC: u8 = 0x10;
pub const TYPE_INT_HEX: u8 = 0x11;
pub const TYPE_INT_BOOLEAN: u8 = 0x12;

/// Resource identifiers at or above this value belong to the application's own
/// package. Platform and shared-library resources sit below it and are never
/// remapped. Protocol constant, not configurable.
pub const APP_PACKAGE_THRESHOLD: u32 = 0x7F00_0000;

/// Whether `id` is owned by the application package.
pub fn is_app_resource(id: u32) -> bool {
    id >= APP_PACKAGE_THRESHOLD
}

/// Whether `code` is a value the platform parser can legitimately report.
/// Used as the overlay plausibility self-test before trusting a layout.
pub fn is_known_event_code(code: i32) -> bool {
    matches!(code, EVENT_BAD_DOCUMENT | EVENT_START_DOCUMENT | EVENT_END_DOCUMENT)
        || (EVENT_FIRST_CHUNK..=EVENT_LAST_CHUNK).contains(&code)
}

// ResXMLTree_attrExt: the extension record that follows a START_ELEMENT node
// header. Attribute placement is driven by the record's own start/size fields,
// never by assuming the common 20-byte stride.
pub const ATTR_EXT_NS: usize = 0;
pub const ATTR_EXT_NAME: usize = 4;
pub const ATTR_EXT_ATTRIBUTE_START: usize = 8;
pub const ATTR_EXT_ATTRIBUTE_SIZE: usize = 10;
pub const ATTR_EXT_ATTRIBUTE_COUNT: usize = 12;
pub const ATTR_EXT_ID_INDEX: usize = 14;
pub const ATTR_EXT_CLASS_INDEX: usize = 16;
pub const ATTR_EXT_STYLE_INDEX: usize = 18;
pub const ATTR_EXT_HEADER_SIZE: usize = 20;

// ResXMLTree_attribute: one entry of the attribute array.
pub const ATTR_NS: usize = 0;
pub const ATTR_NAME: usize = 4;
pub const ATTR_RAW_VALUE: usize = 8;
pub const ATTR_VALUE_SIZE: usize = 12;
pub const ATTR_VALUE_RES0: usize = 14;
pub const ATTR_VALUE_TYPE: usize = 15;
pub const ATTR_VALUE_DATA: usize = 16;
pub const ATTRIBUTE_RECORD_SIZE: usize = 20;

// ResXMLTree_node chunk header plus lineNumber and comment refs.
pub const NODE_HEADER_SIZE: usize = 16;

/// A decoded `Res_value`, host-endian.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TypedValue {
    pub data_type: u8,
    pub data: u32,
}

impl TypedValue {
    pub fn is_reference(&self) -> bool {
        self.data_type == TYPE_REFERENCE
    }
}

/// Reads a `u16` at `offset`, converting from wire to host order.
pub fn read_u16(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

/// Reads a `u32` at `offset`, converting from wire to host order.
pub fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Writes a `u32` at `offset` in wire order. Returns false if out of range.
pub fn write_u32(data: &mut [u8], offset: usize, value: u32) -> bool {
    match data.get_mut(offset..offset + 4) {
        Some(slot) => {
            slot.copy_from_slice(&value.to_le_bytes());
            true
        }
        None => false,
    }
}

/// Attribute count declared by an attrExt record.
pub fn attribute_count(ext: &[u8]) -> Option<usize> {
    read_u16(ext, ATTR_EXT_ATTRIBUTE_COUNT).map(|count| count as usize)
}

/// Byte range of attribute `index` within `ext`, computed from the record's
/// declared start offset and stride and bounds-checked against the slice.
pub fn attribute_range(ext: &[u8], index: usize) -> Option<Range<usize>> {
    let count = attribute_count(ext)?;
    if index >= count {
        return None;
    }
    let start = read_u16(ext, ATTR_EXT_ATTRIBUTE_START)? as usize;
    let stride = read_u16(ext, ATTR_EXT_ATTRIBUTE_SIZE)? as usize;
    if stride < ATTRIBUTE_RECORD_SIZE {
        return None;
    }
    let begin = start.checked_add(stride.checked_mul(index)?)?;
    let end = begin.checked_add(ATTRIBUTE_RECORD_SIZE)?;
    if end > ext.len() {
        return None;
    }
    Some(begin..end)
}

/// String-pool index of the attribute's name.
pub fn attribute_name_index(attr: &[u8]) -> Option<u32> {
    read_u32(attr, ATTR_NAME)
}

/// The attribute's typed value, wire-converted.
pub fn attribute_value(attr: &[u8]) -> Option<TypedValue> {
    let data_type = *attr.get(ATTR_VALUE_TYPE)?;
    let data = read_u32(attr, ATTR_VALUE_DATA)?;
    Some(TypedValue { data_type, data })
}

/// Overwrites the typed value payload in place, converting to wire order.
pub fn set_attribute_data(attr: &mut [u8], data: u32) -> bool {
    write_u32(attr, ATTR_VALUE_DATA, data)
}

/// Field offsets of the private `ResXMLParser`/`ResXMLTree` objects inside
/// `libandroidfw.so`. There is no public contract for these; each constant
/// below records the layout observed on a concrete platform range and must be
/// revalidated when a new platform build changes the class definitions. All
/// offsets are relative to the parser object's base address.
#[derive(Clone, Copy, Debug)]
pub struct ParserLayout {
    /// `ResXMLParser::mTree` back-reference (a pointer-sized field at base).
    pub tree: usize,
    /// `ResXMLParser::mEventCode`.
    pub event_code: usize,
    /// `ResXMLParser::mCurExt`, the current node's extension record.
    pub cur_ext: usize,
    /// `ResXMLTree::mDataEnd`, relative to the tree's base address.
    pub tree_data_end: usize,
    /// `ResXMLTree::mStrings` (inline `ResStringPool`), relative to tree base.
    pub tree_strings: usize,
    /// `ResXMLTree::mResIds`, relative to tree base.
    pub tree_res_ids: usize,
    /// `ResXMLTree::mNumResIds`, relative to tree base.
    pub tree_num_res_ids: usize,
}

impl ParserLayout {
    /// 32-bit libandroidfw, Android 9 through 13.
    pub const LP32: ParserLayout = ParserLayout {
        tree: 0,
        event_code: 4,
        cur_ext: 12,
        tree_data_end: 40,
        tree_strings: 44,
        tree_res_ids: 88,
        tree_num_res_ids: 92,
    };

    /// 64-bit libandroidfw, Android 9 through 13.
    pub const LP64: ParserLayout = ParserLayout {
        tree: 0,
        event_code: 8,
        cur_ext: 24,
        tree_data_end: 80,
        tree_strings: 88,
        tree_res_ids: 176,
        tree_num_res_ids: 184,
    };

    /// Layout matching this process's pointer width.
    pub fn current() -> ParserLayout {
        if cfg!(target_pointer_width = "64") {
            ParserLayout::LP64
        } else {
            ParserLayout::LP32
        }
    }
}
