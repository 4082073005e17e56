//! A self-contained binary XML document with cursor semantics.
//!
//! [`Document`] owns a complete `RES_XML` buffer and implements [`XmlCursor`]
//! over it, using the same accessor layer in [`crate::layout`] that the live
//! overlay uses. It serves as the host-side stand-in for the platform parser:
//! rewrite behaviour can be exercised and inspected without a device.
//!
//! [`DocumentBuilder`] produces well-formed documents (string pool, resource
//! map, element chunks) for tests and experiments.

use std::collections::BTreeMap;
use std::ops::Range;

use bitflags::bitflags;

use crate::engine::{ParseEvent, XmlCursor};
use crate::layout::{
    self, TypedValue, ATTR_EXT_HEADER_SIZE, NODE_HEADER_SIZE, NO_ENTRY_INDEX,
    RES_STRING_POOL_TYPE, RES_XML_END_ELEMENT_TYPE, RES_XML_RESOURCE_MAP_TYPE,
    RES_XML_START_ELEMENT_TYPE, RES_XML_TYPE,
};

bitflags! {
    /// Flags carried in the string-pool chunk header.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct StringPoolFlags: u32 {
        const SORTED = 0x0000_0001;
        const UTF8 = 0x0000_0100;
    }
}

/// Result alias for document construction.
pub type DocumentResult<T> = Result<T, DocumentError>;

/// Errors surfaced while taking ownership of a document buffer.
#[derive(Debug)]
pub enum DocumentError {
    /// The buffer does not begin with a `RES_XML` header.
    NotBinaryXml,
    /// The buffer's chunk structure is damaged.
    Malformed(String),
}

impl std::fmt::Display for DocumentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentError::NotBinaryXml => write!(f, "not a binary XML document"),
            DocumentError::Malformed(msg) => write!(f, "malformed binary XML: {msg}"),
        }
    }
}

impl std::error::Error for DocumentError {}

fn malformed(msg: impl Into<String>) -> DocumentError {
    DocumentError::Malformed(msg.into())
}

struct ChunkHeader {
    chunk_type: u16,
    header_size: u16,
    size: u32,
    start: usize,
}

impl ChunkHeader {
    fn end(&self) -> usize {
        self.start + self.size as usize
    }

    fn read(data: &[u8], start: usize, limit: usize) -> Option<ChunkHeader> {
        if start + 8 > limit {
            return None;
        }
        let chunk_type = layout::read_u16(data, start)?;
        let header_size = layout::read_u16(data, start + 2)?;
        let size = layout::read_u32(data, start + 4)?;
        if header_size < 8 || size < header_size as u32 {
            return None;
        }
        let end = start.checked_add(size as usize)?;
        if end > limit {
            return None;
        }
        Some(ChunkHeader {
            chunk_type,
            header_size,
            size,
            start,
        })
    }
}

/// An owned binary XML document exposing [`XmlCursor`] over its buffer.
pub struct Document {
    data: Vec<u8>,
    /// Absolute offsets of each string's length header in the pool.
    string_offsets: Vec<usize>,
    /// Inclusive extent of string data, used to bound decoding.
    string_limit: usize,
    utf8_pool: bool,
    /// Byte range of the resource-ID table (u32 array, wire order).
    res_map: Range<usize>,
    /// Byte range of the node chunk stream.
    body: Range<usize>,
    pos: usize,
    event: ParseEvent,
    cur_ext: Option<Range<usize>>,
    restart_count: usize,
}

impl Document {
    /// Takes ownership of `data`, scanning the outer header, string pool and
    /// resource map. Node chunks are validated lazily during traversal, the
    /// way the platform parser does; damage there surfaces as
    /// [`ParseEvent::BadDocument`] rather than a construction error.
    pub fn from_bytes(data: Vec<u8>) -> DocumentResult<Document> {
        let outer = ChunkHeader::read(&data, 0, data.len())
            .ok_or_else(|| malformed("truncated document header"))?;
        if outer.chunk_type != RES_XML_TYPE {
            return Err(DocumentError::NotBinaryXml);
        }
        let limit = outer.end();

        let mut pos = outer.header_size as usize;
        let mut string_offsets = Vec::new();
        let mut string_limit = 0;
        let mut utf8_pool = false;
        let mut res_map = 0..0;

        // Leading metadata chunks; the first chunk of any other type starts
        // the body and is validated lazily during traversal.
        while pos < limit {
            let Some(chunk_type) = layout::read_u16(&data, pos) else {
                break;
            };
            if chunk_type != RES_STRING_POOL_TYPE && chunk_type != RES_XML_RESOURCE_MAP_TYPE {
                break;
            }
            let chunk = ChunkHeader::read(&data, pos, limit)
                .ok_or_else(|| malformed(format!("damaged chunk at offset {pos}")))?;
            match chunk.chunk_type {
                RES_STRING_POOL_TYPE => {
                    let pool = parse_string_pool(&data, &chunk)?;
                    string_offsets = pool.0;
                    utf8_pool = pool.1;
                    string_limit = chunk.end();
                }
                _ => {
                    res_map = chunk.start + chunk.header_size as usize..chunk.end();
                }
            }
            pos = chunk.end();
        }

        let body = pos..limit;
        Ok(Document {
            data,
            string_offsets,
            string_limit,
            utf8_pool,
            res_map,
            pos,
            body,
            event: ParseEvent::StartDocument,
            cur_ext: None,
            restart_count: 0,
        })
    }

    /// The document buffer, including any rewrites applied so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// How many times the cursor has been rewound.
    pub fn restart_count(&self) -> usize {
        self.restart_count
    }

    fn current_ext(&self) -> Option<&[u8]> {
        let range = self.cur_ext.clone()?;
        self.data.get(range)
    }
}

fn parse_string_pool(
    data: &[u8],
    chunk: &ChunkHeader,
) -> DocumentResult<(Vec<usize>, bool)> {
    let base = chunk.start;
    let string_count = layout::read_u32(data, base + 8)
        .ok_or_else(|| malformed("truncated string pool"))? as usize;
    let flags = StringPoolFlags::from_bits_retain(
        layout::read_u32(data, base + 16).ok_or_else(|| malformed("truncated string pool"))?,
    );
    let strings_start = layout::read_u32(data, base + 20)
        .ok_or_else(|| malformed("truncated string pool"))? as usize;

    let offsets_base = base + chunk.header_size as usize;
    let strings_base = base + strings_start;
    let mut offsets = Vec::with_capacity(string_count);
    for i in 0..string_count {
        let relative = layout::read_u32(data, offsets_base + i * 4)
            .ok_or_else(|| malformed("string pool offset table out of range"))?;
        let absolute = strings_base + relative as usize;
        if absolute >= chunk.end() {
            return Err(malformed(format!("string {i} offset outside pool")));
        }
        offsets.push(absolute);
    }
    Ok((offsets, flags.contains(StringPoolFlags::UTF8)))
}

fn decode_utf16_string(data: &[u8], offset: usize, limit: usize) -> Option<String> {
    let first = layout::read_u16(data, offset)?;
    let (char_count, header) = if first & 0x8000 == 0 {
        (first as usize, 2)
    } else {
        let second = layout::read_u16(data, offset + 2)?;
        ((((first & 0x7FFF) as usize) << 16) | second as usize, 4)
    };
    let start = offset + header;
    let end = start + char_count * 2;
    if end > limit {
        return None;
    }
    let mut units = Vec::with_capacity(char_count);
    for i in 0..char_count {
        units.push(layout::read_u16(data, start + i * 2)?);
    }
    Some(String::from_utf16_lossy(&units))
}

fn decode_utf8_string(data: &[u8], offset: usize, limit: usize) -> Option<String> {
    fn length(data: &[u8], offset: usize) -> Option<(usize, usize)> {
        let first = *data.get(offset)? as usize;
        if first & 0x80 == 0 {
            Some((first, 1))
        } else {
            let second = *data.get(offset + 1)? as usize;
            Some((((first & 0x7F) << 8) | second, 2))
        }
    }
    let (_, char_header) = length(data, offset)?;
    let (byte_len, byte_header) = length(data, offset + char_header)?;
    let start = offset + char_header + byte_header;
    let end = start + byte_len;
    if end > limit {
        return None;
    }
    Some(String::from_utf8_lossy(&data[start..end]).into_owned())
}

impl XmlCursor for Document {
    fn next(&mut self) -> ParseEvent {
        if self.event == ParseEvent::BadDocument {
            return self.event;
        }
        self.cur_ext = None;
        if self.pos >= self.body.end {
            self.event = ParseEvent::EndDocument;
            return self.event;
        }
        // Node chunks are validated here, not at construction; a damaged
        // chunk leaves the cursor parked on BAD_DOCUMENT.
        let Some(chunk) = ChunkHeader::read(&self.data, self.pos, self.body.end) else {
            self.event = ParseEvent::BadDocument;
            return self.event;
        };
        self.event = ParseEvent::from_code(chunk.chunk_type as i32);
        if self.event == ParseEvent::StartTag {
            let ext_start = chunk.start + chunk.header_size as usize;
            if chunk.end() - ext_start < ATTR_EXT_HEADER_SIZE {
                self.event = ParseEvent::BadDocument;
                return self.event;
            }
            self.cur_ext = Some(ext_start..chunk.end());
        }
        self.pos = chunk.end();
        self.event
    }

    fn restart(&mut self) {
        self.pos = self.body.start;
        self.cur_ext = None;
        if self.event != ParseEvent::BadDocument {
            self.event = ParseEvent::StartDocument;
        }
        self.restart_count += 1;
    }

    fn attribute_count(&self) -> usize {
        self.current_ext()
            .and_then(layout::attribute_count)
            .unwrap_or(0)
    }

    fn attribute_name_id(&self, index: usize) -> i32 {
        let Some(ext) = self.current_ext() else {
            return -1;
        };
        let Some(range) = layout::attribute_range(ext, index) else {
            return -1;
        };
        match layout::attribute_name_index(&ext[range]) {
            Some(idx) if idx <= i32::MAX as u32 => idx as i32,
            _ => -1,
        }
    }

    fn attribute_value(&self, index: usize) -> Option<TypedValue> {
        let ext = self.current_ext()?;
        let range = layout::attribute_range(ext, index)?;
        layout::attribute_value(&ext[range])
    }

    fn set_attribute_data(&mut self, index: usize, data: u32) -> bool {
        let Some(ext_range) = self.cur_ext.clone() else {
            return false;
        };
        let Some(ext) = self.data.get_mut(ext_range) else {
            return false;
        };
        match layout::attribute_range(ext, index) {
            Some(range) => layout::set_attribute_data(&mut ext[range], data),
            None => false,
        }
    }

    fn resource_id_count(&self) -> usize {
        self.res_map.len() / 4
    }

    fn resource_id(&self, index: usize) -> Option<u32> {
        if index >= self.resource_id_count() {
            return None;
        }
        layout::read_u32(&self.data, self.res_map.start + index * 4)
    }

    fn set_resource_id(&mut self, index: usize, id: u32) -> bool {
        if index >= self.resource_id_count() {
            return false;
        }
        layout::write_u32(&mut self.data, self.res_map.start + index * 4, id)
    }

    fn string_at(&self, index: usize) -> Option<String> {
        let offset = *self.string_offsets.get(index)?;
        if self.utf8_pool {
            decode_utf8_string(&self.data, offset, self.string_limit)
        } else {
            decode_utf16_string(&self.data, offset, self.string_limit)
        }
    }
}

/// One attribute on a built element.
#[derive(Clone, Debug)]
struct AttributeSpec {
    name: String,
    value: TypedValue,
}

#[derive(Clone, Debug)]
enum BuildOp {
    Start { tag: String, attributes: Vec<AttributeSpec> },
    End { tag: String },
}

/// Builds well-formed binary XML documents.
///
/// Attribute names registered through [`DocumentBuilder::resource_attr`] are
/// interned at the low string-pool indices and covered by the resource map,
/// mirroring how aapt lays out compiled resources; other strings follow.
pub struct DocumentBuilder {
    strings: Vec<String>,
    indices: BTreeMap<String, u32>,
    resource_ids: Vec<u32>,
    ops: Vec<BuildOp>,
}

impl Default for DocumentBuilder {
    fn default() -> Self {
        DocumentBuilder::new()
    }
}

impl DocumentBuilder {
    pub fn new() -> DocumentBuilder {
        DocumentBuilder {
            strings: Vec::new(),
            indices: BTreeMap::new(),
            resource_ids: Vec::new(),
            ops: Vec::new(),
        }
    }

    fn intern(&mut self, value: &str) -> u32 {
        if let Some(&idx) = self.indices.get(value) {
            return idx;
        }
        let idx = self.strings.len() as u32;
        self.strings.push(value.to_string());
        self.indices.insert(value.to_string(), idx);
        idx
    }

    /// Registers `name` as a resource-mapped attribute with resource ID `id`.
    /// Must be called before the name is first used on an element.
    pub fn resource_attr(&mut self, name: &str, id: u32) -> &mut Self {
        debug_assert_eq!(
            self.strings.len(),
            self.resource_ids.len(),
            "resource attributes must be registered before other strings"
        );
        self.intern(name);
        self.resource_ids.push(id);
        self
    }

    /// Opens an element. Attributes attach to the most recently opened one.
    pub fn start_element(&mut self, tag: &str) -> &mut Self {
        self.intern(tag);
        self.ops.push(BuildOp::Start { tag: tag.to_string(), attributes: Vec::new() });
        self
    }

    /// Adds an attribute to the most recently opened element.
    pub fn attribute(&mut self, name: &str, value: TypedValue) -> &mut Self {
        self.intern(name);
        let spec = AttributeSpec { name: name.to_string(), value };
        match self.ops.iter_mut().rev().find_map(|op| match op {
            BuildOp::Start { attributes, .. } => Some(attributes),
            BuildOp::End { .. } => None,
        }) {
            Some(attributes) => attributes.push(spec),
            None => panic!("attribute() before any start_element()"),
        }
        self
    }

    /// Closes an element.
    pub fn end_element(&mut self, tag: &str) -> &mut Self {
        self.intern(tag);
        self.ops.push(BuildOp::End { tag: tag.to_string() });
        self
    }

    /// Serializes the document.
    pub fn build(&self) -> Vec<u8> {
        let mut document = Vec::new();
        let xml_start = begin_chunk(&mut document, RES_XML_TYPE, 8);
        document.extend_from_slice(&self.string_pool_chunk());
        if !self.resource_ids.is_empty() {
            let map_start = begin_chunk(&mut document, RES_XML_RESOURCE_MAP_TYPE, 8);
            for id in &self.resource_ids {
                write_u32(&mut document, *id);
            }
            finalize_chunk(&mut document, map_start);
        }
        for op in &self.ops {
            match op {
                BuildOp::Start { tag, attributes } => {
                    self.write_start_element(&mut document, tag, attributes);
                }
                BuildOp::End { tag } => self.write_end_element(&mut document, tag),
            }
        }
        finalize_chunk(&mut document, xml_start);
        document
    }

    /// Serializes and immediately re-opens the document as a cursor.
    pub fn to_document(&self) -> Document {
        Document::from_bytes(self.build()).expect("builder output must parse")
    }

    fn string_pool_chunk(&self) -> Vec<u8> {
        let string_count = self.strings.len() as u32;
        let header_size = 28u16;
        let strings_start = header_size as u32 + string_count * 4;

        let mut string_data = Vec::new();
        let mut offsets = Vec::with_capacity(self.strings.len());
        for s in &self.strings {
            offsets.push(string_data.len() as u32);
            write_utf16_string(&mut string_data, s);
        }
        align_to_four(&mut string_data);

        let mut chunk = Vec::new();
        let start = begin_chunk(&mut chunk, RES_STRING_POOL_TYPE, header_size);
        write_u32(&mut chunk, string_count);
        write_u32(&mut chunk, 0); // style count
        write_u32(&mut chunk, StringPoolFlags::empty().bits());
        write_u32(&mut chunk, strings_start);
        write_u32(&mut chunk, 0); // styles start
        for offset in offsets {
            write_u32(&mut chunk, offset);
        }
        chunk.extend_from_slice(&string_data);
        finalize_chunk(&mut chunk, start);
        chunk
    }

    fn index_of(&self, value: &str) -> u32 {
        self.indices[value]
    }

    fn write_start_element(&self, buf: &mut Vec<u8>, tag: &str, attributes: &[AttributeSpec]) {
        let start = begin_chunk(buf, RES_XML_START_ELEMENT_TYPE, NODE_HEADER_SIZE as u16);
        write_u32(buf, 0); // line number
        write_u32(buf, NO_ENTRY_INDEX); // comment
        write_u32(buf, NO_ENTRY_INDEX); // namespace
        write_u32(buf, self.index_of(tag));
        write_u16(buf, ATTR_EXT_HEADER_SIZE as u16); // attributeStart
        write_u16(buf, layout::ATTRIBUTE_RECORD_SIZE as u16); // attributeSize
        write_u16(buf, attributes.len() as u16);
        write_u16(buf, 0); // idIndex
        write_u16(buf, 0); // classIndex
        write_u16(buf, 0); // styleIndex
        for attr in attributes {
            write_u32(buf, NO_ENTRY_INDEX); // namespace
            write_u32(buf, self.index_of(&attr.name));
            write_u32(buf, NO_ENTRY_INDEX); // raw value
            write_u16(buf, 8); // Res_value size
            buf.push(0); // res0
            buf.push(attr.value.data_type);
            write_u32(buf, attr.value.data);
        }
        finalize_chunk(buf, start);
    }

    fn write_end_element(&self, buf: &mut Vec<u8>, tag: &str) {
        let start = begin_chunk(buf, RES_XML_END_ELEMENT_TYPE, NODE_HEADER_SIZE as u16);
        write_u32(buf, 0);
        write_u32(buf, NO_ENTRY_INDEX);
        write_u32(buf, NO_ENTRY_INDEX);
        write_u32(buf, self.index_of(tag));
        finalize_chunk(buf, start);
    }
}

fn write_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn write_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn write_utf16_string(buf: &mut Vec<u8>, text: &str) {
    let units: Vec<u16> = text.encode_utf16().collect();
    let len = units.len();
    if len < 0x8000 {
        write_u16(buf, len as u16);
    } else {
        write_u16(buf, 0x8000 | ((len >> 16) as u16 & 0x7FFF));
        write_u16(buf, (len & 0xFFFF) as u16);
    }
    for unit in units {
        write_u16(buf, unit);
    }
    write_u16(buf, 0);
}

fn align_to_four(buf: &mut Vec<u8>) {
    while buf.len() % 4 != 0 {
        buf.push(0);
    }
}

fn begin_chunk(buf: &mut Vec<u8>, chunk_type: u16, header_size: u16) -> usize {
    let start = buf.len();
    write_u16(buf, chunk_type);
    write_u16(buf, header_size);
    write_u32(buf, 0); // size placeholder
    start
}

fn finalize_chunk(buf: &mut Vec<u8>, chunk_start: usize) {
    align_to_four(buf);
    let size = (buf.len() - chunk_start) as u32;
    buf[chunk_start + 4..chunk_start + 8].copy_from_slice(&size.to_le_bytes());
}
