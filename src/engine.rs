//! The rewrite engine: walks a binary XML document tag by tag through an
//! [`XmlCursor`] and remaps app-owned resource identifiers in place via an
//! [`IdTranslator`].
//!
//! The engine decides nothing about *which* replacement ID to use; that is the
//! translator's job. It only provides the mechanical transaction: step the
//! parser, locate each tag's attributes, rewrite qualifying name IDs and
//! reference values, and always leave the parser restartable.

use log::debug;

use crate::layout::{
    is_app_resource, TypedValue, EVENT_BAD_DOCUMENT, EVENT_END_DOCUMENT, EVENT_START_DOCUMENT,
    EVENT_START_TAG,
};

/// Parser events the engine distinguishes. Everything the foreign parser can
/// report that is not of interest collapses into [`ParseEvent::Other`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseEvent {
    StartDocument,
    StartTag,
    EndDocument,
    BadDocument,
    Other(i32),
}

impl ParseEvent {
    /// Maps a raw event code from the platform parser.
    pub fn from_code(code: i32) -> ParseEvent {
        match code {
            EVENT_BAD_DOCUMENT => ParseEvent::BadDocument,
            EVENT_START_DOCUMENT => ParseEvent::StartDocument,
            EVENT_END_DOCUMENT => ParseEvent::EndDocument,
            EVENT_START_TAG => ParseEvent::StartTag,
            other => ParseEvent::Other(other),
        }
    }
}

/// Capability view of a binary XML parser positioned over a document.
///
/// One implementation drives the platform's private parser through resolved
/// symbols and raw overlays ([`crate::live::LiveCursor`]); another owns its
/// document buffer outright ([`crate::mem::Document`]). The engine cannot tell
/// them apart.
///
/// The attribute accessors are only meaningful while the last event was
/// [`ParseEvent::StartTag`]; outside a tag they report empty/none. Index-based
/// accessors return `None`/`false` for out-of-range indices rather than
/// panicking: a malformed index is a skip condition, not an error.
pub trait XmlCursor {
    /// Advances to the next event.
    fn next(&mut self) -> ParseEvent;

    /// Rewinds the cursor to the start of traversal. Rewrites already written
    /// into the document are not undone.
    fn restart(&mut self);

    /// Number of attributes on the current tag, 0 outside a tag.
    fn attribute_count(&self) -> usize;

    /// String-pool index of attribute `index`'s name, or -1 if unavailable.
    fn attribute_name_id(&self, index: usize) -> i32;

    /// Typed value of attribute `index` on the current tag.
    fn attribute_value(&self, index: usize) -> Option<TypedValue>;

    /// Overwrites the typed-value payload of attribute `index` in place.
    fn set_attribute_data(&mut self, index: usize, data: u32) -> bool;

    /// Length of the document's resource-ID table.
    fn resource_id_count(&self) -> usize;

    /// Entry `index` of the resource-ID table, host-endian.
    fn resource_id(&self, index: usize) -> Option<u32>;

    /// Overwrites entry `index` of the resource-ID table in place.
    fn set_resource_id(&mut self, index: usize, id: u32) -> bool;

    /// The string-pool entry at `index`, decoded to UTF-8.
    fn string_at(&self, index: usize) -> Option<String>;
}

/// Opaque token identifying a loaded resource package. The engine never
/// inspects it; it is carried through to the translator unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PackageRef(usize);

impl PackageRef {
    pub const fn new(token: usize) -> PackageRef {
        PackageRef(token)
    }

    pub fn token(&self) -> usize {
        self.0
    }
}

/// A fault raised by translation logic. The engine aborts traversal, performs
/// the mandatory restart, and propagates the fault unchanged; it is never
/// converted into a different error or swallowed.
#[derive(Debug, PartialEq, Eq)]
pub struct TranslateFault {
    message: String,
}

impl TranslateFault {
    pub fn new(message: impl Into<String>) -> TranslateFault {
        TranslateFault { message: message.into() }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for TranslateFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "resource translation fault: {}", self.message)
    }
}

impl std::error::Error for TranslateFault {}

/// Translation logic deciding replacement identifiers. Both methods are
/// invoked synchronously on the traversing thread, in stored attribute order.
pub trait IdTranslator {
    /// Replacement resource ID for the attribute named `name` in `original`.
    fn translate_attr_id(&self, name: &str, original: PackageRef)
        -> Result<u32, TranslateFault>;

    /// Replacement for `old_id`, resolved between `original` and `replacement`.
    fn translate_res_id(
        &self,
        old_id: u32,
        original: PackageRef,
        replacement: PackageRef,
    ) -> Result<u32, TranslateFault>;
}

/// Counters for one traversal, reported at debug level on success.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RewriteStats {
    pub tags_visited: usize,
    pub names_rewritten: usize,
    pub values_rewritten: usize,
}

/// Walks the document from the cursor's current position to its end, rewriting
/// every app-owned attribute-name ID and every app-owned reference-type value.
///
/// On return the cursor has always been rewound via [`XmlCursor::restart`],
/// whether traversal completed or a translator fault aborted it.
pub fn rewrite_document<C, T>(
    cursor: &mut C,
    translator: &T,
    original: PackageRef,
    replacement: PackageRef,
) -> Result<RewriteStats, TranslateFault>
where
    C: XmlCursor + ?Sized,
    T: IdTranslator + ?Sized,
{
    let outcome = walk(cursor, translator, original, replacement);
    // Invariant: the parser is handed back restartable on every exit path.
    cursor.restart();
    match &outcome {
        Ok(stats) => debug!(
            "rewrite pass: {} tags, {} attribute names, {} reference values",
            stats.tags_visited, stats.names_rewritten, stats.values_rewritten
        ),
        Err(fault) => debug!("rewrite pass aborted: {fault}"),
    }
    outcome
}

fn walk<C, T>(
    cursor: &mut C,
    translator: &T,
    original: PackageRef,
    replacement: PackageRef,
) -> Result<RewriteStats, TranslateFault>
where
    C: XmlCursor + ?Sized,
    T: IdTranslator + ?Sized,
{
    let mut stats = RewriteStats::default();
    loop {
        match cursor.next() {
            ParseEvent::StartTag => {
                stats.tags_visited += 1;
                let count = cursor.attribute_count();
                for index in 0..count {
                    rewrite_attribute_name(cursor, translator, original, index, &mut stats)?;
                    rewrite_reference_value(
                        cursor,
                        translator,
                        original,
                        replacement,
                        index,
                        &mut stats,
                    )?;
                }
            }
            ParseEvent::EndDocument | ParseEvent::BadDocument => return Ok(stats),
            ParseEvent::StartDocument | ParseEvent::Other(_) => continue,
        }
    }
}

/// If the attribute's name maps to an app-owned resource-ID table entry,
/// replaces that entry with the translator's answer for the name string.
fn rewrite_attribute_name<C, T>(
    cursor: &mut C,
    translator: &T,
    original: PackageRef,
    index: usize,
    stats: &mut RewriteStats,
) -> Result<(), TranslateFault>
where
    C: XmlCursor + ?Sized,
    T: IdTranslator + ?Sized,
{
    let name_id = cursor.attribute_name_id(index);
    if name_id < 0 || name_id as usize >= cursor.resource_id_count() {
        return Ok(());
    }
    let name_id = name_id as usize;
    let mapped = match cursor.resource_id(name_id) {
        Some(id) if is_app_resource(id) => id,
        _ => return Ok(()),
    };
    let name = match cursor.string_at(name_id) {
        Some(name) => name,
        // Name index inside the resource map but missing from the string
        // pool; nothing meaningful to hand the translator.
        None => return Ok(()),
    };
    let new_id = translator.translate_attr_id(&name, original)?;
    if cursor.set_resource_id(name_id, new_id) && new_id != mapped {
        stats.names_rewritten += 1;
    }
    Ok(())
}

/// If the attribute carries a reference-type value with an app-owned payload,
/// replaces the payload with the translator's answer. An identity answer
/// skips the store.
fn rewrite_reference_value<C, T>(
    cursor: &mut C,
    translator: &T,
    original: PackageRef,
    replacement: PackageRef,
    index: usize,
    stats: &mut RewriteStats,
) -> Result<(), TranslateFault>
where
    C: XmlCursor + ?Sized,
    T: IdTranslator + ?Sized,
{
    let value = match cursor.attribute_value(index) {
        Some(value) if value.is_reference() => value,
        _ => return Ok(()),
    };
    if !is_app_resource(value.data) {
        return Ok(());
    }
    let new_id = translator.translate_res_id(value.data, original, replacement)?;
    if new_id != value.data && cursor.set_attribute_data(index, new_id) {
        stats.values_rewritten += 1;
    }
    Ok(())
}
