// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Entity Decoder - On-demand instance parsing
//!
//! The file is scanned once to map instance ids to byte ranges; instances are
//! parsed only when first requested and cached afterwards.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::entity::DecodedEntity;
use crate::error::{Error, Result};
use crate::parser::parse_entity;

/// Pre-built entity index type
pub type EntityIndex = FxHashMap<u32, (usize, usize)>;

/// Byte offset just past a quoted string starting at `at`
#[inline]
fn skip_string(bytes: &[u8], at: usize) -> usize {
    let mut pos = at + 1;
    while let Some(offset) = memchr::memchr(b'\'', &bytes[pos..]) {
        pos += offset + 1;
        if bytes.get(pos) != Some(&b'\'') {
            return pos;
        }
        pos += 1;
    }
    bytes.len()
}

/// Byte offset just past a `/* */` comment starting at `at`, or `at + 1`
#[inline]
fn skip_comment(bytes: &[u8], at: usize) -> usize {
    if bytes.get(at + 1) != Some(&b'*') {
        return at + 1;
    }
    match memchr::memmem::find(&bytes[at + 2..], b"*/") {
        Some(offset) => at + 2 + offset + 2,
        None => bytes.len(),
    }
}

/// Offset just past the `;` that terminates the statement containing `from`
fn statement_end(bytes: &[u8], from: usize) -> Option<usize> {
    let mut pos = from;
    while let Some(offset) = memchr::memchr3(b';', b'\'', b'/', &bytes[pos..]) {
        let at = pos + offset;
        match bytes[at] {
            b';' => return Some(at + 1),
            b'\'' => pos = skip_string(bytes, at),
            _ => pos = skip_comment(bytes, at),
        }
    }
    None
}

#[inline]
fn keyword_start(bytes: &[u8], at: usize) -> bool {
    at == 0 || !(bytes[at - 1].is_ascii_alphanumeric() || bytes[at - 1] == b'_')
}

/// Range of the DATA section body, or the whole input when no section header
/// is present (bare instance lists)
fn data_section(content: &str) -> Result<(usize, usize)> {
    let bytes = content.as_bytes();
    let mut pos = 0;
    let mut data_start = None;
    while let Some(offset) = memchr::memchr3(b'D', b'\'', b'/', &bytes[pos..]) {
        let at = pos + offset;
        match bytes[at] {
            b'\'' => pos = skip_string(bytes, at),
            b'/' => pos = skip_comment(bytes, at),
            _ => {
                let rest = &bytes[at..];
                if keyword_start(bytes, at) && rest.starts_with(b"DATA") {
                    let mut after = at + 4;
                    while after < bytes.len() && bytes[after].is_ascii_whitespace() {
                        after += 1;
                    }
                    // DATA; or DATA('name', ...);
                    if bytes.get(after) == Some(&b';') || bytes.get(after) == Some(&b'(') {
                        let end = statement_end(bytes, after)
                            .ok_or_else(|| Error::parse(at, "Unterminated DATA header"))?;
                        data_start = Some(end);
                        break;
                    }
                }
                pos = at + 1;
            }
        }
    }

    let start = match data_start {
        Some(start) => start,
        None if content.contains("ISO-10303-21") => return Err(Error::MissingSection("DATA")),
        None => return Ok((0, bytes.len())),
    };

    let mut pos = start;
    while let Some(offset) = memchr::memchr3(b'E', b'\'', b'/', &bytes[pos..]) {
        let at = pos + offset;
        match bytes[at] {
            b'\'' => pos = skip_string(bytes, at),
            b'/' => pos = skip_comment(bytes, at),
            _ => {
                if keyword_start(bytes, at) && bytes[at..].starts_with(b"ENDSEC") {
                    return Ok((start, at));
                }
                pos = at + 1;
            }
        }
    }
    Err(Error::parse(start, "DATA section is not terminated by ENDSEC"))
}

/// Build entity index from content - single pass using SIMD-accelerated search
///
/// Only the DATA section is indexed. Quoted strings and comments are skipped,
/// so a `#` or `;` inside them never splits a statement.
pub fn build_entity_index(content: &str) -> Result<EntityIndex> {
    let (begin, end) = data_section(content)?;
    let bytes = &content.as_bytes()[..end];

    let estimated_entities = (end - begin) / 50;
    let mut index = FxHashMap::with_capacity_and_hasher(estimated_entities, Default::default());

    let mut pos = begin;
    while let Some(offset) = memchr::memchr3(b'#', b'\'', b'/', &bytes[pos..]) {
        let start = pos + offset;
        match bytes[start] {
            b'\'' => {
                pos = skip_string(bytes, start);
                continue;
            }
            b'/' => {
                pos = skip_comment(bytes, start);
                continue;
            }
            _ => {}
        }

        pos = start + 1;
        let id_start = pos;
        while pos < end && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
        let id_end = pos;

        // Handles both `#45=` and `#45 = `
        while pos < end && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }

        if id_end > id_start && pos < end && bytes[pos] == b'=' {
            let id = parse_u32_inline(bytes, id_start, id_end);
            let stmt_end = statement_end(bytes, pos)
                .ok_or_else(|| Error::parse(start, format!("Instance #{} is not terminated", id)))?;
            if index.insert(id, (start, stmt_end)).is_some() {
                return Err(Error::parse(start, format!("Duplicate instance #{}", id)));
            }
            pos = stmt_end;
        }
    }

    Ok(index)
}

/// Fast u32 parsing without string allocation
#[inline]
fn parse_u32_inline(bytes: &[u8], start: usize, end: usize) -> u32 {
    let mut result: u32 = 0;
    for &byte in &bytes[start..end] {
        let digit = byte.wrapping_sub(b'0');
        result = result.wrapping_mul(10).wrapping_add(digit as u32);
    }
    result
}

/// Entity decoder for lazy parsing
pub struct EntityDecoder<'a> {
    content: &'a str,
    /// Cache of decoded entities (entity_id -> `Arc<DecodedEntity>`)
    cache: FxHashMap<u32, Arc<DecodedEntity>>,
    entity_index: Arc<EntityIndex>,
}

impl<'a> EntityDecoder<'a> {
    /// Index the DATA section and create a decoder over it
    pub fn new(content: &'a str) -> Result<Self> {
        let index = build_entity_index(content)?;
        Ok(Self::with_index(content, index))
    }

    /// Create decoder with pre-built index
    pub fn with_index(content: &'a str, index: EntityIndex) -> Self {
        Self {
            content,
            cache: FxHashMap::default(),
            entity_index: Arc::new(index),
        }
    }

    pub fn len(&self) -> usize {
        self.entity_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entity_index.is_empty()
    }

    /// Decode entity by ID - O(1) lookup using entity index
    pub fn decode_by_id(&mut self, entity_id: u32) -> Result<Arc<DecodedEntity>> {
        if let Some(entity) = self.cache.get(&entity_id) {
            return Ok(Arc::clone(entity));
        }

        let (start, end) = self
            .entity_index
            .get(&entity_id)
            .copied()
            .ok_or(Error::EntityNotFound(entity_id))?;

        let line = &self.content[start..end];
        let raw = parse_entity(line).map_err(|e| {
            // First 100 characters; names are often non-ASCII
            let snippet = line.char_indices().nth(100).map_or(line, |(i, _)| &line[..i]);
            Error::parse(start, format!("{}, input: {:?}", e, snippet))
        })?;

        let entity = Arc::new(DecodedEntity::from_raw(&raw));
        self.cache.insert(entity_id, Arc::clone(&entity));
        Ok(entity)
    }

    /// Decode an entity and check that it carries `expected` among its records
    pub fn decode_typed(&mut self, entity_id: u32, expected: &str) -> Result<Arc<DecodedEntity>> {
        let entity = self.decode_by_id(entity_id)?;
        if !entity.has_type(expected) {
            return Err(Error::UnexpectedType {
                id: entity_id,
                expected: expected.to_string(),
                found: entity.type_name().to_string(),
            });
        }
        Ok(entity)
    }

    /// Ids of all instances carrying a record of the given type, ascending
    pub fn find_by_type(&mut self, type_name: &str) -> Result<Vec<u32>> {
        let needle = type_name.to_ascii_uppercase();
        let mut ids: Vec<u32> = self
            .entity_index
            .iter()
            .filter(|(_, &(start, end))| {
                memchr::memmem::find(&self.content.as_bytes()[start..end], needle.as_bytes())
                    .is_some()
            })
            .map(|(&id, _)| id)
            .collect();
        ids.sort_unstable();

        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            if self.decode_by_id(id)?.has_type(&needle) {
                found.push(id);
            }
        }
        Ok(found)
    }

    /// Get raw content string for an entity
    #[inline]
    pub fn get_raw_content(&self, entity_id: u32) -> Option<&'a str> {
        let (start, end) = self.entity_index.get(&entity_id).copied()?;
        Some(&self.content[start..end])
    }

    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }
}
