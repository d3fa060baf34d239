// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! IGES 5.3 fixed-format reader
//!
//! Splits the 80-column records into their Start, Global, Directory Entry,
//! Parameter Data and Terminate sections, decodes the Global parameters and
//! pairs every directory entry with its parameter record.

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::{Error, Result};

/// IGES parameter value
#[derive(Debug, Clone, PartialEq)]
pub enum IgesValue {
    Integer(i64),
    Real(f64),
    /// Hollerith string (`5HHELLO`)
    String(String),
    /// Empty field, meaning "use the default"
    Default,
}

impl IgesValue {
    #[inline]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            IgesValue::Real(f) => Some(*f),
            IgesValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    #[inline]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            IgesValue::Integer(i) => Some(*i),
            IgesValue::Real(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    /// Directory entry pointer (positive odd sequence number)
    #[inline]
    pub fn as_pointer(&self) -> Option<u32> {
        match self.as_int()? {
            p if p > 0 => u32::try_from(p).ok(),
            _ => None,
        }
    }

    #[inline]
    pub fn as_string(&self) -> Option<&str> {
        match self {
            IgesValue::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Decoded Global section
#[derive(Debug, Clone)]
pub struct GlobalSection {
    pub parameter_delimiter: u8,
    pub record_delimiter: u8,
    pub sender_product_id: String,
    pub file_name: String,
    pub units_flag: i64,
    pub units_name: String,
    pub model_space_scale: f64,
}

impl Default for GlobalSection {
    fn default() -> Self {
        Self {
            parameter_delimiter: b',',
            record_delimiter: b';',
            sender_product_id: String::new(),
            file_name: String::new(),
            units_flag: 1,
            units_name: String::new(),
            model_space_scale: 1.0,
        }
    }
}

impl GlobalSection {
    /// Millimetres per model unit from the units flag (and name for flag 3)
    pub fn unit_scale_mm(&self) -> f64 {
        match self.units_flag {
            1 => 25.4,
            2 => 1.0,
            3 => match self.units_name.trim().to_ascii_uppercase().as_str() {
                "IN" | "INCH" => 25.4,
                "FT" => 304.8,
                "MI" => 1_609_344.0,
                "M" => 1000.0,
                "KM" => 1_000_000.0,
                "MIL" => 0.0254,
                "UM" => 0.001,
                "CM" => 10.0,
                "UIN" => 0.000_025_4,
                _ => 1.0,
            },
            4 => 304.8,
            5 => 1_609_344.0,
            6 => 1000.0,
            7 => 1_000_000.0,
            8 => 0.0254,
            9 => 0.001,
            10 => 10.0,
            11 => 0.000_025_4,
            _ => 1.0,
        }
    }
}

/// One directory entry with its parameter data
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    /// Sequence number of the first directory line (the entity's pointer)
    pub de: u32,
    pub entity_type: u32,
    pub form: u32,
    /// Pointer to a transformation matrix (type 124), 0 if none
    pub transform: u32,
    /// Raw status number field (`BBSSUUHH`)
    pub status: String,
    /// Parameters following the entity type number
    pub params: Vec<IgesValue>,
}

impl DirectoryEntry {
    #[inline]
    pub fn param(&self, index: usize) -> Option<&IgesValue> {
        self.params.get(index)
    }

    #[inline]
    pub fn float(&self, index: usize) -> Option<f64> {
        self.param(index)?.as_float()
    }

    #[inline]
    pub fn int(&self, index: usize) -> Option<i64> {
        self.param(index)?.as_int()
    }

    #[inline]
    pub fn pointer(&self, index: usize) -> Option<u32> {
        self.param(index)?.as_pointer()
    }

    /// Subordinate entity switch digits (`SS` of the status number)
    pub fn subordinate_switch(&self) -> u32 {
        let digits = format!("{:0>8}", self.status.trim());
        digits.get(2..4).and_then(|s| s.parse().ok()).unwrap_or(0)
    }
}

/// Parsed IGES file
#[derive(Debug, Clone)]
pub struct IgesFile {
    pub start: String,
    pub global: GlobalSection,
    entries: FxHashMap<u32, DirectoryEntry>,
    order: Vec<u32>,
}

struct Sections<'a> {
    start: Vec<&'a str>,
    global: Vec<&'a str>,
    directory: Vec<(usize, &'a str)>,
    parameter: Vec<(usize, &'a str)>,
    has_terminate: bool,
}

fn split_sections(content: &str) -> Result<Sections<'_>> {
    let mut sections = Sections {
        start: Vec::new(),
        global: Vec::new(),
        directory: Vec::new(),
        parameter: Vec::new(),
        has_terminate: false,
    };

    for (line_no, raw) in content.lines().enumerate() {
        let line = raw.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        if line.len() < 73 || !line.is_char_boundary(72) || !line.is_char_boundary(73) {
            return Err(Error::record(line_no + 1, "record shorter than 73 columns"));
        }
        let body = &line[..72];
        match line.as_bytes()[72] {
            b'S' => sections.start.push(body),
            b'G' => sections.global.push(body),
            b'D' => sections.directory.push((line_no + 1, body)),
            b'P' => sections.parameter.push((line_no + 1, line)),
            b'T' => sections.has_terminate = true,
            b'C' | b'B' => {
                return Err(Error::record(line_no + 1, "compressed and binary IGES are not supported"))
            }
            other => {
                return Err(Error::record(
                    line_no + 1,
                    format!("unknown section letter {:?}", other as char),
                ))
            }
        }
    }

    if sections.global.is_empty() {
        return Err(Error::MissingSection("Global"));
    }
    if sections.directory.is_empty() {
        return Err(Error::MissingSection("Directory Entry"));
    }
    Ok(sections)
}

/// Split free-format parameter text into fields
///
/// Hollerith strings may contain either delimiter; everything after the
/// record delimiter is ignored.
fn split_fields(text: &str, param_delim: u8, record_delim: u8) -> Result<Vec<IgesValue>> {
    let bytes = text.as_bytes();
    let mut values = Vec::new();
    let mut pos = 0;

    loop {
        while pos < bytes.len() && bytes[pos] == b' ' {
            pos += 1;
        }
        let field_start = pos;

        // Hollerith: digits followed by 'H'
        let mut digits_end = pos;
        while digits_end < bytes.len() && bytes[digits_end].is_ascii_digit() {
            digits_end += 1;
        }
        if digits_end > pos && bytes.get(digits_end) == Some(&b'H') {
            let count: usize = text[pos..digits_end]
                .parse()
                .map_err(|_| Error::parse(pos, "bad Hollerith length"))?;
            let begin = digits_end + 1;
            let end = begin + count;
            let s = text
                .get(begin..end)
                .ok_or_else(|| Error::parse(pos, "Hollerith string runs past the record"))?;
            values.push(IgesValue::String(s.to_string()));
            pos = end;
            while pos < bytes.len() && bytes[pos] == b' ' {
                pos += 1;
            }
        } else {
            while pos < bytes.len() && bytes[pos] != param_delim && bytes[pos] != record_delim {
                pos += 1;
            }
            values.push(parse_scalar(text[field_start..pos].trim(), field_start)?);
        }

        match bytes.get(pos) {
            Some(&b) if b == param_delim => pos += 1,
            Some(&b) if b == record_delim => break,
            None => break,
            Some(_) => return Err(Error::parse(pos, "expected a parameter delimiter")),
        }
    }

    Ok(values)
}

fn parse_scalar(field: &str, position: usize) -> Result<IgesValue> {
    if field.is_empty() {
        return Ok(IgesValue::Default);
    }
    if field
        .bytes()
        .all(|b| b.is_ascii_digit() || b == b'-' || b == b'+')
    {
        return field
            .parse::<i64>()
            .map(IgesValue::Integer)
            .map_err(|_| Error::parse(position, format!("bad integer {:?}", field)));
    }
    let normalized = field.replace(['D', 'd'], "E");
    let normalized = normalized.strip_prefix('+').unwrap_or(&normalized);
    fast_float::parse::<f64, _>(normalized)
        .map(IgesValue::Real)
        .map_err(|_| Error::parse(position, format!("bad real {:?}", field)))
}

/// Read a `1Hx` delimiter declaration, returning the delimiter and the rest
fn delimiter_field(text: &str) -> Result<Option<(u8, &str)>> {
    match text.strip_prefix("1H") {
        Some(tail) => {
            let delim = tail
                .as_bytes()
                .first()
                .copied()
                .ok_or_else(|| Error::parse(0, "Global delimiter field is empty"))?;
            let rest = tail
                .get(1..)
                .ok_or_else(|| Error::parse(0, "Global delimiter is not ASCII"))?;
            Ok(Some((delim, rest)))
        }
        None => Ok(None),
    }
}

fn parse_global(lines: &[&str]) -> Result<GlobalSection> {
    let text: String = lines.concat();
    let mut global = GlobalSection::default();

    // Fields 1 and 2 declare the delimiters; empty fields keep `,` and `;`
    let mut rest = text.trim_start();
    if let Some((delim, tail)) = delimiter_field(rest)? {
        global.parameter_delimiter = delim;
        rest = tail;
    }
    rest = rest
        .strip_prefix(global.parameter_delimiter as char)
        .ok_or_else(|| Error::parse(0, "Global field 1 is not followed by a delimiter"))?;

    rest = rest.trim_start();
    if let Some((delim, tail)) = delimiter_field(rest)? {
        global.record_delimiter = delim;
        rest = tail;
    }
    match rest.as_bytes().first() {
        Some(&b) if b == global.parameter_delimiter => rest = &rest[1..],
        Some(&b) if b == global.record_delimiter => return Ok(global),
        _ => return Err(Error::parse(0, "Global field 2 is not followed by a delimiter")),
    }

    let values = split_fields(rest, global.parameter_delimiter, global.record_delimiter)?;

    // values[i] holds Global parameter i + 3
    let string_at = |i: usize| {
        values
            .get(i)
            .and_then(|v| v.as_string())
            .unwrap_or("")
            .to_string()
    };
    global.sender_product_id = string_at(0);
    global.file_name = string_at(1);
    global.model_space_scale = values.get(10).and_then(|v| v.as_float()).unwrap_or(1.0);
    global.units_flag = values.get(11).and_then(|v| v.as_int()).unwrap_or(1);
    global.units_name = string_at(12);
    Ok(global)
}

/// Fixed 8-column field `n` (0-based) of a directory line
fn de_field(body: &str, n: usize) -> &str {
    let start = n * 8;
    body.get(start..start + 8).unwrap_or("").trim()
}

fn de_int(body: &str, n: usize, line: usize) -> Result<i64> {
    let field = de_field(body, n);
    if field.is_empty() {
        return Ok(0);
    }
    field
        .parse()
        .map_err(|_| Error::record(line, format!("bad directory field {:?}", field)))
}

impl IgesFile {
    pub fn parse(content: &str) -> Result<Self> {
        let sections = split_sections(content)?;
        let global = parse_global(&sections.global)?;

        if sections.directory.len() % 2 != 0 {
            let (line, _) = sections.directory[sections.directory.len() - 1];
            return Err(Error::record(line, "directory entry is missing its second line"));
        }

        // Parameter lines indexed by sequence number (columns 74-80)
        let mut param_lines: FxHashMap<u32, &str> = FxHashMap::default();
        for &(line, text) in &sections.parameter {
            let seq: u32 = text
                .get(73..)
                .map(str::trim)
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| Error::record(line, "missing parameter sequence number"))?;
            // Columns 1-64 hold data, 66-72 the back pointer
            param_lines.insert(seq, text.get(..64).unwrap_or(text));
        }

        let mut entries = FxHashMap::default();
        let mut order = Vec::with_capacity(sections.directory.len() / 2);
        for (pair_index, pair) in sections.directory.chunks(2).enumerate() {
            let (line, first) = pair[0];
            let (_, second) = pair[1];
            let de = (pair_index * 2 + 1) as u32;

            let entity_type = de_int(first, 0, line)?;
            let param_start = de_int(first, 1, line)?;
            let transform = de_int(first, 6, line)?;
            let status = de_field(first, 8).to_string();
            let line_count = de_int(second, 3, line + 1)?;
            let form = de_int(second, 4, line + 1)?;

            let mut text = String::new();
            for seq in param_start..param_start + line_count.max(1) {
                let chunk = u32::try_from(seq)
                    .ok()
                    .and_then(|s| param_lines.get(&s))
                    .ok_or_else(|| {
                        Error::record(line, format!("DE {} points to missing parameter line {}", de, seq))
                    })?;
                text.push_str(chunk);
            }

            let mut params =
                split_fields(&text, global.parameter_delimiter, global.record_delimiter)?;
            // First parameter repeats the entity type
            match params.first().and_then(|v| v.as_int()) {
                Some(t) if t == entity_type => {
                    params.remove(0);
                }
                _ => {
                    return Err(Error::record(
                        line,
                        format!("parameter data of DE {} does not start with type {}", de, entity_type),
                    ))
                }
            }

            entries.insert(
                de,
                DirectoryEntry {
                    de,
                    entity_type: entity_type.max(0) as u32,
                    form: form.max(0) as u32,
                    transform: transform.max(0) as u32,
                    status,
                    params,
                },
            );
            order.push(de);
        }

        if !sections.has_terminate {
            debug!("IGES file has no Terminate section");
        }

        Ok(Self {
            start: sections.start.concat().trim_end().to_string(),
            global,
            entries,
            order,
        })
    }

    pub fn entry(&self, de: u32) -> Option<&DirectoryEntry> {
        self.entries.get(&de)
    }

    /// Entry that must exist, for following pointers
    pub fn require(&self, de: u32) -> Result<&DirectoryEntry> {
        self.entries.get(&de).ok_or(Error::EntityNotFound(de))
    }

    /// All entries in file order
    pub fn entries(&self) -> impl Iterator<Item = &DirectoryEntry> {
        self.order.iter().filter_map(move |de| self.entries.get(de))
    }

    pub fn of_type(&self, entity_type: u32) -> impl Iterator<Item = &DirectoryEntry> {
        self.entries().filter(move |e| e.entity_type == entity_type)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn unit_scale_mm(&self) -> f64 {
        self.global.unit_scale_mm()
    }
}
