//! Binary layout of the live configuration region
//!
//! ```text
//! offset 0        ready flag (u8, 0 = being written, 1 = complete)
//! offset 1 + 4*i  field i as a native-endian i32
//! ```
//!
//! Field order is part of the wire contract with the benchmark process and
//! is versioned by [`LAYOUT_VERSION`].

use crate::options::assignments;
use std::fmt;
use tracing::warn;

/// Version of the field table below
pub const LAYOUT_VERSION: u32 = 1;

/// Total size of the shared region in bytes
pub const REGION_SIZE: usize = 1024;

/// Offset of the ready flag
pub const READY_OFFSET: usize = 0;

/// Number of tunables carried by the region
pub const FIELD_COUNT: usize = 19;

/// Field values in layout order
pub type FieldValues = [i32; FIELD_COUNT];

/// How a field's textual value maps to its integer encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Boolean,
    Compression,
}

/// One slot of the layout
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

const fn int(name: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        kind: FieldKind::Integer,
    }
}

const fn flag(name: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        kind: FieldKind::Boolean,
    }
}

pub const FIELDS: [FieldSpec; FIELD_COUNT] = [
    int("max_open_files"),
    int("max_total_wal_size"),
    int("delete_obsolete_files_period_micros"),
    int("max_background_jobs"),
    int("max_background_compactions"),
    int("max_subcompactions"),
    int("stats_dump_period_sec"),
    int("compaction_readahead_size"),
    int("writable_file_max_buffer_size"),
    int("bytes_per_sync"),
    int("wal_bytes_per_sync"),
    int("delayed_write_rate"),
    flag("avoid_flush_during_shutdown"),
    int("write_buffer_size"),
    FieldSpec {
        name: "compression",
        kind: FieldKind::Compression,
    },
    int("level0_file_num_compaction_trigger"),
    int("max_bytes_for_level_base"),
    flag("disable_auto_compactions"),
    int("memtable_max_range_deletions"),
];

/// Compression tokens: (engine name, short name, encoding)
pub const COMPRESSION_TOKENS: [(&str, &str, i32); 8] = [
    ("kNoCompression", "none", 0),
    ("kSnappyCompression", "snappy", 1),
    ("kZlibCompression", "zlib", 2),
    ("kBZip2Compression", "bzip2", 3),
    ("kLZ4Compression", "lz4", 4),
    ("kLZ4HCCompression", "lz4hc", 5),
    ("kXpressCompression", "xpress", 6),
    ("kZSTD", "zstd", 7),
];

/// Byte offset of field `index`
pub const fn field_offset(index: usize) -> usize {
    READY_OFFSET + 1 + 4 * index
}

/// Position of `name` in the layout
pub fn field_index(name: &str) -> Option<usize> {
    FIELDS.iter().position(|f| f.name == name)
}

/// Result of encoding one textual value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoded {
    Exact(i32),
    Clamped { requested: i128, stored: i32 },
    Unparseable,
}

impl Encoded {
    pub fn value(self) -> i32 {
        match self {
            Encoded::Exact(v) => v,
            Encoded::Clamped { stored, .. } => stored,
            Encoded::Unparseable => 0,
        }
    }
}

/// Encode a textual value for a field of the given kind
///
/// Boolean and compression tokens are matched case-insensitively. Every kind
/// accepts `true`/`false` and a plain integer.
pub fn encode_value(kind: FieldKind, raw: &str) -> Encoded {
    let token = raw.trim();

    if let Some(v) = boolean_token(token) {
        return Encoded::Exact(v);
    }
    if kind == FieldKind::Compression {
        if let Some(v) = compression_token(token) {
            return Encoded::Exact(v);
        }
    }

    match token.parse::<i128>() {
        Ok(v) => match i32::try_from(v) {
            Ok(exact) => Encoded::Exact(exact),
            Err(_) => Encoded::Clamped {
                requested: v,
                stored: v.clamp(i32::MIN as i128, i32::MAX as i128) as i32,
            },
        },
        Err(_) => Encoded::Unparseable,
    }
}

/// Render an encoded value back to the token the options file uses
pub fn decode_value(kind: FieldKind, value: i32) -> String {
    match kind {
        FieldKind::Boolean => match value {
            0 => "false".to_string(),
            1 => "true".to_string(),
            other => other.to_string(),
        },
        FieldKind::Compression => COMPRESSION_TOKENS
            .iter()
            .find(|(_, _, v)| *v == value)
            .map(|(name, _, _)| (*name).to_string())
            .unwrap_or_else(|| value.to_string()),
        FieldKind::Integer => value.to_string(),
    }
}

fn boolean_token(token: &str) -> Option<i32> {
    if token.eq_ignore_ascii_case("false") {
        Some(0)
    } else if token.eq_ignore_ascii_case("true") {
        Some(1)
    } else {
        None
    }
}

fn compression_token(token: &str) -> Option<i32> {
    COMPRESSION_TOKENS
        .iter()
        .find(|(name, short, _)| {
            token.eq_ignore_ascii_case(name) || token.eq_ignore_ascii_case(short)
        })
        .map(|(_, _, v)| *v)
}

/// Outcome of applying a textual update on top of current values
#[derive(Debug, Clone, PartialEq)]
pub struct TextUpdate {
    pub values: FieldValues,
    /// Fields named in the text, in layout order
    pub changed: Vec<&'static str>,
    /// Keys that are not part of the layout
    pub ignored: Vec<String>,
}

/// Parse `key = value` text and merge it over `current`
///
/// Keys absent from the text keep their current value.
pub fn apply_text(current: &FieldValues, text: &str) -> TextUpdate {
    let mut values = *current;
    let mut touched = [false; FIELD_COUNT];
    let mut ignored = Vec::new();

    for (key, raw) in assignments(text) {
        let Some(index) = field_index(key) else {
            warn!(key, "Ignoring key that is not live-tunable");
            ignored.push(key.to_string());
            continue;
        };

        let encoded = encode_value(FIELDS[index].kind, raw);
        match encoded {
            Encoded::Clamped { requested, stored } => {
                warn!(key, requested = %requested, stored, "Value out of i32 range, clamped");
            }
            Encoded::Unparseable => {
                warn!(key, value = raw, "Unparseable live value, forcing 0");
            }
            Encoded::Exact(_) => {}
        }
        values[index] = encoded.value();
        touched[index] = true;
    }

    let changed = FIELDS
        .iter()
        .zip(touched)
        .filter_map(|(f, t)| t.then_some(f.name))
        .collect();

    TextUpdate {
        values,
        changed,
        ignored,
    }
}

/// Render values as options-file assignments, one per line
pub fn render_text(values: &FieldValues) -> String {
    FIELDS
        .iter()
        .zip(values)
        .map(|(f, v)| format!("{} = {}", f.name, decode_value(f.kind, *v)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Thin wrapper for logging a snapshot compactly
pub struct Snapshot<'a>(pub &'a FieldValues);

impl fmt::Display for Snapshot<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (field, v)) in FIELDS.iter().zip(self.0).enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", field.name, v)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets_fit_region() {
        assert_eq!(field_offset(0), 1);
        assert_eq!(field_offset(18), 73);
        assert!(field_offset(FIELD_COUNT) <= REGION_SIZE);
        assert_eq!(field_index("compression"), Some(14));
        assert_eq!(field_index("block_size"), None);
    }

    #[test]
    fn test_compression_tokens_both_directions() {
        for (name, short, v) in COMPRESSION_TOKENS {
            assert_eq!(encode_value(FieldKind::Compression, name), Encoded::Exact(v));
            assert_eq!(encode_value(FieldKind::Compression, short), Encoded::Exact(v));
            assert_eq!(decode_value(FieldKind::Compression, v), name);
        }
        // lz4hc must not be confused with lz4
        assert_eq!(encode_value(FieldKind::Compression, "kLZ4HCCompression"), Encoded::Exact(5));
        assert_eq!(encode_value(FieldKind::Compression, "3"), Encoded::Exact(3));
    }

    #[test]
    fn test_boolean_tokens() {
        assert_eq!(encode_value(FieldKind::Boolean, "TRUE"), Encoded::Exact(1));
        assert_eq!(encode_value(FieldKind::Boolean, "false"), Encoded::Exact(0));
        assert_eq!(decode_value(FieldKind::Boolean, 1), "true");
        assert_eq!(decode_value(FieldKind::Boolean, 0), "false");
    }

    #[test]
    fn test_integer_clamping_and_garbage() {
        assert_eq!(
            encode_value(FieldKind::Integer, "4294967296"),
            Encoded::Clamped {
                requested: 4294967296,
                stored: i32::MAX
            }
        );
        assert_eq!(encode_value(FieldKind::Integer, "-3000000000").value(), i32::MIN);
        assert_eq!(encode_value(FieldKind::Integer, "64MB"), Encoded::Unparseable);
        assert_eq!(encode_value(FieldKind::Integer, "64MB").value(), 0);
    }

    #[test]
    fn test_apply_text_keeps_absent_fields() {
        let mut current = [7; FIELD_COUNT];
        current[14] = 4;

        let update = apply_text(
            &current,
            "max_background_jobs = 8\nwrite_buffer_size=134217728\nblock_size = 4096\n",
        );

        assert_eq!(update.changed, vec!["max_background_jobs", "write_buffer_size"]);
        assert_eq!(update.ignored, vec!["block_size".to_string()]);
        assert_eq!(update.values[3], 8);
        assert_eq!(update.values[13], 134217728);
        for (i, v) in update.values.iter().enumerate() {
            if i != 3 && i != 13 {
                assert_eq!(*v, current[i]);
            }
        }
    }

    #[test]
    fn test_render_text_reparses_to_same_values() {
        let mut values = [0; FIELD_COUNT];
        values[12] = 1;
        values[14] = 7;
        values[3] = 4;

        let text = render_text(&values);
        assert!(text.contains("compression = kZSTD"));
        assert!(text.contains("avoid_flush_during_shutdown = true"));
        assert_eq!(apply_text(&[0; FIELD_COUNT], &text).values, values);
    }
}
