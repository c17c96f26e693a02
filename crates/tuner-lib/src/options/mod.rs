//! Options-file and benchmark-argument deltas
//!
//! Options files use the engine's INI dialect: `[Section "name"]` headers
//! followed by indented `key=value` lines. A node stores only what changed
//! relative to its parent; the full text is recomputed with
//! [`apply_deltas`].

mod bench;
mod delta;

pub use bench::BenchOptionsDelta;
pub use delta::{apply_deltas, diff_options, merge_live_patch, ConfigDelta};

use regex::Regex;
use std::sync::OnceLock;

static ASSIGNMENT: OnceLock<Regex> = OnceLock::new();

/// All `key = value` assignments in `text`, in order of appearance
///
/// Assignments never span lines. Lines starting with `#` or `;` are comments.
pub(crate) fn assignments(text: &str) -> impl Iterator<Item = (&str, &str)> {
    let pattern = ASSIGNMENT.get_or_init(|| {
        Regex::new(r"(\w+)[ \t]*=[ \t]*([\w\.\-]+)").expect("assignment pattern is valid")
    });
    text.lines()
        .filter(|line| {
            let line = line.trim_start();
            !line.starts_with('#') && !line.starts_with(';')
        })
        .flat_map(move |line| pattern.captures_iter(line))
        .filter_map(|c| Some((c.get(1)?.as_str(), c.get(2)?.as_str())))
}
