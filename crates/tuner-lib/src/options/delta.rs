use super::assignments;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Changed entries of one options-file section
///
/// `section` is the header text without brackets, e.g. `CFOptions "default"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigDelta {
    pub section: String,
    pub entries: Vec<(String, String)>,
}

impl ConfigDelta {
    pub fn new(section: impl Into<String>) -> Self {
        Self {
            section: section.into(),
            entries: Vec::new(),
        }
    }

    /// Builder form of [`ConfigDelta::set`]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Set `key`; an existing entry keeps its position and takes the new value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

enum Line<'a> {
    Header(&'a str),
    Entry {
        indent: &'a str,
        key: &'a str,
        value: &'a str,
    },
    Other,
}

fn classify(line: &str) -> Line<'_> {
    let trimmed = line.trim();
    if let Some(inner) = trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
        return Line::Header(inner.trim());
    }
    if trimmed.starts_with('#') || trimmed.starts_with(';') {
        return Line::Other;
    }
    match trimmed.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            let indent_len = line.len() - line.trim_start().len();
            Line::Entry {
                indent: &line[..indent_len],
                key: key.trim(),
                value: value.trim(),
            }
        }
        _ => Line::Other,
    }
}

/// Apply `deltas` in order to a full options text
///
/// Existing keys are rewritten in place with their indentation preserved.
/// Missing keys are appended at the end of their section, and missing
/// sections are appended at the end of the file.
pub fn apply_deltas(base: &str, deltas: &[ConfigDelta]) -> String {
    let mut lines: Vec<String> = base.lines().map(str::to_string).collect();
    for delta in deltas {
        apply_one(&mut lines, delta);
    }

    let mut out = lines.join("\n");
    if base.ends_with('\n') || base.is_empty() {
        out.push('\n');
    }
    out
}

fn apply_one(lines: &mut Vec<String>, delta: &ConfigDelta) {
    let header = lines
        .iter()
        .position(|l| matches!(classify(l), Line::Header(h) if h == delta.section));

    let Some(header) = header else {
        if lines.last().is_some_and(|l| !l.trim().is_empty()) {
            lines.push(String::new());
        }
        lines.push(format!("[{}]", delta.section));
        for (key, value) in &delta.entries {
            lines.push(format!("  {key}={value}"));
        }
        return;
    };

    for (key, value) in &delta.entries {
        let mut section_end = lines.len();
        let mut last_content = header;
        let mut indent = String::from("  ");
        let mut replaced = false;

        for (i, line) in lines.iter_mut().enumerate().skip(header + 1) {
            match classify(line) {
                Line::Header(_) => {
                    section_end = i;
                    break;
                }
                Line::Entry {
                    indent: ind,
                    key: k,
                    ..
                } => {
                    indent = ind.to_string();
                    last_content = i;
                    if k == key {
                        *line = format!("{indent}{key}={value}");
                        replaced = true;
                        break;
                    }
                }
                Line::Other => {
                    if !line.trim().is_empty() {
                        last_content = i;
                    }
                }
            }
        }

        if !replaced {
            let at = (last_content + 1).min(section_end);
            lines.insert(at, format!("{indent}{key}={value}"));
        }
    }
}

type Sections<'a> = Vec<(&'a str, Vec<(&'a str, &'a str)>)>;

fn sections(text: &str) -> Sections<'_> {
    let mut out: Sections<'_> = Vec::new();
    for line in text.lines() {
        match classify(line) {
            Line::Header(name) => out.push((name, Vec::new())),
            Line::Entry { key, value, .. } => {
                if let Some((_, entries)) = out.last_mut() {
                    entries.push((key, value));
                }
            }
            Line::Other => {}
        }
    }
    out
}

/// Deltas that turn `parent` into `child`, in the child's file order
///
/// Keys removed from the parent are not represented.
pub fn diff_options(parent: &str, child: &str) -> Vec<ConfigDelta> {
    let parent_sections: HashMap<&str, HashMap<&str, &str>> = sections(parent)
        .into_iter()
        .map(|(name, entries)| (name, entries.into_iter().collect()))
        .collect();

    sections(child)
        .into_iter()
        .filter_map(|(name, entries)| {
            let before = parent_sections.get(name);
            let mut delta = ConfigDelta::new(name);
            for (key, value) in entries {
                if before.and_then(|s| s.get(key)) != Some(&value) {
                    delta.set(key, value);
                }
            }
            (!delta.is_empty()).then_some(delta)
        })
        .collect()
}

/// Fold a live patch back into the options text it was derived from
///
/// Every entry whose key appears in `patch` takes the patched value; all
/// other lines are left untouched.
pub fn merge_live_patch(options: &str, patch: &str) -> String {
    let patched: HashMap<&str, &str> = assignments(patch).collect();
    if patched.is_empty() {
        return options.to_string();
    }

    let mut out: Vec<String> = options
        .lines()
        .map(|line| match classify(line) {
            Line::Entry { indent, key, .. } => match patched.get(key) {
                Some(value) => format!("{indent}{key}={value}"),
                None => line.to_string(),
            },
            _ => line.to_string(),
        })
        .collect();

    if options.ends_with('\n') {
        out.push(String::new());
    }
    out.join("\n")
}
