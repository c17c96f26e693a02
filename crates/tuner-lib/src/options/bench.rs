use serde::{Deserialize, Serialize};

/// Benchmark flags a proposal may change relative to its parent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BenchOptionsDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bloom_bits: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_ribbon_filter: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_cache_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_numshardbits: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_io_prio: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_cpu_prio: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_keep_filter: Option<bool>,
}

impl BenchOptionsDelta {
    /// Set flags as `(name, value)` pairs in declaration order
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        fn push<T: ToString>(out: &mut Vec<(&'static str, String)>, name: &'static str, v: &Option<T>) {
            if let Some(v) = v {
                out.push((name, v.to_string()));
            }
        }

        let mut out = Vec::new();
        push(&mut out, "cache_size", &self.cache_size);
        push(&mut out, "bloom_bits", &self.bloom_bits);
        push(&mut out, "use_ribbon_filter", &self.use_ribbon_filter);
        push(&mut out, "row_cache_size", &self.row_cache_size);
        push(&mut out, "cache_numshardbits", &self.cache_numshardbits);
        push(&mut out, "enable_io_prio", &self.enable_io_prio);
        push(&mut out, "enable_cpu_prio", &self.enable_cpu_prio);
        push(&mut out, "use_keep_filter", &self.use_keep_filter);
        out
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Merge into a `--flag=value` argument list
    ///
    /// An existing flag is replaced where it stands; new flags are appended.
    pub fn apply_to_args(&self, args: &[String]) -> Vec<String> {
        let mut out = args.to_vec();
        for (name, value) in self.entries() {
            let prefix = format!("--{name}=");
            let arg = format!("{prefix}{value}");
            match out.iter_mut().find(|a| a.starts_with(&prefix)) {
                Some(existing) => *existing = arg,
                None => out.push(arg),
            }
        }
        out
    }
}
