use std::fmt;

const STATUS_PATH: &str = "/proc/self/status";

/// Counters kept from the status file, in the order they appear there.
pub const MEMORY_COUNTERS: [&str; 7] = [
    "VmPeak", "VmSize", "VmStk", "VmData", "VmRSS", "VmLib", "VmPTE",
];

/// Errors raised while reading the process memory usage.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DiagnosticsError {
    /// The status file could not be read, e.g. on a platform without procfs.
    #[error("Memory usage is unavailable. {0}")]
    Unavailable(#[from] std::io::Error),
}

/// A snapshot of the process memory counters, values in kB.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryUsage {
    entries: Vec<(String, u64)>,
}

impl MemoryUsage {
    /// Parse `/proc/self/status` style text.
    ///
    /// Lines look like `VmRSS:      1234 kB`. Unknown or malformed lines are
    /// skipped.
    pub fn from_status(text: &str) -> Self {
        let entries = text
            .lines()
            .filter_map(|line| {
                let (key, value) = line.split_once(':')?;
                let key = key.trim();
                if !MEMORY_COUNTERS.contains(&key) {
                    return None;
                }
                let kb = value.split_whitespace().next()?.parse::<u64>().ok()?;
                Some((key.to_string(), kb))
            })
            .collect();
        Self { entries }
    }

    /// The parsed `(counter, kB)` pairs.
    pub fn entries(&self) -> &[(String, u64)] {
        &self.entries
    }

    /// Value of one counter in kB.
    pub fn get(&self, counter: &str) -> Option<u64> {
        self.entries
            .iter()
            .find(|(key, _)| key == counter)
            .map(|(_, kb)| *kb)
    }
}

impl fmt::Display for MemoryUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", "=".repeat(30))?;
        writeln!(f, "{:<15}{:<15}", "Memory Type", "Size (MB)")?;
        writeln!(f, "{}", "-".repeat(30))?;
        for (key, kb) in &self.entries {
            writeln!(f, "{:<15}{:<15.2}", key, *kb as f64 / 1024.0)?;
        }
        Ok(())
    }
}

/// Read the memory counters of the current process.
pub fn read_memory_usage() -> Result<MemoryUsage, DiagnosticsError> {
    let text = std::fs::read_to_string(STATUS_PATH)?;
    Ok(MemoryUsage::from_status(&text))
}

/// Print the memory table to stdout, or warn when it is unavailable.
pub fn report_memory_usage() {
    match read_memory_usage() {
        Ok(usage) => print!("{usage}"),
        Err(e) => log::warn!("{e}"),
    }
}
