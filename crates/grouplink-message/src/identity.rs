use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CodecError, Result};

/// Maximum process name length in bytes.
pub const MAX_PROCESS_NAME_LEN: usize = 255;

/// Identifies a process on one end of a connection.
///
/// Two identities are equal when both name and pid match. The value never
/// changes after construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessIdentity {
    name: String,
    pid: u32,
}

impl ProcessIdentity {
    pub fn new(name: impl Into<String>, pid: u32) -> Self {
        Self {
            name: name.into(),
            pid,
        }
    }

    /// Identity of the calling process.
    ///
    /// The name is the executable's file stem, falling back to `"process"`
    /// when the executable path is unavailable.
    pub fn current() -> Self {
        let name = std::env::current_exe()
            .ok()
            .and_then(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "process".to_string());
        let mut name = name;
        truncate_to_boundary(&mut name, MAX_PROCESS_NAME_LEN);
        Self::new(name, std::process::id())
    }

    /// Process or bundle name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Process identifier.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Reject identities that cannot go on the wire.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(CodecError::InvalidIdentity(
                "process name is empty".to_string(),
            ));
        }
        if self.name.len() > MAX_PROCESS_NAME_LEN {
            return Err(CodecError::TooLong {
                what: "process name",
                len: self.name.len(),
                max: MAX_PROCESS_NAME_LEN,
            });
        }
        Ok(())
    }
}

impl fmt::Display for ProcessIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.name, self.pid)
    }
}

fn truncate_to_boundary(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}
