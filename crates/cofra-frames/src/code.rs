//! Code metadata attached to frame records.

use std::fmt;

/// Static description of a compiled routine, produced by code generation.
///
/// Shared by every frame of the routine and constant for a frame's life.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CodeInfo {
    /// Qualified routine name, as shown in tracebacks.
    pub name: String,
    /// Source file the routine was compiled from.
    pub file: String,
    /// Line of the routine's definition (1-indexed).
    pub first_line: u32,
}

impl CodeInfo {
    pub fn new(name: impl Into<String>, file: impl Into<String>, first_line: u32) -> Self {
        Self {
            name: name.into(),
            file: file.into(),
            first_line,
        }
    }

    /// Cheap sanity check run on every push and pop.
    #[inline]
    pub fn is_well_formed(&self) -> bool {
        !self.name.is_empty() && !self.file.is_empty() && self.first_line >= 1
    }
}

impl fmt::Display for CodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<code {} at {}:{}>", self.name, self.file, self.first_line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_formed() {
        assert!(CodeInfo::new("main", "main.py", 1).is_well_formed());
        assert!(!CodeInfo::new("", "main.py", 1).is_well_formed());
        assert!(!CodeInfo::new("main", "", 1).is_well_formed());
        assert!(!CodeInfo::new("main", "main.py", 0).is_well_formed());
    }

    #[test]
    fn test_display() {
        let code = CodeInfo::new("pkg.run", "pkg/run.py", 12);
        assert_eq!(code.to_string(), "<code pkg.run at pkg/run.py:12>");
    }
}
