//! Per-block compression level overrides.
//!
//! Side-file format, one rule per line:
//!
//! ```text
//! # comment
//! 5:1          block 5 at level 1
//! 100-199:3    blocks 100 through 199 inclusive at level 3
//! ```
//!
//! Later rules win over earlier ones.

use std::fs;
use std::ops::RangeInclusive;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectorTable {
    rules: Vec<(RangeInclusive<u64>, u32)>,
}

impl SectorTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, block: u64, level: u32) -> &mut Self {
        self.rules.push((block..=block, level));
        self
    }

    pub fn set_range(&mut self, blocks: RangeInclusive<u64>, level: u32) -> &mut Self {
        self.rules.push((blocks, level));
        self
    }

    /// Level for `block`, or `default` when no rule covers it.
    pub fn level_for(&self, block: u64, default: u32) -> u32 {
        self.rules
            .iter()
            .rev()
            .find(|(r, _)| r.contains(&block))
            .map_or(default, |(_, level)| *level)
    }

    /// First level outside 1-9, if any rule carries one.
    pub fn invalid_level(&self) -> Option<u32> {
        self.rules.iter().map(|(_, l)| *l).find(|l| !(1..=9).contains(l))
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| Error::io("read sector table", 0, e))?;
        text.parse()
    }
}

impl FromStr for SectorTable {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        let mut table = SectorTable::new();
        for (n, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let bad = |reason: &str| Error::SectorTable { line: n + 1, reason: format!("{reason}: {line:?}") };

            let (blocks, level) = line.split_once(':').ok_or_else(|| bad("missing ':'"))?;
            let level: u32 = level.trim().parse().map_err(|_| bad("invalid level"))?;
            if !(1..=9).contains(&level) {
                return Err(bad("level must be 1-9"));
            }

            let range = match blocks.split_once('-') {
                Some((a, b)) => {
                    let a: u64 = a.trim().parse().map_err(|_| bad("invalid range start"))?;
                    let b: u64 = b.trim().parse().map_err(|_| bad("invalid range end"))?;
                    if b < a {
                        return Err(bad("range end before start"));
                    }
                    a..=b
                }
                None => {
                    let a: u64 = blocks.trim().parse().map_err(|_| bad("invalid block"))?;
                    a..=a
                }
            };
            table.set_range(range, level);
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_singles_ranges_and_comments() {
        let t: SectorTable = "# boot area\n5:1\n\n10-12:3\n11:7\n".parse().unwrap();
        assert_eq!(t.level_for(5, 9), 1);
        assert_eq!(t.level_for(6, 9), 9);
        assert_eq!(t.level_for(10, 9), 3);
        assert_eq!(t.level_for(11, 9), 7);
        assert_eq!(t.level_for(12, 9), 3);
        assert_eq!(t.level_for(13, 9), 9);
    }

    #[test]
    fn rejects_malformed_lines() {
        for (text, line) in [("5", 1), ("ok:x", 1), ("1:1\n2:0", 2), ("1:10", 1), ("9-3:2", 1), ("a-3:2", 1)] {
            match text.parse::<SectorTable>() {
                Err(Error::SectorTable { line: l, .. }) => assert_eq!(l, line, "{text}"),
                other => panic!("{text}: {other:?}"),
            }
        }
    }

    #[test]
    fn builder_overrides() {
        let mut t = SectorTable::new();
        t.set(5, 1).set(6, 9);
        assert_eq!(t.level_for(5, 4), 1);
        assert_eq!(t.level_for(6, 4), 9);
        assert_eq!(t.level_for(7, 4), 4);
    }
}
