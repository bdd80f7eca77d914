//! Session identification line: `[software-version-flags$]`.
//!
//! Flag letters run together with no delimiter (`AB1FHM`), matching the on-the-wire form real
//! F6FBB clients emit; rather than guess a tokenisation for multi-character flags like `B1`,
//! capability checks here are simple substring tests against the raw flag string, the same way
//! established FBB implementations treat it.

use crate::error::FbbError;

/// Capability letter this stack uses to negotiate gzip in place of LZHUF for binary proposals.
/// Not part of the classical F6FBB flag set (`F B B1 H M X $`); see DESIGN.md for why `G` was
/// chosen.
pub const FLAG_GZIP: char = 'G';
pub const FLAG_XFWD: char = 'X';
pub const FLAG_TRAFFIC_LIMIT: char = 'H';
pub const FLAG_CHECKSUM: char = 'M';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sid {
    pub software: String,
    pub version: String,
    pub flags: String,
    pub terminated: bool,
}

impl Sid {
    pub fn new(software: &str, version: &str, flags: &str, terminated: bool) -> Self {
        Sid {
            software: software.to_string(),
            version: version.to_string(),
            flags: flags.to_string(),
            terminated,
        }
    }

    pub fn has_flag(&self, c: char) -> bool {
        self.flags.contains(c)
    }

    pub fn encode(&self) -> String {
        format!(
            "[{}-{}-{}{}]",
            self.software,
            self.version,
            self.flags,
            if self.terminated { "$" } else { "" }
        )
    }

    /// Parse a SID line. A missing `$` terminator is tolerated (§4.7 edge cases: "treat as
    /// non-conformant but continue if all capabilities are known") rather than rejected.
    pub fn parse(line: &str) -> Result<Self, FbbError> {
        let trimmed = line.trim();
        let inner = trimmed
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .ok_or_else(|| FbbError::MalformedLine(format!("SID line missing brackets: {:?}", line)))?;
        let mut parts = inner.splitn(3, '-');
        let software = parts
            .next()
            .ok_or_else(|| FbbError::MalformedLine(line.to_string()))?
            .to_string();
        let version = parts
            .next()
            .ok_or_else(|| FbbError::MalformedLine(line.to_string()))?
            .to_string();
        let rest = parts.next().unwrap_or("");
        let terminated = rest.ends_with('$');
        let flags = if terminated {
            rest[..rest.len() - 1].to_string()
        } else {
            rest.to_string()
        };
        Ok(Sid {
            software,
            version,
            flags,
            terminated,
        })
    }

    /// Reject capability combinations that can't coexist: `G` (gzip) only makes sense as an
    /// alternative encoding for binary proposals, so asserting it without `B` is contradictory.
    pub fn validate(&self) -> Result<(), FbbError> {
        if self.has_flag(FLAG_GZIP) && !self.has_flag('B') {
            return Err(FbbError::ContradictoryCapabilities(format!(
                "{:?} asserts gzip ('{}') without binary ('B')",
                self.flags, FLAG_GZIP
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_then_encode_roundtrips() {
        let sid = Sid::parse("[PYF-0.1-FB1$]").unwrap();
        assert_eq!(sid.software, "PYF");
        assert_eq!(sid.version, "0.1");
        assert_eq!(sid.flags, "FB1");
        assert!(sid.terminated);
        assert_eq!(sid.encode(), "[PYF-0.1-FB1$]");
    }

    #[test]
    fn missing_terminator_is_tolerated() {
        let sid = Sid::parse("[FBB-7.0-AB1FHM]").unwrap();
        assert!(!sid.terminated);
        assert!(sid.has_flag('H'));
    }

    #[test]
    fn has_flag_checks_substring() {
        let sid = Sid::parse("[FBB-7.0-AB1FHM$]").unwrap();
        assert!(sid.has_flag('M'));
        assert!(!sid.has_flag('G'));
    }

    #[test]
    fn gzip_without_binary_is_contradictory() {
        let sid = Sid::parse("[PYF-0.1-FGH$]").unwrap();
        assert!(matches!(sid.validate(), Err(FbbError::ContradictoryCapabilities(_))));
    }

    #[test]
    fn gzip_with_binary_is_accepted() {
        let sid = Sid::parse("[PYF-0.1-FBGH$]").unwrap();
        assert!(sid.validate().is_ok());
    }
}
