//! Per-case fixture metadata.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use snapvm_host::ExportId;

/// Expected-behavior record for one test case.
///
/// Keys are camelCase to match the fixture corpus emitted by the snapshot
/// compiler's test pipeline.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Fixture {
    /// Export to invoke; absent means the case is a restore-only check.
    pub run_exported_function: Option<ExportId>,
    /// Expected captured printout, compared verbatim.
    pub expected_printout: Option<String>,
    /// Deliberately skip this case.
    pub skip: bool,
    pub description: Option<String>,
}

impl Fixture {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text =
            std::fs::read_to_string(path).with_context(|| format!("read fixture {:?}", path))?;
        let fixture =
            serde_yaml::from_str(&text).with_context(|| format!("parse fixture {:?}", path))?;
        Ok(fixture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_record() {
        let fixture: Fixture = serde_yaml::from_str(
            "description: prints twice\nrunExportedFunction: 1\nexpectedPrintout: |-\n  a\n  b\n",
        )
        .unwrap();
        assert_eq!(fixture.run_exported_function, Some(1));
        assert_eq!(fixture.expected_printout.as_deref(), Some("a\nb"));
        assert!(!fixture.skip);
    }

    #[test]
    fn absent_export_means_restore_only() {
        let fixture: Fixture = serde_yaml::from_str("description: just restores\n").unwrap();
        assert_eq!(fixture.run_exported_function, None);
        assert_eq!(fixture.expected_printout, None);
    }

    #[test]
    fn skip_flag_is_honored() {
        let fixture: Fixture = serde_yaml::from_str("skip: true\n").unwrap();
        assert!(fixture.skip);
    }
}
