//! Tunable parameters of the pipeline passes, optionally overridden from a TOML file.
//!
//! ```toml
//! [demux]
//! cut_len = 50
//!
//! [count]
//! strandedness = "reverse"
//! ```

use crate::demultiplex::DemuxParams;
use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::Path;
use transcriptome::AnnotationParams;
use umi::UmiCountParams;

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Parameters {
    pub demux: DemuxParams,
    pub annotation: AnnotationParams,
    pub count: UmiCountParams,
}

impl Parameters {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Read parameters from `path`, or use the defaults if no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Parameters::default());
        };
        let s = std::fs::read_to_string(path).with_context(|| path.display().to_string())?;
        let params = Self::from_toml_str(&s).with_context(|| path.display().to_string())?;
        params.warn_non_default()?;
        Ok(params)
    }

    /// `section.name = value` for every value that differs from its default.
    pub fn non_default(&self) -> Result<Vec<String>> {
        let current = toml::Value::try_from(self)?;
        let defaults = toml::Value::try_from(Parameters::default())?;
        let (Some(current), Some(defaults)) = (current.as_table(), defaults.as_table()) else {
            return Ok(Vec::new());
        };
        let mut changed = Vec::new();
        for (section, values) in current {
            let (Some(values), Some(default_values)) = (
                values.as_table(),
                defaults.get(section).and_then(toml::Value::as_table),
            ) else {
                continue;
            };
            for (name, value) in values {
                if default_values.get(name) != Some(value) {
                    changed.push(format!("{section}.{name} = {value}"));
                }
            }
        }
        Ok(changed)
    }

    fn warn_non_default(&self) -> Result<()> {
        for param in self.non_default()? {
            warn!("using non-default {param}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use umi::Strandedness;

    #[test]
    fn test_defaults() -> Result<()> {
        let params = Parameters::from_toml_str("")?;
        assert_eq!(params, Parameters::default());
        assert_eq!(params.demux.cut_len, 35);
        assert_eq!(params.annotation.feature_type, "exon");
        assert_eq!(params.count.min_mapq, 10);
        assert!(params.non_default()?.is_empty());
        assert_eq!(Parameters::load(None)?, params);
        Ok(())
    }

    #[test]
    fn test_overrides() -> Result<()> {
        let params = Parameters::from_toml_str(
            "[demux]\ncut_len = 50\npairing = \"verify_names\"\n\n\
             [count]\nstrandedness = \"reverse\"\n",
        )?;
        assert_eq!(params.demux.cut_len, 50);
        assert_eq!(params.demux.umi_len, 6);
        assert_eq!(params.count.strandedness, Strandedness::Reverse);
        assert_eq!(
            params.non_default()?,
            [
                "count.strandedness = \"reverse\"",
                "demux.cut_len = 50",
                "demux.pairing = \"verify_names\""
            ]
        );
        Ok(())
    }

    #[test]
    fn test_unknown_field() {
        assert!(Parameters::from_toml_str("[demux]\ncutlen = 50\n").is_err());
        assert!(Parameters::from_toml_str("[align]\n").is_err());
    }

    #[test]
    fn test_load_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("parameters.toml");
        std::fs::write(&path, "[annotation]\nstranded = false\n")?;
        let params = Parameters::load(Some(&path))?;
        assert!(!params.annotation.stranded);
        assert!(Parameters::load(Some(&dir.path().join("missing.toml"))).is_err());
        Ok(())
    }
}
