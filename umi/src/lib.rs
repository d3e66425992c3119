//! Crate for counting distinct UMIs per gene in the alignments of a single cell.
use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use transcriptome::Strand;

mod counter;
pub mod metrics;

pub use counter::{count_umis_from_path, AlignmentOutcome, CellUmiCounts, UmiCounter};
pub use metrics::UmiCountMetrics;

/// Orientation of the transcript relative to the aligned read.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Strandedness {
    /// The read is on the same strand as the transcript.
    #[default]
    Forward,
    /// The read is antisense to the transcript, so features are looked up on the opposite strand.
    Reverse,
}

impl Strandedness {
    /// The annotation strand to query for a read aligned to `read_strand`.
    pub fn query_strand(self, read_strand: Strand) -> Strand {
        match self {
            Strandedness::Forward => read_strand,
            Strandedness::Reverse => read_strand.flip(),
        }
    }
}

impl FromStr for Strandedness {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Strandedness> {
        Ok(match s {
            "forward" => Strandedness::Forward,
            "reverse" => Strandedness::Reverse,
            _ => bail!("unknown strandedness '{s}', expected 'forward' or 'reverse'"),
        })
    }
}

impl Display for Strandedness {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Strandedness::Forward => "forward",
            Strandedness::Reverse => "reverse",
        })
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct UmiCountParams {
    /// Number of UMI bases encoded in the read name.
    pub umi_len: usize,
    /// Alignments with a lower mapping quality are not counted.
    pub min_mapq: u8,
    pub strandedness: Strandedness,
    /// Look up each aligned block separately instead of the whole alignment span.
    pub gapped_aligner: bool,
}

impl Default for UmiCountParams {
    fn default() -> Self {
        UmiCountParams {
            umi_len: 6,
            min_mapq: 10,
            strandedness: Strandedness::Forward,
            gapped_aligner: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strandedness() {
        assert_eq!("reverse".parse::<Strandedness>().unwrap(), Strandedness::Reverse);
        assert_eq!(Strandedness::default().to_string(), "forward");
        assert!("both".parse::<Strandedness>().is_err());

        assert_eq!(
            Strandedness::Forward.query_strand(Strand::Reverse),
            Strand::Reverse
        );
        assert_eq!(
            Strandedness::Reverse.query_strand(Strand::Reverse),
            Strand::Forward
        );
    }
}
