//! Gene annotation for CEL-Seq2 UMI counting.
//!
//! Parses GTF/GFF3 gene-feature files and builds a strand-aware index from
//! genomic intervals to the genes whose features overlap them.

mod annotation;
pub mod parse_gtf;

pub use annotation::{AnnotationModel, GeneIdx};

use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Strand of a feature or an alignment on the reference.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Strand {
    Forward,
    Reverse,
}

impl Strand {
    /// The opposite strand.
    pub fn flip(self) -> Strand {
        match self {
            Strand::Forward => Strand::Reverse,
            Strand::Reverse => Strand::Forward,
        }
    }
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Strand::Forward => "+",
            Strand::Reverse => "-",
        })
    }
}

impl FromStr for Strand {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Strand> {
        Ok(match s {
            "+" => Strand::Forward,
            "-" => Strand::Reverse,
            _ => bail!("invalid strand '{s}'"),
        })
    }
}

/// Which features make up a gene, and whether strand is part of the index key.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct AnnotationParams {
    /// Only records of this feature type (third column) are indexed.
    pub feature_type: String,
    /// Attribute holding the gene identifier.
    pub gene_attribute: String,
    pub stranded: bool,
}

impl Default for AnnotationParams {
    fn default() -> Self {
        AnnotationParams {
            feature_type: "exon".to_string(),
            gene_attribute: "gene_id".to_string(),
            stranded: true,
        }
    }
}
