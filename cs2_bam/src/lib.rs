//! Helpers over rust-htslib alignment records for CEL-Seq2 UMI counting.
pub mod bam;
pub mod bam_tags;

pub use bam::{alen, matched_segments, num_hits, AuxExt, RefSegment};
