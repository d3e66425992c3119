//! cs2_lib
//!
//! The passes of the CEL-Seq2 pipeline that sit on either side of the external aligner:
//! demultiplexing raw read pairs into per-cell FASTQs, splitting a tagged alignment file by
//! cell, and assembling per-cell UMI counts into a gene-by-cell matrix.

pub mod demultiplex;
pub mod logging;
pub mod matrix;
pub mod parameters;
pub mod split_alignments;

pub use demultiplex::{demultiplex, DemuxMetrics, DemuxParams, Demultiplexer};
pub use matrix::UmiMatrix;
pub use parameters::Parameters;
pub use split_alignments::split_alignments_by_barcode;
