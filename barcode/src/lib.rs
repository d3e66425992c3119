//! Crate for dealing with CEL-Seq2 cell barcodes.
//!
//! Contains tools for loading the barcode dictionary, selecting the barcode IDs used in a run,
//! and for encoding/decoding the cell barcode and UMI carried in a demultiplexed read name.

pub mod cell_tag;
pub mod index;

pub use cell_tag::{barcode_from_read_name, umi_from_read_name, CellTag};
pub use index::{parse_id_ranges, BarcodeId, BarcodeIndex};

/// Nucleotides allowed in a barcode sequence.
pub const VALID_NUCLEOTIDES: &[u8] = b"ACGT";

/// Default barcode IDs used in a run, written as an ID range string.
pub const DEFAULT_IDS_USED: &str = "1-96";

/// True if `seq` is non-empty and consists only of uppercase `A`, `C`, `G`, `T`.
pub fn is_valid_barcode_seq(seq: &[u8]) -> bool {
    !seq.is_empty() && seq.iter().all(|b| VALID_NUCLEOTIDES.contains(b))
}
