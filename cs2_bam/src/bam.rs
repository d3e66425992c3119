use crate::bam_tags::NUM_HITS_TAG;
use anyhow::{Context, Result};
use rust_htslib::bam::record::{Aux, Cigar, Record};
use rust_htslib::bam::{self, HeaderView, Read};
use std::path::Path;
use std::str;

/// Number of reference bases covered by the alignment, including deletions and skips.
pub fn alen(read: &Record) -> i64 {
    let mut alen = 0;

    for c in &read.cigar() {
        match *c {
            Cigar::Match(l)
            | Cigar::Del(l)
            | Cigar::RefSkip(l)
            | Cigar::Equal(l)
            | Cigar::Diff(l) => alen += l as i64,
            _ => (),
        }
    }
    alen
}

pub trait AuxExt {
    /// The value of an integer field, or None for any other field type.
    fn integer(&self) -> Option<i64>;
}

impl AuxExt for Aux<'_> {
    fn integer(&self) -> Option<i64> {
        // BAM writers pick the smallest integer width that fits the value.
        match *self {
            Aux::I8(i) => Some(i64::from(i)),
            Aux::U8(i) => Some(i64::from(i)),
            Aux::I16(i) => Some(i64::from(i)),
            Aux::U16(i) => Some(i64::from(i)),
            Aux::I32(i) => Some(i64::from(i)),
            Aux::U32(i) => Some(i64::from(i)),
            _ => None,
        }
    }
}

/// The multi-mapping count from the `NH` field. None if the field is absent or not an integer.
pub fn num_hits(read: &Record) -> Option<i64> {
    read.aux(NUM_HITS_TAG).ok().and_then(|aux| aux.integer())
}

/// A 0-based half-open span of the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefSegment {
    pub start: u64,
    pub end: u64,
}

/// Reference spans of the alignment to look up in an annotation.
///
/// With `gapped`, every aligned block (`M`, `=`, `X`) is its own segment, so introns (`N`)
/// and deletions (`D`) separate segments. Otherwise the alignment is a single span from its
/// start to its end.
pub fn matched_segments(read: &Record, gapped: bool) -> Vec<RefSegment> {
    let start = read.pos().max(0) as u64;
    if !gapped {
        return vec![RefSegment {
            start,
            end: start + alen(read).max(0) as u64,
        }];
    }

    let mut segments = Vec::new();
    let mut pos = start;
    for c in &read.cigar() {
        match *c {
            Cigar::Match(l) | Cigar::Equal(l) | Cigar::Diff(l) => {
                segments.push(RefSegment {
                    start: pos,
                    end: pos + u64::from(l),
                });
                pos += u64::from(l);
            }
            Cigar::Del(l) | Cigar::RefSkip(l) => pos += u64::from(l),
            Cigar::Ins(_) | Cigar::SoftClip(_) | Cigar::HardClip(_) | Cigar::Pad(_) => (),
        }
    }
    segments
}

/// Open a SAM or BAM file.
pub fn open_alignments(path: &Path) -> Result<bam::Reader> {
    bam::Reader::from_path(path)
        .with_context(|| format!("Error opening alignment file {}", path.display()))
}

/// Reference sequence names, indexed by target ID.
pub fn target_names(header: &HeaderView) -> Result<Vec<String>> {
    header
        .target_names()
        .into_iter()
        .map(|name| Ok(str::from_utf8(name)?.to_string()))
        .collect()
}

/// Reference names of an opened alignment file.
pub fn reader_target_names(reader: &bam::Reader) -> Result<Vec<String>> {
    target_names(reader.header())
}
