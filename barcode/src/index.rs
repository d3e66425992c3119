//! The barcode dictionary: numeric barcode IDs mapped to cell barcode sequences.

use crate::is_valid_barcode_seq;
use anyhow::{bail, ensure, Context, Result};
use flate2::read::MultiGzDecoder;
use itertools::Itertools;
use metric::TxHashMap;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

const GZ_BUF_SIZE: usize = 1 << 20;

/// A barcode ID as written in the index file: its 1-based row number.
pub type BarcodeId = u32;

/// Ordered mapping from barcode ID to barcode sequence.
///
/// All sequences are uppercase ACGT, unique, and share one length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarcodeIndex {
    seqs: BTreeMap<BarcodeId, String>,
    ids: TxHashMap<Vec<u8>, BarcodeId>,
    bc_len: usize,
}

impl BarcodeIndex {
    /// Build an index from `(id, sequence)` pairs, validating every sequence.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (BarcodeId, S)>,
        S: Into<String>,
    {
        let mut seqs = BTreeMap::new();
        let mut ids = TxHashMap::default();
        let mut bc_len = None;
        for (id, seq) in pairs {
            let seq = seq.into();
            ensure!(
                is_valid_barcode_seq(seq.as_bytes()),
                "barcode {id} has invalid sequence '{seq}': expected uppercase A, C, G, T"
            );
            match bc_len {
                None => bc_len = Some(seq.len()),
                Some(len) => ensure!(
                    len == seq.len(),
                    "barcode {id} sequence '{seq}' has length {}, expected {len}",
                    seq.len()
                ),
            }
            if let Some(prev) = ids.insert(seq.as_bytes().to_vec(), id) {
                bail!("barcode sequence '{seq}' is used by both barcode {prev} and barcode {id}");
            }
            if seqs.insert(id, seq).is_some() {
                bail!("duplicate barcode ID {id}");
            }
        }
        let Some(bc_len) = bc_len else {
            bail!("barcode index contains no barcodes");
        };
        Ok(BarcodeIndex { seqs, ids, bc_len })
    }

    /// Parse a barcode index from whitespace-delimited text.
    ///
    /// Lines starting with `#` and blank lines are skipped. When `skip_header` is set,
    /// the first remaining line is dropped. Each following row gets the next 1-based ID and
    /// its sequence is read from column `seq_column` (0-based).
    pub fn from_reader<R: BufRead>(reader: R, seq_column: usize, skip_header: bool) -> Result<Self> {
        let mut pairs = Vec::new();
        let mut header_pending = skip_header;
        for (line_num, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if header_pending {
                header_pending = false;
                continue;
            }
            let Some(seq) = line.split_whitespace().nth(seq_column) else {
                bail!(
                    "line {}: expected a barcode sequence in column {seq_column}, found '{line}'",
                    line_num + 1
                );
            };
            let id = pairs.len() as BarcodeId + 1;
            pairs.push((id, seq.to_string()));
        }
        Self::from_pairs(pairs)
    }

    /// Read a barcode index file, which may be gzipped if its name ends with `.gz`.
    pub fn from_path(path: &Path, seq_column: usize, skip_header: bool) -> Result<Self> {
        let file = File::open(path).with_context(|| path.display().to_string())?;
        let reader: Box<dyn BufRead> = match path.extension().and_then(|ext| ext.to_str()) {
            Some("gz") => Box::new(BufReader::with_capacity(
                GZ_BUF_SIZE,
                MultiGzDecoder::new(file),
            )),
            _ => Box::new(BufReader::new(file)),
        };
        let index = Self::from_reader(reader, seq_column, skip_header)
            .with_context(|| path.display().to_string())?;
        log::info!(
            "Loaded {} barcodes of length {} from {}",
            index.len(),
            index.barcode_len(),
            path.display()
        );
        Ok(index)
    }

    /// Restrict the index to the given barcode IDs.
    pub fn select(&self, ids: &[BarcodeId]) -> Result<Self> {
        let missing = ids
            .iter()
            .filter(|&&id| !self.seqs.contains_key(&id))
            .join(",");
        ensure!(
            missing.is_empty(),
            "barcode IDs not present in the barcode index ({} barcodes): {missing}",
            self.len()
        );
        Self::from_pairs(ids.iter().map(|&id| (id, self.seqs[&id].clone())))
    }

    /// Exact-match lookup of a barcode sequence.
    pub fn lookup(&self, seq: &[u8]) -> Option<BarcodeId> {
        self.ids.get(seq).copied()
    }

    /// The sequence of barcode `id`.
    pub fn seq(&self, id: BarcodeId) -> Option<&str> {
        self.seqs.get(&id).map(String::as_str)
    }

    /// Iterate over `(id, sequence)` in increasing ID order.
    pub fn iter(&self) -> impl Iterator<Item = (BarcodeId, &str)> + '_ {
        self.seqs.iter().map(|(&id, seq)| (id, seq.as_str()))
    }

    /// Length shared by all barcode sequences.
    pub fn barcode_len(&self) -> usize {
        self.bc_len
    }

    pub fn len(&self) -> usize {
        self.seqs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seqs.is_empty()
    }
}

/// Parse a barcode ID selection such as `1-3,6,89-90` into sorted unique IDs.
/// A reversed range such as `5-3` is read as `3-5`.
pub fn parse_id_ranges(s: &str) -> Result<Vec<BarcodeId>> {
    fn parse_id(tok: &str, s: &str) -> Result<BarcodeId> {
        tok.trim()
            .parse()
            .with_context(|| format!("invalid barcode ID '{tok}' in '{s}'"))
    }

    let mut ids = Vec::new();
    for tok in s.trim().split(',') {
        match tok.split_once('-') {
            Some((p, q)) => {
                let (p, q) = (parse_id(p, s)?, parse_id(q, s)?);
                ids.extend(p.min(q)..=p.max(q));
            }
            None => ids.push(parse_id(tok, s)?),
        }
    }
    Ok(ids.into_iter().sorted().dedup().collect())
}
