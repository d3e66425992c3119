//! Lockstep iteration over the read 1 and read 2 FASTQ files of a run.

use crate::{open_fastq, Compression};
use anyhow::{anyhow, Result};
use fastq::{OwnedRecord, Record, RecordRefIter};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Conditions under which the two streams of a pair no longer describe the same reads.
#[derive(Debug, Error)]
pub enum FastqPairError {
    #[error(
        "FASTQ headers do not match at read pair {pair}: '{r1_name}' in {r1_path:?} and \
         '{r2_name}' in {r2_path:?}"
    )]
    Desynchronized {
        pair: usize,
        r1_path: PathBuf,
        r2_path: PathBuf,
        r1_name: String,
        r2_name: String,
    },
    #[error("Input FASTQ file {ended:?} ended after {pairs} records, but {unfinished:?} has more")]
    UnequalLength {
        pairs: usize,
        ended: PathBuf,
        unfinished: PathBuf,
    },
}

/// How strictly R1 and R2 records are paired.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PairingCheck {
    /// Pair records by position. The pass ends at the end of the shorter stream.
    #[default]
    Positional,
    /// Also require matching read names and equal stream lengths.
    VerifyNames,
}

impl FromStr for PairingCheck {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "positional" => Ok(PairingCheck::Positional),
            "verify_names" | "verify-names" => Ok(PairingCheck::VerifyNames),
            _ => Err(anyhow!(
                "unknown pairing check '{s}': expected positional or verify_names"
            )),
        }
    }
}

/// View of a record with sequence and quality cut to at most `max_len` bases. Shorter reads
/// are passed through unpadded.
pub struct TrimRecord<'a, R: Record> {
    inner: &'a R,
    trim: usize,
}

impl<'a, R: Record> TrimRecord<'a, R> {
    pub fn new(inner: &'a R, max_len: usize) -> Self {
        let trim = max_len.min(inner.seq().len()).min(inner.qual().len());
        TrimRecord { inner, trim }
    }
}

impl<R: Record> Record for TrimRecord<'_, R> {
    fn seq(&self) -> &[u8] {
        &self.inner.seq()[..self.trim]
    }
    fn qual(&self) -> &[u8] {
        &self.inner.qual()[..self.trim]
    }
    fn head(&self) -> &[u8] {
        self.inner.head()
    }
    fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<usize> {
        const FMT_BYTES: usize = b"@\n\n+\n\n".len();
        crate::write_fastq_record(writer, self.head(), self.seq(), self.qual())?;
        Ok(FMT_BYTES + self.head().len() + self.seq().len() + self.qual().len())
    }
}

/// The R1 and R2 records of one read pair.
#[derive(Debug)]
pub struct ReadPair {
    pub r1: OwnedRecord,
    pub r2: OwnedRecord,
}

fn clone_record(rec: &OwnedRecord) -> OwnedRecord {
    OwnedRecord {
        head: rec.head.clone(),
        seq: rec.seq.clone(),
        sep: rec.sep.clone(),
        qual: rec.qual.clone(),
    }
}

impl Clone for ReadPair {
    fn clone(&self) -> Self {
        ReadPair {
            r1: clone_record(&self.r1),
            r2: clone_record(&self.r2),
        }
    }
}

/// Read name up to the first space or '/'.
fn name_prefix(head: &[u8]) -> &[u8] {
    head.split(|&x| matches!(x, b' ' | b'/'))
        .next()
        .unwrap_or(head)
}

struct FastqStream {
    iter: RecordRefIter<Box<dyn BufRead + Send>>,
    path: PathBuf,
}

impl FastqStream {
    fn new(reader: Box<dyn BufRead + Send>, path: PathBuf) -> Self {
        FastqStream {
            iter: fastq::Parser::new(reader).ref_iter(),
            path,
        }
    }

    #[cold]
    fn error(&self, err: std::io::Error, line: usize) -> anyhow::Error {
        if err.kind() == ErrorKind::InvalidData {
            anyhow!("{err}: {:?} line {line}", self.path)
        } else {
            anyhow!("IO error in FASTQ file: {:?} line {line}: {err}", self.path)
        }
    }

    fn advance(&mut self, line: usize) -> Result<()> {
        self.iter.advance().map_err(|err| self.error(err, line))
    }
}

/// Lockstep reader over an R1 FASTQ (UMI and cell barcode) and an R2 FASTQ (transcript).
pub struct ReadPairIter {
    r1: FastqStream,
    r2: FastqStream,
    pairing: PairingCheck,
    pairs_read: usize,
    finished: bool,
}

impl ReadPairIter {
    /// Open both FASTQ files, which may be plain or gzipped.
    pub fn new(
        r1: &Path,
        r2: &Path,
        compression: Compression,
        pairing: PairingCheck,
    ) -> Result<ReadPairIter> {
        Ok(Self::from_readers(
            (open_fastq(r1, compression)?, r1.to_path_buf()),
            (open_fastq(r2, compression)?, r2.to_path_buf()),
            pairing,
        ))
    }

    /// Pair two already opened FASTQ streams. The paths are used in error messages only.
    pub fn from_readers(
        r1: (Box<dyn BufRead + Send>, PathBuf),
        r2: (Box<dyn BufRead + Send>, PathBuf),
        pairing: PairingCheck,
    ) -> ReadPairIter {
        ReadPairIter {
            r1: FastqStream::new(r1.0, r1.1),
            r2: FastqStream::new(r2.0, r2.1),
            pairing,
            pairs_read: 0,
            finished: false,
        }
    }

    /// Number of complete read pairs yielded so far.
    pub fn pairs_read(&self) -> usize {
        self.pairs_read
    }

    fn get_next(&mut self) -> Result<Option<ReadPair>> {
        if self.finished {
            return Ok(None);
        }
        let line = self.pairs_read * 4;
        self.r1.advance(line)?;
        self.r2.advance(line)?;

        let (r1, r2) = match (self.r1.iter.get(), self.r2.iter.get()) {
            (Some(r1), Some(r2)) => (r1, r2),
            (None, None) => {
                self.finished = true;
                return Ok(None);
            }
            (r1, _) => {
                self.finished = true;
                let (ended, unfinished) = if r1.is_none() {
                    (&self.r1.path, &self.r2.path)
                } else {
                    (&self.r2.path, &self.r1.path)
                };
                let err = FastqPairError::UnequalLength {
                    pairs: self.pairs_read,
                    ended: ended.clone(),
                    unfinished: unfinished.clone(),
                };
                return match self.pairing {
                    PairingCheck::Positional => {
                        log::warn!("{err}; ignoring the remaining records");
                        Ok(None)
                    }
                    PairingCheck::VerifyNames => Err(err.into()),
                };
            }
        };

        if self.pairing == PairingCheck::VerifyNames {
            let (r1_name, r2_name) = (name_prefix(r1.head()), name_prefix(r2.head()));
            if r1_name != r2_name {
                return Err(FastqPairError::Desynchronized {
                    pair: self.pairs_read + 1,
                    r1_path: self.r1.path.clone(),
                    r2_path: self.r2.path.clone(),
                    r1_name: String::from_utf8_lossy(r1_name).into_owned(),
                    r2_name: String::from_utf8_lossy(r2_name).into_owned(),
                }
                .into());
            }
        }

        let pair = ReadPair {
            r1: r1.to_owned_record(),
            r2: r2.to_owned_record(),
        };
        self.pairs_read += 1;
        Ok(Some(pair))
    }
}

impl Iterator for ReadPairIter {
    type Item = Result<ReadPair>;

    fn next(&mut self) -> Option<Result<ReadPair>> {
        self.get_next().transpose()
    }
}
