//! Paired FASTQ input and FASTQ output for the demultiplexer.
//!
//! Inputs may be plain or gzip compressed. Read 1 and read 2 are consumed in lockstep by
//! `ReadPairIter`, and records are written back out with `write_fastq_record`.

pub mod read_pair_iter;

use anyhow::{bail, Context, Result};
pub use fastq::{OwnedRecord, Record};
use flate2::read::MultiGzDecoder;
pub use read_pair_iter::{FastqPairError, PairingCheck, ReadPair, ReadPairIter, TrimRecord};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, Write};
use std::path::Path;
use std::str::FromStr;

const GZ_BUF_SIZE: usize = 1 << 16;
const GZ_MAGIC: [u8; 2] = [0x1F, 0x8B];

/// How to decode a FASTQ input file.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    /// Detect gzip from the leading magic bytes.
    #[default]
    Auto,
    Gzip,
    Plain,
}

impl FromStr for Compression {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "auto" => Compression::Auto,
            "gzip" | "gz" => Compression::Gzip,
            "plain" | "none" => Compression::Plain,
            _ => bail!("unknown compression '{s}': expected auto, gzip or plain"),
        })
    }
}

/// Open a FASTQ file for reading.
///
/// With `Compression::Auto` the file extension is ignored: gzip is detected by its magic bytes,
/// and anything else must be empty or begin with the '@' symbol.
pub fn open_fastq(path: &Path, compression: Compression) -> Result<Box<dyn BufRead + Send>> {
    let mut file = File::open(path)
        .with_context(|| format!("Error opening FASTQ file: {}", path.display()))?;

    let compression = match compression {
        Compression::Auto => {
            let mut magic = Vec::with_capacity(GZ_MAGIC.len());
            (&mut file)
                .take(GZ_MAGIC.len() as u64)
                .read_to_end(&mut magic)
                .with_context(|| path.display().to_string())?;
            file.rewind().with_context(|| path.display().to_string())?;
            if magic == GZ_MAGIC {
                Compression::Gzip
            } else if magic.first().map_or(true, |&b| b == b'@') {
                Compression::Plain
            } else {
                bail!(
                    "FASTQ file does not appear to be valid. Input FASTQ file must be gzip \
                     compressed, or must begin with the '@' symbol: {}",
                    path.display()
                )
            }
        }
        forced => forced,
    };

    Ok(match compression {
        Compression::Gzip => Box::new(BufReader::with_capacity(
            GZ_BUF_SIZE,
            MultiGzDecoder::new(file),
        )),
        _ => Box::new(BufReader::with_capacity(32 * 1024, file)),
    })
}

/// Write one 4-line FASTQ record. `head` excludes the leading '@'.
pub fn write_fastq_record<W: Write>(
    writer: &mut W,
    head: &[u8],
    seq: &[u8],
    qual: &[u8],
) -> std::io::Result<()> {
    writer.write_all(b"@")?;
    writer.write_all(head)?;
    writer.write_all(b"\n")?;
    writer.write_all(seq)?;
    writer.write_all(b"\n+\n")?;
    writer.write_all(qual)?;
    writer.write_all(b"\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;

    const FASTQ: &[u8] = b"@r1\nACGT\n+\nIIII\n";

    fn read_all(mut reader: Box<dyn BufRead + Send>) -> Vec<u8> {
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_open_fastq_detects_gzip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let plain = dir.path().join("plain.fq.gz");
        std::fs::write(&plain, FASTQ)?;
        let gz = dir.path().join("gz.fastq");
        let mut enc = GzEncoder::new(File::create(&gz)?, flate2::Compression::default());
        enc.write_all(FASTQ)?;
        enc.finish()?;

        assert_eq!(read_all(open_fastq(&plain, Compression::Auto)?), FASTQ);
        assert_eq!(read_all(open_fastq(&gz, Compression::Auto)?), FASTQ);
        assert_eq!(read_all(open_fastq(&gz, Compression::Gzip)?), FASTQ);
        assert_eq!(read_all(open_fastq(&plain, Compression::Plain)?), FASTQ);
        Ok(())
    }

    #[test]
    fn test_open_fastq_rejects_garbage() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let bad = dir.path().join("bad.fastq");
        std::fs::write(&bad, b">fasta\nACGT\n")?;
        assert!(open_fastq(&bad, Compression::Auto).is_err());

        let empty = dir.path().join("empty.fastq");
        std::fs::write(&empty, b"")?;
        assert!(read_all(open_fastq(&empty, Compression::Auto)?).is_empty());

        assert!(open_fastq(&dir.path().join("missing.fastq"), Compression::Auto).is_err());
        Ok(())
    }

    #[test]
    fn test_write_fastq_record() -> Result<()> {
        let mut out = Vec::new();
        write_fastq_record(&mut out, b"r1", b"ACGT", b"IIII")?;
        assert_eq!(out, FASTQ);
        Ok(())
    }

    #[test]
    fn test_parse_compression() {
        assert_eq!("gzip".parse::<Compression>().unwrap(), Compression::Gzip);
        assert_eq!("auto".parse::<Compression>().unwrap(), Compression::Auto);
        assert!("lz4".parse::<Compression>().is_err());
    }
}
