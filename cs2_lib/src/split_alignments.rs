//! Split an alignment file of tagged reads into one SAM file per cell barcode.

use anyhow::{ensure, Context, Result};
use barcode::barcode_from_read_name;
use cs2_bam::bam::open_alignments;
use metric::TxHashMap;
use rust_htslib::bam::{self, Read, Record};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Write every record of `path` to `<outdir>/<barcode>.sam`, where the barcode is taken from
/// the `BC-<barcode>_UMI-<umi>` read name. Returns the number of records per barcode.
pub fn split_alignments_by_barcode(
    path: &Path,
    outdir: &Path,
    bc_len: usize,
) -> Result<BTreeMap<String, usize>> {
    fs::create_dir_all(outdir)
        .with_context(|| format!("Error creating output directory {}", outdir.display()))?;
    let mut reader = open_alignments(path)?;
    let header = bam::Header::from_template(reader.header());

    let mut writers: TxHashMap<Vec<u8>, bam::Writer> = TxHashMap::default();
    let mut counts = BTreeMap::new();
    let mut rec = Record::new();
    while let Some(result) = reader.read(&mut rec) {
        result.with_context(|| format!("Error reading alignments from {}", path.display()))?;
        let barcode = barcode_from_read_name(rec.qname(), bc_len)
            .with_context(|| path.display().to_string())?;

        if !writers.contains_key(barcode) {
            let name = String::from_utf8_lossy(barcode).into_owned();
            let out = outdir.join(format!("{name}.sam"));
            let writer = bam::Writer::from_path(&out, &header, bam::Format::Sam)
                .with_context(|| format!("Error creating {}", out.display()))?;
            writers.insert(barcode.to_vec(), writer);
        }
        if let Some(writer) = writers.get_mut(barcode) {
            writer.write(&rec).with_context(|| {
                format!("Error writing alignments of cell {}", String::from_utf8_lossy(barcode))
            })?;
        }
        *counts
            .entry(String::from_utf8_lossy(barcode).into_owned())
            .or_insert(0) += 1;
    }

    // htslib flushes and closes on drop without reporting failure, so read every file back.
    drop(writers);
    for (name, &expected) in &counts {
        check_written(&outdir.join(format!("{name}.sam")), expected)?;
    }

    log::info!(
        "Split {} alignments of {} into {} cells",
        counts.values().sum::<usize>(),
        path.display(),
        counts.len()
    );
    Ok(counts)
}

fn check_written(path: &Path, expected: usize) -> Result<()> {
    let mut reader = open_alignments(path)?;
    let mut written = 0;
    for rec in reader.records() {
        rec.with_context(|| format!("Error reading back {}", path.display()))?;
        written += 1;
    }
    ensure!(
        written == expected,
        "{} holds {written} alignments but {expected} were written",
        path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cs2_bam::bam::reader_target_names;

    const SAM: &str = "@HD\tVN:1.6\tSO:unsorted\n\
                       @SQ\tSN:chr1\tLN:2000\n\
                       BC-AAAAAA_UMI-ACGTAC\t0\tchr1\t11\t255\t4M\t*\t0\t0\tACGT\tFFFF\n\
                       BC-CCCCCC_UMI-ACGTAC\t0\tchr1\t21\t255\t4M\t*\t0\t0\tACGT\tFFFF\n\
                       BC-AAAAAA_UMI-TTTTTT\t16\tchr1\t31\t255\t4M\t*\t0\t0\tACGT\tFFFF\n";

    fn count_records(path: &Path) -> Result<usize> {
        let mut reader = open_alignments(path)?;
        assert_eq!(reader_target_names(&reader)?, ["chr1"]);
        let mut n = 0;
        for rec in reader.records() {
            let rec = rec?;
            assert!(rec.qname().starts_with(b"BC-"));
            n += 1;
        }
        Ok(n)
    }

    #[test]
    fn test_split() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let sam = dir.path().join("all.sam");
        fs::write(&sam, SAM)?;
        let out = dir.path().join("cells");

        let counts = split_alignments_by_barcode(&sam, &out, 6)?;
        assert_eq!(
            counts,
            BTreeMap::from([("AAAAAA".to_string(), 2), ("CCCCCC".to_string(), 1)])
        );
        assert_eq!(count_records(&out.join("AAAAAA.sam"))?, 2);
        assert_eq!(count_records(&out.join("CCCCCC.sam"))?, 1);
        Ok(())
    }

    #[test]
    fn test_incomplete_output_detected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let sam = dir.path().join("all.sam");
        fs::write(&sam, SAM)?;
        let out = dir.path().join("cells");
        split_alignments_by_barcode(&sam, &out, 6)?;

        let cell = out.join("AAAAAA.sam");
        check_written(&cell, 2)?;
        let msg = format!("{:#}", check_written(&cell, 3).unwrap_err());
        assert!(msg.contains("holds 2 alignments but 3 were written"), "{msg}");
        assert!(check_written(&out.join("GGGGGG.sam"), 0).is_err());
        Ok(())
    }

    #[test]
    fn test_output_dir_not_writable() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let sam = dir.path().join("all.sam");
        fs::write(&sam, SAM)?;
        let blocker = dir.path().join("cells");
        fs::write(&blocker, "")?;
        assert!(split_alignments_by_barcode(&sam, &blocker, 6).is_err());
        Ok(())
    }

    #[test]
    fn test_untagged_read_name() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let sam = dir.path().join("all.sam");
        fs::write(
            &sam,
            "@SQ\tSN:chr1\tLN:2000\nSRR1.1\t0\tchr1\t11\t255\t4M\t*\t0\t0\tACGT\tFFFF\n",
        )?;
        assert!(split_alignments_by_barcode(&sam, &dir.path().join("cells"), 6).is_err());
        Ok(())
    }
}
