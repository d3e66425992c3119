use crate::{UmiCountMetrics, UmiCountParams};
use anyhow::{Context, Result};
use barcode::umi_from_read_name;
use cs2_bam::bam::{open_alignments, reader_target_names};
use cs2_bam::{matched_segments, num_hits};
use metric::{read_serde, write_serde, SerdeFormat, TxHashMap};
use rust_htslib::bam::{Read, Record};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::str;
use transcriptome::{AnnotationModel, GeneIdx, Strand};

/// How a single alignment was accounted for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlignmentOutcome {
    Unmapped,
    /// The `NH` field reports more than one locus.
    Multimapped,
    LowQuality,
    /// No gene, or a reference sequence the annotation does not cover.
    NoFeature,
    /// More than one gene across all matched segments.
    Ambiguous,
    /// Exactly one gene; its UMI set received the read's UMI.
    Counted(GeneIdx),
}

/// Distinct UMIs per gene of one cell.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct CellUmiCounts {
    /// Gene identifier to number of distinct UMIs. Genes without UMIs are absent.
    pub counts: BTreeMap<String, usize>,
    pub umi_sets: BTreeMap<String, BTreeSet<String>>,
    pub metrics: UmiCountMetrics,
}

impl CellUmiCounts {
    /// Write as JSON if the path ends in `.json`, otherwise as bincode.
    pub fn write(&self, path: &Path) -> Result<()> {
        write_serde(self, path, SerdeFormat::from_path(path))
    }

    pub fn read(path: &Path) -> Result<Self> {
        read_serde(path, SerdeFormat::from_path(path))
            .with_context(|| format!("reading UMI counts {}", path.display()))
    }

    pub fn count(&self, gene: &str) -> usize {
        self.counts.get(gene).copied().unwrap_or(0)
    }
}

/// Accumulates the UMIs of one cell's alignment stream under the union model: an alignment
/// is credited to a gene only if that gene is the single gene hit by any of its segments.
pub struct UmiCounter<'a> {
    model: &'a AnnotationModel,
    params: &'a UmiCountParams,
    umi_sets: TxHashMap<GeneIdx, BTreeSet<String>>,
    metrics: UmiCountMetrics,
    genes: BTreeSet<GeneIdx>,
}

impl<'a> UmiCounter<'a> {
    pub fn new(model: &'a AnnotationModel, params: &'a UmiCountParams) -> Self {
        UmiCounter {
            model,
            params,
            umi_sets: TxHashMap::default(),
            metrics: UmiCountMetrics::default(),
            genes: BTreeSet::new(),
        }
    }

    /// Classify one alignment and record its UMI if it resolves to a single gene.
    /// `chrom` is the name of the reference sequence the read is placed on.
    /// Fails only if a counted read's name does not carry a UMI.
    pub fn observe(&mut self, read: &Record, chrom: Option<&str>) -> Result<AlignmentOutcome> {
        let outcome = self.classify(read, chrom);
        if let AlignmentOutcome::Counted(gene) = outcome {
            let umi = umi_from_read_name(read.qname(), self.params.umi_len)?;
            let umi = str::from_utf8(umi)
                .with_context(|| format!("non-ASCII UMI in read {}", qname(read)))?;
            self.umi_sets
                .entry(gene)
                .or_default()
                .insert(umi.to_string());
        }
        self.metrics.observe(&outcome);
        Ok(outcome)
    }

    fn classify(&mut self, read: &Record, chrom: Option<&str>) -> AlignmentOutcome {
        if read.is_unmapped() {
            return AlignmentOutcome::Unmapped;
        }
        // An absent NH field means a single reported locus.
        if num_hits(read).map_or(false, |nh| nh > 1) {
            return AlignmentOutcome::Multimapped;
        }
        if read.mapq() < self.params.min_mapq {
            return AlignmentOutcome::LowQuality;
        }
        let chrom = match chrom {
            Some(chrom) if self.model.has_chrom(chrom) => chrom,
            _ => return AlignmentOutcome::NoFeature,
        };

        let read_strand = if read.is_reverse() {
            Strand::Reverse
        } else {
            Strand::Forward
        };
        let strand = self.params.strandedness.query_strand(read_strand);

        self.genes.clear();
        for seg in matched_segments(read, self.params.gapped_aligner) {
            self.model
                .genes_overlapping(chrom, strand, seg.start, seg.end, &mut self.genes);
        }
        let mut genes = self.genes.iter();
        match (genes.next(), genes.next()) {
            (None, _) => AlignmentOutcome::NoFeature,
            (Some(&gene), None) => AlignmentOutcome::Counted(gene),
            (Some(_), Some(_)) => AlignmentOutcome::Ambiguous,
        }
    }

    pub fn metrics(&self) -> &UmiCountMetrics {
        &self.metrics
    }

    /// End the pass, collapsing each gene's UMI set to its size.
    pub fn finish(self) -> CellUmiCounts {
        let model = self.model;
        let umi_sets: BTreeMap<String, BTreeSet<String>> = self
            .umi_sets
            .into_iter()
            .map(|(gene, umis)| (model.gene_id(gene).to_string(), umis))
            .collect();
        let counts = umi_sets
            .iter()
            .map(|(gene, umis)| (gene.clone(), umis.len()))
            .collect();
        CellUmiCounts {
            counts,
            umi_sets,
            metrics: self.metrics,
        }
    }
}

fn qname(read: &Record) -> String {
    String::from_utf8_lossy(read.qname()).into_owned()
}

/// Count the UMIs of one cell's SAM or BAM file.
pub fn count_umis_from_path(
    path: &Path,
    model: &AnnotationModel,
    params: &UmiCountParams,
) -> Result<CellUmiCounts> {
    log::info!("Counting UMIs in {}", path.display());
    let mut reader = open_alignments(path)?;
    let chroms = reader_target_names(&reader)?;
    let mut counter = UmiCounter::new(model, params);

    let mut read = Record::new();
    while let Some(result) = reader.read(&mut read) {
        result.with_context(|| format!("Error reading alignments from {}", path.display()))?;
        let chrom = usize::try_from(read.tid())
            .ok()
            .and_then(|tid| chroms.get(tid))
            .map(String::as_str);
        counter
            .observe(&read, chrom)
            .with_context(|| path.display().to_string())?;
    }

    let counts = counter.finish();
    counts.metrics.log_summary();
    log::info!(
        "{} genes with {} distinct UMIs in {}",
        counts.counts.len(),
        counts.counts.values().sum::<usize>(),
        path.display()
    );
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Strandedness;
    use metric::Metric;
    use rust_htslib::bam::record::{Aux, Cigar, CigarString};
    use std::fs;
    use transcriptome::AnnotationParams;

    const GTF: &str = "\
chr1\ttest\texon\t101\t200\t.\t+\t.\tgene_id \"g1\"; transcript_id \"t1\";
chr1\ttest\texon\t181\t260\t.\t+\t.\tgene_id \"g2\"; transcript_id \"t2\";
chr1\ttest\texon\t501\t600\t.\t+\t.\tgene_id \"g3\"; transcript_id \"t3\";
chr1\ttest\texon\t501\t600\t.\t-\t.\tgene_id \"g4\"; transcript_id \"t4\";
chr1\ttest\texon\t801\t900\t.\t+\t.\tgene_id \"g5\"; transcript_id \"t5\";
chr1\ttest\texon\t951\t1000\t.\t+\t.\tgene_id \"g5\"; transcript_id \"t5\";
";

    fn model() -> AnnotationModel {
        AnnotationModel::from_reader(GTF.as_bytes(), &AnnotationParams::default()).unwrap()
    }

    struct TestRead<'a> {
        umi: &'a str,
        pos: i64,
        cigar: Vec<Cigar>,
        reverse: bool,
        mapq: u8,
        nh: Option<u8>,
    }

    impl Default for TestRead<'_> {
        fn default() -> Self {
            TestRead {
                umi: "CCCCCC",
                pos: 0,
                cigar: vec![Cigar::Match(30)],
                reverse: false,
                mapq: 255,
                nh: Some(1),
            }
        }
    }

    impl TestRead<'_> {
        fn record(self) -> Record {
            let name = format!("BC-AAAAAA_UMI-{}", self.umi);
            let cigar = CigarString(self.cigar);
            let len: usize = cigar
                .0
                .iter()
                .map(|c| match *c {
                    Cigar::Match(l) | Cigar::Ins(l) | Cigar::SoftClip(l) => l as usize,
                    _ => 0,
                })
                .sum();
            let mut rec = Record::new();
            rec.set(name.as_bytes(), Some(&cigar), &vec![b'A'; len], &vec![30u8; len]);
            rec.unset_flags();
            if self.reverse {
                rec.set_reverse();
            }
            rec.set_tid(0);
            rec.set_pos(self.pos);
            rec.set_mapq(self.mapq);
            if let Some(nh) = self.nh {
                rec.push_aux(b"NH", Aux::U8(nh)).unwrap();
            }
            rec
        }
    }

    fn spliced(first: u32, intron: u32, second: u32) -> Vec<Cigar> {
        vec![
            Cigar::Match(first),
            Cigar::RefSkip(intron),
            Cigar::Match(second),
        ]
    }

    fn gene(model: &AnnotationModel, outcome: AlignmentOutcome) -> Option<&str> {
        match outcome {
            AlignmentOutcome::Counted(g) => Some(model.gene_id(g)),
            _ => None,
        }
    }

    #[test]
    fn test_segments_union_is_ambiguous() {
        let model = model();
        let params = UmiCountParams::default();
        let mut counter = UmiCounter::new(&model, &params);

        // first block hits g1 only, second block hits g1 and g2
        let read = TestRead {
            pos: 100,
            cigar: spliced(20, 60, 20),
            ..TestRead::default()
        };
        let outcome = counter.observe(&read.record(), Some("chr1")).unwrap();
        assert_eq!(outcome, AlignmentOutcome::Ambiguous);

        let counts = counter.finish();
        assert!(counts.counts.is_empty());
        assert_eq!(counts.metrics.ambiguous.count(), 1);
    }

    #[test]
    fn test_unique_gene_is_counted() {
        let model = model();
        let params = UmiCountParams::default();
        let mut counter = UmiCounter::new(&model, &params);

        let read = TestRead {
            pos: 510,
            umi: "GATTAC",
            ..TestRead::default()
        };
        let outcome = counter.observe(&read.record(), Some("chr1")).unwrap();
        assert_eq!(gene(&model, outcome), Some("g3"));

        let counts = counter.finish();
        assert_eq!(counts.count("g3"), 1);
        assert_eq!(counts.umi_sets["g3"], BTreeSet::from(["GATTAC".to_string()]));
        assert_eq!(counts.metrics.uniquely_mapped.count(), 1);
    }

    #[test]
    fn test_spliced_exons_of_one_gene() {
        let model = model();
        let params = UmiCountParams::default();
        let mut counter = UmiCounter::new(&model, &params);
        let read = TestRead {
            pos: 880,
            cigar: spliced(20, 60, 20),
            ..TestRead::default()
        };
        let outcome = counter.observe(&read.record(), Some("chr1")).unwrap();
        assert_eq!(gene(&model, outcome), Some("g5"));
    }

    #[test]
    fn test_duplicate_umis_collapse() {
        let model = model();
        let params = UmiCountParams::default();
        let mut counter = UmiCounter::new(&model, &params);
        for (pos, umi) in [(510, "AAACCC"), (530, "AAACCC"), (520, "GGGTTT"), (550, "AAACCC")] {
            let read = TestRead {
                pos,
                umi,
                ..TestRead::default()
            };
            counter.observe(&read.record(), Some("chr1")).unwrap();
        }
        let counts = counter.finish();
        assert_eq!(counts.metrics.uniquely_mapped.count(), 4);
        assert_eq!(counts.count("g3"), 2);
        assert_eq!(counts.count("g1"), 0);
    }

    #[test]
    fn test_strandedness() {
        let model = model();

        let forward = UmiCountParams::default();
        let mut counter = UmiCounter::new(&model, &forward);
        let read = TestRead {
            pos: 510,
            reverse: true,
            ..TestRead::default()
        };
        let outcome = counter.observe(&read.record(), Some("chr1")).unwrap();
        assert_eq!(gene(&model, outcome), Some("g4"));

        let reverse = UmiCountParams {
            strandedness: Strandedness::Reverse,
            ..UmiCountParams::default()
        };
        let mut counter = UmiCounter::new(&model, &reverse);
        let read = TestRead {
            pos: 510,
            ..TestRead::default()
        };
        let outcome = counter.observe(&read.record(), Some("chr1")).unwrap();
        assert_eq!(gene(&model, outcome), Some("g4"));

        // g1 has no antisense feature
        let read = TestRead {
            pos: 110,
            ..TestRead::default()
        };
        let outcome = counter.observe(&read.record(), Some("chr1")).unwrap();
        assert_eq!(outcome, AlignmentOutcome::NoFeature);
    }

    #[test]
    fn test_ungapped_uses_whole_span() {
        let model = model();
        let read = || TestRead {
            pos: 150,
            cigar: spliced(10, 100, 10),
            ..TestRead::default()
        };

        let gapped = UmiCountParams::default();
        let mut counter = UmiCounter::new(&model, &gapped);
        let outcome = counter.observe(&read().record(), Some("chr1")).unwrap();
        assert_eq!(gene(&model, outcome), Some("g1"));

        let ungapped = UmiCountParams {
            gapped_aligner: false,
            ..UmiCountParams::default()
        };
        let mut counter = UmiCounter::new(&model, &ungapped);
        let outcome = counter.observe(&read().record(), Some("chr1")).unwrap();
        assert_eq!(outcome, AlignmentOutcome::Ambiguous);
    }

    #[test]
    fn test_check_order() {
        let model = model();
        let params = UmiCountParams::default();
        let mut counter = UmiCounter::new(&model, &params);

        let mut unmapped = TestRead {
            pos: 510,
            mapq: 0,
            nh: Some(3),
            ..TestRead::default()
        }
        .record();
        unmapped.set_unmapped();
        assert_eq!(
            counter.observe(&unmapped, Some("chr1")).unwrap(),
            AlignmentOutcome::Unmapped
        );

        // multimapped wins over low quality
        let multi = TestRead {
            pos: 510,
            mapq: 0,
            nh: Some(3),
            ..TestRead::default()
        };
        assert_eq!(
            counter.observe(&multi.record(), Some("chr1")).unwrap(),
            AlignmentOutcome::Multimapped
        );

        let low = TestRead {
            pos: 510,
            mapq: 9,
            nh: None,
            ..TestRead::default()
        };
        assert_eq!(
            counter.observe(&low.record(), Some("chr1")).unwrap(),
            AlignmentOutcome::LowQuality
        );

        // no NH field counts as a single locus
        let no_nh = TestRead {
            pos: 510,
            nh: None,
            ..TestRead::default()
        };
        assert_eq!(
            gene(&model, counter.observe(&no_nh.record(), Some("chr1")).unwrap()),
            Some("g3")
        );

        let other_chrom = TestRead {
            pos: 510,
            ..TestRead::default()
        };
        assert_eq!(
            counter.observe(&other_chrom.record(), Some("chr2")).unwrap(),
            AlignmentOutcome::NoFeature
        );
        assert_eq!(
            counter
                .observe(&TestRead::default().record(), None)
                .unwrap(),
            AlignmentOutcome::NoFeature
        );

        let intergenic = TestRead {
            pos: 300,
            ..TestRead::default()
        };
        assert_eq!(
            counter.observe(&intergenic.record(), Some("chr1")).unwrap(),
            AlignmentOutcome::NoFeature
        );

        let metrics = counter.metrics();
        assert_eq!(metrics.total.count(), 7);
        assert_eq!(metrics.unmapped.count(), 1);
        assert_eq!(metrics.multimapped.count(), 1);
        assert_eq!(metrics.low_quality.count(), 1);
        assert_eq!(metrics.no_feature.count(), 3);
        assert_eq!(metrics.uniquely_mapped.count(), 1);
        assert_eq!(metrics.categorized(), metrics.total);
    }

    #[test]
    fn test_malformed_read_name() {
        let model = model();
        let params = UmiCountParams::default();
        let mut counter = UmiCounter::new(&model, &params);
        let mut read = TestRead {
            pos: 510,
            ..TestRead::default()
        }
        .record();
        read.set_qname(b"SRR000001.1");
        assert!(counter.observe(&read, Some("chr1")).is_err());
    }

    #[test]
    fn test_count_umis_from_sam() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let sam = dir.path().join("AAAAAA.sam");
        fs::write(
            &sam,
            "@HD\tVN:1.6\tSO:unsorted\n\
             @SQ\tSN:chr1\tLN:2000\n\
             @SQ\tSN:chr2\tLN:2000\n\
             BC-AAAAAA_UMI-ACGTAC\t0\tchr1\t511\t255\t30M\t*\t0\t0\t*\t*\tNH:i:1\n\
             BC-AAAAAA_UMI-ACGTAC\t0\tchr1\t521\t255\t30M\t*\t0\t0\t*\t*\tNH:i:1\n\
             BC-AAAAAA_UMI-TTTTTT\t0\tchr1\t521\t255\t30M\t*\t0\t0\t*\t*\tNH:i:1\n\
             BC-AAAAAA_UMI-GGGGGG\t16\tchr1\t521\t255\t30M\t*\t0\t0\t*\t*\tNH:i:1\n\
             BC-AAAAAA_UMI-CCCCCC\t0\tchr1\t521\t255\t30M\t*\t0\t0\t*\t*\tNH:i:2\n\
             BC-AAAAAA_UMI-CCCCCC\t0\tchr2\t521\t255\t30M\t*\t0\t0\t*\t*\tNH:i:1\n\
             BC-AAAAAA_UMI-AAAAAA\t4\t*\t0\t0\t*\t*\t0\t0\t*\t*\n",
        )?;

        let model = model();
        let counts = count_umis_from_path(&sam, &model, &UmiCountParams::default())?;
        assert_eq!(counts.count("g3"), 2);
        assert_eq!(counts.count("g4"), 1);
        assert_eq!(counts.metrics.total.count(), 7);
        assert_eq!(counts.metrics.multimapped.count(), 1);
        assert_eq!(counts.metrics.unmapped.count(), 1);
        assert_eq!(counts.metrics.no_feature.count(), 1);

        let json = dir.path().join("counts.json");
        counts.write(&json)?;
        assert_eq!(CellUmiCounts::read(&json)?, counts);
        let bin = dir.path().join("counts.bincode");
        counts.write(&bin)?;
        assert_eq!(CellUmiCounts::read(&bin)?, counts);
        Ok(())
    }

    #[test]
    fn test_merge_metrics_across_cells() {
        let model = model();
        let params = UmiCountParams::default();
        let per_cell = ["AAACCC", "GGGTTT"].map(|umi| {
            let mut counter = UmiCounter::new(&model, &params);
            let read = TestRead {
                pos: 510,
                umi,
                ..TestRead::default()
            };
            counter.observe(&read.record(), Some("chr1")).unwrap();
            counter.finish().metrics
        });
        let merged = UmiCountMetrics::from_chunks(per_cell);
        assert_eq!(merged.uniquely_mapped.count(), 2);
    }
}
