//! Route CEL-Seq2 read pairs to per-cell FASTQ files by the cell barcode in read 1.
//!
//! Read 1 carries the UMI and the cell barcode at fixed offsets, read 2 carries the
//! transcript. A pair is kept when every base of the UMI and barcode windows reaches the
//! minimum quality and the barcode exactly matches a known sequence; read 2 is then written,
//! truncated and renamed `BC-<barcode>_UMI-<umi>`, to the file of its barcode.

use anyhow::{ensure, Context, Result};
use barcode::{BarcodeId, BarcodeIndex, CellTag};
use fastq_set::{
    write_fastq_record, Compression, PairingCheck, ReadPair, ReadPairIter, Record, TrimRecord,
};
use itertools::Itertools;
use metric::{CountMetric, Metric, SimpleHistogram, TxHashMap};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::ops::Range;
use std::path::Path;

const ILLUMINA_QUAL_OFFSET: u8 = 33;

pub const UNKNOWN_DIR: &str = "UNKNOWN";
pub const UNKNOWN_R1: &str = "UNKNOWNBC_R1.fq";
pub const UNKNOWN_R2: &str = "UNKNOWNBC_R2.fq";
pub const TAGGED_FASTQ: &str = "tagged.fastq";

/// Layout of read 1 and the filters applied to each read pair.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct DemuxParams {
    /// 0-based start of the UMI in read 1.
    pub umi_start: usize,
    pub umi_len: usize,
    /// 0-based start of the cell barcode in read 1.
    pub bc_start: usize,
    pub bc_len: usize,
    /// Read 2 is truncated to at most this many bases.
    pub cut_len: usize,
    /// Minimum Phred quality over every UMI and barcode base.
    pub min_bc_quality: u8,
    pub compression: Compression,
    /// Keep the untouched pairs with an unknown barcode under `UNKNOWN/`.
    pub save_unknown: bool,
    /// Write all matched reads to a single `tagged.fastq` instead of one file per barcode.
    pub tagging_only: bool,
    pub pairing: PairingCheck,
    /// Log progress every this many read pairs; zero disables it.
    pub progress_interval: usize,
}

impl Default for DemuxParams {
    fn default() -> Self {
        DemuxParams {
            umi_start: 0,
            umi_len: 6,
            bc_start: 6,
            bc_len: 6,
            cut_len: 35,
            min_bc_quality: 10,
            compression: Compression::Auto,
            save_unknown: false,
            tagging_only: false,
            pairing: PairingCheck::Positional,
            progress_interval: 1_000_000,
        }
    }
}

impl DemuxParams {
    pub fn umi_range(&self) -> Range<usize> {
        self.umi_start..self.umi_start + self.umi_len
    }

    pub fn bc_range(&self) -> Range<usize> {
        self.bc_start..self.bc_start + self.bc_len
    }

    /// Sorted positions of read 1 inside the UMI window, the barcode window, or both.
    pub fn required_positions(&self) -> Vec<usize> {
        let mut positions: Vec<usize> = self.umi_range().chain(self.bc_range()).collect();
        positions.sort_unstable();
        positions.dedup();
        positions
    }
}

/// File name of the reads of one barcode, e.g. `BC-1-AGACTC.fastq`.
pub fn barcode_fastq_name(id: BarcodeId, seq: &str) -> String {
    format!("BC-{id}-{seq}.fastq")
}

/// Read pair counts of one demultiplexing pass.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct DemuxMetrics {
    pub total: CountMetric,
    /// Pairs whose read 1 is long enough and whose UMI and barcode bases pass the quality filter.
    pub qualified: CountMetric,
    /// Qualified pairs whose barcode is not in the index.
    pub unknown: CountMetric,
    /// Qualified pairs written to a barcode output.
    pub saved: CountMetric,
    pub per_barcode: SimpleHistogram<BarcodeId>,
}

impl Metric for DemuxMetrics {
    fn merge(&mut self, other: Self) {
        self.total.merge(other.total);
        self.qualified.merge(other.qualified);
        self.unknown.merge(other.unknown);
        self.saved.merge(other.saved);
        self.per_barcode.merge(other.per_barcode);
    }
}

impl DemuxMetrics {
    pub fn unqualified(&self) -> CountMetric {
        self.total - self.qualified
    }

    /// Write the statistics CSV: one row per barcode of `index`, then the summary rows.
    pub fn write_report(&self, path: &Path, index: &BarcodeIndex) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("Error creating demultiplexing report {}", path.display()))?;
        self.write_report_to(BufWriter::new(file), index)
            .with_context(|| path.display().to_string())
    }

    pub fn write_report_to<W: Write>(&self, writer: W, index: &BarcodeIndex) -> Result<()> {
        let percent = |count: CountMetric| format!("{:07.3}", count.percent_of(self.total));

        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(["BC", "Reads(#)", "Reads(%)"])?;
        for (id, seq) in index.iter() {
            let count = CountMetric::from(self.per_barcode.get(&id));
            wtr.write_record([format!("{id:04}-{seq}"), count.to_string(), percent(count)])?;
        }
        for (name, count) in [
            ("saved", self.saved),
            ("unknown", self.unknown),
            ("qualified", self.qualified),
            ("unqualified", self.unqualified()),
            ("total", self.total),
        ] {
            wtr.write_record([name.to_string(), count.to_string(), percent(count)])?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn log_summary(&self, index: &BarcodeIndex) {
        log::info!(
            "Read pairs: {} total, {} qualified, {} unqualified, {} unknown barcode, {} saved",
            self.total,
            self.qualified,
            self.unqualified(),
            self.unknown,
            self.saved
        );
        let empty = index
            .iter()
            .filter(|(id, _)| self.per_barcode.get(id) == 0)
            .map(|(id, seq)| format!("{id}-{seq}"))
            .collect::<Vec<_>>();
        if !empty.is_empty() && self.total.count() > 0 {
            log::warn!(
                "{} barcodes received no reads: {}",
                empty.len(),
                empty.iter().join(", ")
            );
        }
    }
}

/// Where a read pair is routed, decided from read 1 alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    /// Read 1 is too short, or a UMI or barcode base is below the quality threshold.
    Unqualified,
    Unknown,
    Barcode(BarcodeId),
}

/// Destination of the reads routed by a `Demultiplexer`.
pub trait DemuxSink {
    /// Write read 2 of a pair matched to barcode `id`, renamed to `name`.
    fn write_tagged<R: Record>(&mut self, id: BarcodeId, name: &[u8], read: &R) -> Result<()>;

    /// Keep both untouched reads of a pair with an unknown barcode.
    fn write_unknown(&mut self, pair: &ReadPair) -> Result<()>;
}

/// Demultiplexes read pairs one at a time and counts the outcomes.
pub struct Demultiplexer<'a> {
    index: &'a BarcodeIndex,
    params: &'a DemuxParams,
    positions: Vec<usize>,
    min_r1_len: usize,
    metrics: DemuxMetrics,
    name: Vec<u8>,
}

impl<'a> Demultiplexer<'a> {
    pub fn new(index: &'a BarcodeIndex, params: &'a DemuxParams) -> Result<Self> {
        ensure!(params.bc_len > 0, "barcode length must be positive");
        ensure!(
            params.bc_len == index.barcode_len(),
            "barcode length {} does not match the {}-base sequences of the barcode index",
            params.bc_len,
            index.barcode_len()
        );
        let positions = params.required_positions();
        // An empty window contributes no positions but its start still has to lie within read 1.
        let min_r1_len = params.umi_range().end.max(params.bc_range().end);
        Ok(Demultiplexer {
            index,
            params,
            positions,
            min_r1_len,
            metrics: DemuxMetrics::default(),
            name: Vec::new(),
        })
    }

    pub fn route<R: Record>(&self, r1: &R) -> Route {
        let (seq, qual) = (r1.seq(), r1.qual());
        if seq.len() < self.min_r1_len || qual.len() < self.min_r1_len {
            return Route::Unqualified;
        }
        // One threshold over the union of both windows, not one per window.
        let min_qual = self
            .positions
            .iter()
            .map(|&p| qual[p].saturating_sub(ILLUMINA_QUAL_OFFSET))
            .min();
        if min_qual.map_or(false, |q| q < self.params.min_bc_quality) {
            return Route::Unqualified;
        }
        match self.index.lookup(&seq[self.params.bc_range()]) {
            Some(id) => Route::Barcode(id),
            None => Route::Unknown,
        }
    }

    /// Route one pair, write it to `sink` and count it.
    pub fn process<S: DemuxSink>(&mut self, pair: &ReadPair, sink: &mut S) -> Result<Route> {
        self.metrics.total.increment();
        let route = self.route(&pair.r1);
        match route {
            Route::Unqualified => {}
            Route::Unknown => {
                self.metrics.qualified.increment();
                self.metrics.unknown.increment();
                if self.params.save_unknown {
                    sink.write_unknown(pair)?;
                }
            }
            Route::Barcode(id) => {
                self.metrics.qualified.increment();
                let seq = pair.r1.seq();
                self.name.clear();
                CellTag::new(&seq[self.params.bc_range()], &seq[self.params.umi_range()])
                    .write_read_name(&mut self.name);
                sink.write_tagged(id, &self.name, &TrimRecord::new(&pair.r2, self.params.cut_len))?;
                self.metrics.per_barcode.observe(id);
                self.metrics.saved.increment();
            }
        }

        let total = self.metrics.total.count();
        let interval = self.params.progress_interval as i64;
        if interval > 0 && total % interval == 0 {
            log::info!("Processed {total} read pairs");
        }
        Ok(route)
    }

    pub fn metrics(&self) -> &DemuxMetrics {
        &self.metrics
    }

    pub fn finish(self) -> DemuxMetrics {
        self.metrics
    }
}

enum TaggedOutput {
    PerBarcode(TxHashMap<BarcodeId, BufWriter<File>>),
    Single(BufWriter<File>),
}

/// The FASTQ files written by a demultiplexing pass into one output directory.
pub struct DemuxOutputs {
    tagged: TaggedOutput,
    unknown: Option<[BufWriter<File>; 2]>,
}

fn create_fastq(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path)
        .with_context(|| format!("Error creating FASTQ file {}", path.display()))?;
    Ok(BufWriter::new(file))
}

impl DemuxOutputs {
    /// Create the output files of every barcode of `index`, or the single tagged file, and the
    /// unknown-barcode files if they are kept.
    pub fn create(outdir: &Path, index: &BarcodeIndex, params: &DemuxParams) -> Result<Self> {
        fs::create_dir_all(outdir)
            .with_context(|| format!("Error creating output directory {}", outdir.display()))?;

        let tagged = if params.tagging_only {
            TaggedOutput::Single(create_fastq(&outdir.join(TAGGED_FASTQ))?)
        } else {
            TaggedOutput::PerBarcode(
                index
                    .iter()
                    .map(|(id, seq)| {
                        Ok((id, create_fastq(&outdir.join(barcode_fastq_name(id, seq)))?))
                    })
                    .collect::<Result<_>>()?,
            )
        };

        let unknown = if params.save_unknown {
            let dir = outdir.join(UNKNOWN_DIR);
            fs::create_dir_all(&dir)
                .with_context(|| format!("Error creating directory {}", dir.display()))?;
            Some([
                create_fastq(&dir.join(UNKNOWN_R1))?,
                create_fastq(&dir.join(UNKNOWN_R2))?,
            ])
        } else {
            None
        };
        Ok(DemuxOutputs { tagged, unknown })
    }

    /// Flush and close every file.
    pub fn finish(self) -> Result<()> {
        match self.tagged {
            TaggedOutput::PerBarcode(writers) => {
                for (_, mut writer) in writers {
                    writer.flush()?;
                }
            }
            TaggedOutput::Single(mut writer) => writer.flush()?,
        }
        if let Some(writers) = self.unknown {
            for mut writer in writers {
                writer.flush()?;
            }
        }
        Ok(())
    }
}

impl DemuxSink for DemuxOutputs {
    fn write_tagged<R: Record>(&mut self, id: BarcodeId, name: &[u8], read: &R) -> Result<()> {
        let writer = match &mut self.tagged {
            TaggedOutput::PerBarcode(writers) => writers
                .get_mut(&id)
                .with_context(|| format!("no output file for barcode {id}"))?,
            TaggedOutput::Single(writer) => writer,
        };
        write_fastq_record(writer, name, read.seq(), read.qual())?;
        Ok(())
    }

    fn write_unknown(&mut self, pair: &ReadPair) -> Result<()> {
        if let Some([r1, r2]) = &mut self.unknown {
            write_fastq_record(r1, pair.r1.head(), pair.r1.seq(), pair.r1.qual())?;
            write_fastq_record(r2, pair.r2.head(), pair.r2.seq(), pair.r2.qual())?;
        }
        Ok(())
    }
}

/// Demultiplex the read pairs of `r1` and `r2` into `outdir`.
pub fn demultiplex(
    r1: &Path,
    r2: &Path,
    outdir: &Path,
    index: &BarcodeIndex,
    params: &DemuxParams,
) -> Result<DemuxMetrics> {
    log::info!(
        "Demultiplexing {} and {} into {} barcodes",
        r1.display(),
        r2.display(),
        index.len()
    );
    let mut demux = Demultiplexer::new(index, params)?;
    let pairs = ReadPairIter::new(r1, r2, params.compression, params.pairing)?;
    let mut outputs = DemuxOutputs::create(outdir, index, params)?;
    for pair in pairs {
        demux.process(&pair?, &mut outputs)?;
    }
    outputs.finish()?;

    let metrics = demux.finish();
    metrics.log_summary(index);
    Ok(metrics)
}
