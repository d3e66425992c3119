//! celseq2
#![deny(missing_docs)]

use anyhow::{Context, Result};
use barcode::{parse_id_ranges, BarcodeIndex, DEFAULT_IDS_USED};
use clap::{Parser, Subcommand};
use cs2_lib::demultiplex::demultiplex;
use cs2_lib::logging::init_log;
use cs2_lib::{split_alignments_by_barcode, Parameters, UmiMatrix};
use fastq_set::{Compression, PairingCheck};
use metric::{Metric, SerdeFormat};
use std::path::{Path, PathBuf};
use transcriptome::AnnotationModel;
use umi::{count_umis_from_path, CellUmiCounts, Strandedness};

/// CEL-Seq2 single-cell RNA-seq processing: demultiplexing, UMI counting and count matrices.
#[derive(Parser, Debug)]
#[clap(name = "celseq2", version)]
struct CelSeq2 {
    #[clap(subcommand)]
    subcmd: SubCommand,

    /// TOML file overriding the default parameters of each pass.
    #[clap(long, global = true)]
    params: Option<PathBuf>,

    /// Log debug messages.
    #[clap(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum SubCommand {
    /// Split paired FASTQ files into one FASTQ per cell barcode.
    #[clap(name = "demux")]
    Demux(Demux),

    /// Build the gene annotation model from a GTF/GFF3 file.
    #[clap(name = "annotate")]
    Annotate(Annotate),

    /// Count distinct UMIs per gene in the alignments of one cell.
    #[clap(name = "count")]
    Count(Count),

    /// Assemble per-cell UMI counts into a gene-by-cell matrix.
    #[clap(name = "matrix")]
    Matrix(Matrix),

    /// Split an alignment file of tagged reads into one SAM file per cell barcode.
    #[clap(name = "split")]
    Split(Split),
}

#[derive(clap::Args, Debug)]
struct Demux {
    /// Read 1 FASTQ, carrying the UMI and cell barcode.
    #[clap(long)]
    r1: PathBuf,
    /// Read 2 FASTQ, carrying the transcript.
    #[clap(long)]
    r2: PathBuf,
    /// Barcode index file, one barcode per row.
    #[clap(long)]
    bc_index: PathBuf,
    /// Column of the index file holding the barcode sequence.
    #[clap(long, default_value_t = 0)]
    bc_seq_column: usize,
    /// Skip the first non-comment row of the index file.
    #[clap(long)]
    bc_index_header: bool,
    /// Barcode IDs used in this run, e.g. "1-8,12".
    #[clap(long, default_value = DEFAULT_IDS_USED)]
    bc_index_used: String,
    /// Output directory of the per-barcode FASTQ files.
    #[clap(long)]
    out_dir: PathBuf,
    /// Demultiplexing statistics CSV. Defaults to demultiplexing.csv in the output directory.
    #[clap(long)]
    stats_file: Option<PathBuf>,
    /// Also write the statistics as JSON.
    #[clap(long)]
    metrics_json: Option<PathBuf>,

    #[clap(long)]
    umi_start: Option<usize>,
    #[clap(long)]
    umi_len: Option<usize>,
    #[clap(long)]
    bc_start: Option<usize>,
    #[clap(long)]
    bc_len: Option<usize>,
    /// Truncate read 2 to this many bases.
    #[clap(long)]
    cut_len: Option<usize>,
    /// Minimum Phred quality of every UMI and barcode base.
    #[clap(long)]
    min_bc_quality: Option<u8>,
    /// auto, gzip or plain.
    #[clap(long)]
    compression: Option<Compression>,
    /// positional or verify_names.
    #[clap(long)]
    pairing: Option<PairingCheck>,
    /// Keep pairs with an unknown barcode under UNKNOWN/.
    #[clap(long)]
    save_unknown: bool,
    /// Write every matched read to a single tagged.fastq.
    #[clap(long)]
    tagging_only: bool,
}

#[derive(clap::Args, Debug)]
struct Annotate {
    /// GTF or GFF3 file, optionally gzipped.
    #[clap(long)]
    gtf: PathBuf,
    /// Output annotation model.
    #[clap(long)]
    out: PathBuf,
    /// Feature type to index.
    #[clap(long)]
    feature_type: Option<String>,
    /// Attribute holding the gene identifier.
    #[clap(long)]
    gene_attribute: Option<String>,
    /// Ignore feature strand.
    #[clap(long)]
    unstranded: bool,
}

#[derive(clap::Args, Debug)]
struct Count {
    /// Annotation model written by `annotate`.
    #[clap(long)]
    model: PathBuf,
    /// SAM or BAM file of one cell.
    #[clap(long)]
    alignments: PathBuf,
    /// Output counts, as JSON if the name ends in .json, otherwise binary.
    #[clap(long)]
    out: PathBuf,
    #[clap(long)]
    umi_len: Option<usize>,
    #[clap(long)]
    min_mapq: Option<u8>,
    /// forward or reverse.
    #[clap(long)]
    strandedness: Option<Strandedness>,
    /// Look up the whole alignment span instead of each aligned block.
    #[clap(long)]
    ungapped: bool,
}

#[derive(clap::Args, Debug)]
struct Matrix {
    /// Per-cell count files written by `count`. The file stem names the cell.
    #[clap(required = true)]
    counts: Vec<PathBuf>,
    /// Include every gene of this annotation model as a row.
    #[clap(long)]
    model: Option<PathBuf>,
    /// Output matrix.
    #[clap(long)]
    out: PathBuf,
    /// Write tab-separated values instead of CSV.
    #[clap(long)]
    tsv: bool,
}

#[derive(clap::Args, Debug)]
struct Split {
    /// SAM or BAM file of reads named BC-<barcode>_UMI-<umi>.
    #[clap(long)]
    alignments: PathBuf,
    #[clap(long)]
    out_dir: PathBuf,
    /// Barcode length. Defaults to the demultiplexing barcode length.
    #[clap(long)]
    bc_len: Option<usize>,
}

fn run_demux(args: Demux, params: Parameters) -> Result<()> {
    let mut demux = params.demux;
    macro_rules! set_if_some {
        ($($field:ident),*) => {
            $(if let Some(v) = args.$field {
                demux.$field = v;
            })*
        };
    }
    set_if_some!(umi_start, umi_len, bc_start, bc_len, cut_len, min_bc_quality, compression, pairing);
    demux.save_unknown |= args.save_unknown;
    demux.tagging_only |= args.tagging_only;

    let ids = parse_id_ranges(&args.bc_index_used)?;
    let index = BarcodeIndex::from_path(&args.bc_index, args.bc_seq_column, args.bc_index_header)?
        .select(&ids)?;
    let metrics = demultiplex(&args.r1, &args.r2, &args.out_dir, &index, &demux)?;

    let stats_file = args
        .stats_file
        .unwrap_or_else(|| args.out_dir.join("demultiplexing.csv"));
    metrics.write_report(&stats_file, &index)?;
    if let Some(path) = args.metrics_json {
        metrics.to_file(&path, SerdeFormat::Json)?;
    }
    Ok(())
}

fn run_annotate(args: Annotate, params: Parameters) -> Result<()> {
    let mut annotation = params.annotation;
    if let Some(feature_type) = args.feature_type {
        annotation.feature_type = feature_type;
    }
    if let Some(gene_attribute) = args.gene_attribute {
        annotation.gene_attribute = gene_attribute;
    }
    if args.unstranded {
        annotation.stranded = false;
    }
    let model = AnnotationModel::from_gtf_path(&args.gtf, &annotation)?;
    model.write(&args.out)?;
    log::info!("Wrote annotation model to {}", args.out.display());
    Ok(())
}

fn run_count(args: Count, params: Parameters) -> Result<()> {
    let mut count = params.count;
    if let Some(umi_len) = args.umi_len {
        count.umi_len = umi_len;
    }
    if let Some(min_mapq) = args.min_mapq {
        count.min_mapq = min_mapq;
    }
    if let Some(strandedness) = args.strandedness {
        count.strandedness = strandedness;
    }
    if args.ungapped {
        count.gapped_aligner = false;
    }
    let model = AnnotationModel::read(&args.model)?;
    let counts = count_umis_from_path(&args.alignments, &model, &count)?;
    counts.write(&args.out)
}

fn cell_name(path: &Path) -> Result<String> {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .with_context(|| format!("no cell name in {}", path.display()))
}

fn run_matrix(args: Matrix) -> Result<()> {
    let mut matrix = match &args.model {
        Some(path) => UmiMatrix::new(AnnotationModel::read(path)?.gene_ids().iter().cloned()),
        None => UmiMatrix::default(),
    };
    for path in &args.counts {
        let counts = CellUmiCounts::read(path)?;
        matrix.add_cell(&cell_name(path)?, &counts.counts)?;
    }
    let delimiter = if args.tsv { b'\t' } else { b',' };
    matrix.write_csv(&args.out, delimiter)
}

fn run_split(args: Split, params: Parameters) -> Result<()> {
    let bc_len = args.bc_len.unwrap_or(params.demux.bc_len);
    split_alignments_by_barcode(&args.alignments, &args.out_dir, bc_len)?;
    Ok(())
}

fn main() -> Result<()> {
    let args = CelSeq2::parse();
    init_log(args.verbose);
    let params = Parameters::load(args.params.as_deref())?;

    match args.subcmd {
        SubCommand::Demux(demux) => run_demux(demux, params),
        SubCommand::Annotate(annotate) => run_annotate(annotate, params),
        SubCommand::Count(count) => run_count(count, params),
        SubCommand::Matrix(matrix) => run_matrix(matrix),
        SubCommand::Split(split) => run_split(split, params),
    }
}
