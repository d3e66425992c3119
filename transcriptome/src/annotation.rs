use crate::parse_gtf::{parse_gtf_line, validate_gtf_line};
use crate::{AnnotationParams, Strand};
use anyhow::{bail, Context, Result};
use flate2::read::MultiGzDecoder;
use metric::{read_serde, write_serde, SerdeFormat, TxHashMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str;
use superslice::Ext;

const PROGRESS_INTERVAL: usize = 100_000;

/// Index of a gene in `AnnotationModel::gene_ids()`.
pub type GeneIdx = u32;

/// A feature span, 0-based half-open.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Feature {
    start: u64,
    end: u64,
    gene: GeneIdx,
}

/// Features of one chromosome strand, sorted by start.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
struct IntervalIndex {
    features: Vec<Feature>,
    /// Largest end among `features[..=i]`.
    max_end: Vec<u64>,
}

impl IntervalIndex {
    fn new(mut features: Vec<Feature>) -> IntervalIndex {
        features.sort_unstable();
        features.dedup();
        let max_end = features
            .iter()
            .scan(0, |max_end, f| {
                *max_end = f.end.max(*max_end);
                Some(*max_end)
            })
            .collect();
        IntervalIndex { features, max_end }
    }

    /// Genes of every feature overlapping `[start, end)`.
    fn overlapping(&self, start: u64, end: u64) -> impl Iterator<Item = GeneIdx> + '_ {
        // features that start before the query ends
        let n = if start < end {
            self.features.lower_bound_by_key(&end, |f| f.start)
        } else {
            0
        };
        // walk back while some earlier feature still ends after the query start
        (0..n)
            .rev()
            .take_while(move |&i| self.max_end[i] > start)
            .filter(move |&i| self.features[i].end > start)
            .map(move |i| self.features[i].gene)
    }
}

/// Genomic interval index mapping (chromosome, strand, interval) to the set of genes
/// with a feature overlapping it.
///
/// Built once from an annotation file and read-only thereafter. Unstranded models keep
/// all features in the forward slot and ignore the query strand.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AnnotationModel {
    stranded: bool,
    /// Sorted, unique gene identifiers.
    genes: Vec<String>,
    chroms: BTreeMap<String, [IntervalIndex; 2]>,
}

fn strand_slot(stranded: bool, strand: Strand) -> usize {
    match (stranded, strand) {
        (true, Strand::Reverse) => 1,
        _ => 0,
    }
}

#[derive(Default)]
struct ModelBuilder {
    gene_idx: TxHashMap<String, GeneIdx>,
    genes: Vec<String>,
    features: BTreeMap<String, [Vec<Feature>; 2]>,
}

impl ModelBuilder {
    fn intern_gene(&mut self, gene: &str) -> GeneIdx {
        if let Some(&idx) = self.gene_idx.get(gene) {
            return idx;
        }
        let idx = self.genes.len() as GeneIdx;
        self.genes.push(gene.to_string());
        self.gene_idx.insert(gene.to_string(), idx);
        idx
    }

    fn add_line(&mut self, line: &[u8], params: &AnnotationParams) -> Result<bool> {
        let rec = match parse_gtf_line(line) {
            Ok((_, rec)) => rec,
            Err(_) => {
                validate_gtf_line(line)?;
                bail!("unable to parse line");
            }
        };
        if rec.feature_type != params.feature_type.as_bytes() {
            return Ok(false);
        }
        let Some(gene) = rec.get_attr(&params.gene_attribute) else {
            bail!(
                "{} feature has no '{}' attribute",
                params.feature_type,
                params.gene_attribute
            );
        };
        if rec.start == 0 || rec.end < rec.start {
            bail!("invalid feature coordinates {}..{}", rec.start, rec.end);
        }
        let strand = match rec.strand {
            Some(strand) => strand,
            None if params.stranded => bail!("feature has no strand in a stranded annotation"),
            None => Strand::Forward,
        };
        let gene = self.intern_gene(str::from_utf8(gene)?);
        let chrom = str::from_utf8(rec.seqname)?;
        let strands = self.features.entry(chrom.to_string()).or_default();
        strands[strand_slot(params.stranded, strand)].push(Feature {
            start: rec.start - 1,
            end: rec.end,
            gene,
        });
        Ok(true)
    }

    fn build(self, stranded: bool) -> AnnotationModel {
        // renumber genes so that indices follow sorted gene order
        let mut order: Vec<GeneIdx> = (0..self.genes.len() as GeneIdx).collect();
        order.sort_by(|&a, &b| self.genes[a as usize].cmp(&self.genes[b as usize]));
        let mut new_idx = vec![0; order.len()];
        for (new, &old) in order.iter().enumerate() {
            new_idx[old as usize] = new as GeneIdx;
        }
        let genes = order
            .iter()
            .map(|&old| self.genes[old as usize].clone())
            .collect();

        let chroms = self
            .features
            .into_iter()
            .map(|(chrom, strands)| {
                let strands = strands.map(|features| {
                    IntervalIndex::new(
                        features
                            .into_iter()
                            .map(|f| Feature {
                                gene: new_idx[f.gene as usize],
                                ..f
                            })
                            .collect(),
                    )
                });
                (chrom, strands)
            })
            .collect();

        AnnotationModel {
            stranded,
            genes,
            chroms,
        }
    }
}

impl AnnotationModel {
    /// Build the model from GTF or GFF3 text. Lines starting with '#' are skipped.
    ///
    /// Every record of `params.feature_type` is registered under the value of its
    /// `params.gene_attribute` attribute. A malformed line, or a matching feature without
    /// the gene attribute, aborts the build.
    pub fn from_reader<R: BufRead>(mut reader: R, params: &AnnotationParams) -> Result<Self> {
        let mut builder = ModelBuilder::default();
        let mut buf = Vec::new();
        let mut line_num = 0;
        let mut num_features = 0usize;
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            line_num += 1;
            if line_num % PROGRESS_INTERVAL == 0 {
                log::info!("Processing {line_num} lines of annotation...");
            }
            let line = buf.strip_suffix(b"\n").unwrap_or(&buf[..]);
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.is_empty() || line.starts_with(b"#") {
                continue;
            }
            if builder
                .add_line(line, params)
                .with_context(|| format!("line {line_num}"))?
            {
                num_features += 1;
            }
        }
        let model = builder.build(params.stranded);
        log::info!(
            "Indexed {num_features} {} features of {} genes on {} chromosomes",
            params.feature_type,
            model.genes.len(),
            model.chroms.len()
        );
        Ok(model)
    }

    /// Build the model from a GTF/GFF3 file, which may be gzipped.
    pub fn from_gtf_path(path: &Path, params: &AnnotationParams) -> Result<Self> {
        let file = File::open(path).with_context(|| path.display().to_string())?;
        let reader: Box<dyn BufRead> = match path.extension().and_then(|ext| ext.to_str()) {
            Some("gz") => Box::new(BufReader::new(MultiGzDecoder::new(file))),
            _ => Box::new(BufReader::new(file)),
        };
        Self::from_reader(reader, params).with_context(|| path.display().to_string())
    }

    pub fn is_stranded(&self) -> bool {
        self.stranded
    }

    /// True if any indexed feature lies on `chrom`.
    pub fn has_chrom(&self, chrom: &str) -> bool {
        self.chroms.contains_key(chrom)
    }

    /// Add to `hits` the gene of every feature overlapping the 0-based half-open interval
    /// `[start, end)` of `chrom`. In a stranded model only features on `strand` are considered.
    pub fn genes_overlapping<E: Extend<GeneIdx>>(
        &self,
        chrom: &str,
        strand: Strand,
        start: u64,
        end: u64,
        hits: &mut E,
    ) {
        if let Some(strands) = self.chroms.get(chrom) {
            hits.extend(strands[strand_slot(self.stranded, strand)].overlapping(start, end));
        }
    }

    /// All gene identifiers, sorted.
    pub fn gene_ids(&self) -> &[String] {
        &self.genes
    }

    pub fn gene_id(&self, idx: GeneIdx) -> &str {
        &self.genes[idx as usize]
    }

    /// Save a binary snapshot of the model.
    pub fn write(&self, path: &Path) -> Result<()> {
        write_serde(self, path, SerdeFormat::Binary)
    }

    /// Load a snapshot written by `write`.
    pub fn read(path: &Path) -> Result<Self> {
        read_serde(path, SerdeFormat::Binary)
            .with_context(|| format!("reading annotation model {}", path.display()))
    }
}
