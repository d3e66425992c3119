//! Gene-by-cell UMI count matrix assembled from per-cell counts.

use anyhow::{ensure, Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UmiMatrix {
    genes: BTreeSet<String>,
    cells: Vec<(String, BTreeMap<String, usize>)>,
}

impl UmiMatrix {
    /// Start a matrix whose rows include `genes` even when no cell has UMIs for them.
    pub fn new<I, S>(genes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        UmiMatrix {
            genes: genes.into_iter().map(Into::into).collect(),
            cells: Vec::new(),
        }
    }

    /// Add a column. Genes not seen before become new rows.
    pub fn add_cell(&mut self, name: &str, counts: &BTreeMap<String, usize>) -> Result<()> {
        ensure!(
            self.cells.iter().all(|(cell, _)| cell != name),
            "cell '{name}' was added to the matrix twice"
        );
        self.genes.extend(counts.keys().cloned());
        self.cells.push((name.to_string(), counts.clone()));
        Ok(())
    }

    pub fn genes(&self) -> impl Iterator<Item = &str> + '_ {
        self.genes.iter().map(String::as_str)
    }

    pub fn cells(&self) -> impl Iterator<Item = &str> + '_ {
        self.cells.iter().map(|(cell, _)| cell.as_str())
    }

    pub fn get(&self, gene: &str, cell: &str) -> usize {
        self.cells
            .iter()
            .find(|(name, _)| name == cell)
            .and_then(|(_, counts)| counts.get(gene))
            .copied()
            .unwrap_or(0)
    }

    /// Write a header of `gene` and the cell names in insertion order, then one zero-filled
    /// row per gene in sorted order.
    pub fn write_to<W: Write>(&self, writer: W, delimiter: u8) -> Result<()> {
        let mut wtr = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .from_writer(writer);
        wtr.write_record(std::iter::once("gene").chain(self.cells()))?;
        for gene in &self.genes {
            let mut row = vec![gene.clone()];
            row.extend(
                self.cells
                    .iter()
                    .map(|(_, counts)| counts.get(gene).copied().unwrap_or(0).to_string()),
            );
            wtr.write_record(&row)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn write_csv(&self, path: &Path, delimiter: u8) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("Error creating matrix file {}", path.display()))?;
        self.write_to(BufWriter::new(file), delimiter)
            .with_context(|| path.display().to_string())?;
        log::info!(
            "Wrote {} genes x {} cells to {}",
            self.genes.len(),
            self.cells.len(),
            path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn counts(pairs: &[(&str, usize)]) -> BTreeMap<String, usize> {
        pairs.iter().map(|&(g, n)| (g.to_string(), n)).collect()
    }

    #[test]
    fn test_matrix() -> Result<()> {
        let mut matrix = UmiMatrix::new(["g2", "g1", "g3"]);
        matrix.add_cell("BC-2-CCCCCC", &counts(&[("g1", 4), ("g3", 1)]))?;
        matrix.add_cell("BC-1-AAAAAA", &counts(&[("g1", 2), ("g0", 7)]))?;

        assert_eq!(matrix.get("g1", "BC-1-AAAAAA"), 2);
        assert_eq!(matrix.get("g2", "BC-1-AAAAAA"), 0);
        assert_eq!(matrix.genes().collect::<Vec<_>>(), ["g0", "g1", "g2", "g3"]);

        let mut out = Vec::new();
        matrix.write_to(&mut out, b'\t')?;
        assert_eq!(
            String::from_utf8(out)?,
            "gene\tBC-2-CCCCCC\tBC-1-AAAAAA\n\
             g0\t0\t7\n\
             g1\t4\t2\n\
             g2\t0\t0\n\
             g3\t1\t0\n"
        );
        Ok(())
    }

    #[test]
    fn test_duplicate_cell() {
        let mut matrix = UmiMatrix::default();
        matrix.add_cell("c1", &BTreeMap::new()).unwrap();
        assert!(matrix.add_cell("c1", &BTreeMap::new()).is_err());
    }

    #[test]
    fn test_write_csv() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("expr.csv");
        let mut matrix = UmiMatrix::new(Vec::<String>::new());
        matrix.add_cell("c1", &counts(&[("g1", 3)]))?;
        matrix.write_csv(&path, b',')?;
        assert_eq!(std::fs::read_to_string(path)?, "gene,c1\ng1,3\n");
        Ok(())
    }
}
