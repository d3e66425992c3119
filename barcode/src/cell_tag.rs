//! Cell barcode and UMI carried in the name of a demultiplexed read, e.g. `BC-TCTGAG_UMI-CGTTAC`.

use anyhow::{bail, Result};
use std::fmt::{Display, Formatter};

pub(crate) const BARCODE_PREFIX: &[u8] = b"BC-";
pub(crate) const UMI_PREFIX: &[u8] = b"UMI-";
const FIELD_SEP: u8 = b'_';

/// The cell barcode and UMI of one read.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct CellTag<'a> {
    pub barcode: &'a [u8],
    pub umi: &'a [u8],
}

impl<'a> CellTag<'a> {
    pub fn new(barcode: &'a [u8], umi: &'a [u8]) -> Self {
        CellTag { barcode, umi }
    }

    /// Append the read name (without the leading `@`) to `buf`.
    pub fn write_read_name(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(BARCODE_PREFIX);
        buf.extend_from_slice(self.barcode);
        buf.push(FIELD_SEP);
        buf.extend_from_slice(UMI_PREFIX);
        buf.extend_from_slice(self.umi);
    }

    /// Parse the cell barcode and UMI back out of a read name.
    pub fn from_read_name(name: &'a [u8], bc_len: usize, umi_len: usize) -> Result<Self> {
        Ok(CellTag {
            barcode: barcode_from_read_name(name, bc_len)?,
            umi: umi_from_read_name(name, umi_len)?,
        })
    }
}

impl Display for CellTag<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut name = Vec::with_capacity(
            BARCODE_PREFIX.len() + self.barcode.len() + 1 + UMI_PREFIX.len() + self.umi.len(),
        );
        self.write_read_name(&mut name);
        f.write_str(&String::from_utf8_lossy(&name))
    }
}

/// Take `len` bases after `prefix` at the start of `field`.
fn tagged_value<'a>(
    name: &[u8],
    field: Option<&'a [u8]>,
    prefix: &[u8],
    len: usize,
) -> Result<&'a [u8]> {
    match field {
        Some(field) if field.starts_with(prefix) && field.len() >= prefix.len() + len => {
            Ok(&field[prefix.len()..prefix.len() + len])
        }
        _ => bail!(
            "read name '{}' has no {}-base value tagged '{}'",
            String::from_utf8_lossy(name),
            len,
            String::from_utf8_lossy(prefix)
        ),
    }
}

/// The UMI of a read named `BC-<barcode>_UMI-<umi>...`: the first `umi_len` bases of the
/// second `_`-separated field, after its `UMI-` prefix.
pub fn umi_from_read_name(name: &[u8], umi_len: usize) -> Result<&[u8]> {
    let field = name.split(|&b| b == FIELD_SEP).nth(1);
    tagged_value(name, field, UMI_PREFIX, umi_len)
}

/// The cell barcode of a read named `BC-<barcode>_UMI-<umi>...`.
pub fn barcode_from_read_name(name: &[u8], bc_len: usize) -> Result<&[u8]> {
    let field = name.split(|&b| b == FIELD_SEP).next();
    tagged_value(name, field, BARCODE_PREFIX, bc_len)
}
