#![deny(missing_docs, unsafe_code, unused_qualifications)]

//! Statistics of a single pipeline pass.
//!
//! A demultiplexing or UMI counting pass owns its counters and hands them back as a value when
//! it ends. Values from independent passes combine through `Metric::merge`, and can be saved
//! as JSON or as a bincode snapshot.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::hash::BuildHasher;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

mod count_metric;
mod histogram;

pub use count_metric::CountMetric;
pub use histogram::SimpleHistogram;

/// Fixed-seed ahash, so that maps iterate in the same order on every run.
#[derive(Clone, Copy, Debug, Default)]
pub struct TxHasher;

impl BuildHasher for TxHasher {
    type Hasher = ahash::AHasher;

    fn build_hasher(&self) -> ahash::AHasher {
        ahash::RandomState::with_seeds(0, 0, 0, 0).build_hasher()
    }
}

/// HashMap keyed with `TxHasher`.
pub type TxHashMap<K, V> = HashMap<K, V, TxHasher>;

/// On-disk encoding of a saved value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SerdeFormat {
    /// Pretty-printed JSON.
    Json,
    /// bincode.
    Binary,
}

impl SerdeFormat {
    /// `.json` files are JSON, anything else is binary.
    pub fn from_path(path: &Path) -> SerdeFormat {
        if path.extension().map_or(false, |ext| ext == "json") {
            SerdeFormat::Json
        } else {
            SerdeFormat::Binary
        }
    }
}

/// Save `value` to `path`.
pub fn write_serde<T: Serialize + ?Sized>(
    value: &T,
    path: impl AsRef<Path>,
    format: SerdeFormat,
) -> Result<()> {
    let path = path.as_ref();
    let mut writer = BufWriter::new(
        File::create(path).with_context(|| format!("Error creating {}", path.display()))?,
    );
    write_serde_to(value, &mut writer, format)
        .and_then(|()| Ok(writer.flush()?))
        .with_context(|| format!("Error writing {}", path.display()))
}

/// Save `value` to any writer.
pub fn write_serde_to<T: Serialize + ?Sized>(
    value: &T,
    writer: impl Write,
    format: SerdeFormat,
) -> Result<()> {
    match format {
        SerdeFormat::Json => serde_json::to_writer_pretty(writer, value)?,
        SerdeFormat::Binary => bincode::serialize_into(writer, value)?,
    }
    Ok(())
}

/// Load a value saved by `write_serde`.
pub fn read_serde<T: DeserializeOwned>(path: impl AsRef<Path>, format: SerdeFormat) -> Result<T> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Error opening {}", path.display()))?;
    read_serde_from(BufReader::new(file), format)
        .with_context(|| format!("Error reading {}", path.display()))
}

/// Load a value from any reader.
pub fn read_serde_from<T: DeserializeOwned>(reader: impl Read, format: SerdeFormat) -> Result<T> {
    Ok(match format {
        SerdeFormat::Json => serde_json::from_reader(reader)?,
        SerdeFormat::Binary => bincode::deserialize_from(reader)?,
    })
}

/// Statistics that can be combined across passes and saved to disk.
pub trait Metric: Serialize + DeserializeOwned {
    /// Add the counts of `other` into `self`.
    fn merge(&mut self, other: Self);

    /// Save to `path`.
    fn to_file(&self, path: impl AsRef<Path>, format: SerdeFormat) -> Result<()> {
        write_serde(self, path, format)
    }

    /// Load from `path`.
    fn from_file(path: impl AsRef<Path>, format: SerdeFormat) -> Result<Self> {
        read_serde(path, format)
    }

    /// Merge the metrics of several passes.
    fn from_chunks(chunks: impl IntoIterator<Item = Self>) -> Self
    where
        Self: Default,
    {
        let mut merged = Self::default();
        for chunk in chunks {
            merged.merge(chunk);
        }
        merged
    }
}
