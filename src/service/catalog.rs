//! Key catalogue persistence.
//!
//! Only descriptive keys and their metadata are written; native objects are
//! rebuilt lazily after loading.
//!
//! # Layout (little-endian)
//!
//! | Field          | Type        |
//! |----------------|-------------|
//! | magic          | `b"PSOC"`   |
//! | version        | `u32` (= 1) |
//! | saved at       | `i64` ms since Unix epoch, UTC |
//! | entry count    | `u32`       |
//! | per entry: key length | `u32` |
//! | per entry: key bytes  | [`PipelineConfigKey::to_bytes`] |
//! | per entry: created at | `i64` ms |
//! | per entry: access count | `u64` |

use std::io::{Read, Write};
use std::time::SystemTime;

use crate::errors::{CacheError, Result};
use crate::pipeline::PipelineConfigKey;
use crate::utils::io::{ReadLeExt, WriteLeExt};
use crate::utils::time::{from_unix_millis, to_unix_millis};

pub const CATALOG_MAGIC: [u8; 4] = *b"PSOC";
pub const CATALOG_VERSION: u32 = 1;

const MAX_KEY_BYTES: usize = 1 << 20;
const MAX_ENTRIES: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub key: PipelineConfigKey,
    pub created_at: SystemTime,
    pub access_count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    pub saved_at: SystemTime,
    pub entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let count = u32::try_from(self.entries.len()).map_err(|_| {
            CacheError::InvalidArgument(format!("{} catalogue entries", self.entries.len()))
        })?;

        writer.write_all(&CATALOG_MAGIC)?;
        writer.write_u32_le(CATALOG_VERSION)?;
        writer.write_i64_le(to_unix_millis(self.saved_at))?;
        writer.write_u32_le(count)?;
        for entry in &self.entries {
            writer.write_len_prefixed_bytes_u32(&entry.key.to_bytes())?;
            writer.write_i64_le(to_unix_millis(entry.created_at))?;
            writer.write_u64_le(entry.access_count)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != CATALOG_MAGIC {
            return Err(CacheError::CatalogFormat(format!(
                "bad magic {magic:02x?}, expected {CATALOG_MAGIC:02x?}"
            )));
        }
        let version = reader.read_u32_le()?;
        if version != CATALOG_VERSION {
            return Err(CacheError::CatalogFormat(format!(
                "unsupported catalogue version {version}"
            )));
        }
        let saved_at = from_unix_millis(reader.read_i64_le()?);

        let count = reader.read_u32_le()? as usize;
        if count > MAX_ENTRIES {
            return Err(CacheError::CatalogFormat(format!(
                "{count} entries exceeds the limit of {MAX_ENTRIES}"
            )));
        }

        let mut entries = Vec::with_capacity(count.min(1024));
        for i in 0..count {
            let len = reader.read_u32_le()? as usize;
            let bytes = reader.read_exact_vec(len, MAX_KEY_BYTES)?;
            let key = PipelineConfigKey::from_bytes(&bytes).map_err(|e| {
                CacheError::CatalogFormat(format!("entry {i}: {e}"))
            })?;
            let created_at = from_unix_millis(reader.read_i64_le()?);
            let access_count = reader.read_u64_le()?;
            entries.push(CatalogEntry {
                key,
                created_at,
                access_count,
            });
        }

        Ok(Self { saved_at, entries })
    }
}
