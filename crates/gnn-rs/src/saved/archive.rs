//! Named tensor archive used for `weights.bin`.
//!
//! Layout: magic, version, index length, bincode index, then the raw
//! little-endian payloads in index order. Offsets in the index are absolute.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::{anyhow, bail, ensure, Context, Result};
use serde::{Deserialize, Serialize};

use crate::tensor::{DType, Tensor};

const MAGIC: &[u8; 8] = b"GNNRSWTS";
const VERSION: u32 = 1;

#[derive(Clone, Debug)]
pub struct WeightEntry {
    pub name: String,
    pub dims: Vec<usize>,
    pub dtype: DType,
    pub offset: u64,
    pub len: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct WeightIndex {
    entries: Vec<WeightIndexEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct WeightIndexEntry {
    name: String,
    dims: Vec<u64>,
    dtype_tag: u32,
    offset: u64,
    len: u64,
}

pub struct WeightArchiveReader {
    file: File,
    entries: Vec<WeightEntry>,
    by_name: HashMap<String, usize>,
}

impl WeightArchiveReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut file =
            File::open(path).with_context(|| format!("opening weights {}", path.display()))?;

        let mut magic = [0u8; 8];
        file.read_exact(&mut magic)?;
        if &magic != MAGIC {
            bail!("invalid weight archive magic header in {}", path.display());
        }
        let version = read_u32(&mut file)?;
        if version != VERSION {
            bail!("unsupported weight archive version {}", version);
        }

        let index_len = read_u32(&mut file)? as usize;
        let mut index_bytes = vec![0u8; index_len];
        file.read_exact(&mut index_bytes)?;
        let index: WeightIndex = bincode::deserialize(&index_bytes)?;

        let mut entries = Vec::with_capacity(index.entries.len());
        let mut by_name = HashMap::with_capacity(index.entries.len());
        for (i, e) in index.entries.into_iter().enumerate() {
            let dtype = DType::from_tag(e.dtype_tag)
                .ok_or_else(|| anyhow!("unknown dtype tag {} in weight archive", e.dtype_tag))?;
            let dims = e
                .dims
                .into_iter()
                .map(|d| usize::try_from(d).map_err(|_| anyhow!("weight {} dim overflow", e.name)))
                .collect::<Result<Vec<_>>>()?;
            by_name.insert(e.name.clone(), i);
            entries.push(WeightEntry {
                name: e.name,
                dims,
                dtype,
                offset: e.offset,
                len: e.len,
            });
        }

        Ok(Self {
            file,
            entries,
            by_name,
        })
    }

    pub fn entries(&self) -> &[WeightEntry] {
        &self.entries
    }

    pub fn get(&mut self, name: &str) -> Result<Tensor> {
        let idx = *self
            .by_name
            .get(name)
            .ok_or_else(|| anyhow!("weight '{}' not found in archive", name))?;
        let entry = self
            .entries
            .get(idx)
            .cloned()
            .ok_or_else(|| anyhow!("weight '{}' index out of range", name))?;
        self.read_entry(&entry)
    }

    fn read_entry(&mut self, entry: &WeightEntry) -> Result<Tensor> {
        self.file.seek(SeekFrom::Start(entry.offset))?;
        let byte_len = usize::try_from(entry.len)
            .map_err(|_| anyhow!("weight {} data length out of range", entry.name))?;
        let mut raw = vec![0u8; byte_len];
        self.file.read_exact(&mut raw)?;
        Tensor::from_le_bytes(entry.dtype, entry.dims.clone(), &raw)
            .with_context(|| format!("decoding weight '{}'", entry.name))
    }
}

pub struct WeightArchive;

impl WeightArchive {
    /// Reads every tensor into memory.
    pub fn load(path: impl AsRef<Path>) -> Result<HashMap<String, Tensor>> {
        let mut reader = WeightArchiveReader::open(path)?;
        let entries = reader.entries().to_vec();
        let mut tensors = HashMap::with_capacity(entries.len());
        for entry in entries {
            let tensor = reader.read_entry(&entry)?;
            tensors.insert(entry.name, tensor);
        }
        Ok(tensors)
    }

    pub fn save(path: impl AsRef<Path>, tensors: &BTreeMap<String, Tensor>) -> Result<()> {
        let mut entries = Vec::with_capacity(tensors.len());
        let mut running_offset: u64 = 0;
        for (name, tensor) in tensors {
            let dtype = tensor.dtype();
            let len = (tensor.len() * dtype.size_in_bytes()) as u64;
            entries.push(WeightIndexEntry {
                name: name.clone(),
                dims: tensor.shape().dims().iter().map(|&d| d as u64).collect(),
                dtype_tag: dtype.tag(),
                offset: running_offset,
                len,
            });
            running_offset = running_offset
                .checked_add(len)
                .ok_or_else(|| anyhow!("weight archive data offset overflow"))?;
        }

        let mut index = WeightIndex { entries };
        let index_len = bincode::serialize(&index)?.len();
        ensure!(index_len <= u32::MAX as usize, "weight archive index too large");

        // bincode encodes u64 at fixed width, so shifting offsets keeps the length.
        let data_start = (MAGIC.len() + 4 + 4 + index_len) as u64;
        for entry in index.entries.iter_mut() {
            entry.offset = entry
                .offset
                .checked_add(data_start)
                .ok_or_else(|| anyhow!("weight archive offset overflow"))?;
        }
        let index_bytes = bincode::serialize(&index)?;
        ensure!(
            index_bytes.len() == index_len,
            "weight archive index length mismatch after offset fixup"
        );

        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;
        writer.write_all(&(index_len as u32).to_le_bytes())?;
        writer.write_all(&index_bytes)?;
        for tensor in tensors.values() {
            writer.write_all(&tensor.to_le_bytes())?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn read_u32(reader: &mut impl Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_back_individual_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.bin");
        let mut tensors = BTreeMap::new();
        tensors.insert(
            "0.dense.kernel".to_string(),
            Tensor::from_vec([2, 2], vec![1.0, -2.0, 3.5, 0.25]).unwrap(),
        );
        tensors.insert("0.dense.steps".to_string(), Tensor::vector_i32(vec![7, 9]));
        WeightArchive::save(&path, &tensors).unwrap();

        let mut reader = WeightArchiveReader::open(&path).unwrap();
        assert_eq!(reader.entries().len(), 2);
        assert_eq!(reader.get("0.dense.steps").unwrap(), tensors["0.dense.steps"]);
        assert_eq!(reader.get("0.dense.kernel").unwrap(), tensors["0.dense.kernel"]);
        assert!(reader.get("missing").is_err());
    }

    #[test]
    fn rejects_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.bin");
        std::fs::write(&path, b"not an archive at all").unwrap();
        assert!(WeightArchiveReader::open(&path).is_err());
    }
}
