//! Append-only dataset container.
//!
//! One file per protocol run, named `{uuid}.reyd`. Inside, one group per
//! task (`task_000`, `task_001`, …); within each group an append-only
//! sequence of sample records. The format is a framed stream:
//!
//! ```text
//! "REYD" | u16 version
//! 0x01 | u16 group_id | u16 name_len | name bytes          (group def)
//! 0x02 | u16 group_id | u32 payload_len | JSON payload     (sample)
//! ```
//!
//! Groups exist from their definition record, so a task that produced no
//! samples still reads back as an empty array.

use crate::error::{Result, RtError};
use crate::types::EyeSample;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const MAGIC: &[u8; 4] = b"REYD";
const FORMAT_VERSION: u16 = 1;

const TAG_GROUP: u8 = 0x01;
const TAG_SAMPLE: u8 = 0x02;

struct FileInner {
    writer: BufWriter<File>,
    next_group: u16,
}

/// A dataset file open for appending.
pub struct DatasetFile {
    inner: Arc<Mutex<FileInner>>,
    path: PathBuf,
}

impl DatasetFile {
    /// Create (truncating) a dataset file and write its header.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(MAGIC)?;
        writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
        writer.flush()?;
        Ok(Self {
            inner: Arc::new(Mutex::new(FileInner {
                writer,
                next_group: 0,
            })),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Define a new group and return an appending handle to it.
    pub fn create_group(&self, name: &str) -> Result<DatasetGroup> {
        let mut inner = self.inner.lock().expect("dataset poisoned");
        let id = inner.next_group;
        inner.next_group += 1;

        let name_bytes = name.as_bytes();
        inner.writer.write_all(&[TAG_GROUP])?;
        inner.writer.write_all(&id.to_le_bytes())?;
        inner
            .writer
            .write_all(&(name_bytes.len() as u16).to_le_bytes())?;
        inner.writer.write_all(name_bytes)?;
        inner.writer.flush()?;

        Ok(DatasetGroup {
            inner: Arc::clone(&self.inner),
            id,
            name: name.to_string(),
        })
    }

    pub fn flush(&self) -> Result<()> {
        self.inner
            .lock()
            .expect("dataset poisoned")
            .writer
            .flush()?;
        Ok(())
    }

    /// Read every group of a dataset back, in definition order.
    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<(String, Vec<EyeSample>)>> {
        let file = File::open(path.as_ref())?;
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(RtError::BadMessage("not a dataset file".to_string()));
        }
        let mut version = [0u8; 2];
        reader.read_exact(&mut version)?;
        let version = u16::from_le_bytes(version);
        if version != FORMAT_VERSION {
            return Err(RtError::BadMessage(format!(
                "unsupported dataset format version {version}"
            )));
        }

        let mut groups: Vec<(String, Vec<EyeSample>)> = Vec::new();
        loop {
            let mut tag = [0u8; 1];
            match reader.read_exact(&mut tag) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            match tag[0] {
                TAG_GROUP => {
                    let id = read_u16(&mut reader)? as usize;
                    let name_len = read_u16(&mut reader)? as usize;
                    let mut name = vec![0u8; name_len];
                    reader.read_exact(&mut name)?;
                    if id != groups.len() {
                        return Err(RtError::BadMessage(format!(
                            "group {id} defined out of order"
                        )));
                    }
                    groups.push((String::from_utf8_lossy(&name).into_owned(), Vec::new()));
                }
                TAG_SAMPLE => {
                    let id = read_u16(&mut reader)? as usize;
                    let len = read_u32(&mut reader)? as usize;
                    let mut payload = vec![0u8; len];
                    reader.read_exact(&mut payload)?;
                    let sample: EyeSample = serde_json::from_slice(&payload)?;
                    let group = groups.get_mut(id).ok_or_else(|| {
                        RtError::BadMessage(format!("sample for undefined group {id}"))
                    })?;
                    group.1.push(sample);
                }
                other => {
                    return Err(RtError::BadMessage(format!(
                        "unknown record tag 0x{other:02x}"
                    )))
                }
            }
        }
        Ok(groups)
    }

    /// Read one named group. `NotFound` when the group was never defined.
    pub fn read_group(path: impl AsRef<Path>, name: &str) -> Result<Vec<EyeSample>> {
        Self::read_all(path)?
            .into_iter()
            .find(|(group, _)| group == name)
            .map(|(_, samples)| samples)
            .ok_or_else(|| RtError::NotFound(format!("dataset group \"{name}\"")))
    }
}

fn read_u16(reader: &mut impl Read) -> Result<u16> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32(reader: &mut impl Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Appending handle to one group of a dataset file.
#[derive(Clone)]
pub struct DatasetGroup {
    inner: Arc<Mutex<FileInner>>,
    id: u16,
    name: String,
}

impl DatasetGroup {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn append(&self, sample: &EyeSample) -> Result<()> {
        let payload = serde_json::to_vec(sample)?;
        let mut inner = self.inner.lock().expect("dataset poisoned");
        inner.writer.write_all(&[TAG_SAMPLE])?;
        inner.writer.write_all(&self.id.to_le_bytes())?;
        inner
            .writer
            .write_all(&(payload.len() as u32).to_le_bytes())?;
        inner.writer.write_all(&payload)?;
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.inner
            .lock()
            .expect("dataset poisoned")
            .writer
            .flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(timestamp: u64) -> EyeSample {
        EyeSample {
            timestamp,
            ..Default::default()
        }
    }

    #[test]
    fn test_round_trip_two_groups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.reyd");

        let file = DatasetFile::create(&path).unwrap();
        let first = file.create_group("task_000").unwrap();
        let second = file.create_group("task_001").unwrap();
        first.append(&sample(1)).unwrap();
        first.append(&sample(2)).unwrap();
        second.append(&sample(10)).unwrap();
        first.append(&sample(3)).unwrap();
        file.flush().unwrap();

        let groups = DatasetFile::read_all(&path).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "task_000");
        let stamps: Vec<u64> = groups[0].1.iter().map(|s| s.timestamp).collect();
        assert_eq!(stamps, vec![1, 2, 3]);
        assert_eq!(groups[1].1.len(), 1);
    }

    #[test]
    fn test_empty_group_reads_back_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.reyd");

        let file = DatasetFile::create(&path).unwrap();
        let group = file.create_group("task_000").unwrap();
        group.flush().unwrap();

        let samples = DatasetFile::read_group(&path, "task_000").unwrap();
        assert!(samples.is_empty());
    }

    #[test]
    fn test_unknown_group_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.reyd");
        DatasetFile::create(&path).unwrap().flush().unwrap();

        assert!(matches!(
            DatasetFile::read_group(&path, "task_404"),
            Err(RtError::NotFound(_))
        ));
    }

    #[test]
    fn test_rejects_foreign_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foreign.bin");
        std::fs::write(&path, b"XXXX0000").unwrap();
        assert!(matches!(
            DatasetFile::read_all(&path),
            Err(RtError::BadMessage(_))
        ));
    }
}
