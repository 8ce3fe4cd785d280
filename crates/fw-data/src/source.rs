use std::fmt;
use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use fw_types::{config_error, FwResult, StorageError};
use tempfile::NamedTempFile;

/// Raw dataset handed to the cache builder.
///
/// Every variant means the same thing: a sequence of text lines. Readers are
/// copied byte-for-byte, line iterators are written newline-terminated and
/// paths are read in place.
pub enum DatasetSource {
    Reader(Box<dyn Read + Send>),
    Lines(Box<dyn Iterator<Item = String> + Send>),
    Path(PathBuf),
}

impl DatasetSource {
    pub fn from_reader<R: Read + Send + 'static>(reader: R) -> Self {
        Self::Reader(Box::new(reader))
    }

    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        I::IntoIter: Send + 'static,
        S: Into<String> + 'static,
    {
        Self::Lines(Box::new(lines.into_iter().map(|line| line.into())))
    }

    pub fn from_path<P: Into<PathBuf>>(path: P) -> Self {
        Self::Path(path.into())
    }

    /// Build a source from optional parts, exactly one of which must be set.
    pub fn from_parts(
        reader: Option<Box<dyn Read + Send>>,
        lines: Option<Box<dyn Iterator<Item = String> + Send>>,
        path: Option<PathBuf>,
    ) -> FwResult<Self> {
        match (reader, lines, path) {
            (Some(reader), None, None) => Ok(Self::Reader(reader)),
            (None, Some(lines), None) => Ok(Self::Lines(lines)),
            (None, None, Some(path)) => Ok(Self::Path(path)),
            (None, None, None) => Err(config_error!("no dataset source supplied")),
            _ => Err(config_error!(
                "exactly one of reader, lines or path must be supplied"
            )),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Reader(_) => "reader",
            Self::Lines(_) => "lines",
            Self::Path(_) => "path",
        }
    }

    /// Drain the source into its lines as raw bytes.
    ///
    /// Records are split on `\n` only, so `\r` and non-UTF-8 bytes survive
    /// untouched. A final line without a terminator is still a record.
    pub fn into_records(self) -> FwResult<Vec<Vec<u8>>> {
        match self {
            Self::Reader(reader) => split_records(reader),
            Self::Lines(lines) => Ok(lines.map(String::into_bytes).collect()),
            Self::Path(path) => {
                let file = fs::File::open(&path).map_err(|_| StorageError::NotFound {
                    name: path.display().to_string(),
                })?;
                split_records(file)
            }
        }
    }

    /// Turn the source into a file the trainer can read.
    pub(crate) fn materialize(self, scratch_dir: &Path) -> FwResult<MaterializedInput> {
        match self {
            Self::Path(path) => {
                if !path.is_file() {
                    return Err(StorageError::NotFound {
                        name: path.display().to_string(),
                    }
                    .into());
                }
                Ok(MaterializedInput::InPlace(path))
            }
            Self::Reader(mut reader) => {
                let mut file = scratch_file(scratch_dir)?;
                std::io::copy(&mut reader, file.as_file_mut())?;
                file.as_file_mut().flush()?;
                Ok(MaterializedInput::Scratch(file))
            }
            Self::Lines(lines) => {
                let mut file = scratch_file(scratch_dir)?;
                {
                    let mut out = std::io::BufWriter::new(file.as_file_mut());
                    for line in lines {
                        out.write_all(line.as_bytes())?;
                        out.write_all(b"\n")?;
                    }
                    out.flush()?;
                }
                Ok(MaterializedInput::Scratch(file))
            }
        }
    }
}

impl fmt::Debug for DatasetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            other => write!(f, "DatasetSource::{}", other.kind()),
        }
    }
}

/// Trainer input on disk. Scratch copies are deleted when dropped.
#[derive(Debug)]
pub(crate) enum MaterializedInput {
    InPlace(PathBuf),
    Scratch(NamedTempFile),
}

impl MaterializedInput {
    pub(crate) fn path(&self) -> &Path {
        match self {
            Self::InPlace(path) => path,
            Self::Scratch(file) => file.path(),
        }
    }
}

fn split_records<R: Read>(reader: R) -> FwResult<Vec<Vec<u8>>> {
    Ok(BufReader::new(reader)
        .split(b'\n')
        .collect::<Result<_, _>>()?)
}

fn scratch_file(dir: &Path) -> FwResult<NamedTempFile> {
    tempfile::Builder::new()
        .prefix("dataset-")
        .suffix(".txt")
        .tempfile_in(dir)
        .map_err(|e| {
            StorageError::TempFile {
                dir: dir.display().to_string(),
                message: e.to_string(),
            }
            .into()
        })
}
