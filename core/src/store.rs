use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Read-only map from base filename to a precomputed descriptor vector.
///
/// Every vector is non-empty, finite, and of the same length as every other.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddingStore {
    dimension: usize,
    entries: BTreeMap<String, Vec<f32>>,
}

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Parse {
        line: usize,
        message: String,
    },
    DuplicateKey {
        line: usize,
        key: String,
    },
    EmptyVector {
        line: usize,
        key: String,
    },
    DimensionMismatch {
        line: usize,
        expected: usize,
        got: usize,
    },
    NonFinite {
        line: usize,
        index: usize,
    },
    /// The key cannot be written without breaking the record format.
    InvalidKey {
        key: String,
    },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(error) => write!(f, "io error: {error}"),
            Self::Parse { line, message } => write!(f, "line {line}: {message}"),
            Self::DuplicateKey { line, key } => {
                write!(f, "line {line}: duplicate key '{key}'")
            }
            Self::EmptyVector { line, key } => {
                write!(f, "line {line}: key '{key}' has no values")
            }
            Self::DimensionMismatch {
                line,
                expected,
                got,
            } => write!(
                f,
                "line {line}: expected {expected} values, got {got}"
            ),
            Self::NonFinite { line, index } => {
                write!(f, "line {line}: non-finite value at index {index}")
            }
            Self::InvalidKey { key } => {
                write!(f, "key '{key}' contains a delimiter or is empty")
            }
        }
    }
}

impl Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl EmbeddingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a whole store from `path`. See [`EmbeddingStore::parse`].
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    /// Parses `filename,v0,v1,...` records, one per line. Blank lines are
    /// skipped and fields are trimmed.
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        Self::from_reader(raw.as_bytes())
    }

    fn from_reader(reader: impl BufRead) -> Result<Self, StoreError> {
        let mut store = Self::new();
        for (index, line) in reader.lines().enumerate() {
            let line_no = index + 1;
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let mut fields = line.split(',').map(str::trim);
            let key = fields
                .next()
                .filter(|key| !key.is_empty())
                .ok_or_else(|| StoreError::Parse {
                    line: line_no,
                    message: "missing filename".to_string(),
                })?;

            let values = fields
                .filter(|field| !field.is_empty())
                .map(|field| {
                    field.parse::<f32>().map_err(|error| StoreError::Parse {
                        line: line_no,
                        message: format!("invalid value '{field}': {error}"),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            store.insert_at(line_no, key.to_string(), values)?;
        }
        Ok(store)
    }

    /// Inserts one record, enforcing the store invariants.
    pub fn insert(&mut self, key: impl Into<String>, values: Vec<f32>) -> Result<(), StoreError> {
        let line = self.entries.len() + 1;
        self.insert_at(line, key.into(), values)
    }

    fn insert_at(&mut self, line: usize, key: String, values: Vec<f32>) -> Result<(), StoreError> {
        if values.is_empty() {
            return Err(StoreError::EmptyVector { line, key });
        }
        if let Some(index) = values.iter().position(|value| !value.is_finite()) {
            return Err(StoreError::NonFinite { line, index });
        }
        if self.entries.is_empty() {
            self.dimension = values.len();
        } else if values.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                line,
                expected: self.dimension,
                got: values.len(),
            });
        }
        if self.entries.contains_key(&key) {
            return Err(StoreError::DuplicateKey { line, key });
        }

        self.entries.insert(key, values);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&[f32]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    /// Vector length shared by every entry; zero when empty.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f32])> + '_ {
        self.entries
            .iter()
            .map(|(key, values)| (key.as_str(), values.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes every record in key order.
    pub fn write(&self, path: &Path) -> Result<(), StoreError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(path)?);
        for (key, values) in self.iter() {
            write_record(&mut writer, key, values)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Appends one record to `path`, creating the file when missing.
///
/// An unwritable key is rejected before the file is touched.
pub fn append_record(path: &Path, key: &str, values: &[f32]) -> Result<(), StoreError> {
    validate_key(key)?;
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = BufWriter::new(file);
    write_record(&mut writer, key, values)?;
    writer.flush()?;
    Ok(())
}

fn validate_key(key: &str) -> Result<(), StoreError> {
    if key.trim().is_empty() || key.contains([',', '\n', '\r']) {
        return Err(StoreError::InvalidKey {
            key: key.to_string(),
        });
    }
    Ok(())
}

fn write_record(writer: &mut impl Write, key: &str, values: &[f32]) -> Result<(), StoreError> {
    validate_key(key)?;
    write!(writer, "{key}")?;
    for value in values {
        write!(writer, ",{value}")?;
    }
    writeln!(writer)?;
    Ok(())
}
