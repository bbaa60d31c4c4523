//! Feeders: sources of per-iteration parameter records.
//!
//! A feeder hands out immutable [`Record`]s. Drawing is `&self` and thread-safe,
//! so one feeder can be shared (behind an `Arc`) by every virtual user of a run.
//!
//! Two implementations are provided:
//!
//! - [`FileFeeder`]: a finite list of records, usually loaded from a JSON array,
//!   consumed according to a [`Strategy`].
//! - [`GeneratorFeeder`]: computes a fresh record on every draw from a closure.
//!   The only shared state is the thread-local random source passed to it.

use std::{collections::BTreeMap, path::Path, sync::Arc};

use parking_lot::Mutex;
use rand::{rngs::ThreadRng, seq::SliceRandom, Rng};

use crate::{error::FeederError, session::Value};

/// The fields of one record, by name.
pub type Fields = BTreeMap<String, Value>;

/// An immutable record; cheap to clone and hand to many users.
pub type Record = Arc<Fields>;

pub trait Feeder: Send + Sync {
    /// Name used in logs and in the failure recorded on exhaustion.
    fn name(&self) -> &str;

    /// Draws the next record.
    fn next(&self) -> Result<Record, FeederError>;
}

/// How a [`FileFeeder`] walks its records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// In file order, each record once. Exhausts.
    #[default]
    Queue,
    /// Random order, each record once. Exhausts.
    Shuffle,
    /// Random pick with replacement. Never exhausts.
    Random,
    /// In file order, starting over at the end. Never exhausts.
    Circular,
}

#[derive(Debug)]
struct Cursor {
    position: usize,
    /// Visiting order; only meaningful for `Shuffle`.
    order: Vec<usize>,
}

/// A finite, in-memory feeder.
#[derive(Debug)]
pub struct FileFeeder {
    name: String,
    records: Vec<Record>,
    strategy: Strategy,
    cursor: Mutex<Cursor>,
}

impl FileFeeder {
    pub fn from_records(
        name: impl Into<String>,
        records: Vec<Fields>,
        strategy: Strategy,
    ) -> Result<Self, FeederError> {
        let name = name.into();
        if records.is_empty() {
            return Err(FeederError::Empty(name));
        }
        let records: Vec<Record> = records.into_iter().map(Arc::new).collect();
        let mut order: Vec<usize> = (0..records.len()).collect();
        if strategy == Strategy::Shuffle {
            order.shuffle(&mut rand::rng());
        }
        Ok(Self {
            name,
            records,
            strategy,
            cursor: Mutex::new(Cursor { position: 0, order }),
        })
    }

    /// Parses a JSON array of objects.
    pub fn from_json_str(
        name: impl Into<String>,
        json: &str,
        strategy: Strategy,
    ) -> Result<Self, FeederError> {
        let items: Vec<serde_json::Value> = serde_json::from_str(json)?;
        let records = items
            .into_iter()
            .enumerate()
            .map(|(index, item)| match item {
                serde_json::Value::Object(map) => Ok(map
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect::<Fields>()),
                _ => Err(FeederError::InvalidRecord { index }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_records(name, records, strategy)
    }

    /// Loads a JSON array of objects from disk. The feeder is named after the file.
    pub fn from_json_file(path: impl AsRef<Path>, strategy: Strategy) -> Result<Self, FeederError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::from_json_str(name, &json, strategy)
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Feeder for FileFeeder {
    fn name(&self) -> &str {
        &self.name
    }

    fn next(&self) -> Result<Record, FeederError> {
        let len = self.records.len();
        let index = match self.strategy {
            Strategy::Random => rand::rng().random_range(0..len),
            Strategy::Circular => {
                let mut cursor = self.cursor.lock();
                let index = cursor.position % len;
                cursor.position = (index + 1) % len;
                index
            }
            Strategy::Queue | Strategy::Shuffle => {
                let mut cursor = self.cursor.lock();
                if cursor.position >= len {
                    return Err(FeederError::Exhausted {
                        feeder: self.name.clone(),
                        records: len,
                    });
                }
                let index = cursor.order[cursor.position];
                cursor.position += 1;
                index
            }
        };
        Ok(Arc::clone(&self.records[index]))
    }
}

/// An unbounded feeder computing each record from a closure.
pub struct GeneratorFeeder<F> {
    name: String,
    generate: F,
}

impl<F> GeneratorFeeder<F>
where
    F: Fn(&mut ThreadRng) -> Fields + Send + Sync,
{
    pub fn new(name: impl Into<String>, generate: F) -> Self {
        Self {
            name: name.into(),
            generate,
        }
    }
}

impl<F> Feeder for GeneratorFeeder<F>
where
    F: Fn(&mut ThreadRng) -> Fields + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn next(&self) -> Result<Record, FeederError> {
        Ok(Arc::new((self.generate)(&mut rand::rng())))
    }
}
