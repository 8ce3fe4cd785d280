//! K-fold partitioning of a dataset into per-fold trainer caches.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fw_types::{config_error, ConfigMap, FwError, FwResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::builder::DatasetCacheBuilder;
use crate::source::DatasetSource;

/// Which side of a fold a line lands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FoldRole {
    Train,
    Test,
}

impl FoldRole {
    /// Line `index` is held out in fold `index % folds` and trains every other fold.
    pub fn contains(self, index: usize, fold: usize, folds: usize) -> bool {
        let held_out = index % folds == fold;
        match self {
            Self::Test => held_out,
            Self::Train => !held_out,
        }
    }
}

impl fmt::Display for FoldRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Train => write!(f, "train"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// Logical cache names for one fold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoldCaches {
    pub train: String,
    pub test: String,
}

/// Fold index to cache names, as handed to the evaluation loop.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FoldTable {
    folds: BTreeMap<usize, FoldCaches>,
}

impl FoldTable {
    pub fn get(&self, fold: usize) -> Option<&FoldCaches> {
        self.folds.get(&fold)
    }

    pub fn len(&self) -> usize {
        self.folds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folds.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &FoldCaches)> {
        self.folds.iter().map(|(fold, caches)| (*fold, caches))
    }

    /// Every logical name in the table, train before test, by fold.
    pub fn names(&self) -> Vec<&str> {
        self.folds
            .values()
            .flat_map(|c| [c.train.as_str(), c.test.as_str()])
            .collect()
    }

    pub fn into_inner(self) -> BTreeMap<usize, FoldCaches> {
        self.folds
    }
}

/// Train and test line indices for every fold.
///
/// Assignment is purely positional (`index % folds`). Input that is sorted or
/// grouped (say, by label) yields folds that inherit that structure; shuffle
/// upstream if that matters.
pub fn fold_assignments(len: usize, folds: usize) -> FwResult<Vec<(Vec<usize>, Vec<usize>)>> {
    check_folds(folds)?;
    Ok((0..folds)
        .map(|fold| {
            (0..len).partition::<Vec<_>, _>(|&i| FoldRole::Train.contains(i, fold, folds))
        })
        .collect())
}

fn check_folds(folds: usize) -> FwResult<()> {
    if folds <= 1 {
        return Err(config_error!(
            "k-fold needs at least 2 folds, got {folds}: a single fold has no held-out test set"
        ));
    }
    Ok(())
}

/// A dataset with its line indices fixed once.
///
/// Every fold and role reads the same immutable snapshot, so fold
/// membership cannot drift between partition decisions. Lines are kept as
/// raw bytes without their `\n` terminator.
#[derive(Debug, Clone)]
pub struct EnumeratedDataset {
    lines: Arc<[Vec<u8>]>,
}

impl EnumeratedDataset {
    pub fn from_source(source: DatasetSource) -> FwResult<Self> {
        Ok(Self::from(source.into_records()?))
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn line(&self, index: usize) -> Option<&[u8]> {
        self.lines.get(index).map(Vec::as_slice)
    }

    /// Lines of one side of a fold, in original order.
    pub fn split(&self, role: FoldRole, fold: usize, folds: usize) -> FoldLines {
        FoldLines {
            lines: Arc::clone(&self.lines),
            cursor: 0,
            role,
            fold,
            folds,
        }
    }
}

impl From<Vec<Vec<u8>>> for EnumeratedDataset {
    fn from(lines: Vec<Vec<u8>>) -> Self {
        Self {
            lines: lines.into(),
        }
    }
}

impl From<Vec<String>> for EnumeratedDataset {
    fn from(lines: Vec<String>) -> Self {
        lines
            .into_iter()
            .map(String::into_bytes)
            .collect::<Vec<_>>()
            .into()
    }
}

/// Iterator over one fold side of an [`EnumeratedDataset`].
#[derive(Debug, Clone)]
pub struct FoldLines {
    lines: Arc<[Vec<u8>]>,
    cursor: usize,
    role: FoldRole,
    fold: usize,
    folds: usize,
}

impl FoldLines {
    /// The selected lines as a `\n`-terminated byte stream.
    pub fn into_reader(self) -> FoldReader {
        FoldReader {
            lines: self,
            pending: Vec::new(),
            offset: 0,
        }
    }
}

impl Iterator for FoldLines {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        while self.cursor < self.lines.len() {
            let index = self.cursor;
            self.cursor += 1;
            if self.role.contains(index, self.fold, self.folds) {
                return Some(self.lines[index].clone());
            }
        }
        None
    }
}

/// Streams one fold side without building it up in memory.
#[derive(Debug)]
pub struct FoldReader {
    lines: FoldLines,
    pending: Vec<u8>,
    offset: usize,
}

impl Read for FoldReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.offset == self.pending.len() {
            match self.lines.next() {
                Some(mut line) => {
                    line.push(b'\n');
                    self.pending = line;
                    self.offset = 0;
                }
                None => return Ok(0),
            }
        }
        let n = (&self.pending[self.offset..]).read(buf)?;
        self.offset += n;
        Ok(n)
    }
}

/// Drives cache generation for every fold of a dataset.
#[derive(Debug, Clone)]
pub struct KFoldPartitioner {
    builder: DatasetCacheBuilder,
    run_prefix: String,
    cancel: Option<Arc<AtomicBool>>,
}

impl KFoldPartitioner {
    /// Partitioner with a fresh run prefix, so concurrent runs never share names.
    pub fn new(builder: DatasetCacheBuilder) -> Self {
        Self {
            builder,
            run_prefix: Uuid::new_v4().simple().to_string(),
            cancel: None,
        }
    }

    pub fn with_run_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.run_prefix = prefix.into();
        self
    }

    /// Stop before the next fold once `flag` is set.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn run_prefix(&self) -> &str {
        &self.run_prefix
    }

    pub fn builder(&self) -> &DatasetCacheBuilder {
        &self.builder
    }

    pub fn cache_name(&self, fold: usize, role: FoldRole) -> String {
        format!("{}-fold{}-{}", self.run_prefix, fold, role)
    }

    /// Build train and test caches for each of `folds` folds.
    ///
    /// Either every fold succeeds and the full table is returned, or the
    /// first error is returned and the caches this call already registered
    /// are withdrawn.
    pub fn k_fold(
        &self,
        dataset: DatasetSource,
        folds: usize,
        config: &ConfigMap,
    ) -> FwResult<FoldTable> {
        check_folds(folds)?;
        let enumerated = EnumeratedDataset::from_source(dataset)?;
        self.k_fold_enumerated(&enumerated, folds, config)
    }

    /// Same as [`k_fold`](Self::k_fold) over an already enumerated dataset.
    pub fn k_fold_enumerated(
        &self,
        dataset: &EnumeratedDataset,
        folds: usize,
        config: &ConfigMap,
    ) -> FwResult<FoldTable> {
        check_folds(folds)?;
        info!(
            "Starting {}-fold cache build for run {} ({} lines, {} registry)",
            folds,
            self.run_prefix,
            dataset.len(),
            self.builder.registry().strategy()
        );

        let mut produced: Vec<String> = Vec::with_capacity(folds * 2);
        match self.build_folds(dataset, folds, config, &mut produced) {
            Ok(table) => {
                info!(
                    "Finished {}-fold cache build for run {}",
                    folds, self.run_prefix
                );
                Ok(table)
            }
            Err(e) => {
                warn!(
                    "Fold cache build for run {} failed, withdrawing {} caches: {}",
                    self.run_prefix,
                    produced.len(),
                    e
                );
                self.withdraw(&produced);
                Err(e)
            }
        }
    }

    fn build_folds(
        &self,
        dataset: &EnumeratedDataset,
        folds: usize,
        config: &ConfigMap,
        produced: &mut Vec<String>,
    ) -> FwResult<FoldTable> {
        let mut table = FoldTable::default();
        for fold in 0..folds {
            if self.is_cancelled() {
                return Err(FwError::Cancelled { fold });
            }
            debug!("Building fold {}/{} for run {}", fold + 1, folds, self.run_prefix);

            let train = self.build_role(dataset, FoldRole::Train, fold, folds, config)?;
            produced.push(train.clone());
            let test = self.build_role(dataset, FoldRole::Test, fold, folds, config)?;
            produced.push(test.clone());

            table.folds.insert(fold, FoldCaches { train, test });
        }
        Ok(table)
    }

    fn build_role(
        &self,
        dataset: &EnumeratedDataset,
        role: FoldRole,
        fold: usize,
        folds: usize,
        config: &ConfigMap,
    ) -> FwResult<String> {
        let lines = dataset.split(role, fold, folds);
        self.builder.build_cache(
            DatasetSource::from_reader(lines.into_reader()),
            &self.cache_name(fold, role),
            config,
        )
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    fn withdraw(&self, names: &[String]) {
        let registry = self.builder.registry();
        for name in names {
            if let Err(e) = registry.remove(name) {
                warn!("Failed to withdraw cache {}: {}", name, e);
            }
        }
    }
}
