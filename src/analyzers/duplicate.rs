use std::collections::HashMap;
use std::path::{Path, PathBuf};
use log::{info, warn};
use serde::Serialize;
use crate::{AudioRecord, ContentHash};

/// Paths sharing one content hash. Always at least two members.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateGroup {
    pub hash: ContentHash,
    /// First member in scan order; the only one exported.
    pub keeper: PathBuf,
    pub duplicates: Vec<PathBuf>,
}

impl DuplicateGroup {
    pub fn len(&self) -> usize {
        1 + self.duplicates.len()
    }
}

/// Hashes that must not be exported again, each with the one path that is
/// still allowed through.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SkipSet {
    keepers: HashMap<ContentHash, PathBuf>,
}

impl SkipSet {
    pub fn contains_hash(&self, hash: &ContentHash) -> bool {
        self.keepers.contains_key(hash)
    }

    pub fn keeper_for(&self, hash: &ContentHash) -> Option<&Path> {
        self.keepers.get(hash).map(PathBuf::as_path)
    }

    /// True when `record` repeats content whose keeper is another path.
    pub fn should_skip(&self, record: &AudioRecord) -> bool {
        self.keepers
            .get(&record.content_hash)
            .is_some_and(|keeper| keeper != &record.path)
    }

    pub fn len(&self) -> usize {
        self.keepers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keepers.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DuplicateResults {
    /// Groups in order of their keeper's scan position.
    pub groups: Vec<DuplicateGroup>,
    pub skip: SkipSet,
    pub total_files_scanned: usize,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DuplicateAnalyzer;

impl DuplicateAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Partition `records` by content hash. The keeper of each group is its
    /// first member in the given order. No I/O.
    pub fn find_duplicates(&self, records: &[AudioRecord]) -> DuplicateResults {
        let mut order: Vec<&ContentHash> = Vec::new();
        let mut by_hash: HashMap<&ContentHash, Vec<&Path>> = HashMap::new();
        for record in records {
            let members = by_hash.entry(&record.content_hash).or_default();
            if members.is_empty() {
                order.push(&record.content_hash);
            }
            members.push(&record.path);
        }

        let mut groups = Vec::new();
        let mut skip = SkipSet::default();
        for hash in order {
            let members = &by_hash[hash];
            let Some((keeper, rest)) = members.split_first() else {
                continue;
            };
            if rest.is_empty() {
                continue;
            }
            skip.keepers.insert(hash.clone(), keeper.to_path_buf());
            groups.push(DuplicateGroup {
                hash: hash.clone(),
                keeper: keeper.to_path_buf(),
                duplicates: rest.iter().map(|p| p.to_path_buf()).collect(),
            });
        }

        for group in &groups {
            warn!(
                "Duplicate content {}: keeping {}, skipping {}",
                &group.hash.as_str()[..12.min(group.hash.as_str().len())],
                group.keeper.display(),
                group
                    .duplicates
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        info!("Found {} duplicate groups among {} files", groups.len(), records.len());

        DuplicateResults {
            groups,
            skip,
            total_files_scanned: records.len(),
        }
    }
}
