// Canonical naming for partitioned writes
//
// A partitioned write leaves `<dir>/<key>=<value>/<random part name>` objects.
// Each one is copied to `<dir>/<value>.csv` and then removed along with its
// staging directory. The listing is taken once and acted on object by object,
// so a single writer per prefix is assumed. Objects that are not inside a
// `key=value` directory are already canonical and left alone, which makes a
// second pass over the same prefix a no-op. A value with more than one staged
// part is ambiguous and is left for the writer to clear.

use crate::core::constants::CSV_EXTENSION;
use crate::core::storage::{join_key, parent_key, StorageBackend};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Outcome of one normalization pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizeReport {
    pub renamed: Vec<String>,
    pub skipped: usize,
    pub warnings: Vec<String>,
}

impl NormalizeReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    fn warn(&mut self, message: String) {
        warn!("{}", message);
        self.warnings.push(message);
    }
}

/// Canonical key for a staged object, or `None` if it is already canonical.
pub fn canonical_key(path: &str) -> Option<String> {
    let parent = parent_key(path);
    let dir_name = parent.rsplit('/').next().unwrap_or(parent);
    let (_key, value) = dir_name.split_once('=')?;
    if value.is_empty() {
        return None;
    }
    let file = format!("{}{}", value, CSV_EXTENSION);
    Some(join_key(&[parent_key(parent), &file]))
}

/// Rename every staged object under `prefix` to its canonical key.
///
/// Storage failures on individual objects are logged and reported, never
/// returned: a stale staging object is picked up again by the next run.
pub async fn normalize<S>(storage: &S, prefix: &str) -> NormalizeReport
where
    S: StorageBackend + ?Sized,
{
    let mut report = NormalizeReport::default();

    let objects = match storage.list(prefix).await {
        Ok(objects) => objects,
        Err(e) => {
            report.warn(format!("Listing {} failed: {}", prefix, e));
            return report;
        }
    };

    let mut staged: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for object in objects {
        match canonical_key(&object.path) {
            Some(target) => staged.entry(target).or_default().push(object.path),
            None => report.skipped += 1,
        }
    }

    let mut staging_dirs = BTreeSet::new();

    for (target, sources) in staged {
        // Two parts for one value cannot both be the canonical file
        let [source] = sources.as_slice() else {
            report.warn(format!(
                "{} staged parts for {}, leaving them in place: {}",
                sources.len(),
                target,
                sources.join(", ")
            ));
            continue;
        };

        if let Err(e) = storage.copy(source, &target).await {
            // Leave the source in place so the next run retries it
            report.warn(format!("Copy {} -> {} failed: {}", source, target, e));
            continue;
        }
        debug!("Renamed {} -> {}", source, target);

        if let Err(e) = storage.delete(source).await {
            report.warn(format!("Delete of {} failed: {}", source, e));
        }

        staging_dirs.insert(parent_key(source).to_string());
        report.renamed.push(target);
    }

    // Only after every copy for this dataset is in place
    for dir in staging_dirs {
        if let Err(e) = storage.delete(&dir).await {
            report.warn(format!("Removing staging node {} failed: {}", dir, e));
        }
    }

    info!(
        "Normalized {}: {} renamed, {} already canonical, {} warnings",
        prefix,
        report.renamed.len(),
        report.skipped,
        report.warnings.len()
    );
    report
}
