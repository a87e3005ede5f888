//! Merging locally resolved versions into fetched model records.

use crate::catalog::{ModelRecord, ModelVersionRecord};
use std::collections::{BTreeMap, BTreeSet};

/// Models with local versions merged in, plus versions with no model to join.
#[derive(Debug, Clone, Default)]
pub struct MergeResult {
    pub models: Vec<ModelRecord>,
    pub unattached: Vec<ModelVersionRecord>,
}

/// Overwrite `model`'s entries with the local records, marking them present.
///
/// A version already listed is replaced in place and keeps its positional
/// `index`. A version the model does not list is appended.
pub fn merge_local_versions(
    model: &mut ModelRecord,
    local: impl IntoIterator<Item = ModelVersionRecord>,
) {
    for mut version in local {
        version.present_locally = true;

        match model.version_position(version.id) {
            Some(position) => {
                version.index = model.model_versions[position]
                    .index
                    .or(Some(position as u32));
                model.model_versions[position] = version;
            }
            None => {
                version.index = Some(model.model_versions.len() as u32);
                model.model_versions.push(version);
            }
        }
    }
}

/// Attach each local version to its model.
///
/// Versions whose model is not in `models` (not found, or not fetched) come
/// back in `unattached`, still marked present.
pub fn merge_catalog(
    models: BTreeMap<u64, ModelRecord>,
    local_versions: impl IntoIterator<Item = ModelVersionRecord>,
) -> MergeResult {
    let mut by_model: BTreeMap<u64, Vec<ModelVersionRecord>> = BTreeMap::new();
    let mut unattached = Vec::new();

    for mut version in local_versions {
        match version.model_id {
            Some(model_id) if models.contains_key(&model_id) => {
                by_model.entry(model_id).or_default().push(version);
            }
            _ => {
                version.present_locally = true;
                unattached.push(version);
            }
        }
    }

    let models = models
        .into_iter()
        .map(|(model_id, mut model)| {
            if let Some(versions) = by_model.remove(&model_id) {
                merge_local_versions(&mut model, versions);
            }
            model
        })
        .collect();

    MergeResult { models, unattached }
}

/// Versions newer than a locally present one, on the same base model, that
/// are not present themselves. Ordered newest first.
pub fn newer_versions(model: &ModelRecord) -> Vec<&ModelVersionRecord> {
    let mut seen = BTreeSet::new();
    let mut newer = Vec::new();

    for (position, local) in model.model_versions.iter().enumerate() {
        if !local.present_locally {
            continue;
        }

        for candidate in &model.model_versions[..position] {
            if !candidate.present_locally && candidate.same_base(local) && seen.insert(candidate.id) {
                newer.push(candidate);
            }
        }
    }

    newer.sort_by_key(|v| model.version_position(v.id));
    newer
}
