//! Markdown rendering of the synchronized catalog.
//!
//! Produces `index.md` plus one `model-<id>.md` per model. Templates are
//! embedded; records are passed to them with their catalog (camelCase)
//! field names.

use crate::catalog::{ModelRecord, ModelVersionRecord};
use crate::error::{FetcherError, Result};
use crate::sync::{newer_versions, SyncOutcome};
use minijinja::{context, Environment};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

const INDEX_TEMPLATE: &str = r#"# Local models

{% if models %}| Model | Type | Local versions | Newer versions |
|---|---|---|---|
{% for entry in models %}| [{{ entry.model.name }}](model-{{ entry.model.id }}.md) | {{ entry.model.type }} | {{ entry.present | join(", ") }} | {% if entry.newer %}{{ entry.newer | join(", ") }}{% else %}-{% endif %} |
{% endfor %}{% else %}No models resolved.
{% endif %}
{%- if unattached %}
## Versions without a fetched model

{% for version in unattached %}- {{ version.name }} (version {{ version.id }}{% if version.modelId %}, model {{ version.modelId }}{% endif %}, {{ version.baseModel }})
{% endfor %}{% endif %}
{%- if orphans %}
## Versions without a parent model

{% for version in orphans %}- {{ version.name }} (version {{ version.id }}, {{ version.baseModel }})
{% endfor %}{% endif %}"#;

const MODEL_TEMPLATE: &str = r#"# {{ model.name }}

- Type: {{ model.type }}
{% if model.creator %}- Creator: {{ model.creator.username }}
{% endif %}- Downloads: {{ model.stats.downloadCount }}
{% if model.tags %}- Tags: {{ model.tags | join(", ") }}
{% endif %}
## Versions

| # | Version | Base model | Published | Local |
|---|---|---|---|---|
{% for version in model.modelVersions %}| {{ version.index if version.index is defined else loop.index0 }} | {{ version.name }} | {{ version.baseModel }}{% if version.baseModelType %} ({{ version.baseModelType }}){% endif %} | {{ version.publishedAt or "-" }} | {% if version.presentLocally %}yes{% endif %} |
{% endfor %}
{%- for version in model.modelVersions if version.presentLocally %}
### {{ version.name }}
{% if version.trainedWords %}
Trigger words: {{ version.trainedWords | join(", ") }}
{% endif %}
{% for file in version.files %}- `{{ file.name }}` ({{ file.type }}, {{ (file.sizeKB / 1024) | round(1) }} MB{% if file.metadata.fp %}, {{ file.metadata.fp }}{% endif %})
{% endfor %}{% endfor %}
{%- if newer %}
## Newer versions available

{% for version in newer %}- {{ version.name }} ({{ version.baseModel }})
{% endfor %}{% endif %}"#;

#[derive(Serialize)]
struct IndexEntry<'a> {
    model: &'a ModelRecord,
    present: Vec<&'a str>,
    newer: Vec<&'a str>,
}

fn environment() -> Result<Environment<'static>> {
    let mut env = Environment::new();
    env.add_template("index.md", INDEX_TEMPLATE)?;
    env.add_template("model.md", MODEL_TEMPLATE)?;
    Ok(env)
}

/// Render the index page.
pub fn render_index(
    models: &[ModelRecord],
    unattached: &[ModelVersionRecord],
    orphans: &[ModelVersionRecord],
) -> Result<String> {
    let entries: Vec<IndexEntry<'_>> = models
        .iter()
        .map(|model| IndexEntry {
            model,
            present: model.present_versions().map(|v| v.name.as_str()).collect(),
            newer: newer_versions(model).into_iter().map(|v| v.name.as_str()).collect(),
        })
        .collect();

    let env = environment()?;
    let rendered = env.get_template("index.md")?.render(context! {
        models => entries,
        unattached => unattached,
        orphans => orphans,
    })?;
    Ok(rendered)
}

/// Render one model page.
pub fn render_model(model: &ModelRecord) -> Result<String> {
    let env = environment()?;
    let rendered = env.get_template("model.md")?.render(context! {
        model => model,
        newer => newer_versions(model),
    })?;
    Ok(rendered)
}

/// Write `index.md` and every `model-<id>.md` into `dir`.
///
/// Returns the paths written.
pub fn write_site(dir: &Path, outcome: &SyncOutcome) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).map_err(|e| FetcherError::io_with_path(e, dir))?;
    let mut written = Vec::with_capacity(outcome.models.len() + 1);

    let index_path = dir.join("index.md");
    let index = render_index(
        &outcome.models,
        &outcome.unattached_versions,
        &outcome.orphan_versions,
    )?;
    fs::write(&index_path, index).map_err(|e| FetcherError::io_with_path(e, &index_path))?;
    written.push(index_path);

    for model in &outcome.models {
        let path = dir.join(format!("model-{}.md", model.id));
        fs::write(&path, render_model(model)?).map_err(|e| FetcherError::io_with_path(e, &path))?;
        written.push(path);
    }

    info!("Rendered {} pages into {}", written.len(), dir.display());
    Ok(written)
}
