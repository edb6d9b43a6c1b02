// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! File content replication.
//!
//! File remotes point at a manifest, not a directory. The manifest's file
//! name lives on the upstream repository (or publication), so deriving the
//! source URL costs one upstream lookup per content-serving record.

use super::{base_sync_params, Replicator};
use crate::error::ReplicaError;
use crate::jobs::BoxFuture;
use crate::model::{ContentSource, Fields, Remote, Repository, UpstreamDistribution};
use crate::upstream::UpstreamApi;
use serde_json::{json, Value};

/// Strategy for the `file` backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileReplicator;

/// File name part of a manifest URL: everything after the last `/`.
pub fn manifest_name(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

impl Replicator for FileReplicator {
    fn backend_label(&self) -> &'static str {
        "file"
    }

    fn entity_kind_name(&self) -> &'static str {
        "file"
    }

    fn distribution_serializer(&self) -> &'static str {
        "FileDistributionSerializer"
    }

    fn sync_task_name(&self) -> &'static str {
        "pulp_file.app.tasks.synchronize"
    }

    fn source_url<'a>(
        &'a self,
        api: &'a dyn UpstreamApi,
        record: &'a UpstreamDistribution,
    ) -> BoxFuture<'a, Option<String>> {
        Box::pin(async move {
            let href = match record.content_source() {
                ContentSource::Repository(href) | ContentSource::Publication(href) => href,
                ContentSource::None => return Ok(None),
            };

            let entity = api.get_entity(href).await?;
            let manifest = entity
                .get("manifest")
                .and_then(Value::as_str)
                .filter(|m| !m.is_empty())
                .ok_or_else(|| ReplicaError::upstream_msg("get_entity", format!("{} has no manifest", href)))?;

            Ok(Some(format!("{}{}", record.base_url, manifest)))
        })
    }

    fn repository_extra_fields(&self, remote: &Remote) -> Fields {
        let mut fields = Fields::new();
        fields.insert("manifest".to_string(), json!(manifest_name(&remote.url)));
        fields.insert("autopublish".to_string(), json!(true));
        fields
    }

    fn sync_job_params(&self, repository: &Repository) -> Fields {
        let mut params = base_sync_params(repository);
        params.insert("mirror".to_string(), json!(true));
        params
    }
}
