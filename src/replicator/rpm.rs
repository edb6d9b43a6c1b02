// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! RPM content replication.

use super::{base_sync_params, Replicator};
use crate::jobs::BoxFuture;
use crate::model::{Fields, Remote, Repository, UpstreamDistribution};
use crate::upstream::UpstreamApi;
use serde_json::json;

/// Strategy for the `rpm` backend.
///
/// An RPM distribution's `base_url` is already a repository root, so no
/// upstream lookup is needed to derive the source URL.
#[derive(Debug, Clone, Copy, Default)]
pub struct RpmReplicator;

impl Replicator for RpmReplicator {
    fn backend_label(&self) -> &'static str {
        "rpm"
    }

    fn entity_kind_name(&self) -> &'static str {
        "rpm"
    }

    fn distribution_serializer(&self) -> &'static str {
        "RpmDistributionSerializer"
    }

    fn sync_task_name(&self) -> &'static str {
        "pulp_rpm.app.tasks.synchronize"
    }

    fn source_url<'a>(
        &'a self,
        _api: &'a dyn UpstreamApi,
        record: &'a UpstreamDistribution,
    ) -> BoxFuture<'a, Option<String>> {
        Box::pin(async move { Ok(record.serves_content().then(|| record.base_url.clone())) })
    }

    fn remote_extra_fields(&self, _record: &UpstreamDistribution) -> Fields {
        let mut fields = Fields::new();
        fields.insert("policy".to_string(), json!("immediate"));
        fields
    }

    fn repository_extra_fields(&self, _remote: &Remote) -> Fields {
        let mut fields = Fields::new();
        fields.insert("autopublish".to_string(), json!(true));
        fields
    }

    fn sync_job_params(&self, repository: &Repository) -> Fields {
        let mut params = base_sync_params(repository);
        params.insert("sync_policy".to_string(), json!("mirror_content_only"));
        params.insert("optimize".to_string(), json!(true));
        params.insert("skip_types".to_string(), json!([]));
        params
    }
}
