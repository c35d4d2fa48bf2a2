//! MlflowServer controller
//!
//! Watches MlflowServer resources, runs a charm pass against each one and
//! applies the result to the cluster.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::{
    api::{ListParams, Patch, PatchParams},
    runtime::{
        controller::{Action, Controller},
        watcher::Config as WatcherConfig,
    },
    Api, Client, ResourceExt,
};
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::{
    apply_descriptor, resolve_image_password, PassOutcome, ResourceModel, FIELD_MANAGER,
};
use crate::controllers::operator::{Event, Operator, POD_DEFAULTS_ENDPOINT};
use crate::controllers::Context;
use crate::crd::{MlflowServer, MlflowServerStatus, PublishedRelationData};
use crate::error::{Error, Result};
use crate::metrics;
use crate::settings::OperatorSettings;
use crate::status::UnitStatus;

const KIND: &str = "MlflowServer";

const READY_CONDITION: &str = "Ready";

/// Ready condition reason when the cluster rejects the workload
const APPLY_FAILED_REASON: &str = "ApplyFailed";

/// Run the MlflowServer controller
pub async fn run(client: Client, context: Arc<Context>) {
    let api: Api<MlflowServer> = Api::all(client.clone());

    // Verify CRD is installed
    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!("MlflowServer CRD not installed: {}", e);
        return;
    }

    info!("Starting MlflowServer controller");

    Controller::new(api, WatcherConfig::default())
        .owns(Api::<Deployment>::all(client.clone()), WatcherConfig::default())
        .owns(Api::<Service>::all(client.clone()), WatcherConfig::default())
        .owns(Api::<Secret>::all(client), WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, context)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    info!(
                        name = %obj.name,
                        namespace = obj.namespace.as_deref().unwrap_or("default"),
                        "Reconciled MlflowServer"
                    );
                }
                Err(e) => {
                    error!(error = %e, "Reconciliation error");
                    metrics::RECONCILIATION_ERRORS.with_label_values(&[KIND]).inc();
                }
            }
        })
        .await;
}

/// Main reconciliation function
#[instrument(skip(ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile(obj: Arc<MlflowServer>, ctx: Arc<Context>) -> Result<Action> {
    if let Some(action) = follower_action(&ctx.settings) {
        debug!("Not the leader, leaving resource to the leader replica");
        return Ok(action);
    }

    let _timer = metrics::RECONCILE_DURATION
        .with_label_values(&[KIND])
        .start_timer();
    metrics::RECONCILIATIONS.with_label_values(&[KIND]).inc();

    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());

    let image = resolve_image_password(&ctx.client, &namespace, obj.spec.image.as_ref()).await?;
    let mut snapshot = (*obj).clone();
    snapshot.spec.image = image;

    let outcome = run_pass(&snapshot, &ctx.settings);

    if let Some(descriptor) = &outcome.spec {
        if let Err(e) = apply_descriptor(&ctx.client, &obj, descriptor).await {
            let failed = UnitStatus::Waiting(format!("Failed to apply deployment descriptor: {}", e));
            metrics::record_unit_status(&namespace, &name, &failed);
            let report = StatusReport {
                status: &failed,
                reason: APPLY_FAILED_REASON,
                relation_data: &outcome.relation_data,
            };
            if let Err(status_err) = update_status(&obj, &ctx.client, &namespace, &report).await {
                warn!(error = %status_err, "Failed to record apply failure in status");
            }
            return Err(e);
        }
        metrics::DESCRIPTORS_APPLIED
            .with_label_values(&[&namespace, &name])
            .inc();
    }

    let status = outcome
        .status
        .clone()
        .unwrap_or_else(|| UnitStatus::Waiting("No status reported".to_string()));
    metrics::record_unit_status(&namespace, &name, &status);

    let report = StatusReport {
        status: &status,
        reason: status.phase(),
        relation_data: &outcome.relation_data,
    };
    update_status(&obj, &ctx.client, &namespace, &report).await?;

    Ok(requeue_for(&status))
}

/// What a follower replica does with a resource
///
/// Only the leader writes the shared status and applies the workload.
pub fn follower_action(settings: &OperatorSettings) -> Option<Action> {
    if settings.leader {
        None
    } else {
        Some(Action::await_change())
    }
}

/// Run the charm against a snapshot of the resource
///
/// The resource carries no event history, so each pass runs the main
/// handler followed by the pod-defaults handler for every pod-defaults
/// relation.
pub fn run_pass(obj: &MlflowServer, settings: &OperatorSettings) -> PassOutcome {
    let model = ResourceModel::new(obj, settings.leader);
    let mut operator = Operator::new(model, settings.requirements_path.clone());

    operator.handle(&Event::ConfigChanged);

    let pod_defaults: Vec<u32> = obj
        .spec
        .relations
        .iter()
        .filter(|r| r.name == POD_DEFAULTS_ENDPOINT)
        .map(|r| r.id)
        .collect();
    for relation_id in pod_defaults {
        operator.handle(&Event::PodDefaultsRelationChanged { relation_id });
    }

    operator.into_model().into_outcome()
}

/// How long to wait before the next pass
pub fn requeue_for(status: &UnitStatus) -> Action {
    match status {
        UnitStatus::Active => Action::requeue(Duration::from_secs(300)),
        UnitStatus::Waiting(_) => Action::requeue(Duration::from_secs(30)),
        UnitStatus::Blocked(_) => Action::await_change(),
    }
}

/// Status written after a pass
#[derive(Clone, Debug)]
pub struct StatusReport<'a> {
    pub status: &'a UnitStatus,
    /// Reason of the Ready condition
    pub reason: &'a str,
    pub relation_data: &'a [PublishedRelationData],
}

/// Status patch for a report, or `None` when the status already says it
///
/// The Ready condition keeps its transition time while its value is
/// unchanged, so an unchanged pass writes nothing.
pub fn status_patch(
    previous: Option<&MlflowServerStatus>,
    generation: Option<i64>,
    report: &StatusReport<'_>,
    now: DateTime<Utc>,
) -> Option<Value> {
    let phase = report.status.phase();
    let message = (!report.status.is_active()).then(|| report.status.message().to_string());
    let ready = if report.status.is_active() { "True" } else { "False" };

    let previous_ready = previous.and_then(|status| {
        status
            .conditions
            .iter()
            .find(|condition| condition.type_ == READY_CONDITION)
    });

    let unchanged = previous.is_some_and(|status| {
        status.phase.as_deref() == Some(phase)
            && status.message == message
            && status.observed_generation == generation
            && status.relation_data.as_slice() == report.relation_data
    }) && previous_ready.is_some_and(|condition| {
        condition.status == ready && condition.reason.as_deref() == Some(report.reason)
    });
    if unchanged {
        return None;
    }

    let last_transition_time = previous_ready
        .filter(|condition| condition.status == ready)
        .map(|condition| condition.last_transition_time)
        .unwrap_or(now);

    Some(json!({
        "status": {
            "phase": phase,
            "message": message,
            "observedGeneration": generation,
            "relationData": report.relation_data,
            "conditions": [{
                "type": READY_CONDITION,
                "status": ready,
                "lastTransitionTime": last_transition_time,
                "reason": report.reason,
                "message": report.status.message(),
            }]
        }
    }))
}

async fn update_status(
    obj: &MlflowServer,
    client: &Client,
    namespace: &str,
    report: &StatusReport<'_>,
) -> Result<()> {
    let name = obj.name_any();

    if !report.status.is_active() {
        warn!(
            name = %name,
            phase = report.status.phase(),
            message = report.status.message(),
            "Unit is not active"
        );
    }

    let Some(patch) = status_patch(
        obj.status.as_ref(),
        obj.metadata.generation,
        report,
        Utc::now(),
    ) else {
        debug!(name = %name, "Status unchanged");
        return Ok(());
    };

    let api: Api<MlflowServer> = Api::namespaced(client.clone(), namespace);
    api.patch_status(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
        .await?;

    Ok(())
}

/// Error policy for the controller
fn error_policy(obj: Arc<MlflowServer>, error: &Error, _ctx: Arc<Context>) -> Action {
    let name = obj.name_any();
    error!(
        name = %name,
        error = %error,
        "Reconciliation failed, scheduling retry"
    );

    let requeue_duration = match error {
        Error::Kube(_) => Duration::from_secs(30),
        Error::Config(_) | Error::Validation(_) => Duration::from_secs(300),
        _ => Duration::from_secs(30),
    };

    Action::requeue(requeue_duration)
}
