//! Deployment tests
//!
//! Runs rendered graphs through the deployer with the simulated provisioner
//! and checks how outputs flow into downstream parameters.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::*;
use pretty_assertions::assert_eq;

use vmcrypt::flows::{ade, sse, Template};
use vmcrypt::graph::Param;
use vmcrypt::provision::{Deployer, NodeReport, NodeStatus, SimulatedProvisioner};
use vmcrypt::render::DeploymentDocument;
use vmcrypt::resources::BuiltinRole;
use vmcrypt::Error;

fn recorder() -> Arc<RecordingProvisioner> {
    Arc::new(RecordingProvisioner::new(SimulatedProvisioner::new()))
}

fn output<'r>(report: &'r vmcrypt::provision::DeploymentReport, id: &str, field: &str) -> &'r str {
    report
        .node(id)
        .and_then(|n| n.outputs.as_ref())
        .and_then(|o| o.get_str(field))
        .unwrap_or_else(|| panic!("{} has no output {}", id, field))
}

#[tokio::test]
async fn test_identity_outputs_flow_into_vault_and_des() {
    let recorder = recorder();
    let report = Deployer::new(recorder.clone())
        .deploy(&template_graph())
        .await
        .unwrap();
    assert!(report.is_success());
    assert_eq!(report.created_count(), 8);
    assert_eq!(report.provisioner, "recording");

    let principal_id = output(&report, sse::IDENTITY, "principalId");
    let identity_id = output(&report, sse::IDENTITY, "resourceId");

    let vault = recorder.resolved(sse::KEY_VAULT).unwrap();
    assert_eq!(vault.param_str("roleAssignments/0/principalId"), Some(principal_id));

    let des = recorder.resolved(sse::DISK_ENCRYPTION_SET).unwrap();
    assert_eq!(
        des.param_str("managedIdentities/userAssignedResourceIds/0"),
        Some(identity_id)
    );
    assert_eq!(
        des.param_str("keyVaultResourceId"),
        Some(output(&report, sse::KEY_VAULT, "resourceId"))
    );

    let grants = recorder.inner.grants();
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].principal_id, principal_id);
    assert!(BuiltinRole::KEY_VAULT_CRYPTO_SERVICE_ENCRYPTION_USER.matches(&grants[0].role));
}

#[tokio::test]
async fn test_grant_precedes_disk_encryption_set() {
    let recorder = recorder();
    Deployer::new(recorder.clone())
        .deploy(&template_graph())
        .await
        .unwrap();

    let created = recorder.inner.created();
    let position = |id: &str| created.iter().position(|c| c == id).unwrap();
    assert!(position(sse::IDENTITY) < position(sse::KEY_VAULT));
    assert!(position(sse::KEY_VAULT) < position(sse::DISK_ENCRYPTION_SET));
    assert!(position(sse::DISK_ENCRYPTION_SET) < position(sse::VIRTUAL_MACHINE));
}

#[tokio::test]
async fn test_ade_vm_receives_vault_outputs() {
    let recorder = recorder();
    let report = Deployer::new(recorder.clone())
        .deploy(&template_graph())
        .await
        .unwrap();

    let vm = recorder.resolved(ade::VIRTUAL_MACHINE).unwrap();
    let settings = "extensionAzureDiskEncryptionConfig/settings";
    assert_eq!(
        vm.param_str(&format!("{}/KeyVaultURL", settings)),
        Some(output(&report, ade::KEY_VAULT, "uri"))
    );
    assert_eq!(
        vm.param_str(&format!("{}/KeyVaultResourceId", settings)),
        Some(output(&report, ade::KEY_VAULT, "resourceId"))
    );

    let key_uri = vm
        .param_str(&format!("{}/KeyEncryptionKeyURL", settings))
        .unwrap();
    let expected = output(
        &report,
        ade::KEY_VAULT,
        &format!("keys.{}.uriWithVersion", params().key_name),
    );
    assert_eq!(key_uri, expected);
    assert!(key_uri.starts_with("https://kv-vmAde.vault.azure.net/keys/"));

    assert_eq!(vm.param_str("adminPassword"), Some(PASSWORD));
    assert!(!format!("{:?}", vm).contains(PASSWORD));
}

#[tokio::test]
async fn test_failed_identity_skips_downstream() {
    let provisioner = Arc::new(SimulatedProvisioner::new().fail_on(sse::IDENTITY));
    let report = Deployer::new(provisioner.clone())
        .deploy(&template_graph())
        .await
        .unwrap();

    assert_eq!(report.failed_count(), 1);
    assert_eq!(report.skipped_count(), 3);
    assert_eq!(report.created_count(), 4);
    for id in [sse::KEY_VAULT, sse::DISK_ENCRYPTION_SET, sse::VIRTUAL_MACHINE] {
        let node = report.node(id).unwrap();
        assert_eq!(node.status, NodeStatus::Skipped);
        assert_eq!(
            node.error.as_deref(),
            Some("upstream resource 'sseIdentity' failed")
        );
    }
    assert_eq!(report.node(ade::VIRTUAL_MACHINE).unwrap().status, NodeStatus::Created);
    assert!(provisioner.grants().is_empty());

    let err = report.into_result().unwrap_err();
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test]
async fn test_unprotected_vault_rejected_by_provisioner() {
    let graph = edit_node(&template_graph(), sse::KEY_VAULT, |node| {
        *param_mut(&mut node.params, "enableSoftDelete") = Param::from(false);
    });
    let report = Deployer::new(Arc::new(SimulatedProvisioner::new()))
        .deploy(&graph)
        .await
        .unwrap();

    let des = report.node(sse::DISK_ENCRYPTION_SET).unwrap();
    assert_eq!(des.status, NodeStatus::Failed);
    assert!(des.error.as_deref().unwrap().contains("purge protection and soft delete"));
    assert_eq!(report.node(sse::VIRTUAL_MACHINE).unwrap().status, NodeStatus::Skipped);
    assert!(matches!(
        report.into_result(),
        Err(Error::DeploymentFailed { failed: 1, skipped: 1 })
    ));
}

#[tokio::test]
async fn test_missing_role_is_access_denied() {
    let graph = edit_node(&template_graph(), sse::KEY_VAULT, |node| {
        *param_mut(&mut node.params, "roleAssignments/0/roleDefinitionIdOrName") =
            Param::from("Key Vault Reader");
    });
    let report = Deployer::new(Arc::new(SimulatedProvisioner::new()))
        .deploy(&graph)
        .await
        .unwrap();
    let des = report.node(sse::DISK_ENCRYPTION_SET).unwrap();
    assert_eq!(des.status, NodeStatus::Failed);
    assert!(des.error.as_deref().unwrap().to_lowercase().contains("access denied"));
}

#[tokio::test]
async fn test_ade_vault_must_allow_disk_encryption() {
    let graph = edit_node(&template_graph(), ade::KEY_VAULT, |node| {
        *param_mut(&mut node.params, "enableVaultForDiskEncryption") = Param::from(false);
    });
    let report = Deployer::new(Arc::new(SimulatedProvisioner::new()))
        .deploy(&graph)
        .await
        .unwrap();
    let vm = report.node(ade::VIRTUAL_MACHINE).unwrap();
    assert_eq!(vm.status, NodeStatus::Failed);
    assert!(vm.error.as_deref().unwrap().contains("not enabled for disk encryption"));
}

#[tokio::test]
async fn test_ade_with_encryption_at_host_is_rejected() {
    let graph = edit_node(&template_graph(), ade::VIRTUAL_MACHINE, |node| {
        *param_mut(&mut node.params, "encryptionAtHost") = Param::from(true);
    });
    let report = Deployer::new(Arc::new(SimulatedProvisioner::new()))
        .deploy(&graph)
        .await
        .unwrap();

    let vm = report.node(ade::VIRTUAL_MACHINE).unwrap();
    assert_eq!(vm.status, NodeStatus::Failed);
    let error = vm.error.as_deref().unwrap();
    assert!(error.contains("rejected by the platform"));
    assert!(error.contains("cannot be combined with encryption at host"));
    assert!(vm.outputs.is_none());

    // Nothing reads the ADE VM, so the SSE chain in later waves still deploys.
    assert_eq!(report.skipped_count(), 0);
    assert_eq!(report.node(sse::VIRTUAL_MACHINE).unwrap().status, NodeStatus::Created);
    assert!(matches!(
        report.into_result(),
        Err(Error::DeploymentFailed { failed: 1, skipped: 0 })
    ));
}

#[tokio::test]
async fn test_check_mode_provisions_nothing() {
    let recorder = recorder();
    let report = Deployer::new(recorder.clone())
        .check_mode(true)
        .deploy(&template_graph())
        .await
        .unwrap();

    assert!(report.check_mode);
    assert_eq!(report.count(NodeStatus::Planned), 8);
    assert!(report.is_success());
    assert!(recorder.inner.created().is_empty());
    assert!(recorder.resolved(sse::KEY_VAULT).is_none());
    assert_eq!(
        output(&report, sse::IDENTITY, "principalId"),
        "<sseIdentity.outputs.principalId>"
    );
}

#[tokio::test]
async fn test_loaded_document_cannot_deploy_redacted_password() {
    let template = Template::new(params());
    let graph = template.render().unwrap();
    let json = DeploymentDocument::from_graph(&graph, Some(template.parameters()))
        .unwrap()
        .to_json()
        .unwrap();
    let loaded = DeploymentDocument::parse(&json).unwrap().into_graph().unwrap();

    let report = Deployer::new(Arc::new(SimulatedProvisioner::new()))
        .deploy(&loaded)
        .await
        .unwrap();
    assert_eq!(report.created_count(), 6);
    for id in [ade::VIRTUAL_MACHINE, sse::VIRTUAL_MACHINE] {
        let node = report.node(id).unwrap();
        assert_eq!(node.status, NodeStatus::Failed);
        assert!(node.error.as_deref().unwrap().contains("adminPassword"));
    }
}

#[tokio::test]
async fn test_second_deployment_collides_on_names() {
    let provisioner = Arc::new(SimulatedProvisioner::new());
    let graph = template_graph();
    let deployer = Deployer::new(provisioner.clone());

    assert!(deployer.deploy(&graph).await.unwrap().is_success());
    let second = deployer.deploy(&graph).await.unwrap();
    assert_eq!(second.failed_count(), 2);
    assert_eq!(second.skipped_count(), 6);
    assert_eq!(provisioner.created().len(), 8);
}

#[tokio::test]
async fn test_progress_reported_for_every_node() {
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let report = Deployer::new(Arc::new(
        SimulatedProvisioner::new().with_latency(Duration::from_millis(5)),
    ))
    .on_progress(Arc::new(move |_: &NodeReport| {
        counter.fetch_add(1, Ordering::SeqCst);
    }))
    .deploy(&template_graph())
    .await
    .unwrap();

    assert_eq!(seen.load(Ordering::SeqCst), 8);
    assert!(report.nodes.iter().all(|n| n.elapsed_ms >= 5));
    assert_eq!(report.nodes.iter().map(|n| n.wave).max(), Some(4));
}

#[tokio::test]
async fn test_subscription_id_in_resource_ids() {
    let subscription = "11111111-2222-3333-4444-555555555555";
    let report = Deployer::new(Arc::new(
        SimulatedProvisioner::new().with_subscription_id(subscription),
    ))
    .deploy(&template_graph())
    .await
    .unwrap();
    assert_eq!(
        output(&report, sse::RESOURCE_GROUP, "resourceId"),
        format!("/subscriptions/{}/resourceGroups/rg-vmSse", subscription)
    );
    assert!(output(&report, sse::DISK_ENCRYPTION_SET, "resourceId")
        .ends_with("/providers/Microsoft.Compute/diskEncryptionSets/des-vmSse"));
}
