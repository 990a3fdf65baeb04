//! Encryption rules.
//!
//! Every check works from the graph alone, so it applies equally to freshly
//! rendered templates and to documents loaded back from disk.

use std::collections::HashMap;

use super::types::{Finding, Rule, Severity};
use crate::graph::{DanglingReason, OutputRef, Param, ResourceGraph, ResourceNode};
use crate::resources::disk_encryption_set::identity_refs;
use crate::resources::key_vault::{key_names, key_uri_with_version};
use crate::resources::virtual_machine::{
    ade_extension_settings, disk_encryption_set_refs, encryption_at_host,
};
use crate::resources::{BuiltinRole, ResourceKind};

pub const CMK_VAULT_PROTECTION: Rule = Rule {
    id: "ENC001",
    name: "cmk-vault-protection",
    severity: Severity::Critical,
    description: "Key vaults backing a disk encryption set have purge protection and soft delete enabled",
};

pub const ADE_WITHOUT_HOST_ENCRYPTION: Rule = Rule {
    id: "ENC002",
    name: "ade-without-encryption-at-host",
    severity: Severity::Error,
    description: "VMs with the ADE extension have encryptionAtHost disabled",
};

pub const SSE_WITH_HOST_ENCRYPTION: Rule = Rule {
    id: "ENC003",
    name: "sse-requires-encryption-at-host",
    severity: Severity::Error,
    description: "VMs whose disks use a disk encryption set have encryptionAtHost enabled",
};

pub const ADE_SINGLE_VAULT: Rule = Rule {
    id: "ENC004",
    name: "ade-single-vault",
    severity: Severity::Error,
    description: "ADE extension settings point at one key vault and one of its keys",
};

pub const SSE_CONSISTENT_DISKS: Rule = Rule {
    id: "ENC005",
    name: "sse-consistent-disk-encryption-set",
    severity: Severity::Error,
    description: "Every disk of an SSE VM references the same disk encryption set",
};

pub const DES_IDENTITY_ROLE: Rule = Rule {
    id: "ENC006",
    name: "des-identity-role",
    severity: Severity::Critical,
    description: "The disk encryption set identity holds the crypto service encryption role on its vault",
};

pub const UNIQUE_NAMES_ACYCLIC: Rule = Rule {
    id: "ENC007",
    name: "unique-names-and-acyclic",
    severity: Severity::Error,
    description: "Resource names are unique per kind and scope, and the graph has no cycles",
};

pub const DECLARED_OUTPUTS: Rule = Rule {
    id: "ENC008",
    name: "declared-output-references",
    severity: Severity::Error,
    description: "Every reference targets an existing node and a declared output",
};

/// All rules, in the order they run.
pub static ALL_RULES: [Rule; 8] = [
    CMK_VAULT_PROTECTION,
    ADE_WITHOUT_HOST_ENCRYPTION,
    SSE_WITH_HOST_ENCRYPTION,
    ADE_SINGLE_VAULT,
    SSE_CONSISTENT_DISKS,
    DES_IDENTITY_ROLE,
    UNIQUE_NAMES_ACYCLIC,
    DECLARED_OUTPUTS,
];

/// Run one rule against a graph.
pub(super) fn check(rule: &Rule, graph: &ResourceGraph) -> Vec<Finding> {
    match rule.id {
        "ENC001" => check_cmk_vault_protection(graph),
        "ENC002" => check_ade_without_host_encryption(graph),
        "ENC003" => check_sse_with_host_encryption(graph),
        "ENC004" => check_ade_single_vault(graph),
        "ENC005" => check_sse_consistent_disks(graph),
        "ENC006" => check_des_identity_role(graph),
        "ENC007" => check_unique_names_acyclic(graph),
        "ENC008" => check_declared_outputs(graph),
        _ => Vec::new(),
    }
}

/// The key vault node a disk encryption set reads its key from.
fn des_vault<'g>(graph: &'g ResourceGraph, des: &ResourceNode) -> Option<&'g ResourceNode> {
    des.params
        .get("keyVaultResourceId")
        .and_then(Param::as_ref_target)
        .and_then(|r| graph.producer(r))
        .filter(|n| n.kind == ResourceKind::KeyVault)
}

fn check_cmk_vault_protection(graph: &ResourceGraph) -> Vec<Finding> {
    let rule = &CMK_VAULT_PROTECTION;
    let mut findings = Vec::new();

    for des in graph.nodes_of_kind(ResourceKind::DiskEncryptionSet) {
        let Some(vault_param) = des.params.get("keyVaultResourceId") else {
            findings.push(
                Finding::new(rule, Some(&des.id), "disk encryption set has no keyVaultResourceId")
                    .with_severity(Severity::Error),
            );
            continue;
        };
        let Some(reference) = vault_param.as_ref_target() else {
            findings.push(
                Finding::new(
                    rule,
                    Some(&des.id),
                    "keyVaultResourceId is a literal, vault protection cannot be verified",
                )
                .with_severity(Severity::Warning),
            );
            continue;
        };
        let Some(vault) = graph.producer(reference) else {
            // Reported by ENC008.
            continue;
        };
        if vault.kind != ResourceKind::KeyVault {
            findings.push(
                Finding::new(
                    rule,
                    Some(&des.id),
                    format!("keyVaultResourceId references {} ({}), not a key vault", vault.id, vault.kind),
                )
                .with_severity(Severity::Error),
            );
            continue;
        }

        for flag in ["enablePurgeProtection", "enableSoftDelete"] {
            if vault.params.get(flag).and_then(Param::as_bool) != Some(true) {
                findings.push(
                    Finding::new(
                        rule,
                        Some(&vault.id),
                        format!(
                            "{} backs disk encryption set {} but {} is not true",
                            vault.name, des.name, flag
                        ),
                    )
                    .with_suggestion(format!("set {} = true on {}", flag, vault.id)),
                );
            }
        }
    }
    findings
}

fn check_ade_without_host_encryption(graph: &ResourceGraph) -> Vec<Finding> {
    graph
        .nodes_of_kind(ResourceKind::VirtualMachine)
        .filter(|vm| ade_extension_settings(vm).is_some())
        .filter(|vm| encryption_at_host(vm) != Some(false))
        .map(|vm| {
            Finding::new(
                &ADE_WITHOUT_HOST_ENCRYPTION,
                Some(&vm.id),
                format!(
                    "{} enables the ADE extension but encryptionAtHost is not false",
                    vm.name
                ),
            )
            .with_suggestion("ADE and encryption at host cannot be combined, set encryptionAtHost = false")
        })
        .collect()
}

fn check_sse_with_host_encryption(graph: &ResourceGraph) -> Vec<Finding> {
    graph
        .nodes_of_kind(ResourceKind::VirtualMachine)
        .filter(|vm| {
            disk_encryption_set_refs(vm)
                .iter()
                .any(|(_, des)| des.is_some())
        })
        .filter(|vm| encryption_at_host(vm) != Some(true))
        .map(|vm| {
            Finding::new(
                &SSE_WITH_HOST_ENCRYPTION,
                Some(&vm.id),
                format!(
                    "{} uses a disk encryption set but encryptionAtHost is not true",
                    vm.name
                ),
            )
            .with_suggestion("set encryptionAtHost = true")
        })
        .collect()
}

fn check_ade_single_vault(graph: &ResourceGraph) -> Vec<Finding> {
    let rule = &ADE_SINGLE_VAULT;
    let mut findings = Vec::new();

    for vm in graph.nodes_of_kind(ResourceKind::VirtualMachine) {
        let Some(settings) = ade_extension_settings(vm) else {
            continue;
        };

        let mut vaults: Vec<&str> = Vec::new();
        for (setting, output) in [
            ("KeyVaultResourceId", "resourceId"),
            ("KekVaultResourceId", "resourceId"),
            ("KeyVaultURL", "uri"),
        ] {
            match settings.get(setting).and_then(Param::as_ref_target) {
                Some(r) if r.output == output => vaults.push(&r.node),
                Some(r) => findings.push(Finding::new(
                    rule,
                    Some(&vm.id),
                    format!("{} reads {}, expected the vault's {} output", setting, r, output),
                )),
                None => findings.push(Finding::new(
                    rule,
                    Some(&vm.id),
                    format!("{} must reference a key vault {} output", setting, output),
                )),
            }
        }

        vaults.sort_unstable();
        vaults.dedup();
        let vault = match vaults.as_slice() {
            [single] => graph.node(single),
            [] => None,
            many => {
                findings.push(Finding::new(
                    rule,
                    Some(&vm.id),
                    format!("ADE settings reference different vaults: {}", many.join(", ")),
                ));
                None
            }
        };
        if let Some(vault) = vault.filter(|v| v.kind != ResourceKind::KeyVault) {
            findings.push(Finding::new(
                rule,
                Some(&vm.id),
                format!("ADE settings reference {}, which is a {}", vault.id, vault.kind),
            ));
            continue;
        }

        match settings.get("KeyEncryptionKeyURL") {
            None => findings.push(
                Finding::new(
                    rule,
                    Some(&vm.id),
                    "KeyEncryptionKeyURL is not set, volume keys are not wrapped (PMK mode)",
                )
                .with_severity(Severity::Warning),
            ),
            Some(Param::Ref(kek)) => {
                if let Some(vault) = vault {
                    check_kek_reference(rule, vm, vault, kek, &mut findings);
                }
            }
            Some(Param::Str(s)) if s.is_empty() => findings.push(Finding::new(
                rule,
                Some(&vm.id),
                "KeyEncryptionKeyURL is empty",
            )),
            Some(_) => findings.push(Finding::new(
                rule,
                Some(&vm.id),
                "KeyEncryptionKeyURL must reference the vault's versioned key URI",
            )),
        }
    }
    findings
}

fn check_kek_reference(
    rule: &Rule,
    vm: &ResourceNode,
    vault: &ResourceNode,
    kek: &OutputRef,
    findings: &mut Vec<Finding>,
) {
    if kek.node != vault.id {
        findings.push(Finding::new(
            rule,
            Some(&vm.id),
            format!("KeyEncryptionKeyURL reads {} but the vault is {}", kek.node, vault.id),
        ));
        return;
    }
    let known = key_names(vault)
        .into_iter()
        .any(|key| kek.output == key_uri_with_version(key));
    if !known {
        findings.push(
            Finding::new(
                rule,
                Some(&vm.id),
                format!("KeyEncryptionKeyURL reads {}, which is not a versioned key URI of {}", kek, vault.name),
            )
            .with_suggestion("reference keys.<keyName>.uriWithVersion of a key the vault creates"),
        );
    }
}

fn check_sse_consistent_disks(graph: &ResourceGraph) -> Vec<Finding> {
    let rule = &SSE_CONSISTENT_DISKS;
    let mut findings = Vec::new();

    for vm in graph.nodes_of_kind(ResourceKind::VirtualMachine) {
        let disks = disk_encryption_set_refs(vm);
        if disks.iter().all(|(_, des)| des.is_none()) {
            continue;
        }

        let mut sets: Vec<&OutputRef> = Vec::new();
        for (disk, des) in &disks {
            match des {
                None => findings.push(Finding::new(
                    rule,
                    Some(&vm.id),
                    format!("{} has no disk encryption set", disk),
                )),
                Some(Err(_)) => findings.push(Finding::new(
                    rule,
                    Some(&vm.id),
                    format!("{} sets diskEncryptionSetResourceId to a literal instead of a reference", disk),
                )),
                Some(Ok(r)) => {
                    if r.output != "resourceId" {
                        findings.push(Finding::new(
                            rule,
                            Some(&vm.id),
                            format!("{} reads {}, expected a resourceId output", disk, r),
                        ));
                    }
                    if let Some(target) = graph.producer(r) {
                        if target.kind != ResourceKind::DiskEncryptionSet {
                            findings.push(Finding::new(
                                rule,
                                Some(&vm.id),
                                format!("{} references {}, which is a {}", disk, target.id, target.kind),
                            ));
                        }
                    }
                    if !sets.iter().any(|s| s.node == r.node) {
                        sets.push(r);
                    }
                }
            }
        }

        if sets.len() > 1 {
            let names: Vec<&str> = sets.iter().map(|r| r.node.as_str()).collect();
            findings.push(Finding::new(
                rule,
                Some(&vm.id),
                format!("disks reference different disk encryption sets: {}", names.join(", ")),
            ));
        }
    }
    findings
}

fn check_des_identity_role(graph: &ResourceGraph) -> Vec<Finding> {
    let rule = &DES_IDENTITY_ROLE;
    let role = BuiltinRole::KEY_VAULT_CRYPTO_SERVICE_ENCRYPTION_USER;
    let mut findings = Vec::new();

    for des in graph.nodes_of_kind(ResourceKind::DiskEncryptionSet) {
        let identities = identity_refs(des);
        if identities.is_empty() {
            findings.push(Finding::new(
                rule,
                Some(&des.id),
                "disk encryption set has no user-assigned identity binding",
            ));
            continue;
        }
        let vault = des_vault(graph, des);

        for identity_ref in identities {
            if identity_ref.output != "resourceId" {
                findings.push(Finding::new(
                    rule,
                    Some(&des.id),
                    format!("identity binding reads {}, expected a resourceId output", identity_ref),
                ));
                continue;
            }
            let Some(identity) = graph
                .producer(identity_ref)
                .filter(|n| n.kind == ResourceKind::UserAssignedIdentity)
            else {
                if graph.producer(identity_ref).is_some() {
                    findings.push(Finding::new(
                        rule,
                        Some(&des.id),
                        format!("identity binding {} is not a user-assigned identity", identity_ref),
                    ));
                }
                continue;
            };
            let Some(vault) = vault else {
                continue;
            };

            let granted = vault
                .params
                .get("roleAssignments")
                .and_then(Param::as_list)
                .unwrap_or_default()
                .iter()
                .any(|assignment| {
                    let principal = assignment.get("principalId").and_then(Param::as_ref_target);
                    let role_matches = assignment
                        .get("roleDefinitionIdOrName")
                        .and_then(Param::as_str)
                        .is_some_and(|r| role.matches(r));
                    role_matches
                        && principal.is_some_and(|p| p.node == identity.id && p.output == "principalId")
                });

            if !granted {
                findings.push(
                    Finding::new(
                        rule,
                        Some(&des.id),
                        format!(
                            "{} is bound to {} but {} grants it no '{}' role",
                            des.name, identity.name, vault.name, role.name
                        ),
                    )
                    .with_suggestion(format!(
                        "add a role assignment on {} with principalId = {}.outputs.principalId",
                        vault.id, identity.id
                    )),
                );
            }
        }
    }
    findings
}

fn check_unique_names_acyclic(graph: &ResourceGraph) -> Vec<Finding> {
    let rule = &UNIQUE_NAMES_ACYCLIC;
    let mut findings = Vec::new();

    let mut seen: HashMap<(ResourceKind, Option<String>, String), &str> = HashMap::new();
    for node in graph.nodes() {
        let scope = if node.kind.globally_named() {
            None
        } else {
            node.scope()
        };
        let key = (node.kind, scope, node.name.to_ascii_lowercase());
        if let Some(first) = seen.get(&key) {
            findings.push(Finding::new(
                rule,
                Some(&node.id),
                format!("{} name '{}' is already used by {}", node.kind, node.name, first),
            ));
        } else {
            seen.insert(key, &node.id);
        }
    }

    for cycle in graph.cycles() {
        findings.push(Finding::new(
            rule,
            cycle.first().map(String::as_str),
            format!("dependency cycle: {}", cycle.join(" -> ")),
        ));
    }
    findings
}

fn check_declared_outputs(graph: &ResourceGraph) -> Vec<Finding> {
    graph
        .dangling()
        .iter()
        .map(|dangling| {
            let message = match dangling.reason {
                DanglingReason::UnknownNode => format!(
                    "{} references {}, but there is no node '{}'",
                    dangling.param_path, dangling.reference, dangling.reference.node
                ),
                DanglingReason::UndeclaredOutput => format!(
                    "{} references {}, but '{}' is not a declared output",
                    dangling.param_path,
                    dangling.reference,
                    dangling.reference.field()
                ),
            };
            Finding::new(&DECLARED_OUTPUTS, Some(&dangling.consumer), message)
        })
        .collect()
}
