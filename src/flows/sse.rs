//! Server-side encryption with a customer-managed key.
//!
//! The identity is granted the crypto service encryption role on the vault,
//! the disk encryption set binds the vault key to the identity, and every VM
//! disk references the set. Each step reads the previous step's outputs, so
//! the role assignment always exists before a disk uses the set.

use super::FlowContext;
use crate::graph::{OutputRef, ResourceNode};
use crate::resources::{
    BuiltinRole, DataDiskConfig, DiskEncryptionSetSpec, KeySpec, KeyVaultSpec, ResourceGroupSpec,
    ResourceKind, RoleAssignment, UserAssignedIdentitySpec, VirtualMachineSpec, VmEncryption,
};

pub const FLOW: &str = "sse";

pub const RESOURCE_GROUP: &str = "sseResourceGroup";
pub const IDENTITY: &str = "sseIdentity";
pub const KEY_VAULT: &str = "sseKeyVault";
pub const DISK_ENCRYPTION_SET: &str = "sseDiskEncryptionSet";
pub const VIRTUAL_MACHINE: &str = "sseVirtualMachine";

pub fn build(ctx: &FlowContext<'_>) -> Vec<ResourceNode> {
    let params = ctx.params;
    let root = params.sse_name.as_str();
    let rg = OutputRef::new(RESOURCE_GROUP, "name");

    let resource_group = ResourceGroupSpec::new(ctx.naming.resource_group(root), &params.location)
        .with_tags(params.tags.clone())
        .into_node(RESOURCE_GROUP, FLOW, ctx.module(ResourceKind::ResourceGroup));

    let identity =
        UserAssignedIdentitySpec::new(ctx.naming.identity(root), &params.location, rg.clone())
            .with_tags(params.tags.clone())
            .into_node(IDENTITY, FLOW, ctx.module(ResourceKind::UserAssignedIdentity));

    let key_vault = KeyVaultSpec::for_customer_managed_key(
        ctx.naming.key_vault(root),
        &params.location,
        rg.clone(),
    )
    .with_sku(params.key_vault_sku)
    .with_key(KeySpec::rsa(&params.key_name, params.key_size))
    .with_role_assignment(RoleAssignment::service_principal(
        OutputRef::new(IDENTITY, "principalId"),
        BuiltinRole::KEY_VAULT_CRYPTO_SERVICE_ENCRYPTION_USER,
    ))
    .with_tags(params.tags.clone())
    .into_node(KEY_VAULT, FLOW, ctx.module(ResourceKind::KeyVault));

    let disk_encryption_set = DiskEncryptionSetSpec::new(
        ctx.naming.disk_encryption_set(root),
        &params.location,
        rg.clone(),
        OutputRef::new(KEY_VAULT, "resourceId"),
        &params.key_name,
        OutputRef::new(IDENTITY, "resourceId"),
    )
    .with_tags(params.tags.clone())
    .into_node(
        DISK_ENCRYPTION_SET,
        FLOW,
        ctx.module(ResourceKind::DiskEncryptionSet),
    );

    let encryption = VmEncryption::Sse {
        disk_encryption_set: OutputRef::new(DISK_ENCRYPTION_SET, "resourceId"),
    };
    let virtual_machine = VirtualMachineSpec::new(
        root,
        &params.location,
        rg,
        &params.subnet_id,
        ctx.admin_password,
        encryption,
    )
    .with_size(&params.vm_size)
    .with_zone(params.zone)
    .with_admin_username(&params.admin_username)
    .with_image(params.image_reference.clone())
    .with_data_disk(DataDiskConfig::premium(0, params.data_disk_size_gb))
    .with_tags(params.tags.clone())
    .into_node(VIRTUAL_MACHINE, FLOW, ctx.module(ResourceKind::VirtualMachine));

    vec![
        resource_group,
        identity,
        key_vault,
        disk_encryption_set,
        virtual_machine,
    ]
}
