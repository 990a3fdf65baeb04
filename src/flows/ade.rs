//! Azure Disk Encryption flow.
//!
//! The VM's disk encryption extension reads the vault's `resourceId`, `uri`
//! and versioned key URI; every node is scoped by the resource group `name`.

use super::FlowContext;
use crate::graph::{OutputRef, ResourceNode};
use crate::resources::{
    AdeSettings, DataDiskConfig, KeySpec, KeyVaultSpec, ResourceGroupSpec, ResourceKind,
    VirtualMachineSpec, VmEncryption,
};

pub const FLOW: &str = "ade";

pub const RESOURCE_GROUP: &str = "adeResourceGroup";
pub const KEY_VAULT: &str = "adeKeyVault";
pub const VIRTUAL_MACHINE: &str = "adeVirtualMachine";

pub fn build(ctx: &FlowContext<'_>) -> Vec<ResourceNode> {
    let params = ctx.params;
    let root = params.ade_name.as_str();
    let rg = OutputRef::new(RESOURCE_GROUP, "name");

    let resource_group = ResourceGroupSpec::new(ctx.naming.resource_group(root), &params.location)
        .with_tags(params.tags.clone())
        .into_node(RESOURCE_GROUP, FLOW, ctx.module(ResourceKind::ResourceGroup));

    let key_vault =
        KeyVaultSpec::for_disk_encryption(ctx.naming.key_vault(root), &params.location, rg.clone())
            .with_sku(params.key_vault_sku)
            .with_key(KeySpec::rsa(&params.key_name, params.key_size))
            .with_tags(params.tags.clone())
            .into_node(KEY_VAULT, FLOW, ctx.module(ResourceKind::KeyVault));

    let encryption = VmEncryption::Ade(
        AdeSettings::new(KEY_VAULT, &params.key_name).with_key_mode(params.ade_key_mode),
    );
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

    vec![resource_group, key_vault, virtual_machine]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NamingConfig;
    use crate::graph::Param;
    use crate::params::DeploymentParameters;
    use crate::resources::virtual_machine::{ade_extension_settings, encryption_at_host};
    use crate::resources::ModuleCatalog;

    #[test]
    fn test_ade_flow_nodes() {
        let params = DeploymentParameters::new(
            "westeurope",
            "/subscriptions/0000/resourceGroups/net/providers/Microsoft.Network/virtualNetworks/vnet/subnets/default",
        );
        let ctx = FlowContext {
            params: &params,
            naming: &NamingConfig::default(),
            modules: &ModuleCatalog::default(),
            admin_password: "Example-Passw0rd!",
        };
        let nodes = build(&ctx);
        let names: Vec<_> = nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["rg-vmAde", "kv-vmAde", "vmAde"]);

        let vm = &nodes[2];
        assert_eq!(encryption_at_host(vm), Some(false));
        let settings = ade_extension_settings(vm).unwrap();
        assert_eq!(
            settings.get("KeyVaultURL").and_then(Param::as_ref_target),
            Some(&OutputRef::new(KEY_VAULT, "uri"))
        );
        assert_eq!(
            nodes[1].params.get("enablePurgeProtection").and_then(Param::as_bool),
            Some(false)
        );
    }
}
