use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use log::{debug, trace};

use crate::{
    ConnectionStore, Context, Connection, Mechanism, MechanismError, MechanismHandler, Metadata,
    Provisioned, VlanMechanism, VppConn, VIA_LABEL,
};

/// Name prefix the engine gives to host interfaces attached through af_packet.
pub const AF_PACKET_NAME_PREFIX: &str = "host-";

/// Whether the engine interface `interface_name` is the host device `host_if_name`,
/// either directly or through its af_packet form.
pub fn matches_host_interface(host_if_name: &str, interface_name: &str) -> bool {
    interface_name == host_if_name
        || interface_name
            .strip_prefix(AF_PACKET_NAME_PREFIX)
            .is_some_and(|name| name == host_if_name)
}

/// Attaches VLAN connections to a host interface, through a VLAN sub-interface
/// or directly when the VLAN id is 0.
pub struct VlanHandler {
    vpp: VppConn,
    metadata: Metadata,
    applied: ConnectionStore<Provisioned<VlanMechanism>>,
    device_names: Arc<HashMap<String, String>>,
}

impl VlanHandler {
    /// `device_names` maps values of the `via` label to host interface names.
    pub fn new(vpp: VppConn, metadata: Metadata, device_names: HashMap<String, String>) -> Self {
        Self {
            vpp,
            metadata,
            applied: ConnectionStore::new(),
            device_names: Arc::new(device_names),
        }
    }

    fn host_interface_name(&self, conn: &Connection) -> Result<&str, MechanismError> {
        let via = conn.label(VIA_LABEL).unwrap_or_default();
        self.device_names
            .get(via)
            .map(String::as_str)
            .ok_or_else(|| MechanismError::NoDeviceName {
                label: via.to_string(),
            })
    }

    async fn add_sub_if(
        &self,
        ctx: &Context,
        conn: &Connection,
        mechanism: VlanMechanism,
    ) -> anyhow::Result<()> {
        let host_if_name = self.host_interface_name(conn)?;
        let role = ctx.role();

        let mut dump = self.vpp.sw_interface_dump(ctx, host_if_name).await?;
        while let Some(details) = dump.recv(ctx).await? {
            if !matches_host_interface(host_if_name, &details.interface_name) {
                trace!(
                    "vppapi=SwInterfaceDetails InterfaceName={} skipped",
                    details.interface_name
                );
                continue;
            }

            let sw_if_index = if mechanism.vlan_id != 0 {
                self.vpp
                    .create_vlan_subif(ctx, details.sw_if_index, mechanism.vlan_id)
                    .await?
            } else {
                debug!(
                    "HostInterfaceIndex={} InterfaceName={} QinQ disabled",
                    details.sw_if_index, details.interface_name
                );
                details.sw_if_index
            };
            self.metadata
                .ifindex
                .store(&conn.id, role, sw_if_index)
                .await;
            self.applied
                .store(
                    &conn.id,
                    role,
                    Provisioned {
                        mechanism,
                        sw_if_index,
                    },
                )
                .await;
            return Ok(());
        }

        Err(MechanismError::NoInterfaceFound {
            name: host_if_name.to_string(),
        }
        .into())
    }

    async fn del_sub_if(&self, ctx: &Context, conn_id: &str) -> anyhow::Result<()> {
        let role = ctx.role();
        let Some(applied) = self.applied.load(conn_id, role).await else {
            return Ok(());
        };

        let sw_if_index = applied.sw_if_index;
        if applied.mechanism.vlan_id != 0 {
            self.vpp.delete_subif(ctx, sw_if_index).await?;
        } else {
            debug!("HostInterfaceIndex={sw_if_index} QinQ disabled, nothing to delete");
        }
        self.metadata
            .ifindex
            .delete_if_eq(conn_id, role, &sw_if_index)
            .await;
        self.applied.delete(conn_id, role).await;
        Ok(())
    }
}

#[async_trait]
impl MechanismHandler for VlanHandler {
    fn name(&self) -> &'static str {
        "vlan"
    }

    async fn configure(&self, ctx: &Context, conn: &mut Connection) -> anyhow::Result<()> {
        let Some(mechanism) = conn.mechanism().and_then(Mechanism::as_vlan).copied() else {
            return self.del_sub_if(ctx, &conn.id).await;
        };

        if let Some(applied) = self.applied.load(&conn.id, ctx.role()).await {
            if applied.mechanism == mechanism {
                return Ok(());
            }
            self.del_sub_if(ctx, &conn.id).await?;
        }
        self.add_sub_if(ctx, conn, mechanism).await
    }

    async fn unconfigure(&self, ctx: &Context, conn: &Connection) -> anyhow::Result<()> {
        self.del_sub_if(ctx, &conn.id).await
    }
}
