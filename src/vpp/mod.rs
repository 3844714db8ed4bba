use std::{fmt::Display, sync::Arc, time::Instant};

use anyhow::Context as _;
use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};
use log::debug;

use crate::{Context, MemifMode};

mod memory;
pub use memory::*;

/// Index of an interface object living inside the dataplane engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InterfaceIndex(pub u32);

impl Display for InterfaceIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemifRole {
    Master,
    Slave,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemifCreate {
    pub role: MemifRole,
    pub mode: MemifMode,
    pub socket_filename: String,
}

/// A memif socket registered with the engine that is pending hand-off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemifSocketAddDel {
    pub socket_id: u32,
    pub socket_filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwInterfaceDetails {
    pub sw_if_index: InterfaceIndex,
    pub interface_name: String,
}

/// Reply stream of an interface dump. The end of the stream marks the end of the dump.
pub type SwInterfaceDetailsStream = BoxStream<'static, anyhow::Result<SwInterfaceDetails>>;

/// Binary API of the packet-processing engine. Failures reported by the engine
/// itself are expected to surface as [`crate::VppApiError`].
#[async_trait]
pub trait VppApi: Send + Sync {
    async fn memif_create(&self, req: MemifCreate) -> anyhow::Result<InterfaceIndex>;

    async fn memif_delete(&self, sw_if_index: InterfaceIndex) -> anyhow::Result<()>;

    async fn sw_interface_dump(&self, name_filter: &str)
        -> anyhow::Result<SwInterfaceDetailsStream>;

    async fn create_vlan_subif(
        &self,
        sw_if_index: InterfaceIndex,
        vlan_id: u32,
    ) -> anyhow::Result<InterfaceIndex>;

    async fn delete_subif(&self, sw_if_index: InterfaceIndex) -> anyhow::Result<()>;
}

pub type VppApiRef = Arc<dyn VppApi>;

/// The handlers' view of the engine: every call honours the context deadline,
/// names itself in its error, and is logged with its duration.
#[derive(Clone)]
pub struct VppConn {
    api: VppApiRef,
}

impl VppConn {
    pub fn new(api: VppApiRef) -> Self {
        Self { api }
    }

    pub async fn memif_create(
        &self,
        ctx: &Context,
        req: MemifCreate,
    ) -> anyhow::Result<InterfaceIndex> {
        let now = Instant::now();
        let socket_filename = req.socket_filename.clone();
        let role = req.role;
        let sw_if_index = ctx
            .run(self.api.memif_create(req))
            .await
            .with_context(|| {
                format!("error attempting to create memif on socket {socket_filename:?}")
            })?;
        debug!(
            "vppapi=MemifCreate swIfIndex={} socket={} role={:?} duration={:?} completed",
            sw_if_index,
            socket_filename,
            role,
            now.elapsed()
        );
        Ok(sw_if_index)
    }

    pub async fn memif_delete(
        &self,
        ctx: &Context,
        sw_if_index: InterfaceIndex,
    ) -> anyhow::Result<()> {
        let now = Instant::now();
        ctx.run(self.api.memif_delete(sw_if_index))
            .await
            .with_context(|| format!("error attempting to delete memif {sw_if_index}"))?;
        debug!(
            "vppapi=MemifDelete swIfIndex={} duration={:?} completed",
            sw_if_index,
            now.elapsed()
        );
        Ok(())
    }

    pub async fn sw_interface_dump(
        &self,
        ctx: &Context,
        name_filter: &str,
    ) -> anyhow::Result<InterfaceDump> {
        let now = Instant::now();
        let stream = ctx
            .run(self.api.sw_interface_dump(name_filter))
            .await
            .with_context(|| {
                format!("error attempting to get interface dump client for {name_filter:?}")
            })?;
        debug!(
            "vppapi=SwInterfaceDump HostInterfaceName={} duration={:?} completed",
            name_filter,
            now.elapsed()
        );
        Ok(InterfaceDump {
            name_filter: name_filter.to_string(),
            stream,
        })
    }

    pub async fn create_vlan_subif(
        &self,
        ctx: &Context,
        sw_if_index: InterfaceIndex,
        vlan_id: u32,
    ) -> anyhow::Result<InterfaceIndex> {
        let now = Instant::now();
        let sub_if_index = ctx
            .run(self.api.create_vlan_subif(sw_if_index, vlan_id))
            .await
            .with_context(|| {
                format!(
                    "error attempting to create vlan {vlan_id} subinterface on {sw_if_index}"
                )
            })?;
        debug!(
            "vppapi=CreateVlanSubIf HostInterfaceIndex={} SubInterfaceIndex={} VlanID={} duration={:?} completed",
            sw_if_index,
            sub_if_index,
            vlan_id,
            now.elapsed()
        );
        Ok(sub_if_index)
    }

    pub async fn delete_subif(
        &self,
        ctx: &Context,
        sw_if_index: InterfaceIndex,
    ) -> anyhow::Result<()> {
        let now = Instant::now();
        ctx.run(self.api.delete_subif(sw_if_index))
            .await
            .with_context(|| format!("error attempting to delete subinterface {sw_if_index}"))?;
        debug!(
            "vppapi=DeleteSubif HostInterfaceIndex={} duration={:?} completed",
            sw_if_index,
            now.elapsed()
        );
        Ok(())
    }
}

/// An in-progress interface dump. It can only be consumed once.
pub struct InterfaceDump {
    name_filter: String,
    stream: SwInterfaceDetailsStream,
}

impl InterfaceDump {
    /// Next interface of the dump, `None` once the engine signalled the end.
    pub async fn recv(&mut self, ctx: &Context) -> anyhow::Result<Option<SwInterfaceDetails>> {
        let Self {
            name_filter,
            stream,
        } = self;
        let next = ctx
            .run(async { Ok::<_, anyhow::Error>(stream.next().await) })
            .await
            .and_then(|next| next.transpose())
            .with_context(|| {
                format!("error attempting to get interface details for {name_filter:?}")
            })?;
        Ok(next)
    }
}
