use std::{
    collections::{BTreeMap, HashMap},
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;

use super::{
    InterfaceIndex, MemifCreate, SwInterfaceDetails, SwInterfaceDetailsStream, VppApi,
};
use crate::{VppApiError, INVALID_SW_IF_INDEX};

/// The API messages understood by [`MemoryVpp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VppOp {
    MemifCreate,
    MemifDelete,
    SwInterfaceDump,
    CreateVlanSubif,
    DeleteSubif,
}

/// One call received by [`MemoryVpp`], in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VppCall {
    MemifCreate(MemifCreate),
    MemifDelete(InterfaceIndex),
    SwInterfaceDump(String),
    CreateVlanSubif {
        sw_if_index: InterfaceIndex,
        vlan_id: u32,
    },
    DeleteSubif(InterfaceIndex),
}

impl VppCall {
    pub fn op(&self) -> VppOp {
        match self {
            VppCall::MemifCreate(_) => VppOp::MemifCreate,
            VppCall::MemifDelete(_) => VppOp::MemifDelete,
            VppCall::SwInterfaceDump(_) => VppOp::SwInterfaceDump,
            VppCall::CreateVlanSubif { .. } => VppOp::CreateVlanSubif,
            VppCall::DeleteSubif(_) => VppOp::DeleteSubif,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InterfaceKind {
    Host,
    Memif,
    VlanSubif { parent: InterfaceIndex, vlan_id: u32 },
}

#[derive(Debug, Clone)]
struct InterfaceObject {
    name: String,
    kind: InterfaceKind,
}

#[derive(Debug, Default)]
struct MemoryVppInner {
    next_index: u32,
    next_memif_id: u32,
    interfaces: BTreeMap<InterfaceIndex, InterfaceObject>,
    calls: Vec<VppCall>,
    failures: HashMap<VppOp, i32>,
    latency: Option<Duration>,
}

impl MemoryVppInner {
    fn add_interface(&mut self, name: String, kind: InterfaceKind) -> InterfaceIndex {
        let sw_if_index = InterfaceIndex(self.next_index);
        self.next_index += 1;
        self.interfaces
            .insert(sw_if_index, InterfaceObject { name, kind });
        sw_if_index
    }

    fn check_failure(&self, op: VppOp) -> Result<(), VppApiError> {
        match self.failures.get(&op) {
            Some(&retval) => Err(VppApiError::new(retval)),
            None => Ok(()),
        }
    }
}

/// A dataplane engine kept entirely in memory.
///
/// Every call is recorded, individual messages can be made to fail, and an
/// artificial latency can be applied to every call.
#[derive(Debug, Default)]
pub struct MemoryVpp {
    inner: Mutex<MemoryVppInner>,
}

impl MemoryVpp {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryVppInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a host interface, as the engine would after attaching a NIC.
    pub fn add_host_interface(&self, name: &str) -> InterfaceIndex {
        self.lock()
            .add_interface(name.to_string(), InterfaceKind::Host)
    }

    /// Make every following `op` fail with `retval` until [`Self::clear_failure`].
    pub fn fail(&self, op: VppOp, retval: i32) {
        self.lock().failures.insert(op, retval);
    }

    pub fn clear_failure(&self, op: VppOp) {
        self.lock().failures.remove(&op);
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        self.lock().latency = latency;
    }

    pub fn calls(&self) -> Vec<VppCall> {
        self.lock().calls.clone()
    }

    pub fn count(&self, op: VppOp) -> usize {
        self.lock().calls.iter().filter(|call| call.op() == op).count()
    }

    /// Calls that changed engine state, skipping dumps.
    pub fn mutations(&self) -> Vec<VppCall> {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.op() != VppOp::SwInterfaceDump)
            .cloned()
            .collect()
    }

    pub fn interface_name(&self, sw_if_index: InterfaceIndex) -> Option<String> {
        self.lock()
            .interfaces
            .get(&sw_if_index)
            .map(|interface| interface.name.clone())
    }

    /// Parent interface and VLAN id of a VLAN sub-interface.
    pub fn vlan_subif(&self, sw_if_index: InterfaceIndex) -> Option<(InterfaceIndex, u32)> {
        match self.lock().interfaces.get(&sw_if_index)?.kind {
            InterfaceKind::VlanSubif { parent, vlan_id } => Some((parent, vlan_id)),
            _ => None,
        }
    }

    pub fn contains(&self, sw_if_index: InterfaceIndex) -> bool {
        self.lock().interfaces.contains_key(&sw_if_index)
    }

    pub fn interface_count(&self) -> usize {
        self.lock().interfaces.len()
    }

    /// Record `call` and sleep for the configured latency. No lock is held while sleeping.
    async fn begin(&self, call: VppCall) {
        let latency = {
            let mut inner = self.lock();
            inner.calls.push(call);
            inner.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl VppApi for MemoryVpp {
    async fn memif_create(&self, req: MemifCreate) -> anyhow::Result<InterfaceIndex> {
        self.begin(VppCall::MemifCreate(req)).await;
        let mut inner = self.lock();
        inner.check_failure(VppOp::MemifCreate)?;
        let memif_id = inner.next_memif_id;
        inner.next_memif_id += 1;
        Ok(inner.add_interface(format!("memif0/{memif_id}"), InterfaceKind::Memif))
    }

    async fn memif_delete(&self, sw_if_index: InterfaceIndex) -> anyhow::Result<()> {
        self.begin(VppCall::MemifDelete(sw_if_index)).await;
        let mut inner = self.lock();
        inner.check_failure(VppOp::MemifDelete)?;
        match inner.interfaces.get(&sw_if_index) {
            Some(InterfaceObject {
                kind: InterfaceKind::Memif,
                ..
            }) => {
                inner.interfaces.remove(&sw_if_index);
                Ok(())
            }
            _ => Err(VppApiError::new(INVALID_SW_IF_INDEX).into()),
        }
    }

    async fn sw_interface_dump(
        &self,
        name_filter: &str,
    ) -> anyhow::Result<SwInterfaceDetailsStream> {
        self.begin(VppCall::SwInterfaceDump(name_filter.to_string()))
            .await;
        let inner = self.lock();
        inner.check_failure(VppOp::SwInterfaceDump)?;
        let details = inner
            .interfaces
            .iter()
            .filter(|(_, interface)| interface.name.contains(name_filter))
            .map(|(&sw_if_index, interface)| {
                Ok(SwInterfaceDetails {
                    sw_if_index,
                    interface_name: interface.name.clone(),
                })
            })
            .collect::<Vec<anyhow::Result<SwInterfaceDetails>>>();
        Ok(Box::pin(futures::stream::iter(details)))
    }

    async fn create_vlan_subif(
        &self,
        sw_if_index: InterfaceIndex,
        vlan_id: u32,
    ) -> anyhow::Result<InterfaceIndex> {
        self.begin(VppCall::CreateVlanSubif {
            sw_if_index,
            vlan_id,
        })
        .await;
        let mut inner = self.lock();
        inner.check_failure(VppOp::CreateVlanSubif)?;
        let parent = inner
            .interfaces
            .get(&sw_if_index)
            .ok_or(VppApiError::new(INVALID_SW_IF_INDEX))?;
        let name = format!("{}.{}", parent.name, vlan_id);
        Ok(inner.add_interface(
            name,
            InterfaceKind::VlanSubif {
                parent: sw_if_index,
                vlan_id,
            },
        ))
    }

    async fn delete_subif(&self, sw_if_index: InterfaceIndex) -> anyhow::Result<()> {
        self.begin(VppCall::DeleteSubif(sw_if_index)).await;
        let mut inner = self.lock();
        inner.check_failure(VppOp::DeleteSubif)?;
        match inner.interfaces.get(&sw_if_index) {
            Some(InterfaceObject {
                kind: InterfaceKind::VlanSubif { .. },
                ..
            }) => {
                inner.interfaces.remove(&sw_if_index);
                Ok(())
            }
            _ => Err(VppApiError::new(INVALID_SW_IF_INDEX).into()),
        }
    }
}
