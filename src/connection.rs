use std::collections::HashMap;

/// Label naming the device a VLAN connection should be attached to.
pub const VIA_LABEL: &str = "via";
/// URL scheme of memif socket files.
pub const MEMIF_SOCKET_FILE_SCHEME: &str = "file";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemifMode {
    #[default]
    Ethernet,
    Ip,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemifMechanism {
    socket_file_url: String,
    mode: MemifMode,
}

impl MemifMechanism {
    pub fn new(socket_file_url: impl Into<String>) -> Self {
        Self {
            socket_file_url: socket_file_url.into(),
            mode: MemifMode::Ethernet,
        }
    }

    pub fn with_mode(mut self, mode: MemifMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn socket_file_url(&self) -> &str {
        &self.socket_file_url
    }

    pub fn set_socket_file_url(&mut self, url: impl Into<String>) {
        self.socket_file_url = url.into();
    }

    pub fn mode(&self) -> MemifMode {
        self.mode
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VlanMechanism {
    /// 0 means no tagging, the host interface is used as is.
    pub vlan_id: u32,
}

impl VlanMechanism {
    pub fn new(vlan_id: u32) -> Self {
        Self { vlan_id }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KernelMechanism {
    pub interface_name: String,
}

/// The dataplane technology that realizes a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mechanism {
    Memif(MemifMechanism),
    Vlan(VlanMechanism),
    Kernel(KernelMechanism),
}

impl Mechanism {
    pub fn as_memif(&self) -> Option<&MemifMechanism> {
        match self {
            Mechanism::Memif(memif) => Some(memif),
            _ => None,
        }
    }

    pub fn as_memif_mut(&mut self) -> Option<&mut MemifMechanism> {
        match self {
            Mechanism::Memif(memif) => Some(memif),
            _ => None,
        }
    }

    pub fn as_vlan(&self) -> Option<&VlanMechanism> {
        match self {
            Mechanism::Vlan(vlan) => Some(vlan),
            _ => None,
        }
    }

}

impl From<MemifMechanism> for Mechanism {
    fn from(val: MemifMechanism) -> Self {
        Mechanism::Memif(val)
    }
}

impl From<VlanMechanism> for Mechanism {
    fn from(val: VlanMechanism) -> Self {
        Mechanism::Vlan(val)
    }
}

impl From<KernelMechanism> for Mechanism {
    fn from(val: KernelMechanism) -> Self {
        Mechanism::Kernel(val)
    }
}

/// A single service request between a consumer and a provider.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Connection {
    pub id: String,
    pub mechanism: Option<Mechanism>,
    pub labels: HashMap<String, String>,
}

impl Connection {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            mechanism: None,
            labels: HashMap::new(),
        }
    }

    pub fn with_mechanism(mut self, mechanism: impl Into<Mechanism>) -> Self {
        self.mechanism = Some(mechanism.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn mechanism(&self) -> Option<&Mechanism> {
        self.mechanism.as_ref()
    }

    pub fn mechanism_mut(&mut self) -> Option<&mut Mechanism> {
        self.mechanism.as_mut()
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}
