use std::{collections::HashMap, fs, path::Path};

use anyhow::{anyhow, Context};
use clap::Parser;

use crate::{ChainBuilder, MemifHandler, Metadata, ServerRef, VlanHandler, VppConn};

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
pub struct MechanismArgs {
    /// toml config file of the mechanism chain
    #[arg(short, long)]
    pub toml: String,
}

/// Construction-time settings of the mechanism handlers. Immutable once the
/// chain is built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MechanismConfig {
    pub direct_memif_enabled: bool,
    /// Value of the `via` label -> host interface name.
    pub device_names: HashMap<String, String>,
}

impl MechanismConfig {
    pub fn from_toml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file_content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml_str(&file_content)
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Parse the toml config. The toml should be like:
    /// ```toml
    /// direct_memif = true
    ///
    /// [device_names]
    /// ext-net = "eth0"
    /// ```
    /// Both keys are optional.
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let table: toml::Table = toml::from_str(content)?;
        let direct_memif_enabled = match table.get("direct_memif") {
            Some(value) => value
                .as_bool()
                .ok_or_else(|| anyhow!("direct_memif must be a boolean, got {value}"))?,
            None => false,
        };
        let device_names = match table.get("device_names") {
            Some(value) => value
                .as_table()
                .ok_or_else(|| anyhow!("device_names must be a table"))?
                .iter()
                .map(|(label, name)| {
                    let name = name
                        .as_str()
                        .ok_or_else(|| anyhow!("device name for label {label} must be a string"))?;
                    Ok((label.clone(), name.to_string()))
                })
                .collect::<anyhow::Result<HashMap<_, _>>>()?,
            None => HashMap::new(),
        };
        if let Some(key) = table
            .keys()
            .find(|key| !matches!(key.as_str(), "direct_memif" | "device_names"))
        {
            return Err(anyhow!("unknown config key: {key}"));
        }

        Ok(Self {
            direct_memif_enabled,
            device_names,
        })
    }

    /// Memif element in front of the VLAN element, ending in `next`.
    pub fn build_chain(&self, vpp: VppConn, metadata: Metadata, next: ServerRef) -> ServerRef {
        let memif = MemifHandler::new(vpp.clone(), metadata.clone())
            .with_direct_memif(self.direct_memif_enabled);
        let vlan = VlanHandler::new(vpp, metadata, self.device_names.clone());
        ChainBuilder::new()
            .with_handler(memif)
            .with_handler(vlan)
            .build_with_tail(next)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        Connection, Context, MemifMechanism, MemoryVpp, TailServer, VlanMechanism, VppOp,
        VIA_LABEL,
    };

    #[test]
    fn test_parse() {
        let config = MechanismConfig::from_toml_str(
            r#"
            direct_memif = true

            [device_names]
            ext-net = "eth0"
            "int net" = "eth1"
            "#,
        )
        .unwrap();
        assert!(config.direct_memif_enabled);
        assert_eq!(config.device_names.len(), 2);
        assert_eq!(config.device_names["int net"], "eth1");

        assert_eq!(
            MechanismConfig::from_toml_str("").unwrap(),
            MechanismConfig::default()
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for content in [
            "direct_memif = \"yes\"",
            "device_names = \"eth0\"",
            "[device_names]\next = 1",
            "interfaces = []",
            "direct_memif = ",
        ] {
            assert!(
                MechanismConfig::from_toml_str(content).is_err(),
                "accepted {content:?}"
            );
        }
    }

    #[test]
    fn test_missing_file() {
        let err = MechanismConfig::from_toml_file("/nonexistent/mechanisms.toml").unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }

    #[test]
    fn test_args() {
        let args = MechanismArgs::try_parse_from(["nsm", "--toml", "chain.toml"]).unwrap();
        assert_eq!(args.toml, "chain.toml");
        assert!(MechanismArgs::try_parse_from(["nsm"]).is_err());
    }

    #[tokio::test]
    async fn test_build_chain_serves_both_mechanisms() {
        let vpp = Arc::new(MemoryVpp::new());
        vpp.add_host_interface("eth0");
        let config =
            MechanismConfig::from_toml_str("[device_names]\next = \"eth0\"").unwrap();
        let metadata = Metadata::new();
        let chain = config.build_chain(
            VppConn::new(vpp.clone()),
            metadata.clone(),
            Arc::new(TailServer),
        );
        let ctx = Context::server();

        let memif = Connection::new("m1").with_mechanism(MemifMechanism::new("file:///run/m1.sock"));
        let vlan = Connection::new("v1")
            .with_mechanism(VlanMechanism::new(30))
            .with_label(VIA_LABEL, "ext");
        chain.request(&ctx, memif.clone()).await.unwrap();
        chain.request(&ctx, vlan.clone()).await.unwrap();
        assert_eq!(vpp.count(VppOp::MemifCreate), 1);
        assert_eq!(vpp.count(VppOp::CreateVlanSubif), 1);
        assert_eq!(metadata.ifindex.len().await, 2);

        chain.close(&ctx, &memif).await.unwrap();
        chain.close(&ctx, &vlan).await.unwrap();
        assert!(metadata.ifindex.is_empty().await);
        assert_eq!(vpp.interface_count(), 1);
    }
}
