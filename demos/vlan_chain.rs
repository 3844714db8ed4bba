use std::sync::Arc;

use clap::Parser;
use log::info;
use nsm_vpp_rs::{
    Connection, Context, MechanismArgs, MechanismConfig, MemifMechanism, MemoryVpp, Metadata,
    TailServer, VlanMechanism, VppConn, VIA_LABEL,
};

/// Runs a memif and a VLAN connection through the mechanism chain against the
/// in-memory engine, e.g. `cargo run --example vlan_chain -- --toml demos/mechanisms.toml`.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = MechanismArgs::parse();
    let config = MechanismConfig::from_toml_file(&args.toml)?;

    let vpp = Arc::new(MemoryVpp::new());
    for host_if_name in config.device_names.values() {
        let sw_if_index = vpp.add_host_interface(&format!("host-{host_if_name}"));
        info!("host interface {host_if_name} attached as {sw_if_index}");
    }

    let metadata = Metadata::new();
    let chain = config.build_chain(
        VppConn::new(vpp.clone()),
        metadata.clone(),
        Arc::new(TailServer),
    );
    let ctx = Context::client();

    let mut conns = vec![Connection::new("memif-1")
        .with_mechanism(MemifMechanism::new("file:///run/nsm/memif-1.sock"))];
    for (i, label) in config.device_names.keys().enumerate() {
        conns.push(
            Connection::new(format!("vlan-{label}"))
                .with_mechanism(VlanMechanism::new(100 + i as u32))
                .with_label(VIA_LABEL, label.as_str()),
        );
    }

    let mut established = Vec::new();
    for conn in conns {
        let conn = chain.request(&ctx, conn).await?;
        let sw_if_index = metadata.ifindex.load(&conn.id, ctx.role()).await;
        info!(
            "connection {} established on {:?}",
            conn.id,
            sw_if_index.and_then(|idx| vpp.interface_name(idx))
        );
        established.push(conn);
    }

    for conn in &established {
        chain.close(&ctx, conn).await?;
        info!("connection {} closed", conn.id);
    }
    info!(
        "{} engine calls, {} interfaces left",
        vpp.calls().len(),
        vpp.interface_count()
    );
    Ok(())
}
