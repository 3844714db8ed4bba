use anyhow::Context as _;
use async_trait::async_trait;
use log::debug;
use url::Url;

use crate::{
    is_not_found, ConnectionStore, Context, Connection, Mechanism, MechanismError,
    MechanismHandler, MemifCreate, MemifMechanism, MemifRole, Metadata, Provisioned, VppConn,
    MEMIF_SOCKET_FILE_SCHEME,
};

/// Provisions a memif interface for connections using the memif mechanism.
///
/// The client side of a connection gets the slave end, the server side the
/// master end. With direct memif enabled, a connection that already owns a
/// memif and has a pending socket hand-off is rewired to that socket instead
/// of being recreated.
pub struct MemifHandler {
    vpp: VppConn,
    metadata: Metadata,
    applied: ConnectionStore<Provisioned<MemifMechanism>>,
    direct_memif_enabled: bool,
}

impl MemifHandler {
    pub fn new(vpp: VppConn, metadata: Metadata) -> Self {
        Self {
            vpp,
            metadata,
            applied: ConnectionStore::new(),
            direct_memif_enabled: false,
        }
    }

    pub fn with_direct_memif(mut self, enabled: bool) -> Self {
        self.direct_memif_enabled = enabled;
        self
    }

    pub fn direct_memif_enabled(&self) -> bool {
        self.direct_memif_enabled
    }

    /// Hand the connection over to a pending memif socket. Returns `false` when
    /// the fast path does not apply and the memif has to be created normally.
    async fn try_direct_memif(&self, ctx: &Context, conn: &mut Connection) -> anyhow::Result<bool> {
        if !self.direct_memif_enabled {
            return Ok(false);
        }
        let role = ctx.role();
        let Some(socket) = self.metadata.memif_sockets.load(&conn.id, role).await else {
            return Ok(false);
        };
        // the cached handle has to be the memif this handler created
        let Some(applied) = self.applied.load(&conn.id, role).await else {
            return Ok(false);
        };
        if self.metadata.ifindex.load(&conn.id, role).await != Some(applied.sw_if_index) {
            return Ok(false);
        }

        let url = socket_file_url(&socket.socket_filename)?;
        if let Some(memif) = conn.mechanism_mut().and_then(Mechanism::as_memif_mut) {
            memif.set_socket_file_url(url.as_str());
        }

        self.metadata.memif_sockets.delete(&conn.id, role).await;
        self.metadata.ifindex.delete(&conn.id, role).await;
        self.applied.delete(&conn.id, role).await;
        debug!(
            "memif: {} rewired to {} (socketID={}), handed over swIfIndex={}",
            conn.id, url, socket.socket_id, applied.sw_if_index
        );
        Ok(true)
    }

    async fn create(
        &self,
        ctx: &Context,
        conn_id: &str,
        mechanism: &MemifMechanism,
    ) -> anyhow::Result<()> {
        let socket_filename = socket_filename(mechanism.socket_file_url())?;
        let role = if ctx.role().is_client() {
            MemifRole::Slave
        } else {
            MemifRole::Master
        };
        let sw_if_index = self
            .vpp
            .memif_create(
                ctx,
                MemifCreate {
                    role,
                    mode: mechanism.mode(),
                    socket_filename,
                },
            )
            .await?;

        self.metadata
            .ifindex
            .store(conn_id, ctx.role(), sw_if_index)
            .await;
        self.applied
            .store(
                conn_id,
                ctx.role(),
                Provisioned {
                    mechanism: mechanism.clone(),
                    sw_if_index,
                },
            )
            .await;
        Ok(())
    }

    async fn delete(&self, ctx: &Context, conn_id: &str) -> anyhow::Result<()> {
        let role = ctx.role();
        let Some(applied) = self.applied.load(conn_id, role).await else {
            return Ok(());
        };
        let sw_if_index = applied.sw_if_index;
        match self.vpp.memif_delete(ctx, sw_if_index).await {
            Ok(()) => {}
            Err(err) if is_not_found(&err) => {
                debug!("memif: {sw_if_index} of {conn_id} is already gone");
            }
            Err(err) => return Err(err),
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
impl MechanismHandler for MemifHandler {
    fn name(&self) -> &'static str {
        "memif"
    }

    async fn configure(&self, ctx: &Context, conn: &mut Connection) -> anyhow::Result<()> {
        let Some(mechanism) = conn.mechanism().and_then(Mechanism::as_memif).cloned() else {
            // not ours, but a memif may be left over from before a mechanism change
            return self.delete(ctx, &conn.id).await;
        };

        if self.try_direct_memif(ctx, conn).await? {
            return Ok(());
        }

        if let Some(applied) = self.applied.load(&conn.id, ctx.role()).await {
            if applied.mechanism == mechanism {
                return Ok(());
            }
            self.delete(ctx, &conn.id).await?;
        }
        self.create(ctx, &conn.id, &mechanism).await
    }

    async fn unconfigure(&self, ctx: &Context, conn: &Connection) -> anyhow::Result<()> {
        self.delete(ctx, &conn.id).await
    }
}

/// `file://` URL of a memif socket file.
pub fn socket_file_url(socket_filename: &str) -> anyhow::Result<Url> {
    let mut url = Url::parse(&format!("{MEMIF_SOCKET_FILE_SCHEME}:///"))
        .context("failed to build memif socket url")?;
    url.set_path(socket_filename);
    Ok(url)
}

/// Path of the socket file a memif mechanism points at.
pub fn socket_filename(socket_file_url: &str) -> anyhow::Result<String> {
    let invalid = || MechanismError::InvalidSocketUrl {
        url: socket_file_url.to_string(),
    };
    let url = Url::parse(socket_file_url).map_err(|_| invalid())?;
    if url.scheme() != MEMIF_SOCKET_FILE_SCHEME || url.path().is_empty() || url.path() == "/" {
        return Err(invalid().into());
    }
    Ok(url.path().to_string())
}
