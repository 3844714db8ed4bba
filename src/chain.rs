use std::sync::Arc;

use async_trait::async_trait;
use log::{trace, warn};

use crate::{Connection, Context, Postponed};

/// An element of a request-processing chain.
///
/// `request` is called for every connection establishment or refresh and
/// returns the connection as completed by the rest of the chain. `close` tears
/// the connection down.
#[async_trait]
pub trait NetworkServiceServer: Send + Sync {
    async fn request(&self, ctx: &Context, conn: Connection) -> anyhow::Result<Connection>;

    async fn close(&self, ctx: &Context, conn: &Connection) -> anyhow::Result<()>;
}

pub type ServerRef = Arc<dyn NetworkServiceServer>;

/// Last element of every chain.
#[derive(Debug, Default, Clone, Copy)]
pub struct TailServer;

#[async_trait]
impl NetworkServiceServer for TailServer {
    async fn request(&self, _ctx: &Context, conn: Connection) -> anyhow::Result<Connection> {
        Ok(conn)
    }

    async fn close(&self, _ctx: &Context, _conn: &Connection) -> anyhow::Result<()> {
        Ok(())
    }
}

/// One unit of dataplane configuration for a single mechanism type.
///
/// Handlers only deal with their own dataplane object; ordering, rollback and
/// delegation are done by [`MechanismServer`].
#[async_trait]
pub trait MechanismHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Provision (or reconfigure) the dataplane object for `conn`, which has
    /// already been through the rest of the chain.
    async fn configure(&self, ctx: &Context, conn: &mut Connection) -> anyhow::Result<()>;

    /// Release whatever `configure` provisioned for `conn`. Must be a no-op
    /// when nothing was provisioned.
    async fn unconfigure(&self, ctx: &Context, conn: &Connection) -> anyhow::Result<()>;
}

/// Chain element driving a [`MechanismHandler`]: forward first, configure on
/// the way back, and close everything on a local failure.
pub struct MechanismServer<H> {
    handler: H,
    next: ServerRef,
}

impl<H: MechanismHandler> MechanismServer<H> {
    pub fn new(handler: H, next: ServerRef) -> Self {
        Self { handler, next }
    }

    async fn close_on_failure(
        &self,
        postponed: &Postponed,
        conn: &Connection,
        err: anyhow::Error,
    ) -> anyhow::Error {
        let ctx = postponed.detach();
        match self.close(&ctx, conn).await {
            Ok(()) => err,
            Err(close_err) => err.context(format!("connection closed with error: {close_err:#}")),
        }
    }
}

#[async_trait]
impl<H: MechanismHandler> NetworkServiceServer for MechanismServer<H> {
    async fn request(&self, ctx: &Context, conn: Connection) -> anyhow::Result<Connection> {
        let postponed = Postponed::capture(ctx);

        let mut conn = self.next.request(ctx, conn).await?;

        if let Err(err) = self.handler.configure(ctx, &mut conn).await {
            trace!(
                "{}: configure failed for {}, closing: {:#}",
                self.handler.name(),
                conn.id,
                err
            );
            return Err(self.close_on_failure(&postponed, &conn, err).await);
        }
        Ok(conn)
    }

    async fn close(&self, ctx: &Context, conn: &Connection) -> anyhow::Result<()> {
        let unconfigured = self.handler.unconfigure(ctx, conn).await;
        if let Err(err) = &unconfigured {
            warn!(
                "{}: failed to release dataplane state of {}: {:#}",
                self.handler.name(),
                conn.id,
                err
            );
        }

        // a local failure is logged above and only attached to a failure of the rest
        match (self.next.close(ctx, conn).await, unconfigured) {
            (Err(err), Err(local)) => {
                Err(err.context(format!("{} teardown also failed: {local:#}", self.handler.name())))
            }
            (res, _) => res,
        }
    }
}

type ServerFactory = Box<dyn FnOnce(ServerRef) -> ServerRef + Send>;

/// Assembles a chain from the outermost element inwards.
///
/// ```
/// use nsm_vpp_rs::{ChainBuilder, Connection, Context};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let chain = ChainBuilder::new().build();
/// let conn = chain.request(&Context::client(), Connection::new("c1")).await.unwrap();
/// assert_eq!(conn.id, "c1");
/// # });
/// ```
#[derive(Default)]
pub struct ChainBuilder {
    factories: Vec<ServerFactory>,
}

impl ChainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an element. `factory` receives the element that follows it.
    pub fn with<F>(mut self, factory: F) -> Self
    where
        F: FnOnce(ServerRef) -> ServerRef + Send + 'static,
    {
        self.factories.push(Box::new(factory));
        self
    }

    pub fn with_handler<H>(self, handler: H) -> Self
    where
        H: MechanismHandler + 'static,
    {
        self.with(move |next| Arc::new(MechanismServer::new(handler, next)))
    }

    pub fn build(self) -> ServerRef {
        self.build_with_tail(Arc::new(TailServer))
    }

    pub fn build_with_tail(self, tail: ServerRef) -> ServerRef {
        self.factories
            .into_iter()
            .rev()
            .fold(tail, |next, factory| factory(next))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{VppApiError, UNSPECIFIED};

    /// Records every call it sees, in order, into a shared journal.
    struct JournalServer {
        name: &'static str,
        journal: Arc<Mutex<Vec<String>>>,
        fail_request: bool,
        fail_close: bool,
        next: ServerRef,
    }

    impl JournalServer {
        fn new(
            name: &'static str,
            journal: Arc<Mutex<Vec<String>>>,
            next: ServerRef,
        ) -> Self {
            Self {
                name,
                journal,
                fail_request: false,
                fail_close: false,
                next,
            }
        }

        fn record(&self, event: &str) {
            self.journal
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, event));
        }
    }

    #[async_trait]
    impl NetworkServiceServer for JournalServer {
        async fn request(&self, ctx: &Context, conn: Connection) -> anyhow::Result<Connection> {
            self.record("request");
            if self.fail_request {
                anyhow::bail!("{} refused the request", self.name);
            }
            self.next.request(ctx, conn).await
        }

        async fn close(&self, ctx: &Context, conn: &Connection) -> anyhow::Result<()> {
            self.record("close");
            let res = self.next.close(ctx, conn).await;
            if self.fail_close {
                anyhow::bail!("{} failed to close", self.name);
            }
            res
        }
    }

    /// Handler whose configure step fails on demand.
    struct FlakyHandler {
        journal: Arc<Mutex<Vec<String>>>,
        fail_configure: bool,
        fail_unconfigure: bool,
    }

    #[async_trait]
    impl MechanismHandler for FlakyHandler {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn configure(&self, _ctx: &Context, _conn: &mut Connection) -> anyhow::Result<()> {
            self.journal.lock().unwrap().push("flaky:configure".to_string());
            if self.fail_configure {
                return Err(VppApiError::new(UNSPECIFIED).into());
            }
            Ok(())
        }

        async fn unconfigure(&self, _ctx: &Context, _conn: &Connection) -> anyhow::Result<()> {
            self.journal
                .lock()
                .unwrap()
                .push("flaky:unconfigure".to_string());
            if self.fail_unconfigure {
                anyhow::bail!("unconfigure failed");
            }
            Ok(())
        }
    }

    fn flaky_chain(
        fail_configure: bool,
        fail_unconfigure: bool,
        inner_fails_request: bool,
    ) -> (ServerRef, Arc<Mutex<Vec<String>>>) {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let handler = FlakyHandler {
            journal: journal.clone(),
            fail_configure,
            fail_unconfigure,
        };
        let inner_journal = journal.clone();
        let chain = ChainBuilder::new()
            .with_handler(handler)
            .with(move |next| {
                let mut inner = JournalServer::new("inner", inner_journal, next);
                inner.fail_request = inner_fails_request;
                Arc::new(inner)
            })
            .build();
        (chain, journal)
    }

    fn entries(journal: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
        journal.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_configure_after_forwarding() {
        let (chain, journal) = flaky_chain(false, false, false);
        chain
            .request(&Context::client(), Connection::new("c1"))
            .await
            .unwrap();
        assert_eq!(entries(&journal), vec!["inner:request", "flaky:configure"]);
    }

    #[tokio::test]
    async fn test_downstream_failure_short_circuits() {
        let (chain, journal) = flaky_chain(false, false, true);
        let err = chain
            .request(&Context::client(), Connection::new("c1"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "inner refused the request");
        assert_eq!(entries(&journal), vec!["inner:request"]);
    }

    #[tokio::test]
    async fn test_local_failure_closes_inner_elements() {
        let (chain, journal) = flaky_chain(true, false, false);
        let err = chain
            .request(&Context::client(), Connection::new("c1"))
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<VppApiError>(),
            Some(&VppApiError::new(UNSPECIFIED))
        );
        assert_eq!(
            entries(&journal),
            vec![
                "inner:request",
                "flaky:configure",
                "flaky:unconfigure",
                "inner:close"
            ]
        );
    }

    #[tokio::test]
    async fn test_rollback_error_keeps_root_cause() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let handler = FlakyHandler {
            journal: journal.clone(),
            fail_configure: true,
            fail_unconfigure: true,
        };
        let inner_journal = journal.clone();
        let chain = ChainBuilder::new()
            .with_handler(handler)
            .with(move |next| {
                let mut inner = JournalServer::new("inner", inner_journal, next);
                inner.fail_close = true;
                Arc::new(inner)
            })
            .build();
        let err = chain
            .request(&Context::client(), Connection::new("c1"))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("connection closed with error"));
        assert!(format!("{err:#}").contains("unconfigure failed"));
        assert!(format!("{err:#}").contains("inner failed to close"));
        assert!(err.downcast_ref::<VppApiError>().is_some());
    }

    #[tokio::test]
    async fn test_rollback_with_local_teardown_failure_returns_root_cause() {
        let (chain, journal) = flaky_chain(true, true, false);
        let err = chain
            .request(&Context::client(), Connection::new("c1"))
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<VppApiError>(),
            Some(&VppApiError::new(UNSPECIFIED))
        );
        assert!(!format!("{err:#}").contains("connection closed with error"));
        assert_eq!(entries(&journal).last().map(String::as_str), Some("inner:close"));
    }

    #[tokio::test]
    async fn test_close_returns_next_result_after_local_failure() {
        let (chain, journal) = flaky_chain(false, true, false);
        chain
            .close(&Context::client(), &Connection::new("c1"))
            .await
            .unwrap();
        assert_eq!(entries(&journal), vec!["flaky:unconfigure", "inner:close"]);
    }

    #[tokio::test]
    async fn test_close_merges_both_errors() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let handler = FlakyHandler {
            journal: journal.clone(),
            fail_configure: false,
            fail_unconfigure: true,
        };
        let inner_journal = journal.clone();
        let chain = ChainBuilder::new()
            .with_handler(handler)
            .with(move |next| {
                let mut inner = JournalServer::new("inner", inner_journal, next);
                inner.fail_close = true;
                Arc::new(inner)
            })
            .build();
        let err = chain
            .close(&Context::server(), &Connection::new("c1"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "flaky teardown also failed: unconfigure failed");
        assert!(format!("{err:#}").contains("inner failed to close"));
    }

    #[tokio::test]
    async fn test_builder_orders_outer_to_inner() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let (a, b) = (journal.clone(), journal.clone());
        let chain = ChainBuilder::new()
            .with(move |next| Arc::new(JournalServer::new("outer", a, next)))
            .with(move |next| Arc::new(JournalServer::new("inner", b, next)))
            .build();
        chain
            .request(&Context::client(), Connection::new("c1"))
            .await
            .unwrap();
        chain
            .close(&Context::client(), &Connection::new("c1"))
            .await
            .unwrap();
        assert_eq!(
            entries(&journal),
            vec!["outer:request", "inner:request", "outer:close", "inner:close"]
        );
    }
}
