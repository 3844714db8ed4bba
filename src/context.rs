use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use tokio::time::Instant;

use crate::MechanismError;

/// Which side of a connection the current chain invocation represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    pub fn is_client(&self) -> bool {
        matches!(self, Role::Client)
    }
}

/// Request-scoped values handed down the chain with every call.
///
/// Cloning is cheap: the value map is shared until one side writes to it.
#[derive(Debug, Clone)]
pub struct Context {
    role: Role,
    values: Arc<HashMap<String, String>>,
    deadline: Option<Instant>,
}

impl Context {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            values: Arc::new(HashMap::new()),
            deadline: None,
        }
    }

    pub fn client() -> Self {
        Self::new(Role::Client)
    }

    pub fn server() -> Self {
        Self::new(Role::Server)
    }

    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.values).insert(key.into(), value.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub(crate) fn without_deadline(mut self) -> Self {
        self.deadline = None;
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline. `None` means no deadline is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Drive `fut` to completion unless the deadline passes first.
    pub async fn run<F, T>(&self, fut: F) -> anyhow::Result<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, fut)
                .await
                .map_err(|_| anyhow::Error::new(MechanismError::DeadlineExceeded))?,
            None => fut.await,
        }
    }
}
