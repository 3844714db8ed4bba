use thiserror::Error;

/// `VNET_API_ERROR_INVALID_SW_IF_INDEX`, returned by the engine for a handle it does not know.
pub const INVALID_SW_IF_INDEX: i32 = -2;
/// `VNET_API_ERROR_NO_SUCH_ENTRY`.
pub const NO_SUCH_ENTRY: i32 = -6;
/// `VNET_API_ERROR_UNSPECIFIED`.
pub const UNSPECIFIED: i32 = -1;

/// Failures raised by the mechanism handlers themselves.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MechanismError {
    /// The `via` label has no entry in the device-name table.
    #[error("no interface name for label {label}")]
    NoDeviceName { label: String },
    /// The interface dump ended without a matching host interface.
    #[error("no interface name found {name}")]
    NoInterfaceFound { name: String },
    /// The memif mechanism carries a socket URL that can not be used.
    #[error("invalid memif socket file url: {url:?}")]
    InvalidSocketUrl { url: String },
    /// The request context expired while a dataplane call was in flight.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// An error reported by the dataplane engine, carrying its API return value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} (retval {retval})", api_error_name(.retval))]
pub struct VppApiError {
    pub retval: i32,
}

impl VppApiError {
    pub fn new(retval: i32) -> Self {
        Self { retval }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.retval, INVALID_SW_IF_INDEX | NO_SUCH_ENTRY)
    }
}

fn api_error_name(retval: &i32) -> &'static str {
    match *retval {
        INVALID_SW_IF_INDEX => "VNET_API_ERROR_INVALID_SW_IF_INDEX",
        NO_SUCH_ENTRY => "VNET_API_ERROR_NO_SUCH_ENTRY",
        UNSPECIFIED => "VNET_API_ERROR_UNSPECIFIED",
        _ => "VNET_API_ERROR",
    }
}

/// Whether any cause in the chain is the engine saying the object does not exist.
pub fn is_not_found(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<VppApiError>())
        .any(VppApiError::is_not_found)
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::*;

    #[test]
    fn test_not_found_survives_context() {
        let err = Err::<(), _>(VppApiError::new(INVALID_SW_IF_INDEX))
            .context("error attempting to delete memif 3")
            .unwrap_err();
        assert!(is_not_found(&err));

        let err = Err::<(), _>(VppApiError::new(UNSPECIFIED))
            .context("error attempting to delete memif 3")
            .unwrap_err();
        assert!(!is_not_found(&err));
    }

    #[test]
    fn test_display() {
        let err = MechanismError::NoDeviceName {
            label: "ext".to_string(),
        };
        assert_eq!(err.to_string(), "no interface name for label ext");
        assert_eq!(
            VppApiError::new(NO_SUCH_ENTRY).to_string(),
            "VNET_API_ERROR_NO_SUCH_ENTRY (retval -6)"
        );
        assert_eq!(
            VppApiError::new(-99).to_string(),
            "VNET_API_ERROR (retval -99)"
        );
        assert_eq!(
            MechanismError::DeadlineExceeded.to_string(),
            "context deadline exceeded"
        );
    }
}
