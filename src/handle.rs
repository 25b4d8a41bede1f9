//! Receipt handles.
//!
//! A lease-based broker hands out a receipt handle with every delivery
//! attempt. The handle, not the message id, is what the broker accepts for
//! extend, delete and release, and it stops working once the lease it was
//! issued for has run out.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Receipt handle of one delivery attempt.
///
/// Two deliveries of the same message never share a handle. The reception
/// core treats the value as opaque: it only passes it back to the adapter and
/// prints it in logs and errors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageHandle(Arc<str>);

impl MessageHandle {
    /// Issue a fresh handle, as a broker does when it leases a message.
    pub fn generate() -> Self {
        Self(Arc::from(Uuid::new_v4().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Wrap a handle string received from a broker SDK.
impl From<String> for MessageHandle {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl From<&str> for MessageHandle {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl fmt::Display for MessageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
