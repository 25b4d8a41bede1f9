//! Message lock: lease flags and background lease renewal.

mod renewal;
mod state;

pub use renewal::{
    //
    LeaseRenewalController,
    RenewalHandle,
    RenewalPolicy,
    RenewalState,
    RenewalStatus,
    StopReason,
};

pub use state::{LockState, Settlement};
