//! Optional binding of a restored session to the client's network address.

use std::net::IpAddr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Whether a restored session must come from the address it was issued to.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum AddressBinding {
    #[default]
    Disabled,
    Enforce,
}

/// Supplies the client's current network address.
#[async_trait]
pub trait AddressSource: Send + Sync {
    async fn current_address(&self) -> Option<IpAddr>;
}

impl AddressBinding {
    /// Decide whether a session bound to `bound` may be used from `current`.
    ///
    /// Sessions that were never bound are always accepted. Under `Enforce`, an
    /// unknown current address is treated as a mismatch.
    pub fn allows(self, bound: Option<IpAddr>, current: Option<IpAddr>) -> bool {
        match (self, bound) {
            (AddressBinding::Disabled, _) | (_, None) => true,
            (AddressBinding::Enforce, Some(bound)) => current == Some(bound),
        }
    }
}
