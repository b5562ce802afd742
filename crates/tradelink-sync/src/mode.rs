//! Offline mode and the capabilities it grants.

use serde::{Deserialize, Serialize};
use tradelink_core::ConnectionStatus;

/// Connectivity mode exposed to callers for gating affordances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OfflineMode {
    /// Network up and persistent channel connected.
    Full,
    /// Network up, persistent channel not connected.
    Limited,
    /// No network. Reads come from cache, writes are queued.
    ReadOnly,
}

impl OfflineMode {
    /// Derive the mode from the platform network signal and channel status.
    pub fn from_signals(network_available: bool, channel: ConnectionStatus) -> Self {
        match (network_available, channel) {
            (false, _) => Self::ReadOnly,
            (true, ConnectionStatus::Connected) => Self::Full,
            (true, _) => Self::Limited,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Limited => "limited",
            Self::ReadOnly => "read-only",
        }
    }

    pub fn capabilities(&self) -> OfflineCapabilities {
        OfflineCapabilities::for_mode(*self)
    }
}

impl std::fmt::Display for OfflineMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the current mode allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineCapabilities {
    pub can_view_data: bool,
    pub can_modify_settings: bool,
    pub can_execute_trades: bool,
    pub can_receive_notifications: bool,
    pub has_data_persistence: bool,
    pub has_background_sync: bool,
}

impl OfflineCapabilities {
    /// Pure function of the mode.
    pub fn for_mode(mode: OfflineMode) -> Self {
        match mode {
            OfflineMode::Full => Self {
                can_view_data: true,
                can_modify_settings: true,
                can_execute_trades: true,
                can_receive_notifications: true,
                has_data_persistence: true,
                has_background_sync: true,
            },
            // Requests still work but nothing is pushed.
            OfflineMode::Limited => Self {
                can_view_data: true,
                can_modify_settings: true,
                can_execute_trades: false,
                can_receive_notifications: false,
                has_data_persistence: true,
                has_background_sync: true,
            },
            OfflineMode::ReadOnly => Self {
                can_view_data: true,
                can_modify_settings: false,
                can_execute_trades: false,
                can_receive_notifications: false,
                has_data_persistence: true,
                has_background_sync: false,
            },
        }
    }
}
