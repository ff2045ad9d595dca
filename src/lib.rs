//! # `wifi-connman`
//! Connection management layer for an embedded Wi-Fi radio.
//!
//! The radio firmware on these parts is asynchronous: configuration is
//! staged through individual calls and applied with a commit, and every
//! interesting outcome (bring-up finished, association established, link
//! lost, scan finished, address acquired) arrives later as an event raised
//! from the firmware's own execution context. This crate turns that into a
//! sequential API an application task can simply await.
//!
//! ## Architecture
//! [WifiManager] owns the driver, the IP stack and the shared connection
//! state, and splits into three handles:
//!
//! * [Control] is the caller-facing half: power on/off, connect,
//!   disconnect, scan, start/stop AP, mode switches and the persistent
//!   MAC/regulatory settings. One operation runs at a time; each stages
//!   its configuration, commits, then suspends on a rendezvous until the
//!   dispatcher signals the outcome.
//! * [Runner] is the event dispatcher. Its `run()` loop drains the
//!   [EventQueue] fed by the integration glue and applies the state
//!   transitions: it updates the connection state, classifies failure
//!   reason codes, and signals whichever rendezvous a caller is blocked
//!   on. Nothing in [Control] makes progress unless the runner is polled.
//! * [Notifications] is the application-facing event stream (association,
//!   link loss, AP clients joining and leaving, and the AP state change
//!   the manager synthesizes itself because the firmware never reports
//!   AP bring-up).
//!
//! ## Rendezvous discipline
//! Every blocking operation clears its rendezvous slot before issuing the
//! driver call that can produce the terminal event, so a completion can
//! never be lost to the race between the event firing and the wait
//! starting. Failure events only resolve a waiting caller; while nobody
//! waits, transient failures (e.g. the firmware's own AP-search retries)
//! are absorbed.
//!
//! ## IP services
//! Station mode runs a DHCP client (or marks a statically configured
//! interface ready immediately); AP mode runs the embedded DHCP server
//! with settings derived from [ApIpConfig]. At most one of the two
//! services is ever up; mode transitions tear down first and fail closed
//! if the driver rejects the switch.
//!
//! The radio itself, the IP stack and the persistent store are consumed
//! through the [WifiDriver], [IpStack] and [ConfigStore] traits; the
//! integration glue forwards firmware callbacks into the [EventQueue]
//! through an [EventSink].

#![cfg_attr(not(test), no_std)]
pub(crate) mod fmt;

mod driver;
mod events;
mod ip;
mod manager;
mod mode;
mod state;
mod sync;
#[cfg(test)]
pub(crate) mod testutil;

pub use driver::{
    AuthMode, CipherType, ConfigStore, DhcpServerError, DhcpServerSettings, DriverConfig,
    DriverError, IpStack, Port, StoreError, WifiDriver,
};
pub use events::{
    DriverEvent, EventQueue, EventSink, FailureReason, Notifications, Runner, WifiEvent,
    EVENT_QUEUE_DEPTH,
};
pub use ip::{ApIpConfig, StaIpMode};
pub use manager::{Config, Control, WifiError, WifiManager, WifiResult};
pub use state::{
    Credentials, NetworkProfile, OperatingMode, Passphrase, ScanRecord, SecurityKind, Ssid, WepKey,
    WepKeys, MAX_PASSPHRASE_LEN, MAX_SSID_LEN, MAX_WEP_KEY_LEN, MIN_PASSPHRASE_LEN, WEP_KEY_COUNT,
};
pub use sync::Rendezvous;

cfg_if::cfg_if! {
    if #[cfg(feature = "critical_section")] {
        type DefaultRawMutex = embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    } else {
        type DefaultRawMutex = embassy_sync::blocking_mutex::raw::NoopRawMutex;
    }
}
