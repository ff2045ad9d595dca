use core::net::Ipv4Addr;

use crate::state::{OperatingMode, ScanRecord, Ssid, WepKeys};

/// Interface of the radio firmware towards the connection manager.
///
/// The STA and AP interfaces exist simultaneously in hardware; `port`
/// selects which one a configuration call applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Port {
    Sta,
    Ap,
}

/// Authentication mode pushed to the driver. Only the subset the manager
/// actually configures is modelled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AuthMode {
    Open,
    WpaPsk,
    Wpa2Psk,
}

/// Cipher configuration pushed to the driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CipherType {
    None,
    Wep,
    Aes,
    TkipAesMix,
}

/// Error returned by the radio driver for a rejected call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriverError {
    /// The firmware rejected the request.
    Rejected,
    /// The firmware is not in a state to accept the request.
    NotReady,
    /// The request is not supported by this radio.
    Unsupported,
}

/// Configuration for one-time driver bring-up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DriverConfig {
    pub op_mode: OperatingMode,
    /// Whether the firmware reconnects on its own after boot. The manager
    /// drives connections explicitly, so bring-up disables this.
    pub sta_auto_connect: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            op_mode: OperatingMode::Monitor,
            sta_auto_connect: false,
        }
    }
}

/// The radio firmware, treated as a black box.
///
/// Configuration calls stage settings; nothing takes effect until
/// [commit](WifiDriver::commit). Completion of asynchronous operations is
/// reported through the event queue by the integration glue (interrupt
/// handler or firmware callback), not through these methods.
pub trait WifiDriver {
    fn init(&mut self, config: &DriverConfig) -> Result<(), DriverError>;
    fn set_radio(&mut self, on: bool) -> Result<(), DriverError>;
    fn set_op_mode(&mut self, mode: OperatingMode) -> Result<(), DriverError>;
    fn op_mode(&mut self) -> Result<OperatingMode, DriverError>;

    fn set_ssid(&mut self, port: Port, ssid: &[u8]) -> Result<(), DriverError>;
    fn ssid(&mut self, port: Port) -> Result<Ssid, DriverError>;
    fn set_security_mode(
        &mut self,
        port: Port,
        auth: AuthMode,
        cipher: CipherType,
    ) -> Result<(), DriverError>;
    fn set_passphrase(&mut self, port: Port, passphrase: &[u8]) -> Result<(), DriverError>;
    fn set_wep_keys(&mut self, port: Port, keys: &WepKeys) -> Result<(), DriverError>;
    fn set_channel(&mut self, port: Port, channel: u8) -> Result<(), DriverError>;
    /// Apply all staged settings. For the station port this starts the
    /// association attempt.
    fn commit(&mut self) -> Result<(), DriverError>;
    fn disconnect(&mut self) -> Result<(), DriverError>;

    fn scan_init(&mut self, capacity: usize) -> Result<(), DriverError>;
    fn scan_start(&mut self, ssid_filter: Option<&[u8]>) -> Result<(), DriverError>;
    fn scan_stop(&mut self) -> Result<(), DriverError>;
    fn scan_deinit(&mut self) -> Result<(), DriverError>;
    /// Copy valid scan entries into `out`, returning how many were written.
    fn scan_results(&mut self, out: &mut [ScanRecord]) -> usize;

    fn mac_address(&mut self, port: Port) -> Result<[u8; 6], DriverError>;
    fn rssi(&mut self) -> Result<i8, DriverError>;
    /// Whether the station link is currently established.
    fn link_up(&mut self) -> Result<bool, DriverError>;
}

/// Settings handed to the embedded DHCP server when the AP IP service
/// comes up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DhcpServerSettings {
    pub server_addr: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub dns1: Ipv4Addr,
    pub dns2: Ipv4Addr,
    pub pool_start: Ipv4Addr,
    pub pool_end: Ipv4Addr,
}

/// Error starting the embedded DHCP server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DhcpServerError;

/// The IP stack below the manager: link state of the two interfaces, the
/// DHCP client for station mode and the DHCP server for AP mode.
///
/// When the station interface acquires a usable address while watched, the
/// stack glue reports [StaAddressReady](crate::DriverEvent::StaAddressReady)
/// through the event queue.
pub trait IpStack {
    fn sta_link_up(&mut self);
    fn sta_link_down(&mut self);
    /// Drop the configured station address (after link loss).
    fn sta_clear_address(&mut self);
    /// Enable or disable address-ready reporting for the station interface.
    fn watch_sta_address(&mut self, watch: bool);
    fn dhcp_start(&mut self);
    fn dhcp_release_and_stop(&mut self);

    fn ap_link_up(&mut self);
    fn ap_link_down(&mut self);
    fn dhcp_server_start(&mut self, settings: &DhcpServerSettings) -> Result<(), DhcpServerError>;
    fn dhcp_server_stop(&mut self);
}

/// Error returned by the persistent configuration store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    /// No entry under this group/key.
    NotFound,
    /// The store failed to read or write the entry.
    Io,
}

/// Persistent key-value storage, addressed by group and item name. Used to
/// remember the MAC address and regulatory settings across reboots.
pub trait ConfigStore {
    /// Read a string item into `out`, returning its length.
    fn read_str(&mut self, group: &str, key: &str, out: &mut [u8]) -> Result<usize, StoreError>;
    fn write_str(&mut self, group: &str, key: &str, value: &str) -> Result<(), StoreError>;
}
