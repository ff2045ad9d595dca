use core::cell::RefCell;

use embassy_sync::blocking_mutex;
use portable_atomic::{AtomicBool, AtomicU16, Ordering};

use crate::{
    driver::{AuthMode, CipherType},
    events::FailureReason,
    manager::{WifiError, WifiResult},
    DefaultRawMutex,
};

/// Maximum SSID length in bytes.
pub const MAX_SSID_LEN: usize = 32;
/// Maximum WPA/WPA2 passphrase length in bytes.
pub const MAX_PASSPHRASE_LEN: usize = 64;
/// Minimum WPA/WPA2 passphrase length in bytes.
pub const MIN_PASSPHRASE_LEN: usize = 8;
/// Maximum length of a single WEP key (104-bit key).
pub const MAX_WEP_KEY_LEN: usize = 13;
/// Number of WEP key slots.
pub const WEP_KEY_COUNT: usize = 4;

pub type Ssid = heapless::Vec<u8, MAX_SSID_LEN>;
pub type Passphrase = heapless::Vec<u8, MAX_PASSPHRASE_LEN>;
pub type WepKey = heapless::Vec<u8, MAX_WEP_KEY_LEN>;

/// The operating mode of the radio and network stack. The modes are mutually
/// exclusive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OperatingMode {
    Station,
    AccessPoint,
    PeerToPeer,
    /// Passive baseline mode used for first-time bring-up.
    #[default]
    Monitor,
}

/// The security configuration of a network, as seen by the application.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SecurityKind {
    #[default]
    Open,
    Wep,
    Wpa,
    Wpa2,
}

impl SecurityKind {
    /// Auth and cipher configuration pushed to the station port.
    pub(crate) fn sta_modes(self) -> (AuthMode, CipherType) {
        match self {
            SecurityKind::Open => (AuthMode::Open, CipherType::None),
            SecurityKind::Wep => (AuthMode::Open, CipherType::Wep),
            SecurityKind::Wpa => (AuthMode::WpaPsk, CipherType::TkipAesMix),
            SecurityKind::Wpa2 => (AuthMode::Wpa2Psk, CipherType::TkipAesMix),
        }
    }
    /// Auth and cipher configuration pushed to the AP port. WEP is not
    /// available for the AP interface.
    pub(crate) fn ap_modes(self) -> Option<(AuthMode, CipherType)> {
        match self {
            SecurityKind::Open => Some((AuthMode::Open, CipherType::None)),
            SecurityKind::Wpa | SecurityKind::Wpa2 => Some((AuthMode::Wpa2Psk, CipherType::Aes)),
            SecurityKind::Wep => None,
        }
    }
}

/// Up to four WEP keys plus the index of the one used for transmission.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WepKeys {
    pub keys: [WepKey; WEP_KEY_COUNT],
    pub tx_index: u8,
}

impl WepKeys {
    fn is_valid(&self) -> bool {
        let Some(key) = self.keys.get(self.tx_index as usize) else {
            return false;
        };
        // 40-bit or 104-bit keys.
        matches!(key.len(), 5 | 13)
    }
}

/// Credential material matching a [SecurityKind].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Credentials {
    #[default]
    None,
    Passphrase(Passphrase),
    WepKeys(WepKeys),
}

/// Caller-supplied description of a network to join or to publish.
///
/// Validated before any driver configuration is touched; a profile that
/// fails validation causes no state change at all.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NetworkProfile {
    pub ssid: Ssid,
    pub security: SecurityKind,
    pub credentials: Credentials,
    /// Channel for AP mode; ignored when joining as a station.
    pub channel: u8,
}

impl NetworkProfile {
    pub fn new(
        ssid: &[u8],
        security: SecurityKind,
        credentials: Credentials,
        channel: u8,
    ) -> WifiResult<Self> {
        let ssid = Ssid::from_slice(ssid).map_err(|()| WifiError::InvalidSsid)?;
        let profile = Self {
            ssid,
            security,
            credentials,
            channel,
        };
        profile.validate()?;
        Ok(profile)
    }
    /// Profile for an open network.
    pub fn open(ssid: &[u8]) -> WifiResult<Self> {
        Self::new(ssid, SecurityKind::Open, Credentials::None, 0)
    }
    /// Profile for a WPA2-PSK network.
    pub fn wpa2(ssid: &[u8], passphrase: &[u8]) -> WifiResult<Self> {
        let passphrase =
            Passphrase::from_slice(passphrase).map_err(|()| WifiError::InvalidPassphrase)?;
        Self::new(
            ssid,
            SecurityKind::Wpa2,
            Credentials::Passphrase(passphrase),
            0,
        )
    }
    /// Check SSID and credential material without touching the driver.
    pub fn validate(&self) -> WifiResult<()> {
        if self.ssid.is_empty() {
            return Err(WifiError::InvalidSsid);
        }
        match self.security {
            SecurityKind::Open => Ok(()),
            SecurityKind::Wpa | SecurityKind::Wpa2 => match &self.credentials {
                Credentials::Passphrase(p)
                    if (MIN_PASSPHRASE_LEN..=MAX_PASSPHRASE_LEN).contains(&p.len()) =>
                {
                    Ok(())
                }
                _ => Err(WifiError::InvalidPassphrase),
            },
            SecurityKind::Wep => match &self.credentials {
                Credentials::WepKeys(keys) if keys.is_valid() => Ok(()),
                _ => Err(WifiError::InvalidWepKey),
            },
        }
    }
}

/// One record of a completed scan cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanRecord {
    pub ssid: Ssid,
    pub bssid: [u8; 6],
    pub security: SecurityKind,
    pub channel: u8,
    pub rssi: i8,
}

/// Identity of the most recent association, plus bookkeeping only touched
/// under the lock.
#[derive(Default)]
struct StateInner {
    op_mode: OperatingMode,
    last_ssid: Ssid,
    last_security: SecurityKind,
    last_failure: Option<FailureReason>,
}

/// The aggregated status of the Wi-Fi stack and radio.
///
/// The flag fields are atomics because the event dispatcher updates them
/// from its own context while an API call may be reading them; everything
/// else is only touched under the blocking mutex.
pub(crate) struct ConnectionState {
    /// Set once after first-time driver bring-up, never cleared.
    pub(crate) firmware_ready: AtomicBool,
    pub(crate) radio_on: AtomicBool,
    pub(crate) associated: AtomicBool,
    pub(crate) ip_ready: AtomicBool,
    pub(crate) sta_ip_up: AtomicBool,
    pub(crate) ap_ip_up: AtomicBool,
    /// A connect call is blocked on the rendezvous and wants failure
    /// signals delivered.
    pub(crate) connect_waiting: AtomicBool,
    /// Consecutive AP-not-found events since the last association.
    pub(crate) ssid_not_found: AtomicU16,
    inner: blocking_mutex::Mutex<DefaultRawMutex, RefCell<StateInner>>,
}

impl ConnectionState {
    pub(crate) fn new() -> Self {
        Self {
            firmware_ready: AtomicBool::new(false),
            radio_on: AtomicBool::new(false),
            associated: AtomicBool::new(false),
            ip_ready: AtomicBool::new(false),
            sta_ip_up: AtomicBool::new(false),
            ap_ip_up: AtomicBool::new(false),
            connect_waiting: AtomicBool::new(false),
            ssid_not_found: AtomicU16::new(0),
            inner: blocking_mutex::Mutex::new(RefCell::new(StateInner::default())),
        }
    }
    pub(crate) fn op_mode(&self) -> OperatingMode {
        self.inner.lock(|inner| inner.borrow().op_mode)
    }
    pub(crate) fn set_op_mode(&self, mode: OperatingMode) {
        self.inner.lock(|inner| inner.borrow_mut().op_mode = mode);
    }
    /// Remember the identity of a successful association.
    pub(crate) fn record_association(&self, ssid: &Ssid, security: SecurityKind) {
        self.inner.lock(|inner| {
            let mut inner = inner.borrow_mut();
            inner.last_ssid = ssid.clone();
            inner.last_security = security;
            inner.last_failure = None;
        });
    }
    /// Whether `profile` names the network of the last association.
    pub(crate) fn matches_last(&self, profile: &NetworkProfile) -> bool {
        self.inner.lock(|inner| {
            let inner = inner.borrow();
            !profile.ssid.is_empty()
                && profile.ssid == inner.last_ssid
                && profile.security == inner.last_security
        })
    }
    pub(crate) fn set_last_failure(&self, reason: FailureReason) {
        self.inner
            .lock(|inner| inner.borrow_mut().last_failure = Some(reason));
    }
    pub(crate) fn last_failure(&self) -> Option<FailureReason> {
        self.inner.lock(|inner| inner.borrow().last_failure)
    }
    pub(crate) fn reset_not_found(&self) {
        self.ssid_not_found.store(0, Ordering::Relaxed);
    }
    /// Returns the new consecutive count.
    pub(crate) fn bump_not_found(&self) -> u16 {
        self.ssid_not_found
            .fetch_add(1, Ordering::Relaxed)
            .wrapping_add(1)
    }
}
