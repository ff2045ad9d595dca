use embassy_sync::channel::{Channel, DynamicReceiver};
use portable_atomic::Ordering;

use crate::{
    driver::{IpStack, Port, WifiDriver},
    ip::StaIpMode,
    manager::Shared,
    DefaultRawMutex,
};

/// Depth of the raw driver event queue. Deep enough to absorb the bursts
/// the firmware produces around association (multiple disconnect artifacts
/// plus retry failures).
pub const EVENT_QUEUE_DEPTH: usize = 16;
pub(crate) const NOTIFY_QUEUE_DEPTH: usize = 8;

/// A notification produced in the driver's (or IP stack's) own execution
/// context and consumed by the [Runner].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriverEvent {
    /// One-time firmware bring-up finished.
    InitComplete,
    /// Port secured. On the STA port the association to an AP completed;
    /// on the AP port a station joined us. `peer` is the MAC of the other
    /// side.
    Connected { port: Port, peer: [u8; 6] },
    /// Link to `peer` was lost on the given port.
    Disconnected { port: Port, peer: [u8; 6] },
    /// The association attempt failed with a vendor reason code.
    ConnectionFailed { port: Port, reason_code: u16 },
    /// The scan cycle finished and results are in the driver's buffer.
    ScanComplete,
    /// The station interface acquired a usable address.
    StaAddressReady,
}

/// Notifications delivered to the application through [Notifications].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WifiEvent {
    Ready,
    Connected { bssid: [u8; 6] },
    Disconnected { reason: FailureReason },
    ConnectionFailed { reason: FailureReason },
    IpReady,
    ScanDone { count: usize },
    /// AP bring-up has no completion event in the firmware; this is
    /// synthesized by the manager after the configuration commit succeeds.
    ApStateChanged { up: bool },
    ApStationConnected { mac: [u8; 6] },
    ApStationDisconnected { mac: [u8; 6] },
}

/// Classification of a vendor reason code reported on connection failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FailureReason {
    ApNotFound,
    AuthExpired,
    AuthLeaveBss,
    AssocExpired,
    AssocTooMany,
    AssocFailed,
    AssocPowerCapBad,
    AssocSupChanBad,
    IeInvalid,
    FourWayTimeout,
    GroupKeyUpdateTimeout,
    FourWayIeDiffer,
    GroupCipherInvalid,
    PairwiseCipherInvalid,
    AkmpInvalid,
    RsnVersionInvalid,
    RsnCapInvalid,
    Dot1xAuthFailed,
    CipherSuiteRejected,
    LinkFailed,
    AuthFailed,
    Unspecified,
}

// Reason codes carried by the CONNECTION_FAILED payload: IEEE 802.11
// reason codes plus firmware-internal extensions (1 and 100).
const REASON_FIND_AP_FAIL: u16 = 1;
const REASON_PREV_AUTH_INVALID: u16 = 2;
const REASON_DEAUTH_LEAVING_BSS: u16 = 3;
const REASON_DISASSOC_INACTIVITY: u16 = 4;
const REASON_DISASSOC_AP_OVERLOAD: u16 = 5;
const REASON_CLASS_2_ERR: u16 = 6;
const REASON_CLASS_3_ERR: u16 = 7;
const REASON_DISASSOC_LEAVING_BSS: u16 = 8;
const REASON_ASSOC_BEFORE_AUTH: u16 = 9;
const REASON_DISASSOC_PWR_CAP_UNACCEPTABLE: u16 = 10;
const REASON_DISASSOC_SUP_CHS_UNACCEPTABLE: u16 = 11;
const REASON_INVALID_INFO_ELEM: u16 = 13;
const REASON_FOUR_WAY_HANDSHAKE_TIMEOUT: u16 = 15;
const REASON_GROUP_KEY_UPDATE_TIMEOUT: u16 = 16;
const REASON_DIFFERENT_INFO_ELEM: u16 = 17;
const REASON_MULTICAST_CIPHER_NOT_VALID: u16 = 18;
const REASON_UNICAST_CIPHER_NOT_VALID: u16 = 19;
const REASON_AKMP_NOT_VALID: u16 = 20;
const REASON_UNSUPPORTED_RSNE_VERSION: u16 = 21;
const REASON_INVALID_RSNE_CAPABILITIES: u16 = 22;
const REASON_IEEE_802_1X_AUTH_FAILED: u16 = 23;
const REASON_CIPHER_REJECT_SEC_POLICY: u16 = 24;
const REASON_DISASSOC_UNSPECIFIED_QOS: u16 = 32;
const REASON_DISASSOC_LACK_OF_BANDWIDTH: u16 = 33;
const REASON_DISASSOC_ACK_LOST_POOR_CHANNEL: u16 = 34;
const REASON_DISASSOC_TX_OUTSIDE_TXOP_LIMIT: u16 = 35;
const REASON_PEER_CIPHER_UNSUPPORTED: u16 = 45;
const REASON_PASSWORD_ERROR: u16 = 100;

impl FailureReason {
    /// Translate a vendor reason code into its classification.
    pub fn from_reason_code(code: u16) -> Self {
        match code {
            REASON_FIND_AP_FAIL => Self::ApNotFound,
            REASON_PREV_AUTH_INVALID => Self::AuthExpired,
            REASON_DEAUTH_LEAVING_BSS => Self::AuthLeaveBss,
            REASON_DISASSOC_INACTIVITY => Self::AssocExpired,
            REASON_DISASSOC_AP_OVERLOAD => Self::AssocTooMany,
            REASON_CLASS_2_ERR
            | REASON_CLASS_3_ERR
            | REASON_DISASSOC_LEAVING_BSS
            | REASON_ASSOC_BEFORE_AUTH
            | REASON_DISASSOC_UNSPECIFIED_QOS
            | REASON_DISASSOC_LACK_OF_BANDWIDTH
            | REASON_DISASSOC_TX_OUTSIDE_TXOP_LIMIT => Self::AssocFailed,
            REASON_DISASSOC_PWR_CAP_UNACCEPTABLE => Self::AssocPowerCapBad,
            REASON_DISASSOC_SUP_CHS_UNACCEPTABLE => Self::AssocSupChanBad,
            REASON_INVALID_INFO_ELEM => Self::IeInvalid,
            REASON_FOUR_WAY_HANDSHAKE_TIMEOUT => Self::FourWayTimeout,
            REASON_GROUP_KEY_UPDATE_TIMEOUT => Self::GroupKeyUpdateTimeout,
            REASON_DIFFERENT_INFO_ELEM => Self::FourWayIeDiffer,
            REASON_MULTICAST_CIPHER_NOT_VALID => Self::GroupCipherInvalid,
            REASON_UNICAST_CIPHER_NOT_VALID | REASON_PEER_CIPHER_UNSUPPORTED => {
                Self::PairwiseCipherInvalid
            }
            REASON_AKMP_NOT_VALID => Self::AkmpInvalid,
            REASON_UNSUPPORTED_RSNE_VERSION => Self::RsnVersionInvalid,
            REASON_INVALID_RSNE_CAPABILITIES => Self::RsnCapInvalid,
            REASON_IEEE_802_1X_AUTH_FAILED => Self::Dot1xAuthFailed,
            REASON_CIPHER_REJECT_SEC_POLICY => Self::CipherSuiteRejected,
            REASON_DISASSOC_ACK_LOST_POOR_CHANNEL => Self::LinkFailed,
            REASON_PASSWORD_ERROR => Self::AuthFailed,
            _ => Self::Unspecified,
        }
    }
}

/// The mailbox between the driver's dispatch context and the [Runner].
///
/// The integration glue obtains an [EventSink] from here and raises events
/// from the firmware callback or interrupt context; the runner drains them
/// and applies the state transitions.
pub struct EventQueue {
    channel: Channel<DefaultRawMutex, DriverEvent, EVENT_QUEUE_DEPTH>,
}

impl EventQueue {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
        }
    }
    pub fn sink(&self) -> EventSink<'_> {
        EventSink { queue: self }
    }
    pub(crate) fn receiver(&self) -> DynamicReceiver<'_, DriverEvent> {
        self.channel.dyn_receiver()
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Producer handle into the [EventQueue]. Cheap to copy; safe to use from
/// the driver's dispatch context since raising never blocks.
#[derive(Clone, Copy)]
pub struct EventSink<'a> {
    queue: &'a EventQueue,
}

impl EventSink<'_> {
    /// Raise an event without blocking. The event is dropped if the queue
    /// is full.
    pub fn raise(&self, event: DriverEvent) {
        if self.queue.channel.try_send(event).is_err() {
            warn!("event queue full, dropping {:?}", event);
        }
    }
    /// Raise an event, waiting for queue space. Must not be called from
    /// the driver's dispatch context.
    pub async fn send(&self, event: DriverEvent) {
        self.queue.channel.send(event).await;
    }
}

/// Receiver side of the application notification stream.
pub struct Notifications<'a> {
    pub(crate) events: DynamicReceiver<'a, WifiEvent>,
}

impl Notifications<'_> {
    pub async fn next(&self) -> WifiEvent {
        self.events.receive().await
    }
    pub fn try_next(&self) -> Option<WifiEvent> {
        self.events.try_receive().ok()
    }
}

/// The event dispatcher. Owns the consuming end of the [EventQueue] and
/// applies state transitions; must be polled (`run().await`) for any
/// control operation to make progress.
pub struct Runner<'a, D: WifiDriver, N: IpStack> {
    pub(crate) shared: &'a Shared<D, N>,
    pub(crate) events: DynamicReceiver<'a, DriverEvent>,
}

impl<D: WifiDriver, N: IpStack> Runner<'_, D, N> {
    pub async fn run(&mut self) -> ! {
        loop {
            let event = self.events.receive().await;
            self.handle_event(event);
        }
    }

    pub(crate) fn handle_event(&self, event: DriverEvent) {
        trace!("dispatching {:?}", event);
        match event {
            DriverEvent::InitComplete => {
                self.shared
                    .state
                    .firmware_ready
                    .store(true, Ordering::Relaxed);
                self.shared.notify_app(WifiEvent::Ready);
                self.shared.rendezvous.init_done.signal(());
            }
            DriverEvent::Connected {
                port: Port::Sta,
                peer,
            } => self.sta_connected(peer),
            DriverEvent::Connected {
                port: Port::Ap,
                peer,
            } => {
                self.shared
                    .notify_app(WifiEvent::ApStationConnected { mac: peer });
            }
            DriverEvent::Disconnected {
                port: Port::Sta,
                peer,
            } => self.sta_disconnected(peer),
            DriverEvent::Disconnected {
                port: Port::Ap,
                peer,
            } => {
                self.shared
                    .notify_app(WifiEvent::ApStationDisconnected { mac: peer });
            }
            DriverEvent::ConnectionFailed { port, reason_code } => {
                self.connection_failed(port, reason_code)
            }
            DriverEvent::ScanComplete => {
                self.shared.rendezvous.scan_done.signal(());
            }
            DriverEvent::StaAddressReady => self.sta_address_ready(),
        }
    }

    fn sta_connected(&self, bssid: [u8; 6]) {
        let state = &self.shared.state;
        state.reset_not_found();
        self.shared.with_net(|net| net.sta_link_up());
        state.associated.store(true, Ordering::Relaxed);
        debug!("station associated");
        self.shared.notify_app(WifiEvent::Connected { bssid });
        self.shared.rendezvous.connected.signal(Ok(()));
        if self.shared.config.sta_ip_mode == StaIpMode::Static {
            // No DHCP negotiation to wait for; the configured address is
            // usable as soon as the port is secured.
            self.sta_address_ready();
        }
    }

    fn sta_disconnected(&self, peer: [u8; 6]) {
        // The firmware emits extra disconnect events with an all-zero MAC
        // for a single disconnect command; they carry no information.
        if peer == [0u8; 6] {
            trace!("ignoring zero-MAC disconnect");
            return;
        }
        // A disconnect can also be reported while the station link is in
        // fact still established; only act on a confirmed loss.
        let link_up = self
            .shared
            .with_driver(|driver| driver.link_up())
            .unwrap_or(false);
        if link_up {
            debug!("disconnect reported but link still up, ignoring");
            return;
        }
        let state = &self.shared.state;
        self.shared.with_net(|net| {
            net.sta_link_down();
            net.sta_clear_address();
        });
        state.associated.store(false, Ordering::Relaxed);
        state.ip_ready.store(false, Ordering::Relaxed);
        debug!("station disconnected");
        self.shared.notify_app(WifiEvent::Disconnected {
            reason: FailureReason::Unspecified,
        });
        self.shared.rendezvous.disconnected.signal(());
    }

    fn connection_failed(&self, port: Port, reason_code: u16) {
        let reason = FailureReason::from_reason_code(reason_code);
        warn!(
            "connection failed on {:?}, code {}, classified {:?}",
            port, reason_code, reason
        );
        self.shared
            .notify_app(WifiEvent::ConnectionFailed { reason });

        let state = &self.shared.state;
        if reason == FailureReason::ApNotFound {
            // The firmware keeps searching on its own. Let it retry
            // silently until the threshold is hit with a caller waiting.
            let count = state.bump_not_found();
            if count >= self.shared.config.ssid_not_found_threshold
                && state.connect_waiting.load(Ordering::Relaxed)
            {
                state.reset_not_found();
                state.set_last_failure(reason);
                state.associated.store(false, Ordering::Relaxed);
                state.ip_ready.store(false, Ordering::Relaxed);
                self.shared.rendezvous.connected.signal(Err(reason));
            }
        } else if state.connect_waiting.load(Ordering::Relaxed) {
            state.reset_not_found();
            state.set_last_failure(reason);
            // A failure after the port was secured (e.g. a key handshake
            // timeout) has to resolve the ip-ready wait instead of the
            // connected wait.
            let was_associated = state.associated.swap(false, Ordering::Relaxed);
            state.ip_ready.store(false, Ordering::Relaxed);
            if was_associated {
                self.shared.rendezvous.ip_ready.signal(Err(reason));
            } else {
                self.shared.rendezvous.connected.signal(Err(reason));
            }
        }
    }

    fn sta_address_ready(&self) {
        self.shared.state.ip_ready.store(true, Ordering::Relaxed);
        debug!("station address ready");
        self.shared.notify_app(WifiEvent::IpReady);
        self.shared.rendezvous.ip_ready.signal(Ok(()));
    }
}
