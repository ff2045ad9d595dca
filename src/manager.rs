use core::{cell::RefCell, fmt::Write as _};

use embassy_sync::{blocking_mutex, channel::Channel, mutex::Mutex};
use embassy_time::Instant;
use portable_atomic::Ordering;

use crate::{
    driver::{
        ConfigStore, DhcpServerError, DriverConfig, DriverError, IpStack, Port, StoreError,
        WifiDriver,
    },
    events::{
        EventQueue, FailureReason, Notifications, Runner, WifiEvent, NOTIFY_QUEUE_DEPTH,
    },
    ip::{ApIpConfig, StaIpMode},
    state::{ConnectionState, Credentials, NetworkProfile, OperatingMode, ScanRecord},
    sync::Rendezvous,
    DefaultRawMutex,
};

/// Stored value selecting the world-safe regulatory domain.
const WORLD_SAFE_COUNTRY_CODE: &str = "WS";
/// Country code reported when no regulatory domain has been configured.
const DEFAULT_COUNTRY_CODE: &str = "00";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WifiError {
    InvalidSsid,
    InvalidPassphrase,
    InvalidWepKey,
    InvalidChannel,
    InvalidCountryCode,
    UnsupportedSecurity,
    /// The driver rejected a configuration call or commit.
    Driver(DriverError),
    /// The association attempt resolved with a classified failure.
    ConnectionFailed(FailureReason),
    DhcpServer(DhcpServerError),
    Store(StoreError),
}

pub type WifiResult<T> = Result<T, WifiError>;

/// Tunables of the connection manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    /// Consecutive AP-not-found events absorbed before a blocked connect
    /// resolves with [FailureReason::ApNotFound]. The firmware retries on
    /// its own below this threshold.
    pub ssid_not_found_threshold: u16,
    pub sta_ip_mode: StaIpMode,
    pub ap_ip: ApIpConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ssid_not_found_threshold: 10,
            sta_ip_mode: StaIpMode::Dhcp,
            ap_ip: ApIpConfig::default(),
        }
    }
}

pub(crate) struct RendezvousSet {
    pub(crate) init_done: Rendezvous<()>,
    pub(crate) connected: Rendezvous<Result<(), FailureReason>>,
    pub(crate) disconnected: Rendezvous<()>,
    pub(crate) ip_ready: Rendezvous<Result<(), FailureReason>>,
    pub(crate) scan_done: Rendezvous<()>,
}

impl RendezvousSet {
    const fn new() -> Self {
        Self {
            init_done: Rendezvous::new(),
            connected: Rendezvous::new(),
            disconnected: Rendezvous::new(),
            ip_ready: Rendezvous::new(),
            scan_done: Rendezvous::new(),
        }
    }
}

/// State shared between the [Control] half and the [Runner] half.
pub(crate) struct Shared<D, N> {
    pub(crate) config: Config,
    pub(crate) state: ConnectionState,
    pub(crate) rendezvous: RendezvousSet,
    pub(crate) driver: blocking_mutex::Mutex<DefaultRawMutex, RefCell<D>>,
    pub(crate) net: blocking_mutex::Mutex<DefaultRawMutex, RefCell<N>>,
    pub(crate) notify: Channel<DefaultRawMutex, WifiEvent, NOTIFY_QUEUE_DEPTH>,
}

impl<D: WifiDriver, N: IpStack> Shared<D, N> {
    pub(crate) fn with_driver<R>(&self, f: impl FnOnce(&mut D) -> R) -> R {
        self.driver.lock(|driver| f(&mut driver.borrow_mut()))
    }
    pub(crate) fn with_net<R>(&self, f: impl FnOnce(&mut N) -> R) -> R {
        self.net.lock(|net| f(&mut net.borrow_mut()))
    }
    pub(crate) fn notify_app(&self, event: WifiEvent) {
        if self.notify.try_send(event).is_err() {
            warn!("notification queue full, dropping {:?}", event);
        }
    }
    /// Push SSID, security mode and credentials for `port` to the driver.
    /// Nothing takes effect until the next commit.
    pub(crate) fn apply_profile(&self, port: Port, profile: &NetworkProfile) -> WifiResult<()> {
        if port == Port::Ap {
            self.with_driver(|driver| driver.set_channel(Port::Ap, profile.channel))
                .map_err(WifiError::Driver)?;
        }
        self.with_driver(|driver| driver.set_ssid(port, &profile.ssid))
            .map_err(WifiError::Driver)?;
        let (auth, cipher) = match port {
            Port::Sta => profile.security.sta_modes(),
            Port::Ap => profile
                .security
                .ap_modes()
                .ok_or(WifiError::UnsupportedSecurity)?,
        };
        self.with_driver(|driver| driver.set_security_mode(port, auth, cipher))
            .map_err(WifiError::Driver)?;
        match &profile.credentials {
            Credentials::None => {}
            Credentials::Passphrase(passphrase) => {
                self.with_driver(|driver| driver.set_passphrase(port, passphrase))
                    .map_err(WifiError::Driver)?;
            }
            Credentials::WepKeys(keys) => {
                self.with_driver(|driver| driver.set_wep_keys(port, keys))
                    .map_err(WifiError::Driver)?;
            }
        }
        Ok(())
    }
}

/// The connection manager. Owns the driver, the IP stack and the shared
/// connection state; [split](Self::split) hands out the caller-facing
/// [Control], the event-dispatching [Runner] and the application
/// [Notifications] stream.
pub struct WifiManager<'ev, D: WifiDriver, N: IpStack> {
    shared: Shared<D, N>,
    op_lock: Mutex<DefaultRawMutex, ()>,
    events: &'ev EventQueue,
}

impl<'ev, D: WifiDriver, N: IpStack> WifiManager<'ev, D, N> {
    pub fn new(driver: D, net: N, config: Config, events: &'ev EventQueue) -> Self {
        Self {
            shared: Shared {
                config,
                state: ConnectionState::new(),
                rendezvous: RendezvousSet::new(),
                driver: blocking_mutex::Mutex::new(RefCell::new(driver)),
                net: blocking_mutex::Mutex::new(RefCell::new(net)),
                notify: Channel::new(),
            },
            op_lock: Mutex::new(()),
            events,
        }
    }

    pub fn split(&mut self) -> (Control<'_, D, N>, Runner<'_, D, N>, Notifications<'_>) {
        (
            Control {
                shared: &self.shared,
                op_lock: &self.op_lock,
            },
            Runner {
                shared: &self.shared,
                events: self.events.receiver(),
            },
            Notifications {
                events: self.shared.notify.dyn_receiver(),
            },
        )
    }
}

/// Deinitializes the driver's scan subsystem when dropped, so every exit
/// path out of [Control::scan] leaves it torn down.
struct ScanGuard<'a, D: WifiDriver> {
    driver: &'a blocking_mutex::Mutex<DefaultRawMutex, RefCell<D>>,
}

impl<D: WifiDriver> Drop for ScanGuard<'_, D> {
    fn drop(&mut self) {
        self.driver.lock(|driver| {
            let _ = driver.borrow_mut().scan_deinit();
        });
    }
}

/// The caller-facing half of the manager.
///
/// Every state-mutating operation serializes against the others through a
/// single lock held for the whole operation, and suspends until the
/// [Runner] signals completion. None of these may be called from the
/// driver's own dispatch context: the signal that would resume them can
/// only be produced there.
pub struct Control<'a, D: WifiDriver, N: IpStack> {
    pub(crate) shared: &'a Shared<D, N>,
    op_lock: &'a Mutex<DefaultRawMutex, ()>,
}

impl<D: WifiDriver, N: IpStack> Control<'_, D, N> {
    /// Power the radio on. The first call performs the one-time firmware
    /// bring-up and waits for it to complete; later calls only re-enable
    /// the radio. Idempotent.
    pub async fn power_on(&mut self) -> WifiResult<()> {
        let _op = self.op_lock.lock().await;
        let state = &self.shared.state;
        if state.radio_on.load(Ordering::Relaxed) {
            return Ok(());
        }
        if !state.firmware_ready.load(Ordering::Relaxed) {
            info!("one-time driver bring-up");
            let start_time = Instant::now();
            self.shared.rendezvous.init_done.clear();
            self.shared
                .with_driver(|driver| driver.init(&DriverConfig::default()))
                .map_err(WifiError::Driver)?;
            self.shared.rendezvous.init_done.wait().await;
            trace!(
                "bring-up complete, took {} ms",
                start_time.elapsed().as_millis()
            );
        } else {
            self.shared
                .with_driver(|driver| driver.set_radio(true))
                .map_err(WifiError::Driver)?;
        }
        state.radio_on.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Power the radio off, first falling back to station mode as a safe
    /// baseline. A no-op when the radio is already off.
    pub async fn power_off(&mut self) -> WifiResult<()> {
        let _op = self.op_lock.lock().await;
        let state = &self.shared.state;
        if !state.radio_on.load(Ordering::Relaxed) {
            return Ok(());
        }
        self.shared.sta_ip_down();
        self.shared.ap_ip_down();
        self.shared.switch_driver_mode(OperatingMode::Station)?;
        self.shared
            .with_driver(|driver| driver.set_radio(false))
            .map_err(WifiError::Driver)?;
        state.radio_on.store(false, Ordering::Relaxed);
        state.associated.store(false, Ordering::Relaxed);
        state.ip_ready.store(false, Ordering::Relaxed);
        Ok(())
    }

    /// Join the network described by `profile` and wait until an address
    /// is usable.
    ///
    /// A profile that fails validation is rejected before anything is
    /// touched. A classified connection failure reported by the firmware
    /// resolves the call with [WifiError::ConnectionFailed].
    pub async fn connect(&mut self, profile: &NetworkProfile) -> WifiResult<()> {
        profile.validate()?;
        let _op = self.op_lock.lock().await;
        info!("connecting");
        let shared = self.shared;
        let state = &shared.state;

        shared.ap_ip_down();
        shared.sta_ip_down();
        shared.switch_driver_mode(OperatingMode::Station)?;
        shared.apply_profile(Port::Sta, profile)?;

        shared.rendezvous.connected.clear();
        shared.rendezvous.ip_ready.clear();
        state.reset_not_found();
        state.connect_waiting.store(true, Ordering::Relaxed);

        if let Err(e) = shared.with_driver(|driver| driver.commit()) {
            state.connect_waiting.store(false, Ordering::Relaxed);
            return Err(WifiError::Driver(e));
        }
        shared.sta_ip_up();

        debug!("waiting for association");
        if let Err(reason) = shared.rendezvous.connected.wait().await {
            state.connect_waiting.store(false, Ordering::Relaxed);
            if reason == FailureReason::ApNotFound {
                // The target was never seen; stop the firmware's
                // background search before reporting.
                shared.with_driver(|driver| {
                    let _ = driver.scan_stop();
                });
            }
            return Err(WifiError::ConnectionFailed(reason));
        }
        debug!("waiting for address");
        if let Err(reason) = shared.rendezvous.ip_ready.wait().await {
            state.connect_waiting.store(false, Ordering::Relaxed);
            return Err(WifiError::ConnectionFailed(reason));
        }
        state.connect_waiting.store(false, Ordering::Relaxed);
        state.record_association(&profile.ssid, profile.security);
        info!("connected");
        Ok(())
    }

    /// Leave the current network. A no-op when not associated.
    pub async fn disconnect(&mut self) -> WifiResult<()> {
        let _op = self.op_lock.lock().await;
        let shared = self.shared;
        if !shared.state.associated.load(Ordering::Relaxed) {
            debug!("already disconnected");
            return Ok(());
        }
        shared.sta_ip_down();
        shared.rendezvous.disconnected.clear();
        shared
            .with_driver(|driver| driver.disconnect())
            .map_err(WifiError::Driver)?;
        shared.rendezvous.disconnected.wait().await;
        info!("disconnected");
        Ok(())
    }

    /// Run a scan cycle and copy the results into `out`, returning how
    /// many records were written. The current station SSID, when set, is
    /// used as a filter. The driver's scan subsystem is deinitialized on
    /// every exit path.
    pub async fn scan(&mut self, out: &mut [ScanRecord]) -> WifiResult<usize> {
        let _op = self.op_lock.lock().await;
        let shared = self.shared;
        let filter = shared
            .with_driver(|driver| driver.ssid(Port::Sta))
            .map_err(WifiError::Driver)?;
        let filter = if filter.is_empty() {
            None
        } else {
            Some(filter)
        };

        shared
            .with_driver(|driver| driver.scan_init(out.len()))
            .map_err(WifiError::Driver)?;
        let _deinit = ScanGuard {
            driver: &shared.driver,
        };

        shared.rendezvous.scan_done.clear();
        shared
            .with_driver(|driver| driver.scan_start(filter.as_deref()))
            .map_err(WifiError::Driver)?;
        shared.rendezvous.scan_done.wait().await;
        shared
            .with_driver(|driver| driver.scan_stop())
            .map_err(WifiError::Driver)?;

        let count = shared.with_driver(|driver| driver.scan_results(out));
        let count = count.min(out.len());
        debug!("scan found {} networks", count);
        shared.notify_app(WifiEvent::ScanDone { count });
        Ok(count)
    }

    /// Publish an access point described by `profile`.
    ///
    /// The firmware emits no completion event for AP bring-up; once the
    /// commit and the DHCP server start have gone through, the manager
    /// reports [WifiEvent::ApStateChanged] itself.
    pub async fn start_ap(&mut self, profile: &NetworkProfile) -> WifiResult<()> {
        profile.validate()?;
        if profile.security.ap_modes().is_none() {
            return Err(WifiError::UnsupportedSecurity);
        }
        if !(1..=14).contains(&profile.channel) {
            return Err(WifiError::InvalidChannel);
        }
        let _op = self.op_lock.lock().await;
        info!("starting access point");
        let shared = self.shared;

        shared.sta_ip_down();
        shared.ap_ip_down();
        shared.switch_driver_mode(OperatingMode::AccessPoint)?;
        shared.apply_profile(Port::Ap, profile)?;
        shared
            .with_driver(|driver| driver.commit())
            .map_err(WifiError::Driver)?;
        shared.ap_ip_up()?;
        shared.notify_app(WifiEvent::ApStateChanged { up: true });
        Ok(())
    }

    /// Tear the access point down and fall back to station mode.
    pub async fn stop_ap(&mut self) -> WifiResult<()> {
        let _op = self.op_lock.lock().await;
        info!("stopping access point");
        let shared = self.shared;
        shared.ap_ip_down();
        shared.switch_driver_mode(OperatingMode::Station)?;
        shared.notify_app(WifiEvent::ApStateChanged { up: false });
        Ok(())
    }

    /// Whether an address is usable; with a profile, additionally whether
    /// the last association matches its SSID and security kind. Lets
    /// callers skip a redundant reconnect.
    pub fn is_connected(&self, profile: Option<&NetworkProfile>) -> bool {
        if !self.shared.state.ip_ready.load(Ordering::Relaxed) {
            return false;
        }
        match profile {
            None => true,
            Some(profile) => self.shared.state.matches_last(profile),
        }
    }

    /// Switch the operating mode, tearing down and rebuilding the IP
    /// services around the driver mode change. Switching to the active
    /// mode is a no-op; a rejected request leaves everything as it was.
    pub async fn switch_mode(&mut self, mode: OperatingMode) -> WifiResult<()> {
        let _op = self.op_lock.lock().await;
        self.shared.switch_mode_guarded(mode)
    }

    pub fn op_mode(&self) -> OperatingMode {
        self.shared.state.op_mode()
    }

    /// Classification of the most recent connection failure, if any.
    pub fn last_failure(&self) -> Option<FailureReason> {
        self.shared.state.last_failure()
    }

    pub fn mac_address(&mut self, port: Port) -> WifiResult<[u8; 6]> {
        self.shared
            .with_driver(|driver| driver.mac_address(port))
            .map_err(WifiError::Driver)
    }

    pub fn rssi(&mut self) -> WifiResult<i8> {
        self.shared
            .with_driver(|driver| driver.rssi())
            .map_err(WifiError::Driver)
    }

    /// Persist a new MAC address. The hardware cannot change its address
    /// at runtime, so the station and AP addresses (the latter with the
    /// locally-administered bit set) are written to the store and apply
    /// on the next boot. Skips the write when the address is unchanged.
    pub fn set_mac_address<S: ConfigStore>(
        &mut self,
        store: &mut S,
        mac: [u8; 6],
    ) -> WifiResult<()> {
        let current = self
            .shared
            .with_driver(|driver| driver.mac_address(Port::Sta))
            .map_err(WifiError::Driver)?;
        if current == mac {
            debug!("MAC address unchanged, skipping store write");
            return Ok(());
        }
        store
            .write_str("STA", "MacAddr", &format_mac(mac))
            .map_err(WifiError::Store)?;
        let mut ap_mac = mac;
        ap_mac[0] |= 0x02;
        store
            .write_str("AP", "MacAddr", &format_mac(ap_mac))
            .map_err(WifiError::Store)?;
        Ok(())
    }

    /// Persist the two-letter regulatory country code. "00" selects the
    /// world-safe domain and is stored under its internal alias.
    pub fn set_country_code<S: ConfigStore>(
        &mut self,
        store: &mut S,
        code: &str,
    ) -> WifiResult<()> {
        if code.len() != 2 || !code.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(WifiError::InvalidCountryCode);
        }
        let code = if code == DEFAULT_COUNTRY_CODE {
            WORLD_SAFE_COUNTRY_CODE
        } else {
            code
        };
        store
            .write_str("common", "CountryCode", code)
            .map_err(WifiError::Store)
    }

    /// Read back the configured country code; "00" when none is stored or
    /// the world-safe domain is active.
    pub fn country_code<S: ConfigStore>(
        &mut self,
        store: &mut S,
    ) -> WifiResult<heapless::String<4>> {
        let mut buf = [0u8; 4];
        let code = match store.read_str("common", "CountryCode", &mut buf) {
            Ok(len) => {
                let code = core::str::from_utf8(&buf[..len])
                    .map_err(|_| WifiError::Store(StoreError::Io))?;
                if code == WORLD_SAFE_COUNTRY_CODE {
                    DEFAULT_COUNTRY_CODE
                } else {
                    code
                }
            }
            Err(StoreError::NotFound) => DEFAULT_COUNTRY_CODE,
            Err(e) => return Err(WifiError::Store(e)),
        };
        let mut out = heapless::String::new();
        let _ = out.push_str(code);
        Ok(out)
    }
}

fn format_mac(mac: [u8; 6]) -> heapless::String<17> {
    let mut out = heapless::String::new();
    let _ = write!(
        out,
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    );
    out
}
