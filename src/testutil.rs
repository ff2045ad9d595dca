//! Mock collaborators shared by the unit tests.

use core::cell::RefCell;

use crate::{
    driver::{
        AuthMode, CipherType, ConfigStore, DhcpServerError, DhcpServerSettings, DriverConfig,
        DriverError, IpStack, Port, StoreError, WifiDriver,
    },
    events::{DriverEvent, EventSink},
    state::{OperatingMode, ScanRecord, Ssid, WepKeys},
};

/// Builds an `EventQueue`, mock collaborators with observable logs, and a
/// `WifiManager` wired to them.
macro_rules! fixture {
    ($events:ident, $driver_log:ident, $net_log:ident, $mgr:ident, $config:expr) => {
        let $events = $crate::events::EventQueue::new();
        let $driver_log =
            ::core::cell::RefCell::new($crate::testutil::DriverLog::default());
        let $net_log = ::core::cell::RefCell::new($crate::testutil::NetLog::default());
        let mut $mgr = $crate::manager::WifiManager::new(
            $crate::testutil::MockDriver::new($events.sink(), &$driver_log),
            $crate::testutil::MockIpStack::new($events.sink(), &$net_log),
            $config,
            &$events,
        );
    };
}
pub(crate) use fixture;

/// Observable state of a [MockDriver], owned by the test body.
pub(crate) struct DriverLog {
    pub init_count: usize,
    pub radio_on: bool,
    pub radio_calls: usize,
    pub op_mode: OperatingMode,
    pub set_op_mode_calls: usize,
    pub fail_set_op_mode: bool,
    pub fail_radio: bool,
    pub fail_commit: bool,
    pub fail_scan_start: bool,
    pub sta_ssid: Ssid,
    pub ap_ssid: Ssid,
    pub sta_security: Option<(AuthMode, CipherType)>,
    pub ap_security: Option<(AuthMode, CipherType)>,
    pub sta_passphrase: heapless::Vec<u8, 64>,
    pub ap_passphrase: heapless::Vec<u8, 64>,
    pub ap_channel: u8,
    pub commit_count: usize,
    pub disconnect_calls: usize,
    pub scan_initialized: bool,
    pub scan_running: bool,
    pub scan_stop_calls: usize,
    pub scan_deinit_calls: usize,
    pub scan_results: heapless::Vec<ScanRecord, 8>,
    pub link_up: bool,
    pub mac: [u8; 6],
    /// Events raised through the sink on the next matching call,
    /// simulating the firmware's asynchronous responses.
    pub on_init: heapless::Vec<DriverEvent, 4>,
    pub on_commit: heapless::Vec<DriverEvent, 16>,
    pub on_disconnect: heapless::Vec<DriverEvent, 4>,
    pub on_scan_start: heapless::Vec<DriverEvent, 4>,
}

impl Default for DriverLog {
    fn default() -> Self {
        let mut on_init = heapless::Vec::new();
        let _ = on_init.push(DriverEvent::InitComplete);
        let mut on_disconnect = heapless::Vec::new();
        let _ = on_disconnect.push(DriverEvent::Disconnected {
            port: Port::Sta,
            peer: [0xee; 6],
        });
        let mut on_scan_start = heapless::Vec::new();
        let _ = on_scan_start.push(DriverEvent::ScanComplete);
        Self {
            init_count: 0,
            radio_on: false,
            radio_calls: 0,
            op_mode: OperatingMode::Monitor,
            set_op_mode_calls: 0,
            fail_set_op_mode: false,
            fail_radio: false,
            fail_commit: false,
            fail_scan_start: false,
            sta_ssid: Ssid::new(),
            ap_ssid: Ssid::new(),
            sta_security: None,
            ap_security: None,
            sta_passphrase: heapless::Vec::new(),
            ap_passphrase: heapless::Vec::new(),
            ap_channel: 0,
            commit_count: 0,
            disconnect_calls: 0,
            scan_initialized: false,
            scan_running: false,
            scan_stop_calls: 0,
            scan_deinit_calls: 0,
            scan_results: heapless::Vec::new(),
            link_up: false,
            mac: [0x00, 0x0c, 0x43, 0x26, 0x60, 0x01],
            on_init,
            on_commit: heapless::Vec::new(),
            on_disconnect,
            on_scan_start,
        }
    }
}

/// Simulated radio firmware. Records configuration calls in the shared
/// [DriverLog] and raises scripted events the way the real firmware
/// reports asynchronous completion.
pub(crate) struct MockDriver<'a> {
    sink: EventSink<'a>,
    log: &'a RefCell<DriverLog>,
}

impl<'a> MockDriver<'a> {
    pub fn new(sink: EventSink<'a>, log: &'a RefCell<DriverLog>) -> Self {
        Self { sink, log }
    }
    fn raise_all(&self, events: heapless::Vec<DriverEvent, 16>) {
        for event in events {
            self.sink.raise(event);
        }
    }
}

impl WifiDriver for MockDriver<'_> {
    fn init(&mut self, config: &DriverConfig) -> Result<(), DriverError> {
        let events = {
            let mut log = self.log.borrow_mut();
            log.init_count += 1;
            log.op_mode = config.op_mode;
            core::mem::take(&mut log.on_init)
        };
        for event in events {
            self.sink.raise(event);
        }
        Ok(())
    }
    fn set_radio(&mut self, on: bool) -> Result<(), DriverError> {
        let mut log = self.log.borrow_mut();
        log.radio_calls += 1;
        if log.fail_radio {
            return Err(DriverError::Rejected);
        }
        log.radio_on = on;
        Ok(())
    }
    fn set_op_mode(&mut self, mode: OperatingMode) -> Result<(), DriverError> {
        let mut log = self.log.borrow_mut();
        log.set_op_mode_calls += 1;
        if log.fail_set_op_mode {
            return Err(DriverError::Rejected);
        }
        log.op_mode = mode;
        Ok(())
    }
    fn op_mode(&mut self) -> Result<OperatingMode, DriverError> {
        Ok(self.log.borrow().op_mode)
    }
    fn set_ssid(&mut self, port: Port, ssid: &[u8]) -> Result<(), DriverError> {
        let mut log = self.log.borrow_mut();
        let slot = match port {
            Port::Sta => &mut log.sta_ssid,
            Port::Ap => &mut log.ap_ssid,
        };
        *slot = Ssid::from_slice(ssid).map_err(|()| DriverError::Rejected)?;
        Ok(())
    }
    fn ssid(&mut self, port: Port) -> Result<Ssid, DriverError> {
        let log = self.log.borrow();
        Ok(match port {
            Port::Sta => log.sta_ssid.clone(),
            Port::Ap => log.ap_ssid.clone(),
        })
    }
    fn set_security_mode(
        &mut self,
        port: Port,
        auth: AuthMode,
        cipher: CipherType,
    ) -> Result<(), DriverError> {
        let mut log = self.log.borrow_mut();
        match port {
            Port::Sta => log.sta_security = Some((auth, cipher)),
            Port::Ap => log.ap_security = Some((auth, cipher)),
        }
        Ok(())
    }
    fn set_passphrase(&mut self, port: Port, passphrase: &[u8]) -> Result<(), DriverError> {
        let mut log = self.log.borrow_mut();
        let slot = match port {
            Port::Sta => &mut log.sta_passphrase,
            Port::Ap => &mut log.ap_passphrase,
        };
        *slot = heapless::Vec::from_slice(passphrase).map_err(|()| DriverError::Rejected)?;
        Ok(())
    }
    fn set_wep_keys(&mut self, _port: Port, _keys: &WepKeys) -> Result<(), DriverError> {
        Ok(())
    }
    fn set_channel(&mut self, port: Port, channel: u8) -> Result<(), DriverError> {
        if port == Port::Ap {
            self.log.borrow_mut().ap_channel = channel;
        }
        Ok(())
    }
    fn commit(&mut self) -> Result<(), DriverError> {
        let events = {
            let mut log = self.log.borrow_mut();
            if log.fail_commit {
                return Err(DriverError::Rejected);
            }
            log.commit_count += 1;
            core::mem::take(&mut log.on_commit)
        };
        self.raise_all(events);
        Ok(())
    }
    fn disconnect(&mut self) -> Result<(), DriverError> {
        let events = {
            let mut log = self.log.borrow_mut();
            log.disconnect_calls += 1;
            log.link_up = false;
            core::mem::take(&mut log.on_disconnect)
        };
        for event in events {
            self.sink.raise(event);
        }
        Ok(())
    }
    fn scan_init(&mut self, _capacity: usize) -> Result<(), DriverError> {
        self.log.borrow_mut().scan_initialized = true;
        Ok(())
    }
    fn scan_start(&mut self, _ssid_filter: Option<&[u8]>) -> Result<(), DriverError> {
        let events = {
            let mut log = self.log.borrow_mut();
            if !log.scan_initialized {
                return Err(DriverError::NotReady);
            }
            if log.fail_scan_start {
                return Err(DriverError::Rejected);
            }
            log.scan_running = true;
            core::mem::take(&mut log.on_scan_start)
        };
        for event in events {
            self.sink.raise(event);
        }
        Ok(())
    }
    fn scan_stop(&mut self) -> Result<(), DriverError> {
        let mut log = self.log.borrow_mut();
        log.scan_running = false;
        log.scan_stop_calls += 1;
        Ok(())
    }
    fn scan_deinit(&mut self) -> Result<(), DriverError> {
        let mut log = self.log.borrow_mut();
        log.scan_initialized = false;
        log.scan_deinit_calls += 1;
        Ok(())
    }
    fn scan_results(&mut self, out: &mut [ScanRecord]) -> usize {
        let log = self.log.borrow();
        let mut count = 0;
        for (slot, record) in out.iter_mut().zip(log.scan_results.iter()) {
            *slot = record.clone();
            count += 1;
        }
        count
    }
    fn mac_address(&mut self, _port: Port) -> Result<[u8; 6], DriverError> {
        Ok(self.log.borrow().mac)
    }
    fn rssi(&mut self) -> Result<i8, DriverError> {
        Ok(-42)
    }
    fn link_up(&mut self) -> Result<bool, DriverError> {
        Ok(self.log.borrow().link_up)
    }
}

/// Observable state of a [MockIpStack].
pub(crate) struct NetLog {
    pub sta_link_is_up: bool,
    pub sta_link_down_called: bool,
    pub address_cleared: bool,
    pub watching: bool,
    pub dhcp_running: bool,
    pub dhcp_start_calls: usize,
    pub dhcp_stop_calls: usize,
    /// Report an address as soon as the DHCP client starts.
    pub auto_address: bool,
    pub ap_link_is_up: bool,
    pub server_running: bool,
    pub server_start_calls: usize,
    pub server_settings: Option<DhcpServerSettings>,
    pub fail_dhcp_server: bool,
    /// Set if both IP services were ever observed up at the same time.
    pub services_overlapped: bool,
}

impl Default for NetLog {
    fn default() -> Self {
        Self {
            sta_link_is_up: false,
            sta_link_down_called: false,
            address_cleared: false,
            watching: false,
            dhcp_running: false,
            dhcp_start_calls: 0,
            dhcp_stop_calls: 0,
            auto_address: true,
            ap_link_is_up: false,
            server_running: false,
            server_start_calls: 0,
            server_settings: None,
            fail_dhcp_server: false,
            services_overlapped: false,
        }
    }
}

impl NetLog {
    fn check_overlap(&mut self) {
        if self.dhcp_running && self.server_running {
            self.services_overlapped = true;
        }
    }
}

/// Simulated IP stack. Reports an address through the event queue when the
/// DHCP client starts, like the real stack's status callback would.
pub(crate) struct MockIpStack<'a> {
    sink: EventSink<'a>,
    log: &'a RefCell<NetLog>,
}

impl<'a> MockIpStack<'a> {
    pub fn new(sink: EventSink<'a>, log: &'a RefCell<NetLog>) -> Self {
        Self { sink, log }
    }
}

impl IpStack for MockIpStack<'_> {
    fn sta_link_up(&mut self) {
        self.log.borrow_mut().sta_link_is_up = true;
    }
    fn sta_link_down(&mut self) {
        let mut log = self.log.borrow_mut();
        log.sta_link_is_up = false;
        log.sta_link_down_called = true;
    }
    fn sta_clear_address(&mut self) {
        self.log.borrow_mut().address_cleared = true;
    }
    fn watch_sta_address(&mut self, watch: bool) {
        self.log.borrow_mut().watching = watch;
    }
    fn dhcp_start(&mut self) {
        let report = {
            let mut log = self.log.borrow_mut();
            log.dhcp_running = true;
            log.dhcp_start_calls += 1;
            log.check_overlap();
            log.auto_address && log.watching
        };
        if report {
            self.sink.raise(DriverEvent::StaAddressReady);
        }
    }
    fn dhcp_release_and_stop(&mut self) {
        let mut log = self.log.borrow_mut();
        log.dhcp_running = false;
        log.dhcp_stop_calls += 1;
    }
    fn ap_link_up(&mut self) {
        self.log.borrow_mut().ap_link_is_up = true;
    }
    fn ap_link_down(&mut self) {
        self.log.borrow_mut().ap_link_is_up = false;
    }
    fn dhcp_server_start(&mut self, settings: &DhcpServerSettings) -> Result<(), DhcpServerError> {
        let mut log = self.log.borrow_mut();
        log.server_start_calls += 1;
        if log.fail_dhcp_server {
            return Err(DhcpServerError);
        }
        log.server_running = true;
        log.server_settings = Some(*settings);
        log.check_overlap();
        Ok(())
    }
    fn dhcp_server_stop(&mut self) {
        self.log.borrow_mut().server_running = false;
    }
}

/// In-memory configuration store.
#[derive(Default)]
pub(crate) struct MemStore {
    entries: heapless::Vec<(heapless::String<24>, heapless::String<48>), 8>,
}

impl MemStore {
    fn full_key(group: &str, key: &str) -> heapless::String<24> {
        let mut out = heapless::String::new();
        let _ = out.push_str(group);
        let _ = out.push('/');
        let _ = out.push_str(key);
        out
    }
    pub fn get(&self, group: &str, key: &str) -> Option<&str> {
        let full = Self::full_key(group, key);
        self.entries
            .iter()
            .find(|(k, _)| *k == full)
            .map(|(_, v)| v.as_str())
    }
}

impl ConfigStore for MemStore {
    fn read_str(&mut self, group: &str, key: &str, out: &mut [u8]) -> Result<usize, StoreError> {
        let value = self.get(group, key).ok_or(StoreError::NotFound)?;
        let bytes = value.as_bytes();
        if bytes.len() > out.len() {
            return Err(StoreError::Io);
        }
        out[..bytes.len()].copy_from_slice(bytes);
        Ok(bytes.len())
    }
    fn write_str(&mut self, group: &str, key: &str, value: &str) -> Result<(), StoreError> {
        let full = Self::full_key(group, key);
        let mut stored = heapless::String::new();
        stored.push_str(value).map_err(|()| StoreError::Io)?;
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == full) {
            entry.1 = stored;
            return Ok(());
        }
        self.entries
            .push((full, stored))
            .map_err(|_| StoreError::Io)?;
        Ok(())
    }
}
