use core::net::Ipv4Addr;

use portable_atomic::Ordering;

use crate::{
    driver::{DhcpServerSettings, IpStack, WifiDriver},
    manager::{Shared, WifiError, WifiResult},
};

/// How the station interface obtains its address.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StaIpMode {
    /// Negotiate an address with the DHCP client.
    #[default]
    Dhcp,
    /// The interface is configured statically; it is usable as soon as the
    /// link comes up.
    Static,
}

/// Addressing of the AP interface, from which the DHCP server settings are
/// derived.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ApIpConfig {
    pub addr: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub dns: [Ipv4Addr; 2],
    pub pool_start: Ipv4Addr,
    pub pool_end: Ipv4Addr,
}

impl Default for ApIpConfig {
    fn default() -> Self {
        Self {
            addr: Ipv4Addr::new(192, 168, 2, 1),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            dns: [Ipv4Addr::new(8, 8, 8, 8), Ipv4Addr::new(192, 168, 2, 1)],
            pool_start: Ipv4Addr::new(192, 168, 2, 2),
            pool_end: Ipv4Addr::new(192, 168, 2, 5),
        }
    }
}

impl ApIpConfig {
    pub(crate) fn dhcp_settings(&self) -> DhcpServerSettings {
        DhcpServerSettings {
            server_addr: self.addr,
            gateway: self.addr,
            netmask: self.netmask,
            dns1: self.dns[0],
            dns2: self.dns[1],
            pool_start: self.pool_start,
            pool_end: self.pool_end,
        }
    }
}

/// The IP service coordinator. At most one of the station and AP services
/// is up at any time; callers tear the other one down before bringing one
/// up, and the `debug_assert`s hold them to it.
impl<D: WifiDriver, N: IpStack> Shared<D, N> {
    pub(crate) fn sta_ip_up(&self) {
        let state = &self.state;
        if state.sta_ip_up.load(Ordering::Relaxed) {
            debug!("station IP service already up");
            return;
        }
        debug_assert!(!state.ap_ip_up.load(Ordering::Relaxed));
        debug!("station IP service up");
        self.with_net(|net| {
            net.watch_sta_address(true);
            match self.config.sta_ip_mode {
                StaIpMode::Dhcp => net.dhcp_start(),
                // Statically configured; readiness is reported once the
                // port is secured.
                StaIpMode::Static => {}
            }
        });
        state.sta_ip_up.store(true, Ordering::Relaxed);
    }

    pub(crate) fn sta_ip_down(&self) {
        let state = &self.state;
        if !state.sta_ip_up.load(Ordering::Relaxed) {
            debug!("station IP service already down");
            return;
        }
        debug!("station IP service down");
        self.with_net(|net| {
            net.watch_sta_address(false);
            net.dhcp_release_and_stop();
            net.sta_link_down();
        });
        state.sta_ip_up.store(false, Ordering::Relaxed);
        state.ip_ready.store(false, Ordering::Relaxed);
    }

    pub(crate) fn ap_ip_up(&self) -> WifiResult<()> {
        let state = &self.state;
        if state.ap_ip_up.load(Ordering::Relaxed) {
            debug!("AP IP service already up");
            return Ok(());
        }
        debug_assert!(!state.sta_ip_up.load(Ordering::Relaxed));
        debug!("AP IP service up");
        let settings = self.config.ap_ip.dhcp_settings();
        self.with_net(|net| {
            net.ap_link_up();
            match net.dhcp_server_start(&settings) {
                Ok(()) => Ok(()),
                Err(e) => {
                    net.ap_link_down();
                    Err(e)
                }
            }
        })
        .map_err(WifiError::DhcpServer)?;
        state.ap_ip_up.store(true, Ordering::Relaxed);
        Ok(())
    }

    pub(crate) fn ap_ip_down(&self) {
        let state = &self.state;
        if !state.ap_ip_up.load(Ordering::Relaxed) {
            debug!("AP IP service already down");
            return;
        }
        debug!("AP IP service down");
        self.with_net(|net| {
            net.dhcp_server_stop();
            net.ap_link_down();
        });
        state.ap_ip_up.store(false, Ordering::Relaxed);
    }
}
