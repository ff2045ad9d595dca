use crate::{
    driver::{IpStack, WifiDriver},
    manager::{Shared, WifiError, WifiResult},
    state::OperatingMode,
};

/// The mode-switch guard. The only legal transition sequence is: tear down
/// the IP services of the current mode, change the driver mode, then bring
/// up the IP services of the new mode. A rejected driver request leaves
/// the previous mode fully intact and brings nothing up.
impl<D: WifiDriver, N: IpStack> Shared<D, N> {
    /// Raw driver mode change with duplicate detection. IP services are
    /// untouched; sequencing them is the caller's responsibility.
    pub(crate) fn switch_driver_mode(&self, target: OperatingMode) -> WifiResult<()> {
        let current = self
            .with_driver(|driver| driver.op_mode())
            .map_err(WifiError::Driver)?;
        if current != target {
            self.with_driver(|driver| driver.set_op_mode(target))
                .map_err(WifiError::Driver)?;
        }
        self.state.set_op_mode(target);
        Ok(())
    }

    /// Full guarded transition including the IP services of both modes.
    pub(crate) fn switch_mode_guarded(&self, target: OperatingMode) -> WifiResult<()> {
        let current = self
            .with_driver(|driver| driver.op_mode())
            .map_err(WifiError::Driver)?;
        if current == target {
            debug!("already in mode {:?}", target);
            self.state.set_op_mode(target);
            return Ok(());
        }
        info!("switching mode {:?} -> {:?}", current, target);
        self.sta_ip_down();
        self.ap_ip_down();
        self.with_driver(|driver| driver.set_op_mode(target))
            .map_err(WifiError::Driver)?;
        self.state.set_op_mode(target);
        match target {
            OperatingMode::Station | OperatingMode::PeerToPeer => self.sta_ip_up(),
            OperatingMode::AccessPoint => self.ap_ip_up()?,
            OperatingMode::Monitor => {}
        }
        Ok(())
    }
}
