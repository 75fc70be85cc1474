use anyhow::Result;
use tracing::debug;

use smoker_presets::{Actuator, ActuatorError, Sector};
use smoker_protocol::protos::generated::dev;
use smoker_protocol::relay::RelayClient;

/// Drives the core and oven relays, one board each.
pub struct RelayActuator {
    core: RelayClient,
    oven: RelayClient,
}

impl RelayActuator {
    pub fn new(core_addr: &str, oven_addr: &str) -> Result<RelayActuator> {
        Ok(RelayActuator {
            core: RelayClient::new(core_addr)?,
            oven: RelayClient::new(oven_addr)?,
        })
    }

    fn send(&self, sector: Sector, on: bool) -> Result<(), ActuatorError> {
        let (client, wire) = match sector {
            Sector::Core => (&self.core, dev::Sector::CORE),
            Sector::Oven => (&self.oven, dev::Sector::OVEN),
        };
        debug!(%sector, on, addr = client.addr(), "setting relay");
        client.set_relay(wire, on).map_err(|e| ActuatorError::Relay {
            sector,
            message: format!("{:#}", e),
        })
    }
}

impl Actuator for RelayActuator {
    fn set_relays(&mut self, core_on: bool, oven_on: bool) -> Result<(), ActuatorError> {
        // Both boards are told even if the first send fails.
        let core = self.send(Sector::Core, core_on);
        let oven = self.send(Sector::Oven, oven_on);
        core.and(oven)
    }
}
