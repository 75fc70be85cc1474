use crate::protos::generated::dev::{RelayControl, RelayState, Sector};
use anyhow::{Context, Result};
use protobuf::Message;
use std::net::UdpSocket;

pub const RELAY_PORT: u16 = 4210;

/// Sends relay commands to one relay board over UDP.
pub struct RelayClient {
    udp: UdpSocket,
    addr: String,
}

impl RelayClient {
    /// `addr` is `host` or `host:port`; the relay port is used when none is given.
    pub fn new(addr: &str) -> Result<RelayClient> {
        let udp = UdpSocket::bind("0.0.0.0:0").context("Failed to bind UDP socket for relay")?;
        Ok(RelayClient {
            udp,
            addr: with_default_port(addr),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn set_relay(&self, sector: Sector, on: bool) -> Result<()> {
        let out_bytes = encode_relay_control(sector, on)?;
        self.udp
            .send_to(&out_bytes, self.addr.as_str())
            .with_context(|| format!("sending relay command to {}", self.addr))?;
        Ok(())
    }
}

pub fn encode_relay_control(sector: Sector, on: bool) -> Result<Vec<u8>> {
    let mut msg = RelayControl::new();
    msg.set_sector(sector);
    msg.set_state(if on { RelayState::ON } else { RelayState::OFF });
    Ok(msg.write_to_bytes()?)
}

fn with_default_port(addr: &str) -> String {
    if addr.contains(':') {
        addr.to_owned()
    } else {
        format!("{}:{}", addr, RELAY_PORT)
    }
}
