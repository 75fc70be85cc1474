//! Probe readings arriving over UDP.

use anyhow::{Context, Result};
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use smoker_presets::{Readings, Sector, Sensor, SensorError, Temperature};
use smoker_protocol::fragment_combiner::{FragmentCombiner, MessageHandler};
use smoker_protocol::protos::generated::dev::{
    self, DeviceMessage, ProbeFault, ProbeReport, RelayState,
};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Sample {
    Reading(Temperature),
    Fault(ProbeFault),
}

#[derive(Debug, Clone, Copy)]
struct Stamped {
    at: Instant,
    sample: Sample,
}

#[derive(Debug, Default)]
struct Latest {
    core: Option<Stamped>,
    oven: Option<Stamped>,
}

impl Latest {
    fn slot(&mut self, sector: Sector) -> &mut Option<Stamped> {
        match sector {
            Sector::Core => &mut self.core,
            Sector::Oven => &mut self.oven,
        }
    }
}

/// Keeps the newest report per probe.
pub struct ProbeListener {
    latest: Arc<RwLock<Latest>>,
}

impl ProbeListener {
    fn record(&self, src: SocketAddr, report: &ProbeReport, at: Instant) {
        if !report.has_sector() {
            warn!(%src, "probe report without sector");
            return;
        }
        let sector = sector_from_wire(report.sector());
        let sample = if report.has_fault() {
            warn!(%src, %sector, fault = ?report.fault(), "probe fault");
            Sample::Fault(report.fault())
        } else if report.has_temperature_deci() {
            let temp = deci_to_degrees(report.temperature_deci());
            debug!(%src, %sector, temp, "probe reading");
            Sample::Reading(temp)
        } else {
            warn!(%src, %sector, "probe report without reading");
            return;
        };
        let mut latest = self.latest.write().unwrap_or_else(PoisonError::into_inner);
        *latest.slot(sector) = Some(Stamped { at, sample });
    }
}

impl MessageHandler<DeviceMessage> for ProbeListener {
    fn on_message(&mut self, src: SocketAddr, msg: DeviceMessage) -> Result<()> {
        if let Some(report) = msg.probe.as_ref() {
            self.record(src, report, Instant::now());
        } else if let Some(report) = msg.relay.as_ref() {
            debug!(
                %src,
                sector = %sector_from_wire(report.sector()),
                on = report.state() == RelayState::ON,
                "relay report"
            );
        } else {
            warn!(%src, "empty device message");
        }
        Ok(())
    }
}

/// The [`Sensor`] the controller polls; fed by a [`ProbeListener`].
pub struct ProbeSensor {
    latest: Arc<RwLock<Latest>>,
    listening: Arc<AtomicBool>,
    stale: Duration,
}

impl Sensor for ProbeSensor {
    fn read_temperatures(&mut self) -> Result<Readings, SensorError> {
        if !self.listening.load(Ordering::Relaxed) {
            return Err(SensorError::Unavailable("probe listener stopped".to_owned()));
        }
        let now = Instant::now();
        let latest = self.latest.read().unwrap_or_else(PoisonError::into_inner);
        let fresh = |slot: Option<Stamped>| slot.filter(|s| now.duration_since(s.at) <= self.stale);
        let (core, oven) = (fresh(latest.core), fresh(latest.oven));
        if core.is_none() && oven.is_none() {
            return Err(SensorError::NoFreshReadings {
                stale_secs: self.stale.as_secs(),
            });
        }
        let reading = |slot: Option<Stamped>| match slot.map(|s| s.sample) {
            Some(Sample::Reading(temp)) => Some(temp),
            Some(Sample::Fault(_)) | None => None,
        };
        Ok(Readings {
            core: reading(core),
            oven: reading(oven),
        })
    }
}

fn pair(stale: Duration) -> (ProbeListener, ProbeSensor) {
    let latest = Arc::new(RwLock::new(Latest::default()));
    let listener = ProbeListener { latest: latest.clone() };
    let sensor = ProbeSensor {
        latest,
        listening: Arc::new(AtomicBool::new(true)),
        stale,
    };
    (listener, sensor)
}

/// Binds `bind` and receives probe reports on a background thread.
pub fn spawn_probe_listener(bind: &str, stale: Duration) -> Result<ProbeSensor> {
    let socket = UdpSocket::bind(bind).with_context(|| format!("binding probe socket {}", bind))?;
    let (mut listener, sensor) = pair(stale);
    let listening = sensor.listening.clone();
    info!(bind, "listening for probe reports");
    thread::Builder::new()
        .name("probe-listener".to_owned())
        .spawn(move || {
            let mut combiner = FragmentCombiner::<DeviceMessage>::new();
            if let Err(e) = combiner.run(&socket, &mut listener) {
                error!(error = %e, "probe listener stopped");
            }
            listening.store(false, Ordering::Relaxed);
        })
        .context("spawning probe listener")?;
    Ok(sensor)
}

fn sector_from_wire(sector: dev::Sector) -> Sector {
    match sector {
        dev::Sector::CORE => Sector::Core,
        dev::Sector::OVEN => Sector::Oven,
    }
}

fn deci_to_degrees(deci: i32) -> Temperature {
    (deci as f64 / 10.0).round() as Temperature
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn src() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 0, 200)), 4000)
    }

    fn probe(sector: dev::Sector, deci: Option<i32>, fault: Option<ProbeFault>) -> DeviceMessage {
        let mut report = ProbeReport::new();
        report.set_sector(sector);
        if let Some(deci) = deci {
            report.set_temperature_deci(deci);
        }
        if let Some(fault) = fault {
            report.set_fault(fault);
        }
        let mut msg = DeviceMessage::new();
        msg.probe = Some(report).into();
        msg
    }

    #[test]
    fn rounds_tenths() {
        assert_eq!(deci_to_degrees(1454), 145);
        assert_eq!(deci_to_degrees(1455), 146);
        assert_eq!(deci_to_degrees(-15), -2);
    }

    #[test]
    fn latest_reading_per_probe() -> Result<()> {
        let (mut listener, mut sensor) = pair(Duration::from_secs(180));
        assert_eq!(
            sensor.read_temperatures(),
            Err(SensorError::NoFreshReadings { stale_secs: 180 })
        );

        listener.on_message(src(), probe(dev::Sector::CORE, Some(1400), None))?;
        listener.on_message(src(), probe(dev::Sector::CORE, Some(1452), None))?;
        assert_eq!(sensor.read_temperatures(), Ok(Readings { core: Some(145), oven: None }));

        let fault = Some(ProbeFault::P_OPEN_CIRCUIT);
        listener.on_message(src(), probe(dev::Sector::OVEN, None, fault))?;
        assert_eq!(sensor.read_temperatures(), Ok(Readings { core: Some(145), oven: None }));

        listener.on_message(src(), probe(dev::Sector::OVEN, Some(851), None))?;
        assert_eq!(sensor.read_temperatures(), Ok(Readings { core: Some(145), oven: Some(85) }));
        Ok(())
    }

    #[test]
    fn stale_readings_are_unknown() -> Result<()> {
        let (mut listener, mut sensor) = pair(Duration::from_millis(1));
        listener.on_message(src(), probe(dev::Sector::CORE, Some(1400), None))?;
        thread::sleep(Duration::from_millis(20));
        assert!(matches!(sensor.read_temperatures(), Err(SensorError::NoFreshReadings { .. })));
        Ok(())
    }

    #[test]
    fn stopped_listener_is_unavailable() {
        let (_listener, mut sensor) = pair(Duration::from_secs(180));
        sensor.listening.store(false, Ordering::Relaxed);
        assert!(matches!(sensor.read_temperatures(), Err(SensorError::Unavailable(_))));
    }
}
