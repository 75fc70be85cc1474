//! Two-point thermostat with a deadband.

use crate::model::{AtomicBand, Band, Sector, Temperature};

/// Relay state for one sector. Off without a band or a reading; at or
/// above `high` off, at or below `low` on, in between unchanged.
pub fn decide(band: Option<Band>, reading: Option<Temperature>, was_on: bool) -> bool {
    let (Some(band), Some(temp)) = (band, reading) else {
        return false;
    };
    if temp >= band.high {
        false
    } else if temp <= band.low {
        true
    } else {
        was_on
    }
}

pub fn decide_sector(
    band: Option<&AtomicBand>,
    sector: Sector,
    reading: Option<Temperature>,
    was_on: bool,
) -> bool {
    decide(band.map(|b| b.sector(sector)), reading, was_on)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BAND: Band = Band { high: 150, low: 140 };

    #[test]
    fn boundaries() {
        for was_on in [false, true] {
            assert!(!decide(Some(BAND), Some(150), was_on));
            assert!(decide(Some(BAND), Some(140), was_on));
            assert!(!decide(Some(BAND), Some(151), was_on));
            assert!(decide(Some(BAND), Some(139), was_on));
        }
    }

    #[test]
    fn deadband_keeps_state() {
        for temp in 141..150 {
            assert!(decide(Some(BAND), Some(temp), true));
            assert!(!decide(Some(BAND), Some(temp), false));
        }
    }

    #[test]
    fn missing_inputs_are_off() {
        assert!(!decide(None, Some(0), true));
        assert!(!decide(Some(BAND), None, true));
        assert!(!decide(None, None, true));
    }

    #[test]
    fn per_sector_band() {
        let band = AtomicBand { core: BAND, oven: Band { high: 90, low: 80 } };
        assert!(decide_sector(Some(&band), Sector::Core, Some(145), true));
        assert!(!decide_sector(Some(&band), Sector::Oven, Some(145), true));
        assert!(decide_sector(Some(&band), Sector::Oven, Some(70), false));
        assert!(!decide_sector(None, Sector::Core, Some(70), true));
    }
}
