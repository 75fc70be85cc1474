//! Local calendar arithmetic in the appliance's configured timezone.
//!
//! Day chunks are written in wall-clock seconds of the day. On DST days a
//! wall-clock time can be missing (spring forward) or repeated (fall back):
//! a missing time maps to the transition instant and a repeated one to its
//! first occurrence. The mapping is monotonic in the offset, so the chunks
//! of a day still tile it without gaps or overlaps.

use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, Offset,
    TimeZone, Utc, Weekday,
};
use chrono_tz::Tz;

use crate::model::{TimeRange, Timestamp, SECONDS_PER_DAY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalCalendar {
    tz: Tz,
}

impl LocalCalendar {
    pub fn new(tz: Tz) -> LocalCalendar {
        LocalCalendar { tz }
    }

    pub fn local_date(&self, t: Timestamp) -> NaiveDate {
        let utc = to_utc(t).naive_utc();
        utc.checked_add_signed(Duration::seconds(self.offset_secs(t)))
            .unwrap_or(utc)
            .date()
    }

    pub fn weekday(&self, t: Timestamp) -> Weekday {
        self.local_date(t).weekday()
    }

    /// First instant of `date`.
    pub fn midnight(&self, date: NaiveDate) -> Option<Timestamp> {
        self.instant_at(date, 0)
    }

    /// `[midnight(date), midnight(next day))`. `None` for a date the zone
    /// skipped entirely, or one at the edge of the representable calendar.
    pub fn day_range(&self, date: NaiveDate) -> Option<TimeRange> {
        self.span(date, 0, SECONDS_PER_DAY)
    }

    /// The instant at which the wall clock of `date` reads `offset` seconds
    /// past midnight. `offset == 86400` is midnight of the following day.
    /// `None` past the last representable date.
    pub fn instant_at(&self, date: NaiveDate, offset: u32) -> Option<Timestamp> {
        let naive = date
            .and_time(NaiveTime::MIN)
            .checked_add_signed(Duration::seconds(offset as i64))?;
        Some(match self.tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => dt.timestamp(),
            LocalResult::Ambiguous(earliest, _) => earliest.timestamp(),
            LocalResult::None => self.gap_end(naive),
        })
    }

    /// The instants covered by wall-clock seconds `[start, end)` of `date`.
    /// `None` when the span vanishes into a DST gap or leaves the calendar.
    pub fn span(&self, date: NaiveDate, start: u32, end: u32) -> Option<TimeRange> {
        TimeRange::new(self.instant_at(date, start)?, self.instant_at(date, end)?)
    }

    /// Local dates touched by `range`, in order.
    pub fn dates_covering(&self, range: &TimeRange) -> impl Iterator<Item = NaiveDate> {
        let first = self.local_date(range.start);
        let last = self.local_date(range.end - 1);
        first.iter_days().take_while(move |date| *date <= last)
    }

    /// Transition instant of the gap containing the nonexistent `naive`.
    fn gap_end(&self, naive: NaiveDateTime) -> Timestamp {
        let guess = naive.and_utc().timestamp();
        // The probes a day either side must not reach another transition.
        // Offsets stay within a day, so the gap itself is always bracketed.
        let before = self.offset_secs(guess - SECONDS_PER_DAY as i64);
        let after = self.offset_secs(guess + SECONDS_PER_DAY as i64);
        if after <= before {
            return guess - before;
        }
        // offset(lo) == before, offset(hi) == after
        let (mut lo, mut hi) = (guess - after, guess - before);
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            if self.offset_secs(mid) == before {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        hi
    }

    fn offset_secs(&self, t: Timestamp) -> i64 {
        self.tz
            .offset_from_utc_datetime(&to_utc(t).naive_utc())
            .fix()
            .local_minus_utc() as i64
    }
}

fn to_utc(t: Timestamp) -> DateTime<Utc> {
    DateTime::from_timestamp(t, 0).unwrap_or(if t < 0 {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn london() -> LocalCalendar {
        LocalCalendar::new(chrono_tz::Europe::London)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    // 2024-01-08T00:00:00Z, a Monday
    const MONDAY_JAN: Timestamp = 1_704_672_000;

    #[test]
    fn winter_is_utc() {
        let cal = london();
        assert_eq!(cal.midnight(date(2024, 1, 8)), Some(MONDAY_JAN));
        assert_eq!(cal.weekday(MONDAY_JAN), Weekday::Mon);
        assert_eq!(cal.weekday(MONDAY_JAN - 1), Weekday::Sun);
        assert_eq!(cal.instant_at(date(2024, 1, 8), 6 * 3600), Some(MONDAY_JAN + 6 * 3600));
    }

    #[test]
    fn summer_midnight_is_an_hour_early() {
        let cal = london();
        // 2024-07-01T00:00:00Z
        let utc_midnight = 1_719_792_000;
        assert_eq!(cal.midnight(date(2024, 7, 1)), Some(utc_midnight - 3600));
        assert_eq!(cal.local_date(utc_midnight - 3600), date(2024, 7, 1));
        assert_eq!(cal.local_date(utc_midnight - 3601), date(2024, 6, 30));
    }

    #[test]
    fn spring_forward_gap_maps_to_transition() {
        let cal = london();
        let day = date(2024, 3, 31);
        // 2024-03-31T01:00:00Z, when 01:00 GMT became 02:00 BST
        let transition = 1_711_846_800;
        assert_eq!(cal.midnight(day), Some(transition - 3600));
        assert_eq!(cal.instant_at(day, 3600), Some(transition));
        assert_eq!(cal.instant_at(day, 5400), Some(transition));
        assert_eq!(cal.instant_at(day, 7200), Some(transition));
        assert_eq!(cal.span(day, 3600, 5400), None);
        assert_eq!(cal.span(day, 5400, 9000), TimeRange::new(transition, transition + 1800));
        let range = cal.day_range(day).unwrap();
        assert_eq!(range.end - range.start, 23 * 3600);
    }

    #[test]
    fn fall_back_uses_first_occurrence() {
        let cal = london();
        let day = date(2024, 10, 27);
        // 2024-10-27T00:00:00Z is 01:00 BST, the first 01:00 of the day
        let first_one_am = 1_729_987_200;
        assert_eq!(cal.instant_at(day, 3600), Some(first_one_am));
        assert_eq!(cal.instant_at(day, 5400), Some(first_one_am + 1800));
        let range = cal.day_range(day).unwrap();
        assert_eq!(range.end - range.start, 25 * 3600);
    }

    #[test]
    fn dates_covering_range() {
        let cal = london();
        let range = TimeRange::new(MONDAY_JAN - 1, MONDAY_JAN + 86_400).unwrap();
        let dates: Vec<_> = cal.dates_covering(&range).collect();
        assert_eq!(dates, vec![date(2024, 1, 7), date(2024, 1, 8)]);

        let one_day = TimeRange::new(MONDAY_JAN, MONDAY_JAN + 86_400).unwrap();
        assert_eq!(cal.dates_covering(&one_day).count(), 1);
    }

    #[test]
    fn skipped_date_has_no_range() {
        // Samoa moved across the date line, 2011-12-29 24:00 -10:00 became
        // 2011-12-31 00:00 +14:00 at 2011-12-30T10:00:00Z.
        let cal = LocalCalendar::new(chrono_tz::Pacific::Apia);
        let jump = 1_325_239_200;
        assert_eq!(cal.day_range(date(2011, 12, 30)), None);
        assert_eq!(cal.span(date(2011, 12, 30), 0, 3600), None);
        assert_eq!(cal.day_range(date(2011, 12, 29)).map(|r| r.end), Some(jump));
        assert_eq!(cal.day_range(date(2011, 12, 31)).map(|r| r.start), Some(jump));
        assert_eq!(cal.local_date(jump - 1), date(2011, 12, 29));
        assert_eq!(cal.local_date(jump), date(2011, 12, 31));
        assert_eq!(cal.weekday(jump), Weekday::Sat);
    }

    #[test]
    fn last_representable_day_has_no_end() {
        let cal = london();
        let last = NaiveDate::MAX;
        assert!(cal.midnight(last).is_some());
        assert_eq!(cal.instant_at(last, SECONDS_PER_DAY), None);
        assert_eq!(cal.day_range(last), None);
        assert!(cal.span(last, 0, 3600).is_some());
    }
}
