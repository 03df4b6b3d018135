use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

use crate::constants::DUE_OFFSET_DAYS;

/// Default timezone used to decide which calendar day an instant falls on.
pub const DEFAULT_LEDGER_TZ: Tz = chrono_tz::Europe::Brussels;

/// Converts a UTC instant to the calendar date in the given timezone.
pub fn local_date_from_utc(instant: DateTime<Utc>, tz: Tz) -> NaiveDate {
    instant.with_timezone(&tz).date_naive()
}

/// Start of the given local date, as a UTC instant.
///
/// Falls back to the first valid instant of the day when midnight does not
/// exist because of a DST transition.
pub fn start_of_local_day(date: NaiveDate, tz: Tz) -> Option<DateTime<Utc>> {
    let midnight = date.and_hms_opt(0, 0, 0)?;
    match tz.from_local_datetime(&midnight).earliest() {
        Some(start) => Some(start.with_timezone(&Utc)),
        None => {
            let one_am = date.and_hms_opt(1, 0, 0)?;
            tz.from_local_datetime(&one_am)
                .earliest()
                .map(|start| start.with_timezone(&Utc))
        }
    }
}

/// Items due before this instant count towards the current balance: the start
/// of the local day one week from `now`.
pub fn due_offset(now: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let target = now + Duration::days(DUE_OFFSET_DAYS);
    start_of_local_day(local_date_from_utc(target, tz), tz).unwrap_or(target)
}
