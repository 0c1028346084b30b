use jiff::{
    civil::{date, Date},
    ToSpan,
};

pub trait HolidayTrait {
    fn is_holiday(&self, date: &Date) -> bool;
}

/// Federal public holidays of Switzerland.  Cantonal holidays are not
/// included.
pub const SWISS_CALENDAR: SwissCalendar = SwissCalendar {};

pub struct SwissCalendar {}

impl HolidayTrait for SwissCalendar {
    fn is_holiday(&self, date: &Date) -> bool {
        match date.month() {
            1 => is_new_year(date),
            5 | 6 => is_ascension_day(date),
            8 => is_national_day(date),
            12 => is_christmas(date),
            _ => false,
        }
    }
}

pub fn is_new_year(date: &Date) -> bool {
    date.month() == 1 && date.day() == 1
}

/// Ascension is 39 days after Easter Sunday, always a Thursday in May or
/// early June.
pub fn is_ascension_day(date: &Date) -> bool {
    match easter_sunday(date.year()).checked_add(39.days()) {
        Ok(candidate) => candidate == *date,
        Err(_) => false,
    }
}

/// Swiss National Day, Aug 1st.  Not moved when it falls on a weekend.
pub fn is_national_day(date: &Date) -> bool {
    date.month() == 8 && date.day() == 1
}

pub fn is_christmas(date: &Date) -> bool {
    date.month() == 12 && date.day() == 25
}

/// Gregorian Easter Sunday (anonymous Gregorian algorithm).
pub fn easter_sunday(year: i16) -> Date {
    let y = year as i32;
    let a = y % 19;
    let b = y / 100;
    let c = y % 100;
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = (h + l - 7 * m + 114) % 31 + 1;
    date(year, month as i8, day as i8)
}

#[cfg(test)]
mod tests {
    use jiff::civil::date;

    use crate::holiday::*;

    #[test]
    fn test_easter() {
        assert_eq!(easter_sunday(2022), date(2022, 4, 17));
        assert_eq!(easter_sunday(2023), date(2023, 4, 9));
        assert_eq!(easter_sunday(2024), date(2024, 3, 31));
        assert_eq!(easter_sunday(2025), date(2025, 4, 20));
    }

    #[test]
    fn test_holidays() {
        assert!(is_new_year(&date(2023, 1, 1)));
        assert!(!is_new_year(&date(2023, 1, 2)));
        assert!(is_ascension_day(&date(2024, 5, 9)));
        assert!(is_ascension_day(&date(2025, 5, 29)));
        assert!(!is_ascension_day(&date(2025, 5, 28)));
        assert!(is_national_day(&date(2021, 8, 1)));
        assert!(is_christmas(&date(2022, 12, 25)));
        assert!(!is_christmas(&date(2022, 12, 26)));
    }

    #[test]
    fn test_swiss_calendar() {
        assert!(SWISS_CALENDAR.is_holiday(&date(2025, 1, 1)));
        assert!(SWISS_CALENDAR.is_holiday(&date(2023, 5, 18)));
        assert!(SWISS_CALENDAR.is_holiday(&date(2025, 8, 1)));
        assert!(!SWISS_CALENDAR.is_holiday(&date(2025, 7, 4)));
        assert!(!SWISS_CALENDAR.is_holiday(&date(2025, 4, 20)));
    }
}
