//! Date window used for the invoice history query.

use chrono::{Datelike, Months, NaiveDate, Utc};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Inclusive `[start, end]` range of calendar dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvoiceWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl InvoiceWindow {
    /// One calendar year ending on `today`.
    ///
    /// February 29 rolls forward to March 1 of the previous year, the date
    /// the portal's web client asks for.
    pub fn trailing_year(today: NaiveDate) -> Self {
        let start = if today.month() == 2 && today.day() == 29 {
            NaiveDate::from_ymd_opt(today.year() - 1, 3, 1)
        } else {
            today.checked_sub_months(Months::new(12))
        }
        .unwrap_or(NaiveDate::MIN);
        Self { start, end: today }
    }

    /// Window ending on the current UTC date.
    pub fn trailing_year_from_now() -> Self {
        Self::trailing_year(Utc::now().date_naive())
    }

    pub fn start_param(&self) -> String {
        self.start.format(DATE_FORMAT).to_string()
    }

    pub fn end_param(&self) -> String {
        self.end.format(DATE_FORMAT).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn spans_one_calendar_year() {
        let window = InvoiceWindow::trailing_year(date(2024, 3, 1));
        assert_eq!(window.start_param(), "2023-03-01");
        assert_eq!(window.end_param(), "2024-03-01");
    }

    #[test]
    fn leap_day_rolls_over_to_first_of_march() {
        let window = InvoiceWindow::trailing_year(date(2024, 2, 29));
        assert_eq!(window.start_param(), "2023-03-01");
        assert_eq!(window.end_param(), "2024-02-29");
    }

    #[test]
    fn days_around_leap_day_subtract_a_plain_year() {
        let window = InvoiceWindow::trailing_year(date(2024, 3, 1));
        assert_eq!(window.start_param(), "2023-03-01");
        let window = InvoiceWindow::trailing_year(date(2024, 2, 28));
        assert_eq!(window.start_param(), "2023-02-28");
    }

    #[test]
    fn pads_single_digit_components() {
        let window = InvoiceWindow::trailing_year(date(2025, 1, 5));
        assert_eq!(window.start_param(), "2024-01-05");
        assert_eq!(window.end_param(), "2025-01-05");
    }
}
