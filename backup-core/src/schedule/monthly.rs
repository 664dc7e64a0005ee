use crate::constants::schedule::MONTH_SEARCH_LIMIT;
use crate::error::{BackupError, Result};
use chrono::{Datelike, Months, NaiveDate};

/// 月内的一天：具体日期 1..=31，或"当月最后一天"
///
/// `Last` 在每个月按实际天数解析；排序时排在所有具体日期之后。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MonthDay {
    Day(u32),
    Last,
}

impl MonthDay {
    pub fn day(day: u32) -> Result<Self> {
        if !(1..=31).contains(&day) {
            return Err(BackupError::validation(format!(
                "day must be in range 1..31, got {day}"
            )));
        }
        Ok(MonthDay::Day(day))
    }

    /// 在指定年月中解析为具体日期；该月没有这一天时返回 None
    pub fn resolve(&self, year: i32, month: u32) -> Option<u32> {
        let last = days_in_month(year, month)?;
        match self {
            MonthDay::Day(d) if *d <= last => Some(*d),
            MonthDay::Day(_) => None,
            MonthDay::Last => Some(last),
        }
    }
}

/// 指定月份的天数
pub fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = first.checked_add_months(Months::new(1))?;
    next.pred_opt().map(|d| d.day())
}

/// 月计划的激活日集合
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MonthDaySet {
    days: Vec<MonthDay>,
}

impl MonthDaySet {
    pub fn new(days: impl IntoIterator<Item = MonthDay>) -> Self {
        let mut days: Vec<MonthDay> = days.into_iter().collect();
        days.sort();
        days.dedup();
        Self { days }
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn days(&self) -> &[MonthDay] {
        &self.days
    }

    /// 该月实际生效的日期，升序去重
    fn resolved(&self, year: i32, month: u32) -> Vec<u32> {
        let mut days: Vec<u32> = self
            .days
            .iter()
            .filter_map(|d| d.resolve(year, month))
            .collect();
        days.sort_unstable();
        days.dedup();
        days
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.resolved(date.year(), date.month()).contains(&date.day())
    }

    /// 严格晚于 `date` 的下一个激活日
    ///
    /// 先在本月剩余日期中查找，再逐月向后查找（跳过天数不足的月份）。
    pub fn next_active_date(&self, date: NaiveDate) -> Option<NaiveDate> {
        if self.days.is_empty() {
            return None;
        }

        if let Some(day) = self
            .resolved(date.year(), date.month())
            .into_iter()
            .find(|d| *d > date.day())
        {
            return date.with_day(day);
        }

        let first_of_month = date.with_day(1)?;
        (1..=MONTH_SEARCH_LIMIT).find_map(|offset| {
            let month = first_of_month.checked_add_months(Months::new(offset))?;
            let day = *self.resolved(month.year(), month.month()).first()?;
            month.with_day(day)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_day_range() {
        assert!(MonthDay::day(0).unwrap_err().is_validation());
        assert!(MonthDay::day(32).unwrap_err().is_validation());
        assert_eq!(MonthDay::day(31).unwrap(), MonthDay::Day(31));
    }

    #[test]
    fn test_days_in_month() {
        assert_eq!(days_in_month(2023, 2), Some(28));
        assert_eq!(days_in_month(2024, 2), Some(29));
        assert_eq!(days_in_month(2024, 12), Some(31));
        assert_eq!(days_in_month(2024, 4), Some(30));
    }

    #[test]
    fn test_last_resolves_per_month() {
        let set = MonthDaySet::new([MonthDay::Last]);
        assert_eq!(set.next_active_date(date(2023, 2, 10)), Some(date(2023, 2, 28)));
        assert_eq!(set.next_active_date(date(2023, 2, 28)), Some(date(2023, 3, 31)));
        assert!(set.contains(date(2023, 4, 30)));
    }

    #[test]
    fn test_later_day_in_same_month() {
        let set = MonthDaySet::new([MonthDay::Day(20), MonthDay::Day(5)]);
        assert_eq!(set.next_active_date(date(2024, 3, 6)), Some(date(2024, 3, 20)));
        assert_eq!(set.next_active_date(date(2024, 3, 20)), Some(date(2024, 4, 5)));
    }

    #[test]
    fn test_short_months_are_skipped() {
        let set = MonthDaySet::new([MonthDay::Day(31)]);
        assert_eq!(set.next_active_date(date(2024, 1, 31)), Some(date(2024, 3, 31)));
        assert_eq!(set.next_active_date(date(2024, 3, 31)), Some(date(2024, 5, 31)));
    }

    #[test]
    fn test_last_and_31_overlap() {
        let set = MonthDaySet::new([MonthDay::Day(31), MonthDay::Last]);
        assert_eq!(set.next_active_date(date(2024, 3, 30)), Some(date(2024, 3, 31)));
        assert_eq!(set.next_active_date(date(2024, 3, 31)), Some(date(2024, 4, 30)));
    }
}
