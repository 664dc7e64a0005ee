use chrono::{Datelike, Days, NaiveDate, Weekday};

/// 周计划的激活日集合（去重，按周日为起点排序）
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WeekdaySet {
    days: Vec<Weekday>,
}

impl WeekdaySet {
    pub fn new(days: impl IntoIterator<Item = Weekday>) -> Self {
        let mut days: Vec<Weekday> = days.into_iter().collect();
        days.sort_by_key(|d| d.num_days_from_sunday());
        days.dedup();
        Self { days }
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn days(&self) -> &[Weekday] {
        &self.days
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.days.contains(&date.weekday())
    }

    /// 严格晚于 `date` 的下一个激活日；本周没有剩余时回绕到下周最早的激活日
    pub fn next_active_date(&self, date: NaiveDate) -> Option<NaiveDate> {
        let today = date.weekday().num_days_from_sunday();
        let target = self
            .days
            .iter()
            .map(|d| d.num_days_from_sunday())
            .find(|d| *d > today)
            .or_else(|| self.days.first().map(|d| d.num_days_from_sunday()))?;

        let mut offset = (target + 7 - today) % 7;
        if offset == 0 {
            offset = 7;
        }
        date.checked_add_days(Days::new(u64::from(offset)))
    }
}
