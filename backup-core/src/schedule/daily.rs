use super::params::ScheduleMode;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};

/// 每日触发规则，周计划和月计划在其上叠加激活日过滤
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyRule {
    mode: ScheduleMode,
}

impl DailyRule {
    pub fn new(mode: ScheduleMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> &ScheduleMode {
        &self.mode
    }

    /// 计算 `now` 之后的下一次触发时刻（不考虑启用状态和激活日）
    pub fn next_from(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        match &self.mode {
            ScheduleMode::Once { at } => {
                let occurs = now.date().and_time(at.to_naive());
                if now < occurs {
                    Some(occurs)
                } else {
                    Some(now.date().succ_opt()?.and_time(at.to_naive()))
                }
            }
            ScheduleMode::Recurring { start, end, .. } => {
                let next = self.next_interval_secs(now);
                // 与间隔边界一样按整秒比较
                let time_of_day = now.time().with_nanosecond(0)?;

                if time_of_day <= start.to_naive() {
                    return Some(now.date().and_time(start.to_naive()));
                }

                if time_of_day >= end.to_naive() || next > i64::from(end.seconds_of_day()) {
                    return Some(now.date().succ_opt()?.and_time(start.to_naive()));
                }

                let next = NaiveTime::from_num_seconds_from_midnight_opt(u32::try_from(next).ok()?, 0)?;
                Some(now.date().and_time(next))
            }
        }
    }

    /// 指定日期上的第一次触发时刻
    pub fn first_on(&self, date: NaiveDate) -> NaiveDateTime {
        match &self.mode {
            ScheduleMode::Once { at } => date.and_time(at.to_naive()),
            ScheduleMode::Recurring { start, .. } => date.and_time(start.to_naive()),
        }
    }

    /// 当天是否已没有剩余的触发机会
    pub fn exhausted_on(&self, now: NaiveDateTime) -> bool {
        match &self.mode {
            ScheduleMode::Once { at } => now.date().and_time(at.to_naive()) <= now,
            ScheduleMode::Recurring { end, .. } => {
                self.next_interval_secs(now) > i64::from(end.seconds_of_day())
            }
        }
    }

    /// 从区间起点对齐的、严格晚于 `now` 的下一个间隔边界（当天秒数，可能超过一天）
    fn next_interval_secs(&self, now: NaiveDateTime) -> i64 {
        match &self.mode {
            ScheduleMode::Once { at } => i64::from(at.seconds_of_day()),
            ScheduleMode::Recurring {
                interval,
                unit,
                start,
                ..
            } => {
                // 先截断到整秒
                let time_of_day = i64::from(now.time().num_seconds_from_midnight());
                let start = i64::from(start.seconds_of_day());
                let step = i64::from(*interval) * unit.seconds();
                let finished = (time_of_day - start).div_euclid(step);
                start + (finished + 1) * step
            }
        }
    }
}
