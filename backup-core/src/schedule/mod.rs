//! 备份计划
//!
//! 每种计划都由"每日规则 + 激活日过滤"组合而成：
//! - `Daily`：每天都激活
//! - `Weekly`：只在指定的星期几激活
//! - `Monthly`：只在指定的月内日期激活（支持"最后一天"）

mod daily;
mod monthly;
mod params;
pub mod scheduler;
mod time;
mod weekly;

pub use daily::DailyRule;
pub use monthly::{MonthDay, MonthDaySet, days_in_month};
pub use params::{
    IntervalUnit, LaunchDay, ScheduleConfig, ScheduleKind, ScheduleMode, ScheduleParams,
    ScheduleType,
};
pub use scheduler::{FireBatch, Scheduler};
pub use time::Time;
pub use weekly::WeekdaySet;

use crate::error::Result;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeDelta};
use std::fmt;
use uuid::Uuid;

/// 计划的唯一标识，调度器以它为键跟踪下一次触发时刻
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScheduleId(Uuid);

impl ScheduleId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// 激活日过滤
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationFilter {
    EveryDay,
    Weekdays(WeekdaySet),
    MonthDays(MonthDaySet),
}

impl ActivationFilter {
    fn is_empty(&self) -> bool {
        match self {
            ActivationFilter::EveryDay => false,
            ActivationFilter::Weekdays(set) => set.is_empty(),
            ActivationFilter::MonthDays(set) => set.is_empty(),
        }
    }

    fn contains(&self, date: NaiveDate) -> bool {
        match self {
            ActivationFilter::EveryDay => true,
            ActivationFilter::Weekdays(set) => set.contains(date),
            ActivationFilter::MonthDays(set) => set.contains(date),
        }
    }

    fn next_active_date(&self, date: NaiveDate) -> Option<NaiveDate> {
        match self {
            ActivationFilter::EveryDay => date.succ_opt(),
            ActivationFilter::Weekdays(set) => set.next_active_date(date),
            ActivationFilter::MonthDays(set) => set.next_active_date(date),
        }
    }
}

/// 一个已校验的备份计划
#[derive(Debug, Clone)]
pub struct Schedule {
    id: ScheduleId,
    created_at: DateTime<Local>,
    enabled: bool,
    description: Option<String>,
    rule: DailyRule,
    filter: ActivationFilter,
}

impl Schedule {
    /// 每天激活的计划
    pub fn daily(params: &ScheduleParams) -> Result<Self> {
        Self::build(params, ActivationFilter::EveryDay)
    }

    /// 按星期几激活的计划
    pub fn weekly(params: &ScheduleParams) -> Result<Self> {
        let days = WeekdaySet::new(params.days_of_week.iter().copied());
        Self::build(params, ActivationFilter::Weekdays(days))
    }

    /// 按月内日期激活的计划
    pub fn monthly(params: &ScheduleParams) -> Result<Self> {
        let days = MonthDaySet::new(params.launch_days.iter().copied());
        Self::build(params, ActivationFilter::MonthDays(days))
    }

    pub fn from_params(kind: ScheduleKind, params: &ScheduleParams) -> Result<Self> {
        match kind {
            ScheduleKind::Daily => Self::daily(params),
            ScheduleKind::Weekly => Self::weekly(params),
            ScheduleKind::Monthly => Self::monthly(params),
        }
    }

    pub fn from_config(config: &ScheduleConfig) -> Result<Self> {
        Self::from_params(config.kind, &config.to_params()?)
    }

    fn build(params: &ScheduleParams, filter: ActivationFilter) -> Result<Self> {
        let mode = params.mode()?;
        Ok(Self {
            id: ScheduleId::new(),
            created_at: Local::now(),
            enabled: params.enabled,
            description: params.description.clone(),
            rule: DailyRule::new(mode),
            filter,
        })
    }

    pub fn id(&self) -> ScheduleId {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Local> {
        self.created_at
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn kind(&self) -> ScheduleKind {
        match self.filter {
            ActivationFilter::EveryDay => ScheduleKind::Daily,
            ActivationFilter::Weekdays(_) => ScheduleKind::Weekly,
            ActivationFilter::MonthDays(_) => ScheduleKind::Monthly,
        }
    }

    pub fn schedule_type(&self) -> ScheduleType {
        self.rule.mode().schedule_type()
    }

    pub fn mode(&self) -> &ScheduleMode {
        self.rule.mode()
    }

    pub fn filter(&self) -> &ActivationFilter {
        &self.filter
    }

    /// 计算 `now` 之后的下一次触发时刻
    ///
    /// 计划被禁用或激活日集合为空时返回 None。
    pub fn get_next(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        if !self.enabled || self.filter.is_empty() {
            return None;
        }

        if let ActivationFilter::EveryDay = self.filter {
            return self.rule.next_from(now);
        }

        let today = now.date();
        if self.filter.contains(today) && !self.rule.exhausted_on(now) {
            return self.rule.next_from(now);
        }

        let date = self.filter.next_active_date(today)?;
        Some(self.rule.first_on(date))
    }

    /// 严格晚于 `now` 的下一次触发时刻
    ///
    /// 在区间起点时 `get_next` 会返回 `now` 本身，调度器重新排期时用这个版本。
    pub fn next_after(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        let next = self.get_next(now)?;
        if next > now {
            return Some(next);
        }
        self.get_next(now + TimeDelta::seconds(1))
            .filter(|next| *next > now)
    }

    /// 从 `now` 起依次列出接下来的 `count` 次触发时刻
    pub fn upcoming(&self, now: NaiveDateTime, count: usize) -> Vec<NaiveDateTime> {
        let mut result = Vec::with_capacity(count);
        let mut cursor = now;
        while result.len() < count {
            match self.next_after(cursor) {
                Some(next) => {
                    result.push(next);
                    cursor = next;
                }
                None => break,
            }
        }
        result
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind() {
            ScheduleKind::Daily => "daily",
            ScheduleKind::Weekly => "weekly",
            ScheduleKind::Monthly => "monthly",
        };
        match self.rule.mode() {
            ScheduleMode::Once { at } => write!(f, "{kind} at {at}")?,
            ScheduleMode::Recurring {
                interval,
                unit,
                start,
                end,
            } => write!(f, "{kind} every {interval} {unit:?} in [{start}, {end}]")?,
        }
        if !self.enabled {
            write!(f, " (disabled)")?;
        }
        Ok(())
    }
}
