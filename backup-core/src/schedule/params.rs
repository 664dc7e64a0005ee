use super::monthly::MonthDay;
use super::time::Time;
use crate::constants::schedule::{DEFAULT_SPAN_END, DEFAULT_SPAN_START, LAST_DAY_OF_MONTH_LEGACY};
use crate::error::{BackupError, Result};
use chrono::Weekday;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// 循环计划的间隔单位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntervalUnit {
    Second,
    Minute,
    Hour,
}

impl IntervalUnit {
    pub fn seconds(&self) -> i64 {
        match self {
            IntervalUnit::Second => 1,
            IntervalUnit::Minute => 60,
            IntervalUnit::Hour => 3600,
        }
    }
}

impl FromStr for IntervalUnit {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "second" | "seconds" => Ok(IntervalUnit::Second),
            "minute" | "minutes" => Ok(IntervalUnit::Minute),
            "hour" | "hours" => Ok(IntervalUnit::Hour),
            other => Err(BackupError::validation(format!(
                "unknown interval unit '{other}', must be one of: second, minute, hour"
            ))),
        }
    }
}

/// 计划类型：每天固定时刻一次，或在活动区间内按间隔循环
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScheduleType {
    Once,
    Recurring,
}

/// 经过校验的触发方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleMode {
    Once {
        at: Time,
    },
    Recurring {
        interval: u32,
        unit: IntervalUnit,
        start: Time,
        end: Time,
    },
}

impl ScheduleMode {
    pub fn schedule_type(&self) -> ScheduleType {
        match self {
            ScheduleMode::Once { .. } => ScheduleType::Once,
            ScheduleMode::Recurring { .. } => ScheduleType::Recurring,
        }
    }
}

/// 构造任意计划所需参数的并集
///
/// `occurs_once_at` 与 `interval_unit` 必须且只能设置其一。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleParams {
    pub occurs_once_at: Option<Time>,
    pub interval_unit: Option<IntervalUnit>,
    pub interval: Option<i64>,
    pub start_at: Option<Time>,
    pub end_at: Option<Time>,
    pub description: Option<String>,
    pub enabled: bool,
    pub days_of_week: Vec<Weekday>,
    pub launch_days: Vec<MonthDay>,
}

impl Default for ScheduleParams {
    fn default() -> Self {
        Self {
            occurs_once_at: None,
            interval_unit: None,
            interval: None,
            start_at: None,
            end_at: None,
            description: None,
            enabled: true,
            days_of_week: Vec::new(),
            launch_days: Vec::new(),
        }
    }
}

impl ScheduleParams {
    pub fn once(at: Time) -> Self {
        Self {
            occurs_once_at: Some(at),
            ..Self::default()
        }
    }

    pub fn recurring(
        unit: IntervalUnit,
        interval: i64,
        start_at: Option<Time>,
        end_at: Option<Time>,
    ) -> Self {
        Self {
            interval_unit: Some(unit),
            interval: Some(interval),
            start_at,
            end_at,
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn on_weekdays(mut self, days: impl IntoIterator<Item = Weekday>) -> Self {
        self.days_of_week = days.into_iter().collect();
        self
    }

    pub fn on_month_days(mut self, days: impl IntoIterator<Item = MonthDay>) -> Self {
        self.launch_days = days.into_iter().collect();
        self
    }

    /// 校验并得出触发方式
    pub fn mode(&self) -> Result<ScheduleMode> {
        match (self.occurs_once_at, self.interval_unit) {
            (Some(_), Some(_)) => Err(BackupError::validation(
                "choose only a single option: OccursOnceAt for a single daily fire, or IntervalUnit for recurring fires",
            )),
            (None, None) => Err(BackupError::validation(
                "choose a single option: OccursOnceAt or IntervalUnit (for recurring fires)",
            )),
            (Some(at), None) => Ok(ScheduleMode::Once { at }),
            (None, Some(unit)) => {
                let interval = self.interval.unwrap_or(0);
                if interval <= 0 {
                    return Err(BackupError::validation(format!(
                        "interval must be greater than 0, got {interval}"
                    )));
                }
                let interval = u32::try_from(interval).map_err(|_| {
                    BackupError::validation(format!("interval {interval} is too large"))
                })?;

                let (h, m, s) = DEFAULT_SPAN_START;
                let start = self.start_at.map_or_else(|| Time::new(h, m, s), Ok)?;
                let (h, m, s) = DEFAULT_SPAN_END;
                let end = self.end_at.map_or_else(|| Time::new(h, m, s), Ok)?;

                if start >= end {
                    return Err(BackupError::validation(format!(
                        "end time {end} must be greater than start time {start}"
                    )));
                }

                Ok(ScheduleMode::Recurring {
                    interval,
                    unit,
                    start,
                    end,
                })
            }
        }
    }
}

/// 计划种类（序列化字段 `Type`）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScheduleKind {
    #[serde(alias = "SimpleSchedules.DailySchedule", alias = "DailySchedule")]
    Daily,
    #[serde(alias = "SimpleSchedules.WeeklySchedule", alias = "WeeklySchedule")]
    Weekly,
    #[serde(alias = "SimpleSchedules.MonthlySchedule", alias = "MonthlySchedule")]
    Monthly,
}

/// 任务文件中的月内日期：数字，或 "Last"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LaunchDay {
    Number(i64),
    Text(String),
}

impl LaunchDay {
    fn to_month_day(&self) -> Result<MonthDay> {
        match self {
            LaunchDay::Number(LAST_DAY_OF_MONTH_LEGACY) => Ok(MonthDay::Last),
            LaunchDay::Number(n) => u32::try_from(*n)
                .map_err(|_| BackupError::validation(format!("day must be in range 1..31, got {n}")))
                .and_then(MonthDay::day),
            LaunchDay::Text(text) => {
                let text = text.trim();
                if text.eq_ignore_ascii_case("last") || text.eq_ignore_ascii_case("lastday") {
                    return Ok(MonthDay::Last);
                }
                let n = text.parse::<i64>().map_err(|_| {
                    BackupError::validation(format!("invalid launch day '{text}'"))
                })?;
                LaunchDay::Number(n).to_month_day()
            }
        }
    }
}

impl From<MonthDay> for LaunchDay {
    fn from(value: MonthDay) -> Self {
        match value {
            MonthDay::Day(d) => LaunchDay::Number(i64::from(d)),
            MonthDay::Last => LaunchDay::Text("Last".to_string()),
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// 计划的可序列化形式，与中央服务器的任务 JSON 格式一致
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScheduleConfig {
    #[serde(rename = "Type")]
    pub kind: ScheduleKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurs_once_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_unit: Option<String>,
    #[serde(default)]
    pub interval: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_of_week: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_days: Option<Vec<LaunchDay>>,
}

/// 空白字符串视为未设置
fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl ScheduleConfig {
    /// 每天固定时刻触发一次的配置
    pub fn daily_once(at: &str) -> Self {
        Self {
            kind: ScheduleKind::Daily,
            occurs_once_at: Some(at.to_string()),
            interval_unit: None,
            interval: 0,
            start_at: None,
            end_at: None,
            description: None,
            enabled: true,
            days_of_week: None,
            launch_days: None,
        }
    }

    /// 转换为经过解析的构造参数
    pub fn to_params(&self) -> Result<ScheduleParams> {
        let once = non_blank(&self.occurs_once_at);
        let unit = non_blank(&self.interval_unit);

        let mut params = ScheduleParams {
            enabled: self.enabled,
            description: self.description.clone(),
            ..ScheduleParams::default()
        };

        match (once, unit) {
            (Some(_), Some(_)) | (None, None) => {
                // 交给 ScheduleParams::mode 给出统一的错误信息
                params.occurs_once_at = once.map(str::parse).transpose()?;
                params.interval_unit = unit.map(str::parse).transpose()?;
            }
            (Some(at), None) => {
                params.occurs_once_at = Some(at.parse()?);
            }
            (None, Some(unit)) => {
                params.interval_unit = Some(unit.parse()?);
                params.interval = Some(self.interval);
                params.start_at = non_blank(&self.start_at).map(str::parse).transpose()?;
                params.end_at = non_blank(&self.end_at).map(str::parse).transpose()?;
            }
        }

        if let Some(days) = &self.days_of_week {
            params.days_of_week = days
                .iter()
                .map(|d| {
                    Weekday::from_str(d.trim()).map_err(|_| {
                        BackupError::validation(format!("unknown day of week '{d}'"))
                    })
                })
                .collect::<Result<_>>()?;
        }

        if let Some(days) = &self.launch_days {
            params.launch_days = days
                .iter()
                .map(LaunchDay::to_month_day)
                .collect::<Result<_>>()?;
        }

        Ok(params)
    }
}
