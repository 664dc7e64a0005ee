use crate::error::{BackupError, Result};
use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// 一天之内的时刻（时:分:秒）
///
/// 只表示一天内的时间，不携带日期。字段顺序即比较顺序，
/// 因此派生的 `Ord` 与按"当天秒数"比较等价。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Time {
    hour: u32,
    minute: u32,
    second: u32,
}

impl Time {
    /// 创建时刻，小时 0..=23，分钟和秒 0..=59
    pub fn new(hour: u32, minute: u32, second: u32) -> Result<Self> {
        if hour > 23 {
            return Err(BackupError::validation(format!(
                "hour must be in range 0..23, got {hour}"
            )));
        }
        if minute > 59 {
            return Err(BackupError::validation(format!(
                "minute must be in range 0..59, got {minute}"
            )));
        }
        if second > 59 {
            return Err(BackupError::validation(format!(
                "second must be in range 0..59, got {second}"
            )));
        }

        Ok(Self {
            hour,
            minute,
            second,
        })
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }

    pub fn second(&self) -> u32 {
        self.second
    }

    /// 距午夜的秒数
    pub fn seconds_of_day(&self) -> u32 {
        self.hour * 3600 + self.minute * 60 + self.second
    }

    pub fn to_naive(&self) -> NaiveTime {
        // 构造时已校验范围
        NaiveTime::from_num_seconds_from_midnight_opt(self.seconds_of_day(), 0)
            .unwrap_or(NaiveTime::MIN)
    }
}

impl From<NaiveTime> for Time {
    fn from(value: NaiveTime) -> Self {
        Self {
            hour: value.hour(),
            minute: value.minute(),
            second: value.second(),
        }
    }
}

/// 解析 "H:M" 或 "H:M:S"
impl FromStr for Time {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(BackupError::validation(format!(
                "invalid time '{s}', expected H:M or H:M:S"
            )));
        }

        let mut values = [0u32; 3];
        for (slot, part) in values.iter_mut().zip(&parts) {
            *slot = part.trim().parse::<u32>().map_err(|_| {
                BackupError::validation(format!("invalid time component '{part}' in '{s}'"))
            })?;
        }

        Self::new(values[0], values[1], values[2])
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hour, self.minute, self.second)
    }
}

impl Serialize for Time {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Time {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_valid_time_constructs() {
        for h in 0..24 {
            for m in 0..60 {
                for s in [0, 30, 59] {
                    let t = Time::new(h, m, s).unwrap();
                    assert_eq!(t.seconds_of_day(), h * 3600 + m * 60 + s);
                }
            }
        }
    }

    #[test]
    fn test_out_of_range_fails() {
        assert!(Time::new(24, 0, 0).unwrap_err().is_validation());
        assert!(Time::new(0, 60, 0).unwrap_err().is_validation());
        assert!(Time::new(0, 0, 60).unwrap_err().is_validation());
    }

    #[test]
    fn test_ordering_by_seconds_of_day() {
        let a = Time::new(8, 59, 59).unwrap();
        let b = Time::new(9, 0, 0).unwrap();
        assert!(a < b);
        assert_eq!(a.max(b), b);
    }

    #[test]
    fn test_parse() {
        assert_eq!("00:00".parse::<Time>().unwrap(), Time::new(0, 0, 0).unwrap());
        assert_eq!("6:12:14".parse::<Time>().unwrap(), Time::new(6, 12, 14).unwrap());
        assert!("25:00".parse::<Time>().is_err());
        assert!("noon".parse::<Time>().is_err());
        assert!("1:2:3:4".parse::<Time>().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Time::new(7, 5, 0).unwrap().to_string(), "07:05:00");
    }
}
