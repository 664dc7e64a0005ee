use super::{Schedule, ScheduleId};
use crate::constants::schedule::TICK_INTERVAL_SECS;
use chrono::{Local, NaiveDateTime, Timelike};
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 同一秒内触发的所有计划
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FireBatch {
    pub at: NaiveDateTime,
    pub schedules: Vec<ScheduleId>,
}

struct Entry {
    schedule: Arc<Schedule>,
    next: NaiveDateTime,
}

/// 计划调度器
///
/// 为每个计划维护下一次触发时刻，每秒检查一次，
/// 把同一次检查中到期的计划合并成一个 [`FireBatch`] 发送出去。
pub struct Scheduler {
    entries: DashMap<ScheduleId, Entry>,
    sender: mpsc::UnboundedSender<FireBatch>,
    cancel: Mutex<Option<CancellationToken>>,
}

/// 当前本地时间，截断到整秒
pub fn local_now() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

impl Scheduler {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<FireBatch>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let scheduler = Arc::new(Self {
            entries: DashMap::new(),
            sender,
            cancel: Mutex::new(None),
        });
        (scheduler, receiver)
    }

    pub fn add_schedule(&self, schedule: Arc<Schedule>) {
        self.add_schedule_at(schedule, local_now());
    }

    /// 以给定的当前时间加入计划；没有下一次触发时刻的计划不会被记录
    pub fn add_schedule_at(&self, schedule: Arc<Schedule>, now: NaiveDateTime) {
        let id = schedule.id();
        match schedule.get_next(now) {
            Some(next) => {
                debug!(schedule = %id, next = %next, "计划已加入调度");
                self.entries.insert(id, Entry { schedule, next });
            }
            None => {
                debug!(schedule = %id, "计划没有下一次触发时刻，忽略");
                self.entries.remove(&id);
            }
        }
    }

    pub fn remove_schedule(&self, id: ScheduleId) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn next_fire(&self, id: ScheduleId) -> Option<NaiveDateTime> {
        self.entries.get(&id).map(|entry| entry.next)
    }

    /// 执行一次检查
    ///
    /// 所有下一次触发时刻不晚于 `now` 的计划都视为到期（时钟跳过某一秒时不会漏触发），
    /// 随后为它们重新计算严格晚于 `now` 的触发时刻，没有后续触发的计划被移除。
    /// 返回本次到期的计划，非空时同时发送一个批次事件。
    pub fn tick_at(&self, now: NaiveDateTime) -> Vec<ScheduleId> {
        let due: Vec<(ScheduleId, NaiveDateTime)> = self
            .entries
            .iter()
            .filter(|entry| entry.next <= now)
            .map(|entry| (*entry.key(), entry.next))
            .collect();

        let mut fired = Vec::with_capacity(due.len());
        for (id, scheduled) in due {
            if scheduled < now {
                warn!(schedule = %id, scheduled = %scheduled, now = %now, "计划触发延迟");
            }

            let rearmed = match self.entries.get_mut(&id) {
                Some(mut entry) => match entry.schedule.next_after(now) {
                    Some(next) => {
                        entry.next = next;
                        true
                    }
                    None => false,
                },
                // 检查期间被移除
                None => continue,
            };
            if !rearmed {
                debug!(schedule = %id, "计划没有后续触发时刻，移出调度");
                self.entries.remove(&id);
            }
            fired.push(id);
        }

        if !fired.is_empty() {
            let batch = FireBatch {
                at: now,
                schedules: fired.clone(),
            };
            if self.sender.send(batch).is_err() {
                warn!("触发事件的接收端已关闭");
            }
        }

        fired
    }

    pub fn tick(&self) -> Vec<ScheduleId> {
        self.tick_at(local_now())
    }

    /// 启动每秒一次的检查循环；已在运行时不做任何事
    pub fn start(self: &Arc<Self>) {
        let mut cancel = self.cancel.lock().unwrap_or_else(|e| e.into_inner());
        if cancel.is_some() {
            return;
        }

        let token = CancellationToken::new();
        *cancel = Some(token.clone());

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(TICK_INTERVAL_SECS));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(schedules = scheduler.len(), "调度器已启动");

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!("调度器已停止");
                        break;
                    }
                    _ = ticker.tick() => {
                        scheduler.tick();
                    }
                }
            }
        });
    }

    pub fn stop(&self) {
        let mut cancel = self.cancel.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(token) = cancel.take() {
            token.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.cancel
            .lock()
            .map(|cancel| cancel.is_some())
            .unwrap_or(false)
    }
}
