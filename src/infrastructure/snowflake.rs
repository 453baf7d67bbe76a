//! 雪花 ID 生成器
//!
//! 64 位布局：42 位毫秒时间差 | 10 位工作机器 ID | 12 位序列号，
//! 纪元为 2022-01-01T00:00:00Z。同一实例内生成的 ID 严格单调递增。

use std::sync::Mutex;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use crate::error::{GatewayError, Result};

/// 2022-01-01 00:00:00 UTC
const EPOCH_MS: i64 = 1_640_995_200_000;

const WORKER_ID_BITS: i64 = 10;
const SEQUENCE_BITS: i64 = 12;

const MAX_WORKER_ID: i64 = (1 << WORKER_ID_BITS) - 1;
const MAX_SEQUENCE: i64 = (1 << SEQUENCE_BITS) - 1;

const WORKER_ID_SHIFT: i64 = SEQUENCE_BITS;
const TIMESTAMP_SHIFT: i64 = SEQUENCE_BITS + WORKER_ID_BITS;

/// 时钟回拨在该范围内时先等待再取当前时间
const MAX_BACKWARD_MS: i64 = 5;

struct GeneratorState {
    sequence: i64,
    last_timestamp: i64,
}

pub struct SnowflakeGenerator {
    worker_id: i64,
    state: Mutex<GeneratorState>,
}

impl SnowflakeGenerator {
    pub fn new(worker_id: i64) -> Result<Self> {
        if !(0..=MAX_WORKER_ID).contains(&worker_id) {
            return Err(GatewayError::Config(format!(
                "snowflake worker id must be in [0, {}], got {}",
                MAX_WORKER_ID, worker_id
            )));
        }
        Ok(Self {
            worker_id,
            state: Mutex::new(GeneratorState {
                sequence: 0,
                last_timestamp: 0,
            }),
        })
    }

    /// 生成下一个 ID（字符串形式，作为消息业务键使用）
    pub fn generate(&self) -> String {
        self.next_id().to_string()
    }

    /// 生成下一个 64 位 ID
    pub fn next_id(&self) -> i64 {
        let mut state = self.state.lock().expect("snowflake state poisoned");

        let mut timestamp = now_ms();

        // 时钟回拨：小幅回拨等待追平，大幅回拨沿用上个时间戳
        // （序列号继续递增，不会产生重复 ID）
        if timestamp < state.last_timestamp {
            let offset = state.last_timestamp - timestamp;
            if offset <= MAX_BACKWARD_MS {
                std::thread::sleep(Duration::from_millis(offset as u64));
                timestamp = now_ms();
                if timestamp < state.last_timestamp {
                    timestamp = state.last_timestamp;
                }
            } else {
                timestamp = state.last_timestamp;
            }
        }

        if timestamp == state.last_timestamp {
            state.sequence = (state.sequence + 1) & MAX_SEQUENCE;
            // 序列号耗尽，自旋等待下一毫秒
            if state.sequence == 0 {
                while timestamp <= state.last_timestamp {
                    timestamp = now_ms();
                }
            }
        } else {
            state.sequence = 0;
        }
        state.last_timestamp = timestamp;

        ((timestamp - EPOCH_MS) << TIMESTAMP_SHIFT)
            | (self.worker_id << WORKER_ID_SHIFT)
            | state.sequence
    }
}

/// 解析 ID，返回（毫秒时间戳，工作机器 ID，序列号）
pub fn parse(id: i64) -> (i64, i64, i64) {
    let sequence = id & MAX_SEQUENCE;
    let worker_id = (id >> WORKER_ID_SHIFT) & MAX_WORKER_ID;
    let timestamp = (id >> TIMESTAMP_SHIFT) + EPOCH_MS;
    (timestamp, worker_id, sequence)
}

/// 提取 ID 的生成时间
pub fn extract_timestamp(id: i64) -> chrono::DateTime<Utc> {
    let (timestamp, _, _) = parse(id);
    Utc.timestamp_millis_opt(timestamp)
        .single()
        .unwrap_or_else(Utc::now)
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
