//! 수집기 설정
//!
//! [`ExportCollectorConfig`]는 수집기 모듈의 런타임 설정입니다.
//! daemon은 core의 [`VulnpostConfig`]에서 [`ExportCollectorConfig::from_core`]로
//! 변환하여 빌더에 전달합니다.

use std::path::PathBuf;
use std::time::Duration;

use vulnpost_core::config::VulnpostConfig;
use vulnpost_core::types::{Target, TargetKind};

use crate::error::CollectorError;

/// export 수집기 런타임 설정
#[derive(Debug, Clone)]
pub struct ExportCollectorConfig {
    /// 모니터링 대상 (인스턴스당 정확히 하나)
    pub target: Target,
    /// 폴링 tick 주기
    pub poll_interval: Duration,
    /// export 완료 대기 타임아웃
    pub export_timeout: Duration,
    /// export 상태 조회 주기
    pub status_poll_interval: Duration,
    /// 상태 파일 경로 (`None`이면 메모리 전용)
    pub state_file: Option<PathBuf>,
    /// 정지 시 진행 중인 tick 대기 시간
    pub shutdown_grace: Duration,
    /// finding 이벤트 채널 용량
    pub channel_capacity: usize,
}

impl Default for ExportCollectorConfig {
    fn default() -> Self {
        Self {
            target: Target::new(TargetKind::Project, ""),
            poll_interval: Duration::from_secs(60),
            export_timeout: Duration::from_secs(900),
            status_poll_interval: Duration::from_secs(5),
            state_file: None,
            shutdown_grace: Duration::from_secs(10),
            channel_capacity: 256,
        }
    }
}

impl ExportCollectorConfig {
    /// core 설정에서 수집기 설정으로 변환합니다.
    pub fn from_core(config: &VulnpostConfig) -> Result<Self, CollectorError> {
        let kind = TargetKind::from_str_loose(&config.target.kind).ok_or_else(|| {
            CollectorError::Config {
                field: "target.kind".to_owned(),
                reason: "must be either 'project' or 'group'".to_owned(),
            }
        })?;
        let reference = config.target.reference.trim_matches('/');

        let state_file = if config.collector.state_file.is_empty() {
            None
        } else {
            Some(PathBuf::from(&config.collector.state_file))
        };

        Ok(Self {
            target: Target::new(kind, reference),
            poll_interval: Duration::from_secs(config.collector.poll_interval_secs),
            export_timeout: Duration::from_secs(config.collector.export_timeout_secs),
            status_poll_interval: Duration::from_secs(config.collector.status_poll_interval_secs),
            state_file,
            shutdown_grace: Duration::from_secs(config.collector.shutdown_grace_secs),
            channel_capacity: config.collector.channel_capacity,
        })
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), CollectorError> {
        if self.target.reference.is_empty() {
            return Err(CollectorError::Config {
                field: "target.reference".to_owned(),
                reason: "must not be empty".to_owned(),
            });
        }
        if self.poll_interval.is_zero() {
            return Err(CollectorError::Config {
                field: "poll_interval".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if self.export_timeout.is_zero() {
            return Err(CollectorError::Config {
                field: "export_timeout".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if self.status_poll_interval.is_zero() {
            return Err(CollectorError::Config {
                field: "status_poll_interval".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if self.channel_capacity == 0 {
            return Err(CollectorError::Config {
                field: "channel_capacity".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        Ok(())
    }
}
