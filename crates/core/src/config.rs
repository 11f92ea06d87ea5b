//! 설정 관리 — vulnpost.toml 파싱 및 런타임 설정
//!
//! [`VulnpostConfig`]는 모든 모듈의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`VULNPOST_API_TOKEN=...` 형식)
//! 3. 설정 파일 (`vulnpost.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), vulnpost_core::error::VulnpostError> {
//! use vulnpost_core::config::VulnpostConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = VulnpostConfig::load("vulnpost.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = VulnpostConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, VulnpostError};
use crate::types::{Target, TargetKind};

/// Vulnpost 통합 설정
///
/// `vulnpost.toml` 파일의 최상위 구조를 나타냅니다.
/// 각 모듈은 자기 섹션만 읽어 사용합니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VulnpostConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 원격 API 설정
    #[serde(default)]
    pub api: ApiConfig,
    /// 모니터링 대상 설정
    #[serde(default)]
    pub target: TargetConfig,
    /// export 수집기 설정
    #[serde(default)]
    pub collector: CollectorConfig,
    /// 메트릭 endpoint 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl VulnpostConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    ///
    /// 설정 로딩 순서:
    /// 1. TOML 파일 파싱
    /// 2. 환경변수 오버라이드 적용
    /// 3. 비정상 값 기본값 대체 (`normalize`)
    /// 4. 유효성 검증
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, VulnpostError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, VulnpostError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VulnpostError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                VulnpostError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, VulnpostError> {
        toml::from_str(toml_str).map_err(|e| {
            VulnpostError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `VULNPOST_{SECTION}_{FIELD}`
    /// 예: `VULNPOST_API_TOKEN=glpat-...`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "VULNPOST_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "VULNPOST_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.data_dir, "VULNPOST_GENERAL_DATA_DIR");
        override_string(&mut self.general.pid_file, "VULNPOST_GENERAL_PID_FILE");

        // API
        override_string(&mut self.api.base_url, "VULNPOST_API_BASE_URL");
        override_string(&mut self.api.token, "VULNPOST_API_TOKEN");
        override_u64(
            &mut self.api.request_timeout_secs,
            "VULNPOST_API_REQUEST_TIMEOUT_SECS",
        );

        // Target
        override_string(&mut self.target.kind, "VULNPOST_TARGET_KIND");
        override_string(&mut self.target.reference, "VULNPOST_TARGET_REFERENCE");

        // Collector
        override_u64(
            &mut self.collector.poll_interval_secs,
            "VULNPOST_COLLECTOR_POLL_INTERVAL_SECS",
        );
        override_u64(
            &mut self.collector.export_timeout_secs,
            "VULNPOST_COLLECTOR_EXPORT_TIMEOUT_SECS",
        );
        override_u64(
            &mut self.collector.status_poll_interval_secs,
            "VULNPOST_COLLECTOR_STATUS_POLL_INTERVAL_SECS",
        );
        override_string(
            &mut self.collector.state_file,
            "VULNPOST_COLLECTOR_STATE_FILE",
        );
        override_u64(
            &mut self.collector.shutdown_grace_secs,
            "VULNPOST_COLLECTOR_SHUTDOWN_GRACE_SECS",
        );
        override_usize(
            &mut self.collector.channel_capacity,
            "VULNPOST_COLLECTOR_CHANNEL_CAPACITY",
        );

        // Metrics
        override_bool(&mut self.metrics.enabled, "VULNPOST_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "VULNPOST_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "VULNPOST_METRICS_PORT");
        override_string(&mut self.metrics.endpoint, "VULNPOST_METRICS_ENDPOINT");
    }

    /// 0 또는 비정상 값으로 설정된 주기/타임아웃을 기본값으로 대체합니다.
    ///
    /// 수집기는 양수 주기를 전제로 하므로, 잘못 설정된 값은
    /// 경고를 남기고 기본값으로 되돌립니다.
    pub fn normalize(&mut self) {
        let defaults = CollectorConfig::default();
        clamp_zero(
            &mut self.collector.poll_interval_secs,
            defaults.poll_interval_secs,
            "collector.poll_interval_secs",
        );
        clamp_zero(
            &mut self.collector.export_timeout_secs,
            defaults.export_timeout_secs,
            "collector.export_timeout_secs",
        );
        clamp_zero(
            &mut self.collector.status_poll_interval_secs,
            defaults.status_poll_interval_secs,
            "collector.status_poll_interval_secs",
        );
        clamp_zero(
            &mut self.collector.shutdown_grace_secs,
            defaults.shutdown_grace_secs,
            "collector.shutdown_grace_secs",
        );
        if self.collector.channel_capacity == 0 {
            warn!(
                field = "collector.channel_capacity",
                default = defaults.channel_capacity,
                "non-positive config value replaced with default"
            );
            self.collector.channel_capacity = defaults.channel_capacity;
        }
        let api_defaults = ApiConfig::default();
        clamp_zero(
            &mut self.api.request_timeout_secs,
            api_defaults.request_timeout_secs,
            "api.request_timeout_secs",
        );
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), VulnpostError> {
        // log_level 검증
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_level".to_owned(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            }
            .into());
        }

        // log_format 검증
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_format".to_owned(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            }
            .into());
        }

        // API 검증
        if self.api.base_url.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "api.base_url".to_owned(),
                reason: "must not be empty".to_owned(),
            }
            .into());
        }
        if self.api.token.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "api.token".to_owned(),
                reason: "must not be empty".to_owned(),
            }
            .into());
        }

        // 대상 검증
        let kind = TargetKind::from_str_loose(&self.target.kind).ok_or_else(|| {
            ConfigError::InvalidValue {
                field: "target.kind".to_owned(),
                reason: "must be either 'project' or 'group'".to_owned(),
            }
        })?;
        let reference = self.target.reference.trim_matches('/');
        if reference.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "target.reference".to_owned(),
                reason: "must not be empty".to_owned(),
            }
            .into());
        }
        // 슬래시 경로인 경우 종류별 최소 세그먼트 수 확인
        if !reference.chars().all(|c| c.is_ascii_digit()) {
            let segments = reference.split('/').filter(|s| !s.is_empty()).count();
            match kind {
                TargetKind::Project if segments < 2 => {
                    return Err(ConfigError::InvalidValue {
                        field: "target.reference".to_owned(),
                        reason: "project path needs at least two segments (namespace/project)"
                            .to_owned(),
                    }
                    .into());
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// 검증된 설정에서 모니터링 대상을 생성합니다.
    pub fn target(&self) -> Result<Target, VulnpostError> {
        let kind = TargetKind::from_str_loose(&self.target.kind).ok_or_else(|| {
            VulnpostError::Config(ConfigError::InvalidValue {
                field: "target.kind".to_owned(),
                reason: "must be either 'project' or 'group'".to_owned(),
            })
        })?;
        Ok(Target::new(kind, self.target.reference.trim_matches('/')))
    }
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// 데이터 디렉토리
    pub data_dir: String,
    /// PID 파일 경로
    pub pid_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            data_dir: "/var/lib/vulnpost".to_owned(),
            pid_file: "/var/run/vulnpost.pid".to_owned(),
        }
    }
}

/// 원격 API 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// API 기본 URL
    pub base_url: String,
    /// 인증 토큰 (`PRIVATE-TOKEN` 헤더로 전송)
    pub token: String,
    /// 단일 HTTP 요청 타임아웃 (초)
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://gitlab.com".to_owned(),
            token: String::new(),
            request_timeout_secs: 30,
        }
    }
}

/// 모니터링 대상 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// 대상 종류 (project, group)
    pub kind: String,
    /// 숫자 ID 또는 슬래시 경로
    pub reference: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            kind: "project".to_owned(),
            reference: String::new(),
        }
    }
}

/// export 수집기 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// 폴링 주기 (초)
    pub poll_interval_secs: u64,
    /// export 완료 대기 타임아웃 (초)
    pub export_timeout_secs: u64,
    /// export 상태 조회 주기 (초)
    pub status_poll_interval_secs: u64,
    /// 상태 파일 경로 (빈 문자열이면 메모리 전용)
    pub state_file: String,
    /// 정지 시 진행 중인 tick 대기 시간 (초)
    pub shutdown_grace_secs: u64,
    /// finding 이벤트 채널 용량
    pub channel_capacity: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            export_timeout_secs: 900,
            status_poll_interval_secs: 5,
            state_file: String::new(),
            shutdown_grace_secs: 10,
            channel_capacity: 256,
        }
    }
}

/// 메트릭 endpoint 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 수신 주소
    pub listen_addr: String,
    /// 수신 포트
    pub port: u16,
    /// scrape 경로
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9185,
            endpoint: "/metrics".to_owned(),
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

fn override_u16(target: &mut u16, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u16>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u16 from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn clamp_zero(target: &mut u64, default: u64, field: &str) {
    if *target == 0 {
        warn!(
            field,
            default, "non-positive config value replaced with default"
        );
        *target = default;
    }
}
