//! 수집기 에러 타입
//!
//! [`CollectorError`]는 수집기 모듈 내에서 발생할 수 있는 모든 에러를 나타냅니다.
//! `From<CollectorError> for VulnpostError` 구현을 통해 `?` 연산자로
//! 상위 에러 타입으로 자연스럽게 전파됩니다.
//!
//! # Temporary / Fatal 분류
//!
//! [`CollectorError::is_temporary`]는 재시도 정책의 확장 포인트입니다.
//! 네트워크 수준 오류와 서버 5xx 응답만 일시적(Temporary)으로 분류되어
//! `wait_for_export` 내부에서 타임아웃까지 재시도되고, 나머지는 모두
//! 치명적(Fatal)로 즉시 호출자에게 전파됩니다.

use vulnpost_core::error::{
    ConfigError, ExportError, PipelineError, StorageError, VulnpostError,
};

/// 수집기 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    /// 네트워크 수준 전송 실패 (연결/타임아웃 등) — Temporary
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    /// 서버 5xx 응답 — Temporary
    #[error("server error: status {status}: {body}")]
    Server {
        /// HTTP 상태 코드
        status: u16,
        /// 응답 본문 (진단용)
        body: String,
    },

    /// 예상하지 못한 응답 코드 (4xx 등) — Fatal
    #[error("unexpected response: status {status}: {body}")]
    UnexpectedStatus {
        /// HTTP 상태 코드
        status: u16,
        /// 응답 본문 (진단용)
        body: String,
    },

    /// 응답 본문 디코딩 실패 — Fatal
    #[error("malformed response body: {0}")]
    MalformedBody(String),

    /// 대상 프로젝트/그룹이 존재하지 않거나 접근 불가 — Fatal
    #[error("invalid target '{reference}': {reason}")]
    InvalidTarget {
        /// 설정된 대상 참조
        reference: String,
        /// 실패 사유
        reason: String,
    },

    /// export가 서버에서 실패 상태로 종료됨 — Fatal
    #[error("export {export_id} failed after {elapsed_secs}s")]
    ExportFailed {
        /// export job ID
        export_id: i64,
        /// 대기 시작 후 경과 시간 (초)
        elapsed_secs: u64,
    },

    /// export 완료 대기 타임아웃 — Fatal
    #[error("timed out waiting for export {export_id} after {elapsed_secs}s")]
    WaitTimeout {
        /// export job ID
        export_id: i64,
        /// 경과 시간 (초)
        elapsed_secs: u64,
    },

    /// shutdown으로 인한 대기 취소
    #[error("wait for export {export_id} cancelled")]
    Cancelled {
        /// export job ID
        export_id: i64,
    },

    /// CSV 헤더 파싱 실패 — tick 전체 중단
    #[error("csv header error: {0}")]
    CsvHeader(String),

    /// CSV 데이터 행 파싱 실패 — tick 전체 중단
    #[error("csv record {index} malformed: {reason}")]
    CsvRecord {
        /// 1-기반 레코드 번호 (헤더 제외)
        index: usize,
        /// 실패 사유
        reason: String,
    },

    /// 상태 파일 로딩 실패 (손상된 파일은 생성 단계에서 치명적)
    #[error("state load failed: {path}: {reason}")]
    StateLoad {
        /// 상태 파일 경로
        path: String,
        /// 실패 사유
        reason: String,
    },

    /// 상태 스냅샷 저장 실패 (메모리 상태는 유지됨)
    #[error("state persist failed: {path}: {source}")]
    StatePersist {
        /// 상태 파일 경로
        path: String,
        /// 원본 I/O 에러
        source: std::io::Error,
    },

    /// finding 이벤트 채널 전송 실패
    #[error("channel error: {0}")]
    Channel(String),

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 페이로드 읽기 I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CollectorError {
    /// 이 에러가 일시적(Temporary)인지 여부를 반환합니다.
    ///
    /// Temporary 에러는 `wait_for_export`의 상태 폴링 루프에서
    /// 전체 타임아웃이 지나기 전까지 자동으로 재시도됩니다.
    pub fn is_temporary(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Server { .. })
    }
}

impl From<CollectorError> for VulnpostError {
    fn from(err: CollectorError) -> Self {
        match err {
            CollectorError::Transport(e) => {
                VulnpostError::Export(ExportError::Api(format!("transport error: {e}")))
            }
            CollectorError::Server { status, body } => VulnpostError::Export(ExportError::Api(
                format!("server error: status {status}: {body}"),
            )),
            CollectorError::UnexpectedStatus { status, body } => VulnpostError::Export(
                ExportError::Api(format!("unexpected response: status {status}: {body}")),
            ),
            CollectorError::MalformedBody(msg) => {
                VulnpostError::Export(ExportError::Api(format!("malformed response body: {msg}")))
            }
            CollectorError::InvalidTarget { reference, reason } => VulnpostError::Export(
                ExportError::InvalidTarget(format!("'{reference}': {reason}")),
            ),
            CollectorError::ExportFailed {
                export_id,
                elapsed_secs,
            } => VulnpostError::Export(ExportError::Failed(format!(
                "export {export_id} failed after {elapsed_secs}s"
            ))),
            CollectorError::WaitTimeout {
                export_id,
                elapsed_secs,
            } => VulnpostError::Export(ExportError::TimedOut(format!(
                "export {export_id} after {elapsed_secs}s"
            ))),
            CollectorError::Cancelled { export_id } => VulnpostError::Export(ExportError::Api(
                format!("wait for export {export_id} cancelled"),
            )),
            CollectorError::CsvHeader(msg) => {
                VulnpostError::Export(ExportError::Payload(format!("csv header error: {msg}")))
            }
            CollectorError::CsvRecord { index, reason } => VulnpostError::Export(
                ExportError::Payload(format!("csv record {index} malformed: {reason}")),
            ),
            CollectorError::StateLoad { path, reason } => VulnpostError::Storage(
                StorageError::LoadFailed(format!("{path}: {reason}")),
            ),
            CollectorError::StatePersist { path, source } => VulnpostError::Storage(
                StorageError::PersistFailed(format!("{path}: {source}")),
            ),
            CollectorError::Channel(msg) => {
                VulnpostError::Pipeline(PipelineError::ChannelSend(msg))
            }
            CollectorError::Config { field, reason } => {
                VulnpostError::Config(ConfigError::InvalidValue { field, reason })
            }
            CollectorError::Io(e) => VulnpostError::Io(e),
        }
    }
}
