//! 에러 타입 — 도메인별 에러 정의

/// Vulnpost 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum VulnpostError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 파이프라인 생명주기 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// 원격 export 처리 에러
    #[error("export error: {0}")]
    Export(#[from] ExportError),

    /// 상태 저장소 에러
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 파이프라인 생명주기 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 이미 실행 중인 파이프라인을 다시 시작함
    #[error("pipeline is already running")]
    AlreadyRunning,

    /// 실행 중이 아닌 파이프라인을 정지함
    #[error("pipeline is not running")]
    NotRunning,

    /// 파이프라인 초기화 실패
    #[error("pipeline init failed: {0}")]
    InitFailed(String),

    /// 채널 전송 실패
    #[error("channel send failed: {0}")]
    ChannelSend(String),
}

/// 원격 export 처리 에러
///
/// 모듈 크레이트의 세부 에러가 daemon으로 전파될 때 사용하는 상위 분류입니다.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// 대상 프로젝트/그룹이 유효하지 않음
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// export 생성 실패
    #[error("export creation failed: {0}")]
    CreateFailed(String),

    /// 원격 API 호출 실패
    #[error("api request failed: {0}")]
    Api(String),

    /// export가 실패 상태로 종료됨
    #[error("export failed: {0}")]
    Failed(String),

    /// 완료 대기 타임아웃
    #[error("export timed out: {0}")]
    TimedOut(String),

    /// 결과 페이로드 처리 실패
    #[error("payload error: {0}")]
    Payload(String),
}

/// 상태 저장소 에러
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// 상태 파일 로딩 실패
    #[error("state load failed: {0}")]
    LoadFailed(String),

    /// 상태 스냅샷 저장 실패
    #[error("state persist failed: {0}")]
    PersistFailed(String),
}
