//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `vulnpost_`
//! - 모듈명: `collector_`, `daemon_`
//! - 접미어: `_total` (counter), `_seconds` (histogram/latency), 없음 (gauge)

// --- 레이블 키 상수 ---

/// 심각도 레이블 키 (info, low, medium, high, critical)
pub const LABEL_SEVERITY: &str = "severity";

/// 결과 레이블 키 (success, failure)
pub const LABEL_RESULT: &str = "result";

// --- Collector 메트릭 ---

/// Collector: 완료된 폴링 tick 수 (counter, label: result)
pub const COLLECTOR_TICKS_TOTAL: &str = "vulnpost_collector_ticks_total";

/// Collector: 페이로드에서 읽은 전체 레코드 수 (counter)
pub const COLLECTOR_RECORDS_TOTAL: &str = "vulnpost_collector_records_total";

/// Collector: 전송된 finding 이벤트 수 (counter, label: severity)
pub const COLLECTOR_FINDINGS_EMITTED_TOTAL: &str = "vulnpost_collector_findings_emitted_total";

/// Collector: 중복으로 건너뛴 레코드 수 (counter)
pub const COLLECTOR_RECORDS_SKIPPED_TOTAL: &str = "vulnpost_collector_records_skipped_total";

/// Collector: export 완료 대기 시간 (histogram, 초)
pub const COLLECTOR_EXPORT_WAIT_SECONDS: &str = "vulnpost_collector_export_wait_seconds";

/// Collector: 상태 저장소 엔트리 수 (gauge)
pub const COLLECTOR_STATE_ENTRIES: &str = "vulnpost_collector_state_entries";

// --- Daemon 메트릭 ---

/// Daemon: 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "vulnpost_daemon_uptime_seconds";

/// Daemon: 빌드 정보 (gauge, 항상 1, label: version)
pub const DAEMON_BUILD_INFO: &str = "vulnpost_daemon_build_info";

// --- 히스토그램 버킷 정의 ---

/// export 완료 대기 시간 히스토그램 버킷 (초)
///
/// 1s ~ 900s 범위 (서버 측 export 생성은 수 분이 걸릴 수 있음)
pub const EXPORT_WAIT_BUCKETS: [f64; 9] =
    [1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 900.0];

// --- 설명 등록 함수 ---

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// `metrics::describe_counter!()`, `describe_gauge!()`, `describe_histogram!()`을
/// 호출하여 Prometheus HELP 텍스트를 설정합니다.
///
/// 이 함수는 전역 레코더 설치 후 한 번만 호출해야 합니다.
/// 일반적으로 `vulnpost-daemon`의 시작 시점에서 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    // Collector
    describe_counter!(
        COLLECTOR_TICKS_TOTAL,
        "Total number of completed poll ticks, labeled by result"
    );
    describe_counter!(
        COLLECTOR_RECORDS_TOTAL,
        "Total number of records read from export payloads"
    );
    describe_counter!(
        COLLECTOR_FINDINGS_EMITTED_TOTAL,
        "Total number of finding events sent downstream, labeled by severity"
    );
    describe_counter!(
        COLLECTOR_RECORDS_SKIPPED_TOTAL,
        "Total number of records skipped as unchanged duplicates"
    );
    describe_histogram!(
        COLLECTOR_EXPORT_WAIT_SECONDS,
        "Time spent waiting for an export job to reach a terminal state"
    );
    describe_gauge!(
        COLLECTOR_STATE_ENTRIES,
        "Number of finding identities tracked in the state store"
    );

    // Daemon
    describe_gauge!(DAEMON_UPTIME_SECONDS, "Daemon uptime in seconds");
    describe_gauge!(
        DAEMON_BUILD_INFO,
        "Build information (always 1, with version label)"
    );
}
