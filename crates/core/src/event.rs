//! 이벤트 시스템 — 모듈 간 통신의 기본 단위
//!
//! 수집기에서 daemon의 소비자까지 모든 통신은 이벤트 기반 메시지 패싱으로
//! 수행됩니다. [`EventMetadata`]는 모든 이벤트에 공통으로 포함되는
//! 메타데이터이며, [`Event`] trait은 모든 이벤트 타입이 구현해야 하는
//! 인터페이스입니다.

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::types::Finding;

// --- 모듈명 상수 ---

/// export 수집기 모듈명
pub const MODULE_COLLECTOR: &str = "export-collector";

// --- 이벤트 타입 상수 ---

/// finding 이벤트 타입
pub const EVENT_TYPE_FINDING: &str = "finding";

/// 이벤트 메타데이터 — 모든 이벤트에 공통으로 포함되는 추적 정보
///
/// 각 이벤트의 발생 시각, 생성 모듈, 분산 추적 ID를 담고 있어
/// 이벤트 흐름을 추적하고 디버깅할 수 있습니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    /// 이벤트 발생 시각
    pub timestamp: SystemTime,
    /// 이벤트를 생성한 모듈명 (예: "export-collector")
    pub source_module: String,
    /// 분산 추적 ID — 같은 흐름의 이벤트를 연결합니다
    pub trace_id: String,
}

impl EventMetadata {
    /// 기존 trace_id를 사용하여 새 메타데이터를 생성합니다.
    ///
    /// 이벤트 체인에서 동일한 추적 ID를 유지할 때 사용합니다.
    pub fn new(source_module: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            timestamp: SystemTime::now(),
            source_module: source_module.into(),
            trace_id: trace_id.into(),
        }
    }

    /// 새로운 UUID v4 trace_id를 생성하여 메타데이터를 만듭니다.
    ///
    /// 새로운 이벤트 체인의 시작점에서 사용합니다.
    pub fn with_new_trace(source_module: impl Into<String>) -> Self {
        Self {
            timestamp: SystemTime::now(),
            source_module: source_module.into(),
            trace_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

impl fmt::Display for EventMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] source={} trace={}",
            unix_timestamp_str(self.timestamp),
            self.source_module,
            self.trace_id,
        )
    }
}

/// 모든 이벤트가 구현해야 하는 기본 trait
///
/// `Send + Sync + 'static` 바운드로 `tokio::mpsc` 채널을 통한
/// 안전한 전송을 보장합니다.
pub trait Event: Send + Sync + 'static {
    /// 이벤트 고유 ID (UUID v4)
    fn event_id(&self) -> &str;

    /// 이벤트 메타데이터 (timestamp, source_module, trace_id)
    fn metadata(&self) -> &EventMetadata;

    /// 이벤트 타입명 (로깅 및 라우팅에 사용)
    fn event_type(&self) -> &str;
}

/// 새로운 또는 변경된 취약점 finding 이벤트
///
/// 수집기가 중복 제거를 통과한 레코드마다 하나씩 생성하여
/// downstream 소비자에게 전달합니다.
#[derive(Debug, Clone)]
pub struct FindingEvent {
    /// 이벤트 고유 ID
    pub id: String,
    /// 이벤트 메타데이터
    pub metadata: EventMetadata,
    /// finding 상세 정보
    pub finding: Finding,
}

impl FindingEvent {
    /// 새로운 trace를 시작하는 finding 이벤트를 생성합니다.
    pub fn new(finding: Finding) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            metadata: EventMetadata::with_new_trace(MODULE_COLLECTOR),
            finding,
        }
    }

    /// 기존 trace에 연결된 finding 이벤트를 생성합니다.
    ///
    /// 같은 export에서 나온 finding들을 하나의 추적 흐름으로 묶을 때 사용합니다.
    pub fn with_trace(finding: Finding, trace_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            metadata: EventMetadata::new(MODULE_COLLECTOR, trace_id),
            finding,
        }
    }
}

impl Event for FindingEvent {
    fn event_id(&self) -> &str {
        &self.id
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    fn event_type(&self) -> &str {
        EVENT_TYPE_FINDING
    }
}

impl fmt::Display for FindingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FindingEvent[{}] severity={} title={} target={}",
            &self.id[..8.min(self.id.len())],
            self.finding.severity,
            self.finding.title,
            self.finding.target_id,
        )
    }
}

/// SystemTime을 사람이 읽을 수 있는 형태로 변환합니다.
fn unix_timestamp_str(time: SystemTime) -> String {
    match time.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(duration) => {
            let secs = duration.as_secs();
            format!("{secs}")
        }
        Err(_) => "unknown".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Severity;
    use chrono::Utc;

    fn sample_finding() -> Finding {
        Finding {
            id: "finding-001".to_owned(),
            target_id: "12345".to_owned(),
            export_id: 77,
            title: "Hardcoded credential".to_owned(),
            description: "secret committed to repository".to_owned(),
            severity: Severity::High,
            detected_at: Utc::now(),
            attributes: vec![
                ("vulnerability.tool".to_owned(), "secret_detection".to_owned()),
                ("vulnerability.status".to_owned(), "detected".to_owned()),
            ],
        }
    }

    #[test]
    fn event_metadata_new_preserves_trace_id() {
        let meta = EventMetadata::new("test-module", "trace-abc-123");
        assert_eq!(meta.source_module, "test-module");
        assert_eq!(meta.trace_id, "trace-abc-123");
        assert!(meta.timestamp <= SystemTime::now());
    }

    #[test]
    fn event_metadata_with_new_trace_generates_uuid() {
        let meta = EventMetadata::with_new_trace("test-module");
        assert_eq!(meta.source_module, "test-module");
        // UUID v4 형식 확인: 8-4-4-4-12
        assert_eq!(meta.trace_id.len(), 36);
        assert_eq!(meta.trace_id.chars().filter(|c| *c == '-').count(), 4);
    }

    #[test]
    fn event_metadata_display() {
        let meta = EventMetadata::new("export-collector", "trace-xyz");
        let display = meta.to_string();
        assert!(display.contains("export-collector"));
        assert!(display.contains("trace-xyz"));
    }

    #[test]
    fn finding_event_implements_event_trait() {
        let event = FindingEvent::new(sample_finding());
        assert_eq!(event.event_type(), "finding");
        assert!(!event.event_id().is_empty());
        assert_eq!(event.metadata().source_module, "export-collector");
    }

    #[test]
    fn finding_event_with_trace_preserves_trace_id() {
        let event = FindingEvent::with_trace(sample_finding(), "export-77-trace");
        assert_eq!(event.metadata().trace_id, "export-77-trace");
    }

    #[test]
    fn finding_event_display() {
        let event = FindingEvent::new(sample_finding());
        let display = event.to_string();
        assert!(display.contains("FindingEvent"));
        assert!(display.contains("Hardcoded credential"));
        assert!(display.contains("High"));
    }

    #[test]
    fn finding_events_are_send_sync() {
        fn assert_send_sync<T: Send + Sync + 'static>() {}
        assert_send_sync::<FindingEvent>();
    }
}
