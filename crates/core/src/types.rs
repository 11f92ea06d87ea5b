//! 도메인 타입 — 시스템 전역에서 사용되는 공통 타입
//!
//! 모든 모듈이 공유하는 데이터 구조를 정의합니다.
//! 수집기와 daemon은 이 타입들을 사용하여 이벤트와 데이터를 교환합니다.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 모니터링 대상 종류
///
/// 원격 시스템에서 취약점 export의 범위를 결정합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// 단일 프로젝트
    Project,
    /// 그룹 (하위 프로젝트 전체 포함)
    Group,
}

impl TargetKind {
    /// 문자열에서 대상 종류를 파싱합니다. 대소문자를 구분하지 않습니다.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "project" => Some(Self::Project),
            "group" => Some(Self::Group),
            _ => None,
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Project => write!(f, "project"),
            Self::Group => write!(f, "group"),
        }
    }
}

/// 모니터링 대상
///
/// 수집기 인스턴스당 정확히 하나의 대상이 존재하며,
/// 시작 시 설정에서 생성된 후 변경되지 않습니다.
/// `reference`는 숫자 ID 또는 슬래시 경로(`group/project`)입니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// 대상 종류
    pub kind: TargetKind,
    /// 숫자 ID 또는 슬래시 경로
    pub reference: String,
}

impl Target {
    /// 새 대상을 생성합니다.
    pub fn new(kind: TargetKind, reference: impl Into<String>) -> Self {
        Self {
            kind,
            reference: reference.into(),
        }
    }

    /// reference가 숫자 ID인지 여부를 반환합니다.
    pub fn is_numeric(&self) -> bool {
        !self.reference.is_empty() && self.reference.chars().all(|c| c.is_ascii_digit())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.reference)
    }
}

/// 심각도 레벨
///
/// 취약점 finding의 심각도를 나타냅니다.
/// `Ord` 구현으로 심각도 비교가 가능합니다 (`Info < Low < Medium < High < Critical`).
/// 알 수 없는 레이블은 가장 낮은 `Info`로 취급합니다.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Severity {
    /// 정보성 이벤트 (unknown 포함)
    #[default]
    Info,
    /// 낮은 심각도
    Low,
    /// 중간 심각도
    Medium,
    /// 높은 심각도
    High,
    /// 치명적 — 즉시 대응 필요
    Critical,
}

impl Severity {
    /// 문자열에서 심각도를 파싱합니다.
    ///
    /// 대소문자를 구분하지 않습니다.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "info" | "informational" | "unknown" => Some(Self::Info),
            "low" => Some(Self::Low),
            "medium" | "med" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" | "crit" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "Info"),
            Self::Low => write!(f, "Low"),
            Self::Medium => write!(f, "Medium"),
            Self::High => write!(f, "High"),
            Self::Critical => write!(f, "Critical"),
        }
    }
}

/// 취약점 finding
///
/// export 페이로드의 한 레코드를 downstream 소비자 계약에 맞춰 정규화한 결과입니다.
/// `attributes`는 비어 있지 않은 모든 컬럼을
/// `vulnerability.<정규화된_컬럼명>` 키로 담습니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// finding 고유 ID (UUID v4)
    pub id: String,
    /// 대상 프로젝트/그룹 ID
    pub target_id: String,
    /// 이 finding을 실어온 export job ID
    pub export_id: i64,
    /// 제목
    pub title: String,
    /// 상세 설명
    pub description: String,
    /// 심각도
    pub severity: Severity,
    /// 탐지 시각 (`discovered_at` 컬럼, 없으면 수집 시각)
    pub detected_at: DateTime<Utc>,
    /// 정규화된 속성 (key-value 쌍)
    pub attributes: Vec<(String, String)>,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} (target={} export={})",
            self.severity, self.title, self.target_id, self.export_id,
        )
    }
}
