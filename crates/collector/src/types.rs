//! export 도메인 타입
//!
//! 원격 시스템의 export job 표현과 CSV 페이로드의 레코드 표현을 정의합니다.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// export job 상태
///
/// 상태 기계: `Created -> Running -> Finished` (성공 종료) 또는 `-> Failed`
/// (실패 종료). `Unknown`은 서버가 새로운 상태 어휘를 도입했을 때의 비종료
/// 관측값으로, 상태 기계를 전진시키거나 되돌리지 않습니다 — 다음 폴링
/// 결과가 항상 기준이 됩니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportStatus {
    /// 서버가 job을 접수함
    Created,
    /// export 생성 진행 중
    Running,
    /// 완료 — 결과 다운로드 가능
    Finished,
    /// 실패 — 종료 상태
    Failed,
    /// 인식할 수 없는 상태 문자열
    #[serde(other)]
    Unknown,
}

impl ExportStatus {
    /// 종료 상태(Finished/Failed) 여부를 반환합니다.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

impl fmt::Display for ExportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Finished => write!(f, "finished"),
            Self::Failed => write!(f, "failed"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// 결과 다운로드 링크
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportLinks {
    /// 완료된 export의 다운로드 URL
    #[serde(default)]
    pub download: String,
}

/// 비동기 export job
///
/// 서버가 소유하는 상태의 로컬 스냅샷입니다. 상태는 로컬에서 절대 변경하지
/// 않으며, 오직 상태 조회 API를 다시 호출해서만 갱신됩니다.
///
/// 서버에 따라 `project_id`/`group_id`가 JSON 문자열 또는 숫자로 내려오므로
/// 역직렬화 경계에서 단일 문자열 타입으로 정규화합니다.
#[derive(Debug, Clone, Deserialize)]
pub struct ExportJob {
    /// 서버가 할당한 job ID
    pub id: i64,
    /// 소유 프로젝트 ID (project export인 경우)
    #[serde(default, deserialize_with = "de_opt_string_or_number")]
    pub project_id: Option<String>,
    /// 소유 그룹 ID (group export인 경우)
    #[serde(default, deserialize_with = "de_opt_string_or_number")]
    pub group_id: Option<String>,
    /// 현재 상태
    pub status: ExportStatus,
    /// 생성 시각
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// 시작 시각
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// 종료 시각
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// 다운로드 링크
    #[serde(rename = "_links", default)]
    pub links: ExportLinks,
}

impl ExportJob {
    /// 결과 다운로드 URL을 반환합니다.
    ///
    /// 상태가 `Finished`이고 서버가 링크를 내려준 경우에만 `Some`입니다.
    pub fn download_url(&self) -> Option<&str> {
        if self.status == ExportStatus::Finished && !self.links.download.is_empty() {
            Some(&self.links.download)
        } else {
            None
        }
    }

    /// 소유 대상 ID를 반환합니다 (project 우선).
    pub fn owner_id(&self) -> Option<&str> {
        self.project_id.as_deref().or(self.group_id.as_deref())
    }
}

impl fmt::Display for ExportJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ExportJob[{}] status={} owner={}",
            self.id,
            self.status,
            self.owner_id().unwrap_or("-"),
        )
    }
}

/// JSON 문자열/숫자 필드를 문자열로 정규화하는 deserializer
fn de_opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Int(i64),
        Float(f64),
    }

    let value = Option::<Raw>::deserialize(deserializer)?;
    Ok(value.map(|raw| match raw {
        Raw::Str(s) => s,
        Raw::Int(i) => i.to_string(),
        Raw::Float(f) => format!("{f:.0}"),
    }))
}

/// export 페이로드의 한 레코드
///
/// 헤더 행이 정의한 컬럼명과 데이터 행의 값을 순서대로 묶은 표현입니다.
/// 컬럼명 조회는 대소문자를 구분하지 않으며, 없는 필드나 짧은 행의
/// 빠진 값은 빈 문자열로 읽힙니다. 헤더는 `Arc`로 공유되어 레코드마다
/// 복제되지 않습니다.
#[derive(Debug, Clone)]
pub struct VulnRecord {
    headers: Arc<Vec<String>>,
    values: Vec<String>,
}

impl VulnRecord {
    /// 공유 헤더와 데이터 행 값으로 레코드를 생성합니다.
    pub fn new(headers: Arc<Vec<String>>, values: Vec<String>) -> Self {
        Self { headers, values }
    }

    /// 컬럼명으로 값을 조회합니다 (대소문자 무시, 없으면 빈 문자열).
    pub fn get(&self, name: &str) -> &str {
        self.headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
            .and_then(|i| self.values.get(i))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// (컬럼명, 값) 쌍을 헤더 순서대로 순회합니다.
    ///
    /// 데이터 행이 헤더보다 짧으면 빠진 값은 빈 문자열입니다.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.as_str(), self.values.get(i).map(String::as_str).unwrap_or("")))
    }

    /// 컬럼 수를 반환합니다.
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// 컬럼이 없는지 여부를 반환합니다.
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_json(status: &str, project_id: &str) -> String {
        format!(
            r#"{{
                "id": 101,
                "project_id": {project_id},
                "status": "{status}",
                "created_at": "2026-08-01T10:00:00Z",
                "_links": {{
                    "download": "https://gitlab.example.com/exports/101/download"
                }}
            }}"#
        )
    }

    #[test]
    fn export_status_deserialize_known_values() {
        let status: ExportStatus = serde_json::from_str("\"created\"").unwrap();
        assert_eq!(status, ExportStatus::Created);
        let status: ExportStatus = serde_json::from_str("\"finished\"").unwrap();
        assert_eq!(status, ExportStatus::Finished);
    }

    #[test]
    fn export_status_unrecognized_maps_to_unknown() {
        // 서버 측 상태 어휘가 늘어나도 역직렬화는 실패하지 않아야 함
        let status: ExportStatus = serde_json::from_str("\"queued_for_gc\"").unwrap();
        assert_eq!(status, ExportStatus::Unknown);
        assert!(!status.is_terminal());
    }

    #[test]
    fn export_status_terminal() {
        assert!(ExportStatus::Finished.is_terminal());
        assert!(ExportStatus::Failed.is_terminal());
        assert!(!ExportStatus::Created.is_terminal());
        assert!(!ExportStatus::Running.is_terminal());
        assert!(!ExportStatus::Unknown.is_terminal());
    }

    #[test]
    fn export_job_numeric_project_id_normalized() {
        let job: ExportJob = serde_json::from_str(&job_json("finished", "42")).unwrap();
        assert_eq!(job.project_id.as_deref(), Some("42"));
        assert_eq!(job.owner_id(), Some("42"));
    }

    #[test]
    fn export_job_string_project_id_normalized() {
        let job: ExportJob = serde_json::from_str(&job_json("finished", "\"42\"")).unwrap();
        assert_eq!(job.project_id.as_deref(), Some("42"));
    }

    #[test]
    fn export_job_null_project_id() {
        let job: ExportJob = serde_json::from_str(&job_json("running", "null")).unwrap();
        assert_eq!(job.project_id, None);
        assert_eq!(job.owner_id(), None);
    }

    #[test]
    fn export_job_download_url_present_iff_finished() {
        let finished: ExportJob = serde_json::from_str(&job_json("finished", "42")).unwrap();
        assert!(finished.download_url().is_some());

        let running: ExportJob = serde_json::from_str(&job_json("running", "42")).unwrap();
        assert!(running.download_url().is_none());
    }

    #[test]
    fn export_job_missing_links() {
        let job: ExportJob = serde_json::from_str(
            r#"{"id": 5, "status": "finished"}"#,
        )
        .unwrap();
        // Finished라도 링크가 없으면 다운로드 불가
        assert!(job.download_url().is_none());
    }

    #[test]
    fn export_job_display() {
        let job: ExportJob = serde_json::from_str(&job_json("running", "42")).unwrap();
        let display = job.to_string();
        assert!(display.contains("101"));
        assert!(display.contains("running"));
    }

    #[test]
    fn export_job_group_owner() {
        let job: ExportJob = serde_json::from_str(
            r#"{"id": 9, "group_id": 77, "status": "created"}"#,
        )
        .unwrap();
        assert_eq!(job.owner_id(), Some("77"));
    }

    fn sample_record() -> VulnRecord {
        let headers = Arc::new(vec![
            "Project Name".to_owned(),
            "Tool".to_owned(),
            "Severity".to_owned(),
        ]);
        VulnRecord::new(
            headers,
            vec!["billing".to_owned(), "sast".to_owned(), "High".to_owned()],
        )
    }

    #[test]
    fn record_get_case_insensitive() {
        let record = sample_record();
        assert_eq!(record.get("project name"), "billing");
        assert_eq!(record.get("PROJECT NAME"), "billing");
        assert_eq!(record.get("Severity"), "High");
    }

    #[test]
    fn record_get_absent_field_is_empty() {
        let record = sample_record();
        assert_eq!(record.get("CVE"), "");
    }

    #[test]
    fn record_short_row_reads_empty() {
        let headers = Arc::new(vec!["A".to_owned(), "B".to_owned(), "C".to_owned()]);
        let record = VulnRecord::new(headers, vec!["1".to_owned()]);
        assert_eq!(record.get("A"), "1");
        assert_eq!(record.get("B"), "");
        assert_eq!(record.get("C"), "");
    }

    #[test]
    fn record_iter_pairs_in_header_order() {
        let record = sample_record();
        let pairs: Vec<(&str, &str)> = record.iter().collect();
        assert_eq!(pairs[0], ("Project Name", "billing"));
        assert_eq!(pairs[1], ("Tool", "sast"));
        assert_eq!(pairs[2], ("Severity", "High"));
    }
}
