//! 영속 중복 제거 저장소
//!
//! 프로세스 재시작을 넘어 "이 finding을 이미 보았는가, 내용이 바뀌었는가"를
//! 판정합니다. 레코드의 고정된 필드 부분집합에서 안정적인 IdentityKey와
//! ContentHash를 유도하고, IdentityKey별 마지막 해시를 JSON 스냅샷 파일로
//! 미러링합니다.
//!
//! # 키/해시 유도
//!
//! - IdentityKey: [`IDENTITY_FIELDS`]를 `|`로 연결 — 같은 논리적 취약점은
//!   다른 필드가 바뀌어도 같은 키를 가집니다.
//! - ContentHash: [`CHANGE_FIELDS`]를 `|`로 연결한 것의 SHA-256 — 실질적
//!   변경을 나타내는 필드만 포함합니다.
//!
//! 두 목록 모두 대소문자를 구분하지 않고 조회하며, 없는 필드는 빈 문자열로
//! 취급합니다. 원격 스키마가 컬럼을 재배열하거나 추가해도 identity가
//! 유지됩니다.
//!
//! # 영속성
//!
//! 전체 매핑을 하나의 JSON 문서로 직렬화하여 설정된 경로에 0600 권한으로
//! 기록합니다. 경로가 없으면 메모리 전용으로 동작합니다 (재시작 시 모든
//! finding이 새것으로 재처리됨). 파일 없음은 빈 상태, 손상된 파일은 생성
//! 단계의 치명적 에러입니다. 엔트리는 삭제되지 않으므로 장기 배포에서
//! 무한히 증가할 수 있습니다 — 알려진 용량 리스크.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CollectorError;
use crate::types::VulnRecord;

/// IdentityKey를 구성하는 필드 (순서 고정)
pub const IDENTITY_FIELDS: [&str; 5] =
    ["Project Name", "Tool", "Scanner Name", "CVE", "Location"];

/// ContentHash를 구성하는 필드 (순서 고정) — 실질적 변경의 기준
pub const CHANGE_FIELDS: [&str; 5] =
    ["Status", "Severity", "Details", "Additional Info", "Dismissal Reason"];

/// IdentityKey별로 영속되는 상태 엔트리
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingState {
    /// 마지막으로 수용된 레코드의 ContentHash
    pub last_seen_hash: String,
    /// 마지막 수용 시각
    pub last_seen_at: DateTime<Utc>,
}

/// finding 상태 저장소
///
/// 읽기(`should_process`, `get_state`)는 공유 락으로 동시에 진행될 수 있고,
/// 갱신(`update_state`)은 배타 락 아래에서 맵 갱신과 스냅샷 저장을 하나의
/// 논리 단위로 수행합니다. 같은 파일의 프로세스 간 공유는 지원하지 않습니다.
#[derive(Debug)]
pub struct StateManager {
    states: RwLock<HashMap<String, FindingState>>,
    state_path: Option<PathBuf>,
}

impl StateManager {
    /// 상태 저장소를 생성하고 디스크 스냅샷을 로드합니다.
    ///
    /// `state_path`가 `None`이면 메모리 전용입니다. 파일이 없으면 빈
    /// 상태에서 시작하고, 파일이 손상되었으면 에러를 반환합니다.
    pub fn new(state_path: Option<PathBuf>) -> Result<Self, CollectorError> {
        let states = match &state_path {
            Some(path) if path.exists() => {
                let content =
                    fs::read_to_string(path).map_err(|e| CollectorError::StateLoad {
                        path: path.display().to_string(),
                        reason: e.to_string(),
                    })?;
                serde_json::from_str(&content).map_err(|e| CollectorError::StateLoad {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?
            }
            _ => HashMap::new(),
        };

        Ok(Self {
            states: RwLock::new(states),
            state_path,
        })
    }

    /// 레코드의 안정적인 identity 키를 유도합니다.
    pub fn identity_key(record: &VulnRecord) -> String {
        IDENTITY_FIELDS
            .iter()
            .map(|f| record.get(f))
            .collect::<Vec<_>>()
            .join("|")
    }

    /// 레코드의 변경 감지 해시를 유도합니다 (SHA-256, hex).
    pub fn content_hash(record: &VulnRecord) -> String {
        let material = CHANGE_FIELDS
            .iter()
            .map(|f| record.get(f))
            .collect::<Vec<_>>()
            .join("|");
        let mut hasher = Sha256::new();
        hasher.update(material.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// 이 레코드를 처리해야 하는지 판정합니다.
    ///
    /// 처음 보는 키이거나 저장된 해시와 다르면 `true`입니다.
    /// 상태를 변경하지 않는 순수 읽기입니다.
    pub fn should_process(&self, record: &VulnRecord) -> bool {
        let key = Self::identity_key(record);
        let hash = Self::content_hash(record);

        let states = self.states.read().unwrap_or_else(PoisonError::into_inner);
        match states.get(&key) {
            None => true,
            Some(state) => state.last_seen_hash != hash,
        }
    }

    /// 레코드를 처리했음을 기록하고 스냅샷을 저장합니다.
    ///
    /// 배타 락 아래에서 맵 갱신과 파일 쓰기를 수행하므로 동시 읽기가
    /// 반만 갱신된 맵을 보는 일은 없습니다. 파일 쓰기 실패 시에도 메모리
    /// 상태는 갱신된 채 유지됩니다 — 현재 프로세스의 중복 제거는 계속
    /// 올바르게 동작합니다.
    pub fn update_state(&self, record: &VulnRecord) -> Result<(), CollectorError> {
        let key = Self::identity_key(record);
        let hash = Self::content_hash(record);

        let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
        states.insert(
            key,
            FindingState {
                last_seen_hash: hash,
                last_seen_at: Utc::now(),
            },
        );
        self.save(&states)
    }

    /// 레코드의 현재 상태 엔트리를 조회합니다 (진단/테스트용).
    pub fn get_state(&self, record: &VulnRecord) -> Option<FindingState> {
        let key = Self::identity_key(record);
        self.states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
    }

    /// 추적 중인 identity 수를 반환합니다.
    pub fn len(&self) -> usize {
        self.states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// 추적 중인 identity가 없는지 여부를 반환합니다.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 전체 매핑을 스냅샷 파일로 기록합니다.
    fn save(&self, states: &HashMap<String, FindingState>) -> Result<(), CollectorError> {
        let Some(path) = &self.state_path else {
            return Ok(());
        };

        let persist_err = |source: std::io::Error| CollectorError::StatePersist {
            path: path.display().to_string(),
            source,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(persist_err)?;
            }
        }

        let data = serde_json::to_vec(states).map_err(|e| CollectorError::StatePersist {
            path: path.display().to_string(),
            source: std::io::Error::other(e),
        })?;

        write_restricted(path, &data).map_err(persist_err)
    }
}

/// 스냅샷을 0600 권한으로 기록합니다.
#[cfg(unix)]
fn write_restricted(path: &PathBuf, data: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(data)
}

#[cfg(not(unix))]
fn write_restricted(path: &PathBuf, data: &[u8]) -> std::io::Result<()> {
    fs::write(path, data)
}
