//! export 수집 오케스트레이터 -- 폴링/export 구동/중복 제거/이벤트 전달 전체 흐름 관리
//!
//! [`ExportCollector`]는 core의 [`Pipeline`] trait을 구현하여
//! `vulnpost-daemon`에서 모듈 생명주기로 관리됩니다.
//!
//! # 내부 아키텍처
//! ```text
//! poll tick --> resolve target --> create export --> wait_for_export
//!                                                         |
//!                                                   fetch payload (CSV)
//!                                                         |
//!                                     CsvReader --> StateManager.should_process()
//!                                                         |
//!                                                   FindingEvent
//!                                                         |
//!                                                mpsc --> downstream
//! ```
//!
//! # tick 실패 의미론
//!
//! 대상 검증/export 생성/완료 대기/헤더 파싱/데이터 행 파싱 실패는 모두
//! 해당 tick만 중단하며, 다음 예약된 tick이 처음부터 재시도합니다.
//! 소비자 전달 실패는 행 단위로 건너뛰고 해당 행의 상태를 갱신하지 않아
//! 다음 tick에서 재시도됩니다.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use vulnpost_core::error::{PipelineError, VulnpostError};
use vulnpost_core::event::FindingEvent;
use vulnpost_core::metrics as m;
use vulnpost_core::pipeline::{HealthStatus, Pipeline};
use vulnpost_core::types::{Finding, Severity, Target};

use crate::client::{ExportApi, wait_for_export};
use crate::config::ExportCollectorConfig;
use crate::csv::CsvReader;
use crate::error::CollectorError;
use crate::state::StateManager;
use crate::types::VulnRecord;

/// 수집기 실행 상태
#[derive(Debug, Clone, PartialEq, Eq)]
enum CollectorState {
    /// 초기화됨, 아직 시작하지 않음
    Initialized,
    /// 실행 중
    Running,
    /// 정지됨
    Stopped,
}

/// 한 폴링 tick의 처리 요약
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// 페이로드에서 읽은 데이터 행 수
    pub records: u64,
    /// downstream으로 전달된 finding 수
    pub emitted: u64,
    /// 변경 없음으로 건너뛴 행 수
    pub skipped: u64,
}

/// tick 실행에 필요한 공유 문맥
///
/// 폴링 루프 태스크와 `poll_once()`가 같은 문맥의 복제본을 사용합니다.
struct TickContext<A> {
    config: ExportCollectorConfig,
    api: Arc<A>,
    state: Arc<StateManager>,
    finding_tx: mpsc::Sender<FindingEvent>,
    cancel: CancellationToken,
}

impl<A> Clone for TickContext<A> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            api: Arc::clone(&self.api),
            state: Arc::clone(&self.state),
            finding_tx: self.finding_tx.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<A: ExportApi> TickContext<A> {
    /// 한 tick을 실행합니다: 대상 확인 → export 생성 → 완료 대기 →
    /// 페이로드 스트리밍 → 행 단위 중복 제거/전달.
    async fn run_once(&self) -> Result<TickReport, CollectorError> {
        // 1. 대상 검증/해결 — 존재 확인 겸 경로→ID 해결, tick마다 수행
        let target_id = self.api.resolve_target(&self.config.target).await?;

        // 2. 새 export 제출
        let job = self
            .api
            .create_export(self.config.target.kind, &target_id)
            .await?;
        debug!(export_id = job.id, target_id = %target_id, "export submitted");

        // 3. 완료 대기 (일시적 오류는 내부에서 재시도)
        let wait_started = tokio::time::Instant::now();
        let job = wait_for_export(
            self.api.as_ref(),
            job.id,
            self.config.status_poll_interval,
            self.config.export_timeout,
            &self.cancel,
        )
        .await?;
        histogram!(m::COLLECTOR_EXPORT_WAIT_SECONDS)
            .record(wait_started.elapsed().as_secs_f64());

        // 4. 결과 페이로드 스트리밍
        let download_url = job.download_url().ok_or_else(|| {
            CollectorError::MalformedBody("finished export carries no download link".to_owned())
        })?;
        let payload = self.api.fetch_export_data(download_url).await?;
        let mut reader = CsvReader::new(payload);

        let header = reader
            .read_record()
            .await
            .map_err(|e| match e {
                CollectorError::CsvRecord { reason, .. } => CollectorError::CsvHeader(reason),
                other => other,
            })?
            .ok_or_else(|| CollectorError::CsvHeader("payload is empty".to_owned()))?;
        let headers = Arc::new(header);

        // 5. 행 단위 처리 — 같은 export의 finding은 동일한 trace로 묶임
        let trace_id = uuid::Uuid::new_v4().to_string();
        let mut report = TickReport::default();

        while let Some(values) = reader.read_record().await? {
            report.records += 1;
            counter!(m::COLLECTOR_RECORDS_TOTAL).increment(1);

            let record = VulnRecord::new(Arc::clone(&headers), values);
            if !self.state.should_process(&record) {
                report.skipped += 1;
                counter!(m::COLLECTOR_RECORDS_SKIPPED_TOTAL).increment(1);
                continue;
            }

            let finding = shape_finding(&record, &target_id, job.id);
            let severity_label = finding.severity.to_string().to_lowercase();
            let event = FindingEvent::with_trace(finding, trace_id.clone());

            // 전달 실패 행은 상태를 갱신하지 않으므로 다음 tick에 재시도됨
            if let Err(e) = self.finding_tx.try_send(event) {
                warn!(
                    error = %e,
                    "failed to hand finding to consumer (channel full or closed), skipping row"
                );
                continue;
            }

            if let Err(e) = self.state.update_state(&record) {
                // 메모리 상태는 갱신되었으므로 현재 프로세스의 중복 제거는 유지됨
                warn!(error = %e, "failed to persist state snapshot");
            }

            report.emitted += 1;
            counter!(
                m::COLLECTOR_FINDINGS_EMITTED_TOTAL,
                m::LABEL_SEVERITY => severity_label
            )
            .increment(1);
        }

        #[allow(clippy::cast_precision_loss)]
        gauge!(m::COLLECTOR_STATE_ENTRIES).set(self.state.len() as f64);

        Ok(report)
    }
}

/// 레코드를 소비자 이벤트 계약에 맞는 [`Finding`]으로 변환합니다.
///
/// - `detected_at`: `discovered_at` 컬럼 (RFC3339), 없거나 깨졌으면 현재 시각
/// - `severity`: `severity` 컬럼, 인식 불가 레이블은 `Info`
/// - `attributes`: 비어 있지 않은 모든 컬럼 (`vulnerability.` 네임스페이스)
fn shape_finding(record: &VulnRecord, target_id: &str, export_id: i64) -> Finding {
    let detected_at = chrono::DateTime::parse_from_rfc3339(record.get("discovered_at"))
        .map(|t| t.with_timezone(&chrono::Utc))
        .unwrap_or_else(|_| chrono::Utc::now());

    let severity = Severity::from_str_loose(record.get("severity")).unwrap_or_default();

    let attributes = record
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(field, value)| (normalize_attribute_key(field), value.to_owned()))
        .collect();

    Finding {
        id: uuid::Uuid::new_v4().to_string(),
        target_id: target_id.to_owned(),
        export_id,
        title: record.get("title").to_owned(),
        description: record.get("description").to_owned(),
        severity,
        detected_at,
        attributes,
    }
}

/// 컬럼명을 속성 키로 정규화합니다: 소문자화, 공백→밑줄,
/// `vulnerability.` 접두어 (이미 있으면 유지).
fn normalize_attribute_key(field: &str) -> String {
    let normalized = field.to_lowercase().replace(' ', "_");
    if normalized.starts_with("vulnerability.") {
        normalized
    } else {
        format!("vulnerability.{normalized}")
    }
}

/// export 수집기 -- 폴링 스케줄러와 tick 오케스트레이션을 담당합니다.
///
/// core의 `Pipeline` trait을 구현하여 `vulnpost-daemon`에서
/// start/stop/health_check 생명주기로 관리됩니다.
///
/// # 재시작 제한
///
/// `stop()` 후 재시작이 필요하면 `ExportCollectorBuilder`로 새 인스턴스를
/// 생성해야 합니다.
pub struct ExportCollector<A: ExportApi> {
    /// tick 실행 문맥
    ctx: TickContext<A>,
    /// 현재 상태
    state: CollectorState,
    /// 백그라운드 폴링 태스크 핸들
    tasks: Vec<tokio::task::JoinHandle<()>>,
    /// 완료된 tick 수
    ticks_completed: Arc<AtomicU64>,
    /// 실패한 tick 수
    tick_failures: Arc<AtomicU64>,
    /// 마지막 tick 성공 여부
    last_tick_ok: Arc<AtomicBool>,
}

impl<A: ExportApi> ExportCollector<A> {
    /// 현재 상태명을 반환합니다.
    pub fn state_name(&self) -> &str {
        match self.state {
            CollectorState::Initialized => "initialized",
            CollectorState::Running => "running",
            CollectorState::Stopped => "stopped",
        }
    }

    /// 모니터링 대상을 반환합니다.
    pub fn target(&self) -> &Target {
        &self.ctx.config.target
    }

    /// 완료된 tick 수를 반환합니다.
    pub fn ticks_completed(&self) -> u64 {
        self.ticks_completed.load(Ordering::Relaxed)
    }

    /// 실패한 tick 수를 반환합니다.
    pub fn tick_failures(&self) -> u64 {
        self.tick_failures.load(Ordering::Relaxed)
    }

    /// 상태 저장소가 추적 중인 identity 수를 반환합니다.
    pub fn state_entries(&self) -> usize {
        self.ctx.state.len()
    }

    /// 단일 tick을 수동으로 실행합니다 (`--once` 및 테스트용).
    pub async fn poll_once(&self) -> Result<TickReport, CollectorError> {
        self.ctx.run_once().await
    }
}

impl<A: ExportApi> Pipeline for ExportCollector<A> {
    async fn start(&mut self) -> Result<(), VulnpostError> {
        match self.state {
            CollectorState::Running => {
                return Err(PipelineError::AlreadyRunning.into());
            }
            CollectorState::Stopped => {
                // cancel 토큰이 이미 소비되었으므로 재시작은 지원하지 않음
                return Err(PipelineError::InitFailed(
                    "collector cannot be restarted, rebuild it with ExportCollectorBuilder"
                        .to_owned(),
                )
                .into());
            }
            CollectorState::Initialized => {}
        }

        info!(
            target = %self.ctx.config.target,
            poll_interval_secs = self.ctx.config.poll_interval.as_secs(),
            "starting export collector"
        );

        let ctx = self.ctx.clone();
        let ticks_completed = Arc::clone(&self.ticks_completed);
        let tick_failures = Arc::clone(&self.tick_failures);
        let last_tick_ok = Arc::clone(&self.last_tick_ok);
        let cancel = self.ctx.cancel.clone();
        let poll_interval = self.ctx.config.poll_interval;

        let poll_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            // tick이 주기보다 오래 걸리면 밀린 tick을 몰아서 실행하지 않음
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("poll loop cancelled");
                        break;
                    }
                    _ = interval.tick() => {
                        match ctx.run_once().await {
                            Ok(report) => {
                                last_tick_ok.store(true, Ordering::Relaxed);
                                ticks_completed.fetch_add(1, Ordering::Relaxed);
                                counter!(m::COLLECTOR_TICKS_TOTAL, m::LABEL_RESULT => "success")
                                    .increment(1);
                                info!(
                                    records = report.records,
                                    emitted = report.emitted,
                                    skipped = report.skipped,
                                    "poll tick completed"
                                );
                            }
                            Err(CollectorError::Cancelled { export_id }) => {
                                info!(export_id, "tick cancelled during shutdown");
                                break;
                            }
                            Err(e) => {
                                // tick 실패는 로그만 남기고 다음 tick이 재시도
                                last_tick_ok.store(false, Ordering::Relaxed);
                                tick_failures.fetch_add(1, Ordering::Relaxed);
                                counter!(m::COLLECTOR_TICKS_TOTAL, m::LABEL_RESULT => "failure")
                                    .increment(1);
                                error!(error = %e, "poll tick failed");
                            }
                        }
                    }
                }
            }
        });

        self.tasks.push(poll_task);
        self.state = CollectorState::Running;
        info!("export collector started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), VulnpostError> {
        if self.state != CollectorState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        info!("stopping export collector");
        self.ctx.cancel.cancel();

        let grace = self.ctx.config.shutdown_grace;
        for mut task in self.tasks.drain(..) {
            if tokio::time::timeout(grace, &mut task).await.is_err() {
                warn!(
                    grace_secs = grace.as_secs(),
                    "in-flight tick did not finish within grace period, aborting"
                );
                task.abort();
                let _ = task.await;
            }
        }

        self.state = CollectorState::Stopped;
        info!("export collector stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            CollectorState::Running => {
                if self.last_tick_ok.load(Ordering::Relaxed) {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Degraded("last poll tick failed".to_owned())
                }
            }
            CollectorState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            CollectorState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

/// export 수집기 빌더
///
/// 수집기를 구성하고 필요한 채널과 상태 저장소를 생성합니다.
pub struct ExportCollectorBuilder<A: ExportApi> {
    config: ExportCollectorConfig,
    api: Option<Arc<A>>,
    finding_tx: Option<mpsc::Sender<FindingEvent>>,
    state_manager: Option<Arc<StateManager>>,
}

impl<A: ExportApi> ExportCollectorBuilder<A> {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: ExportCollectorConfig::default(),
            api: None,
            finding_tx: None,
            state_manager: None,
        }
    }

    /// 수집기 설정을 지정합니다.
    pub fn config(mut self, config: ExportCollectorConfig) -> Self {
        self.config = config;
        self
    }

    /// export API 클라이언트를 설정합니다.
    pub fn api_client(mut self, api: Arc<A>) -> Self {
        self.api = Some(api);
        self
    }

    /// 외부 finding 전송 채널을 설정합니다.
    ///
    /// 설정하지 않으면 빌더가 새 채널을 생성합니다.
    pub fn finding_sender(mut self, tx: mpsc::Sender<FindingEvent>) -> Self {
        self.finding_tx = Some(tx);
        self
    }

    /// 외부에서 생성한 상태 저장소를 주입합니다 (테스트용).
    ///
    /// 설정하지 않으면 `config.state_file`로부터 생성합니다.
    pub fn state_manager(mut self, state: Arc<StateManager>) -> Self {
        self.state_manager = Some(state);
        self
    }

    /// 수집기를 빌드합니다.
    ///
    /// # Returns
    /// - `ExportCollector`: 수집기 인스턴스
    /// - `Option<mpsc::Receiver<FindingEvent>>`: finding 수신 채널
    ///   (외부 finding_sender를 설정한 경우 None)
    pub fn build(
        self,
    ) -> Result<(ExportCollector<A>, Option<mpsc::Receiver<FindingEvent>>), CollectorError> {
        self.config.validate()?;

        let api = self.api.ok_or_else(|| CollectorError::Config {
            field: "api_client".to_owned(),
            reason: "export api client must be provided".to_owned(),
        })?;

        let (finding_tx, finding_rx) = if let Some(tx) = self.finding_tx {
            (tx, None)
        } else {
            let (tx, rx) = mpsc::channel(self.config.channel_capacity);
            (tx, Some(rx))
        };

        let state = match self.state_manager {
            Some(state) => state,
            None => {
                if self.config.state_file.is_none() {
                    warn!(
                        "no state file configured, dedup state is memory-only; \
                         every restart reprocesses all findings as new"
                    );
                }
                Arc::new(StateManager::new(self.config.state_file.clone())?)
            }
        };

        let collector = ExportCollector {
            ctx: TickContext {
                config: self.config,
                api,
                state,
                finding_tx,
                cancel: CancellationToken::new(),
            },
            state: CollectorState::Initialized,
            tasks: Vec::new(),
            ticks_completed: Arc::new(AtomicU64::new(0)),
            tick_failures: Arc::new(AtomicU64::new(0)),
            last_tick_ok: Arc::new(AtomicBool::new(true)),
        };

        Ok((collector, finding_rx))
    }
}

impl<A: ExportApi> Default for ExportCollectorBuilder<A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockExportClient;
    use crate::types::ExportStatus;
    use vulnpost_core::types::TargetKind;

    const SAMPLE_CSV: &str = "\
Project Name,Tool,Scanner Name,CVE,Location,Status,Severity,Title,Discovered At\n\
p,sast,semgrep,CVE-1,f.go:10,detected,high,Hardcoded secret,2026-08-01T10:00:00Z\n\
p,sast,semgrep,CVE-2,g.go:20,detected,critical,SQL injection,2026-08-01T11:00:00Z\n";

    fn test_config() -> ExportCollectorConfig {
        ExportCollectorConfig {
            target: Target::new(TargetKind::Project, "12345"),
            ..Default::default()
        }
    }

    fn build_with(
        api: MockExportClient,
    ) -> (
        ExportCollector<MockExportClient>,
        mpsc::Receiver<FindingEvent>,
    ) {
        let (collector, rx) = ExportCollectorBuilder::new()
            .config(test_config())
            .api_client(Arc::new(api))
            .build()
            .unwrap();
        (collector, rx.unwrap())
    }

    #[test]
    fn builder_creates_collector() {
        let (collector, rx) = ExportCollectorBuilder::new()
            .config(test_config())
            .api_client(Arc::new(MockExportClient::new()))
            .build()
            .unwrap();
        assert_eq!(collector.state_name(), "initialized");
        assert!(rx.is_some());
        assert_eq!(collector.target().reference, "12345");
    }

    #[test]
    fn builder_with_external_sender() {
        let (tx, _rx) = mpsc::channel(8);
        let (_collector, rx) = ExportCollectorBuilder::new()
            .config(test_config())
            .api_client(Arc::new(MockExportClient::new()))
            .finding_sender(tx)
            .build()
            .unwrap();
        assert!(rx.is_none());
    }

    #[test]
    fn builder_rejects_missing_api() {
        let result: Result<(ExportCollector<MockExportClient>, _), _> =
            ExportCollectorBuilder::new().config(test_config()).build();
        assert!(result.is_err());
    }

    #[test]
    fn builder_rejects_invalid_config() {
        let result = ExportCollectorBuilder::new()
            .config(ExportCollectorConfig::default()) // 빈 target.reference
            .api_client(Arc::new(MockExportClient::new()))
            .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn poll_once_emits_new_findings() {
        let api = MockExportClient::new()
            .with_status_sequence(vec![
                ExportStatus::Created,
                ExportStatus::Running,
                ExportStatus::Finished,
            ])
            .with_csv(SAMPLE_CSV);
        let (collector, mut rx) = build_with(api);

        let report = collector.poll_once().await.unwrap();
        assert_eq!(report.records, 2);
        assert_eq!(report.emitted, 2);
        assert_eq!(report.skipped, 0);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.finding.severity, Severity::High);
        assert_eq!(first.finding.title, "Hardcoded secret");
        assert_eq!(first.finding.target_id, "12345");

        let second = rx.recv().await.unwrap();
        assert_eq!(second.finding.severity, Severity::Critical);
        // 같은 export의 finding은 같은 trace로 묶임
        assert_eq!(first.metadata.trace_id, second.metadata.trace_id);
    }

    #[tokio::test]
    async fn poll_once_makes_exactly_one_status_call_per_script_step() {
        let api = MockExportClient::new()
            .with_status_sequence(vec![
                ExportStatus::Created,
                ExportStatus::Running,
                ExportStatus::Finished,
            ])
            .with_csv(SAMPLE_CSV);
        let (collector, _rx) = build_with(api);

        collector.poll_once().await.unwrap();
        let api = &collector.ctx.api;
        assert_eq!(api.status_calls.load(Ordering::SeqCst), 3);
        assert_eq!(api.create_calls.load(Ordering::SeqCst), 1);
        assert_eq!(api.fetch_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_poll_skips_unchanged_records() {
        let api = MockExportClient::new().with_csv(SAMPLE_CSV);
        let (collector, mut rx) = build_with(api);

        let first = collector.poll_once().await.unwrap();
        assert_eq!(first.emitted, 2);

        let second = collector.poll_once().await.unwrap();
        assert_eq!(second.records, 2);
        assert_eq!(second.emitted, 0);
        assert_eq!(second.skipped, 2);

        // 첫 tick의 이벤트 2건만 존재
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn changed_record_is_emitted_again() {
        let state = Arc::new(StateManager::new(None).unwrap());

        let api = MockExportClient::new().with_csv(
            "Project Name,Tool,Scanner Name,CVE,Location,Status,Severity\n\
             p,sast,semgrep,CVE-1,f.go:10,detected,high\n",
        );
        let (collector, _rx) = ExportCollectorBuilder::new()
            .config(test_config())
            .api_client(Arc::new(api))
            .state_manager(Arc::clone(&state))
            .build()
            .unwrap();
        assert_eq!(collector.poll_once().await.unwrap().emitted, 1);

        // 같은 identity, Status만 변경된 export
        let api = MockExportClient::new().with_csv(
            "Project Name,Tool,Scanner Name,CVE,Location,Status,Severity\n\
             p,sast,semgrep,CVE-1,f.go:10,resolved,high\n",
        );
        let (collector, _rx) = ExportCollectorBuilder::new()
            .config(test_config())
            .api_client(Arc::new(api))
            .state_manager(Arc::clone(&state))
            .build()
            .unwrap();
        let report = collector.poll_once().await.unwrap();
        assert_eq!(report.emitted, 1);
        assert_eq!(report.skipped, 0);

        // 변경분 수용 후 동일 export 반복은 제외
        assert_eq!(collector.poll_once().await.unwrap().skipped, 1);
    }

    #[tokio::test]
    async fn invalid_target_aborts_tick() {
        let api = MockExportClient::new().with_failing_resolve();
        let (collector, _rx) = build_with(api);

        let err = collector.poll_once().await.unwrap_err();
        assert!(matches!(err, CollectorError::InvalidTarget { .. }));
        // export는 생성조차 되지 않음
        assert_eq!(collector.ctx.api.create_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_export_aborts_tick_without_fetch() {
        let api = MockExportClient::new()
            .with_status_sequence(vec![ExportStatus::Failed])
            .with_csv(SAMPLE_CSV);
        let (collector, _rx) = build_with(api);

        let err = collector.poll_once().await.unwrap_err();
        assert!(matches!(err, CollectorError::ExportFailed { .. }));
        assert_eq!(collector.ctx.api.fetch_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn create_failure_aborts_tick() {
        let api = MockExportClient::new().with_failing_create();
        let (collector, _rx) = build_with(api);

        let err = collector.poll_once().await.unwrap_err();
        assert!(matches!(err, CollectorError::UnexpectedStatus { .. }));
    }

    #[tokio::test]
    async fn empty_payload_is_header_error() {
        let api = MockExportClient::new().with_csv("");
        let (collector, _rx) = build_with(api);

        let err = collector.poll_once().await.unwrap_err();
        assert!(matches!(err, CollectorError::CsvHeader(_)));
    }

    #[tokio::test]
    async fn malformed_row_aborts_tick() {
        let api = MockExportClient::new().with_csv(
            "CVE,Status\n\
             CVE-1,detected\n\
             CVE-2,det\"ected\n",
        );
        let (collector, mut rx) = build_with(api);

        let err = collector.poll_once().await.unwrap_err();
        assert!(matches!(err, CollectorError::CsvRecord { .. }));

        // 손상 행 이전에 전달된 행은 이미 downstream에 도착했고 상태에 기록됨
        assert!(rx.try_recv().is_ok());
        assert_eq!(collector.state_entries(), 1);
    }

    #[tokio::test]
    async fn full_channel_skips_row_without_state_update() {
        let (tx, _rx) = mpsc::channel(1); // 용량 1 — 두 번째 행은 전달 실패
        let api = MockExportClient::new().with_csv(SAMPLE_CSV);
        let (collector, _) = ExportCollectorBuilder::new()
            .config(test_config())
            .api_client(Arc::new(api))
            .finding_sender(tx)
            .build()
            .unwrap();

        let report = collector.poll_once().await.unwrap();
        assert_eq!(report.emitted, 1);
        // 전달 실패 행은 상태 미갱신 → 다음 tick에 다시 처리 대상
        assert_eq!(collector.state_entries(), 1);
    }

    #[tokio::test]
    async fn lifecycle_start_stop() {
        let api = MockExportClient::new().with_csv("Title\n");
        let (mut collector, _rx) = build_with(api);

        assert_eq!(collector.state_name(), "initialized");
        assert!(collector.health_check().await.is_unhealthy());

        collector.start().await.unwrap();
        assert_eq!(collector.state_name(), "running");

        // 이중 시작은 거부
        assert!(collector.start().await.is_err());

        collector.stop().await.unwrap();
        assert_eq!(collector.state_name(), "stopped");
        assert!(collector.health_check().await.is_unhealthy());

        // 이중 정지, 재시작 모두 거부
        assert!(collector.stop().await.is_err());
        let err = collector.start().await.unwrap_err();
        assert!(format!("{err}").contains("rebuild"));
    }

    #[tokio::test]
    async fn poll_loop_runs_ticks_and_reports_health() {
        let api = MockExportClient::new().with_csv(
            "CVE,Status,Severity\nCVE-1,detected,low\n",
        );
        let config = ExportCollectorConfig {
            target: Target::new(TargetKind::Project, "12345"),
            poll_interval: std::time::Duration::from_millis(20),
            ..Default::default()
        };
        let (mut collector, mut rx) = {
            let (c, rx) = ExportCollectorBuilder::new()
                .config(config)
                .api_client(Arc::new(api))
                .build()
                .unwrap();
            (c, rx.unwrap())
        };

        collector.start().await.unwrap();
        // 첫 tick은 즉시 실행됨
        let event = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.finding.severity, Severity::Low);

        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        assert!(collector.ticks_completed() >= 1);
        assert!(collector.health_check().await.is_healthy());

        collector.stop().await.unwrap();
    }

    #[tokio::test]
    async fn failing_ticks_degrade_health() {
        let api = MockExportClient::new().with_failing_resolve();
        let config = ExportCollectorConfig {
            target: Target::new(TargetKind::Project, "12345"),
            poll_interval: std::time::Duration::from_millis(10),
            ..Default::default()
        };
        let (mut collector, _rx) = {
            let (c, rx) = ExportCollectorBuilder::new()
                .config(config)
                .api_client(Arc::new(api))
                .build()
                .unwrap();
            (c, rx)
        };

        collector.start().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(collector.tick_failures() >= 1);
        assert!(collector.health_check().await.is_degraded());

        collector.stop().await.unwrap();
    }

    // --- finding 변환 테스트 ---

    fn record(fields: &[(&str, &str)]) -> VulnRecord {
        let headers = Arc::new(fields.iter().map(|(h, _)| (*h).to_owned()).collect());
        let values = fields.iter().map(|(_, v)| (*v).to_owned()).collect();
        VulnRecord::new(headers, values)
    }

    #[test]
    fn shape_finding_maps_severity_labels() {
        for (label, expected) in [
            ("critical", Severity::Critical),
            ("High", Severity::High),
            ("MEDIUM", Severity::Medium),
            ("low", Severity::Low),
            ("info", Severity::Info),
            ("unknown", Severity::Info),
            ("garbage", Severity::Info),
        ] {
            let rec = record(&[("Severity", label)]);
            assert_eq!(shape_finding(&rec, "1", 1).severity, expected, "{label}");
        }
    }

    #[test]
    fn shape_finding_parses_discovered_at() {
        let rec = record(&[("Discovered At", "x"), ("discovered_at", "2026-08-01T10:00:00Z")]);
        let finding = shape_finding(&rec, "1", 1);
        assert_eq!(
            finding.detected_at,
            chrono::DateTime::parse_from_rfc3339("2026-08-01T10:00:00Z").unwrap()
        );
    }

    #[test]
    fn shape_finding_falls_back_to_now_on_bad_timestamp() {
        let before = chrono::Utc::now();
        let rec = record(&[("discovered_at", "yesterday-ish")]);
        let finding = shape_finding(&rec, "1", 1);
        assert!(finding.detected_at >= before);
    }

    #[test]
    fn shape_finding_namespaces_attributes() {
        let rec = record(&[
            ("Project Name", "billing"),
            ("CVE", "CVE-1"),
            ("Empty Field", ""),
        ]);
        let finding = shape_finding(&rec, "42", 7);

        let keys: Vec<&str> = finding.attributes.iter().map(|(k, _)| k.as_str()).collect();
        assert!(keys.contains(&"vulnerability.project_name"));
        assert!(keys.contains(&"vulnerability.cve"));
        // 빈 값은 속성에서 제외
        assert!(!keys.iter().any(|k| k.contains("empty")));
        assert_eq!(finding.target_id, "42");
        assert_eq!(finding.export_id, 7);
    }

    #[test]
    fn normalize_attribute_key_rules() {
        assert_eq!(
            normalize_attribute_key("Project Name"),
            "vulnerability.project_name"
        );
        assert_eq!(normalize_attribute_key("CVE"), "vulnerability.cve");
        assert_eq!(
            normalize_attribute_key("vulnerability.tool"),
            "vulnerability.tool"
        );
    }
}
