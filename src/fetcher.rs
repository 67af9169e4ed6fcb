//! 파일 가져오기 드라이버
//!
//! - 상태 확인 → 파일 요청 → 블록 0 → 스트리밍 → EOT 핸드쉐이크
//! - 상태 전이는 `session::Phase`가 결정하고 여기서는 대기와 전송만 수행
//! - 파일 단위 실패는 `FetchReport`로 보고하고 배치는 계속된다

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::block::{Assembled, BlockZero, Verdict};
use crate::checksum::crc8_xor;
use crate::command::{CommandFrame, Response, Signal, DISKSPACE, EOT, IDLE, STATUS};
use crate::committer::OutputCommitter;
use crate::listener::{BlockSlot, Listener};
use crate::listing::extract_fit_filenames;
use crate::sequence::{Continuity, SequenceTracker};
use crate::session::{Action, Event, Phase};
use crate::stats::TransferStats;
use crate::storage::Storage;
use crate::transport::{Channel, Subscriptions, Transport};
use crate::{Config, Error, Result, PROGRESS_INTERVAL};

/// 파일 요청 중단 사유
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// 장치가 승인 대신 다른 응답을 보냄
    HandshakeRejected(String),

    /// 승인 응답 없음
    AckTimeout,

    /// 스트리밍 중 연속 타임아웃
    StreamStalled { timeouts: u32 },

    /// 실행 도중 상태 재확인 실패
    NotIdle,
}

/// 파일 하나의 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchStatus {
    Success,

    /// 기록은 끝났지만 선언 크기와 다름 (파일은 유지)
    SizeMismatch { declared: u64, written: u64 },

    /// 블록 0 재시도 초과, CAN 전송
    Cancelled,

    Aborted(AbortReason),
}

/// 파일 하나의 가져오기 보고서
#[derive(Debug, Clone)]
pub struct FetchReport {
    pub filename: String,
    pub status: FetchStatus,
    /// 블록 0에 선언된 크기
    pub declared_size: Option<u64>,
    /// 저장소에 기록한 바이트
    pub bytes_written: u64,
    /// EOT 핸드쉐이크 타임아웃 수 (파일은 쓸 수 있을 수 있음)
    pub soft_failures: u32,
    pub stats: TransferStats,
}

impl FetchReport {
    fn new(filename: &str) -> Self {
        Self {
            filename: filename.to_string(),
            status: FetchStatus::Aborted(AbortReason::AckTimeout),
            declared_size: None,
            bytes_written: 0,
            soft_failures: 0,
            stats: TransferStats::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == FetchStatus::Success
    }
}

/// 배치 동기화 결과
#[derive(Debug, Clone, Default)]
pub struct SyncSummary {
    /// 목록 파일을 포함한 가져오기 보고서
    pub reports: Vec<FetchReport>,
    /// 이미 저장소에 있어 건너뛴 파일
    pub skipped: Vec<String>,
    /// 디스크 사용량 (`"<used>/<total>"`)
    pub diskspace: Option<String>,
}

impl SyncSummary {
    pub fn succeeded(&self) -> usize {
        self.reports.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.reports.len() - self.succeeded()
    }
}

/// 데이터 채널 쪽 송수신 묶음 (블록 단계 동안만 존재)
struct Link<'a, T: Transport> {
    transport: &'a T,
    config: &'a Config,
    slot: &'a BlockSlot,
    stray_rx: &'a mut mpsc::Receiver<Bytes>,
    filename: &'a str,
}

impl<'a, T: Transport> Link<'a, T> {
    async fn signal(&mut self, signal: Signal, stats: &mut TransferStats) -> bool {
        if signal == Signal::Nak {
            stats.naks_sent += 1;
        }

        match self.transport.send(Channel::Outbound, &signal.to_bytes()).await {
            Ok(()) => true,
            Err(e) => {
                warn!("{}: {:?} 전송 실패: {}", self.filename, signal, e);
                stats.write_failures += 1;
                false
            }
        }
    }

    /// 조립기를 멈추고 조용해질 때까지 잔여 조각을 버린다
    async fn drain(&mut self, stats: &mut TransferStats) {
        self.slot.disarm();
        let quiet = Duration::from_millis(self.config.drain_quiet_ms);

        let mut count = 0;
        while let Ok(Some(_)) = tokio::time::timeout(quiet, self.stray_rx.recv()).await {
            count += 1;
        }

        if count > 0 {
            debug!("{}: 잔여 조각 {}개 버림", self.filename, count);
        }
        stats.drained_fragments += count;
    }

    /// 동작 수행, 모든 전송이 성공했는지 반환
    async fn perform(&mut self, actions: &[Action], stats: &mut TransferStats) -> bool {
        let mut ok = true;
        for action in actions {
            match *action {
                Action::Drain => self.drain(stats).await,
                Action::Arm => self.slot.arm(),
                Action::Send(signal) => ok &= self.signal(signal, stats).await,
            }
        }
        ok
    }

    /// 블록 대기 (이전 전송이 실패했으면 바로 타임아웃으로 취급)
    async fn next(&mut self, sent: bool) -> Result<Option<Assembled>> {
        if !sent {
            return Ok(None);
        }
        self.slot
            .wait(Duration::from_millis(self.config.block_timeout_ms))
            .await
    }

    /// 블록 단계 밖에서 오는 두 번째 EOT 대기
    async fn second_eot(&mut self, sent: bool) -> Result<bool> {
        if !sent {
            return Ok(false);
        }

        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(self.config.eot_timeout_ms);
        loop {
            match tokio::time::timeout_at(deadline, self.stray_rx.recv()).await {
                Ok(Some(msg)) if msg.as_ref() == [EOT] => return Ok(true),
                Ok(Some(msg)) => debug!("{}: EOT 대기 중 메시지 무시 {:02X?}", self.filename, msg.as_ref()),
                Ok(None) => return Err(Error::ConnectionClosed),
                Err(_) => return Ok(false),
            }
        }
    }
}

/// 제어 채널 응답 대기 (타임아웃이면 None)
async fn recv_response(
    control: &mut mpsc::Receiver<Bytes>,
    timeout: Duration,
) -> Result<Option<Response>> {
    match tokio::time::timeout(timeout, control.recv()).await {
        Ok(Some(bytes)) => Ok(Some(Response::parse(&bytes))),
        Ok(None) => Err(Error::ConnectionClosed),
        Err(_) => Ok(None),
    }
}

/// 파일 가져오기 드라이버
pub struct Fetcher<T: Transport, S: Storage> {
    config: Config,
    transport: T,
    storage: S,
    control: mpsc::Receiver<Bytes>,
    /// 리스너가 돌고 있지 않을 때만 Some
    inbound: Option<mpsc::Receiver<Bytes>>,
    /// 마지막으로 확인한 장치 Idle 여부
    device_idle: bool,
    /// 실행 시작 상태 확인 통과 여부
    gate_passed: bool,
}

impl<T: Transport, S: Storage> Fetcher<T, S> {
    pub fn new(config: Config, transport: T, storage: S, subscriptions: Subscriptions) -> Self {
        Self {
            config,
            transport,
            storage,
            control: subscriptions.control,
            inbound: Some(subscriptions.inbound),
            device_idle: false,
            gate_passed: false,
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// 지연 도착한 제어 메시지 버리기
    fn drain_control(&mut self) {
        while let Ok(stale) = self.control.try_recv() {
            debug!("오래된 제어 메시지 버림: {:02X?}", stale.as_ref());
        }
    }

    async fn command(&self, frame: &[u8]) -> bool {
        match self.transport.send(Channel::Control, frame).await {
            Ok(()) => true,
            Err(e) => {
                warn!("명령 전송 실패 {:02X?}: {}", frame, e);
                false
            }
        }
    }

    async fn request(&mut self, frame: &[u8], timeout_ms: u64) -> Result<Option<Response>> {
        self.drain_control();
        if !self.command(frame).await {
            return Ok(None);
        }
        recv_response(&mut self.control, Duration::from_millis(timeout_ms)).await
    }

    /// 상태 조회, 필요하면 Idle 명령을 한 번 보내고 마지막 응답을 돌려준다
    async fn query_idle(&mut self) -> Result<Option<Response>> {
        let first = self.request(&STATUS, self.config.status_timeout_ms).await?;
        let reply = if first == Some(Response::Idle) {
            first
        } else {
            warn!("장치 상태 {:?}, Idle 명령 전송", first);
            self.request(&IDLE, self.config.ack_timeout_ms).await?
        };

        self.device_idle = reply == Some(Response::Idle);
        Ok(reply)
    }

    /// 실행 시작 상태 확인
    ///
    /// 응답이 Idle이 아니면 Idle 명령을 한 번 보내고 다시 확인한다.
    /// 실패하면 실행 전체를 중단해야 한다.
    pub async fn ensure_idle(&mut self) -> Result<()> {
        let reply = self.query_idle().await?;
        if self.device_idle {
            debug!("장치 Idle 확인");
            self.gate_passed = true;
            Ok(())
        } else {
            error!("장치가 Idle 상태가 아님: {:?}", reply);
            Err(Error::StatusCheck(format!("{:?}", reply)))
        }
    }

    /// 디스크 사용량 조회 (`"<used>/<total>"`, KB)
    pub async fn read_diskspace(&mut self) -> Result<String> {
        self.drain_control();
        if !self.command(&DISKSPACE).await {
            return Err(Error::TransportWrite("디스크 용량 요청".into()));
        }

        let raw = match tokio::time::timeout(
            Duration::from_millis(self.config.ack_timeout_ms),
            self.control.recv(),
        )
        .await
        {
            Ok(Some(raw)) => raw,
            Ok(None) => return Err(Error::ConnectionClosed),
            Err(_) => return Err(Error::Timeout { what: "디스크 용량 응답" }),
        };

        match Response::parse(&raw) {
            Response::DiskSpace(text) => Ok(text),
            Response::Unknown(_) if crc8_xor(&raw) != 0 => Err(Error::ChecksumMismatch {
                expected: 0,
                got: crc8_xor(&raw) as u16,
            }),
            other => Err(Error::UnexpectedResponse(format!("{:?}", other))),
        }
    }

    /// 파일 요청 및 승인 확인
    async fn request_file(&mut self, filename: &str) -> Result<Option<AbortReason>> {
        let frame = CommandFrame::fetch_request(filename).to_bytes();
        let mut reason = AbortReason::AckTimeout;

        for attempt in 1..=self.config.fetch_attempts.max(1) {
            match self.request(&frame, self.config.ack_timeout_ms).await? {
                Some(Response::FetchAck(name)) if name == filename => return Ok(None),
                Some(other) => {
                    warn!("{}: 파일 요청 거부 (시도 {}): {:?}", filename, attempt, other);
                    reason = AbortReason::HandshakeRejected(format!("{:?}", other));
                }
                None => {
                    warn!("{}: 파일 요청 응답 없음 (시도 {})", filename, attempt);
                    reason = AbortReason::AckTimeout;
                }
            }
        }

        Ok(Some(reason))
    }

    /// 파일 하나 가져오기
    ///
    /// 배치를 멈춰야 하는 경우(시작 상태 확인 실패, 구독 종료, 저장소 에러)만 `Err`.
    /// 실행 도중 재확인 실패는 이 파일만 `AbortReason::NotIdle`로 중단한다.
    pub async fn fetch(&mut self, filename: &str) -> Result<FetchReport> {
        if !self.gate_passed {
            self.ensure_idle().await?;
        }

        let mut report = FetchReport::new(filename);
        let max_attempts = self.config.block_zero_attempts;

        let mut phase = Phase::FetchRequested;
        if !self.device_idle {
            let reply = self.query_idle().await?;
            phase = Phase::StatusCheck
                .on(Event::Status { idle: self.device_idle }, max_attempts)
                .next;
            if phase == Phase::Aborted {
                warn!("{}: 장치가 Idle 상태가 아님 ({:?}), 건너뜀", filename, reply);
                report.status = FetchStatus::Aborted(AbortReason::NotIdle);
                report.stats.finish();
                return Ok(report);
            }
        }

        let rejected = self.request_file(filename).await?;
        self.device_idle = false;
        let requested = phase.on(Event::RequestSent, max_attempts);
        let transition = requested.next.on(
            Event::FetchAck {
                accepted: rejected.is_none(),
            },
            max_attempts,
        );

        if let Some(reason) = rejected {
            warn!("{}: 가져오기 중단 ({:?})", filename, reason);
            report.status = FetchStatus::Aborted(reason);
            report.stats.finish();
            return Ok(report);
        }

        let mut inbound = self.inbound.take().ok_or(Error::ConnectionClosed)?;
        while let Ok(stale) = inbound.try_recv() {
            debug!("{}: 오래된 데이터 조각 버림 ({} bytes)", filename, stale.len());
        }

        let slot = Arc::new(BlockSlot::new());
        let (stray_tx, mut stray_rx) = mpsc::channel(self.config.stray_queue_capacity.max(1));
        let listener = Listener::spawn(inbound, slot.clone(), stray_tx);

        let result = self
            .transfer(filename, &slot, &mut stray_rx, transition.actions, &mut report)
            .await;

        // 성공/실패와 무관하게 리스너를 멈추고 수신기를 돌려받는다
        self.inbound = Some(listener.stop().await?);

        let dropped = slot.dropped();
        if dropped > 0 {
            warn!("{}: 블록 길이를 넘는 {} bytes 버림", filename, dropped);
        }
        report.stats.dropped_bytes = dropped as u64;

        result?;
        report.stats.finish();

        match &report.status {
            FetchStatus::Success => info!(
                "{}: 완료 {} bytes ({})",
                filename,
                report.bytes_written,
                report.stats.summary()
            ),
            FetchStatus::SizeMismatch { declared, written } => error!(
                "{}: 크기 불일치 {}(기록) != {}(선언)",
                filename, written, declared
            ),
            other => warn!("{}: 실패 {:?}", filename, other),
        }

        Ok(report)
    }

    /// 블록 0부터 EOT 핸드쉐이크까지
    async fn transfer(
        &mut self,
        filename: &str,
        slot: &BlockSlot,
        stray_rx: &mut mpsc::Receiver<Bytes>,
        initial: Vec<Action>,
        report: &mut FetchReport,
    ) -> Result<()> {
        let max_attempts = self.config.block_zero_attempts;
        let mut link = Link {
            transport: &self.transport,
            config: &self.config,
            slot,
            stray_rx,
            filename,
        };
        let stats = &mut report.stats;

        // 블록 0
        let mut phase = Phase::BlockZero { attempt: 1 };
        let mut sent = link.perform(&initial, stats).await;
        let zero = loop {
            if let Phase::BlockZero { attempt } = phase {
                stats.block_zero_attempts = attempt;
            }

            let mut zero = None;
            let event = match link.next(sent).await? {
                Some(Assembled::Block(block)) => match block.validate() {
                    Verdict::Valid if block.sequence == 0 => {
                        zero = BlockZero::parse(&block.payload);
                        if zero.is_some() {
                            Event::ValidBlock
                        } else {
                            warn!("{}: 블록 0 내용 해석 실패", filename);
                            Event::CorruptBlock
                        }
                    }
                    Verdict::Valid => {
                        warn!("{}: 블록 0 대신 블록 {} 수신", filename, block.sequence);
                        Event::CorruptBlock
                    }
                    Verdict::Corrupt => {
                        warn!("{}: 블록 0 손상", filename);
                        Event::CorruptBlock
                    }
                },
                Some(Assembled::EndOfTransfer) => Event::EndOfTransfer,
                None => {
                    warn!("{}: 블록 0 대기 시간 초과", filename);
                    Event::TimedOut
                }
            };

            match event {
                Event::ValidBlock => stats.valid_blocks += 1,
                Event::TimedOut => stats.timeouts += 1,
                _ => stats.corrupt_blocks += 1,
            }

            let transition = phase.on(event, max_attempts);
            if transition.next == Phase::Streaming {
                // 장치가 데이터를 보내기 전에 파일을 준비한다
                if let Some(zero) = zero {
                    sent = link.perform(&transition.actions, stats).await;
                    phase = transition.next;
                    break zero;
                }
            }

            sent = link.perform(&transition.actions, stats).await;
            phase = transition.next;

            if phase == Phase::Cancelled {
                error!("{}: 블록 0 {}회 실패, 전송 취소", filename, max_attempts);
                report.status = FetchStatus::Cancelled;
                return Ok(());
            }
        };

        debug!("{}: 블록 0 ({} bytes 선언)", filename, zero.size);
        report.declared_size = Some(zero.size);

        // 스트리밍
        let mut committer = OutputCommitter::create(
            &mut self.storage,
            filename,
            zero.size,
            self.config.flush_blocks,
        )?;
        let mut tracker = SequenceTracker::new();
        tracker.accept(0);
        let mut stalls = 0u32;

        while phase == Phase::Streaming {
            let event = match link.next(sent).await? {
                Some(Assembled::Block(block)) => match block.validate() {
                    Verdict::Valid => {
                        stalls = 0;
                        if let Continuity::Unexpected { expected, got } =
                            tracker.accept(block.sequence)
                        {
                            warn!("{}: 예상 밖 블록 {} -> {} (기록은 계속)", filename, expected, got);
                            stats.sequence_anomalies.push((expected, got));
                        }

                        committer.commit(&block.payload)?;
                        stats.valid_blocks += 1;
                        stats.payload_bytes += block.payload.len() as u64;
                        if stats.valid_blocks % PROGRESS_INTERVAL == 0 {
                            debug!(
                                "{}: 블록 {}개, {}/{} bytes",
                                filename,
                                stats.valid_blocks,
                                committer.written(),
                                zero.size
                            );
                        }
                        Event::ValidBlock
                    }
                    Verdict::Corrupt => {
                        warn!(
                            "{}: 블록 {} 손상 (마지막 정상 {}), NAK",
                            filename,
                            block.sequence,
                            tracker.last()
                        );
                        stats.corrupt_blocks += 1;
                        Event::CorruptBlock
                    }
                },
                Some(Assembled::EndOfTransfer) => Event::EndOfTransfer,
                None => {
                    stalls += 1;
                    stats.timeouts += 1;
                    warn!(
                        "{}: 블록 {} 대기 시간 초과 ({}/{})",
                        filename,
                        tracker.expected(),
                        stalls,
                        self.config.max_stream_timeouts
                    );
                    if stalls > self.config.max_stream_timeouts {
                        link.drain(stats).await;
                        link.signal(Signal::Cancel, stats).await;
                        drop(committer);
                        if let Err(e) = self.storage.remove(filename) {
                            warn!("{}: 불완전 파일 삭제 실패: {}", filename, e);
                        }
                        report.status =
                            FetchStatus::Aborted(AbortReason::StreamStalled { timeouts: stalls });
                        return Ok(());
                    }
                    Event::TimedOut
                }
            };

            let transition = phase.on(event, max_attempts);
            sent = link.perform(&transition.actions, stats).await;
            phase = transition.next;
        }

        let (written, exact) = committer.finish()?;
        report.bytes_written = written;
        report.status = if exact {
            FetchStatus::Success
        } else {
            FetchStatus::SizeMismatch {
                declared: zero.size,
                written,
            }
        };

        // EOT 핸드쉐이크: 첫 EOT에 NAK, 두 번째 EOT에 ACK, 그 뒤 장치 Idle
        let transition = phase.on(Event::EndOfTransfer, max_attempts);
        sent = link.perform(&transition.actions, stats).await;
        phase = transition.next;

        let event = if link.second_eot(sent).await? {
            Event::EndOfTransfer
        } else {
            Event::TimedOut
        };
        let transition = phase.on(event, max_attempts);
        if transition.soft_failure {
            warn!("{}: 두 번째 EOT 대기 시간 초과", filename);
            report.soft_failures += 1;
        }
        sent = link.perform(&transition.actions, stats).await;
        phase = transition.next;

        let idle = if sent {
            recv_response(
                &mut self.control,
                Duration::from_millis(self.config.eot_timeout_ms),
            )
            .await?
        } else {
            None
        };
        let event = match idle {
            Some(Response::Idle) => Event::DeviceIdle,
            Some(other) => {
                warn!("{}: 전송 후 Idle 대신 {:?}", filename, other);
                Event::TimedOut
            }
            None => Event::TimedOut,
        };

        let transition = phase.on(event, max_attempts);
        if transition.soft_failure {
            warn!("{}: 전송 후 장치 Idle 응답 없음", filename);
            report.soft_failures += 1;
        }
        self.device_idle = event == Event::DeviceIdle;

        Ok(())
    }

    /// 목록 파일을 받고 저장소에 없는 `.fit` 파일을 모두 가져온다
    ///
    /// 시작 시 상태 확인 실패만 배치 전체를 중단한다.
    pub async fn sync(&mut self) -> Result<SyncSummary> {
        let mut summary = SyncSummary::default();

        self.ensure_idle().await?;

        match self.read_diskspace().await {
            Ok(text) => {
                info!("디스크 사용량: {}KB", text);
                summary.diskspace = Some(text);
            }
            Err(e) => warn!("디스크 용량 조회 실패: {}", e),
        }

        let listing = self.config.listing_name.clone();
        if self.storage.exists(&listing) {
            let old = Path::new(&listing)
                .with_extension("old")
                .to_string_lossy()
                .into_owned();
            self.storage.rename(&listing, &old)?;
        }

        let report = self.fetch(&listing).await?;
        summary.reports.push(report);

        let data = match self.storage.read(&listing) {
            Ok(data) => data,
            Err(e) => {
                warn!("{} 읽기 실패: {}", listing, e);
                return Ok(summary);
            }
        };

        for name in extract_fit_filenames(&data) {
            if self.storage.exists(&name) {
                info!("건너뜀: {}", name);
                summary.skipped.push(name);
                continue;
            }

            info!("가져오는 중: {}", name);
            let report = self.fetch(&name).await?;
            summary.reports.push(report);
        }

        info!(
            "동기화 완료: 성공 {}, 실패 {}, 건너뜀 {}",
            summary.succeeded(),
            summary.failed(),
            summary.skipped.len()
        );
        Ok(summary)
    }
}
