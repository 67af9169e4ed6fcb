//! 전송 통계

use std::time::{Duration, Instant};

/// 파일 하나의 전송 통계
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 검증 통과 블록 수 (블록 0 포함)
    pub valid_blocks: u64,

    /// 손상 블록 수
    pub corrupt_blocks: u64,

    /// 블록 대기 타임아웃 수
    pub timeouts: u64,

    /// 전송한 NAK 수
    pub naks_sent: u64,

    /// 블록 0 시도 횟수
    pub block_zero_attempts: u8,

    /// 예상 밖 블록 번호 (expected, got)
    pub sequence_anomalies: Vec<(u8, u8)>,

    /// 잔여 조각 비우기에서 버린 조각 수
    pub drained_fragments: u64,

    /// 블록 길이를 넘어 버린 바이트
    pub dropped_bytes: u64,

    /// 전송 실패한 명령 수
    pub write_failures: u64,

    /// 페이로드 바이트 (패딩 포함)
    pub payload_bytes: u64,

    /// 시작 시간
    started_at: Instant,

    /// 종료까지 걸린 시간
    pub elapsed: Option<Duration>,
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            valid_blocks: 0,
            corrupt_blocks: 0,
            timeouts: 0,
            naks_sent: 0,
            block_zero_attempts: 0,
            sequence_anomalies: Vec::new(),
            drained_fragments: 0,
            dropped_bytes: 0,
            write_failures: 0,
            payload_bytes: 0,
            started_at: Instant::now(),
            elapsed: None,
        }
    }

    /// 종료 시간 기록
    pub fn finish(&mut self) {
        self.elapsed = Some(self.started_at.elapsed());
    }

    /// 경과 시간
    pub fn duration(&self) -> Duration {
        self.elapsed.unwrap_or_else(|| self.started_at.elapsed())
    }

    /// 처리율 (bytes/sec)
    pub fn throughput(&self) -> f64 {
        let secs = self.duration().as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.payload_bytes as f64 / secs
    }

    /// 블록 에러율 (0.0 ~ 1.0)
    pub fn error_rate(&self) -> f64 {
        let total = self.valid_blocks + self.corrupt_blocks + self.timeouts;
        if total == 0 {
            return 0.0;
        }
        (self.corrupt_blocks + self.timeouts) as f64 / total as f64
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "블록 {} (손상 {}, 타임아웃 {}), NAK {}, 순서 이상 {}, {:.1} KB/s, 에러율 {:.1}%",
            self.valid_blocks,
            self.corrupt_blocks,
            self.timeouts,
            self.naks_sent,
            self.sequence_anomalies.len(),
            self.throughput() / 1024.0,
            self.error_rate() * 100.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_rate() {
        let mut stats = TransferStats::new();
        assert_eq!(stats.error_rate(), 0.0);

        stats.valid_blocks = 6;
        stats.corrupt_blocks = 1;
        stats.timeouts = 1;
        assert!((stats.error_rate() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_finish_freezes_elapsed() {
        let mut stats = TransferStats::new();
        stats.payload_bytes = 1024;
        stats.finish();
        let first = stats.duration();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(stats.duration(), first);
        assert!(stats.summary().contains("NAK 0"));
    }
}
