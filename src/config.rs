//! 전송 설정

use crate::DEFAULT_LISTING_NAME;

/// yfetch 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 파일 요청 승인 대기 타임아웃 (밀리초)
    pub ack_timeout_ms: u64,

    /// 상태 조회 응답 대기 타임아웃 (밀리초)
    pub status_timeout_ms: u64,

    /// 블록 하나 조립 대기 타임아웃 (밀리초)
    pub block_timeout_ms: u64,

    /// EOT 핸드쉐이크 각 단계 타임아웃 (밀리초)
    pub eot_timeout_ms: u64,

    /// 잔여 조각 비우기: 이 시간 동안 조각이 없으면 종료 (밀리초)
    pub drain_quiet_ms: u64,

    /// 블록 0 최대 시도 횟수
    pub block_zero_attempts: u8,

    /// 파일 요청 최대 시도 횟수
    pub fetch_attempts: u8,

    /// 스트리밍 중 연속 타임아웃 허용 횟수
    /// 손상 블록은 여기에 포함되지 않음 (장치 재전송에 맡김)
    pub max_stream_timeouts: u32,

    /// flush 단위 (짧은 블록 수), 0이면 블록마다 기록
    pub flush_blocks: usize,

    /// 블록 외 데이터 채널 메시지 큐 크기
    pub stray_queue_capacity: usize,

    /// 장치 파일 목록 이름
    pub listing_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ack_timeout_ms: 10_000,
            status_timeout_ms: 5_000,
            block_timeout_ms: 10_000,
            eot_timeout_ms: 10_000,
            drain_quiet_ms: 200,
            block_zero_attempts: 3,
            fetch_attempts: 1,
            max_stream_timeouts: 8,
            flush_blocks: 8,               // 1KB
            stray_queue_capacity: 16,
            listing_name: DEFAULT_LISTING_NAME.to_string(),
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 긴 블록(1024) 장치용 설정
    ///
    /// 블록 하나가 이미 flush 단위보다 크므로 버퍼링하지 않는다.
    pub fn long_block() -> Self {
        Self {
            flush_blocks: 0,
            block_timeout_ms: 20_000,
            ..Self::default()
        }
    }

    /// 느리거나 불안정한 링크용 설정
    pub fn slow_link() -> Self {
        Self {
            ack_timeout_ms: 20_000,
            status_timeout_ms: 10_000,
            block_timeout_ms: 20_000,
            eot_timeout_ms: 20_000,
            drain_quiet_ms: 500,
            fetch_attempts: 2,
            max_stream_timeouts: 16,
            ..Self::default()
        }
    }

    /// 테스트/시뮬레이터용 짧은 타임아웃
    pub fn fast() -> Self {
        Self {
            ack_timeout_ms: 500,
            status_timeout_ms: 300,
            block_timeout_ms: 500,
            eot_timeout_ms: 500,
            drain_quiet_ms: 20,
            max_stream_timeouts: 3,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.ack_timeout_ms, 10_000);
        assert_eq!(config.block_zero_attempts, 3);
        assert_eq!(config.listing_name, "filelist.txt");
    }

    #[test]
    fn test_presets_keep_retry_bounds() {
        assert_eq!(Config::long_block().flush_blocks, 0);
        assert_eq!(Config::slow_link().block_zero_attempts, 3);
        assert!(Config::fast().block_timeout_ms < Config::default().block_timeout_ms);
    }
}
