//! 에러 타입 정의
//!
//! 파일 단위의 실패(재시도 초과, 크기 불일치 등)는 `FetchReport`로 보고되고
//! 여기의 에러는 배치 전체를 멈추는 상황에만 쓰인다.

use thiserror::Error;

/// yfetch 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("체크섬 불일치: expected {expected:04X}, got {got:04X}")]
    ChecksumMismatch { expected: u16, got: u16 },

    #[error("대기 시간 초과: {what}")]
    Timeout { what: &'static str },

    #[error("장치가 대기 상태가 아님: {0}")]
    StatusCheck(String),

    #[error("예상하지 못한 응답: {0}")]
    UnexpectedResponse(String),

    #[error("전송 실패: {0}")]
    TransportWrite(String),

    #[error("구독 채널 종료")]
    ConnectionClosed,

    #[error("리스너 태스크 에러")]
    ListenerFailed,
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
