//! 외부 전송 계층 경계
//!
//! 장치 연결, 노티피케이션 구독, MTU 협상은 외부에서 처리한다.
//! 여기서는 채널별 쓰기 연산과 채널별 조각 수신기만 필요하다.

use std::future::Future;
use std::io;

use bytes::Bytes;
use tokio::sync::mpsc;

/// 논리 채널
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// 명령/응답
    Control,

    /// 장치 → 호스트 블록 데이터
    Inbound,

    /// 호스트 → 장치 블록 제어 신호
    Outbound,
}

/// 전송 계층
pub trait Transport: Send + Sync + 'static {
    /// 채널로 바이트 전송
    fn send(&self, channel: Channel, data: &[u8]) -> impl Future<Output = io::Result<()>> + Send;
}

/// 구독된 채널별 조각 수신기
pub struct Subscriptions {
    /// 제어 채널 응답
    pub control: mpsc::Receiver<Bytes>,

    /// 데이터 채널 조각
    pub inbound: mpsc::Receiver<Bytes>,
}
