//! 전송 상태 기계
//!
//! 입출력 없이 (현재 상태, 이벤트) → (다음 상태, 수행할 동작)만 결정한다.
//! 실제 대기와 전송은 `Fetcher`가 담당한다.
//!
//! ```text
//! Idle → StatusCheck → FetchRequested → AwaitFetchAck → BlockZero(n)
//!      → Streaming → Eot1Received → AwaitEot2 → AckSent → Idle
//!                  ↘ Cancelled (블록 0 재시도 초과)
//! ```

use crate::command::Signal;

/// 전송 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    StatusCheck,
    FetchRequested,
    AwaitFetchAck,
    /// 블록 0 수신 중 (시도 번호, 1부터)
    BlockZero { attempt: u8 },
    Streaming,
    /// 첫 번째 EOT 수신 (NAK 전송 후 AwaitEot2로)
    Eot1Received,
    AwaitEot2,
    /// 마지막 ACK 전송, 장치 Idle 대기
    AckSent,
    /// 블록 0 재시도 초과로 취소
    Cancelled,
    /// 파일 요청 거부/무응답 또는 스트림 정지
    Aborted,
}

/// 상태 기계 입력
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// 상태 조회 결과
    Status { idle: bool },
    /// 파일 요청 전송 완료
    RequestSent,
    /// 파일 요청 응답 (승인 여부)
    FetchAck { accepted: bool },
    /// 유효한 블록 (블록 0은 크기 파싱까지 성공)
    ValidBlock,
    /// 손상 블록
    CorruptBlock,
    /// 대기 시간 초과
    TimedOut,
    /// EOT 수신
    EndOfTransfer,
    /// 장치 Idle 응답
    DeviceIdle,
}

/// 상태 전이에 따른 동작
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// 데이터 채널 잔여 조각 비우기
    Drain,
    /// 블록 조립기 준비 (신호 전송 전에 수행)
    Arm,
    /// outbound 채널로 신호 전송
    Send(Signal),
}

/// 상태 전이 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: Phase,
    pub actions: Vec<Action>,
    /// 경고로 남길 소프트 실패 (EOT 단계 타임아웃)
    pub soft_failure: bool,
}

impl Transition {
    fn to(next: Phase, actions: Vec<Action>) -> Self {
        Self {
            next,
            actions,
            soft_failure: false,
        }
    }

    fn soft(next: Phase, actions: Vec<Action>) -> Self {
        Self {
            next,
            actions,
            soft_failure: true,
        }
    }

    fn stay(phase: Phase) -> Self {
        Self::to(phase, Vec::new())
    }
}

impl Phase {
    /// 종료 상태 여부
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Idle | Phase::Cancelled | Phase::Aborted)
    }

    /// 상태 전이
    ///
    /// `max_attempts`는 블록 0 최대 시도 횟수.
    pub fn on(self, event: Event, max_attempts: u8) -> Transition {
        use Action::*;
        use Signal::*;

        match (self, event) {
            (Phase::StatusCheck, Event::Status { idle: true }) => {
                Transition::stay(Phase::FetchRequested)
            }
            (Phase::StatusCheck, Event::Status { idle: false }) => {
                Transition::stay(Phase::Aborted)
            }
            (Phase::FetchRequested, Event::RequestSent) => Transition::stay(Phase::AwaitFetchAck),

            (Phase::AwaitFetchAck, Event::FetchAck { accepted: true }) => Transition::to(
                Phase::BlockZero { attempt: 1 },
                vec![Arm, Send(ReadyToReceive)],
            ),
            (Phase::AwaitFetchAck, Event::FetchAck { accepted: false })
            | (Phase::AwaitFetchAck, Event::TimedOut) => Transition::stay(Phase::Aborted),

            // 블록 0: 유효하면 ACK 후 'C'로 데이터 블록 요청
            (Phase::BlockZero { .. }, Event::ValidBlock) => {
                Transition::to(Phase::Streaming, vec![Send(Ack), Send(ReadyToReceive)])
            }
            (Phase::BlockZero { attempt }, Event::CorruptBlock)
            | (Phase::BlockZero { attempt }, Event::TimedOut)
            | (Phase::BlockZero { attempt }, Event::EndOfTransfer) => {
                if attempt >= max_attempts {
                    Transition::to(Phase::Cancelled, vec![Drain, Send(Cancel)])
                } else {
                    Transition::to(
                        Phase::BlockZero {
                            attempt: attempt + 1,
                        },
                        vec![Drain, Arm, Send(Nak), Send(ReadyToReceive)],
                    )
                }
            }

            // 스트리밍: 번호 연속성과 무관하게 유효하면 ACK
            (Phase::Streaming, Event::ValidBlock) => {
                Transition::to(Phase::Streaming, vec![Send(Ack)])
            }
            (Phase::Streaming, Event::CorruptBlock) | (Phase::Streaming, Event::TimedOut) => {
                Transition::to(Phase::Streaming, vec![Drain, Arm, Send(Nak)])
            }
            (Phase::Streaming, Event::EndOfTransfer) => Transition::stay(Phase::Eot1Received),

            // 첫 EOT에는 ACK가 아니라 NAK (장치가 EOT를 다시 보내게 함)
            (Phase::Eot1Received, _) => Transition::to(Phase::AwaitEot2, vec![Send(Nak)]),

            (Phase::AwaitEot2, Event::EndOfTransfer) => {
                Transition::to(Phase::AckSent, vec![Send(Ack)])
            }
            (Phase::AwaitEot2, Event::TimedOut) => {
                Transition::soft(Phase::AckSent, vec![Send(Ack)])
            }

            (Phase::AckSent, Event::DeviceIdle) => Transition::stay(Phase::Idle),
            (Phase::AckSent, Event::TimedOut) => Transition::soft(Phase::Idle, Vec::new()),

            // 그 외 이벤트는 상태 유지
            (phase, _) => Transition::stay(phase),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut phase = Phase::StatusCheck;
        let events = [
            Event::Status { idle: true },
            Event::RequestSent,
            Event::FetchAck { accepted: true },
            Event::ValidBlock,
            Event::ValidBlock,
            Event::ValidBlock,
            Event::EndOfTransfer,
            Event::EndOfTransfer,
            Event::EndOfTransfer,
            Event::DeviceIdle,
        ];

        let mut sent = Vec::new();
        for event in events {
            let t = phase.on(event, 3);
            assert!(!t.soft_failure);
            sent.extend(t.actions.iter().filter_map(|a| match a {
                Action::Send(s) => Some(*s),
                _ => None,
            }));
            phase = t.next;
        }

        assert_eq!(phase, Phase::Idle);
        assert_eq!(
            sent,
            vec![
                Signal::ReadyToReceive,
                Signal::Ack,
                Signal::ReadyToReceive,
                Signal::Ack,
                Signal::Ack,
                Signal::Nak,
                Signal::Ack,
            ]
        );
    }

    #[test]
    fn test_block_zero_exhaustion_cancels() {
        let mut phase = Phase::BlockZero { attempt: 1 };

        let t = phase.on(Event::CorruptBlock, 3);
        assert_eq!(t.next, Phase::BlockZero { attempt: 2 });
        assert!(t.actions.contains(&Action::Send(Signal::Nak)));
        phase = t.next;

        let t = phase.on(Event::TimedOut, 3);
        assert_eq!(t.next, Phase::BlockZero { attempt: 3 });
        phase = t.next;

        let t = phase.on(Event::CorruptBlock, 3);
        assert_eq!(t.next, Phase::Cancelled);
        assert_eq!(t.actions.last(), Some(&Action::Send(Signal::Cancel)));
        assert!(t.next.is_terminal());
    }

    #[test]
    fn test_streaming_corrupt_never_gives_up() {
        let mut phase = Phase::Streaming;
        for _ in 0..1000 {
            let t = phase.on(Event::CorruptBlock, 3);
            assert_eq!(t.actions, vec![Action::Drain, Action::Arm, Action::Send(Signal::Nak)]);
            phase = t.next;
        }
        assert_eq!(phase, Phase::Streaming);
    }

    #[test]
    fn test_eot_timeouts_are_soft() {
        let t = Phase::AwaitEot2.on(Event::TimedOut, 3);
        assert_eq!(t.next, Phase::AckSent);
        assert!(t.soft_failure);
        assert_eq!(t.actions, vec![Action::Send(Signal::Ack)]);

        let t = Phase::AckSent.on(Event::TimedOut, 3);
        assert_eq!(t.next, Phase::Idle);
        assert!(t.soft_failure);
    }

    #[test]
    fn test_request_leaves_fetch_requested() {
        let t = Phase::FetchRequested.on(Event::RequestSent, 3);
        assert_eq!(t.next, Phase::AwaitFetchAck);
        assert!(t.actions.is_empty());

        assert_eq!(Phase::Idle.on(Event::RequestSent, 3).next, Phase::Idle);
    }

    #[test]
    fn test_fetch_rejected_aborts() {
        assert_eq!(
            Phase::AwaitFetchAck.on(Event::FetchAck { accepted: false }, 3).next,
            Phase::Aborted
        );
        assert_eq!(Phase::AwaitFetchAck.on(Event::TimedOut, 3).next, Phase::Aborted);
        assert_eq!(
            Phase::StatusCheck.on(Event::Status { idle: false }, 3).next,
            Phase::Aborted
        );
    }
}
