//! 블록 번호 추적
//!
//! 번호는 mod 256으로 순환한다. 예상 밖의 번호라도 유효한 블록이면
//! 받아들이고 경고만 남긴다 (장치 재전송 특성상 데이터 보존 우선).

/// 연속성 판정
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuity {
    Continuation,
    Unexpected { expected: u8, got: u8 },
}

/// 마지막으로 받아들인 블록 번호
#[derive(Debug, Clone, Copy)]
pub struct SequenceTracker {
    /// 블록을 받기 전에는 -1
    last: i16,
}

impl Default for SequenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self { last: -1 }
    }

    pub fn last(&self) -> i16 {
        self.last
    }

    pub fn expected(&self) -> u8 {
        ((self.last + 1) % 256) as u8
    }

    /// 블록 번호 수용 (항상 마지막 번호를 갱신)
    pub fn accept(&mut self, sequence: u8) -> Continuity {
        let expected = self.expected();
        self.last = sequence as i16;

        if sequence == expected {
            Continuity::Continuation
        } else {
            Continuity::Unexpected {
                expected,
                got: sequence,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wraps_modulo_256() {
        let mut tracker = SequenceTracker::new();
        assert_eq!(tracker.accept(0), Continuity::Continuation);

        for seq in 1..=255u8 {
            assert_eq!(tracker.accept(seq), Continuity::Continuation);
        }
        assert_eq!(tracker.accept(0), Continuity::Continuation);
        assert_eq!(tracker.accept(1), Continuity::Continuation);
    }

    #[test]
    fn test_gap_is_unexpected_but_accepted() {
        let mut tracker = SequenceTracker::new();
        for seq in 0..=3u8 {
            tracker.accept(seq);
        }

        assert_eq!(
            tracker.accept(5),
            Continuity::Unexpected { expected: 4, got: 5 }
        );
        assert_eq!(tracker.last(), 5);
        assert_eq!(tracker.accept(6), Continuity::Continuation);
    }

    #[test]
    fn test_repeat_is_unexpected() {
        let mut tracker = SequenceTracker::new();
        tracker.accept(0);
        tracker.accept(1);
        assert_eq!(
            tracker.accept(1),
            Continuity::Unexpected { expected: 2, got: 1 }
        );
    }
}
