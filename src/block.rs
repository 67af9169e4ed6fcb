//! 프로토콜 블록 정의 및 조립
//!
//! - Block: YMODEM 블록 (헤더 3 + 페이로드 128|1024 + CRC16 2)
//! - Fragment: 노티피케이션 한 번에 도착하는 조각 (MTU 크기)
//!
//! 조각들을 고정 크기 버퍼에 이어 붙여 하나의 블록을 만든다.

use bytes::Bytes;

use crate::checksum::crc16_arc;
use crate::command::EOT;

/// 블록 헤더 크기 (tag, seq, ~seq)
pub const HEADER_LEN: usize = 3;

/// CRC16 트레일러 크기
pub const CRC_LEN: usize = 2;

/// 짧은 블록 페이로드 크기
pub const SHORT_PAYLOAD: usize = 128;

/// 긴 블록 페이로드 크기
pub const LONG_PAYLOAD: usize = 1024;

/// 최대 블록 프레임 크기
pub const MAX_FRAME_LEN: usize = HEADER_LEN + LONG_PAYLOAD + CRC_LEN;

/// 블록 크기 구분 (첫 조각의 태그 바이트로 결정)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// SOH (0x01), 128 바이트
    Short,

    /// STX (0x02), 1024 바이트
    Long,
}

impl BlockKind {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(BlockKind::Short),
            0x02 => Some(BlockKind::Long),
            _ => None,
        }
    }

    pub fn tag(self) -> u8 {
        match self {
            BlockKind::Short => 0x01,
            BlockKind::Long => 0x02,
        }
    }

    pub fn payload_len(self) -> usize {
        match self {
            BlockKind::Short => SHORT_PAYLOAD,
            BlockKind::Long => LONG_PAYLOAD,
        }
    }

    /// 헤더와 CRC를 포함한 전체 길이
    pub fn frame_len(self) -> usize {
        HEADER_LEN + self.payload_len() + CRC_LEN
    }
}

/// 블록 검증 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    Corrupt,
}

/// 완성된 블록
#[derive(Debug, Clone)]
pub struct Block {
    pub kind: BlockKind,
    pub sequence: u8,
    pub complement: u8,
    pub payload: Bytes,
    pub crc: u16,
    /// 태그 바이트가 SOH/STX가 아니었음
    pub unknown_tag: bool,
}

impl Block {
    /// 조립된 프레임에서 블록 추출
    pub fn from_frame(frame: &[u8]) -> Option<Self> {
        let tag = *frame.first()?;
        let (kind, unknown_tag) = match BlockKind::from_tag(tag) {
            Some(kind) => (kind, false),
            None => (BlockKind::Short, true),
        };

        if frame.len() != kind.frame_len() {
            return None;
        }

        let crc_at = HEADER_LEN + kind.payload_len();
        Some(Self {
            kind,
            sequence: frame[1],
            complement: frame[2],
            payload: Bytes::copy_from_slice(&frame[HEADER_LEN..crc_at]),
            crc: u16::from_be_bytes([frame[crc_at], frame[crc_at + 1]]),
            unknown_tag,
        })
    }

    /// 블록 검증
    ///
    /// CRC16/ARC와 시퀀스 보수 바이트를 확인한다.
    pub fn validate(&self) -> Verdict {
        if self.unknown_tag
            || self.complement != 0xFF ^ self.sequence
            || self.crc != crc16_arc(&self.payload)
        {
            Verdict::Corrupt
        } else {
            Verdict::Valid
        }
    }

    /// 블록 프레임 생성 (페이로드는 0으로 패딩)
    pub fn encode(kind: BlockKind, sequence: u8, data: &[u8]) -> Vec<u8> {
        let mut payload = vec![0u8; kind.payload_len()];
        let n = data.len().min(payload.len());
        payload[..n].copy_from_slice(&data[..n]);

        let mut frame = Vec::with_capacity(kind.frame_len());
        frame.push(kind.tag());
        frame.push(sequence);
        frame.push(0xFF ^ sequence);
        frame.extend_from_slice(&payload);
        frame.extend_from_slice(&crc16_arc(&payload).to_be_bytes());
        frame
    }
}

/// 블록 0 내용 (`"<filename> <size>"`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockZero {
    pub filename: String,
    pub size: u64,
}

impl BlockZero {
    /// 페이로드 파싱 (끝의 0 패딩 제거 후 공백/NUL 구분)
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let end = payload.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        let text = std::str::from_utf8(&payload[..end]).ok()?;

        let mut fields = text
            .split(|c: char| c.is_whitespace() || c == '\0')
            .filter(|s| !s.is_empty());
        let filename = fields.next()?.to_string();
        let size = fields.next()?.parse().ok()?;

        Some(Self { filename, size })
    }

    pub fn to_payload(&self) -> Vec<u8> {
        format!("{} {}", self.filename, self.size).into_bytes()
    }
}

/// 조각 투입 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    /// 블록 단계가 아님 (일반 메시지로 처리)
    NotArmed,

    /// 블록 미완성
    Pending,

    /// 블록 완성
    Complete,

    /// EOT 수신, 블록 단계 종료
    EndOfTransfer,

    /// 블록 길이를 넘는 바이트 (버림)
    Overflow(usize),
}

/// 조립 결과
#[derive(Debug, Clone)]
pub enum Assembled {
    Block(Block),
    EndOfTransfer,
}

/// 블록 조립기
///
/// 버퍼는 한 번 할당되고 블록마다 인덱스만 초기화된다.
#[derive(Debug)]
pub struct BlockAssembler {
    buf: Box<[u8]>,
    offset: usize,
    kind: Option<BlockKind>,
    armed: bool,
    end_of_transfer: bool,
    /// 누적 버린 바이트 수
    dropped: usize,
}

impl Default for BlockAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockAssembler {
    pub fn new() -> Self {
        Self {
            buf: vec![0u8; MAX_FRAME_LEN].into_boxed_slice(),
            offset: 0,
            kind: None,
            armed: false,
            end_of_transfer: false,
            dropped: 0,
        }
    }

    /// 블록 단계 시작 (버퍼 초기화)
    pub fn arm(&mut self) {
        self.reset();
        self.end_of_transfer = false;
        self.armed = true;
    }

    /// 블록 단계 종료 (이후 조각은 일반 메시지)
    pub fn disarm(&mut self) {
        self.reset();
        self.armed = false;
    }

    /// 다음 블록을 위해 인덱스 초기화
    pub fn reset(&mut self) {
        self.offset = 0;
        self.kind = None;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// 현재 블록에 필요한 전체 길이
    pub fn required_len(&self) -> Option<usize> {
        self.kind.map(BlockKind::frame_len)
    }

    pub fn is_complete(&self) -> bool {
        self.required_len().is_some_and(|len| self.offset >= len)
    }

    /// 조각 투입
    pub fn feed(&mut self, fragment: &[u8]) -> Feed {
        if !self.armed {
            return Feed::NotArmed;
        }

        if fragment == [EOT] {
            self.reset();
            self.armed = false;
            self.end_of_transfer = true;
            return Feed::EndOfTransfer;
        }

        if fragment.is_empty() {
            return Feed::Pending;
        }

        if self.offset == 0 {
            // 알 수 없는 태그는 짧은 블록으로 받고 검증에서 걸러낸다
            self.kind = Some(BlockKind::from_tag(fragment[0]).unwrap_or(BlockKind::Short));
        }

        let total = self.required_len().unwrap_or(BlockKind::Short.frame_len());
        let room = total.saturating_sub(self.offset);
        let take = fragment.len().min(room);
        self.buf[self.offset..self.offset + take].copy_from_slice(&fragment[..take]);
        self.offset += take;

        let extra = fragment.len() - take;
        if extra > 0 {
            self.dropped += extra;
            return Feed::Overflow(extra);
        }

        if self.offset >= total {
            Feed::Complete
        } else {
            Feed::Pending
        }
    }

    /// 완성된 블록 또는 EOT를 꺼낸다
    ///
    /// 블록을 꺼내면 인덱스가 초기화되고 블록 단계는 유지된다.
    pub fn take(&mut self) -> Option<Assembled> {
        if self.end_of_transfer {
            self.end_of_transfer = false;
            return Some(Assembled::EndOfTransfer);
        }

        if !self.is_complete() {
            return None;
        }

        let len = self.offset;
        let block = Block::from_frame(&self.buf[..len]);
        self.reset();
        block.map(Assembled::Block)
    }

    /// 조립 중인 프레임 (디버그용)
    pub fn frame(&self) -> &[u8] {
        &self.buf[..self.offset]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short_block(seq: u8) -> Vec<u8> {
        let data: Vec<u8> = (0..128).map(|i| (i as u8).wrapping_mul(7).wrapping_add(seq)).collect();
        Block::encode(BlockKind::Short, seq, &data)
    }

    #[test]
    fn test_block_validate() {
        let frame = short_block(1);
        let block = Block::from_frame(&frame).unwrap();
        assert_eq!(block.validate(), Verdict::Valid);
        assert_eq!(block.sequence, 1);
        assert_eq!(block.kind, BlockKind::Short);
    }

    #[test]
    fn test_single_bit_flip_is_corrupt() {
        let frame = short_block(9);
        for byte in HEADER_LEN..HEADER_LEN + SHORT_PAYLOAD {
            for bit in 0..8 {
                let mut bad = frame.clone();
                bad[byte] ^= 1 << bit;
                let block = Block::from_frame(&bad).unwrap();
                assert_eq!(block.validate(), Verdict::Corrupt, "byte={} bit={}", byte, bit);
            }
        }
    }

    #[test]
    fn test_bad_complement_is_corrupt() {
        let mut frame = short_block(3);
        frame[2] = 0x00;
        assert_eq!(Block::from_frame(&frame).unwrap().validate(), Verdict::Corrupt);
    }

    #[test]
    fn test_fragmented_equals_whole() {
        let frame = short_block(1);
        assert_eq!(frame.len(), 133);

        let mut whole = BlockAssembler::new();
        whole.arm();
        assert_eq!(whole.feed(&frame), Feed::Complete);

        let mut split = BlockAssembler::new();
        split.arm();
        let mut at = 0;
        for size in [20, 20, 20, 20, 20, 20, 13] {
            let feed = split.feed(&frame[at..at + size]);
            at += size;
            if at < frame.len() {
                assert_eq!(feed, Feed::Pending);
            } else {
                assert_eq!(feed, Feed::Complete);
            }
        }

        assert_eq!(whole.frame(), split.frame());
        assert_eq!(split.frame(), frame.as_slice());
    }

    #[test]
    fn test_long_block_from_tag() {
        let data = vec![0xAB; 1024];
        let frame = Block::encode(BlockKind::Long, 2, &data);
        assert_eq!(frame.len(), 1029);

        let mut asm = BlockAssembler::new();
        asm.arm();
        for piece in frame.chunks(244) {
            asm.feed(piece);
        }
        assert!(asm.is_complete());

        match asm.take() {
            Some(Assembled::Block(block)) => {
                assert_eq!(block.kind, BlockKind::Long);
                assert_eq!(block.validate(), Verdict::Valid);
                assert_eq!(block.payload.as_ref(), data.as_slice());
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(asm.offset(), 0);
        assert!(asm.is_armed());
    }

    #[test]
    fn test_eot_terminates_block_phase() {
        let frame = short_block(4);
        let mut asm = BlockAssembler::new();
        asm.arm();
        asm.feed(&frame[..40]);

        assert_eq!(asm.feed(&[EOT]), Feed::EndOfTransfer);
        assert!(!asm.is_armed());
        assert!(matches!(asm.take(), Some(Assembled::EndOfTransfer)));
        assert!(asm.take().is_none());

        // 블록 단계가 아니면 일반 메시지
        assert_eq!(asm.feed(&[EOT]), Feed::NotArmed);
    }

    #[test]
    fn test_burst_overflow_is_bounded() {
        let mut burst = short_block(1);
        burst.extend_from_slice(&short_block(2)[..30]);

        let mut asm = BlockAssembler::new();
        asm.arm();
        assert_eq!(asm.feed(&burst), Feed::Overflow(30));
        assert_eq!(asm.dropped(), 30);
        assert!(asm.is_complete());
        assert_eq!(asm.feed(&[1, 2, 3]), Feed::Overflow(3));

        match asm.take() {
            Some(Assembled::Block(block)) => assert_eq!(block.validate(), Verdict::Valid),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_tag_is_corrupt() {
        let mut frame = short_block(1);
        frame[0] = 0x7F;

        let mut asm = BlockAssembler::new();
        asm.arm();
        assert_eq!(asm.feed(&frame), Feed::Complete);
        match asm.take() {
            Some(Assembled::Block(block)) => assert_eq!(block.validate(), Verdict::Corrupt),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_block_zero_parse() {
        let zero = BlockZero::parse(b"file.fit 300\0\0\0\0").unwrap();
        assert_eq!(zero.filename, "file.fit");
        assert_eq!(zero.size, 300);

        let nul = BlockZero::parse(b"20240101.fit\x0012345 1234567 0\0\0").unwrap();
        assert_eq!(nul.size, 12345);

        assert!(BlockZero::parse(b"file.fit\0\0").is_none());
        assert!(BlockZero::parse(b"file.fit abc").is_none());
        assert!(BlockZero::parse(&[0u8; 128]).is_none());
        assert!(BlockZero::parse(&[0xFF, 0xFE, b' ', b'1']).is_none());
    }
}
