//! 제어 채널 명령 프레임 및 블록 전송 제어 바이트
//!
//! 프레임 구조: `[opcode:1][utf8 문자열 | 0x00][crc8:1]`
//! 체크섬 자리를 0으로 두고 CRC8/XOR을 계산한 뒤 그 자리를 채운다.

use bytes::Bytes;

use crate::checksum::crc8_xor;

/// 상태 조회 (w)
pub const STATUS: [u8; 3] = [0xFF, 0x00, 0xFF];

/// 대기 상태 (r/w)
pub const IDLE: [u8; 3] = [0x04, 0x00, 0x04];

/// 디스크 용량 조회 (w)
pub const DISKSPACE: [u8; 3] = [0x09, 0x00, 0x09];

/// 명령 opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// 대기 상태 응답/강제
    Idle = 0x04,

    /// 파일 요청 (w)
    FetchRequest = 0x05,

    /// 파일 요청 승인 (r)
    FetchAck = 0x06,

    /// 디스크 용량 요청 (w)
    DiskspaceRequest = 0x09,

    /// 디스크 용량 응답 (r)
    DiskspaceAck = 0x0A,

    /// 잘못된 명령 (r)
    CommandError = 0x11,

    /// 파일 없음 (r)
    FileNotAvailable = 0x12,

    /// 메모리 에러 (r)
    MemoryError = 0x13,

    /// 대기 상태 아님 (r)
    NotIdle = 0x14,

    /// 취소
    Cancel = 0x18,

    /// 상태 조회 (w)
    Status = 0xFF,
}

impl Opcode {
    pub fn from_u8(b: u8) -> Option<Self> {
        Some(match b {
            0x04 => Opcode::Idle,
            0x05 => Opcode::FetchRequest,
            0x06 => Opcode::FetchAck,
            0x09 => Opcode::DiskspaceRequest,
            0x0A => Opcode::DiskspaceAck,
            0x11 => Opcode::CommandError,
            0x12 => Opcode::FileNotAvailable,
            0x13 => Opcode::MemoryError,
            0x14 => Opcode::NotIdle,
            0x18 => Opcode::Cancel,
            0xFF => Opcode::Status,
            _ => return None,
        })
    }
}

/// 블록 전송 제어 신호 (outbound 데이터 채널로 1바이트 전송)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Signal {
    /// 'C' - 수신 준비 (CRC 모드)
    ReadyToReceive = 0x43,

    /// ACK
    Ack = 0x06,

    /// NAK
    Nak = 0x15,

    /// CAN (전송 취소)
    Cancel = 0x18,
}

impl Signal {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn to_bytes(self) -> [u8; 1] {
        [self as u8]
    }
}

/// EOT (전송 종료) 바이트
pub const EOT: u8 = 0x04;

/// 명령 프레임
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    pub opcode: u8,
    pub payload: Vec<u8>,
}

impl CommandFrame {
    /// 문자열 인자를 가진 프레임
    pub fn with_name(opcode: Opcode, name: &str) -> Self {
        Self {
            opcode: opcode as u8,
            payload: name.as_bytes().to_vec(),
        }
    }

    /// 인자 없는 프레임 (페이로드는 0x00 한 바이트)
    pub fn bare(opcode: Opcode) -> Self {
        Self {
            opcode: opcode as u8,
            payload: vec![0x00],
        }
    }

    /// 파일 요청 프레임
    pub fn fetch_request(name: &str) -> Self {
        Self::with_name(Opcode::FetchRequest, name)
    }

    /// 장치가 돌려줄 파일 요청 승인 프레임
    pub fn fetch_ack(name: &str) -> Self {
        Self::with_name(Opcode::FetchAck, name)
    }

    /// 바이트로 직렬화 (체크섬 포함)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(2 + self.payload.len());
        buf.push(self.opcode);
        buf.extend_from_slice(&self.payload);
        buf.push(0x00);
        let crc = crc8_xor(&buf);
        if let Some(last) = buf.last_mut() {
            *last = crc;
        }
        buf
    }

    /// 바이트에서 역직렬화 (체크섬 불일치 시 None)
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 2 || crc8_xor(bytes) != 0 {
            return None;
        }

        Some(Self {
            opcode: bytes[0],
            payload: bytes[1..bytes.len() - 1].to_vec(),
        })
    }

    /// 페이로드를 문자열로 해석
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// 장치 응답 (제어 채널)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Idle,
    FetchAck(String),
    DiskSpace(String),
    FileNotAvailable(String),
    NotIdle,
    CommandError,
    MemoryError,
    /// 해석 불가 (체크섬 불일치 포함)
    Unknown(Bytes),
}

impl Response {
    /// 응답 해석
    pub fn parse(bytes: &Bytes) -> Self {
        if bytes.as_ref() == IDLE {
            return Response::Idle;
        }

        let frame = match CommandFrame::from_bytes(bytes) {
            Some(frame) => frame,
            None => return Response::Unknown(bytes.clone()),
        };

        let text = || {
            String::from_utf8_lossy(&frame.payload)
                .trim_end_matches('\0')
                .to_string()
        };

        match Opcode::from_u8(frame.opcode) {
            Some(Opcode::FetchAck) => Response::FetchAck(text()),
            Some(Opcode::DiskspaceAck) => Response::DiskSpace(text().trim().to_string()),
            Some(Opcode::FileNotAvailable) => Response::FileNotAvailable(text()),
            Some(Opcode::NotIdle) => Response::NotIdle,
            Some(Opcode::CommandError) => Response::CommandError,
            Some(Opcode::MemoryError) => Response::MemoryError,
            _ => Response::Unknown(bytes.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_request_frame() {
        let frame = CommandFrame::fetch_request("filelist.txt").to_bytes();

        assert_eq!(frame[0], 0x05);
        assert_eq!(&frame[1..frame.len() - 1], b"filelist.txt");
        assert_eq!(crc8_xor(&frame), 0);
    }

    #[test]
    fn test_bare_frames_match_constants() {
        assert_eq!(CommandFrame::bare(Opcode::Idle).to_bytes(), IDLE);
        assert_eq!(CommandFrame::bare(Opcode::Status).to_bytes(), STATUS);
        assert_eq!(CommandFrame::bare(Opcode::DiskspaceRequest).to_bytes(), DISKSPACE);
    }

    #[test]
    fn test_frame_rejects_bad_checksum() {
        let mut frame = CommandFrame::fetch_ack("20240101120000.fit").to_bytes();
        assert!(CommandFrame::from_bytes(&frame).is_some());

        frame[3] ^= 0x01;
        assert!(CommandFrame::from_bytes(&frame).is_none());
    }

    #[test]
    fn test_response_parse() {
        let ack = Bytes::from(CommandFrame::fetch_ack("a.fit").to_bytes());
        assert_eq!(Response::parse(&ack), Response::FetchAck("a.fit".into()));

        assert_eq!(Response::parse(&Bytes::from_static(&IDLE)), Response::Idle);

        let mut disk = vec![0x0A];
        disk.extend_from_slice(b"556/8104");
        disk.push(0);
        let crc = crc8_xor(&disk);
        *disk.last_mut().unwrap() = crc;
        assert_eq!(
            Response::parse(&Bytes::from(disk)),
            Response::DiskSpace("556/8104".into())
        );

        let missing = Bytes::from(CommandFrame::with_name(Opcode::FileNotAvailable, "b.fit").to_bytes());
        assert_eq!(Response::parse(&missing), Response::FileNotAvailable("b.fit".into()));

        let busy = Bytes::from(CommandFrame::bare(Opcode::NotIdle).to_bytes());
        assert_eq!(Response::parse(&busy), Response::NotIdle);

        let junk = Bytes::from_static(&[0x06, 0x41]);
        assert!(matches!(Response::parse(&junk), Response::Unknown(_)));
    }
}
