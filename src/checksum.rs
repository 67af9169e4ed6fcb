//! 체크섬 함수
//!
//! - CRC8/XOR: 명령 프레임 (마지막 바이트가 체크섬)
//! - CRC16/ARC: 블록 페이로드 (XMODEM 계열과 달리 ARC 변형 사용)

/// CRC16/ARC 다항식 (반사형 0x8005)
const CRC16_ARC_POLY: u16 = 0xA001;

/// 바이트 단위 CRC16/ARC 테이블 (컴파일 타임 생성)
static CRC16_ARC_TABLE: [u16; 256] = build_crc16_table();

const fn build_crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u16;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x0001 != 0 {
                (crc >> 1) ^ CRC16_ARC_POLY
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// CRC8/XOR 계산
///
/// 올바른 명령 프레임 전체(체크섬 포함)에 적용하면 0이 된다.
pub fn crc8_xor(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |crc, &b| crc ^ b)
}

/// CRC16/ARC 계산 (테이블 방식)
pub fn crc16_arc(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |crc, &b| {
        (crc >> 8) ^ CRC16_ARC_TABLE[((crc ^ b as u16) & 0xFF) as usize]
    })
}

/// CRC16/ARC 계산 (비트 단위)
///
/// 테이블 방식과 결과가 같아야 한다. 검증 및 벤치마크용.
pub fn crc16_arc_bitwise(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &b in data {
        crc ^= b as u16;
        for _ in 0..8 {
            crc = if crc & 0x0001 != 0 {
                (crc >> 1) ^ CRC16_ARC_POLY
            } else {
                crc >> 1
            };
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, RngCore};

    #[test]
    fn test_crc16_arc_check_value() {
        assert_eq!(crc16_arc(b"123456789"), 0xBB3D);
        assert_eq!(crc16_arc_bitwise(b"123456789"), 0xBB3D);
    }

    #[test]
    fn test_crc16_empty_input() {
        assert_eq!(crc16_arc(&[]), 0);
        assert_eq!(crc16_arc_bitwise(&[]), 0);
    }

    #[test]
    fn test_crc16_table_matches_bitwise() {
        let mut rng = rand::thread_rng();
        for len in [1usize, 2, 3, 127, 128, 129, 1024, 4000] {
            let mut data = vec![0u8; len];
            rng.fill_bytes(&mut data);
            assert_eq!(crc16_arc(&data), crc16_arc_bitwise(&data), "len={}", len);
        }

        // 모든 단일 바이트
        for b in 0..=255u8 {
            assert_eq!(crc16_arc(&[b]), crc16_arc_bitwise(&[b]));
        }
    }

    #[test]
    fn test_crc8_xor_framed_is_zero() {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let len = rng.gen_range(0..64);
            let mut frame: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            frame.push(0);
            let crc = crc8_xor(&frame);
            *frame.last_mut().unwrap() = crc;
            assert_eq!(crc8_xor(&frame), 0);
        }
    }

    #[test]
    fn test_crc8_xor_known() {
        assert_eq!(crc8_xor(&[0xFF, 0x00]), 0xFF);
        assert_eq!(crc8_xor(&[0x09, 0x00, 0x09]), 0);
        assert_eq!(crc8_xor(&[]), 0);
    }
}
