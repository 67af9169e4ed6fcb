//! 장치 파일 목록 해석
//!
//! 두 가지 형식을 받는다.
//! - 텍스트: 줄마다 `<숫자>.fit` 토큰
//! - JSON: `{"workouts": [[id, ...], ...]}`, 첫 원소에 `.fit`을 붙인다

use std::collections::BTreeSet;

use serde::Deserialize;
use serde_json::Value;

const FIT_EXT: &str = ".fit";

#[derive(Debug, Deserialize)]
struct WorkoutListing {
    workouts: Vec<Vec<Value>>,
}

/// 목록에서 `.fit` 파일명 추출 (중복 제거, 정렬)
pub fn extract_fit_filenames(data: &[u8]) -> BTreeSet<String> {
    if let Ok(listing) = serde_json::from_slice::<WorkoutListing>(data) {
        return listing
            .workouts
            .iter()
            .filter_map(|entry| match entry.first()? {
                Value::Number(n) if n.is_u64() => Some(format!("{}{}", n, FIT_EXT)),
                Value::String(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => {
                    Some(format!("{}{}", s, FIT_EXT))
                }
                _ => None,
            })
            .collect();
    }

    String::from_utf8_lossy(data)
        .lines()
        .filter_map(find_fit_token)
        .collect()
}

/// 한 줄에서 첫 번째 `<숫자>.fit` 토큰
fn find_fit_token(line: &str) -> Option<String> {
    let bytes = line.as_bytes();
    let mut from = 0;

    while let Some(pos) = line[from..].find(FIT_EXT) {
        let ext_at = from + pos;
        let start = bytes[..ext_at]
            .iter()
            .rposition(|b| !b.is_ascii_digit())
            .map_or(0, |i| i + 1);

        if start < ext_at {
            return Some(line[start..ext_at + FIT_EXT.len()].to_string());
        }
        from = ext_at + FIT_EXT.len();
    }
    None
}
