//! 검증된 페이로드를 저장소에 기록
//!
//! - 마지막 블록 전까지는 버퍼에 모았다가 일정 크기마다 flush
//! - 마지막 블록은 끝의 0 패딩을 잘라낸 뒤 기록
//! - 완료 후 블록 0에 선언된 크기와 비교

use std::io;

use bytes::BytesMut;
use tracing::debug;

use crate::block::SHORT_PAYLOAD;
use crate::storage::Storage;

/// 페이로드 기록기
pub struct OutputCommitter<'a, S: Storage> {
    storage: &'a mut S,
    name: String,
    declared_size: u64,
    /// 버퍼 포함 수용한 바이트
    accepted: u64,
    /// 저장소에 실제로 쓴 바이트
    written: u64,
    pending: BytesMut,
    flush_threshold: usize,
    flushes: u64,
}

impl<'a, S: Storage> OutputCommitter<'a, S> {
    /// 새 기록기 생성 (대상 파일을 비운다)
    ///
    /// `flush_blocks`가 0이면 블록마다 바로 기록한다 (긴 블록 모드).
    pub fn create(
        storage: &'a mut S,
        name: &str,
        declared_size: u64,
        flush_blocks: usize,
    ) -> io::Result<Self> {
        storage.create(name)?;

        let flush_threshold = flush_blocks * SHORT_PAYLOAD;
        Ok(Self {
            storage,
            name: name.to_string(),
            declared_size,
            accepted: 0,
            written: 0,
            pending: BytesMut::with_capacity(flush_threshold),
            flush_threshold,
            flushes: 0,
        })
    }

    /// 저장소에 쓴 바이트 수
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn flushes(&self) -> u64 {
        self.flushes
    }

    /// 블록 페이로드 기록, 이번에 수용한 바이트 수 반환
    pub fn commit(&mut self, payload: &[u8]) -> io::Result<usize> {
        if self.accepted + payload.len() as u64 > self.declared_size {
            // 마지막 블록
            self.flush()?;
            let end = payload.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
            let tail = &payload[..end];
            if !tail.is_empty() {
                self.written += self.storage.append(&self.name, tail)? as u64;
            }
            self.accepted += tail.len() as u64;
            debug!(
                "{}: 마지막 블록 {} bytes (패딩 {} bytes 제거)",
                self.name,
                tail.len(),
                payload.len() - tail.len()
            );
            return Ok(tail.len());
        }

        self.pending.extend_from_slice(payload);
        self.accepted += payload.len() as u64;
        if self.pending.len() >= self.flush_threshold {
            self.flush()?;
        }
        Ok(payload.len())
    }

    /// 버퍼 내용을 저장소로
    pub fn flush(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let chunk = self.pending.split().freeze();
        self.written += self.storage.append(&self.name, &chunk)? as u64;
        self.flushes += 1;
        Ok(())
    }

    /// 남은 버퍼를 기록하고 (쓴 바이트, 선언 크기 일치 여부) 반환
    pub fn finish(mut self) -> io::Result<(u64, bool)> {
        self.flush()?;
        Ok((self.written, self.written == self.declared_size))
    }
}
