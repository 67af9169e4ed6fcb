//! 데이터 채널 리스너
//!
//! - 조각을 블록 조립기에 넣는 유일한 생산자
//! - 블록 단계가 아닐 때 온 메시지는 드라이버에게 전달
//! - 블록 완성/EOT 시 드라이버를 깨움

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::block::{Assembled, BlockAssembler, Feed};
use crate::{Error, Result};

/// 리스너와 드라이버가 공유하는 조립 슬롯
#[derive(Debug, Default)]
pub struct BlockSlot {
    assembler: Mutex<BlockAssembler>,
    ready: Notify,
    closed: AtomicBool,
}

impl BlockSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// 조각 투입 (조각 단위로 원자적)
    pub fn feed(&self, fragment: &[u8]) -> Feed {
        let (feed, complete) = {
            let mut asm = self.assembler.lock();
            let feed = asm.feed(fragment);
            (feed, asm.is_complete())
        };

        if complete || feed == Feed::EndOfTransfer {
            self.ready.notify_one();
        }
        feed
    }

    pub fn arm(&self) {
        self.assembler.lock().arm();
    }

    pub fn disarm(&self) {
        self.assembler.lock().disarm();
    }

    pub fn take(&self) -> Option<Assembled> {
        self.assembler.lock().take()
    }

    pub fn dropped(&self) -> usize {
        self.assembler.lock().dropped()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.ready.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// 블록 완성 또는 EOT 대기
    ///
    /// 타임아웃이면 `Ok(None)`, 구독이 끊기면 에러.
    pub async fn wait(&self, timeout: Duration) -> Result<Option<Assembled>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(assembled) = self.take() {
                return Ok(Some(assembled));
            }
            if self.is_closed() {
                return Err(Error::ConnectionClosed);
            }
            if tokio::time::timeout_at(deadline, self.ready.notified())
                .await
                .is_err()
            {
                return Ok(self.take());
            }
        }
    }
}

/// 실행 중인 리스너 핸들
pub struct Listener {
    stop_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<mpsc::Receiver<Bytes>>,
}

impl Listener {
    /// 리스너 시작
    ///
    /// 블록 외 메시지는 `stray_tx`로 전달되며 큐가 차면 버린다.
    pub fn spawn(
        mut inbound: mpsc::Receiver<Bytes>,
        slot: Arc<BlockSlot>,
        stray_tx: mpsc::Sender<Bytes>,
    ) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    fragment = inbound.recv() => {
                        let Some(fragment) = fragment else {
                            debug!("데이터 채널 종료");
                            slot.close();
                            break;
                        };

                        match slot.feed(&fragment) {
                            Feed::NotArmed => {
                                if stray_tx.try_send(fragment).is_err() {
                                    warn!("메시지 큐 가득 참, 조각 버림");
                                }
                            }
                            Feed::Overflow(n) => {
                                warn!("블록 길이 초과 {} bytes 버림", n);
                            }
                            Feed::EndOfTransfer => debug!("EOT 수신"),
                            Feed::Pending | Feed::Complete => {}
                        }
                    }
                }
            }
            inbound
        });

        Self {
            stop_tx: Some(stop_tx),
            handle,
        }
    }

    /// 리스너 정지, 수신기를 돌려받는다
    pub async fn stop(mut self) -> Result<mpsc::Receiver<Bytes>> {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        self.handle.await.map_err(|_| Error::ListenerFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{Block, BlockKind, Verdict};

    #[tokio::test]
    async fn test_listener_assembles_and_forwards() {
        let (tx, rx) = mpsc::channel(64);
        let (stray_tx, mut stray_rx) = mpsc::channel(4);
        let slot = Arc::new(BlockSlot::new());
        let listener = Listener::spawn(rx, slot.clone(), stray_tx);

        // 블록 단계 전에는 일반 메시지
        tx.send(Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(stray_rx.recv().await.unwrap().as_ref(), b"hello");

        slot.arm();
        let frame = Block::encode(BlockKind::Short, 1, b"payload");
        for piece in frame.chunks(20) {
            tx.send(Bytes::copy_from_slice(piece)).await.unwrap();
        }

        match slot.wait(Duration::from_secs(2)).await.unwrap() {
            Some(Assembled::Block(block)) => {
                assert_eq!(block.sequence, 1);
                assert_eq!(block.validate(), Verdict::Valid);
            }
            other => panic!("unexpected: {:?}", other),
        }

        tx.send(Bytes::from_static(&[0x04])).await.unwrap();
        assert!(matches!(
            slot.wait(Duration::from_secs(2)).await.unwrap(),
            Some(Assembled::EndOfTransfer)
        ));

        let rx = listener.stop().await.unwrap();
        drop(rx);
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let slot = BlockSlot::new();
        slot.arm();
        slot.feed(&[0x01, 0x01, 0xFE]);
        let result = slot.wait(Duration::from_millis(30)).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_closed_subscription() {
        let (tx, rx) = mpsc::channel(4);
        let (stray_tx, _stray_rx) = mpsc::channel(4);
        let slot = Arc::new(BlockSlot::new());
        let listener = Listener::spawn(rx, slot.clone(), stray_tx);

        slot.arm();
        drop(tx);
        assert!(matches!(
            slot.wait(Duration::from_secs(2)).await,
            Err(Error::ConnectionClosed)
        ));
        assert!(listener.stop().await.is_ok());
    }
}
