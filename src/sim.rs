//! 시뮬레이션 장치
//!
//! 장치쪽 송신 상태 기계를 프로세스 내부 루프백 전송 위에서 돌린다.
//! 통합 테스트와 `yfetch-sim` 데모에서 사용하며 오류 주입을 지원한다.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::block::{Block, BlockKind, BlockZero, HEADER_LEN};
use crate::checksum::crc8_xor;
use crate::command::{CommandFrame, Opcode, Signal, DISKSPACE, EOT, IDLE, STATUS};
use crate::transport::{Channel, Subscriptions, Transport};
use crate::DEFAULT_LISTING_NAME;

/// 시뮬레이션 옵션
#[derive(Debug, Clone)]
pub struct SimOptions {
    /// 블록 크기
    pub kind: BlockKind,

    /// 조각 최대 크기 (MTU 23 - 3)
    pub mtu: usize,

    /// 조각 크기를 1..=mtu 에서 무작위로
    pub jitter: bool,

    /// 블록 0을 이 횟수만큼 손상시켜 보냄
    pub block_zero_failures: usize,

    /// 첫 전송을 손상시킬 데이터 블록 번호 (1부터)
    pub corrupt_blocks: Vec<usize>,

    /// 이 블록 번호부터 시퀀스 번호를 하나 건너뜀
    pub skip_sequence_at: Option<usize>,

    /// 이 블록 번호부터 아무것도 보내지 않음
    pub stall_at: Option<usize>,

    /// 첫 상태 조회에 NotIdle 응답
    pub busy: bool,

    /// 파일 요청을 이 횟수만큼 처리한 뒤로는 계속 NotIdle
    pub stuck_after_requests: Option<usize>,

    /// 첫 EOT 뒤 NAK에 EOT를 다시 보내지 않음
    pub drop_second_eot: bool,

    /// 마지막 ACK 뒤 Idle 응답을 보내지 않음
    pub skip_final_idle: bool,

    /// 디스크 사용량 응답
    pub diskspace: String,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            kind: BlockKind::Short,
            mtu: 20,
            jitter: false,
            block_zero_failures: 0,
            corrupt_blocks: Vec::new(),
            skip_sequence_at: None,
            stall_at: None,
            busy: false,
            stuck_after_requests: None,
            drop_second_eot: false,
            skip_final_idle: false,
            diskspace: "556/8104".to_string(),
        }
    }
}

/// 장치 전송 상태
#[derive(Debug, Clone, PartialEq, Eq)]
enum DeviceState {
    Idle,
    /// 파일 요청 승인, 'C' 대기
    Ready(String),
    /// 블록 0 전송, ACK/NAK 대기
    ZeroSent(String),
    /// 블록 0 ACK, 'C' 대기
    AwaitStart(String),
    /// 데이터 블록 전송 중 (블록 번호, 1부터)
    Sending(String, usize),
    /// 첫 번째 EOT 전송
    Eot1,
    /// 두 번째 EOT 전송
    Eot2,
}

/// 루프백 전송 (호스트 → 장치)
#[derive(Clone)]
pub struct LoopbackTransport {
    tx: mpsc::UnboundedSender<(Channel, Vec<u8>)>,
    sent: Arc<Mutex<Vec<(Channel, Vec<u8>)>>>,
    fail_writes: Arc<AtomicBool>,
    outbound_writes: Arc<AtomicUsize>,
    /// 실패시킬 outbound 쓰기 번호 (0이면 없음)
    fail_outbound_at: Arc<AtomicUsize>,
}

impl LoopbackTransport {
    /// 호스트가 보낸 모든 쓰기 기록
    pub fn sent(&self) -> Vec<(Channel, Vec<u8>)> {
        self.sent.lock().clone()
    }

    /// outbound 채널로 보낸 신호 바이트
    pub fn signals(&self) -> Vec<u8> {
        self.sent
            .lock()
            .iter()
            .filter(|(ch, data)| *ch == Channel::Outbound && data.len() == 1)
            .map(|(_, data)| data[0])
            .collect()
    }

    /// 이후 쓰기를 실패시킴
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// 지금부터 n번째 outbound 쓰기 한 번만 실패시킴
    pub fn fail_outbound_write(&self, n: usize) {
        let done = self.outbound_writes.load(Ordering::SeqCst);
        self.fail_outbound_at.store(done + n, Ordering::SeqCst);
    }
}

impl Transport for LoopbackTransport {
    async fn send(&self, channel: Channel, data: &[u8]) -> io::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "쓰기 실패 주입"));
        }

        if channel == Channel::Outbound {
            let n = self.outbound_writes.fetch_add(1, Ordering::SeqCst) + 1;
            if n == self.fail_outbound_at.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "쓰기 실패 주입"));
            }
        }

        self.sent.lock().push((channel, data.to_vec()));
        self.tx
            .send((channel, data.to_vec()))
            .map_err(|_| io::Error::new(io::ErrorKind::NotConnected, "장치 종료"))
    }
}

/// 시뮬레이션 장치
pub struct SimDevice {
    files: HashMap<String, Vec<u8>>,
    options: SimOptions,
}

impl SimDevice {
    pub fn new(options: SimOptions) -> Self {
        Self {
            files: HashMap::new(),
            options,
        }
    }

    pub fn with_file(mut self, name: &str, data: impl Into<Vec<u8>>) -> Self {
        self.files.insert(name.to_string(), data.into());
        self
    }

    /// 장치 태스크 시작
    ///
    /// 목록 파일이 없으면 보유 파일로 `"<name> <size>"` 줄을 만든다.
    pub fn spawn(mut self) -> (LoopbackTransport, Subscriptions, JoinHandle<()>) {
        if !self.files.contains_key(DEFAULT_LISTING_NAME) && !self.files.is_empty() {
            let mut names: Vec<_> = self.files.iter().map(|(n, d)| (n.clone(), d.len())).collect();
            names.sort();
            let listing: String = names
                .iter()
                .map(|(name, size)| format!("{} {}\n", name, size))
                .collect();
            self.files.insert(DEFAULT_LISTING_NAME.to_string(), listing.into_bytes());
        }

        let (host_tx, host_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::channel(64);
        let (inbound_tx, inbound_rx) = mpsc::channel(1024);

        let transport = LoopbackTransport {
            tx: host_tx,
            sent: Arc::new(Mutex::new(Vec::new())),
            fail_writes: Arc::new(AtomicBool::new(false)),
            outbound_writes: Arc::new(AtomicUsize::new(0)),
            fail_outbound_at: Arc::new(AtomicUsize::new(0)),
        };

        let device = DeviceTask {
            files: self.files,
            corrupt_pending: self.options.corrupt_blocks.iter().copied().collect(),
            zero_failures_left: self.options.block_zero_failures,
            busy: self.options.busy,
            requests: 0,
            options: self.options,
            state: DeviceState::Idle,
            control_tx,
            inbound_tx,
        };
        let handle = tokio::spawn(device.run(host_rx));

        let subscriptions = Subscriptions {
            control: control_rx,
            inbound: inbound_rx,
        };
        (transport, subscriptions, handle)
    }
}

struct DeviceTask {
    files: HashMap<String, Vec<u8>>,
    options: SimOptions,
    corrupt_pending: HashSet<usize>,
    zero_failures_left: usize,
    busy: bool,
    /// 처리한 파일 요청 수
    requests: usize,
    state: DeviceState,
    control_tx: mpsc::Sender<Bytes>,
    inbound_tx: mpsc::Sender<Bytes>,
}

impl DeviceTask {
    async fn run(mut self, mut host_rx: mpsc::UnboundedReceiver<(Channel, Vec<u8>)>) {
        while let Some((channel, data)) = host_rx.recv().await {
            trace!("장치 수신 {:?} {:02X?}", channel, data);
            let alive = match channel {
                Channel::Control => self.on_command(&data).await,
                Channel::Outbound => self.on_signal(&data).await,
                Channel::Inbound => true,
            };
            if !alive {
                break;
            }
        }
        debug!("시뮬레이션 장치 종료");
    }

    async fn reply(&self, data: Vec<u8>) -> bool {
        self.control_tx.send(Bytes::from(data)).await.is_ok()
    }

    fn stuck(&self) -> bool {
        self.options
            .stuck_after_requests
            .is_some_and(|n| self.requests >= n)
    }

    async fn on_command(&mut self, data: &[u8]) -> bool {
        if self.stuck() && (data == STATUS || data == IDLE) {
            return self.reply(CommandFrame::bare(Opcode::NotIdle).to_bytes()).await;
        }

        if data == STATUS {
            let reply = if self.busy {
                CommandFrame::bare(Opcode::NotIdle).to_bytes()
            } else {
                IDLE.to_vec()
            };
            return self.reply(reply).await;
        }

        if data == IDLE {
            self.busy = false;
            self.state = DeviceState::Idle;
            return self.reply(IDLE.to_vec()).await;
        }

        if data == DISKSPACE {
            let mut reply = vec![Opcode::DiskspaceAck as u8];
            reply.extend_from_slice(self.options.diskspace.as_bytes());
            reply.push(0);
            let crc = crc8_xor(&reply);
            if let Some(last) = reply.last_mut() {
                *last = crc;
            }
            return self.reply(reply).await;
        }

        let Some(frame) = CommandFrame::from_bytes(data) else {
            return self.reply(CommandFrame::bare(Opcode::CommandError).to_bytes()).await;
        };

        if frame.opcode != Opcode::FetchRequest as u8 {
            return self.reply(CommandFrame::bare(Opcode::CommandError).to_bytes()).await;
        }

        let name = frame.payload_str().unwrap_or_default().to_string();
        if self.busy || self.stuck() {
            return self.reply(CommandFrame::bare(Opcode::NotIdle).to_bytes()).await;
        }
        self.requests += 1;
        if !self.files.contains_key(&name) {
            return self
                .reply(CommandFrame::with_name(Opcode::FileNotAvailable, &name).to_bytes())
                .await;
        }

        self.state = DeviceState::Ready(name.clone());
        self.reply(CommandFrame::fetch_ack(&name).to_bytes()).await
    }

    async fn on_signal(&mut self, data: &[u8]) -> bool {
        let [byte] = data else {
            return true;
        };

        let state = self.state.clone();
        match (state, *byte) {
            (DeviceState::Ready(name), b) if b == Signal::ReadyToReceive.as_byte() => {
                self.state = DeviceState::ZeroSent(name.clone());
                self.send_block_zero(&name).await
            }
            (DeviceState::ZeroSent(name), b) if b == Signal::Nak.as_byte() => {
                self.state = DeviceState::Ready(name);
                true
            }
            (DeviceState::ZeroSent(name), b) if b == Signal::Ack.as_byte() => {
                self.state = DeviceState::AwaitStart(name);
                true
            }
            (DeviceState::AwaitStart(name), b) if b == Signal::ReadyToReceive.as_byte() => {
                self.send_data_block(name, 1).await
            }
            (DeviceState::Sending(name, index), b) if b == Signal::Nak.as_byte() => {
                self.send_data_block(name, index).await
            }
            (DeviceState::Sending(name, index), b) if b == Signal::Ack.as_byte() => {
                self.send_data_block(name, index + 1).await
            }
            (DeviceState::Eot1, b) if b == Signal::Nak.as_byte() => {
                self.state = DeviceState::Eot2;
                if self.options.drop_second_eot {
                    return true;
                }
                self.emit(vec![EOT]).await
            }
            (DeviceState::Eot2, b) if b == Signal::Ack.as_byte() => {
                self.state = DeviceState::Idle;
                if self.options.skip_final_idle {
                    return true;
                }
                self.reply(IDLE.to_vec()).await
            }
            (_, b) if b == Signal::Cancel.as_byte() => {
                debug!("장치: 전송 취소");
                self.state = DeviceState::Idle;
                true
            }
            (state, b) => {
                debug!("장치: {:?} 상태에서 신호 {:02X} 무시", state, b);
                true
            }
        }
    }

    async fn send_block_zero(&mut self, name: &str) -> bool {
        let size = self.files.get(name).map_or(0, |d| d.len()) as u64;
        let zero = BlockZero {
            filename: name.to_string(),
            size,
        };
        let mut frame = Block::encode(self.options.kind, 0, &zero.to_payload());

        if self.zero_failures_left > 0 {
            self.zero_failures_left -= 1;
            frame[HEADER_LEN] ^= 0xFF;
        }
        self.emit(frame).await
    }

    /// 블록 번호(1부터)의 데이터 블록 전송, 남은 블록이 없으면 EOT
    async fn send_data_block(&mut self, name: String, index: usize) -> bool {
        let kind = self.options.kind;
        let payload_len = kind.payload_len();
        let skip = self.options.skip_sequence_at.is_some_and(|at| index >= at) as usize;
        let sequence = ((index + skip) % 256) as u8;

        let frame = self.files.get(&name).and_then(|data| {
            let start = (index - 1) * payload_len;
            let end = (start + payload_len).min(data.len());
            (start < data.len()).then(|| Block::encode(kind, sequence, &data[start..end]))
        });

        let Some(mut frame) = frame else {
            self.state = DeviceState::Eot1;
            return self.emit(vec![EOT]).await;
        };

        self.state = DeviceState::Sending(name, index);
        if self.options.stall_at.is_some_and(|at| index >= at) {
            return true;
        }

        if self.corrupt_pending.remove(&index) {
            frame[HEADER_LEN + 1] ^= 0x01;
        }
        self.emit(frame).await
    }

    /// 프레임을 MTU 크기 조각으로 나눠 전송
    async fn emit(&self, frame: Vec<u8>) -> bool {
        // 1바이트 조각은 EOT와 구분되지 않으므로 만들지 않는다
        let sizes: Vec<usize> = {
            let mut rng = rand::thread_rng();
            let mtu = self.options.mtu.max(3);
            let mut sizes = Vec::new();
            let mut left = frame.len();
            while left > 0 {
                let size = if left <= mtu {
                    left
                } else if self.options.jitter {
                    let size = rng.gen_range(2..=mtu);
                    if left - size == 1 {
                        size - 1
                    } else {
                        size
                    }
                } else if left - mtu == 1 {
                    mtu - 1
                } else {
                    mtu
                };
                sizes.push(size);
                left -= size;
            }
            sizes
        };

        let mut at = 0;
        for size in sizes {
            let fragment = Bytes::copy_from_slice(&frame[at..at + size]);
            at += size;
            if self.inbound_tx.send(fragment).await.is_err() {
                return false;
            }
        }
        true
    }
}
