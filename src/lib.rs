//! # yfetch
//!
//! 노티피케이션 기반 채널 위의 YMODEM 변형 블록 전송으로 장치에서 파일 가져오기
//!
//! ## 핵심 특징
//! - **조각 조립**: MTU 크기 조각을 128/1024 바이트 블록으로 조립
//! - **블록 검증**: CRC16/ARC, 시퀀스 보수 바이트 확인
//! - **NAK 재전송**: 손상 블록은 NAK, 블록 0은 최대 3회 후 CAN
//! - **정확한 크기**: 마지막 블록 패딩 제거, 선언 크기와 비교
//! - **배치 동기화**: 목록 파일을 받아 없는 파일만 가져오기

pub mod block;
pub mod checksum;
pub mod command;
pub mod committer;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod listener;
pub mod listing;
pub mod sequence;
pub mod session;
pub mod sim;
pub mod stats;
pub mod storage;
pub mod transport;

pub use block::{Block, BlockAssembler, BlockKind, BlockZero, Verdict};
pub use command::{CommandFrame, Response, Signal};
pub use config::Config;
pub use error::{Error, Result};
pub use fetcher::{AbortReason, FetchReport, FetchStatus, Fetcher, SyncSummary};
pub use session::{Action, Event, Phase};
pub use stats::TransferStats;
pub use storage::{FsStorage, MemoryStorage, Storage};
pub use transport::{Channel, Subscriptions, Transport};

/// 장치 파일 목록 기본 이름
pub const DEFAULT_LISTING_NAME: &str = "filelist.txt";

/// 진행 상황 로그 간격 (블록 수)
pub const PROGRESS_INTERVAL: u64 = 128;
