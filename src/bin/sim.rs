//! yfetch 시뮬레이터
//!
//! 시뮬레이션 장치에서 파일 목록과 `.fit` 파일을 동기화한다.
//! 오류 주입으로 NAK 재전송, 블록 0 재시도를 확인할 수 있다.
//!
//! 사용법:
//!   cargo run --release --bin yfetch-sim -- [OPTIONS]
//!
//! 예시:
//!   # 임의 데이터 3개 파일 동기화
//!   cargo run --release --bin yfetch-sim -- --output ./received
//!
//!   # 디렉터리의 파일을 긴 블록으로, 조각 크기 무작위
//!   cargo run --release --bin yfetch-sim -- -s ./device -o ./received --long --jitter

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use rand::RngCore;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use yfetch::sim::{SimDevice, SimOptions};
use yfetch::{BlockKind, Config, Fetcher, FsStorage};

/// 시뮬레이터 설정
struct SimArgs {
    source: Option<PathBuf>,
    output: PathBuf,
    options: SimOptions,
    verbose: bool,
    config: Config,
}

impl Default for SimArgs {
    fn default() -> Self {
        Self {
            source: None,
            output: PathBuf::from("received"),
            options: SimOptions::default(),
            verbose: false,
            config: Config::fast(),
        }
    }
}

fn invalid(flag: &str, value: &str) -> ! {
    eprintln!("{}: 잘못된 값 '{}'", flag, value);
    std::process::exit(2);
}

fn parse_args() -> SimArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut config = SimArgs::default();

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        let value = args.get(i + 1).map(String::as_str);
        match (flag, value) {
            ("--source" | "-s", Some(v)) => {
                config.source = Some(PathBuf::from(v));
                i += 1;
            }
            ("--output" | "-o", Some(v)) => {
                config.output = PathBuf::from(v);
                i += 1;
            }
            ("--mtu", Some(v)) => {
                config.options.mtu = v.parse().unwrap_or_else(|_| invalid(flag, v));
                i += 1;
            }
            ("--corrupt", Some(v)) => {
                config.options.corrupt_blocks = v
                    .split(',')
                    .map(|n| n.trim().parse().unwrap_or_else(|_| invalid(flag, v)))
                    .collect();
                i += 1;
            }
            ("--block0-failures", Some(v)) => {
                config.options.block_zero_failures =
                    v.parse().unwrap_or_else(|_| invalid(flag, v));
                i += 1;
            }
            ("--long" | "-l", _) => {
                config.options.kind = BlockKind::Long;
                config.config.flush_blocks = 0;
            }
            ("--jitter" | "-j", _) => config.options.jitter = true,
            ("--busy", _) => config.options.busy = true,
            ("--verbose" | "-v", _) => config.verbose = true,
            ("--help" | "-h", _) => {
                println!(
                    r#"yfetch-sim - 시뮬레이션 장치 동기화

시뮬레이션 장치에서 목록 파일을 받고 저장소에 없는 .fit 파일을 가져온다.

사용법:
  cargo run --release --bin yfetch-sim -- [OPTIONS]

옵션:
  -s, --source <DIR>        장치가 보유할 파일 디렉터리 (기본: 임의 데이터 3개)
  -o, --output <DIR>        저장 디렉터리 (기본: ./received)
  --mtu <BYTES>             조각 최대 크기 (기본: 20)
  -l, --long                1024 바이트 블록 사용
  -j, --jitter              조각 크기 무작위
  --corrupt <N,..>          첫 전송을 손상시킬 블록 번호
  --block0-failures <N>     블록 0 손상 횟수
  --busy                    첫 상태 조회에 NotIdle 응답
  -v, --verbose             디버그 로그
  -h, --help                이 도움말 출력
"#
                );
                std::process::exit(0);
            }
            _ => eprintln!("알 수 없는 인자 무시: {}", flag),
        }
        i += 1;
    }

    config
}

/// 장치에 올릴 파일 준비
fn load_device(args: &SimArgs) -> std::io::Result<SimDevice> {
    let mut device = SimDevice::new(args.options.clone());

    let Some(source) = &args.source else {
        let mut rng = rand::thread_rng();
        for (i, size) in [300usize, 4096, 20_000].into_iter().enumerate() {
            let mut data = vec![0u8; size];
            rng.fill_bytes(&mut data);
            device = device.with_file(&format!("2024010{}120000.fit", i + 1), data);
        }
        return Ok(device);
    };

    for entry in fs::read_dir(source)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        device = device.with_file(&name, fs::read(entry.path())?);
    }
    Ok(device)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = parse_args();

    // 로깅 설정 (RUST_LOG가 있으면 우선)
    if std::env::var_os("RUST_LOG").is_some() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let level = if args.verbose { Level::DEBUG } else { Level::INFO };
        let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    info!("yfetch-sim 시작");

    let device = load_device(&args)?;
    let (transport, subscriptions, device_task) = device.spawn();
    let storage = FsStorage::new(&args.output)?;

    let mut fetcher = Fetcher::new(args.config, transport, storage, subscriptions);
    info!("저장 위치: {}", fetcher.storage().root().display());

    let started = Instant::now();
    let summary = fetcher.sync().await?;
    let elapsed = started.elapsed();

    println!();
    println!("═══════════════════════════════════════");
    println!("  동기화 결과");
    println!("═══════════════════════════════════════");
    if let Some(space) = &summary.diskspace {
        println!("  디스크 사용량: {}KB", space);
    }
    for report in &summary.reports {
        println!(
            "  {:<24} {:?} ({} bytes, {})",
            report.filename,
            report.status,
            report.bytes_written,
            report.stats.summary()
        );
    }
    for name in &summary.skipped {
        println!("  {:<24} 건너뜀", name);
    }
    println!(
        "  성공 {} / 실패 {} / 건너뜀 {} ({:.2}s)",
        summary.succeeded(),
        summary.failed(),
        summary.skipped.len(),
        elapsed.as_secs_f64()
    );

    drop(fetcher);
    device_task.await?;
    Ok(())
}
