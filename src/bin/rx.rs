//! WFB 수신기 - 미러 멀티캐스트 입력
//!
//! 유선 미러 스트림(ff02::5742)을 받아 세션 수립, 인증, FEC 복구 후 페이로드를
//! 표준 출력 또는 파일로 흘려보낸다.
//!
//! 사용법:
//!   cargo run --release --bin wfb-rx -- [OPTIONS]
//!
//! 예시:
//!   # 기본 수신 (gs.key, 표준 출력)
//!   cargo run --release --bin wfb-rx -- --key gs.key > video.h264
//!
//!   # 채널 고정 + 파일 출력
//!   cargo run --release --bin wfb-rx -- -k gs.key -c 0x00000001 -o out.bin

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use wfb_rx::handler::ChannelSink;
use wfb_rx::net::{bind_mirror_socket, run_mirror_loop};
use wfb_rx::{Config, LinkKeys, Receiver};

/// 출력 큐 깊이 (페이로드 개수)
const OUTPUT_QUEUE: usize = 4096;

/// 실행 설정
struct RxArgs {
    key_path: PathBuf,
    verbose: bool,
    output: Option<PathBuf>,
    config: Config,
}

impl Default for RxArgs {
    fn default() -> Self {
        Self {
            key_path: PathBuf::from("gs.key"),
            verbose: false,
            output: None,
            config: Config::default(),
        }
    }
}

fn parse_u32(value: &str) -> u32 {
    match value.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16).expect("유효한 16진수 필요"),
        None => value.parse().expect("유효한 숫자 필요"),
    }
}

fn parse_args() -> RxArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut rx = RxArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--low-spec" => {
                rx.config = Config {
                    channel_id: rx.config.channel_id,
                    ..Config::low_spec()
                };
            }
            "--strict" => {
                rx.config = Config {
                    channel_id: rx.config.channel_id,
                    ..Config::strict()
                };
            }
            "--key" | "-k" => {
                if i + 1 < args.len() {
                    rx.key_path = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--output" | "-o" => {
                if i + 1 < args.len() {
                    rx.output = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--channel" | "-c" => {
                if i + 1 < args.len() {
                    rx.config.channel_id = Some(parse_u32(&args[i + 1]));
                    i += 1;
                }
            }
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    rx.config.mirror_port = args[i + 1].parse().expect("유효한 포트 필요");
                    i += 1;
                }
            }
            "--group" => {
                if i + 1 < args.len() {
                    rx.config.mirror_group = args[i + 1].parse().expect("유효한 IPv6 주소 필요");
                    i += 1;
                }
            }
            "--ifindex" => {
                if i + 1 < args.len() {
                    rx.config.mirror_ifindex = parse_u32(&args[i + 1]);
                    i += 1;
                }
            }
            "--ring-size" => {
                if i + 1 < args.len() {
                    rx.config.ring_size = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--rollback" => {
                if i + 1 < args.len() {
                    let secs: u64 = args[i + 1].parse().expect("유효한 초 필요");
                    rx.config.epoch_rollback_timeout = (secs > 0).then(|| Duration::from_secs(secs));
                    i += 1;
                }
            }
            "--stats" => {
                if i + 1 < args.len() {
                    rx.config.stats_interval_ms = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--no-fec" => rx.config.fec_enabled = false,
            "--verbose" | "-v" => rx.verbose = true,
            "--help" | "-h" => {
                println!(
                    r#"WFB RX - 미러 멀티캐스트 수신기

유선 미러 스트림을 받아 인증/FEC 복구 후 페이로드를 출력
- X25519 봉인 박스 세션 + ChaCha20-Poly1305 조각 인증
- Reed-Solomon (k, n) 복구

사용법:
  cargo run --release --bin wfb-rx -- [OPTIONS]

옵션:
  -k, --key <PATH>        키 파일 (기본: gs.key)
  -o, --output <PATH>     출력 파일 (기본: 표준 출력)
  -c, --channel <ID>      채널 ID 고정 (10진수 또는 0x 16진수)
  -p, --port <PORT>       미러 포트 (기본: 5742)
  --group <ADDR>          미러 그룹 (기본: ff02::5742)
  --ifindex <N>           멀티캐스트 인터페이스 인덱스 (기본: 0)
  --ring-size <N>         윈도우 깊이 블록 수 (기본: 40)
  --rollback <SECS>       에포크 롤백 허용 대기 (0이면 금지, 기본: 10)
  --stats <MS>            통계 출력 주기 (0이면 끔, 기본: 1000)
  --no-fec                FEC 복구 끄기
  --low-spec              저사양 프리셋
  --strict                엄격 프리셋 (FCS 검증, 롤백 금지)
  -v, --verbose           debug 로그 출력
  -h, --help              이 도움말 출력

로그 레벨은 RUST_LOG로 지정 (기본: info)
"#
                );
                std::process::exit(0);
            }
            other => eprintln!("알 수 없는 옵션 무시: {}", other),
        }
        i += 1;
    }

    rx
}

/// 출력 스레드: 수신 루프와 분리해 쓰기 지연이 수신을 막지 않게 함
fn spawn_writer(
    output: Option<PathBuf>,
    queue: crossbeam_channel::Receiver<Bytes>,
) -> io::Result<std::thread::JoinHandle<()>> {
    let mut writer: Box<dyn Write + Send> = match output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(io::stdout()),
    };

    Ok(std::thread::spawn(move || {
        for payload in queue.iter() {
            if let Err(e) = writer.write_all(&payload).and_then(|_| writer.flush()) {
                warn!("출력 실패, 쓰기 중단: {}", e);
                break;
            }
        }
    }))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = parse_args();

    // 로깅 설정 (표준 출력은 페이로드용)
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let keys = LinkKeys::load(&args.key_path)?;
    info!("키 파일 로드: {}", args.key_path.display());

    let stats_interval =
        (args.config.stats_interval_ms > 0).then(|| Duration::from_millis(args.config.stats_interval_ms));
    let socket = bind_mirror_socket(&args.config)?;

    let mut receiver = Receiver::new(args.config, &keys)?;
    let (queue_tx, queue_rx) = crossbeam_channel::bounded(OUTPUT_QUEUE);
    receiver.add_decode_handler(ChannelSink::new(queue_tx))?;
    let writer = spawn_writer(args.output, queue_rx)?;

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("종료 신호 수신");
        }
        let _ = stop_tx.send(true);
    });

    run_mirror_loop(&mut receiver, &socket, stop_rx, stats_interval).await?;

    // 핸들러(채널 송신측)를 정리해야 출력 스레드가 끝남
    drop(receiver);
    if writer.join().is_err() {
        warn!("출력 스레드 비정상 종료");
    }
    Ok(())
}
