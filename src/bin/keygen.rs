//! WFB 키 생성기
//!
//! 지상국/기체용 키 파일 한 쌍을 만든다. 각 파일은 자신의 비밀키 32바이트 뒤에
//! 상대의 공개키 32바이트가 붙은 형태다.
//!
//! 사용법:
//!   cargo run --release --bin wfb-keygen -- [OUT_DIR]

use std::path::PathBuf;

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use wfb_rx::KeyPair;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    let ground = KeyPair::generate();
    let drone = KeyPair::generate();

    let gs_path = dir.join("gs.key");
    let drone_path = dir.join("drone.key");
    ground.link_keys(drone.public_key_bytes()).save(&gs_path)?;
    drone.link_keys(ground.public_key_bytes()).save(&drone_path)?;

    info!("지상국 키: {}", gs_path.display());
    info!("기체 키: {}", drone_path.display());
    Ok(())
}
