//! # WFB-RX
//!
//! 모니터 모드 802.11 프레임 또는 미러 UDP 스트림으로 전달되는 WFB 방송을 받아
//! 순서가 보장되고 인증된 바이트 스트림으로 복원하는 수신기 코어
//!
//! ## 핵심 특징
//! - **파서 체인**: 캡처 봉투 → radiotap → 802.11 → WFB, 단계별 `(헤더, 나머지)` 반환
//! - **세션 핸드셰이크**: 봉인 박스로 세션 키 수신, 에포크 기반 키 교체
//! - **AEAD 인증**: 조각마다 ChaCha20-Poly1305, 헤더를 연관 데이터로 묶음
//! - **Reed-Solomon FEC**: (k, n) 블록 중 임의의 k개로 복원
//! - **슬라이딩 윈도우**: cut-through 전달, 뒤처진 블록은 포기하고 넘어감

pub mod config;
pub mod crypto;
pub mod error;
pub mod fec;
pub mod frame;
pub mod handler;
pub mod net;
pub mod reassembly;
pub mod receiver;
pub mod ring;
pub mod session;
pub mod stats;
pub mod tx;

use std::net::Ipv6Addr;

pub use config::Config;
pub use crypto::{CryptoError, DataCipher, KeyPair, LinkKeys, SessionBox};
pub use error::{Error, ErrorClass, Result};
pub use fec::{FecEngine, FecType};
pub use frame::{FrameMeta, ParsedFrame, Source, WfbHeader};
pub use handler::{ChannelSink, DecodeHandler, MirrorHandler, SessionObserver, UdpMirror, WriterSink};
pub use reassembly::{DataOutcome, Delivery, Reassembly};
pub use receiver::{FecToggle, Receiver, RxOutcome};
pub use ring::RingBuffer;
pub use session::{Session, SessionInfo, SessionOutcome};
pub use stats::RxStats;
pub use tx::TxSession;

/// WFB 시그니처 (source address 앞 2바이트)
pub const WFB_SIG: u16 = 0x5742;

/// 처리 가능한 최대 802.11 페이로드
pub const WIFI_MTU: usize = 4045;

/// 3-address 802.11 데이터 헤더 크기
pub const IEEE80211_HDRLEN: usize = 24;

/// DATA nonce 크기
pub const DATA_NONCE_LEN: usize = 8;

/// packet_type + DATA nonce
pub const DATA_BLOCK_HDRLEN: usize = 1 + DATA_NONCE_LEN;

/// SESSION nonce 크기
pub const SESSION_NONCE_LEN: usize = crypto::BOX_NONCE_SIZE;

/// packet_type + 봉인 박스 nonce
pub const SESSION_BLOCK_HDRLEN: usize = 1 + SESSION_NONCE_LEN;

/// 조각 평문 헤더 (flags + packet_size)
pub const FRAGMENT_HDRLEN: usize = 3;

/// SESSION 평문 크기
pub const SESSION_DATALEN: usize = 8 + 4 + 1 + 1 + 1 + crypto::KEY_SIZE;

/// DATA 암호문 최소 길이
pub const MIN_DATA_CIPHER_LEN: usize = FRAGMENT_HDRLEN + crypto::TAG_SIZE;

/// SESSION 암호문 최소 길이
pub const MIN_SESSION_CIPHER_LEN: usize = SESSION_DATALEN + crypto::BOX_MAC_SIZE;

/// WFB 프레임 최대 크기
pub const MAX_DATA_PACKET_SIZE: usize = WIFI_MTU - IEEE80211_HDRLEN;

/// 조각 평문 최대 크기 (링 버퍼 fragment_size)
pub const MAX_FEC_PAYLOAD: usize = MAX_DATA_PACKET_SIZE - DATA_BLOCK_HDRLEN - crypto::TAG_SIZE;

/// 전달 가능한 최대 페이로드
pub const MAX_PAYLOAD_SIZE: usize = MAX_FEC_PAYLOAD - FRAGMENT_HDRLEN;

/// 블록 인덱스 최대값 (55비트)
pub const MAX_BLOCK_IDX: u64 = (1 << 55) - 1;

/// 기본 윈도우 깊이 (블록 수)
pub const RX_RING_SIZE: usize = 40;

/// 신호 세기 미상
pub const DBM_INVALID: i16 = i16::MIN;

/// 미러 멀티캐스트 그룹 (ff02::5742)
pub const WFB_ADDR6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0x5742);

/// 미러 포트
pub const WFB_PORT: u16 = 5742;
