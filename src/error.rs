//! 에러 타입 정의

use thiserror::Error;

use crate::crypto::CryptoError;

/// 에러 분류 (통계 집계용)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// 파서 단계 실패
    Format,
    /// 봉인 박스 / AEAD 인증 실패
    Crypto,
    /// 핸드셰이크 계약 위반
    Protocol,
    /// 할당 실패
    Resource,
    /// 입출력
    Io,
}

/// WFB 수신기 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("직렬화 에러: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("암호 에러: {0}")]
    Crypto(#[from] CryptoError),

    #[error("프레임이 너무 짧음 ({stage}): need {need}, got {got}")]
    Truncated {
        stage: &'static str,
        need: usize,
        got: usize,
    },

    #[error("프레임이 너무 큼: max {max}, got {got}")]
    Oversized { max: usize, got: usize },

    #[error("잘못된 radiotap 헤더: {0}")]
    Radiotap(&'static str),

    #[error("지원하지 않는 802.11 버전: {0}")]
    UnsupportedVersion(u8),

    #[error("데이터 프레임 아님: type {0}")]
    NotDataFrame(u8),

    #[error("지원하지 않는 서브타입: {0}")]
    UnsupportedSubtype(u8),

    #[error("유효하지 않은 시그니처: expected {expected:04X}, got {got:04X}")]
    InvalidSignature { expected: u16, got: u16 },

    #[error("알 수 없는 패킷 타입: {0:#04x}")]
    UnknownPacketType(u8),

    #[error("블록 인덱스 범위 초과: {0}")]
    BlockIndexOverflow(u64),

    #[error("프래그먼트 인덱스 범위 초과: {fragment_idx} >= {fec_n}")]
    FragmentIndexOverflow { fragment_idx: u8, fec_n: u8 },

    #[error("에포크 롤백: current {current}, got {got}")]
    StaleEpoch { current: u64, got: u64 },

    #[error("채널 ID 불일치: expected {expected:08X}, got {got:08X}")]
    ChannelMismatch { expected: u32, got: u32 },

    #[error("지원하지 않는 FEC 타입: {0}")]
    UnsupportedFecType(u8),

    #[error("유효하지 않은 FEC 파라미터: k={k}, n={n}")]
    InvalidFecParams { k: u8, n: u8 },

    #[error("FEC 복구 실패: {0}")]
    Fec(&'static str),

    #[error("자원 부족: {0}")]
    ResourceExhausted(&'static str),

    #[error("핸들러 한도 초과: 최대 {max}")]
    HandlerLimit { max: usize },

    #[error("키 파일 오류: {0}")]
    KeyFile(String),

    #[error("설정 오류: {0}")]
    Config(String),
}

impl Error {
    /// 에러 분류
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Io(_) | Error::KeyFile(_) | Error::Config(_) | Error::HandlerLimit { .. } => {
                ErrorClass::Io
            }
            Error::Crypto(_) => ErrorClass::Crypto,
            Error::StaleEpoch { .. }
            | Error::ChannelMismatch { .. }
            | Error::UnsupportedFecType(_)
            | Error::InvalidFecParams { .. }
            | Error::Fec(_) => ErrorClass::Protocol,
            Error::ResourceExhausted(_) => ErrorClass::Resource,
            Error::Serialization(_)
            | Error::Truncated { .. }
            | Error::Oversized { .. }
            | Error::Radiotap(_)
            | Error::UnsupportedVersion(_)
            | Error::NotDataFrame(_)
            | Error::UnsupportedSubtype(_)
            | Error::InvalidSignature { .. }
            | Error::UnknownPacketType(_)
            | Error::BlockIndexOverflow(_)
            | Error::FragmentIndexOverflow { .. } => ErrorClass::Format,
        }
    }

    /// 길이 부족 에러 생성
    pub(crate) fn truncated(stage: &'static str, need: usize, got: usize) -> Self {
        Error::Truncated { stage, need, got }
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
