//! 캡처 봉투 (capture envelope)
//!
//! 모니터 모드 캡처는 바로 radiotap으로 시작하므로 아무것도 소비하지 않는다.
//! 미러 UDP 스트림은 8바이트 헤더 `[flags:u32][freq:u16][dbm:i16]` (big-endian) 뒤에
//! 802.11 헤더 이후의 바이트가 온다.

use bincode::Options;
use serde::{Deserialize, Serialize};

use super::wire_codec;
use crate::error::{Error, Result};
use crate::DBM_INVALID;

/// 미러 헤더 크기
pub const MIRROR_HDRLEN: usize = 8;

/// 손상 프레임 표시 (페이로드 없음)
pub const MIRROR_FLAG_CORRUPT: u32 = 0x1;

/// 수신 경로
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// 모니터 모드 캡처 (radiotap + 802.11)
    Capture,
    /// 유선 미러 멀티캐스트
    Mirror,
}

/// 벗겨낸 봉투
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Envelope {
    Capture,
    Mirror(MirrorHeader),
}

/// 미러 헤더
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorHeader {
    pub flags: u32,
    pub freq: u16,
    pub dbm: i16,
}

impl MirrorHeader {
    pub fn new(meta: &FrameMeta) -> Self {
        Self {
            flags: if meta.corrupt { MIRROR_FLAG_CORRUPT } else { 0 },
            freq: meta.freq,
            dbm: meta.dbm,
        }
    }

    pub fn is_corrupt(&self) -> bool {
        self.flags & MIRROR_FLAG_CORRUPT != 0
    }

    pub fn meta(&self) -> FrameMeta {
        FrameMeta {
            freq: self.freq,
            dbm: self.dbm,
            corrupt: self.is_corrupt(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(wire_codec().serialize(self)?)
    }

    /// 미러 헤더 파싱: (헤더, 802.11 본문)
    ///
    /// i8 범위를 벗어난 dBm은 DBM_INVALID로 바꾼다.
    pub fn parse(buf: &[u8]) -> Result<(Self, &[u8])> {
        if buf.len() < MIRROR_HDRLEN {
            return Err(Error::truncated("mirror", MIRROR_HDRLEN, buf.len()));
        }
        let mut header: Self = wire_codec().deserialize(&buf[..MIRROR_HDRLEN])?;
        if !(i8::MIN as i16..=i8::MAX as i16).contains(&header.dbm) {
            header.dbm = DBM_INVALID;
        }
        Ok((header, &buf[MIRROR_HDRLEN..]))
    }
}

/// 미러 콜백에 넘기는 수신 메타데이터
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMeta {
    /// 채널 주파수 (MHz)
    pub freq: u16,
    /// 신호 세기 (dBm, 모르면 DBM_INVALID)
    pub dbm: i16,
    /// FCS 오류 프레임
    pub corrupt: bool,
}

/// 봉투 벗기기
pub fn parse(source: Source, buf: &[u8]) -> Result<(Envelope, &[u8])> {
    match source {
        Source::Capture => Ok((Envelope::Capture, buf)),
        Source::Mirror => {
            let (header, rest) = MirrorHeader::parse(buf)?;
            Ok((Envelope::Mirror(header), rest))
        }
    }
}
