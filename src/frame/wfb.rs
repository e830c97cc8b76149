//! WFB 프레이밍
//!
//! ```text
//! DATA:    [0x01][nonce:8 = block_idx:55 | fragment_idx:8][AEAD(flags:u8, packet_size:u16, payload)]
//! SESSION: [0x02][nonce:24][box(epoch:u64, channel_id:u32, fec_type, fec_k, fec_n, key:32)]
//! ```

use bincode::Options;
use serde::{Deserialize, Serialize};

use super::wire_codec;
use crate::crypto::{BOX_NONCE_SIZE, KEY_SIZE};
use crate::error::{Error, Result};
use crate::{
    DATA_BLOCK_HDRLEN, FRAGMENT_HDRLEN, MAX_BLOCK_IDX, MAX_DATA_PACKET_SIZE, SESSION_BLOCK_HDRLEN,
    SESSION_DATALEN,
};

/// FEC 채움용 조각: 슬롯만 차지하고 전달하지 않음
pub const FLAG_FEC_ONLY: u8 = 0x01;

/// 패킷 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Data = 0x01,
    Session = 0x02,
}

impl TryFrom<u8> for PacketType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(PacketType::Data),
            0x02 => Ok(PacketType::Session),
            other => Err(Error::UnknownPacketType(other)),
        }
    }
}

/// WFB 평문 헤더
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WfbHeader {
    Data {
        /// 와이어 nonce 원본 (AEAD nonce 재구성용)
        nonce: u64,
        block_idx: u64,
        fragment_idx: u8,
    },
    Session {
        nonce: [u8; BOX_NONCE_SIZE],
    },
}

impl WfbHeader {
    pub fn data(block_idx: u64, fragment_idx: u8) -> Self {
        WfbHeader::Data {
            nonce: (block_idx << 8) | fragment_idx as u64,
            block_idx,
            fragment_idx,
        }
    }

    pub fn packet_type(&self) -> PacketType {
        match self {
            WfbHeader::Data { .. } => PacketType::Data,
            WfbHeader::Session { .. } => PacketType::Session,
        }
    }

    /// 평문 헤더 길이
    pub fn header_len(&self) -> usize {
        match self {
            WfbHeader::Data { .. } => DATA_BLOCK_HDRLEN,
            WfbHeader::Session { .. } => SESSION_BLOCK_HDRLEN,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.header_len());
        out.push(self.packet_type() as u8);
        match self {
            WfbHeader::Data { nonce, .. } => out.extend_from_slice(&nonce.to_be_bytes()),
            WfbHeader::Session { nonce } => out.extend_from_slice(nonce),
        }
        out
    }
}

/// WFB 헤더 파싱: (헤더, 암호문)
pub fn parse(buf: &[u8]) -> Result<(WfbHeader, &[u8])> {
    if buf.len() > MAX_DATA_PACKET_SIZE {
        return Err(Error::Oversized {
            max: MAX_DATA_PACKET_SIZE,
            got: buf.len(),
        });
    }
    let tag = *buf.first().ok_or(Error::truncated("wfb", 1, 0))?;

    match PacketType::try_from(tag)? {
        PacketType::Data => {
            if buf.len() < DATA_BLOCK_HDRLEN {
                return Err(Error::truncated("wfb data", DATA_BLOCK_HDRLEN, buf.len()));
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buf[1..DATA_BLOCK_HDRLEN]);
            let nonce = u64::from_be_bytes(raw);
            let header = WfbHeader::Data {
                nonce,
                block_idx: nonce >> 8,
                fragment_idx: nonce as u8,
            };
            Ok((header, &buf[DATA_BLOCK_HDRLEN..]))
        }
        PacketType::Session => {
            if buf.len() < SESSION_BLOCK_HDRLEN {
                return Err(Error::truncated(
                    "wfb session",
                    SESSION_BLOCK_HDRLEN,
                    buf.len(),
                ));
            }
            let mut nonce = [0u8; BOX_NONCE_SIZE];
            nonce.copy_from_slice(&buf[1..SESSION_BLOCK_HDRLEN]);
            Ok((WfbHeader::Session { nonce }, &buf[SESSION_BLOCK_HDRLEN..]))
        }
    }
}

/// 파서 체인 결과 (프레임마다 새로 생성)
#[derive(Debug, Clone, Copy)]
pub struct ParsedFrame<'a> {
    pub header: WfbHeader,
    /// AEAD 연관 데이터로 쓰는 평문 헤더 바이트
    pub plain_header: &'a [u8],
    pub cipher: &'a [u8],
}

impl<'a> ParsedFrame<'a> {
    pub fn parse(buf: &'a [u8]) -> Result<Self> {
        let (header, cipher) = parse(buf)?;
        if let WfbHeader::Data { block_idx, .. } = header {
            if block_idx > MAX_BLOCK_IDX {
                return Err(Error::BlockIndexOverflow(block_idx));
            }
        }
        Ok(Self {
            header,
            plain_header: &buf[..header.header_len()],
            cipher,
        })
    }
}

/// SESSION 프레임 평문
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionData {
    pub epoch: u64,
    pub channel_id: u32,
    pub fec_type: u8,
    pub fec_k: u8,
    pub fec_n: u8,
    pub session_key: [u8; KEY_SIZE],
}

impl SessionData {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < SESSION_DATALEN {
            return Err(Error::truncated("session data", SESSION_DATALEN, buf.len()));
        }
        Ok(wire_codec().deserialize(buf)?)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(wire_codec().serialize(self)?)
    }
}

/// DATA 조각 평문 앞 3바이트
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentHeader {
    pub flags: u8,
    pub packet_size: u16,
}

impl FragmentHeader {
    pub fn is_fec_only(&self) -> bool {
        self.flags & FLAG_FEC_ONLY != 0
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < FRAGMENT_HDRLEN {
            return Err(Error::truncated("fragment", FRAGMENT_HDRLEN, buf.len()));
        }
        Ok(wire_codec().deserialize(&buf[..FRAGMENT_HDRLEN])?)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(wire_codec().serialize(self)?)
    }
}
