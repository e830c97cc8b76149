//! 802.11 데이터 프레임 헤더
//!
//! 송신측은 source address(addr2) 6바이트에 시그니처(2)와 채널 ID(4)를 big-endian으로 싣는다.
//! 채널 ID의 하위 바이트는 스트림(radio port) 번호다.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Error, Result};
use crate::{IEEE80211_HDRLEN, WFB_SIG};

/// 프레임 타입: 데이터
pub const FRAME_TYPE_DATA: u8 = 2;

/// 서브타입: 일반 데이터 (QoS/Null 제외)
pub const FRAME_SUBTYPE_DATA: u8 = 0;

/// 3-address 데이터 프레임 헤더
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHeader {
    pub frame_control: u16,
    pub duration: u16,
    pub addr1: [u8; 6],
    pub addr2: [u8; 6],
    pub addr3: [u8; 6],
    pub seq_ctrl: u16,
}

impl DataHeader {
    /// addr2[0..2]
    pub fn signature(&self) -> u16 {
        u16::from_be_bytes([self.addr2[0], self.addr2[1]])
    }

    /// addr2[2..6]
    pub fn channel_id(&self) -> u32 {
        u32::from_be_bytes([self.addr2[2], self.addr2[3], self.addr2[4], self.addr2[5]])
    }

    /// 링크 ID (채널 ID 상위 24비트)
    pub fn link_id(&self) -> u32 {
        self.channel_id() >> 8
    }

    /// 스트림 번호 (채널 ID 하위 바이트)
    pub fn stream_id(&self) -> u8 {
        self.addr2[5]
    }

    /// 시퀀스 번호 (상위 12비트)
    pub fn sequence(&self) -> u16 {
        self.seq_ctrl >> 4
    }

    /// 송신용 헤더 생성
    pub fn for_channel(channel_id: u32, sequence: u16) -> Self {
        let mut addr = [0u8; 6];
        addr[..2].copy_from_slice(&WFB_SIG.to_be_bytes());
        addr[2..].copy_from_slice(&channel_id.to_be_bytes());
        Self {
            frame_control: (FRAME_TYPE_DATA as u16) << 2,
            duration: 0,
            addr1: [0xFF; 6],
            addr2: addr,
            addr3: addr,
            seq_ctrl: sequence << 4,
        }
    }

    pub fn encode(&self) -> [u8; IEEE80211_HDRLEN] {
        let mut buf = BytesMut::with_capacity(IEEE80211_HDRLEN);
        buf.put_u16_le(self.frame_control);
        buf.put_u16_le(self.duration);
        buf.put_slice(&self.addr1);
        buf.put_slice(&self.addr2);
        buf.put_slice(&self.addr3);
        buf.put_u16_le(self.seq_ctrl);

        let mut out = [0u8; IEEE80211_HDRLEN];
        out.copy_from_slice(&buf);
        out
    }
}

fn read_addr(buf: &mut &[u8]) -> [u8; 6] {
    let mut addr = [0u8; 6];
    buf.copy_to_slice(&mut addr);
    addr
}

/// 데이터 프레임 헤더 파싱: (헤더, 프레임 본문)
pub fn parse(buf: &[u8]) -> Result<(DataHeader, &[u8])> {
    if buf.len() < 2 {
        return Err(Error::truncated("802.11", 2, buf.len()));
    }

    let frame_control = u16::from_le_bytes([buf[0], buf[1]]);
    let version = (frame_control & 0x3) as u8;
    let frame_type = ((frame_control >> 2) & 0x3) as u8;
    let subtype = ((frame_control >> 4) & 0xF) as u8;

    if version != 0 {
        return Err(Error::UnsupportedVersion(version));
    }
    if frame_type != FRAME_TYPE_DATA {
        return Err(Error::NotDataFrame(frame_type));
    }
    if subtype != FRAME_SUBTYPE_DATA {
        return Err(Error::UnsupportedSubtype(subtype));
    }
    if buf.len() < IEEE80211_HDRLEN {
        return Err(Error::truncated("802.11", IEEE80211_HDRLEN, buf.len()));
    }

    let mut cur = &buf[2..IEEE80211_HDRLEN];
    let duration = cur.get_u16_le();
    let addr1 = read_addr(&mut cur);
    let addr2 = read_addr(&mut cur);
    let addr3 = read_addr(&mut cur);
    let seq_ctrl = cur.get_u16_le();

    let header = DataHeader {
        frame_control,
        duration,
        addr1,
        addr2,
        addr3,
        seq_ctrl,
    };

    if header.signature() != WFB_SIG {
        return Err(Error::InvalidSignature {
            expected: WFB_SIG,
            got: header.signature(),
        });
    }

    Ok((header, &buf[IEEE80211_HDRLEN..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header() {
        let mut frame = DataHeader::for_channel(0x0012_3401, 77).encode().to_vec();
        frame.extend_from_slice(&[1, 2, 3]);

        let (hdr, rest) = parse(&frame).unwrap();
        assert_eq!(hdr.signature(), WFB_SIG);
        assert_eq!(hdr.channel_id(), 0x0012_3401);
        assert_eq!(hdr.link_id(), 0x1234);
        assert_eq!(hdr.stream_id(), 0x01);
        assert_eq!(hdr.sequence(), 77);
        assert_eq!(rest, &[1, 2, 3]);
    }

    #[test]
    fn test_reject_non_data() {
        let mut frame = DataHeader::for_channel(1, 0).encode();
        // 관리 프레임 (type 0)
        frame[0] = 0x80;
        assert!(matches!(parse(&frame), Err(Error::NotDataFrame(0))));

        // QoS 데이터 서브타입
        frame[0] = 0x88;
        assert!(matches!(parse(&frame), Err(Error::UnsupportedSubtype(8))));

        // 버전 1
        frame[0] = 0x09;
        assert!(matches!(parse(&frame), Err(Error::UnsupportedVersion(1))));
    }

    #[test]
    fn test_reject_signature_and_length() {
        let frame = DataHeader::for_channel(1, 0).encode();
        assert!(matches!(parse(&frame[..20]), Err(Error::Truncated { .. })));
        assert!(matches!(parse(&frame[..1]), Err(Error::Truncated { .. })));

        let mut frame = frame;
        frame[10] = 0x00;
        assert!(matches!(parse(&frame), Err(Error::InvalidSignature { .. })));
    }
}
