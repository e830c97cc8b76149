//! 프레임 파서 체인
//!
//! 캡처 봉투 → radiotap → 802.11 → WFB. 각 단계는 `parse(&[u8]) -> Result<(헤더, 나머지)>`
//! 형태이고 연결은 호출자가 한다.

pub mod capture;
pub mod ieee80211;
pub mod radiotap;
pub mod wfb;

pub use capture::{Envelope, FrameMeta, MirrorHeader, Source};
pub use ieee80211::DataHeader;
pub use radiotap::RadiotapHeader;
pub use wfb::{FragmentHeader, PacketType, ParsedFrame, SessionData, WfbHeader};

use bincode::Options;

use crate::error::{Error, Result};

/// 고정 길이 big-endian 와이어 인코딩
pub(crate) fn wire_codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_big_endian()
        .allow_trailing_bytes()
}

/// FCS 크기
pub const FCS_LEN: usize = 4;

/// 끝의 FCS를 떼어낸다. `verify`면 CRC-32를 직접 비교해 일치 여부도 돌려준다.
pub fn strip_fcs(frame: &[u8], verify: bool) -> Result<(&[u8], bool)> {
    let len = frame
        .len()
        .checked_sub(FCS_LEN)
        .ok_or(Error::truncated("fcs", FCS_LEN, frame.len()))?;
    let (body, fcs) = frame.split_at(len);
    if !verify {
        return Ok((body, true));
    }
    let expected = u32::from_le_bytes([fcs[0], fcs[1], fcs[2], fcs[3]]);
    Ok((body, crc32fast::hash(body) == expected))
}

/// FCS 계산 (송신측)
pub fn append_fcs(frame: &mut Vec<u8>) {
    let fcs = crc32fast::hash(frame);
    frame.extend_from_slice(&fcs.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fcs() {
        let mut frame = b"802.11 frame body".to_vec();
        append_fcs(&mut frame);

        let (body, ok) = strip_fcs(&frame, true).unwrap();
        assert!(ok);
        assert_eq!(body, b"802.11 frame body");

        frame[0] ^= 0x01;
        let (_, ok) = strip_fcs(&frame, true).unwrap();
        assert!(!ok);
        let (_, ok) = strip_fcs(&frame, false).unwrap();
        assert!(ok);

        assert!(strip_fcs(&[1, 2], false).is_err());
    }
}
