//! Radiotap 헤더 파싱
//!
//! present 비트맵 체인(bit 31)과 radiotap/vendor 네임스페이스 전환(bit 29/30)을 따라가며
//! 필드를 자연 정렬 규칙으로 읽는다. 크기를 모르는 필드를 만나면 거기서 순회를 멈추고
//! 이미 읽은 값만 돌려준다. 헤더 길이를 넘는 필드나 비트맵은 에러다.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Error, Result};
use crate::DBM_INVALID;

/// 고정 헤더 크기 (version, pad, len, present)
pub const RADIOTAP_MIN_LEN: usize = 8;

/// present 비트
pub mod present_flags {
    pub const TSFT: u32 = 0;
    pub const FLAGS: u32 = 1;
    pub const RATE: u32 = 2;
    pub const CHANNEL: u32 = 3;
    pub const FHSS: u32 = 4;
    pub const DBM_ANTSIGNAL: u32 = 5;
    pub const DBM_ANTNOISE: u32 = 6;
    pub const LOCK_QUALITY: u32 = 7;
    pub const TX_ATTENUATION: u32 = 8;
    pub const DB_TX_ATTENUATION: u32 = 9;
    pub const DBM_TX_POWER: u32 = 10;
    pub const ANTENNA: u32 = 11;
    pub const DB_ANTSIGNAL: u32 = 12;
    pub const DB_ANTNOISE: u32 = 13;
    pub const RX_FLAGS: u32 = 14;
    pub const TX_FLAGS: u32 = 15;
    pub const RTS_RETRIES: u32 = 16;
    pub const DATA_RETRIES: u32 = 17;
    pub const XCHANNEL: u32 = 18;
    pub const MCS: u32 = 19;
    pub const AMPDU_STATUS: u32 = 20;
    pub const VHT: u32 = 21;
    pub const TIMESTAMP: u32 = 22;
    pub const HE: u32 = 23;
    pub const HE_MU: u32 = 24;
    pub const HE_MU_OTHER_USER: u32 = 25;
    pub const ZERO_LEN_PSDU: u32 = 26;
    pub const LSIG: u32 = 27;
    pub const RADIOTAP_NAMESPACE: u32 = 29;
    pub const VENDOR_NAMESPACE: u32 = 30;
    pub const EXT: u32 = 31;
}

/// FLAGS 필드 비트
pub mod flags {
    pub const CFP: u8 = 0x01;
    pub const SHORT_PREAMBLE: u8 = 0x02;
    pub const WEP: u8 = 0x04;
    pub const FRAG: u8 = 0x08;
    pub const FCS: u8 = 0x10;
    pub const DATA_PAD: u8 = 0x20;
    pub const BAD_FCS: u8 = 0x40;
    pub const SHORT_GI: u8 = 0x80;
}

/// 필드 (정렬, 크기)
const fn field_layout(field: u32) -> Option<(usize, usize)> {
    use present_flags::*;
    let layout = match field {
        TSFT => (8, 8),
        FLAGS | RATE | DBM_ANTSIGNAL | DBM_ANTNOISE | DBM_TX_POWER | ANTENNA | DB_ANTSIGNAL
        | DB_ANTNOISE | RTS_RETRIES | DATA_RETRIES | ZERO_LEN_PSDU => (1, 1),
        CHANNEL | LSIG => (2, 4),
        FHSS | LOCK_QUALITY | TX_ATTENUATION | DB_TX_ATTENUATION | RX_FLAGS | TX_FLAGS => (2, 2),
        XCHANNEL | AMPDU_STATUS => (4, 8),
        MCS => (1, 3),
        VHT | HE | HE_MU => (2, 12),
        HE_MU_OTHER_USER => (2, 6),
        TIMESTAMP => (8, 12),
        _ => return None,
    };
    Some(layout)
}

fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) & !(align - 1)
}

/// MCS 정보
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct McsInfo {
    pub known: u8,
    pub flags: u8,
    pub index: u8,
}

/// 파싱된 radiotap 메타데이터
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RadiotapHeader {
    /// 헤더 전체 길이 (it_len)
    pub length: usize,
    pub tsft: Option<u64>,
    pub flags: u8,
    pub rate: Option<u8>,
    pub channel_freq: Option<u16>,
    pub channel_flags: Option<u16>,
    pub dbm_signal: Option<i8>,
    pub dbm_noise: Option<i8>,
    pub antenna: Option<u8>,
    pub rx_flags: Option<u16>,
    pub mcs: Option<McsInfo>,
}

impl RadiotapHeader {
    /// 프레임 끝에 FCS 4바이트가 붙어 있음
    pub fn has_fcs(&self) -> bool {
        self.flags & flags::FCS != 0
    }

    /// 드라이버가 FCS 오류를 보고함
    pub fn bad_fcs(&self) -> bool {
        self.flags & flags::BAD_FCS != 0
    }

    /// 신호 세기 (없으면 DBM_INVALID)
    pub fn dbm(&self) -> i16 {
        self.dbm_signal.map(i16::from).unwrap_or(DBM_INVALID)
    }

    pub fn freq(&self) -> u16 {
        self.channel_freq.unwrap_or(0)
    }

    fn apply(&mut self, field: u32, mut data: &[u8]) {
        use present_flags::*;
        match field {
            TSFT => self.tsft = Some(data.get_u64_le()),
            FLAGS => self.flags = data.get_u8(),
            RATE => self.rate = Some(data.get_u8()),
            CHANNEL => {
                self.channel_freq = Some(data.get_u16_le());
                self.channel_flags = Some(data.get_u16_le());
            }
            // 안테나별 값이 뒤따르는 경우 첫 값(합성값)만 사용
            DBM_ANTSIGNAL => {
                self.dbm_signal.get_or_insert(data.get_i8());
            }
            DBM_ANTNOISE => {
                self.dbm_noise.get_or_insert(data.get_i8());
            }
            ANTENNA => {
                self.antenna.get_or_insert(data.get_u8());
            }
            RX_FLAGS => self.rx_flags = Some(data.get_u16_le()),
            MCS => {
                self.mcs = Some(McsInfo {
                    known: data.get_u8(),
                    flags: data.get_u8(),
                    index: data.get_u8(),
                })
            }
            _ => {}
        }
    }
}

enum Namespace {
    Radiotap { base: u32 },
    Vendor,
}

/// radiotap 헤더 파싱: (메타데이터, 802.11 프레임)
pub fn parse(buf: &[u8]) -> Result<(RadiotapHeader, &[u8])> {
    if buf.len() < RADIOTAP_MIN_LEN {
        return Err(Error::truncated("radiotap", RADIOTAP_MIN_LEN, buf.len()));
    }

    let mut fixed = &buf[..4];
    let version = fixed.get_u8();
    let _pad = fixed.get_u8();
    let it_len = fixed.get_u16_le() as usize;

    if version != 0 {
        return Err(Error::Radiotap("지원하지 않는 버전"));
    }
    if it_len < RADIOTAP_MIN_LEN {
        return Err(Error::Radiotap("헤더 길이가 너무 짧음"));
    }
    if it_len > buf.len() {
        return Err(Error::truncated("radiotap", it_len, buf.len()));
    }

    let header = &buf[..it_len];
    let word_at = |offset: usize| {
        let mut b = &header[offset..offset + 4];
        b.get_u32_le()
    };

    // present 비트맵 체인 끝 찾기
    let mut bitmaps_end = 4;
    loop {
        if bitmaps_end + 4 > it_len {
            return Err(Error::Radiotap("present 비트맵이 헤더를 넘음"));
        }
        let word = word_at(bitmaps_end);
        bitmaps_end += 4;
        if word & (1 << present_flags::EXT) == 0 {
            break;
        }
    }

    let mut out = RadiotapHeader {
        length: it_len,
        ..Default::default()
    };
    let mut ns = Namespace::Radiotap { base: 0 };
    let mut offset = bitmaps_end;

    'words: for word_offset in (4..bitmaps_end).step_by(4) {
        let word = word_at(word_offset);

        if let Namespace::Radiotap { base } = ns {
            for bit in 0..present_flags::RADIOTAP_NAMESPACE {
                if word & (1 << bit) == 0 {
                    continue;
                }
                let field = base + bit;
                let Some((align, size)) = field_layout(field) else {
                    // 크기를 모르면 뒤 필드 위치도 알 수 없음
                    break 'words;
                };
                offset = align_up(offset, align);
                if offset + size > it_len {
                    return Err(Error::Radiotap("필드가 헤더를 넘음"));
                }
                out.apply(field, &header[offset..offset + size]);
                offset += size;
            }
        }

        if word & (1 << present_flags::EXT) == 0 {
            break;
        }
        if word & (1 << present_flags::RADIOTAP_NAMESPACE) != 0 {
            ns = Namespace::Radiotap { base: 0 };
        } else if word & (1 << present_flags::VENDOR_NAMESPACE) != 0 {
            // OUI(3) + sub namespace(1) + skip_length(2)
            offset = align_up(offset, 2);
            if offset + 6 > it_len {
                return Err(Error::Radiotap("vendor 네임스페이스 헤더가 잘림"));
            }
            let mut vendor = &header[offset + 4..offset + 6];
            let skip = vendor.get_u16_le() as usize;
            offset += 6 + skip;
            if offset > it_len {
                return Err(Error::Radiotap("vendor 데이터가 헤더를 넘음"));
            }
            ns = Namespace::Vendor;
        } else if let Namespace::Radiotap { base } = ns {
            ns = Namespace::Radiotap { base: base + 32 };
        }
    }

    Ok((out, &buf[it_len..]))
}

/// 수신 프레임용 최소 radiotap 헤더 생성 (FLAGS, CHANNEL, DBM_ANTSIGNAL)
pub fn encode_rx_header(freq: u16, dbm: i8, with_fcs: bool) -> Vec<u8> {
    const LEN: u16 = 15;
    let present = (1u32 << present_flags::FLAGS)
        | (1 << present_flags::CHANNEL)
        | (1 << present_flags::DBM_ANTSIGNAL);

    let mut buf = BytesMut::with_capacity(LEN as usize);
    buf.put_u8(0); // version
    buf.put_u8(0); // pad
    buf.put_u16_le(LEN);
    buf.put_u32_le(present);
    buf.put_u8(if with_fcs { flags::FCS } else { 0 });
    buf.put_u8(0); // CHANNEL 정렬
    buf.put_u16_le(freq);
    buf.put_u16_le(0x0140); // OFDM 5GHz
    buf.put_i8(dbm);
    buf.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal() {
        let mut frame = encode_rx_header(5805, -42, true);
        frame.extend_from_slice(b"payload");

        let (hdr, rest) = parse(&frame).unwrap();
        assert_eq!(hdr.length, 15);
        assert_eq!(hdr.freq(), 5805);
        assert_eq!(hdr.dbm(), -42);
        assert!(hdr.has_fcs());
        assert!(!hdr.bad_fcs());
        assert_eq!(rest, b"payload");
    }

    #[test]
    fn test_alignment_and_extended_bitmap() {
        use present_flags::*;
        let w0 = (1u32 << TSFT)
            | (1 << FLAGS)
            | (1 << CHANNEL)
            | (1 << DBM_ANTSIGNAL)
            | (1 << RADIOTAP_NAMESPACE)
            | (1 << EXT);
        let w1 = (1u32 << DBM_ANTSIGNAL) | (1 << ANTENNA);

        let mut buf = BytesMut::new();
        buf.put_u8(0);
        buf.put_u8(0);
        buf.put_u16_le(33);
        buf.put_u32_le(w0);
        buf.put_u32_le(w1);
        buf.put_u32_le(0); // TSFT 8바이트 정렬 패딩
        buf.put_u64_le(0x1122_3344_5566_7788);
        buf.put_u8(flags::BAD_FCS);
        buf.put_u8(0); // 패딩
        buf.put_u16_le(2412);
        buf.put_u16_le(0x00A0);
        buf.put_i8(-60); // 합성 신호
        buf.put_i8(-70); // 안테나 0 신호
        buf.put_u8(1); // 안테나 번호
        assert_eq!(buf.len(), 33);

        let (hdr, rest) = parse(&buf).unwrap();
        assert!(rest.is_empty());
        assert_eq!(hdr.tsft, Some(0x1122_3344_5566_7788));
        assert!(hdr.bad_fcs());
        assert_eq!(hdr.freq(), 2412);
        assert_eq!(hdr.dbm(), -60);
        assert_eq!(hdr.antenna, Some(1));
    }

    #[test]
    fn test_vendor_namespace_skipped() {
        use present_flags::*;
        let w0 = (1u32 << FLAGS) | (1 << VENDOR_NAMESPACE) | (1 << EXT);
        let w1 = 0x1u32;

        let mut buf = BytesMut::new();
        buf.put_u8(0);
        buf.put_u8(0);
        buf.put_u16_le(24);
        buf.put_u32_le(w0);
        buf.put_u32_le(w1);
        buf.put_u8(flags::FCS);
        buf.put_u8(0); // vendor 헤더 정렬
        buf.put_slice(&[0x00, 0x11, 0x22, 0x01]);
        buf.put_u16_le(4);
        buf.put_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(buf.len(), 24);

        let (hdr, _) = parse(&buf).unwrap();
        assert!(hdr.has_fcs());
        assert_eq!(hdr.dbm(), DBM_INVALID);
    }

    #[test]
    fn test_unknown_field_stops_iteration() {
        let present = (1u32 << present_flags::FLAGS) | (1 << 28);
        let mut buf = BytesMut::new();
        buf.put_u8(0);
        buf.put_u8(0);
        buf.put_u16_le(12);
        buf.put_u32_le(present);
        buf.put_u8(flags::FCS);
        buf.put_slice(&[0xFF; 3]);

        let (hdr, _) = parse(&buf).unwrap();
        assert!(hdr.has_fcs());
    }

    #[test]
    fn test_malformed() {
        // 너무 짧음
        assert!(matches!(parse(&[0, 0, 8]), Err(Error::Truncated { .. })));

        // it_len이 버퍼보다 큼
        let mut frame = encode_rx_header(2412, -50, false);
        frame[2] = 64;
        assert!(matches!(parse(&frame), Err(Error::Truncated { .. })));

        // 필드가 헤더를 넘음
        let mut frame = encode_rx_header(2412, -50, false);
        frame[2] = 12;
        assert!(matches!(parse(&frame), Err(Error::Radiotap(_))));

        // 버전 오류
        let mut frame = encode_rx_header(2412, -50, false);
        frame[0] = 1;
        assert!(matches!(parse(&frame), Err(Error::Radiotap(_))));

        // EXT 체인이 헤더를 넘음
        let mut buf = BytesMut::new();
        buf.put_u8(0);
        buf.put_u8(0);
        buf.put_u16_le(8);
        buf.put_u32_le(1 << present_flags::EXT);
        assert!(matches!(parse(&buf), Err(Error::Radiotap(_))));
    }
}
