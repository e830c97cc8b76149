//! 송신측 프레이밍
//!
//! 수신기와 같은 와이어 포맷으로 SESSION/DATA 프레임을 만든다. 테스트 데이터 생성과
//! 데모 송신기에서 사용한다.

use rand::RngCore;
use tracing::trace;

use crate::crypto::{DataCipher, LinkKeys, SessionBox, BOX_NONCE_SIZE, KEY_SIZE};
use crate::error::{Error, Result};
use crate::fec::{FecEngine, FecType};
use crate::frame::{append_fcs, radiotap, DataHeader, FragmentHeader, SessionData, WfbHeader};
use crate::frame::wfb::FLAG_FEC_ONLY;
use crate::{FRAGMENT_HDRLEN, MAX_BLOCK_IDX, MAX_PAYLOAD_SIZE};

/// 송신 세션
pub struct TxSession {
    session_box: SessionBox,
    epoch: u64,
    channel_id: u32,
    fec_k: u8,
    fec_n: u8,
    session_key: [u8; KEY_SIZE],
    cipher: DataCipher,
    fec: FecEngine,
    next_block: u64,
}

impl TxSession {
    pub fn new(
        keys: &LinkKeys,
        epoch: u64,
        channel_id: u32,
        fec_k: u8,
        fec_n: u8,
        session_key: [u8; KEY_SIZE],
    ) -> Result<Self> {
        Ok(Self {
            session_box: SessionBox::new(keys),
            epoch,
            channel_id,
            fec_k,
            fec_n,
            session_key,
            cipher: DataCipher::new(&session_key),
            fec: FecEngine::new(fec_k, fec_n)?,
            next_block: 0,
        })
    }

    /// 임의의 세션 키로 생성
    pub fn with_random_key(
        keys: &LinkKeys,
        epoch: u64,
        channel_id: u32,
        fec_k: u8,
        fec_n: u8,
    ) -> Result<Self> {
        let mut session_key = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut session_key);
        Self::new(keys, epoch, channel_id, fec_k, fec_n, session_key)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn channel_id(&self) -> u32 {
        self.channel_id
    }

    pub fn fec_k(&self) -> usize {
        self.fec_k as usize
    }

    pub fn fec_n(&self) -> usize {
        self.fec_n as usize
    }

    /// 현재 세션 파라미터
    pub fn session_data(&self) -> SessionData {
        SessionData {
            epoch: self.epoch,
            channel_id: self.channel_id,
            fec_type: FecType::VdmRs as u8,
            fec_k: self.fec_k,
            fec_n: self.fec_n,
            session_key: self.session_key,
        }
    }

    /// SESSION 프레임 생성 (매번 새 nonce)
    pub fn session_frame(&self) -> Result<Vec<u8>> {
        self.seal_session(&self.session_data())
    }

    /// 임의의 세션 내용을 봉인
    pub fn seal_session(&self, data: &SessionData) -> Result<Vec<u8>> {
        let mut nonce = [0u8; BOX_NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);

        let sealed = self.session_box.seal(&nonce, &data.encode()?)?;
        let mut frame = WfbHeader::Session { nonce }.encode();
        frame.extend_from_slice(&sealed);
        Ok(frame)
    }

    /// 블록 하나를 n개의 DATA 프레임으로 인코딩
    ///
    /// 페이로드가 k개보다 적으면 나머지 데이터 조각은 FEC_ONLY로 채운다.
    pub fn encode_block(&self, block_idx: u64, payloads: &[&[u8]]) -> Result<Vec<Vec<u8>>> {
        let k = self.fec_k();
        let n = self.fec_n();
        if block_idx > MAX_BLOCK_IDX {
            return Err(Error::BlockIndexOverflow(block_idx));
        }
        if payloads.len() > k {
            return Err(Error::Oversized {
                max: k,
                got: payloads.len(),
            });
        }

        let mut plain = Vec::with_capacity(k);
        for i in 0..k {
            let (flags, payload): (u8, &[u8]) = match payloads.get(i) {
                Some(p) => (0, *p),
                None => (FLAG_FEC_ONLY, &[]),
            };
            if payload.len() > MAX_PAYLOAD_SIZE {
                return Err(Error::Oversized {
                    max: MAX_PAYLOAD_SIZE,
                    got: payload.len(),
                });
            }
            let header = FragmentHeader {
                flags,
                packet_size: payload.len() as u16,
            };
            let mut fragment = Vec::with_capacity(FRAGMENT_HDRLEN + payload.len());
            fragment.extend_from_slice(&header.encode()?);
            fragment.extend_from_slice(payload);
            plain.push(fragment);
        }

        let size = plain.iter().map(Vec::len).max().unwrap_or(0);
        let mut parity = vec![vec![0u8; size]; n - k];
        {
            let data: Vec<&[u8]> = plain.iter().map(Vec::as_slice).collect();
            let mut out: Vec<&mut [u8]> = parity.iter_mut().map(Vec::as_mut_slice).collect();
            self.fec.encode(&data, &mut out, size)?;
        }

        let mut frames = Vec::with_capacity(n);
        for (i, fragment) in plain.iter().chain(parity.iter()).enumerate() {
            let nonce = (block_idx << 8) | i as u64;
            let mut frame = WfbHeader::Data {
                nonce,
                block_idx,
                fragment_idx: i as u8,
            }
            .encode();
            let sealed = self.cipher.seal(nonce, &frame, fragment)?;
            frame.extend_from_slice(&sealed);
            frames.push(frame);
        }

        trace!("블록 {} 인코딩: {} 프레임, share {} bytes", block_idx, frames.len(), size);
        Ok(frames)
    }

    /// 다음 블록 인덱스로 인코딩
    pub fn encode_next(&mut self, payloads: &[&[u8]]) -> Result<Vec<Vec<u8>>> {
        let frames = self.encode_block(self.next_block, payloads)?;
        self.next_block += 1;
        Ok(frames)
    }
}

/// WFB 프레임을 radiotap + 802.11 헤더로 감싼 캡처 프레임 생성
pub fn capture_frame(
    channel_id: u32,
    sequence: u16,
    freq: u16,
    dbm: i8,
    wfb: &[u8],
    with_fcs: bool,
) -> Vec<u8> {
    let mut frame = radiotap::encode_rx_header(freq, dbm, with_fcs);
    let radiotap_len = frame.len();
    frame.extend_from_slice(&DataHeader::for_channel(channel_id, sequence).encode());
    frame.extend_from_slice(wfb);
    if with_fcs {
        let mut body = frame.split_off(radiotap_len);
        append_fcs(&mut body);
        frame.extend_from_slice(&body);
    }
    frame
}
