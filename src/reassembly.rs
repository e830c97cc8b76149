//! 데이터 재조립
//!
//! - 조각 인증/복호화 후 링 버퍼 슬롯에 저장
//! - front 블록은 도착 즉시 순서대로 전달 (cut-through)
//! - 더 새로운 블록이 오면 앞선 미완성 블록은 있는 것만 전달하고 포기
//! - 정확히 k개가 모이면 FEC로 누락 데이터 조각 복원
//!
//! 전달 순서는 `(block_idx, fragment_idx)` 기준으로 감소하지 않으며 같은 조각을 두 번
//! 전달하지 않는다. 패리티 조각(`fragment_idx >= k`)은 전달하지 않는다.

use tracing::{debug, trace, warn};

use crate::crypto::{DataCipher, TAG_SIZE};
use crate::error::{Error, Result};
use crate::fec::FecEngine;
use crate::frame::FragmentHeader;
use crate::ring::{BlockMut, RingBuffer};
use crate::stats::RxStats;
use crate::{FRAGMENT_HDRLEN, MAX_BLOCK_IDX, MAX_DATA_PACKET_SIZE, MAX_PAYLOAD_SIZE, MIN_DATA_CIPHER_LEN};

/// 디코드 콜백으로 넘어가는 조각
#[derive(Debug, Clone, Copy)]
pub struct Delivery<'a> {
    pub block_idx: u64,
    pub fragment_idx: u8,
    /// flags/size 헤더를 뺀 페이로드
    pub payload: &'a [u8],
    /// FEC로 복구된 조각
    pub recovered: bool,
}

/// 인증 전 DATA 프레임
#[derive(Debug, Clone, Copy)]
pub struct DataFrame<'a> {
    /// 와이어 nonce (block_idx << 8 | fragment_idx)
    pub nonce: u64,
    pub block_idx: u64,
    pub fragment_idx: u8,
    /// 평문 WFB 헤더 (연관 데이터)
    pub aad: &'a [u8],
    /// 암호문 + 태그
    pub cipher: &'a [u8],
}

/// 조각 처리 결과 (에러 아님)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataOutcome {
    /// 저장 후 플러시 알고리즘 실행
    Accepted,
    /// 이미 받은 조각
    Duplicate,
    /// 이미 지나간 블록
    OutOfWindow,
    /// 세션 키 없음
    NoSession,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendMode {
    /// 도착한 조각까지만 전달
    CutThrough,
    /// 누락 조각은 포기하고 끝까지 진행
    Stale,
    /// FEC 복구 후 전부 전달
    Recovered,
}

/// 전달 경로 상태 (링 버퍼와 분리해 동시에 빌릴 수 있게 함)
struct Output<'s, E> {
    fec_k: usize,
    last_seq: &'s mut Option<u64>,
    stats: &'s mut RxStats,
    emit: &'s mut E,
}

impl<'s, E> Output<'s, E>
where
    E: FnMut(&Delivery<'_>),
{
    fn send_block(&mut self, blk: &mut BlockMut<'_>, mode: SendMode) {
        while blk.fragment_to_send() < self.fec_k {
            let i = blk.fragment_to_send();
            if blk.has_fragment(i) || mode == SendMode::Recovered {
                self.send_one(blk, i, mode == SendMode::Recovered && !blk.has_fragment(i));
            } else if mode == SendMode::Stale {
                self.stats.fragments_lost += 1;
            } else {
                break;
            }
            blk.advance_to_send();
        }
    }

    fn send_one(&mut self, blk: &BlockMut<'_>, fragment_idx: usize, recovered: bool) {
        let Some(block_idx) = blk.index() else {
            return;
        };

        let seq = block_idx * self.fec_k as u64 + fragment_idx as u64;
        if let Some(last) = *self.last_seq {
            if seq > last + 1 {
                debug!("누락 프레임: {} 개 (seq {} -> {})", seq - last - 1, last, seq);
            }
        }
        *self.last_seq = Some(seq);

        let fragment = blk.fragment(fragment_idx);
        let header = match FragmentHeader::decode(fragment) {
            Ok(header) => header,
            Err(_) => return,
        };
        if header.is_fec_only() {
            return;
        }

        let size = header.packet_size as usize;
        if size > MAX_PAYLOAD_SIZE || FRAGMENT_HDRLEN + size > fragment.len() {
            debug!(
                "잘못된 packet_size: block={}, fragment={}, size={}",
                block_idx, fragment_idx, size
            );
            return;
        }

        let payload = &fragment[FRAGMENT_HDRLEN..FRAGMENT_HDRLEN + size];
        self.stats.decoded_frames += 1;
        self.stats.decoded_bytes += size as u64;
        (self.emit)(&Delivery {
            block_idx,
            fragment_idx: fragment_idx as u8,
            payload,
            recovered,
        });
    }
}

/// 한 세션의 재조립 상태
pub struct Reassembly {
    cipher: DataCipher,
    fec: FecEngine,
    ring: RingBuffer,
    fec_k: usize,
    fec_n: usize,
    /// 복호화 작업 버퍼 (세션 동안 재사용)
    scratch: Vec<u8>,
    /// FEC 인덱스 작업 버퍼
    indices: Vec<usize>,
    missing: Vec<usize>,
    last_seq: Option<u64>,
}

impl std::fmt::Debug for Reassembly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reassembly")
            .field("fec_k", &self.fec_k)
            .field("fec_n", &self.fec_n)
            .field("window", &self.ring.window())
            .finish()
    }
}

impl Reassembly {
    /// 세션 키, FEC 엔진, 링 버퍼를 한 번에 준비
    ///
    /// 어느 하나라도 할당에 실패하면 아무것도 만들지 않는다.
    pub fn new(
        session_key: &[u8; crate::crypto::KEY_SIZE],
        fec_k: u8,
        fec_n: u8,
        ring_size: usize,
        fragment_size: usize,
    ) -> Result<Self> {
        let fec = FecEngine::new(fec_k, fec_n)?;
        let ring = RingBuffer::new(ring_size, fragment_size, fec_n as usize)?;

        let mut scratch = Vec::new();
        scratch
            .try_reserve_exact(MAX_DATA_PACKET_SIZE)
            .map_err(|_| Error::ResourceExhausted("복호화 버퍼"))?;
        let mut indices = Vec::new();
        let mut missing = Vec::new();
        indices
            .try_reserve_exact(fec_k as usize)
            .and_then(|_| missing.try_reserve_exact(fec_k as usize))
            .map_err(|_| Error::ResourceExhausted("FEC 인덱스"))?;

        Ok(Self {
            cipher: DataCipher::new(session_key),
            fec,
            ring,
            fec_k: fec_k as usize,
            fec_n: fec_n as usize,
            scratch,
            indices,
            missing,
            last_seq: None,
        })
    }

    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }

    /// DATA 조각 처리
    ///
    /// 인증 실패는 `Error::Crypto`로 돌려주며 호출자는 세션을 무효화해야 한다.
    /// 인증 전에는 링 버퍼를 건드리지 않는다.
    pub fn rx_data<E>(
        &mut self,
        frame: &DataFrame<'_>,
        fec_enabled: bool,
        stats: &mut RxStats,
        mut emit: E,
    ) -> Result<DataOutcome>
    where
        E: FnMut(&Delivery<'_>),
    {
        if frame.cipher.len() < MIN_DATA_CIPHER_LEN {
            return Err(Error::truncated(
                "data cipher",
                MIN_DATA_CIPHER_LEN,
                frame.cipher.len(),
            ));
        }
        if frame.block_idx > MAX_BLOCK_IDX {
            return Err(Error::BlockIndexOverflow(frame.block_idx));
        }
        if frame.fragment_idx as usize >= self.fec_n {
            return Err(Error::FragmentIndexOverflow {
                fragment_idx: frame.fragment_idx,
                fec_n: self.fec_n as u8,
            });
        }
        let plain_len = frame.cipher.len() - TAG_SIZE;
        if plain_len > self.ring.fragment_size() {
            return Err(Error::Oversized {
                max: self.ring.fragment_size() + TAG_SIZE,
                got: frame.cipher.len(),
            });
        }

        self.scratch.clear();
        self.scratch.extend_from_slice(frame.cipher);
        let len = self
            .cipher
            .open_in_place(frame.nonce, frame.aad, &mut self.scratch)?;

        let mut out = Output {
            fec_k: self.fec_k,
            last_seq: &mut self.last_seq,
            stats,
            emit: &mut emit,
        };

        let Some(slot) = self
            .ring
            .get_block(frame.block_idx, |mut evicted| out.send_block(&mut evicted, SendMode::Stale))
        else {
            trace!("윈도우 밖 조각: block={}", frame.block_idx);
            out.stats.out_of_window += 1;
            return Ok(DataOutcome::OutOfWindow);
        };

        let fragment_idx = frame.fragment_idx as usize;
        let mut blk = self.ring.block_mut(slot);
        if blk.has_fragment(fragment_idx) {
            out.stats.duplicates += 1;
            return Ok(DataOutcome::Duplicate);
        }
        blk.store(fragment_idx, &self.scratch[..len]);

        // 앞선 블록 정리: 이 블록이 front가 될 때까지 있는 것만 전달하고 해제
        while let Some(front) = self.ring.front() {
            if front == slot {
                break;
            }
            out.send_block(&mut self.ring.block_mut(front), SendMode::Stale);
            self.ring.free_block(front);
        }

        let mut blk = self.ring.block_mut(slot);
        out.send_block(&mut blk, SendMode::CutThrough);
        if blk.fragment_to_send() == self.fec_k {
            // 블록 완료, 남은 패리티는 버림
            self.ring.free_block(slot);
            return Ok(DataOutcome::Accepted);
        }

        if fec_enabled && blk.fragment_used() == self.fec_k {
            let recovered = recover_block(
                &mut self.fec,
                &mut blk,
                self.fec_k,
                &mut self.indices,
                &mut self.missing,
            );
            match recovered {
                Ok(count) => {
                    out.stats.fec_recoveries += 1;
                    out.stats.fragments_recovered += count as u64;
                    out.send_block(&mut blk, SendMode::Recovered);
                }
                Err(e) => {
                    warn!("FEC 복구 실패: {}", e);
                    out.send_block(&mut blk, SendMode::Stale);
                    self.ring.free_block(slot);
                    return Err(e);
                }
            }
            self.ring.free_block(slot);
        }

        Ok(DataOutcome::Accepted)
    }
}

/// 누락 데이터 조각을 FEC로 복원하고 복원한 개수를 돌려준다
///
/// 데이터 위치는 원래 인덱스 그대로, 빈 위치는 도착한 패리티로 차례대로 채운다.
fn recover_block(
    fec: &mut FecEngine,
    blk: &mut BlockMut<'_>,
    fec_k: usize,
    indices: &mut Vec<usize>,
    missing: &mut Vec<usize>,
) -> Result<usize> {
    indices.clear();
    missing.clear();

    let mut parity = fec_k;
    let mut size = 0;
    for i in 0..fec_k {
        let idx = if blk.has_fragment(i) {
            i
        } else {
            while parity < fec.n() && !blk.has_fragment(parity) {
                parity += 1;
            }
            if parity >= fec.n() {
                return Err(Error::Fec("패리티 조각 부족"));
            }
            missing.push(i);
            parity += 1;
            parity - 1
        };
        size = size.max(blk.fragment_len(idx));
        indices.push(idx);
    }
    if missing.is_empty() {
        return Ok(0);
    }

    let mut fragments: Vec<&mut [u8]> = blk.fragments_mut().collect();
    let mut outputs: Vec<&mut [u8]> = missing
        .iter()
        .map(|&i| std::mem::take(&mut fragments[i]))
        .collect();
    let inputs: Vec<&[u8]> = indices.iter().map(|&j| &*fragments[j]).collect();

    fec.decode(&inputs, indices, &mut outputs, size)?;
    debug!("FEC 복구: {:?} (share {} bytes)", missing, size);
    Ok(missing.len())
}
