//! 링 버퍼 - 블록 슬라이딩 윈도우
//!
//! 모든 프래그먼트 버퍼는 생성 시 하나의 아레나로 할당되고 `(slot, fragment)`로 주소를
//! 계산한다. 윈도우는 `[front, front + alloc)` 범위의 슬롯이며 블록 인덱스는 이 안에서
//! 오름차순을 유지한다. 윈도우 밖 슬롯은 항상 비어 있다.

use crate::error::{Error, Result};

/// 블록 메타데이터
#[derive(Debug, Clone)]
struct BlockState {
    index: Option<u64>,
    fragment_len: Vec<usize>,
    fragment_used: usize,
    fragment_to_send: usize,
}

impl BlockState {
    fn reset(&mut self, index: u64) {
        self.index = Some(index);
        self.fragment_len.fill(0);
        self.fragment_used = 0;
        self.fragment_to_send = 0;
    }
}

/// 한 블록에 대한 가변 뷰
pub struct BlockMut<'a> {
    state: &'a mut BlockState,
    data: &'a mut [u8],
    fragment_size: usize,
}

impl<'a> BlockMut<'a> {
    /// 블록 인덱스 (해제된 블록은 None)
    pub fn index(&self) -> Option<u64> {
        self.state.index
    }

    pub fn fragment_len(&self, fragment_idx: usize) -> usize {
        self.state.fragment_len[fragment_idx]
    }

    pub fn has_fragment(&self, fragment_idx: usize) -> bool {
        self.state.fragment_len[fragment_idx] > 0
    }

    pub fn fragment_used(&self) -> usize {
        self.state.fragment_used
    }

    pub fn fragment_to_send(&self) -> usize {
        self.state.fragment_to_send
    }

    pub fn advance_to_send(&mut self) {
        self.state.fragment_to_send += 1;
    }

    /// 프래그먼트 버퍼 전체 (fragment_size 바이트)
    pub fn fragment(&self, fragment_idx: usize) -> &[u8] {
        let start = fragment_idx * self.fragment_size;
        &self.data[start..start + self.fragment_size]
    }

    /// 프래그먼트 저장
    ///
    /// 남은 꼬리는 0으로 채운다. FEC 연산이 fragment_size 전체를 읽기 때문이다.
    pub fn store(&mut self, fragment_idx: usize, bytes: &[u8]) {
        let start = fragment_idx * self.fragment_size;
        let buf = &mut self.data[start..start + self.fragment_size];
        buf[..bytes.len()].copy_from_slice(bytes);
        buf[bytes.len()..].fill(0);
        self.state.fragment_len[fragment_idx] = bytes.len();
        self.state.fragment_used += 1;
    }

    /// 프래그먼트 버퍼를 각각 분리해 반환 (FEC 입출력 분배용)
    pub fn fragments_mut(&mut self) -> impl Iterator<Item = &mut [u8]> {
        self.data.chunks_mut(self.fragment_size)
    }

    pub fn fragment_size(&self) -> usize {
        self.fragment_size
    }
}

/// 블록 링 버퍼
#[derive(Debug)]
pub struct RingBuffer {
    arena: Vec<u8>,
    blocks: Vec<BlockState>,
    front: usize,
    alloc: usize,
    last_block: Option<u64>,
    fragment_size: usize,
    fragment_nof: usize,
}

impl RingBuffer {
    /// 새 링 버퍼 생성
    ///
    /// 할당 실패는 `ResourceExhausted`로 돌려준다.
    pub fn new(ring_size: usize, fragment_size: usize, fragment_nof: usize) -> Result<Self> {
        if ring_size == 0 || fragment_size == 0 || fragment_nof == 0 {
            return Err(Error::Config("링 버퍼 크기는 0일 수 없음".into()));
        }
        let block_bytes = fragment_size
            .checked_mul(fragment_nof)
            .ok_or(Error::ResourceExhausted("링 버퍼"))?;
        let total = block_bytes
            .checked_mul(ring_size)
            .ok_or(Error::ResourceExhausted("링 버퍼"))?;

        let mut arena = Vec::new();
        arena
            .try_reserve_exact(total)
            .map_err(|_| Error::ResourceExhausted("링 버퍼"))?;
        arena.resize(total, 0);

        let mut blocks = Vec::new();
        blocks
            .try_reserve_exact(ring_size)
            .map_err(|_| Error::ResourceExhausted("링 버퍼"))?;
        blocks.resize(
            ring_size,
            BlockState {
                index: None,
                fragment_len: vec![0; fragment_nof],
                fragment_used: 0,
                fragment_to_send: 0,
            },
        );

        Ok(Self {
            arena,
            blocks,
            front: 0,
            alloc: 0,
            last_block: None,
            fragment_size,
            fragment_nof,
        })
    }

    pub fn ring_size(&self) -> usize {
        self.blocks.len()
    }

    pub fn fragment_size(&self) -> usize {
        self.fragment_size
    }

    pub fn fragment_nof(&self) -> usize {
        self.fragment_nof
    }

    /// 윈도우 안의 블록 수
    pub fn len(&self) -> usize {
        self.alloc
    }

    pub fn is_empty(&self) -> bool {
        self.alloc == 0
    }

    /// 지금까지 할당된 가장 큰 블록 인덱스
    pub fn last_block(&self) -> Option<u64> {
        self.last_block
    }

    /// 윈도우 맨 앞 슬롯
    pub fn front(&self) -> Option<usize> {
        (self.alloc > 0).then_some(self.front)
    }

    pub fn is_front(&self, slot: usize) -> bool {
        self.alloc > 0 && self.front == slot
    }

    /// 윈도우 안에서 블록 인덱스 검색
    pub fn find(&self, block_idx: u64) -> Option<usize> {
        let size = self.blocks.len();
        (0..self.alloc)
            .map(|i| (self.front + i) % size)
            .find(|&slot| self.blocks[slot].index == Some(block_idx))
    }

    /// 윈도우 안 블록 인덱스 목록 (front부터)
    pub fn window(&self) -> Vec<u64> {
        let size = self.blocks.len();
        (0..self.alloc)
            .filter_map(|i| self.blocks[(self.front + i) % size].index)
            .collect()
    }

    pub fn block_mut(&mut self, slot: usize) -> BlockMut<'_> {
        let block_bytes = self.fragment_size * self.fragment_nof;
        let start = slot * block_bytes;
        BlockMut {
            state: &mut self.blocks[slot],
            data: &mut self.arena[start..start + block_bytes],
            fragment_size: self.fragment_size,
        }
    }

    /// 블록 인덱스에 해당하는 슬롯 반환 (필요하면 새로 할당)
    ///
    /// 이미 지나간 인덱스면 None. 새 블록이 윈도우를 넘치면 가장 오래된 블록을
    /// `evict`로 넘겨 비운 뒤 해제한다.
    pub fn get_block<F>(&mut self, block_idx: u64, mut evict: F) -> Option<usize>
    where
        F: FnMut(BlockMut<'_>),
    {
        if let Some(slot) = self.find(block_idx) {
            return Some(slot);
        }

        let size = self.blocks.len();
        let new_blocks = match self.last_block {
            Some(last) if block_idx <= last => return None,
            Some(last) => (block_idx - last).min(size as u64) as usize,
            None => 1,
        };
        let first = block_idx - (new_blocks as u64 - 1);

        let mut slot = self.front;
        for i in 0..new_blocks {
            if self.alloc == size {
                let front = self.front;
                evict(self.block_mut(front));
                self.free_block(front);
            }
            slot = (self.front + self.alloc) % size;
            self.blocks[slot].reset(first + i as u64);
            self.alloc += 1;
        }

        self.last_block = Some(block_idx);
        Some(slot)
    }

    /// 블록 해제 후 front를 다음 살아 있는 블록으로 이동
    pub fn free_block(&mut self, slot: usize) {
        if self.alloc == 0 {
            return;
        }
        self.blocks[slot].index = None;

        let size = self.blocks.len();
        while self.blocks[self.front].index.is_none() {
            self.alloc -= 1;
            if self.alloc == 0 {
                break;
            }
            self.front = (self.front + 1) % size;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_evict(_: BlockMut<'_>) {
        panic!("예상하지 못한 축출");
    }

    #[test]
    fn test_allocate_in_order() {
        let mut ring = RingBuffer::new(4, 8, 3).unwrap();
        let a = ring.get_block(10, no_evict).unwrap();
        let b = ring.get_block(11, no_evict).unwrap();
        assert_ne!(a, b);
        assert!(ring.is_front(a));
        assert_eq!(ring.get_block(10, no_evict), Some(a));
        assert_eq!(ring.window(), vec![10, 11]);
    }

    #[test]
    fn test_out_of_window() {
        let mut ring = RingBuffer::new(4, 8, 3).unwrap();
        let slot = ring.get_block(10, no_evict).unwrap();
        ring.free_block(slot);
        assert!(ring.is_empty());
        assert_eq!(ring.get_block(10, no_evict), None);
        assert_eq!(ring.get_block(9, no_evict), None);
    }

    #[test]
    fn test_gap_allocates_placeholders() {
        let mut ring = RingBuffer::new(8, 8, 3).unwrap();
        ring.get_block(10, no_evict).unwrap();
        let slot = ring.get_block(12, no_evict).unwrap();
        assert_eq!(ring.window(), vec![10, 11, 12]);
        assert_eq!(ring.block_mut(slot).index(), Some(12));
    }

    #[test]
    fn test_free_advances_front() {
        let mut ring = RingBuffer::new(4, 8, 3).unwrap();
        let a = ring.get_block(1, no_evict).unwrap();
        let b = ring.get_block(2, no_evict).unwrap();
        ring.free_block(a);
        assert!(ring.is_front(b));
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn test_far_jump_evicts_oldest() {
        let mut ring = RingBuffer::new(3, 8, 2).unwrap();
        for idx in 0..3 {
            let slot = ring.get_block(idx, no_evict).unwrap();
            ring.block_mut(slot).store(0, &[idx as u8 + 1]);
        }

        let mut evicted = Vec::new();
        let slot = ring
            .get_block(100, |blk| {
                evicted.push((blk.index(), blk.fragment_len(0)));
            })
            .unwrap();

        assert_eq!(evicted, vec![(Some(0), 1), (Some(1), 1), (Some(2), 1)]);
        assert_eq!(ring.window(), vec![98, 99, 100]);
        assert_eq!(ring.block_mut(slot).index(), Some(100));
        assert_eq!(ring.block_mut(slot).fragment_used(), 0);
    }

    #[test]
    fn test_store_zero_pads() {
        let mut ring = RingBuffer::new(1, 8, 2).unwrap();
        let slot = ring.get_block(0, no_evict).unwrap();
        let mut blk = ring.block_mut(slot);
        blk.store(1, &[0xFF; 8]);
        blk.store(0, &[0xAA; 8]);
        let slot2 = {
            ring.free_block(slot);
            ring.get_block(1, no_evict).unwrap()
        };
        // 같은 슬롯 재사용 시 짧은 프래그먼트 뒤에 이전 바이트가 남지 않음
        let mut blk = ring.block_mut(slot2);
        blk.store(1, &[1, 2, 3]);
        assert_eq!(blk.fragment(1), &[1, 2, 3, 0, 0, 0, 0, 0]);
        assert_eq!(blk.fragment_len(0), 0);
        assert_eq!(blk.fragment_used(), 1);
    }

    #[test]
    fn test_zero_sizes_rejected() {
        assert!(RingBuffer::new(0, 8, 2).is_err());
        assert!(RingBuffer::new(2, 8, 0).is_err());
    }
}
