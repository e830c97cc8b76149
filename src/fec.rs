//! Reed-Solomon 소거 부호 엔진
//!
//! GF(2^8) (x^8 + x^4 + x^3 + x^2 + 1) 위의 체계적 Vandermonde 부호.
//! 부호화 행렬의 상위 k행은 단위 행렬이므로 데이터 조각은 그대로 전송되고,
//! 하위 n-k행이 패리티 조각을 만든다. 임의의 k개 조각으로 나머지 데이터 조각을 복원한다.
//!
//! 호출자는 `size`보다 짧은 조각을 미리 0으로 채워야 한다.

use crate::error::{Error, Result};

/// 원시 다항식 (0x11D)
const GF_POLY: u16 = 0x11D;

const fn build_tables() -> ([u8; 512], [u8; 256]) {
    let mut exp = [0u8; 512];
    let mut log = [0u8; 256];
    let mut x: u16 = 1;
    let mut i = 0;
    while i < 255 {
        exp[i] = x as u8;
        log[x as usize] = i as u8;
        x <<= 1;
        if x & 0x100 != 0 {
            x ^= GF_POLY;
        }
        i += 1;
    }
    // log[a] + log[b] <= 508 이므로 테이블을 두 번 펼쳐 mod 연산을 없앤다
    while i < 512 {
        exp[i] = exp[i - 255];
        i += 1;
    }
    (exp, log)
}

const TABLES: ([u8; 512], [u8; 256]) = build_tables();
static GF_EXP: [u8; 512] = TABLES.0;
static GF_LOG: [u8; 256] = TABLES.1;

#[inline]
fn gf_mul(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        return 0;
    }
    GF_EXP[GF_LOG[a as usize] as usize + GF_LOG[b as usize] as usize]
}

#[inline]
fn gf_inv(a: u8) -> u8 {
    debug_assert!(a != 0);
    GF_EXP[255 - GF_LOG[a as usize] as usize]
}

/// dst[i] ^= c * src[i]
fn gf_mul_add(dst: &mut [u8], src: &[u8], c: u8) {
    match c {
        0 => {}
        1 => dst.iter_mut().zip(src).for_each(|(d, s)| *d ^= s),
        _ => {
            let log_c = GF_LOG[c as usize] as usize;
            for (d, &s) in dst.iter_mut().zip(src) {
                if s != 0 {
                    *d ^= GF_EXP[log_c + GF_LOG[s as usize] as usize];
                }
            }
        }
    }
}

/// k x k 행렬 역행렬 (Gauss-Jordan), 결과는 `inv`에 기록
fn invert_matrix(m: &mut [u8], inv: &mut [u8], k: usize) -> Result<()> {
    inv.fill(0);
    for i in 0..k {
        inv[i * k + i] = 1;
    }

    for col in 0..k {
        let pivot = (col..k)
            .find(|&r| m[r * k + col] != 0)
            .ok_or(Error::Fec("특이 행렬"))?;
        if pivot != col {
            for c in 0..k {
                m.swap(pivot * k + c, col * k + c);
                inv.swap(pivot * k + c, col * k + c);
            }
        }

        let scale = gf_inv(m[col * k + col]);
        for c in 0..k {
            m[col * k + c] = gf_mul(m[col * k + c], scale);
            inv[col * k + c] = gf_mul(inv[col * k + c], scale);
        }

        for r in 0..k {
            let factor = m[r * k + col];
            if r == col || factor == 0 {
                continue;
            }
            for c in 0..k {
                m[r * k + c] ^= gf_mul(factor, m[col * k + c]);
                inv[r * k + c] ^= gf_mul(factor, inv[col * k + c]);
            }
        }
    }
    Ok(())
}

fn alloc_zeroed(len: usize, what: &'static str) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| Error::ResourceExhausted(what))?;
    buf.resize(len, 0);
    Ok(buf)
}

/// 지원하는 FEC 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FecType {
    /// Vandermonde Reed-Solomon
    VdmRs = 1,
}

impl TryFrom<u8> for FecType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(FecType::VdmRs),
            other => Err(Error::UnsupportedFecType(other)),
        }
    }
}

/// (k, n) 소거 부호 엔진
pub struct FecEngine {
    k: usize,
    n: usize,
    /// n x k 부호화 행렬 (상위 k행 = 단위 행렬)
    enc: Vec<u8>,
    /// 복호 행렬 작업 공간
    matrix: Vec<u8>,
    inverse: Vec<u8>,
}

impl std::fmt::Debug for FecEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FecEngine")
            .field("k", &self.k)
            .field("n", &self.n)
            .finish()
    }
}

impl FecEngine {
    /// 새 엔진 생성 (1 <= k <= n)
    pub fn new(k: u8, n: u8) -> Result<Self> {
        if k == 0 || k > n {
            return Err(Error::InvalidFecParams { k, n });
        }
        let (k, n) = (k as usize, n as usize);

        // Vandermonde: 0행 = [1, 0, ...], r+1행 = alpha^(r*c)
        let mut vdm = alloc_zeroed(n * k, "FEC 부호화 행렬")?;
        vdm[0] = 1;
        for r in 0..n - 1 {
            for c in 0..k {
                vdm[(r + 1) * k + c] = GF_EXP[(r * c) % 255];
            }
        }

        let mut top = vdm[..k * k].to_vec();
        let mut top_inv = alloc_zeroed(k * k, "FEC 부호화 행렬")?;
        invert_matrix(&mut top, &mut top_inv, k)?;

        let mut enc = alloc_zeroed(n * k, "FEC 부호화 행렬")?;
        for i in 0..k {
            enc[i * k + i] = 1;
        }
        for r in k..n {
            for c in 0..k {
                let mut acc = 0u8;
                for j in 0..k {
                    acc ^= gf_mul(vdm[r * k + j], top_inv[j * k + c]);
                }
                enc[r * k + c] = acc;
            }
        }

        Ok(Self {
            k,
            n,
            enc,
            matrix: alloc_zeroed(k * k, "FEC 작업 공간")?,
            inverse: alloc_zeroed(k * k, "FEC 작업 공간")?,
        })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn n(&self) -> usize {
        self.n
    }

    /// 패리티 조각 생성
    ///
    /// `parity[j]`는 조각 인덱스 `k + j`에 해당한다. `size`보다 짧은 데이터 조각은
    /// 뒤쪽이 0인 것으로 취급한다.
    pub fn encode(&self, data: &[&[u8]], parity: &mut [&mut [u8]], size: usize) -> Result<()> {
        if data.len() != self.k || parity.len() > self.n - self.k {
            return Err(Error::Fec("조각 개수 불일치"));
        }
        for (j, out) in parity.iter_mut().enumerate() {
            let out = out.get_mut(..size).ok_or(Error::Fec("출력 버퍼 부족"))?;
            out.fill(0);
            let row = &self.enc[(self.k + j) * self.k..(self.k + j + 1) * self.k];
            for (src, &coef) in data.iter().zip(row) {
                let len = src.len().min(size);
                gf_mul_add(&mut out[..len], &src[..len], coef);
            }
        }
        Ok(())
    }

    /// 누락 데이터 조각 복원
    ///
    /// `inputs`는 정확히 k개이며 `indices[i]`는 원래 조각 인덱스다. 데이터 조각은 자기
    /// 위치(`indices[i] == i`)에 있어야 하고, 누락 위치에는 패리티 조각을 넣는다.
    /// `outputs`는 누락된 데이터 위치를 오름차순으로 받는다.
    pub fn decode(
        &mut self,
        inputs: &[&[u8]],
        indices: &[usize],
        outputs: &mut [&mut [u8]],
        size: usize,
    ) -> Result<()> {
        let k = self.k;
        if inputs.len() != k || indices.len() != k {
            return Err(Error::Fec("입력 조각 개수 불일치"));
        }
        if inputs.iter().any(|share| share.len() < size) {
            return Err(Error::Fec("조각이 size보다 짧음 (0 패딩 필요)"));
        }

        let mut missing = 0;
        for (i, &idx) in indices.iter().enumerate() {
            if idx >= self.n || (idx < k && idx != i) {
                return Err(Error::Fec("잘못된 조각 인덱스"));
            }
            if idx >= k {
                missing += 1;
            }
            self.matrix[i * k..(i + 1) * k].copy_from_slice(&self.enc[idx * k..(idx + 1) * k]);
        }
        if outputs.len() != missing {
            return Err(Error::Fec("출력 조각 개수 불일치"));
        }
        if missing == 0 {
            return Ok(());
        }

        invert_matrix(&mut self.matrix, &mut self.inverse, k)?;

        let mut outputs = outputs.iter_mut();
        for (i, &idx) in indices.iter().enumerate() {
            if idx < k {
                continue;
            }
            let out = outputs.next().ok_or(Error::Fec("출력 조각 개수 불일치"))?;
            let out = out.get_mut(..size).ok_or(Error::Fec("출력 버퍼 부족"))?;
            out.fill(0);
            let row = &self.inverse[i * k..(i + 1) * k];
            for (src, &coef) in inputs.iter().zip(row) {
                gf_mul_add(out, &src[..size], coef);
            }
        }
        Ok(())
    }
}
