//! 암호화 모듈 - 봉인 박스(X25519 + XSalsa20-Poly1305) + ChaCha20-Poly1305 AEAD
//!
//! 흐름:
//! 1. 지상국/기체가 각자 장기 X25519 키쌍 보유 (키 파일: 자신의 비밀키 + 상대 공개키)
//! 2. 송신측이 SESSION 프레임에 세션 키를 봉인 박스로 담아 주기적으로 방송
//! 3. 수신측이 장기 키로 열어 세션 키 설치
//! 4. DATA 조각은 세션 키 + ChaCha20-Poly1305로 인증/복호화

use std::path::Path;

use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    ChaCha20Poly1305, Key, Nonce, Tag,
};
use crypto_box::{aead::generic_array::GenericArray, aead::Aead, SalsaBox};
use rand_core::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::{Error, Result};

/// X25519 키 크기 (32 bytes)
pub const KEY_SIZE: usize = 32;

/// 키 파일 크기: 비밀키 + 상대 공개키
pub const KEY_FILE_SIZE: usize = KEY_SIZE * 2;

/// ChaCha20-Poly1305 nonce 크기 (12 bytes)
pub const NONCE_SIZE: usize = 12;

/// ChaCha20-Poly1305 태그 크기 (16 bytes)
pub const TAG_SIZE: usize = 16;

/// 봉인 박스 nonce 크기 (24 bytes)
pub const BOX_NONCE_SIZE: usize = 24;

/// 봉인 박스 MAC 크기 (16 bytes)
pub const BOX_MAC_SIZE: usize = 16;

/// 암호화 오류
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("세션 복호화 실패: 키쌍 불일치 또는 손상된 프레임")]
    SessionOpenFailed,
    #[error("데이터 인증 실패")]
    DataAuthFailed,
    #[error("암호화 실패")]
    SealFailed,
    #[error("잘못된 크기: expected {expected}, got {got}")]
    InvalidLength { expected: usize, got: usize },
}

/// 장기 키쌍
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    /// 새 키쌍 생성
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// 비밀키 바이트로 복원
    pub fn from_secret(secret: [u8; KEY_SIZE]) -> Self {
        let secret = StaticSecret::from(secret);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// 공개키를 바이트로 변환
    pub fn public_key_bytes(&self) -> [u8; KEY_SIZE] {
        *self.public.as_bytes()
    }

    /// 비밀키를 바이트로 변환
    pub fn secret_key_bytes(&self) -> [u8; KEY_SIZE] {
        self.secret.to_bytes()
    }

    /// 상대 공개키와 묶어 링크 키 생성
    pub fn link_keys(&self, peer_public: [u8; KEY_SIZE]) -> LinkKeys {
        LinkKeys {
            secret: self.secret_key_bytes(),
            peer_public,
        }
    }
}

/// 키 파일 내용: 자신의 비밀키 + 상대 공개키
#[derive(Clone)]
pub struct LinkKeys {
    secret: [u8; KEY_SIZE],
    peer_public: [u8; KEY_SIZE],
}

impl std::fmt::Debug for LinkKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkKeys")
            .field("peer_public", &self.peer_public)
            .finish_non_exhaustive()
    }
}

impl LinkKeys {
    pub fn new(secret: [u8; KEY_SIZE], peer_public: [u8; KEY_SIZE]) -> Self {
        Self {
            secret,
            peer_public,
        }
    }

    /// 64바이트 키 파일 내용 파싱
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_FILE_SIZE {
            return Err(Error::KeyFile(format!(
                "키 파일 크기 불일치: expected {}, got {}",
                KEY_FILE_SIZE,
                bytes.len()
            )));
        }
        let mut secret = [0u8; KEY_SIZE];
        let mut peer_public = [0u8; KEY_SIZE];
        secret.copy_from_slice(&bytes[..KEY_SIZE]);
        peer_public.copy_from_slice(&bytes[KEY_SIZE..]);
        Ok(Self::new(secret, peer_public))
    }

    pub fn to_bytes(&self) -> [u8; KEY_FILE_SIZE] {
        let mut out = [0u8; KEY_FILE_SIZE];
        out[..KEY_SIZE].copy_from_slice(&self.secret);
        out[KEY_SIZE..].copy_from_slice(&self.peer_public);
        out
    }

    /// 키 파일 읽기
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|e| Error::KeyFile(format!("{}: {}", path.display(), e)))?;
        Self::from_bytes(&bytes)
    }

    /// 키 파일 쓰기
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_bytes())?;
        Ok(())
    }

    pub fn peer_public(&self) -> &[u8; KEY_SIZE] {
        &self.peer_public
    }

    /// 자신의 공개키
    pub fn public_key_bytes(&self) -> [u8; KEY_SIZE] {
        KeyPair::from_secret(self.secret).public_key_bytes()
    }
}

/// SESSION 프레임용 봉인 박스 (공유 키 사전 계산)
pub struct SessionBox {
    inner: SalsaBox,
}

impl SessionBox {
    pub fn new(keys: &LinkKeys) -> Self {
        let secret = crypto_box::SecretKey::from(keys.secret);
        let public = crypto_box::PublicKey::from(keys.peer_public);
        Self {
            inner: SalsaBox::new(&public, &secret),
        }
    }

    /// 봉인 해제 (MAC + 암호문)
    pub fn open(
        &self,
        nonce: &[u8; BOX_NONCE_SIZE],
        sealed: &[u8],
    ) -> std::result::Result<Vec<u8>, CryptoError> {
        self.inner
            .decrypt(GenericArray::from_slice(nonce), sealed)
            .map_err(|_| CryptoError::SessionOpenFailed)
    }

    /// 봉인 (송신측)
    pub fn seal(
        &self,
        nonce: &[u8; BOX_NONCE_SIZE],
        plaintext: &[u8],
    ) -> std::result::Result<Vec<u8>, CryptoError> {
        self.inner
            .encrypt(GenericArray::from_slice(nonce), plaintext)
            .map_err(|_| CryptoError::SealFailed)
    }
}

/// DATA 조각 AEAD (세션 키 기반)
pub struct DataCipher {
    cipher: ChaCha20Poly1305,
}

impl DataCipher {
    /// 세션 키로 암호화기 생성
    pub fn new(session_key: &[u8; KEY_SIZE]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(session_key)),
        }
    }

    /// 8바이트 와이어 nonce를 96비트 nonce로 확장 (상위 4바이트 0)
    pub fn nonce(wire_nonce: u64) -> [u8; NONCE_SIZE] {
        let mut nonce = [0u8; NONCE_SIZE];
        nonce[4..].copy_from_slice(&wire_nonce.to_be_bytes());
        nonce
    }

    /// 제자리 복호화
    ///
    /// `buf` = 암호문 + 태그. 성공하면 평문 길이를 반환하며 평문은 `buf[..len]`에 남는다.
    pub fn open_in_place(
        &self,
        wire_nonce: u64,
        aad: &[u8],
        buf: &mut [u8],
    ) -> std::result::Result<usize, CryptoError> {
        let len = buf
            .len()
            .checked_sub(TAG_SIZE)
            .ok_or(CryptoError::InvalidLength {
                expected: TAG_SIZE,
                got: buf.len(),
            })?;
        let (msg, tag) = buf.split_at_mut(len);
        let tag = *Tag::from_slice(tag);
        let nonce = Self::nonce(wire_nonce);
        self.cipher
            .decrypt_in_place_detached(Nonce::from_slice(&nonce), aad, msg, &tag)
            .map_err(|_| CryptoError::DataAuthFailed)?;
        Ok(len)
    }

    /// 암호화 (송신측): 암호문 + 태그
    pub fn seal(
        &self,
        wire_nonce: u64,
        aad: &[u8],
        plaintext: &[u8],
    ) -> std::result::Result<Vec<u8>, CryptoError> {
        let mut out = Vec::with_capacity(plaintext.len() + TAG_SIZE);
        out.extend_from_slice(plaintext);
        let nonce = Self::nonce(wire_nonce);
        let tag = self
            .cipher
            .encrypt_in_place_detached(Nonce::from_slice(&nonce), aad, &mut out)
            .map_err(|_| CryptoError::SealFailed)?;
        out.extend_from_slice(&tag);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link_pair() -> (LinkKeys, LinkKeys) {
        let ground = KeyPair::generate();
        let air = KeyPair::generate();
        (
            ground.link_keys(air.public_key_bytes()),
            air.link_keys(ground.public_key_bytes()),
        )
    }

    #[test]
    fn test_session_box() {
        let (rx_keys, tx_keys) = link_pair();
        let nonce = [7u8; BOX_NONCE_SIZE];
        let plaintext = b"session material";

        let sealed = SessionBox::new(&tx_keys).seal(&nonce, plaintext).unwrap();
        assert_eq!(sealed.len(), plaintext.len() + BOX_MAC_SIZE);

        let opened = SessionBox::new(&rx_keys).open(&nonce, &sealed).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_session_box_wrong_key() {
        let (_, tx_keys) = link_pair();
        let (stranger, _) = link_pair();
        let nonce = [1u8; BOX_NONCE_SIZE];

        let sealed = SessionBox::new(&tx_keys).seal(&nonce, b"secret").unwrap();
        assert!(matches!(
            SessionBox::new(&stranger).open(&nonce, &sealed),
            Err(CryptoError::SessionOpenFailed)
        ));
    }

    #[test]
    fn test_data_open_in_place() {
        let cipher = DataCipher::new(&[3u8; KEY_SIZE]);
        let aad = [1u8, 0, 0, 0, 0, 0, 0, 0x0A, 0x02];
        let sealed = cipher.seal(0x0A02, &aad, b"fragment").unwrap();

        let mut buf = sealed.clone();
        let len = cipher.open_in_place(0x0A02, &aad, &mut buf).unwrap();
        assert_eq!(&buf[..len], b"fragment");

        // 다른 nonce / 헤더로는 인증 실패
        let mut buf = sealed.clone();
        assert!(cipher.open_in_place(0x0A03, &aad, &mut buf).is_err());
        let mut buf = sealed;
        let mut other_aad = aad;
        other_aad[8] = 0x03;
        assert!(cipher.open_in_place(0x0A02, &other_aad, &mut buf).is_err());
    }

    #[test]
    fn test_data_open_too_short() {
        let cipher = DataCipher::new(&[0u8; KEY_SIZE]);
        let mut buf = [0u8; 4];
        assert!(matches!(
            cipher.open_in_place(0, &[], &mut buf),
            Err(CryptoError::InvalidLength { .. })
        ));
    }

    #[test]
    fn test_key_file_roundtrip() {
        let (rx_keys, tx_keys) = link_pair();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gs.key");
        rx_keys.save(&path).unwrap();

        let loaded = LinkKeys::load(&path).unwrap();
        assert_eq!(loaded.to_bytes(), rx_keys.to_bytes());
        assert_eq!(loaded.public_key_bytes(), *tx_keys.peer_public());
    }

    #[test]
    fn test_key_file_bad_size() {
        assert!(matches!(LinkKeys::from_bytes(&[0u8; 10]), Err(Error::KeyFile(_))));
    }
}
