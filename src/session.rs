//! 세션 핸드셰이크
//!
//! 상태: 세션 없음 → 세션 있음 (키 교체는 세션 있음 → 세션 있음)
//!
//! SESSION 프레임 처리는 검증 단계(봉인 해제, 에포크, 파라미터, 자원 할당)를 모두 통과한
//! 뒤에만 상태를 바꾼다. 새 에포크를 검증하기 시작하는 순간 기존 키는 무효화되므로
//! 실패하면 세션 없음 상태로 남는다.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::crypto::{LinkKeys, SessionBox, BOX_NONCE_SIZE};
use crate::error::{Error, Result};
use crate::fec::FecType;
use crate::frame::SessionData;
use crate::reassembly::{DataFrame, DataOutcome, Delivery, Reassembly};
use crate::stats::RxStats;
use crate::MIN_SESSION_CIPHER_LEN;

/// 수립된 세션 정보 (관찰자 통지용)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    pub epoch: u64,
    pub channel_id: u32,
    pub fec_type: FecType,
    pub fec_k: u8,
    pub fec_n: u8,
}

/// SESSION 프레임 처리 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// 새 세션 수립 (키 교체 포함)
    Established(SessionInfo),
    /// 같은 에포크 재전송
    Unchanged,
}

/// 수신 세션 상태
pub struct Session {
    session_box: SessionBox,
    channel_id: Option<u32>,
    ring_size: usize,
    fragment_size: usize,
    rollback_timeout: Option<Duration>,

    epoch: u64,
    info: Option<SessionInfo>,
    has_session_key: bool,
    /// 세션 키, FEC 엔진, 링 버퍼
    link: Option<Reassembly>,
    last_authenticated: Option<Instant>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("epoch", &self.epoch)
            .field("info", &self.info)
            .field("has_session_key", &self.has_session_key)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(config: &Config, keys: &LinkKeys) -> Self {
        Self {
            session_box: SessionBox::new(keys),
            channel_id: config.channel_id,
            ring_size: config.ring_size,
            fragment_size: config.fragment_size,
            rollback_timeout: config.epoch_rollback_timeout,
            epoch: 0,
            info: None,
            has_session_key: false,
            link: None,
            last_authenticated: None,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn has_session_key(&self) -> bool {
        self.has_session_key
    }

    /// 현재 세션 정보 (세션이 없으면 None)
    pub fn info(&self) -> Option<SessionInfo> {
        self.info.filter(|_| self.has_session_key)
    }

    /// 현재 (k, n)
    pub fn fec_params(&self) -> Option<(u8, u8)> {
        self.info().map(|info| (info.fec_k, info.fec_n))
    }

    pub fn reassembly(&self) -> Option<&Reassembly> {
        self.link.as_ref().filter(|_| self.has_session_key)
    }

    /// 낮은 에포크를 받아들일 수 있는지
    fn rollback_allowed(&self) -> bool {
        match (self.rollback_timeout, self.last_authenticated) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(timeout), Some(at)) => at.elapsed() >= timeout,
        }
    }

    /// SESSION 프레임 처리
    ///
    /// `link_channel`은 프레임을 실어 온 802.11 헤더의 채널 ID다. 캡처 경로에서는 봉인된
    /// 채널 ID가 이 값과 같아야 한다. 미러 경로는 802.11 헤더가 없으므로 `None`.
    pub fn handle_session(
        &mut self,
        nonce: &[u8; BOX_NONCE_SIZE],
        cipher: &[u8],
        link_channel: Option<u32>,
    ) -> Result<SessionOutcome> {
        if cipher.len() < MIN_SESSION_CIPHER_LEN {
            return Err(Error::truncated(
                "session cipher",
                MIN_SESSION_CIPHER_LEN,
                cipher.len(),
            ));
        }

        let plain = self.session_box.open(nonce, cipher)?;
        let data = SessionData::decode(&plain)?;

        if data.epoch < self.epoch {
            if !self.rollback_allowed() {
                return Err(Error::StaleEpoch {
                    current: self.epoch,
                    got: data.epoch,
                });
            }
            warn!("에포크 롤백 허용: {} -> {}", self.epoch, data.epoch);
        } else if self.has_session_key && data.epoch == self.epoch {
            self.last_authenticated = Some(Instant::now());
            return Ok(SessionOutcome::Unchanged);
        }

        // 새 에포크: 여기서부터 실패하면 세션 없음
        self.has_session_key = false;
        self.link = None;

        if let Some(expected) = link_channel.or(self.channel_id) {
            if expected != data.channel_id {
                return Err(Error::ChannelMismatch {
                    expected,
                    got: data.channel_id,
                });
            }
        }
        let fec_type = FecType::try_from(data.fec_type)?;
        if data.fec_k < 1 || data.fec_k > data.fec_n {
            return Err(Error::InvalidFecParams {
                k: data.fec_k,
                n: data.fec_n,
            });
        }

        let link = Reassembly::new(
            &data.session_key,
            data.fec_k,
            data.fec_n,
            self.ring_size,
            self.fragment_size,
        )?;

        let info = SessionInfo {
            epoch: data.epoch,
            channel_id: data.channel_id,
            fec_type,
            fec_k: data.fec_k,
            fec_n: data.fec_n,
        };
        self.epoch = data.epoch;
        self.info = Some(info);
        self.link = Some(link);
        self.has_session_key = true;
        self.last_authenticated = Some(Instant::now());

        info!(
            "세션 수립: epoch={}, channel={:08X}, fec={:?} {}/{}",
            info.epoch, info.channel_id, info.fec_type, info.fec_k, info.fec_n
        );
        Ok(SessionOutcome::Established(info))
    }

    /// DATA 조각 처리
    ///
    /// 인증 실패 시 세션을 무효화하고 에러를 돌려준다.
    pub fn handle_data<E>(
        &mut self,
        frame: &DataFrame<'_>,
        fec_enabled: bool,
        stats: &mut RxStats,
        emit: E,
    ) -> Result<DataOutcome>
    where
        E: FnMut(&Delivery<'_>),
    {
        if !self.has_session_key {
            return Ok(DataOutcome::NoSession);
        }
        let Some(link) = self.link.as_mut() else {
            return Ok(DataOutcome::NoSession);
        };

        match link.rx_data(frame, fec_enabled, stats, emit) {
            Err(Error::Crypto(e)) => {
                warn!("데이터 인증 실패, 세션 무효화: epoch={}", self.epoch);
                stats.auth_failures += 1;
                self.has_session_key = false;
                Err(Error::Crypto(e))
            }
            Err(e) => {
                debug!("DATA 조각 폐기: {}", e);
                Err(e)
            }
            Ok(outcome) => {
                self.last_authenticated = Some(Instant::now());
                Ok(outcome)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::frame::{ParsedFrame, WfbHeader};
    use crate::tx::TxSession;

    struct Link {
        rx_keys: LinkKeys,
        tx_keys: LinkKeys,
    }

    fn link() -> Link {
        let ground = KeyPair::generate();
        let air = KeyPair::generate();
        Link {
            rx_keys: ground.link_keys(air.public_key_bytes()),
            tx_keys: air.link_keys(ground.public_key_bytes()),
        }
    }

    fn session_parts(frame: &[u8]) -> ([u8; BOX_NONCE_SIZE], Vec<u8>) {
        let parsed = ParsedFrame::parse(frame).unwrap();
        let WfbHeader::Session { nonce } = parsed.header else {
            panic!("SESSION이어야 함");
        };
        (nonce, parsed.cipher.to_vec())
    }

    fn offer(session: &mut Session, tx: &TxSession) -> Result<SessionOutcome> {
        let (nonce, cipher) = session_parts(&tx.session_frame().unwrap());
        session.handle_session(&nonce, &cipher, None)
    }

    fn offer_data(session: &mut Session, tx: &TxSession, data: SessionData) -> Result<SessionOutcome> {
        let (nonce, cipher) = session_parts(&tx.seal_session(&data).unwrap());
        session.handle_session(&nonce, &cipher, None)
    }

    fn feed(session: &mut Session, frame: &[u8], stats: &mut RxStats, out: &mut Vec<Vec<u8>>) -> Result<DataOutcome> {
        let parsed = ParsedFrame::parse(frame).unwrap();
        let WfbHeader::Data { nonce, block_idx, fragment_idx } = parsed.header else {
            panic!("DATA여야 함");
        };
        let data = DataFrame {
            nonce,
            block_idx,
            fragment_idx,
            aad: parsed.plain_header,
            cipher: parsed.cipher,
        };
        session.handle_data(&data, true, stats, |d: &Delivery<'_>| out.push(d.payload.to_vec()))
    }

    #[test]
    fn test_establish_and_duplicate() {
        let l = link();
        let mut session = Session::new(&Config::default(), &l.rx_keys);
        assert!(!session.has_session_key());

        let tx = TxSession::with_random_key(&l.tx_keys, 5, 1, 4, 6).unwrap();
        let outcome = offer(&mut session, &tx).unwrap();
        match outcome {
            SessionOutcome::Established(info) => {
                assert_eq!(info.epoch, 5);
                assert_eq!((info.fec_k, info.fec_n), (4, 6));
            }
            SessionOutcome::Unchanged => panic!("새 세션이어야 함"),
        }
        assert!(session.has_session_key());
        assert_eq!(session.fec_params(), Some((4, 6)));

        assert_eq!(offer(&mut session, &tx).unwrap(), SessionOutcome::Unchanged);
    }

    #[test]
    fn test_rekey_replaces_key() {
        let l = link();
        let mut session = Session::new(&Config::default(), &l.rx_keys);
        let mut stats = RxStats::new();
        let mut out = Vec::new();

        let old = TxSession::with_random_key(&l.tx_keys, 1, 0, 2, 3).unwrap();
        offer(&mut session, &old).unwrap();
        let frames = old.encode_block(0, &[b"old".as_slice()]).unwrap();
        feed(&mut session, &frames[0], &mut stats, &mut out).unwrap();
        assert_eq!(out, vec![b"old".to_vec()]);

        let new = TxSession::with_random_key(&l.tx_keys, 2, 0, 2, 3).unwrap();
        assert!(matches!(offer(&mut session, &new).unwrap(), SessionOutcome::Established(_)));
        let frames = new.encode_block(0, &[b"new".as_slice()]).unwrap();
        feed(&mut session, &frames[0], &mut stats, &mut out).unwrap();
        assert_eq!(out.last().unwrap(), b"new");
    }

    #[test]
    fn test_rekey_drops_pending_block() {
        let l = link();
        let mut session = Session::new(&Config::default(), &l.rx_keys);
        let mut stats = RxStats::new();
        let mut out = Vec::new();

        // 조각 0이 빠진 채 1, 2만 저장된 블록
        let old = TxSession::with_random_key(&l.tx_keys, 1, 0, 3, 4).unwrap();
        offer(&mut session, &old).unwrap();
        let frames = old
            .encode_block(5, &[b"a0".as_slice(), b"a1".as_slice(), b"a2".as_slice()])
            .unwrap();
        feed(&mut session, &frames[1], &mut stats, &mut out).unwrap();
        feed(&mut session, &frames[2], &mut stats, &mut out).unwrap();
        assert!(out.is_empty());

        let new = TxSession::with_random_key(&l.tx_keys, 2, 0, 3, 4).unwrap();
        assert!(matches!(offer(&mut session, &new).unwrap(), SessionOutcome::Established(_)));
        let frames = new
            .encode_block(9, &[b"b0".as_slice(), b"b1".as_slice(), b"b2".as_slice()])
            .unwrap();
        for frame in &frames {
            feed(&mut session, frame, &mut stats, &mut out).unwrap();
        }

        assert_eq!(out, vec![b"b0".to_vec(), b"b1".to_vec(), b"b2".to_vec()]);
    }

    #[test]
    fn test_session_channel_must_match_carrier() {
        let l = link();
        let mut session = Session::new(&Config::default(), &l.rx_keys);
        let tx = TxSession::with_random_key(&l.tx_keys, 1, 0x1111, 2, 3).unwrap();
        let (nonce, cipher) = session_parts(&tx.session_frame().unwrap());

        assert!(matches!(
            session.handle_session(&nonce, &cipher, Some(0x2222)),
            Err(Error::ChannelMismatch { expected: 0x2222, got: 0x1111 })
        ));
        assert!(!session.has_session_key());
        assert!(matches!(
            session.handle_session(&nonce, &cipher, Some(0x1111)).unwrap(),
            SessionOutcome::Established(_)
        ));
    }

    #[test]
    fn test_wrong_keypair_rejected() {
        let l = link();
        let stranger = link();
        let mut session = Session::new(&Config::default(), &l.rx_keys);
        let tx = TxSession::with_random_key(&stranger.tx_keys, 1, 0, 2, 3).unwrap();
        assert!(matches!(offer(&mut session, &tx), Err(Error::Crypto(_))));
        assert!(!session.has_session_key());
    }

    #[test]
    fn test_stale_epoch_strict() {
        let l = link();
        let config = Config::default().with_epoch_rollback(None);
        let mut session = Session::new(&config, &l.rx_keys);
        offer(&mut session, &TxSession::with_random_key(&l.tx_keys, 9, 0, 2, 3).unwrap()).unwrap();

        let stale = TxSession::with_random_key(&l.tx_keys, 8, 0, 2, 3).unwrap();
        assert!(matches!(
            offer(&mut session, &stale),
            Err(Error::StaleEpoch { current: 9, got: 8 })
        ));
        // 기존 세션 유지
        assert!(session.has_session_key());
        assert_eq!(session.epoch(), 9);
    }

    #[test]
    fn test_epoch_rollback_after_timeout() {
        let l = link();
        let config = Config::default().with_epoch_rollback(Some(Duration::ZERO));
        let mut session = Session::new(&config, &l.rx_keys);
        offer(&mut session, &TxSession::with_random_key(&l.tx_keys, 9, 0, 2, 3).unwrap()).unwrap();

        let rebooted = TxSession::with_random_key(&l.tx_keys, 1, 0, 2, 3).unwrap();
        assert!(matches!(offer(&mut session, &rebooted).unwrap(), SessionOutcome::Established(_)));
        assert_eq!(session.epoch(), 1);
    }

    #[test]
    fn test_rollback_blocked_while_link_alive() {
        let l = link();
        let config = Config::default().with_epoch_rollback(Some(Duration::from_secs(3600)));
        let mut session = Session::new(&config, &l.rx_keys);
        offer(&mut session, &TxSession::with_random_key(&l.tx_keys, 9, 0, 2, 3).unwrap()).unwrap();

        let stale = TxSession::with_random_key(&l.tx_keys, 1, 0, 2, 3).unwrap();
        assert!(matches!(offer(&mut session, &stale), Err(Error::StaleEpoch { .. })));
    }

    #[test]
    fn test_channel_mismatch_leaves_no_session() {
        let l = link();
        let config = Config::default().with_channel(0x1111);
        let mut session = Session::new(&config, &l.rx_keys);

        let good = TxSession::with_random_key(&l.tx_keys, 1, 0x1111, 2, 3).unwrap();
        offer(&mut session, &good).unwrap();

        let other = TxSession::with_random_key(&l.tx_keys, 2, 0x2222, 2, 3).unwrap();
        assert!(matches!(offer(&mut session, &other), Err(Error::ChannelMismatch { .. })));
        assert!(!session.has_session_key());
        assert!(session.reassembly().is_none());
    }

    #[test]
    fn test_invalid_fec_params() {
        let l = link();
        let mut session = Session::new(&Config::default(), &l.rx_keys);
        let tx = TxSession::with_random_key(&l.tx_keys, 1, 0, 2, 3).unwrap();

        let mut data = tx.session_data();
        data.fec_k = 0;
        assert!(matches!(offer_data(&mut session, &tx, data), Err(Error::InvalidFecParams { .. })));

        data.fec_k = 4;
        data.fec_n = 3;
        assert!(matches!(offer_data(&mut session, &tx, data), Err(Error::InvalidFecParams { .. })));

        data.fec_k = 2;
        data.fec_type = 7;
        assert!(matches!(offer_data(&mut session, &tx, data), Err(Error::UnsupportedFecType(7))));
        assert!(!session.has_session_key());
    }

    #[test]
    fn test_truncated_session_cipher() {
        let l = link();
        let mut session = Session::new(&Config::default(), &l.rx_keys);
        assert!(matches!(
            session.handle_session(&[0; BOX_NONCE_SIZE], &[0; 10], None),
            Err(Error::Truncated { .. })
        ));
    }

    #[test]
    fn test_data_without_session() {
        let l = link();
        let mut session = Session::new(&Config::default(), &l.rx_keys);
        let tx = TxSession::with_random_key(&l.tx_keys, 1, 0, 2, 3).unwrap();
        let frames = tx.encode_block(0, &[b"x".as_slice()]).unwrap();
        let mut stats = RxStats::new();
        let mut out = Vec::new();
        assert_eq!(
            feed(&mut session, &frames[0], &mut stats, &mut out).unwrap(),
            DataOutcome::NoSession
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_auth_failure_invalidates_session() {
        let l = link();
        let mut session = Session::new(&Config::default(), &l.rx_keys);
        let tx = TxSession::with_random_key(&l.tx_keys, 1, 0, 2, 3).unwrap();
        offer(&mut session, &tx).unwrap();

        // 다른 세션 키로 암호화된 조각
        let foreign = TxSession::with_random_key(&l.tx_keys, 1, 0, 2, 3).unwrap();
        let frames = foreign.encode_block(0, &[b"forged".as_slice()]).unwrap();
        let mut stats = RxStats::new();
        let mut out = Vec::new();
        assert!(matches!(
            feed(&mut session, &frames[0], &mut stats, &mut out),
            Err(Error::Crypto(_))
        ));
        assert!(out.is_empty());
        assert!(!session.has_session_key());
        assert_eq!(stats.auth_failures, 1);

        // 같은 에포크라도 다시 수립 가능
        assert!(matches!(offer(&mut session, &tx).unwrap(), SessionOutcome::Established(_)));
    }
}
