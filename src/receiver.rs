//! 수신기 (지상국측)
//!
//! - 캡처/미러 두 경로의 파서 체인 연결
//! - SESSION은 핸드셰이크로, DATA는 재조립기로 분배
//! - 재조립된 페이로드는 디코드 핸들러로, 원본 프레임은 미러 핸들러로 팬아웃
//!
//! 한 프레임의 처리는 호출 안에서 끝나며 중간에 양보하지 않는다.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::config::Config;
use crate::crypto::LinkKeys;
use crate::error::{Error, ErrorClass, Result};
use crate::frame::{
    capture, ieee80211, radiotap, strip_fcs, Envelope, FrameMeta, ParsedFrame, Source, WfbHeader,
};
use crate::handler::{DecodeHandler, MirrorHandler, SessionObserver};
use crate::reassembly::{DataFrame, DataOutcome, Delivery};
use crate::session::{Session, SessionOutcome};
use crate::stats::RxStats;

/// 최대 세션 관찰자 수
const MAX_SESSION_OBSERVERS: usize = 4;

/// FEC 적용 스위치 (다른 스레드에서 런타임에 변경 가능)
#[derive(Debug, Clone)]
pub struct FecToggle(Arc<AtomicBool>);

impl FecToggle {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::Relaxed);
    }
}

/// 프레임 하나의 처리 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxOutcome {
    Session(SessionOutcome),
    Data(DataOutcome),
    /// FCS 오류 또는 손상 표시 프레임
    Corrupt,
    /// 다른 채널 프레임
    OtherChannel,
}

/// WFB 수신기
pub struct Receiver {
    config: Config,
    session: Session,
    decode_handlers: Vec<Box<dyn DecodeHandler>>,
    mirror_handlers: Vec<Box<dyn MirrorHandler>>,
    observers: Vec<Box<dyn SessionObserver>>,
    stats: RxStats,
    fec: FecToggle,
}

impl Receiver {
    /// 새 수신기 생성
    pub fn new(config: Config, keys: &LinkKeys) -> Result<Self> {
        config.validate()?;
        let session = Session::new(&config, keys);
        let fec = FecToggle::new(config.fec_enabled);
        Ok(Self {
            decode_handlers: Vec::with_capacity(config.max_decode_handlers),
            mirror_handlers: Vec::with_capacity(config.max_mirror_handlers),
            observers: Vec::new(),
            config,
            session,
            stats: RxStats::new(),
            fec,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn stats(&self) -> &RxStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut RxStats {
        &mut self.stats
    }

    /// FEC 스위치 핸들
    pub fn fec_toggle(&self) -> FecToggle {
        self.fec.clone()
    }

    /// 디코드 핸들러 등록
    pub fn add_decode_handler<H: DecodeHandler + 'static>(&mut self, handler: H) -> Result<()> {
        if self.decode_handlers.len() >= self.config.max_decode_handlers {
            return Err(Error::HandlerLimit {
                max: self.config.max_decode_handlers,
            });
        }
        self.decode_handlers.push(Box::new(handler));
        Ok(())
    }

    /// 미러 핸들러 등록
    pub fn add_mirror_handler<H: MirrorHandler + 'static>(&mut self, handler: H) -> Result<()> {
        if self.mirror_handlers.len() >= self.config.max_mirror_handlers {
            return Err(Error::HandlerLimit {
                max: self.config.max_mirror_handlers,
            });
        }
        self.mirror_handlers.push(Box::new(handler));
        Ok(())
    }

    /// 세션 관찰자 등록
    pub fn add_session_observer<H: SessionObserver + 'static>(&mut self, observer: H) -> Result<()> {
        if self.observers.len() >= MAX_SESSION_OBSERVERS {
            return Err(Error::HandlerLimit {
                max: MAX_SESSION_OBSERVERS,
            });
        }
        self.observers.push(Box::new(observer));
        Ok(())
    }

    /// 경로에 맞는 처리 함수로 분배
    pub fn rx(&mut self, source: Source, buf: &[u8]) -> Result<RxOutcome> {
        match source {
            Source::Capture => self.rx_capture(buf),
            Source::Mirror => self.rx_mirror(buf),
        }
    }

    /// 모니터 모드 캡처 프레임 처리 (radiotap + 802.11 + WFB)
    pub fn rx_capture(&mut self, buf: &[u8]) -> Result<RxOutcome> {
        let (_, buf) = capture::parse(Source::Capture, buf)?;
        let (rt, rest) = radiotap::parse(buf).map_err(|e| {
            self.stats.radiotap_errors += 1;
            e
        })?;

        let (body, fcs_ok) = if rt.has_fcs() {
            strip_fcs(rest, self.config.verify_fcs).map_err(|e| {
                self.stats.wfb_frame_errors += 1;
                e
            })?
        } else {
            (rest, true)
        };

        let meta = FrameMeta {
            freq: rt.freq(),
            dbm: rt.dbm(),
            corrupt: rt.bad_fcs() || !fcs_ok,
        };
        if meta.corrupt {
            self.stats.bad_fcs += 1;
            trace!("FCS 오류 프레임: freq={}", meta.freq);
            self.mirror(&meta, &[]);
            return Ok(RxOutcome::Corrupt);
        }

        let (hdr, wfb) = ieee80211::parse(body).map_err(|e| {
            self.stats.wfb_frame_errors += 1;
            e
        })?;
        if let Some(expected) = self.config.channel_id {
            if hdr.channel_id() != expected {
                self.stats.invalid_channel_id += 1;
                return Ok(RxOutcome::OtherChannel);
            }
        }

        let parsed = ParsedFrame::parse(wfb).map_err(|e| {
            self.stats.wfb_frame_errors += 1;
            e
        })?;
        self.stats.capture_accepted += 1;
        self.dispatch(&parsed, Some(hdr.channel_id()), Some((&meta, wfb)))
    }

    /// 미러 프레임 처리 (미러 헤더 + WFB)
    ///
    /// 미러로 받은 프레임은 다시 미러하지 않는다.
    pub fn rx_mirror(&mut self, buf: &[u8]) -> Result<RxOutcome> {
        let (envelope, wfb) = capture::parse(Source::Mirror, buf).map_err(|e| {
            self.stats.mirror_header_errors += 1;
            e
        })?;
        if let Envelope::Mirror(header) = envelope {
            if header.is_corrupt() {
                self.stats.mirror_corrupted += 1;
                return Ok(RxOutcome::Corrupt);
            }
        }

        let parsed = ParsedFrame::parse(wfb).map_err(|e| {
            self.stats.mirror_wfb_errors += 1;
            e
        })?;
        self.stats.mirror_accepted += 1;
        self.dispatch(&parsed, None, None)
    }

    fn dispatch(
        &mut self,
        parsed: &ParsedFrame<'_>,
        link_channel: Option<u32>,
        mirror: Option<(&FrameMeta, &[u8])>,
    ) -> Result<RxOutcome> {
        let result = match parsed.header {
            WfbHeader::Session { nonce } => self.rx_session(&nonce, parsed.cipher, link_channel),
            WfbHeader::Data {
                nonce,
                block_idx,
                fragment_idx,
            } => {
                let frame = DataFrame {
                    nonce,
                    block_idx,
                    fragment_idx,
                    aad: parsed.plain_header,
                    cipher: parsed.cipher,
                };
                self.rx_data(&frame)
            }
        };

        // 인증에 실패한 프레임은 미러하지 않음
        let forged = matches!(&result, Err(e) if e.class() == ErrorClass::Crypto);
        if let (false, Some((meta, frame))) = (forged, mirror) {
            self.mirror(meta, frame);
        }
        result
    }

    fn rx_session(
        &mut self,
        nonce: &[u8; crate::crypto::BOX_NONCE_SIZE],
        cipher: &[u8],
        link_channel: Option<u32>,
    ) -> Result<RxOutcome> {
        match self.session.handle_session(nonce, cipher, link_channel) {
            Ok(SessionOutcome::Established(info)) => {
                self.stats.sessions_established += 1;
                for observer in self.observers.iter_mut() {
                    observer.on_session_established(&info);
                }
                Ok(RxOutcome::Session(SessionOutcome::Established(info)))
            }
            Ok(SessionOutcome::Unchanged) => Ok(RxOutcome::Session(SessionOutcome::Unchanged)),
            Err(e) => {
                self.stats.session_rejects += 1;
                debug!("SESSION 거부: {}", e);
                Err(e)
            }
        }
    }

    fn rx_data(&mut self, frame: &DataFrame<'_>) -> Result<RxOutcome> {
        let handlers = &mut self.decode_handlers;
        let outcome = self.session.handle_data(
            frame,
            self.fec.is_enabled(),
            &mut self.stats,
            |d: &Delivery<'_>| {
                for handler in handlers.iter_mut() {
                    handler.decode(d.payload);
                }
            },
        )?;
        if outcome == DataOutcome::NoSession {
            trace!("세션 없음, 조각 폐기: block={}", frame.block_idx);
        }
        Ok(RxOutcome::Data(outcome))
    }

    fn mirror(&mut self, meta: &FrameMeta, frame: &[u8]) {
        if self.mirror_handlers.is_empty() {
            return;
        }
        self.stats.mirrored_frames += 1;
        for handler in self.mirror_handlers.iter_mut() {
            handler.mirror(meta, frame);
        }
    }
}
