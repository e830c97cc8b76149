//! 수신기 콜백
//!
//! 디코드 핸들러는 재조립/복구된 페이로드를, 미러 핸들러는 WFB 복호화 전의 802.11 본문과
//! 수신 메타데이터를 받는다. 클로저도 그대로 등록할 수 있다.

use std::io::{self, Write};
use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6, UdpSocket};

use bytes::Bytes;
use crossbeam_channel::{Sender, TrySendError};
use tracing::{trace, warn};

use crate::config::Config;
use crate::frame::{FrameMeta, MirrorHeader};
use crate::session::SessionInfo;

/// 페이로드 소비자
pub trait DecodeHandler: Send {
    fn decode(&mut self, payload: &[u8]);
}

/// 원본 프레임 소비자
pub trait MirrorHandler: Send {
    fn mirror(&mut self, meta: &FrameMeta, frame: &[u8]);
}

/// 세션 수립 통지
pub trait SessionObserver: Send {
    fn on_session_established(&mut self, info: &SessionInfo);
}

impl<F> DecodeHandler for F
where
    F: FnMut(&[u8]) + Send,
{
    fn decode(&mut self, payload: &[u8]) {
        self(payload)
    }
}

impl<F> MirrorHandler for F
where
    F: FnMut(&FrameMeta, &[u8]) + Send,
{
    fn mirror(&mut self, meta: &FrameMeta, frame: &[u8]) {
        self(meta, frame)
    }
}

impl<F> SessionObserver for F
where
    F: FnMut(&SessionInfo) + Send,
{
    fn on_session_established(&mut self, info: &SessionInfo) {
        self(info)
    }
}

/// `Write`로 페이로드를 그대로 흘려보냄
///
/// 쓰기 실패는 한 번만 경고하고 이후 페이로드는 버린다.
pub struct WriterSink<W: Write + Send> {
    writer: W,
    failed: bool,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            failed: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> DecodeHandler for WriterSink<W> {
    fn decode(&mut self, payload: &[u8]) {
        if self.failed {
            return;
        }
        if let Err(e) = self.writer.write_all(payload).and_then(|_| self.writer.flush()) {
            warn!("출력 실패: {}", e);
            self.failed = true;
        }
    }
}

/// 별도 스레드로 페이로드 전달 (수신 루프를 막지 않음)
pub struct ChannelSink {
    tx: Sender<Bytes>,
    dropped: u64,
}

impl ChannelSink {
    pub fn new(tx: Sender<Bytes>) -> Self {
        Self { tx, dropped: 0 }
    }

    /// 큐가 가득 차거나 닫혀서 버린 페이로드 수
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl DecodeHandler for ChannelSink {
    fn decode(&mut self, payload: &[u8]) {
        match self.tx.try_send(Bytes::copy_from_slice(payload)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                trace!("출력 큐 가득 참, 페이로드 폐기");
            }
            Err(TrySendError::Disconnected(_)) => {
                if self.dropped == 0 {
                    warn!("출력 채널 닫힘");
                }
                self.dropped += 1;
            }
        }
    }
}

/// 수신 프레임을 유선 멀티캐스트로 재전송
///
/// `[flags:u32][freq:u16][dbm:i16]` 미러 헤더 뒤에 802.11 이후 바이트를 붙인다.
pub struct UdpMirror {
    socket: UdpSocket,
    target: SocketAddr,
    buf: Vec<u8>,
}

impl UdpMirror {
    /// 설정의 그룹/포트로 보내는 소켓 생성
    pub fn new(config: &Config) -> io::Result<Self> {
        let target = SocketAddr::V6(SocketAddrV6::new(
            config.mirror_group,
            config.mirror_port,
            0,
            config.mirror_ifindex,
        ));
        Self::with_target(target)
    }

    pub fn with_target(target: SocketAddr) -> io::Result<Self> {
        let bind: SocketAddr = match target {
            SocketAddr::V6(_) => SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, 0, 0, 0)),
            SocketAddr::V4(_) => SocketAddr::from(([0, 0, 0, 0], 0)),
        };
        let socket = UdpSocket::bind(bind)?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            target,
            buf: Vec::with_capacity(crate::WIFI_MTU),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl MirrorHandler for UdpMirror {
    fn mirror(&mut self, meta: &FrameMeta, frame: &[u8]) {
        let header = match MirrorHeader::new(meta).encode() {
            Ok(header) => header,
            Err(e) => {
                warn!("미러 헤더 인코딩 실패: {}", e);
                return;
            }
        };

        self.buf.clear();
        self.buf.extend_from_slice(&header);
        if !meta.corrupt {
            self.buf.extend_from_slice(frame);
        }

        match self.socket.send_to(&self.buf, self.target) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                trace!("미러 소켓 버퍼 가득 참");
            }
            Err(e) => warn!("미러 전송 실패 ({}): {}", self.target, e),
        }
    }
}
