//! 수신기 설정

use std::net::Ipv6Addr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::{MAX_FEC_PAYLOAD, RX_RING_SIZE, WFB_ADDR6, WFB_PORT};

/// 등록 가능한 디코드 핸들러 기본 개수
pub const DEFAULT_MAX_DECODE_HANDLERS: usize = 4;

/// 등록 가능한 미러 핸들러 기본 개수
pub const DEFAULT_MAX_MIRROR_HANDLERS: usize = 4;

/// WFB 수신기 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 수신할 채널 ID (None이면 모든 채널 허용)
    pub channel_id: Option<u32>,

    /// 링 버퍼 윈도우 깊이 (블록 수)
    pub ring_size: usize,

    /// 프래그먼트 버퍼 크기 (바이트)
    pub fragment_size: usize,

    /// FEC 복구 사용 여부 (런타임에 FecToggle로 변경 가능)
    pub fec_enabled: bool,

    /// FCS가 있을 때 CRC-32 직접 검증
    pub verify_fcs: bool,

    /// 에포크 롤백 허용 대기 시간
    /// None이면 낮은 에포크는 항상 거부
    pub epoch_rollback_timeout: Option<Duration>,

    /// 최대 디코드 핸들러 수
    pub max_decode_handlers: usize,

    /// 최대 미러 핸들러 수
    pub max_mirror_handlers: usize,

    /// 미러 멀티캐스트 그룹
    pub mirror_group: Ipv6Addr,

    /// 미러 포트
    pub mirror_port: u16,

    /// 멀티캐스트 인터페이스 인덱스 (0이면 기본)
    pub mirror_ifindex: u32,

    /// 통계 출력 주기 (밀리초, 0이면 비활성)
    pub stats_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            channel_id: None,
            ring_size: RX_RING_SIZE,
            fragment_size: MAX_FEC_PAYLOAD,
            fec_enabled: true,
            verify_fcs: false,
            epoch_rollback_timeout: Some(Duration::from_secs(10)), // 10초 무응답 후 허용
            max_decode_handlers: DEFAULT_MAX_DECODE_HANDLERS,
            max_mirror_handlers: DEFAULT_MAX_MIRROR_HANDLERS,
            mirror_group: WFB_ADDR6,
            mirror_port: WFB_PORT,
            mirror_ifindex: 0,
            stats_interval_ms: 1000,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 채널 지정
    pub fn with_channel(mut self, channel_id: u32) -> Self {
        self.channel_id = Some(channel_id);
        self
    }

    /// 윈도우 깊이 지정
    pub fn with_ring_size(mut self, ring_size: usize) -> Self {
        self.ring_size = ring_size;
        self
    }

    /// FEC 사용 여부
    pub fn with_fec(mut self, enabled: bool) -> Self {
        self.fec_enabled = enabled;
        self
    }

    /// 에포크 롤백 정책
    pub fn with_epoch_rollback(mut self, timeout: Option<Duration>) -> Self {
        self.epoch_rollback_timeout = timeout;
        self
    }

    /// 저사양 기기용 설정
    /// 윈도우를 얕게 잡아 메모리 사용량을 줄임
    pub fn low_spec() -> Self {
        Self {
            ring_size: 16,
            max_decode_handlers: 2,
            max_mirror_handlers: 1,
            stats_interval_ms: 5000,
            ..Self::default()
        }
    }

    /// 엄격 모드: 에포크 롤백 금지, FCS 직접 검증
    pub fn strict() -> Self {
        Self {
            verify_fcs: true,
            epoch_rollback_timeout: None,
            ..Self::default()
        }
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.ring_size == 0 {
            return Err(Error::Config("ring_size는 1 이상이어야 함".into()));
        }
        if self.fragment_size < crate::FRAGMENT_HDRLEN || self.fragment_size > MAX_FEC_PAYLOAD {
            return Err(Error::Config(format!(
                "fragment_size 범위 초과: {} (최대 {})",
                self.fragment_size, MAX_FEC_PAYLOAD
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ring_size, RX_RING_SIZE);
        assert!(config.channel_id.is_none());
    }

    #[test]
    fn test_presets() {
        assert!(Config::low_spec().ring_size < RX_RING_SIZE);
        assert!(Config::strict().epoch_rollback_timeout.is_none());
        assert!(Config::strict().validate().is_ok());
    }

    #[test]
    fn test_invalid_ring_size() {
        let config = Config::new().with_ring_size(0);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
