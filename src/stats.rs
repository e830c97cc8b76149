//! 수신 통계

use std::time::{Duration, Instant};

/// 수신기 카운터
#[derive(Debug, Clone)]
pub struct RxStats {
    /// 시작 시간
    pub start_time: Instant,

    /// radiotap 파싱 실패
    pub radiotap_errors: u64,

    /// FCS 오류 프레임
    pub bad_fcs: u64,

    /// 다른 채널 프레임
    pub invalid_channel_id: u64,

    /// 802.11/WFB 파싱 실패 (캡처 경로)
    pub wfb_frame_errors: u64,

    /// 파서 체인을 통과한 캡처 프레임
    pub capture_accepted: u64,

    /// 미러 헤더 파싱 실패
    pub mirror_header_errors: u64,

    /// 손상 표시된 미러 프레임
    pub mirror_corrupted: u64,

    /// WFB 파싱 실패 (미러 경로)
    pub mirror_wfb_errors: u64,

    /// 파서 체인을 통과한 미러 프레임
    pub mirror_accepted: u64,

    /// 미러 콜백으로 넘긴 프레임
    pub mirrored_frames: u64,

    /// 디코드 콜백으로 넘긴 조각
    pub decoded_frames: u64,

    /// 디코드 콜백으로 넘긴 바이트
    pub decoded_bytes: u64,

    /// 세션 수립 (키 교체 포함)
    pub sessions_established: u64,

    /// 거부된 SESSION 프레임
    pub session_rejects: u64,

    /// DATA 인증 실패 (세션 무효화)
    pub auth_failures: u64,

    /// 중복 조각
    pub duplicates: u64,

    /// 윈도우 밖 조각
    pub out_of_window: u64,

    /// FEC 복구 실행 횟수
    pub fec_recoveries: u64,

    /// FEC로 복구된 조각
    pub fragments_recovered: u64,

    /// 포기한 데이터 조각
    pub fragments_lost: u64,
}

impl RxStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            radiotap_errors: 0,
            bad_fcs: 0,
            invalid_channel_id: 0,
            wfb_frame_errors: 0,
            capture_accepted: 0,
            mirror_header_errors: 0,
            mirror_corrupted: 0,
            mirror_wfb_errors: 0,
            mirror_accepted: 0,
            mirrored_frames: 0,
            decoded_frames: 0,
            decoded_bytes: 0,
            sessions_established: 0,
            session_rejects: 0,
            auth_failures: 0,
            duplicates: 0,
            out_of_window: 0,
            fec_recoveries: 0,
            fragments_recovered: 0,
            fragments_lost: 0,
        }
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 디코드 처리율 (bytes/sec)
    pub fn throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.decoded_bytes as f64 / elapsed
    }

    /// 손실률 (포기한 조각 / 전체 데이터 조각)
    pub fn loss_rate(&self) -> f64 {
        let total = self.decoded_frames + self.fragments_lost;
        if total == 0 {
            return 0.0;
        }
        self.fragments_lost as f64 / total as f64
    }

    /// 통계 리셋
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Accepted: {}+{} | Decoded: {} ({:.2} MB/s) | FEC: {}/{} | Lost: {} ({:.2}%) | Errors: rt={} fcs={} ch={} wfb={} mirror={} auth={} | Sessions: {}",
            self.elapsed().as_secs_f64(),
            self.capture_accepted,
            self.mirror_accepted,
            self.decoded_frames,
            self.throughput() / 1_000_000.0,
            self.fec_recoveries,
            self.fragments_recovered,
            self.fragments_lost,
            self.loss_rate() * 100.0,
            self.radiotap_errors,
            self.bad_fcs,
            self.invalid_channel_id,
            self.wfb_frame_errors,
            self.mirror_header_errors + self.mirror_wfb_errors,
            self.auth_failures,
            self.sessions_established,
        )
    }
}

impl Default for RxStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loss_rate() {
        let mut stats = RxStats::new();
        assert_eq!(stats.loss_rate(), 0.0);
        stats.decoded_frames = 3;
        stats.fragments_lost = 1;
        assert!((stats.loss_rate() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_reset() {
        let mut stats = RxStats::new();
        stats.bad_fcs = 5;
        stats.reset();
        assert_eq!(stats.bad_fcs, 0);
        assert!(stats.summary().contains("Sessions: 0"));
    }
}
