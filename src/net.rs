//! 미러 멀티캐스트 수신 루프
//!
//! 단일 스레드 리액터: 데이터그램 하나를 받으면 파싱부터 팬아웃까지 끝낸 뒤 다음 이벤트로
//! 넘어간다. 종료 신호는 처리 중인 프레임을 마친 뒤 반영된다.

use std::io;
use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::receiver::Receiver;
use crate::WIFI_MTU;

/// 미러 그룹에 가입한 수신 소켓 생성
pub fn bind_mirror_socket(config: &Config) -> io::Result<UdpSocket> {
    let addr = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, config.mirror_port, 0, 0);
    let socket = std::net::UdpSocket::bind(addr)?;
    if config.mirror_group.is_multicast() {
        socket.join_multicast_v6(&config.mirror_group, config.mirror_ifindex)?;
    }
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket)
}

/// 종료 신호가 올 때까지 미러 데이터그램 처리
///
/// `stats_interval`이 있으면 주기적으로 통계를 출력한다.
pub async fn run_mirror_loop(
    receiver: &mut Receiver,
    socket: &UdpSocket,
    mut shutdown: watch::Receiver<bool>,
    stats_interval: Option<Duration>,
) -> Result<()> {
    let mut buf = vec![0u8; WIFI_MTU + crate::frame::capture::MIRROR_HDRLEN];
    let mut ticker = tokio::time::interval(stats_interval.unwrap_or(Duration::from_secs(3600)));
    ticker.tick().await;

    if let Ok(addr) = socket.local_addr() {
        info!("미러 수신 시작: {}", addr);
    }

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((len, from)) => handle_datagram(receiver, &buf[..len], from),
                    Err(e) => warn!("수신 에러: {}", e),
                }
            }
            _ = ticker.tick(), if stats_interval.is_some() => {
                info!("{}", receiver.stats().summary());
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    // 송신측이 사라짐
                    break;
                }
            }
        }
    }

    info!("미러 수신 종료: {}", receiver.stats().summary());
    Ok(())
}

fn handle_datagram(receiver: &mut Receiver, datagram: &[u8], from: SocketAddr) {
    if let Err(e) = receiver.rx_mirror(datagram) {
        debug!("미러 프레임 폐기 ({}): {}", from, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::frame::{FrameMeta, MirrorHeader};
    use crate::handler::ChannelSink;
    use crate::tx::TxSession;

    #[tokio::test]
    async fn test_mirror_loop_decodes_and_stops() {
        let ground = KeyPair::generate();
        let air = KeyPair::generate();
        let mut receiver = Receiver::new(Config::default(), &ground.link_keys(air.public_key_bytes())).unwrap();
        let (sink_tx, decoded) = crossbeam_channel::unbounded();
        receiver.add_decode_handler(ChannelSink::new(sink_tx)).unwrap();

        let mut tx = TxSession::with_random_key(&air.link_keys(ground.public_key_bytes()), 1, 0, 1, 2).unwrap();
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = socket.local_addr().unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let header = MirrorHeader::new(&FrameMeta {
            freq: 5805,
            dbm: -40,
            corrupt: false,
        })
        .encode()
        .unwrap();
        let mut wfb = vec![tx.session_frame().unwrap()];
        wfb.extend(tx.encode_next(&[b"over the wire".as_slice()]).unwrap());
        for frame in &wfb {
            let mut datagram = header.clone();
            datagram.extend_from_slice(frame);
            sender.send_to(&datagram, target).await.unwrap();
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            let _ = stop_tx.send(true);
        });

        run_mirror_loop(&mut receiver, &socket, stop_rx, Some(Duration::from_millis(50)))
            .await
            .unwrap();
        stopper.await.unwrap();

        assert_eq!(decoded.try_recv().unwrap().as_ref(), b"over the wire");
        assert_eq!(receiver.stats().mirror_accepted, 3);
    }
}
