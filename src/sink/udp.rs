use async_trait::async_trait;
use tokio::net::UdpSocket;

use super::Sink;
use crate::error::SinkError;
use crate::measurement::{Batch, Measurement};

/// Largest UDP payload over IPv4.
pub const MAX_DATAGRAM_BYTES: usize = 65_507;

/// InfluxDB line protocol over UDP.
///
/// Each datagram carries up to `packet_size` lines and at most
/// [`MAX_DATAGRAM_BYTES`]; lines keep batch order.
pub struct UdpSink {
    socket: UdpSocket,
    packet_size: usize,
    target: String,
}

impl UdpSink {
    pub async fn connect(host: &str, port: u16, packet_size: usize) -> Result<Self, SinkError> {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        socket.connect((host, port)).await?;
        Ok(Self {
            socket,
            packet_size: packet_size.max(1),
            target: format!("{host}:{port}"),
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

#[async_trait]
impl Sink for UdpSink {
    fn name(&self) -> &str {
        "udp"
    }

    async fn write(&self, batch: &Batch) -> Result<(), SinkError> {
        let lines = batch
            .measurements
            .iter()
            .map(encode_line)
            .collect::<Result<Vec<_>, _>>()?;

        let (packets, oversized) = pack_lines(lines, self.packet_size, MAX_DATAGRAM_BYTES);
        if oversized > 0 {
            tracing::warn!(
                target_addr = %self.target,
                batch = %batch.short_id(),
                oversized,
                "skipping lines larger than one datagram"
            );
        }
        for packet in packets {
            self.socket.send(packet.as_bytes()).await?;
        }
        Ok(())
    }
}

/// Group lines into datagram payloads of at most `per_packet` lines and
/// `max_bytes` bytes. Lines that cannot fit any datagram are dropped and
/// counted.
fn pack_lines(lines: Vec<String>, per_packet: usize, max_bytes: usize) -> (Vec<String>, usize) {
    let mut packets = Vec::new();
    let mut current = String::new();
    let mut in_current = 0;
    let mut oversized = 0;

    for line in lines {
        if line.len() > max_bytes {
            oversized += 1;
            continue;
        }
        let needed = if in_current == 0 { line.len() } else { current.len() + 1 + line.len() };
        if in_current > 0 && (in_current == per_packet || needed > max_bytes) {
            packets.push(std::mem::take(&mut current));
            in_current = 0;
        }
        if in_current > 0 {
            current.push('\n');
        }
        current.push_str(&line);
        in_current += 1;
    }
    if in_current > 0 {
        packets.push(current);
    }
    (packets, oversized)
}

/// Encode one measurement as `name,tag=v value=<f64> <ns>`.
///
/// Tags with an empty value are skipped; non-finite values are rejected.
pub fn encode_line(m: &Measurement) -> Result<String, SinkError> {
    if !m.value.is_finite() {
        return Err(SinkError::Serialization(format!(
            "non-finite value {} for '{}'",
            m.value, m.name
        )));
    }

    let mut line = escape(&m.name, &[',', ' ']);
    for (key, value) in &m.tags {
        if value.is_empty() {
            continue;
        }
        line.push(',');
        line.push_str(&escape(key, &[',', '=', ' ']));
        line.push('=');
        line.push_str(&escape(value, &[',', '=', ' ']));
    }

    let ns = m.timestamp.timestamp_nanos_opt().unwrap_or_default();
    line.push_str(&format!(" value={} {}", m.value, ns));
    Ok(line)
}

fn escape(raw: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn at_epoch_second(m: Measurement) -> Measurement {
        m.at(Utc.timestamp_opt(1, 0).unwrap())
    }

    #[test]
    fn test_encode_line() {
        let m = at_epoch_second(
            Measurement::new("method_call_duration", 0.5)
                .with_tag("method", "db.fetch")
                .with_tag("action", "GET /api/users/:id"),
        );
        assert_eq!(
            encode_line(&m).unwrap(),
            "method_call_duration,action=GET\\ /api/users/:id,method=db.fetch value=0.5 1000000000"
        );
    }

    #[test]
    fn test_encode_escapes_and_skips_empty_tags() {
        let m = at_epoch_second(
            Measurement::new("a,b c", 2.0)
                .with_tag("k=1", "x,y")
                .with_tag("empty", ""),
        );
        assert_eq!(encode_line(&m).unwrap(), "a\\,b\\ c,k\\=1=x\\,y value=2 1000000000");
    }

    #[test]
    fn test_encode_rejects_nan() {
        let m = Measurement::new("broken", f64::NAN);
        assert!(matches!(encode_line(&m), Err(SinkError::Serialization(_))));
    }

    #[test]
    fn test_pack_lines_respects_byte_limit() {
        let lines: Vec<String> = ["aaaa", "bbbb", "cccc", "dddddddddddd", "ee"]
            .iter()
            .map(|l| l.to_string())
            .collect();

        // 10 bytes fit two 4-byte lines plus the separator
        let (packets, oversized) = pack_lines(lines, 100, 10);
        assert_eq!(packets, vec!["aaaa\nbbbb", "cccc\nee"]);
        assert_eq!(oversized, 1);
    }

    #[test]
    fn test_pack_lines_respects_line_count() {
        let lines: Vec<String> = (0..5).map(|i| format!("m{i}")).collect();
        let (packets, oversized) = pack_lines(lines, 2, MAX_DATAGRAM_BYTES);
        assert_eq!(packets, vec!["m0\nm1", "m2\nm3", "m4"]);
        assert_eq!(oversized, 0);
    }

    #[tokio::test]
    async fn test_packets_group_lines() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = receiver.local_addr().unwrap().port();
        let sink = UdpSink::connect("127.0.0.1", port, 2).await.unwrap();

        let batch = Batch::new((0..3).map(|i| Measurement::new("m", i as f64)).collect());
        sink.write(&batch).await.unwrap();

        let mut buf = [0u8; 1024];
        let n = receiver.recv(&mut buf).await.unwrap();
        let first = String::from_utf8_lossy(&buf[..n]).to_string();
        assert_eq!(first.lines().count(), 2);
        assert!(first.starts_with("m value=0 "));

        let n = receiver.recv(&mut buf).await.unwrap();
        let second = String::from_utf8_lossy(&buf[..n]).to_string();
        assert_eq!(second.lines().count(), 1);
        assert!(second.starts_with("m value=2 "));
    }
}
