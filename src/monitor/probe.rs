//! Probe dispatch for the supported protocols.
//!
//! A probe either completes or fails; the error carries the reason for
//! logging but is never surfaced past the monitor. Timeouts are
//! enforced here with the backend's resolved timeout.

use std::net::IpAddr;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, bail, ensure, Context, Result};
use regex::Regex;
use tokio::net::TcpStream;
use tokio::process::Command;
use url::{Host, Url};

use super::config::Protocol;

/// Everything one probe needs, snapshotted from the backend record.
#[derive(Debug, Clone)]
pub(crate) struct ProbeTarget {
    pub(crate) url: Url,
    pub(crate) protocol: Protocol,
    pub(crate) timeout: Duration,
    pub(crate) accept_status_codes: Vec<String>,
}

/// Runs a single probe against the target.
pub(crate) async fn run(target: ProbeTarget) -> Result<()> {
    match target.protocol {
        Protocol::Http | Protocol::Https => probe_http(&target).await,
        Protocol::Tcp => probe_tcp(&target.url, target.timeout).await,
        Protocol::Icmp => probe_icmp(&target.url, target.timeout).await,
    }
}

/// Issues a GET against the backend URL and accepts the response iff
/// the status code matches one of the configured patterns.
async fn probe_http(target: &ProbeTarget) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(target.timeout)
        .build()
        .context("building probe client")?;

    let response = client.get(target.url.clone()).send().await?;
    let status = response.status().as_u16().to_string();

    let accepted = target
        .accept_status_codes
        .iter()
        .any(|pattern| pattern_matches(pattern, &status));
    ensure!(accepted, "unexpected status code: {}", status);
    Ok(())
}

/// Opens and immediately closes a TCP connection to the backend's
/// host and port.
async fn probe_tcp(url: &Url, timeout: Duration) -> Result<()> {
    let port = url.port_or_known_default().context("url has no port")?;

    let connect = async {
        match url.host() {
            Some(Host::Domain(domain)) => TcpStream::connect((domain, port)).await,
            Some(Host::Ipv4(ip)) => TcpStream::connect((IpAddr::V4(ip), port)).await,
            Some(Host::Ipv6(ip)) => TcpStream::connect((IpAddr::V6(ip), port)).await,
            None => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "url has no host",
            )),
        }
    };

    let stream = tokio::time::timeout(timeout, connect)
        .await
        .map_err(|_| anyhow!("connect timed out after {:?}", timeout))??;
    drop(stream);
    Ok(())
}

/// Sends a single ICMP echo via the system `ping` binary, waiting at
/// most the probe timeout rounded up to whole seconds for the reply.
async fn probe_icmp(url: &Url, timeout: Duration) -> Result<()> {
    let host = match url.host() {
        Some(Host::Domain(domain)) => domain.to_string(),
        Some(Host::Ipv4(ip)) => ip.to_string(),
        Some(Host::Ipv6(ip)) => ip.to_string(),
        None => bail!("url has no host"),
    };

    let wait_secs = timeout.as_secs_f64().ceil() as u64;
    let status = Command::new("ping")
        .arg("-c")
        .arg("1")
        .arg("-W")
        .arg(wait_secs.to_string())
        .arg(host)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .context("spawning ping")?;

    ensure!(status.success(), "no icmp echo reply");
    Ok(())
}

/// Matches a status code string against a pattern, adding `^`/`$`
/// anchors when absent. A pattern that fails to compile matches
/// nothing.
fn pattern_matches(pattern: &str, status: &str) -> bool {
    let mut anchored = String::with_capacity(pattern.len() + 2);
    if !pattern.starts_with('^') {
        anchored.push('^');
    }
    anchored.push_str(pattern);
    if !pattern.ends_with('$') {
        anchored.push('$');
    }

    match Regex::new(&anchored) {
        Ok(re) => re.is_match(status),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn target(url: &str, protocol: Protocol, accept: &[&str]) -> ProbeTarget {
        ProbeTarget {
            url: Url::parse(url).unwrap(),
            protocol,
            timeout: Duration::from_secs(1),
            accept_status_codes: accept.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Serves one connection with a canned HTTP response, then exits.
    async fn serve_one_http(status: u16) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {} X\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                    status
                );
                let _ = stream.write_all(response.as_bytes()).await;
            }
        });
        addr
    }

    // ========== Status Pattern Matching ==========

    #[test]
    fn test_pattern_matches_adds_anchors() {
        assert!(pattern_matches("2.+", "200"));
        assert!(pattern_matches("2.+", "299"));
        // The implicit anchors keep a partial match from passing.
        assert!(!pattern_matches("2.+", "120"));
        assert!(!pattern_matches("2.+", "5200"));
    }

    #[test]
    fn test_pattern_matches_keeps_existing_anchors() {
        assert!(pattern_matches("^200$", "200"));
        assert!(pattern_matches("^2..", "201"));
        assert!(pattern_matches("30.$", "302"));
        assert!(!pattern_matches("^200$", "2000"));
    }

    #[test]
    fn test_invalid_pattern_matches_nothing() {
        assert!(!pattern_matches("2[", "200"));
        assert!(!pattern_matches("(", "200"));
    }

    // ========== HTTP ==========

    #[tokio::test]
    async fn test_http_probe_accepts_matching_status() {
        let addr = serve_one_http(200).await;
        let target = target(&format!("http://{}/", addr), Protocol::Http, &["2.+"]);
        assert!(run(target).await.is_ok());
    }

    #[tokio::test]
    async fn test_http_probe_rejects_unexpected_status() {
        let addr = serve_one_http(500).await;
        let target = target(&format!("http://{}/", addr), Protocol::Http, &["2.+"]);
        let err = run(target).await.unwrap_err();
        assert!(err.to_string().contains("unexpected status code"));
    }

    #[tokio::test]
    async fn test_http_probe_honors_custom_patterns() {
        let addr = serve_one_http(503).await;
        let target = target(&format!("http://{}/", addr), Protocol::Http, &["5.."]);
        assert!(run(target).await.is_ok());
    }

    #[tokio::test]
    async fn test_http_probe_times_out_on_silent_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Accept and hold the connection open without responding.
            if let Ok((stream, _)) = listener.accept().await {
                tokio::time::sleep(Duration::from_secs(5)).await;
                drop(stream);
            }
        });

        let mut target = target(&format!("http://{}/", addr), Protocol::Http, &["2.+"]);
        target.timeout = Duration::from_millis(100);
        assert!(run(target).await.is_err());
    }

    // ========== TCP ==========

    #[tokio::test]
    async fn test_tcp_probe_succeeds_against_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let target = target(&format!("tcp://{}", addr), Protocol::Tcp, &[]);
        assert!(run(target).await.is_ok());
    }

    #[tokio::test]
    async fn test_tcp_probe_fails_when_nothing_listens() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let target = target(&format!("tcp://{}", addr), Protocol::Tcp, &[]);
        assert!(run(target).await.is_err());
    }

    #[tokio::test]
    async fn test_tcp_probe_requires_a_port() {
        let target = target("tcp://127.0.0.1", Protocol::Tcp, &[]);
        assert!(run(target).await.is_err());
    }
}
