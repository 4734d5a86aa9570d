use std::net::IpAddr;
use std::time::{Duration, Instant};

use anyhow::Context;
use hickory_resolver::proto::rr::RecordType;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::lookup::dto::{DnsRecords, PortStatus, RecordSet, SpeedTestResult, WhoisInfo};
use crate::state::AppState;

const IANA_WHOIS: &str = "whois.iana.org";
const UPLOAD_BYTES: usize = 2 * 1024 * 1024;

fn probe_timeout(state: &AppState) -> Duration {
    Duration::from_secs(state.config.probe.timeout_secs.max(1))
}

async fn resolve_first_ip(state: &AppState, host: &str) -> anyhow::Result<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    let lookup = state
        .resolver
        .lookup_ip(host)
        .await
        .with_context(|| format!("resolve {host}"))?;
    lookup.iter().next().context("no address records")
}

// ── WHOIS ────────────────────────────────────────────────────────────

async fn query_whois_server(
    server: &str,
    query: &str,
    limit: Duration,
) -> anyhow::Result<String> {
    let mut stream = timeout(limit, TcpStream::connect((server, 43)))
        .await
        .with_context(|| format!("whois connect to {server} timed out"))??;
    stream.write_all(query.as_bytes()).await?;
    stream.write_all(b"\r\n").await?;
    let mut raw = Vec::new();
    timeout(limit, stream.read_to_end(&mut raw))
        .await
        .with_context(|| format!("whois read from {server} timed out"))??;
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

/// The registry a TLD delegates to, per IANA's `refer:` line.
fn referral_server(raw: &str) -> Option<String> {
    raw.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        (key.trim().eq_ignore_ascii_case("refer")).then(|| value.trim().to_string())
    })
}

fn parse_whois(raw: &str) -> WhoisInfo {
    let mut info = WhoisInfo::default();
    for line in raw.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match key.as_str() {
            "domain name" | "domain" => {
                info.domain_name.get_or_insert_with(|| value.to_lowercase());
            }
            "registrar" => {
                info.registrar.get_or_insert_with(|| value.to_string());
            }
            "creation date" | "created" | "registered on" => {
                info.creation_date.get_or_insert_with(|| value.to_string());
            }
            "registry expiry date" | "expiration date" | "expiry date" => {
                info.expiration_date.get_or_insert_with(|| value.to_string());
            }
            "name server" | "nserver" => {
                let server = value.to_lowercase();
                if !info.name_servers.contains(&server) {
                    info.name_servers.push(server);
                }
            }
            "domain status" | "status" => {
                let status = value.to_string();
                if !info.status.contains(&status) {
                    info.status.push(status);
                }
            }
            _ => {}
        }
    }
    info
}

/// Follows the IANA referral to the registry server; falls back to whatever
/// IANA itself returned when the registry is unreachable.
pub async fn whois(state: &AppState, host: &str) -> anyhow::Result<WhoisInfo> {
    let limit = probe_timeout(state);
    let iana = query_whois_server(IANA_WHOIS, host, limit).await?;
    let raw = match referral_server(&iana) {
        Some(server) if server != IANA_WHOIS => {
            match query_whois_server(&server, host, limit).await {
                Ok(raw) => raw,
                Err(_) => iana,
            }
        }
        _ => iana,
    };
    Ok(parse_whois(&raw))
}

// ── DNS ──────────────────────────────────────────────────────────────

/// Resolves the classic record set. A failing type reports inline so one
/// NXDOMAIN on CNAME does not hide the A records.
pub async fn dns_records(state: &AppState, host: &str) -> DnsRecords {
    let limit = probe_timeout(state);
    let mut records = DnsRecords::new();

    let a = timeout(limit, state.resolver.ipv4_lookup(host)).await;
    records.insert(
        "A",
        flatten(a, |lookup| {
            lookup.iter().map(|r| r.0.to_string()).collect()
        }),
    );

    let aaaa = timeout(limit, state.resolver.ipv6_lookup(host)).await;
    records.insert(
        "AAAA",
        flatten(aaaa, |lookup| {
            lookup.iter().map(|r| r.0.to_string()).collect()
        }),
    );

    let mx = timeout(limit, state.resolver.mx_lookup(host)).await;
    records.insert(
        "MX",
        flatten(mx, |lookup| {
            lookup
                .iter()
                .map(|mx| format!("{} {}", mx.preference(), mx.exchange()))
                .collect()
        }),
    );

    let cname = timeout(limit, state.resolver.lookup(host, RecordType::CNAME)).await;
    records.insert(
        "CNAME",
        flatten(cname, |lookup| {
            lookup.iter().map(|r| r.to_string()).collect()
        }),
    );

    let txt = timeout(limit, state.resolver.txt_lookup(host)).await;
    records.insert(
        "TXT",
        flatten(txt, |lookup| {
            lookup.iter().map(|r| r.to_string()).collect()
        }),
    );

    records
}

fn flatten<T, E: std::fmt::Display>(
    outcome: Result<Result<T, E>, tokio::time::error::Elapsed>,
    collect: impl FnOnce(T) -> Vec<String>,
) -> RecordSet {
    match outcome {
        Ok(Ok(lookup)) => RecordSet::Records(collect(lookup)),
        Ok(Err(e)) => RecordSet::Failed {
            error: e.to_string(),
        },
        Err(_) => RecordSet::Failed {
            error: "lookup timed out".into(),
        },
    }
}

// ── Geolocation ──────────────────────────────────────────────────────

pub async fn geolocate(state: &AppState, host: &str) -> anyhow::Result<serde_json::Value> {
    let ip = resolve_first_ip(state, host).await?;
    let url = format!(
        "{}/{ip}",
        state.config.probe.geoip_url.trim_end_matches('/')
    );
    let body = state
        .http
        .get(url)
        .timeout(probe_timeout(state))
        .send()
        .await?
        .error_for_status()?
        .json::<serde_json::Value>()
        .await?;
    Ok(body)
}

// ── Port probe ───────────────────────────────────────────────────────

/// A refused or timed-out connect both read as "closed", like any plain
/// connect scan.
pub async fn port_scan(state: &AppState, host: &str, port: u16) -> anyhow::Result<PortStatus> {
    let ip = resolve_first_ip(state, host).await?;
    let open = matches!(
        timeout(probe_timeout(state), TcpStream::connect((ip, port))).await,
        Ok(Ok(_))
    );
    Ok(PortStatus {
        port,
        status: if open { "open" } else { "closed" },
    })
}

// ── Throughput ───────────────────────────────────────────────────────

fn mbps(bytes: usize, elapsed: Duration) -> f64 {
    (bytes as f64 * 8.0) / elapsed.as_secs_f64().max(1e-6) / 1_000_000.0
}

pub async fn speed_test(state: &AppState) -> anyhow::Result<SpeedTestResult> {
    let cfg = &state.config.probe;
    let budget = Duration::from_secs(cfg.speed_budget_secs.max(1));

    let download_url: reqwest::Url = cfg.speed_download_url.parse().context("download url")?;
    let host = download_url
        .host_str()
        .context("download url has no host")?
        .to_string();
    let port = download_url.port_or_known_default().unwrap_or(443);

    // TCP connect round-trip stands in for latency.
    let started = Instant::now();
    timeout(probe_timeout(state), TcpStream::connect((host.as_str(), port)))
        .await
        .context("latency probe timed out")??;
    let ping_ms = started.elapsed().as_secs_f64() * 1000.0;

    let started = Instant::now();
    let mut response = state
        .http
        .get(download_url)
        .timeout(budget)
        .send()
        .await?
        .error_for_status()?;
    let mut received = 0usize;
    while let Some(chunk) = response.chunk().await? {
        received += chunk.len();
    }
    let download = mbps(received, started.elapsed());

    let started = Instant::now();
    state
        .http
        .post(cfg.speed_upload_url.clone())
        .timeout(budget)
        .body(vec![0u8; UPLOAD_BYTES])
        .send()
        .await?
        .error_for_status()?;
    let upload = mbps(UPLOAD_BYTES, started.elapsed());

    Ok(SpeedTestResult {
        download: format!("{download:.2} Mbps"),
        upload: format!("{upload:.2} Mbps"),
        ping: format!("{ping_ms:.2} ms"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTRY_RESPONSE: &str = "\
Domain Name: EXAMPLE.COM\r
Registrar: Example Registrar, LLC\r
Creation Date: 1995-08-14T04:00:00Z\r
Registry Expiry Date: 2026-08-13T04:00:00Z\r
Name Server: A.IANA-SERVERS.NET\r
Name Server: B.IANA-SERVERS.NET\r
Name Server: a.iana-servers.net\r
Domain Status: clientTransferProhibited\r
>>> Last update of whois database <<<\r
";

    #[test]
    fn parses_registry_fields() {
        let info = parse_whois(REGISTRY_RESPONSE);
        assert_eq!(info.domain_name.as_deref(), Some("example.com"));
        assert_eq!(info.registrar.as_deref(), Some("Example Registrar, LLC"));
        assert_eq!(info.creation_date.as_deref(), Some("1995-08-14T04:00:00Z"));
        assert_eq!(
            info.expiration_date.as_deref(),
            Some("2026-08-13T04:00:00Z")
        );
        assert_eq!(
            info.name_servers,
            vec!["a.iana-servers.net", "b.iana-servers.net"]
        );
        assert_eq!(info.status, vec!["clientTransferProhibited"]);
    }

    #[test]
    fn first_value_wins_for_scalar_fields() {
        let raw = "Creation Date: 2001-01-01\nCreation Date: 1999-01-01\n";
        let info = parse_whois(raw);
        assert_eq!(info.creation_date.as_deref(), Some("2001-01-01"));
    }

    #[test]
    fn referral_extraction() {
        let raw = "domain: COM\nrefer: whois.verisign-grs.com\nstatus: ACTIVE\n";
        assert_eq!(
            referral_server(raw).as_deref(),
            Some("whois.verisign-grs.com")
        );
        assert!(referral_server("domain: COM\n").is_none());
    }

    #[test]
    fn empty_values_are_skipped() {
        let info = parse_whois("Registrar:\nRegistrar: Real One\n");
        assert_eq!(info.registrar.as_deref(), Some("Real One"));
    }

    #[test]
    fn mbps_math() {
        // 1 MB in one second is 8 Mbit/s.
        let rate = mbps(1_000_000, Duration::from_secs(1));
        assert!((rate - 8.0).abs() < f64::EPSILON);
    }
}
