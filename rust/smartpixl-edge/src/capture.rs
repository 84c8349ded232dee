// smartpixl-edge: Request capture and record sealing

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use smartpixl_classify::{BehaviourTracker, CidrTrie, DatacenterIndex, GeoCache};
use smartpixl_record::{
    fingerprint_hash, headers_to_json, FingerprintInput, TrackingRecord,
};

/// Addresses skipped when walking the forwarded chain: loopback plus the
/// configured trusted CIDRs, matched with the same prefix trie the
/// datacenter classifier uses
pub struct TrustedProxies {
    ranges: CidrTrie,
}

impl TrustedProxies {
    /// Build from configured CIDR strings; invalid entries are counted
    pub fn from_cidrs<S: AsRef<str>>(cidrs: &[S]) -> (Self, usize) {
        let (ranges, skipped) = CidrTrie::build(cidrs.iter().map(|c| (c.as_ref(), "trusted")));
        (Self { ranges }, skipped)
    }

    pub fn is_proxy(&self, ip: IpAddr) -> bool {
        ip.is_loopback() || self.ranges.lookup(ip).is_some()
    }
}

/// Everything the request handler extracts before the response goes out;
/// capture works on this envelope alone, never on the live request
#[derive(Debug, Clone)]
pub struct RequestEnvelope {
    pub path: String,
    pub query: String,
    pub headers: Vec<(String, String)>,
    pub peer: IpAddr,
}

impl RequestEnvelope {
    fn header(&self, name: &str) -> &str {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .unwrap_or("")
    }
}

/// Company and pixel ids from the well-known path shape
/// `/{companyId}/{pixelId}/...`
pub fn parse_identity(path: &str) -> Option<(i64, i64)> {
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    let company: i64 = segments.next()?.parse().ok()?;
    let pixel: i64 = segments.next()?.parse().ok()?;
    (company > 0 && pixel > 0).then_some((company, pixel))
}

/// Walk the forwarded chain right-to-left, skip known proxies, take the
/// first remaining entry; fall back to the direct peer when none remain.
/// Unparseable entries are treated as proxies. Returns the client address
/// and the number of hops skipped (the proxy-depth indicator).
pub fn select_client_ip(
    chain: &[String],
    peer: IpAddr,
    trusted: &TrustedProxies,
) -> (IpAddr, u32) {
    let mut skipped = 0u32;
    for entry in chain.iter().rev() {
        match entry.parse::<IpAddr>() {
            Ok(ip) if trusted.is_proxy(ip) => skipped += 1,
            Ok(ip) => return (ip, skipped),
            Err(_) => skipped += 1,
        }
    }
    (peer, skipped)
}

fn query_hints(query: &str) -> (Option<&str>, Option<&str>) {
    let mut canvas = None;
    let mut webgl = None;
    for pair in query.split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        match key {
            "canvas" => canvas = Some(value),
            "webgl" => webgl = Some(value),
            _ => {}
        }
    }
    (canvas, webgl)
}

/// Synchronous hot-path capture: parse, classify, seal. Wired once at
/// startup with the classification stack; every call stays on the request
/// task with no suspension points.
pub struct Capture {
    datacenters: Arc<DatacenterIndex>,
    behaviour: Arc<BehaviourTracker>,
    geo: Arc<GeoCache>,
    trusted: TrustedProxies,
}

impl Capture {
    pub fn new(
        datacenters: Arc<DatacenterIndex>,
        behaviour: Arc<BehaviourTracker>,
        geo: Arc<GeoCache>,
        trusted: TrustedProxies,
    ) -> Self {
        Self {
            datacenters,
            behaviour,
            geo,
            trusted,
        }
    }

    /// Build one sealed record, or reject. The caller already has its
    /// pixel either way.
    pub fn seal(&self, envelope: &RequestEnvelope, now: DateTime<Utc>) -> Option<TrackingRecord> {
        let (company_id, pixel_id) = parse_identity(&envelope.path)?;

        let forwarded_chain: Vec<String> = envelope
            .header("x-forwarded-for")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        let (client_ip, proxy_depth) =
            select_client_ip(&forwarded_chain, envelope.peer, &self.trusted);

        let (canvas_hint, webgl_hint) = query_hints(&envelope.query);
        let fingerprint = fingerprint_hash(&FingerprintInput {
            user_agent: envelope.header("user-agent"),
            accept_language: envelope.header("accept-language"),
            sec_ch_ua: envelope.header("sec-ch-ua"),
            canvas_hint,
            webgl_hint,
        });

        let datacenter = self.datacenters.lookup(client_ip).map(|p| p.to_string());
        let behaviour = self.behaviour.observe(client_ip, now, fingerprint);
        let geo = self.geo.get(client_ip).map(|snapshot| (*snapshot).clone());

        Some(TrackingRecord {
            company_id,
            pixel_id,
            received_at: now,
            ip_address: client_ip.to_string(),
            forwarded_chain,
            proxy_depth,
            request_path: envelope.path.clone(),
            query_string: envelope.query.clone(),
            user_agent: envelope.header("user-agent").to_string(),
            referer: envelope.header("referer").to_string(),
            headers_json: headers_to_json(
                envelope.headers.iter().map(|(n, v)| (n.as_str(), v.as_str())),
            ),
            fingerprint_hash: fingerprint,
            datacenter,
            behaviour,
            geo,
        })
    }
}
