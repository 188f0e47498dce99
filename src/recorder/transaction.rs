//! Network transaction assembly
//!
//! A transaction accumulates the CDP Network events for one `requestId`
//! until a terminal event turns it into a HAR entry. Redirects reuse the
//! id: the predecessor is finalized with the redirect response and the
//! successor starts fresh, carrying the predecessor URL.

use chromiumoxide::cdp::browser_protocol::network;
use chrono::{DateTime, TimeZone, Utc};

use super::cookies;
use crate::har::{
    Cache, Content, Entry, Header, PostData, QueryString, Request, Response, Timings,
};

/// Lifecycle of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Pending,
    HeadersReceived,
    Finished,
    Failed,
}

/// Timing offsets copied out of the CDP `ResourceTiming` structure.
/// Offsets are milliseconds relative to `request_time`; `-1` marks
/// phases that did not happen.
#[derive(Debug, Clone, Copy)]
pub struct TimingInfo {
    pub request_time: f64,
    pub dns_start: f64,
    pub dns_end: f64,
    pub connect_start: f64,
    pub connect_end: f64,
    pub ssl_start: f64,
    pub ssl_end: f64,
    pub send_start: f64,
    pub send_end: f64,
    pub receive_headers_end: f64,
}

impl From<&network::ResourceTiming> for TimingInfo {
    fn from(t: &network::ResourceTiming) -> Self {
        Self {
            request_time: t.request_time,
            dns_start: t.dns_start,
            dns_end: t.dns_end,
            connect_start: t.connect_start,
            connect_end: t.connect_end,
            ssl_start: t.ssl_start,
            ssl_end: t.ssl_end,
            send_start: t.send_start,
            send_end: t.send_end,
            receive_headers_end: t.receive_headers_end,
        }
    }
}

/// Response metadata captured from `responseReceived`.
#[derive(Debug, Clone)]
pub struct ResponseMeta {
    pub url: String,
    pub status: i64,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub mime_type: String,
    pub protocol: Option<String>,
    pub remote_ip: Option<String>,
    pub remote_port: Option<i64>,
    pub connection_id: Option<f64>,
    pub timing: Option<TimingInfo>,
}

impl From<&network::Response> for ResponseMeta {
    fn from(r: &network::Response) -> Self {
        Self {
            url: r.url.clone(),
            status: r.status,
            status_text: r.status_text.clone(),
            headers: headers_to_pairs(&r.headers),
            mime_type: r.mime_type.clone(),
            protocol: r.protocol.clone(),
            remote_ip: r.remote_ip_address.clone(),
            remote_port: r.remote_port,
            connection_id: Some(r.connection_id),
            timing: r.timing.as_ref().map(TimingInfo::from),
        }
    }
}

/// Flatten a CDP `Headers` object into name/value pairs.
#[must_use]
pub fn headers_to_pairs(headers: &network::Headers) -> Vec<(String, String)> {
    match headers.inner().as_object() {
        Some(map) => map
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (name.clone(), value)
            })
            .collect(),
        None => Vec::new(),
    }
}

fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Merge wire headers over the renderer's view: ExtraInfo events carry
/// what actually went over the network, so their values win.
fn merge_headers(base: &mut Vec<(String, String)>, wire: Vec<(String, String)>) {
    for (name, value) in wire {
        match base.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(&name)) {
            Some((_, existing)) => *existing = value,
            None => base.push((name, value)),
        }
    }
}

/// One request/response cycle keyed by the CDP `requestId`.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub request_id: String,
    pub url: String,
    pub method: String,
    pub request_headers: Vec<(String, String)>,
    pub post_data: Option<String>,
    /// False when a body override was attempted but rejected
    pub post_data_delivered: bool,
    pub resource_type: Option<String>,
    pub started: DateTime<Utc>,
    pub start_mono: f64,
    pub end_mono: Option<f64>,
    pub response: Option<ResponseMeta>,
    pub response_extra_headers: Vec<(String, String)>,
    /// Running sum of `dataReceived.encodedDataLength`
    pub transferred: i64,
    /// Running sum of decoded `dataReceived.dataLength`
    pub decoded_length: i64,
    /// Authoritative wire total from `loadingFinished`
    pub encoded_total: i64,
    pub body: Option<(String, bool)>,
    pub state: TxState,
    pub error: Option<String>,
    pub redirect_from: Option<String>,
}

impl Transaction {
    pub fn from_request_event(event: &network::EventRequestWillBeSent) -> Self {
        Self {
            request_id: event.request_id.inner().to_string(),
            url: event.request.url.clone(),
            method: event.request.method.clone(),
            request_headers: headers_to_pairs(&event.request.headers),
            post_data: event.request.post_data.clone(),
            post_data_delivered: true,
            resource_type: event.r#type.as_ref().map(resource_type_name),
            started: wall_time_to_utc(*event.wall_time.inner()),
            start_mono: *event.timestamp.inner(),
            end_mono: None,
            response: None,
            response_extra_headers: Vec::new(),
            transferred: 0,
            decoded_length: 0,
            encoded_total: 0,
            body: None,
            state: TxState::Pending,
            error: None,
            redirect_from: None,
        }
    }

    pub fn merge_request_extra(&mut self, headers: &network::Headers) {
        merge_headers(&mut self.request_headers, headers_to_pairs(headers));
    }

    pub fn set_response(&mut self, meta: ResponseMeta) {
        self.response = Some(meta);
        self.state = TxState::HeadersReceived;
    }

    pub fn merge_response_extra(&mut self, headers: &network::Headers) {
        self.response_extra_headers = headers_to_pairs(headers);
    }

    pub fn add_data(&mut self, data_length: i64, encoded_data_length: i64) {
        self.decoded_length += data_length;
        self.transferred += encoded_data_length;
    }

    pub fn finish(&mut self, end_mono: f64, encoded_total: f64) {
        self.end_mono = Some(end_mono);
        if encoded_total > 0.0 {
            self.encoded_total = encoded_total as i64;
        }
        self.state = TxState::Finished;
    }

    pub fn fail(&mut self, end_mono: f64, error_text: String) {
        self.end_mono = Some(end_mono);
        self.error = Some(error_text);
        self.state = TxState::Failed;
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self.state, TxState::Finished | TxState::Failed)
    }

    /// The MIME type the body-capture predicate evaluates.
    #[must_use]
    pub fn mime_type(&self) -> &str {
        self.response.as_ref().map_or("", |r| r.mime_type.as_str())
    }

    /// Project the terminal transaction into a HAR entry.
    #[must_use]
    pub fn to_entry(&self) -> Entry {
        let elapsed_ms = self
            .end_mono
            .map(|end| ((end - self.start_mono) * 1000.0).max(0.0))
            .unwrap_or(0.0);

        // Response headers: wire view wins where present
        let mut response_headers = self
            .response
            .as_ref()
            .map(|r| r.headers.clone())
            .unwrap_or_default();
        merge_headers(&mut response_headers, self.response_extra_headers.clone());

        let request_cookies = header_value(&self.request_headers, "cookie")
            .map(cookies::parse_cookie_header)
            .unwrap_or_default();
        let response_cookies = header_value(&response_headers, "set-cookie")
            .map(cookies::parse_set_cookie_header)
            .unwrap_or_default();

        let http_version = self
            .response
            .as_ref()
            .and_then(|r| r.protocol.as_deref())
            .map(http_version_name)
            .unwrap_or_default();

        let post_data = self.post_data.as_ref().map(|text| PostData {
            mime_type: header_value(&self.request_headers, "content-type")
                .unwrap_or("")
                .to_string(),
            text: self.post_data_delivered.then(|| text.clone()),
            comment: (!self.post_data_delivered).then(|| "body not delivered".to_string()),
        });
        let request_body_size = self
            .post_data
            .as_ref()
            .filter(|_| self.post_data_delivered)
            .map_or(0, |b| b.len() as i64);

        let (content_size, content_text, content_encoding) = match &self.body {
            Some((text, base64_encoded)) => {
                let size = if self.decoded_length > 0 {
                    self.decoded_length
                } else if *base64_encoded {
                    // decoded size estimate for base64 payloads
                    (text.len() as i64) * 3 / 4
                } else {
                    text.len() as i64
                };
                (
                    size,
                    Some(text.clone()),
                    base64_encoded.then(|| "base64".to_string()),
                )
            }
            None if self.decoded_length > 0 => (self.decoded_length, None, None),
            None => (-1, None, None),
        };

        let redirect_url = header_value(&response_headers, "location")
            .unwrap_or("")
            .to_string();

        let response = match &self.response {
            Some(meta) => Response {
                status: meta.status,
                status_text: meta.status_text.clone(),
                http_version: http_version.clone(),
                cookies: response_cookies,
                headers: pairs_to_headers(&response_headers),
                content: Content {
                    size: content_size,
                    compression: None,
                    mime_type: meta.mime_type.clone(),
                    text: content_text,
                    encoding: content_encoding,
                },
                redirect_url,
                headers_size: -1,
                body_size: if self.encoded_total > 0 {
                    self.encoded_total
                } else {
                    -1
                },
            },
            // Failed before headers: synthetic zero-status response
            None => Response::default(),
        };

        Entry {
            pageref: None,
            started_date_time: self.started,
            time: elapsed_ms,
            request: Request {
                method: self.method.clone(),
                url: self.url.clone(),
                http_version,
                cookies: request_cookies,
                headers: pairs_to_headers(&self.request_headers),
                query_string: query_pairs(&self.url),
                post_data,
                headers_size: -1,
                body_size: request_body_size,
            },
            response,
            cache: Cache::default(),
            timings: self.har_timings(elapsed_ms),
            server_ip_address: self.response.as_ref().and_then(|r| r.remote_ip.clone()),
            connection: self
                .response
                .as_ref()
                .and_then(|r| r.connection_id)
                .map(|id| format!("{id}")),
            comment: None,
            resource_type: self.resource_type.clone(),
            error: self.error.clone(),
            redirect_from: self.redirect_from.clone(),
            transfer_size: (self.transferred > 0).then_some(self.transferred),
        }
    }

    fn har_timings(&self, elapsed_ms: f64) -> Timings {
        let Some(timing) = self.response.as_ref().and_then(|r| r.timing) else {
            // No breakdown: attribute everything to wait
            return Timings {
                wait: elapsed_ms,
                ..Default::default()
            };
        };
        let phase = |start: f64, end: f64| {
            if start >= 0.0 && end >= start {
                end - start
            } else {
                -1.0
            }
        };
        let dns = phase(timing.dns_start, timing.dns_end);
        let connect = phase(timing.connect_start, timing.connect_end);
        let ssl = phase(timing.ssl_start, timing.ssl_end);
        let send = phase(timing.send_start, timing.send_end);
        let wait = phase(timing.send_end, timing.receive_headers_end);
        let receive = (elapsed_ms - timing.receive_headers_end).max(0.0);
        Timings {
            blocked: -1.0,
            dns,
            connect,
            send: send.max(0.0),
            wait: wait.max(0.0),
            receive,
            ssl,
        }
    }
}

fn pairs_to_headers(pairs: &[(String, String)]) -> Vec<Header> {
    pairs
        .iter()
        .map(|(name, value)| Header {
            name: name.clone(),
            value: value.clone(),
        })
        .collect()
}

fn query_pairs(raw_url: &str) -> Vec<QueryString> {
    match url::Url::parse(raw_url) {
        Ok(url) => url
            .query_pairs()
            .map(|(name, value)| QueryString {
                name: name.into_owned(),
                value: value.into_owned(),
            })
            .collect(),
        // Not a parseable absolute URL; salvage the query part manually
        Err(_) => raw_url
            .split_once('?')
            .map(|(_, query)| {
                query
                    .split('&')
                    .filter_map(|pair| {
                        let (name, value) = pair.split_once('=')?;
                        Some(QueryString {
                            name: urlencoding::decode(name).ok()?.into_owned(),
                            value: urlencoding::decode(value).ok()?.into_owned(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default(),
    }
}

/// Seconds-since-epoch (fractional) to UTC.
#[must_use]
pub fn wall_time_to_utc(wall: f64) -> DateTime<Utc> {
    let secs = wall.trunc() as i64;
    let nanos = (wall.fract() * 1e9) as u32;
    Utc.timestamp_opt(secs, nanos).single().unwrap_or_else(Utc::now)
}

fn resource_type_name(resource_type: &network::ResourceType) -> String {
    format!("{resource_type:?}").to_ascii_lowercase()
}

fn http_version_name(protocol: &str) -> String {
    match protocol {
        "http/0.9" => "HTTP/0.9".to_string(),
        "http/1.0" => "HTTP/1.0".to_string(),
        "http/1.1" => "HTTP/1.1".to_string(),
        "h2" => "HTTP/2".to_string(),
        "h3" => "HTTP/3".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_tx(url: &str) -> Transaction {
        Transaction {
            request_id: "1000.1".into(),
            url: url.into(),
            method: "GET".into(),
            request_headers: vec![("Accept".into(), "*/*".into())],
            post_data: None,
            post_data_delivered: true,
            resource_type: Some("document".into()),
            started: Utc::now(),
            start_mono: 100.0,
            end_mono: None,
            response: None,
            response_extra_headers: Vec::new(),
            transferred: 0,
            decoded_length: 0,
            encoded_total: 0,
            body: None,
            state: TxState::Pending,
            error: None,
            redirect_from: None,
        }
    }

    fn response_meta(status: i64) -> ResponseMeta {
        ResponseMeta {
            url: "https://example.com/".into(),
            status,
            status_text: "OK".into(),
            headers: vec![("Content-Type".into(), "text/html".into())],
            mime_type: "text/html".into(),
            protocol: Some("http/1.1".into()),
            remote_ip: Some("93.184.216.34".into()),
            remote_port: Some(443),
            connection_id: Some(12.0),
            timing: None,
        }
    }

    #[test]
    fn finished_transaction_projects_full_entry() {
        let mut tx = minimal_tx("https://example.com/?q=hello%20world");
        tx.set_response(response_meta(200));
        tx.add_data(5, 5);
        tx.finish(100.25, 120.0);

        let entry = tx.to_entry();
        assert_eq!(entry.response.status, 200);
        assert_eq!(entry.request.http_version, "HTTP/1.1");
        assert!((entry.time - 250.0).abs() < 1.0);
        assert_eq!(entry.server_ip_address.as_deref(), Some("93.184.216.34"));
        // _transferSize tracks the dataReceived deltas, bodySize the wire total
        assert_eq!(entry.transfer_size, Some(5));
        assert_eq!(entry.response.body_size, 120);
        assert_eq!(entry.request.query_string.len(), 1);
        assert_eq!(entry.request.query_string[0].value, "hello world");
        assert_eq!(entry.resource_type.as_deref(), Some("document"));
    }

    #[test]
    fn failed_transaction_is_status_zero_with_error() {
        let mut tx = minimal_tx("https://example.com/broken");
        tx.fail(100.5, "net::ERR_CONNECTION_REFUSED".into());
        let entry = tx.to_entry();
        assert_eq!(entry.response.status, 0);
        assert_eq!(entry.error.as_deref(), Some("net::ERR_CONNECTION_REFUSED"));
        assert_eq!(entry.response.content.size, -1);
    }

    #[test]
    fn request_cookies_are_parsed_from_headers() {
        let mut tx = minimal_tx("https://example.com/");
        tx.request_headers
            .push(("Cookie".into(), "a=1; b=2".into()));
        tx.set_response(response_meta(200));
        tx.finish(100.1, 0.0);
        let entry = tx.to_entry();
        assert_eq!(entry.request.cookies.len(), 2);
    }

    #[test]
    fn set_cookie_and_location_come_from_wire_headers() {
        let mut tx = minimal_tx("https://example.com/a");
        tx.set_response(ResponseMeta {
            status: 302,
            status_text: "Found".into(),
            ..response_meta(302)
        });
        tx.response_extra_headers = vec![
            ("location".into(), "https://example.com/b".into()),
            ("set-cookie".into(), "sid=1; Path=/".into()),
        ];
        tx.finish(100.1, 0.0);
        let entry = tx.to_entry();
        assert_eq!(entry.response.redirect_url, "https://example.com/b");
        assert_eq!(entry.response.cookies.len(), 1);
        assert_eq!(entry.response.status, 302);
    }

    #[test]
    fn undelivered_body_is_flagged_not_fabricated() {
        let mut tx = minimal_tx("https://example.com/api");
        tx.method = "POST".into();
        tx.post_data = Some("payload".into());
        tx.post_data_delivered = false;
        tx.set_response(response_meta(200));
        tx.finish(100.1, 0.0);
        let entry = tx.to_entry();
        let post = entry.request.post_data.unwrap();
        assert!(post.text.is_none());
        assert_eq!(post.comment.as_deref(), Some("body not delivered"));
        assert_eq!(entry.request.body_size, 0);
    }

    #[test]
    fn extra_info_headers_override_renderer_headers() {
        let mut base = vec![("User-Agent".into(), "renderer".into())];
        merge_headers(
            &mut base,
            vec![
                ("user-agent".into(), "wire".into()),
                ("X-Extra".into(), "1".into()),
            ],
        );
        assert_eq!(base.len(), 2);
        assert_eq!(base[0].1, "wire");
    }

    #[test]
    fn timings_fall_back_to_wait_without_breakdown() {
        let mut tx = minimal_tx("https://example.com/");
        tx.set_response(response_meta(200));
        tx.finish(100.2, 0.0);
        let entry = tx.to_entry();
        assert!((entry.timings.wait - entry.time).abs() < f64::EPSILON);
        assert_eq!(entry.timings.dns, -1.0);
    }

    #[test]
    fn timing_breakdown_maps_cdp_phases() {
        let mut tx = minimal_tx("https://example.com/");
        let mut meta = response_meta(200);
        meta.timing = Some(TimingInfo {
            request_time: 100.0,
            dns_start: 1.0,
            dns_end: 3.0,
            connect_start: 3.0,
            connect_end: 10.0,
            ssl_start: 5.0,
            ssl_end: 9.0,
            send_start: 10.0,
            send_end: 11.0,
            receive_headers_end: 50.0,
        });
        tx.set_response(meta);
        tx.finish(100.1, 0.0); // 100ms total
        let entry = tx.to_entry();
        assert!((entry.timings.dns - 2.0).abs() < f64::EPSILON);
        assert!((entry.timings.connect - 7.0).abs() < f64::EPSILON);
        assert!((entry.timings.ssl - 4.0).abs() < f64::EPSILON);
        assert!((entry.timings.send - 1.0).abs() < f64::EPSILON);
        assert!((entry.timings.wait - 39.0).abs() < f64::EPSILON);
        assert!((entry.timings.receive - 50.0).abs() < 1.0);
    }
}
