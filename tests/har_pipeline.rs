//! Transaction-to-HAR pipeline invariants, driven without a browser by
//! feeding transactions straight into the emission path.

use std::sync::Arc;

use harcap::filter::FilterStage;
use harcap::har::{Creator, Har, HarBuilder, wrap_entries};
use harcap::recorder::transaction::{ResponseMeta, Transaction, TxState};

fn transaction(id: &str, url: &str, started_at: f64) -> Transaction {
    Transaction {
        request_id: id.into(),
        url: url.into(),
        method: "GET".into(),
        request_headers: Vec::new(),
        post_data: None,
        post_data_delivered: true,
        resource_type: Some("document".into()),
        started: chrono::DateTime::from_timestamp(started_at as i64, 0).unwrap(),
        start_mono: started_at,
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

fn ok_response(status: i64) -> ResponseMeta {
    ResponseMeta {
        url: String::new(),
        status,
        status_text: "OK".into(),
        headers: vec![("content-type".into(), "text/html".into())],
        mime_type: "text/html".into(),
        protocol: Some("http/1.1".into()),
        remote_ip: Some("127.0.0.1".into()),
        remote_port: Some(8080),
        connection_id: Some(1.0),
        timing: None,
    }
}

#[test]
fn basic_get_capture_yields_single_entry() {
    let builder = HarBuilder::default();
    builder.set_page(chrono::Utc::now(), "http://127.0.0.1:8080/");

    let mut tx = transaction("1.1", "http://127.0.0.1:8080/", 100.0);
    tx.set_response(ok_response(200));
    tx.add_data(5, 5);
    tx.body = Some(("hello".into(), false));
    tx.finish(100.1, 120.0);
    builder.add_entry(tx.to_entry());

    let har = builder.snapshot();
    assert_eq!(har.log.entries.len(), 1);
    let entry = &har.log.entries[0];
    assert_eq!(entry.request.method, "GET");
    assert_eq!(entry.response.status, 200);
    assert_eq!(entry.response.content.text.as_deref(), Some("hello"));
    assert_eq!(entry.pageref.as_deref(), Some("page_1"));
}

#[test]
fn redirect_chain_links_successor_to_predecessor() {
    let builder = HarBuilder::default();

    // /a closes with the redirect response
    let mut first = transaction("9.1", "http://127.0.0.1:8080/a", 100.0);
    let mut redirect = ok_response(302);
    redirect.status_text = "Found".into();
    redirect
        .headers
        .push(("location".into(), "http://127.0.0.1:8080/b".into()));
    first.set_response(redirect);
    first.finish(100.05, 0.0);
    builder.add_entry(first.to_entry());

    // same requestId continues as /b with the back-reference
    let mut second = transaction("9.1", "http://127.0.0.1:8080/b", 100.05);
    second.redirect_from = Some("http://127.0.0.1:8080/a".into());
    second.set_response(ok_response(200));
    second.finish(100.2, 0.0);
    builder.add_entry(second.to_entry());

    let entries = builder.entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].response.status, 302);
    assert_eq!(entries[0].response.redirect_url, "http://127.0.0.1:8080/b");

    // ancestor linkage: the referenced predecessor exists and is a 3xx
    let successor = &entries[1];
    let predecessor_url = successor.redirect_from.as_deref().unwrap();
    let predecessor = entries
        .iter()
        .find(|e| e.request.url == predecessor_url)
        .expect("predecessor entry present");
    assert!((300..400).contains(&predecessor.response.status));
}

#[test]
fn failed_transaction_emits_synthetic_zero_status() {
    let mut tx = transaction("3.1", "http://127.0.0.1:8080/dead", 10.0);
    tx.fail(10.5, "net::ERR_CONNECTION_REFUSED".into());
    let entry = tx.to_entry();
    assert_eq!(entry.response.status, 0);
    assert_eq!(entry.error.as_deref(), Some("net::ERR_CONNECTION_REFUSED"));
}

#[test]
fn transfer_size_sums_match_data_received_deltas() {
    let builder = HarBuilder::default();
    let mut expected_total: i64 = 0;
    for (i, chunks) in [vec![10, 20], vec![512], vec![1, 2, 3]].iter().enumerate() {
        let mut tx = transaction(&format!("t.{i}"), &format!("http://e.com/{i}"), i as f64);
        tx.set_response(ok_response(200));
        for chunk in chunks {
            tx.add_data(*chunk, *chunk);
            expected_total += chunk;
        }
        tx.finish(i as f64 + 0.5, 0.0);
        builder.add_entry(tx.to_entry());
    }
    let observed: i64 = builder
        .entries()
        .iter()
        .filter_map(|e| e.transfer_size)
        .sum();
    assert_eq!(observed, expected_total);
}

#[test]
fn batch_serialization_is_byte_stable() {
    let builder = HarBuilder::new(Creator::default(), None);
    builder.set_page(chrono::Utc::now(), "t");
    for i in 0..5 {
        let mut tx = transaction(&format!("s.{i}"), &format!("http://e.com/{i}"), i as f64);
        tx.set_response(ok_response(200));
        tx.finish(i as f64 + 0.1, 0.0);
        builder.add_entry(tx.to_entry());
    }
    assert_eq!(builder.to_json().unwrap(), builder.to_json().unwrap());
}

#[test]
fn streamed_ndjson_wraps_into_equivalent_har() {
    let stage = Arc::new(FilterStage::default());
    let builder = HarBuilder::default();

    // Terminal order differs from start order on purpose
    let mut ndjson = Vec::new();
    for (id, start, end) in [("a", 5.0, 9.0), ("b", 1.0, 10.0), ("c", 3.0, 4.0)] {
        let mut tx = transaction(id, &format!("http://e.com/{id}"), start);
        tx.set_response(ok_response(200));
        tx.finish(end, 0.0);
        let entry = stage.apply(tx.to_entry()).unwrap();
        ndjson.push(stage.render_line(&entry).unwrap());
        builder.add_entry(entry);
    }

    let streamed_entries: Vec<harcap::Entry> = ndjson
        .iter()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    let wrapped: Har = wrap_entries(streamed_entries, Creator::default());
    let batch = builder.snapshot();

    let urls = |h: &Har| {
        h.log
            .entries
            .iter()
            .map(|e| e.request.url.clone())
            .collect::<Vec<_>>()
    };
    assert_eq!(urls(&batch), urls(&wrapped));
}

#[test]
fn zero_entry_capture_is_valid_har() {
    let builder = HarBuilder::default();
    let bytes = builder.to_json().unwrap();
    let parsed: Har = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(parsed.log.version, "1.2");
    assert!(parsed.log.entries.is_empty());
}
