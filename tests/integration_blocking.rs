use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use reqtree::prelude::*;
use serde_json::Value;

struct Reply {
    status: u16,
    headers: Vec<(&'static str, String)>,
    body: Vec<u8>,
}

impl Reply {
    fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: vec![("Content-Type", "text/plain".to_owned())],
            body: body.as_bytes().to_vec(),
        }
    }

    fn json(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: vec![("Content-Type", "application/json".to_owned())],
            body: body.as_bytes().to_vec(),
        }
    }

    fn redirect(location: &str) -> Self {
        Self {
            status: 302,
            headers: vec![("Location", location.to_owned())],
            body: Vec::new(),
        }
    }

    fn write_to(&self, mut stream: &TcpStream) -> std::io::Result<()> {
        let reason = http::StatusCode::from_u16(self.status)
            .ok()
            .and_then(|status| status.canonical_reason())
            .unwrap_or("Unknown");
        write!(
            stream,
            "HTTP/1.1 {} {reason}\r\nContent-Length: {}\r\nConnection: close\r\n",
            self.status,
            self.body.len()
        )?;
        for (name, value) in &self.headers {
            write!(stream, "{name}: {value}\r\n")?;
        }
        stream.write_all(b"\r\n")?;
        stream.write_all(&self.body)?;
        stream.flush()
    }
}

#[derive(Clone, Debug)]
struct Seen {
    method: String,
    target: String,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
}

/// Answers one scripted reply per accepted connection, then stops.
struct TestServer {
    address: SocketAddr,
    seen: Arc<Mutex<Vec<Seen>>>,
    worker: Option<JoinHandle<()>>,
}

impl TestServer {
    fn serve(replies: Vec<Reply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server");
        let address = listener.local_addr().expect("read test server address");
        listener
            .set_nonblocking(true)
            .expect("set listener nonblocking");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        let worker = thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(3);
            let mut replies = replies.into_iter().peekable();
            while replies.peek().is_some() && Instant::now() < deadline {
                let stream = match listener.accept() {
                    Ok((stream, _)) => stream,
                    Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(5));
                        continue;
                    }
                    Err(_) => return,
                };
                let Some(reply) = replies.next() else {
                    return;
                };
                if let Ok(request) = capture(&stream) {
                    recorder.lock().expect("lock seen requests").push(request);
                }
                let _ = reply.write_to(&stream);
            }
        });

        Self {
            address,
            seen,
            worker: Some(worker),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.address)
    }

    fn seen(&self) -> Vec<Seen> {
        self.seen.lock().expect("lock seen requests").clone()
    }

    fn served(&self) -> usize {
        self.seen.lock().expect("lock seen requests").len()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn capture(stream: &TcpStream) -> std::io::Result<Seen> {
    stream.set_read_timeout(Some(Duration::from_secs(1)))?;
    let mut reader = BufReader::new(stream);

    let mut line = String::new();
    reader.read_line(&mut line)?;
    let mut request_line = line.split_whitespace();
    let method = request_line.next().unwrap_or_default().to_owned();
    let target = request_line.next().unwrap_or_default().to_owned();

    let mut headers = BTreeMap::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 || line.trim_end().is_empty() {
            break;
        }
        if let Some((name, value)) = line.trim_end().split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_owned());
        }
    }

    let length = headers
        .get("content-length")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0_u8; length];
    reader.read_exact(&mut body)?;

    Ok(Seen {
        method,
        target,
        headers,
        body,
    })
}

fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind scratch listener");
    let address = listener.local_addr().expect("read scratch address");
    drop(listener);
    format!("http://{address}/unreachable")
}

#[test]
fn get_resolves_placeholders_before_hitting_the_wire() {
    let server = TestServer::serve(vec![Reply::text(200, "listing")]);
    let sender = HttpSender::builder()
        .user_agent("reqtree-tests/1.0")
        .connect_timeout(Duration::from_secs(1))
        .build();

    let mut response = sender
        .get(&server.url("/v1/{resource}"))
        .expect("url should parse")
        .placeholder("resource", "items")
        .and_then(|request| request.placeholder("page", "2"))
        .expect("placeholders should be accepted")
        .query_param("page", "{page}")
        .header("X-Trace", "{resource}-trace")
        .execute()
        .expect("get should succeed");

    assert_eq!(response.status(), 200);
    assert_eq!(response.message(), Some("OK"));
    assert_eq!(response.text().expect("body should decode"), "listing");
    assert!(response.is_complete());

    let seen = server.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].method, "GET");
    assert_eq!(seen[0].target, "/v1/items?page=2");
    assert_eq!(
        seen[0].headers.get("x-trace").map(String::as_str),
        Some("items-trace")
    );
    assert_eq!(
        seen[0].headers.get("user-agent").map(String::as_str),
        Some("reqtree-tests/1.0")
    );
}

#[test]
fn post_sends_json_and_decodes_the_reply() {
    let server = TestServer::serve(vec![Reply::json(201, r#"{"id":"item-1"}"#)]);

    let mut response = Request::post(&server.url("/v1/items"))
        .expect("url should parse")
        .json(&serde_json::json!({ "name": "demo" }))
        .expect("body should serialize")
        .execute()
        .expect("post should succeed");

    assert_eq!(response.status(), 201);
    let created: Value = response.json().expect("reply should decode");
    assert_eq!(created["id"], "item-1");

    let seen = server.seen();
    assert_eq!(seen[0].method, "POST");
    assert_eq!(
        seen[0].headers.get("content-type").map(String::as_str),
        Some("application/json")
    );
    let sent: Value = serde_json::from_slice(&seen[0].body).expect("sent body is json");
    assert_eq!(sent["name"], "demo");
}

#[test]
fn form_post_sends_url_encoded_fields() {
    let server = TestServer::serve(vec![Reply::text(200, "welcome")]);

    let _response = Request::form_post(&server.url("/login"))
        .expect("url should parse")
        .form_field("user", "{user}")
        .form_field("password", "p@ss word")
        .placeholder("user", "jo")
        .expect("placeholder should be accepted")
        .execute()
        .expect("form post should succeed");

    let seen = server.seen();
    assert_eq!(
        seen[0].headers.get("content-type").map(String::as_str),
        Some("application/x-www-form-urlencoded")
    );
    assert_eq!(seen[0].body, b"user=jo&password=p%40ss+word");
}

#[test]
fn error_status_exposes_the_error_body() {
    let server = TestServer::serve(vec![Reply::text(500, "boom")]);

    let mut response = Request::get(&server.url("/v1/fail"))
        .expect("url should parse")
        .execute()
        .expect("error statuses are responses");

    assert_eq!(response.status(), 500);
    assert!(response.is_error());
    assert_eq!(response.text().expect("error body should decode"), "boom");
}

#[test]
fn redirects_are_reported_when_following_is_disabled() {
    let server = TestServer::serve(vec![Reply::redirect("/v1/moved")]);

    let response = Request::get(&server.url("/v1/old"))
        .expect("url should parse")
        .follow_redirects(false)
        .execute()
        .expect("redirect should be returned as is");

    assert_eq!(response.status(), 302);
    assert_eq!(response.header("location"), Some("/v1/moved"));
    assert_eq!(server.served(), 1);
}

#[test]
fn redirects_are_followed_by_default() {
    let server = TestServer::serve(vec![
        Reply::redirect("/v1/moved"),
        Reply::text(200, "arrived"),
    ]);

    let mut response = Request::get(&server.url("/v1/old"))
        .expect("url should parse")
        .execute()
        .expect("redirect should be followed");

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().expect("body should decode"), "arrived");
    let seen = server.seen();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[1].target, "/v1/moved");
}

#[test]
fn unreachable_host_is_a_transport_error() {
    let error = Request::get(&closed_port_url())
        .expect("url should parse")
        .connect_timeout(Duration::from_secs(1))
        .execute()
        .expect_err("nothing listens on the port");
    assert_eq!(error.code(), ErrorCode::Transport);
}

#[test]
fn fallback_plan_moves_past_an_unreachable_host() {
    let server = TestServer::serve(vec![Reply::text(200, "backup")]);

    let plan = FallbackPlan::new()
        .try_request(
            Request::get(&closed_port_url())
                .expect("url should parse")
                .connect_timeout(Duration::from_secs(1)),
        )
        .try_request(Request::get(&server.url("/v1/backup")).expect("url should parse"));

    let mut response = plan.execute().expect("second entry should succeed");
    assert_eq!(response.text().expect("body should decode"), "backup");
    assert_eq!(server.served(), 1);
}

#[test]
fn fallback_entry_retries_server_errors() {
    let server = TestServer::serve(vec![
        Reply::text(503, "busy"),
        Reply::text(200, "ready"),
    ]);

    let upload = Request::put(&server.url("/v1/items/1"))
        .expect("url should parse")
        .body_text("payload");
    let plan = FallbackPlan::new().try_request_with(
        upload,
        true,
        RetryStrategy::max_total_tries(2),
        BackoffStrategy::specified(&[5]),
    );

    let mut response = plan.execute().expect("retry should recover");
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().expect("body should decode"), "ready");

    let seen = server.seen();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|request| request.body == b"payload"));
}

#[test]
fn future_resolves_against_a_live_server() {
    let server = TestServer::serve(vec![Reply::text(200, "later")]);

    let mut response = Request::get(&server.url("/v1/async"))
        .expect("url should parse")
        .execute_future()
        .wait()
        .expect("future should resolve");
    assert_eq!(response.text().expect("body should decode"), "later");
}
