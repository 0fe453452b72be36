//! Minimal HTTP/1.1 server for integration tests of the curl fetcher.
//!
//! Routes (GET only):
//! - `/item/<name>`    200 `{"name": <name>, "title": "Item <name>"}`
//! - `/partial/<name>` 200 `{"name": <name>}` (no title)
//! - `/status/<code>`  `<code>` with an empty body
//! - `/slow/<ms>`      sleeps `<ms>` then answers like `/item/slow`
//! - `/flaky/<name>`   503 on the first request for that path, then like `/item/<name>`

use std::collections::HashSet;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Starts a server in a background thread. Returns the base URL without a
/// trailing slash (e.g. "http://127.0.0.1:12345"). Runs until the process exits.
pub fn start() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let seen = Arc::new(Mutex::new(HashSet::new()));
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let seen = Arc::clone(&seen);
            thread::spawn(move || handle(stream, &seen));
        }
    });
    format!("http://127.0.0.1:{}", port)
}

fn handle(mut stream: std::net::TcpStream, seen: &Mutex<HashSet<String>>) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) => return,
        Ok(n) => n,
        Err(_) => return,
    };
    let Ok(request) = std::str::from_utf8(&buf[..n]) else {
        return;
    };
    let path = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string();

    let (status, body) = route(&path, seen);
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        body.len()
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.write_all(body.as_bytes());
}

fn item(name: &str) -> String {
    format!(r#"{{"name":"{0}","title":"Item {0}"}}"#, name)
}

fn route(path: &str, seen: &Mutex<HashSet<String>>) -> (String, String) {
    let mut parts = path.trim_start_matches('/').splitn(2, '/');
    let kind = parts.next().unwrap_or("");
    let arg = parts.next().unwrap_or("");
    match kind {
        "item" => ("200 OK".into(), item(arg)),
        "partial" => ("200 OK".into(), format!(r#"{{"name":"{}"}}"#, arg)),
        "status" => {
            let code: u32 = arg.parse().unwrap_or(500);
            (format!("{} Status", code), String::new())
        }
        "slow" => {
            let ms: u64 = arg.parse().unwrap_or(1000);
            thread::sleep(Duration::from_millis(ms));
            ("200 OK".into(), item("slow"))
        }
        "flaky" => {
            let first = seen.lock().map(|mut s| s.insert(path.to_string())).unwrap_or(false);
            if first {
                ("503 Service Unavailable".into(), String::new())
            } else {
                ("200 OK".into(), item(arg))
            }
        }
        _ => ("404 Not Found".into(), String::new()),
    }
}
