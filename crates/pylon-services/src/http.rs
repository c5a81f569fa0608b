//! Outbound HTTP on behalf of peers.
//!
//! Call shape: `("request", url, opts)` where `opts` is a table carrying
//! `method`, `headers`, `body`, `noHeader`, `noBody`. Failures are
//! reported in-band as `[false, message]` so remote callers can branch
//! without string-matching an RPC error; the transport error path is
//! reserved for the cluster itself.

use std::sync::OnceLock;

use pylon_core::{Key, Table, Value};
use reqwest::blocking::Client;
use reqwest::Method;

use crate::Service;

pub struct HttpService {
    // built on first use so it always comes up on the blocking pool
    client: OnceLock<Client>,
}

impl HttpService {
    pub fn new() -> Self {
        Self {
            client: OnceLock::new(),
        }
    }

    fn client(&self) -> &Client {
        self.client.get_or_init(Client::new)
    }
}

impl Default for HttpService {
    fn default() -> Self {
        Self::new()
    }
}

impl Service for HttpService {
    fn execute(&self, args: Vec<Value>) -> anyhow::Result<Vec<Value>> {
        if args.len() < 3 {
            return Ok(fail("args not enough"));
        }
        if args[0].as_str() != Some("request") {
            return Ok(fail("command not found"));
        }
        let Some(url) = args[1].as_str() else {
            return Ok(fail("url parse error"));
        };
        let Some(opts) = args[2].as_table() else {
            return Ok(fail("opts parse error"));
        };

        let Some(method) = opt_str(opts, "method").and_then(parse_method) else {
            return Ok(fail("method not allowed"));
        };
        let body = opt_str(opts, "body").unwrap_or_default().to_string();
        let no_header = opt_bool(opts, "noHeader");
        let no_body = opt_bool(opts, "noBody");

        let mut request = self.client().request(method, url).body(body);
        if let Some(Value::Table(headers)) = opts.get(&Key::from("headers")) {
            for (key, value) in &headers.hash {
                if let (Key::String(name), Value::String(val)) = (key, value) {
                    if let (Ok(name), Ok(val)) = (
                        std::str::from_utf8(name),
                        std::str::from_utf8(val),
                    ) {
                        request = request.header(name, val);
                    }
                }
            }
        }

        match request.send() {
            Ok(response) => Ok(build_response(response, no_header, no_body)),
            Err(e) => Ok(fail(&e.to_string())),
        }
    }
}

fn opt_str<'a>(opts: &'a Table, key: &str) -> Option<&'a str> {
    opts.get(&Key::from(key)).and_then(Value::as_str)
}

fn opt_bool(opts: &Table, key: &str) -> bool {
    opts.get(&Key::from(key))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Only a fixed set of verbs is forwarded.
fn parse_method(method: &str) -> Option<Method> {
    match method {
        "GET" => Some(Method::GET),
        "POST" => Some(Method::POST),
        "PUT" => Some(Method::PUT),
        "DELETE" => Some(Method::DELETE),
        "PATCH" => Some(Method::PATCH),
        _ => None,
    }
}

fn build_response(
    response: reqwest::blocking::Response,
    no_header: bool,
    no_body: bool,
) -> Vec<Value> {
    let status = i64::from(response.status().as_u16());

    let mut payload = Table::default();
    if !no_header {
        let mut headers = Table::default();
        for name in response.headers().keys() {
            let mut values: Vec<Value> = response
                .headers()
                .get_all(name)
                .iter()
                .map(|v| Value::String(v.as_bytes().to_vec()))
                .collect();
            let value = if values.len() == 1 {
                values.remove(0)
            } else {
                Value::Table(Table {
                    array: values,
                    hash: Default::default(),
                })
            };
            headers.hash.insert(Key::from(name.as_str()), value);
        }
        payload
            .hash
            .insert(Key::from("headers"), Value::Table(headers));
    }

    if !no_body {
        let body = match response.bytes() {
            Ok(bytes) => bytes.to_vec(),
            Err(e) => return fail(&e.to_string()),
        };
        payload.hash.insert(Key::from("body"), Value::String(body));
    }

    vec![
        Value::Boolean(true),
        Value::Integer(status),
        Value::Table(payload),
    ]
}

fn fail(message: &str) -> Vec<Value> {
    vec![Value::Boolean(false), Value::from(message)]
}
