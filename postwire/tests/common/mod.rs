//! Scripted postgres server over an in-memory stream.
#![allow(dead_code)]
use bytes::{Buf, BufMut, Bytes, BytesMut};
use postwire::{Config, Connection};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

pub struct Server {
    io: DuplexStream,
    buf: BytesMut,
}

impl Server {
    pub async fn send(&mut self, messages: &[Vec<u8>]) {
        for message in messages {
            self.io.write_all(message).await.unwrap();
        }
        self.io.flush().await.unwrap();
    }

    async fn fill(&mut self, n: usize) {
        while self.buf.len() < n {
            let read = self.io.read_buf(&mut self.buf).await.unwrap();
            assert_ne!(read, 0, "client closed the stream");
        }
    }

    /// Read the untagged startup message, returning its parameters.
    pub async fn startup(&mut self) -> Vec<(String, String)> {
        self.fill(4).await;
        let len = i32::from_be_bytes(self.buf[..4].try_into().unwrap()) as usize;
        self.fill(len).await;
        let mut body = self.buf.split_to(len).freeze();
        body.advance(4);
        assert_eq!(body.get_i32(), 196608);

        let mut params = vec![];
        loop {
            let name = cstr(&mut body);
            if name.is_empty() {
                break;
            }
            params.push((name, cstr(&mut body)));
        }
        params
    }

    /// Read one tagged message.
    pub async fn recv(&mut self) -> (u8, Bytes) {
        self.fill(5).await;
        let len = i32::from_be_bytes(self.buf[1..5].try_into().unwrap()) as usize;
        self.fill(1 + len).await;
        let mut message = self.buf.split_to(1 + len).freeze();
        let tag = message.get_u8();
        message.advance(4);
        (tag, message)
    }

    /// Read messages up to and including `tag`, returning their tags.
    pub async fn recv_until(&mut self, tag: u8) -> Vec<u8> {
        let mut tags = vec![];
        loop {
            let (next, _) = self.recv().await;
            tags.push(next);
            if next == tag {
                return tags;
            }
        }
    }

    /// Read one message if the client sends any within `wait`.
    pub async fn try_recv(&mut self, wait: Duration) -> Option<(u8, Bytes)> {
        tokio::time::timeout(wait, self.recv()).await.ok()
    }
}

pub fn cstr(buf: &mut Bytes) -> String {
    let end = buf.iter().position(|b| *b == 0).unwrap();
    let value = String::from_utf8(buf.split_to(end).to_vec()).unwrap();
    buf.advance(1);
    value
}

pub fn pair() -> (DuplexStream, Server) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    (client, Server { io: server, buf: BytesMut::new() })
}

/// Connect with trust authentication.
pub async fn connect(config: Config) -> (Connection, Server) {
    let (client, mut server) = pair();
    server
        .send(&[
            auth_ok(),
            parameter_status("server_version", "17.0"),
            parameter_status("client_encoding", "UTF8"),
            backend_key(42, 7),
            ready(),
        ])
        .await;
    let conn = Connection::connect_stream(client, config).await.unwrap();
    server.startup().await;
    (conn, server)
}

// ===== Backend messages =====

pub fn msg(tag: u8, body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(5 + body.len());
    buf.put_u8(tag);
    buf.put_i32(4 + body.len() as i32);
    buf.put_slice(body);
    buf
}

fn put_cstr(buf: &mut Vec<u8>, value: &str) {
    buf.put_slice(value.as_bytes());
    buf.put_u8(0);
}

pub fn auth_ok() -> Vec<u8> {
    msg(b'R', &0i32.to_be_bytes())
}

pub fn auth_cleartext() -> Vec<u8> {
    msg(b'R', &3i32.to_be_bytes())
}

pub fn auth_md5(salt: [u8; 4]) -> Vec<u8> {
    let mut body = 5i32.to_be_bytes().to_vec();
    body.put_slice(&salt);
    msg(b'R', &body)
}

pub fn parameter_status(name: &str, value: &str) -> Vec<u8> {
    let mut body = vec![];
    put_cstr(&mut body, name);
    put_cstr(&mut body, value);
    msg(b'S', &body)
}

pub fn backend_key(pid: i32, secret: i32) -> Vec<u8> {
    let mut body = vec![];
    body.put_i32(pid);
    body.put_i32(secret);
    msg(b'K', &body)
}

pub fn ready() -> Vec<u8> {
    msg(b'Z', b"I")
}

pub fn ready_in_transaction() -> Vec<u8> {
    msg(b'Z', b"T")
}

pub fn parse_complete() -> Vec<u8> {
    msg(b'1', &[])
}

pub fn bind_complete() -> Vec<u8> {
    msg(b'2', &[])
}

pub fn no_data() -> Vec<u8> {
    msg(b'n', &[])
}

pub fn portal_suspended() -> Vec<u8> {
    msg(b's', &[])
}

pub fn empty_query() -> Vec<u8> {
    msg(b'I', &[])
}

/// Columns of `(name, type oid, format)`.
pub fn row_description(columns: &[(&str, u32, i16)]) -> Vec<u8> {
    let mut body = vec![];
    body.put_i16(columns.len() as i16);
    for (name, oid, format) in columns {
        put_cstr(&mut body, name);
        body.put_u32(0);
        body.put_i16(0);
        body.put_u32(*oid);
        body.put_i16(-1);
        body.put_i32(-1);
        body.put_i16(*format);
    }
    msg(b'T', &body)
}

pub fn data_row(values: &[Option<Vec<u8>>]) -> Vec<u8> {
    let mut body = vec![];
    body.put_i16(values.len() as i16);
    for value in values {
        match value {
            Some(value) => {
                body.put_i32(value.len() as i32);
                body.put_slice(value);
            }
            None => body.put_i32(-1),
        }
    }
    msg(b'D', &body)
}

pub fn command_complete(tag: &str) -> Vec<u8> {
    let mut body = vec![];
    put_cstr(&mut body, tag);
    msg(b'C', &body)
}

fn error_fields(tag: u8, severity: &str, code: &str, message: &str) -> Vec<u8> {
    let mut body = vec![];
    for (field, value) in [(b'S', severity), (b'V', severity), (b'C', code), (b'M', message)] {
        body.put_u8(field);
        put_cstr(&mut body, value);
    }
    body.put_u8(0);
    msg(tag, &body)
}

pub fn error(code: &str, message: &str) -> Vec<u8> {
    error_fields(b'E', "ERROR", code, message)
}

pub fn fatal(code: &str, message: &str) -> Vec<u8> {
    error_fields(b'E', "FATAL", code, message)
}

pub fn notice(message: &str) -> Vec<u8> {
    error_fields(b'N', "NOTICE", "00000", message)
}

pub fn notification(pid: i32, channel: &str, payload: &str) -> Vec<u8> {
    let mut body = vec![];
    body.put_i32(pid);
    put_cstr(&mut body, channel);
    put_cstr(&mut body, payload);
    msg(b'A', &body)
}

/// Text copy of `columns` columns.
pub fn copy_in_response(columns: i16) -> Vec<u8> {
    copy_response(b'G', columns)
}

pub fn copy_out_response(columns: i16) -> Vec<u8> {
    copy_response(b'H', columns)
}

fn copy_response(tag: u8, columns: i16) -> Vec<u8> {
    let mut body = vec![0];
    body.put_i16(columns);
    for _ in 0..columns {
        body.put_i16(0);
    }
    msg(tag, &body)
}

pub fn copy_data(data: &[u8]) -> Vec<u8> {
    msg(b'd', data)
}

pub fn copy_done() -> Vec<u8> {
    msg(b'c', &[])
}

pub fn parameter_description(oids: &[u32]) -> Vec<u8> {
    let mut body = vec![];
    body.put_i16(oids.len() as i16);
    for oid in oids {
        body.put_u32(*oid);
    }
    msg(b't', &body)
}

pub fn close_complete() -> Vec<u8> {
    msg(b'3', &[])
}

// ===== Column values =====

pub fn int4(value: i32) -> Option<Vec<u8>> {
    Some(value.to_be_bytes().to_vec())
}

pub fn text(value: &str) -> Option<Vec<u8>> {
    Some(value.as_bytes().to_vec())
}
