#![allow(dead_code)]

pub mod mocks;

use std::net::TcpListener;

pub fn can_bind_localhost() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}
