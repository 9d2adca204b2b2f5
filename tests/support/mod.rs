#![allow(dead_code)]

pub mod log_capture;
pub mod socket_guard;
