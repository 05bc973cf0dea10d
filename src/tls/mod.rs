pub mod buffer;
pub mod client_hello;

pub use buffer::{HeadBuffer, Liveness};
pub use client_hello::{RECORD_HEADER_LEN, parse_client_hello, read_record_header};
