pub mod admission;
pub mod cors;
pub mod security_headers;
