pub mod request_context;
pub mod security_headers;

pub use request_context::request_context_middleware;
pub use security_headers::security_headers_middleware;
