pub mod csrf;
pub mod encryption;
pub mod hashing;
pub mod jwt;
pub mod totp;

pub use csrf::CsrfService;
pub use encryption::FieldEncryption;
pub use hashing::PasswordHasher;
pub use jwt::{AccessClaims, IssuedTokens, JwtService, RefreshClaims};
pub use totp::TotpService;
