//! Compile-time configuration surface. No config-file or env-var layer —
//! the teacher binds its listen address as a literal too.

pub const SERVER_ADDRESS: &str = "0.0.0.0:3000";
pub const MAX_CONNECTION: usize = 20_000;
pub const BUFFER_SIZE: usize = 512;
pub const CLEANUP_FREQUENCY_MS: u64 = 100;
