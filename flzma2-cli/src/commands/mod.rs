//! Command implementations for the flzma2 CLI.

pub mod compress;
pub mod decompress;
pub mod info;
pub mod levels;
pub mod test;

pub use compress::{CompressOptions, StrategyArg, cmd_compress};
pub use decompress::cmd_decompress;
pub use info::cmd_info;
pub use levels::cmd_levels;
pub use test::cmd_test;
