pub mod fetch;

pub use self::fetch::*;
