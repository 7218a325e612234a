mod multi_wait;

pub use self::multi_wait::*;
