pub mod concurrent;

pub use self::concurrent::{MultiWait, MultiWaitError, WorkError};
