#[cfg(test)]
pub(crate) mod mock;
mod traits;

pub use traits::{ActivityFetcher, EventStream, RemovalNotifier, StreamItem};
