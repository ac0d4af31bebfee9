pub mod arena;
pub mod engine;
pub mod error;
pub mod graph;
pub mod op;
pub mod primitives;
pub mod transfer;
pub mod util;

pub use error::{CoreError, CoreResult};
pub use graph::{Graph, NullProgress, Progress, RunIo};
