//! `pipeflow`: a concurrent, backpressured asynchronous pipeline engine.
//!
//! The four cooperating pieces are the internal `EmitSource` hand-off
//! buffer, [`Pipeline`] (the consumer view), [`Subject`] (the producer
//! view), and the [`Operator`] trait plus its factories in [`ops`]. See
//! `DESIGN.md` in the crate root for how each piece maps back to its
//! grounding in the wider corpus this crate was learned from.
//!
//! ```
//! use pipeflow::free::{from_iterable, to_vec};
//! use pipeflow::ops::map;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let p = from_iterable::<_, ()>(vec![1, 2, 3]).pipe(&map(|v: i32| v * 2));
//! assert_eq!(to_vec(p).await.unwrap(), vec![2, 4, 6]);
//! # }
//! ```

mod error;
pub mod free;
mod id;
mod operator;
pub mod ops;
pub mod permit;
mod pipeline;
mod source;
mod subject;
#[cfg(test)]
mod test_support;

pub use error::{EmitError, PipelineError, UsageError};
pub use operator::{apply_chain, BoxedOperator, Operator};
pub use permit::{Permit, PermitSource, TokioPermitSource};
pub use pipeline::Pipeline;
pub use source::ChannelConfig;
pub use subject::Subject;

pub use tokio_util::sync::CancellationToken;
