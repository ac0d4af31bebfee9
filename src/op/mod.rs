//! Graph node types. `Op` is a sealed tagged union: dispatch for the shared
//! facets (`support`, `finalize`, `work_amount`, tensor binding) goes through
//! `enum_dispatch`'s generated `match`.
//!
//! `execute()` is deliberately *not* part of the dispatched trait:
//! `InputProcess`/`OutputProcess` bind external `Image`s that the pure
//! tensor ops never see, so they are distinguished variants with their own
//! execute signatures. `Graph::run` matches on the `Op` enum directly to
//! route image bindings to the two variants that need them.

pub mod concat_conv;
pub mod conv;
pub mod input_process;
pub mod output_process;
pub mod pool;
pub mod upsample;

use enum_dispatch::enum_dispatch;

use crate::engine::Engine;
use crate::error::CoreResult;
use crate::primitives::{Tensor, TensorDesc};

pub use concat_conv::ConcatConv;
pub use conv::Conv;
pub use input_process::{InputImages, InputProcess};
pub use output_process::OutputProcess;
pub use pool::Pool;
pub use upsample::Upsample;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activation {
    None,
    Relu,
}

impl Activation {
    pub fn apply(&self, x: f32) -> f32 {
        match self {
            Activation::None => x,
            Activation::Relu => x.max(0.0),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PostOp {
    None,
    Pool,
}

/// Facets shared by every op kind. `execute` is intentionally absent here;
/// see the module doc comment.
#[enum_dispatch]
pub trait OpBehavior {
    fn name(&self) -> &str;

    /// The output tensor shape/layout, known at construction.
    fn dst_desc(&self) -> TensorDesc;

    /// Called once by the Graph after planning.
    fn set_dst(&mut self, tensor: Tensor);

    fn dst(&self) -> Option<&Tensor>;

    /// Called once by the Graph after planning, with the already-bound
    /// destination tensors of this op's source ops, in the order the
    /// sources were declared when the op was added.
    fn bind_sources(&mut self, sources: Vec<Tensor>);

    /// Whether the engine can execute this op with these shapes/types.
    fn support(&self, engine: &dyn Engine) -> bool;

    /// Monotone, non-negative progress weight.
    fn work_amount(&self) -> f64;

    /// One-time setup (e.g. reorder weights into the engine's preferred
    /// layout, compile kernels), run once tensors are bound.
    fn finalize(&mut self, engine: &dyn Engine) -> CoreResult<()>;
}

/// Graph node. See the module doc comment for why `execute` lives outside
/// the dispatched trait.
#[enum_dispatch(OpBehavior)]
pub enum Op {
    InputProcess(InputProcess),
    OutputProcess(OutputProcess),
    Conv(Conv),
    ConcatConv(ConcatConv),
    Pool(Pool),
    Upsample(Upsample),
}
