//! The execution graph facade: builds an op list, plans the scratch arena,
//! binds tensors, and runs the ops in order with progress reporting and
//! cancellation.

use std::collections::HashMap;
use std::sync::Arc;

use crate::arena::{self, AllocId, AllocRequest, ColocationConstraint, Lifetime, Plan};
use crate::engine::{Buffer, Engine};
use crate::error::{CoreError, CoreResult};
use crate::op::{
    Activation, ConcatConv, Conv, InputImages, InputProcess, Op, OpBehavior, OutputProcess, Pool, PostOp, Upsample,
};
use crate::op::input_process::Tile;
use crate::primitives::{Image, Tensor, TensorDesc, TensorStorage};

/// Caller-supplied progress/cancellation hook, called once per op.
/// Returning `false` cancels the run at the next op boundary.
pub trait Progress {
    fn report(&mut self, fraction: f32) -> bool;
}

/// A no-op `Progress` that never cancels, for callers that don't need
/// reporting.
pub struct NullProgress;

impl Progress for NullProgress {
    fn report(&mut self, _fraction: f32) -> bool {
        true
    }
}

/// External images bound for one `Graph::run`, keyed by the name of the
/// `InputProcess`/`OutputProcess` op they feed.
#[derive(Default)]
pub struct RunIo<'a> {
    pub inputs: HashMap<String, InputImages<'a>>,
    pub outputs: HashMap<String, Image<'a>>,
}

/// Builds and runs a denoising op graph. Op structure (`add_*`) is
/// immutable once `finalize`d; `clear` detaches the scratch binding so the
/// same op list can be replanned (e.g. after a resize) without rebuilding it.
pub struct Graph {
    ops: Vec<Op>,
    sources: Vec<Vec<usize>>,
    const_tensors: HashMap<String, Tensor>,
    fast_math: bool,
    dirty: bool,
    finalized: bool,
    scratch: Option<Arc<dyn Buffer>>,
    plan: Option<Plan>,
    last_scratch_byte_size: usize,
}

impl Default for Graph {
    fn default() -> Self {
        Self {
            ops: Vec::new(),
            sources: Vec::new(),
            const_tensors: HashMap::new(),
            fast_math: false,
            dirty: true,
            finalized: false,
            scratch: None,
            plan: None,
            last_scratch_byte_size: 0,
        }
    }
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fast_math(&mut self, enabled: bool) {
        self.fast_math = enabled;
    }

    pub fn fast_math(&self) -> bool {
        self.fast_math
    }

    pub fn set_const_tensor(&mut self, name: impl Into<String>, tensor: Tensor) {
        self.const_tensors.insert(name.into(), tensor);
    }

    pub fn const_tensor(&self, name: &str) -> Option<&Tensor> {
        self.const_tensors.get(name)
    }

    /// Fails fast (rather than silently un-finalizing) when the graph is
    /// already finalized, and when `sources` names an op index this graph
    /// doesn't have — adding an op after `finalize()` or wiring it to a
    /// source from another graph are both programmer errors per spec §7.
    fn push(&mut self, op: Op, sources: Vec<usize>) -> CoreResult<usize> {
        if self.finalized {
            return Err(CoreError::Misconfiguration(format!(
                "cannot add op '{}' to a finalized graph; call clear() first",
                op.name()
            )));
        }
        for &src in &sources {
            self.check_src(src)?;
        }
        self.dirty = true;
        // A cached plan is only valid for the topology it was computed
        // against; a new op invalidates it so `finalize` cannot reuse
        // offsets that don't account for this op's allocation.
        self.plan = None;
        let index = self.ops.len();
        log::debug!("graph: op #{index} '{}' added, sources={sources:?}", op.name());
        self.ops.push(op);
        self.sources.push(sources);
        Ok(index)
    }

    /// Bounds-checks a source op index against this graph's op list. The
    /// only practical test for "a source from another graph" (spec §7) is
    /// whether the index even resolves here; an out-of-range index is
    /// reported the same way a foreign one would be.
    fn check_src(&self, src: usize) -> CoreResult<()> {
        if src >= self.ops.len() {
            return Err(CoreError::Misconfiguration(format!(
                "source op index {src} does not exist in this graph ({} ops present)",
                self.ops.len()
            )));
        }
        Ok(())
    }

    pub fn add_input_process(
        &mut self,
        name: impl Into<String>,
        dst_desc: TensorDesc,
        tile: Tile,
        transfer: Arc<dyn crate::transfer::TransferFunction>,
        hdr: bool,
        snorm: bool,
    ) -> CoreResult<usize> {
        let name = name.into();
        self.push(
            Op::InputProcess(InputProcess::new(name, dst_desc, tile, transfer, hdr, snorm)),
            vec![],
        )
    }

    pub fn add_output_process(
        &mut self,
        name: impl Into<String>,
        src: usize,
        tile: Tile,
        transfer: Arc<dyn crate::transfer::TransferFunction>,
        hdr: bool,
        snorm: bool,
    ) -> CoreResult<usize> {
        self.check_src(src)?;
        let src_desc = self.ops[src].dst_desc();
        let name = name.into();
        self.push(
            Op::OutputProcess(OutputProcess::new(name, src_desc, tile, transfer, hdr, snorm)),
            vec![src],
        )
    }

    pub fn add_conv(
        &mut self,
        name: impl Into<String>,
        src: usize,
        out_channels: usize,
        weight: Tensor,
        bias: Tensor,
        activation: Activation,
        post_op: PostOp,
    ) -> CoreResult<usize> {
        self.check_src(src)?;
        let src_desc = self.ops[src].dst_desc();
        let name = name.into();
        self.push(
            Op::Conv(Conv::new(name, src_desc, out_channels, weight, bias, activation, post_op)),
            vec![src],
        )
    }

    /// Convenience over `add_conv` that looks up `"{name}.weight"`/`"{name}.bias"`
    /// in this graph's const tensors, the common case when loading a
    /// pretrained network's parameters by layer name.
    pub fn add_conv_named(
        &mut self,
        name: impl Into<String>,
        src: usize,
        out_channels: usize,
        activation: Activation,
        post_op: PostOp,
    ) -> CoreResult<usize> {
        let name = name.into();
        let weight = self
            .const_tensor(&format!("{name}.weight"))
            .cloned()
            .ok_or_else(|| CoreError::Misconfiguration(format!("no const tensor '{name}.weight'")))?;
        let bias = self
            .const_tensor(&format!("{name}.bias"))
            .cloned()
            .ok_or_else(|| CoreError::Misconfiguration(format!("no const tensor '{name}.bias'")))?;
        self.add_conv(name, src, out_channels, weight, bias, activation, post_op)
    }

    pub fn add_concat_conv(
        &mut self,
        name: impl Into<String>,
        src_a: usize,
        src_b: usize,
        out_channels: usize,
        weight: Tensor,
        bias: Tensor,
        activation: Activation,
    ) -> CoreResult<usize> {
        self.check_src(src_a)?;
        self.check_src(src_b)?;
        let a_desc = self.ops[src_a].dst_desc();
        let b_desc = self.ops[src_b].dst_desc();
        let name = name.into();
        self.push(
            Op::ConcatConv(ConcatConv::new(name, a_desc, b_desc, out_channels, weight, bias, activation)),
            vec![src_a, src_b],
        )
    }

    pub fn add_pool(&mut self, name: impl Into<String>, src: usize) -> CoreResult<usize> {
        self.check_src(src)?;
        let src_desc = self.ops[src].dst_desc();
        let name = name.into();
        self.push(Op::Pool(Pool::new(name, src_desc)), vec![src])
    }

    pub fn add_upsample(&mut self, name: impl Into<String>, src: usize) -> CoreResult<usize> {
        self.check_src(src)?;
        let src_desc = self.ops[src].dst_desc();
        let name = name.into();
        self.push(Op::Upsample(Upsample::new(name, src_desc)), vec![src])
    }

    pub fn is_supported(&self, engine: &dyn Engine) -> bool {
        self.ops.iter().all(|op| op.support(engine))
    }

    pub fn get_work_amount(&self) -> f64 {
        self.ops.iter().map(|op| op.work_amount()).sum()
    }

    /// Bytes occupied by const tensors (weights, biases) — outside the
    /// scratch arena, with their own lifetime.
    pub fn get_private_byte_size(&self) -> usize {
        self.const_tensors.values().map(|t| t.desc.byte_size()).sum()
    }

    fn compute_plan(&self) -> Plan {
        let mut requests = Vec::with_capacity(self.ops.len());
        for (i, op) in self.ops.iter().enumerate() {
            let death = self
                .sources
                .iter()
                .enumerate()
                .filter(|(_, srcs)| srcs.contains(&i))
                .map(|(consumer, _)| consumer)
                .max()
                .unwrap_or(i);
            requests.push(AllocRequest::new(i as AllocId, op.dst_desc().byte_size(), Lifetime { birth: i, death }));
        }

        let mut colocations = Vec::new();
        for (i, op) in self.ops.iter().enumerate() {
            if matches!(op, Op::ConcatConv(_)) {
                let srcs = &self.sources[i];
                colocations.push(ColocationConstraint { first: srcs[0] as AllocId, second: srcs[1] as AllocId });
            }
        }

        arena::plan(&requests, &colocations)
    }

    /// Total scratch bytes this graph needs, monotonically non-decreasing
    /// across calls on the same `Graph` (a caller that shrinks its buffer
    /// between calls would otherwise see the new buffer be too small for
    /// tensors bound by an older, larger plan still in flight).
    ///
    /// Laid out as `[engine-scratch | tensor-arena]` (spec §4.7): the
    /// engine's own kernel workspace comes first, and the tensor arena
    /// starts at `tensorScratchByteOffset` (== `engine.scratch_byte_size()`).
    pub fn get_scratch_byte_size(&mut self, engine: &dyn Engine) -> usize {
        let plan = self.compute_plan();
        let needed = plan.total_byte_size + engine.scratch_byte_size();
        if self.last_scratch_byte_size > 0 && needed > self.last_scratch_byte_size {
            log::warn!(
                "graph: scratch requirement grew from {} to {needed} bytes",
                self.last_scratch_byte_size
            );
        }
        self.plan = Some(plan);
        self.last_scratch_byte_size = self.last_scratch_byte_size.max(needed);
        self.last_scratch_byte_size
    }

    /// Byte offset the arena assigned to op `op_index`'s destination tensor,
    /// once finalized. Mainly useful for tests/tooling that want to confirm
    /// the planner is deterministic across rebuilds.
    pub fn offset_of(&self, op_index: usize) -> Option<usize> {
        self.plan.as_ref().and_then(|p| p.offset_of(op_index as AllocId))
    }

    /// The destination tensor a finalized op is bound to, for tooling and
    /// tests that want to inspect intermediate results directly.
    pub fn dst_tensor(&self, op_index: usize) -> Option<&Tensor> {
        self.ops[op_index].dst()
    }

    /// Whether op `op_index` is a `ConcatConv` that resolved to the
    /// zero-copy view path against its currently bound sources.
    pub fn is_concat_colocated(&self, op_index: usize) -> bool {
        match &self.ops[op_index] {
            Op::ConcatConv(c) => c.has_zero_copy_sources(),
            _ => false,
        }
    }

    /// Binds the scratch buffer the graph will be materialized over. Fails
    /// fast (spec §7) if the buffer is smaller than the last size reported
    /// by `get_scratch_byte_size()`; callers that never called it get no
    /// such check, since there's no known requirement to check against yet.
    pub fn set_scratch(&mut self, buffer: Arc<dyn Buffer>) -> CoreResult<()> {
        if buffer.byte_size() < self.last_scratch_byte_size {
            return Err(CoreError::Misconfiguration(format!(
                "scratch buffer too small: got {} bytes, need at least {}",
                buffer.byte_size(),
                self.last_scratch_byte_size
            )));
        }
        self.dirty = true;
        self.finalized = false;
        self.scratch = Some(buffer);
        Ok(())
    }

    /// Detaches the current scratch binding so the graph can be replanned
    /// (e.g. after `set_scratch` with a new buffer) without rebuilding the
    /// op list.
    pub fn clear(&mut self) {
        self.dirty = true;
        self.finalized = false;
        self.scratch = None;
        self.plan = None;
    }

    pub fn finalize(&mut self, engine: &dyn Engine) -> CoreResult<()> {
        if self.finalized && !self.dirty {
            return Ok(());
        }
        let plan = match self.plan.take() {
            Some(plan) => plan,
            None => {
                log::trace!("graph: no cached plan at finalize, recomputing");
                self.compute_plan()
            }
        };
        log::debug!(
            "graph: finalizing {} ops, arena size {} bytes",
            self.ops.len(),
            plan.total_byte_size
        );
        let buffer = self
            .scratch
            .clone()
            .ok_or_else(|| CoreError::Misconfiguration("scratch buffer not set".into()))?;

        // Tensors live past the engine's own reserved workspace bytes
        // (spec §4.7's `[engine-scratch | tensor-arena]` layout).
        let tensor_scratch_byte_offset = engine.scratch_byte_size();

        for (i, op) in self.ops.iter_mut().enumerate() {
            let desc = op.dst_desc();
            let offset = plan.offset_of(i as AllocId).unwrap_or(0);
            op.set_dst(Tensor::new(
                desc,
                TensorStorage::Scratch { buffer: buffer.clone(), byte_offset: tensor_scratch_byte_offset + offset },
            ));
        }

        let mut bound_sources: Vec<Vec<Tensor>> = Vec::with_capacity(self.ops.len());
        for srcs in &self.sources {
            let tensors = srcs
                .iter()
                .map(|&j| self.ops[j].dst().expect("source op must be bound before being consumed").clone())
                .collect();
            bound_sources.push(tensors);
        }
        for (i, tensors) in bound_sources.into_iter().enumerate() {
            self.ops[i].bind_sources(tensors);
        }

        for op in self.ops.iter_mut() {
            op.finalize(engine)?;
        }

        self.plan = Some(plan);
        self.dirty = false;
        self.finalized = true;
        Ok(())
    }

    pub fn run(&mut self, engine: &dyn Engine, io: &mut RunIo, progress: &mut dyn Progress) -> CoreResult<()> {
        if !self.finalized {
            return Err(CoreError::Misconfiguration("graph must be finalized before run".into()));
        }

        let total_work = self.get_work_amount().max(1e-9);
        let mut done = 0.0;

        for op in self.ops.iter_mut() {
            log::trace!("graph: executing op '{}'", op.name());
            match op {
                Op::InputProcess(ip) => {
                    let images = io.inputs.get(ip.name());
                    ip.execute(engine, images)?;
                }
                Op::OutputProcess(out) => {
                    let image = io
                        .outputs
                        .get_mut(out.name())
                        .ok_or_else(|| CoreError::Misconfiguration(format!("no output image bound for '{}'", out.name())))?;
                    out.execute(engine, image)?;
                }
                Op::Conv(c) => c.execute(engine)?,
                Op::ConcatConv(c) => c.execute(engine)?,
                Op::Pool(p) => p.execute(engine)?,
                Op::Upsample(u) => u.execute(engine)?,
            }

            done += op.work_amount();
            let fraction = (done / total_work) as f32;
            if !progress.report(fraction) {
                log::debug!("graph: run cancelled at {:.1}% progress", fraction * 100.0);
                return Err(CoreError::Cancelled);
            }
        }

        engine.wait()
    }
}
