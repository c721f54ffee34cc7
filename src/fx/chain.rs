use super::backend::Backend;
use super::error::{ChainStateError, PassError};
use super::instance::{EffectId, EffectInstance, FrameContext};
use super::uniform::FrameInfo;

/// Intermediate frames owned by the chain. `present` always receives the
/// last pass, whatever the number of passes.
struct Targets<F> {
    ping: F,
    pong: F,
    present: F,
    size: (u32, u32),
}

/// Result of [`EffectChain::apply`].
pub enum ApplyOutcome<'a, F> {
    /// Empty chain: the input, untouched.
    PassThrough(&'a F),
    /// Every pass ran; the frame is the chain's present target.
    Processed(&'a F),
    /// A pass failed; the unprocessed input is returned instead.
    Fallback(&'a F, PassError),
}

impl<'a, F> ApplyOutcome<'a, F> {
    pub fn frame(&self) -> &'a F {
        match self {
            ApplyOutcome::PassThrough(f) | ApplyOutcome::Processed(f) => *f,
            ApplyOutcome::Fallback(f, _) => *f,
        }
    }
}

/// Ordered post-processing effects applied to each rendered frame.
pub struct EffectChain<B: Backend> {
    effects: Vec<EffectInstance<B>>,
    pending_reloads: Vec<(EffectId, String)>,
    targets: Option<Targets<B::Frame>>,
}

impl<B: Backend> Default for EffectChain<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> EffectChain<B> {
    pub fn new() -> Self {
        Self {
            effects: Vec::new(),
            pending_reloads: Vec::new(),
            targets: None,
        }
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn ids(&self) -> Vec<EffectId> {
        self.effects.iter().map(|e| e.id()).collect()
    }

    pub fn contains(&self, id: EffectId) -> bool {
        self.position(id).is_some()
    }

    fn position(&self, id: EffectId) -> Option<usize> {
        self.effects.iter().position(|e| e.id() == id)
    }

    pub fn get(&self, id: EffectId) -> Option<&EffectInstance<B>> {
        self.effects.iter().find(|e| e.id() == id)
    }

    pub fn get_mut(&mut self, id: EffectId) -> Option<&mut EffectInstance<B>> {
        self.effects.iter_mut().find(|e| e.id() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EffectInstance<B>> {
        self.effects.iter()
    }

    /// Attach at the end of the chain.
    pub fn append(&mut self, effect: EffectInstance<B>) -> Result<EffectId, ChainStateError> {
        self.insert(self.effects.len(), effect)
    }

    pub fn insert(
        &mut self,
        index: usize,
        effect: EffectInstance<B>,
    ) -> Result<EffectId, ChainStateError> {
        let id = effect.id();
        if self.contains(id) {
            return Err(ChainStateError::AlreadyAttached(id));
        }
        if index > self.effects.len() {
            return Err(ChainStateError::IndexOutOfRange {
                index,
                len: self.effects.len(),
            });
        }
        log::debug!("Attaching '{}' {} at position {}", effect.kind(), id, index);
        self.effects.insert(index, effect);
        Ok(id)
    }

    /// Detach and drop an effect. Returns false, changing nothing, if the
    /// effect is not attached.
    pub fn remove(&mut self, id: EffectId) -> bool {
        self.detach(id).is_some()
    }

    /// Detach an effect and hand it back; it stays alive but receives no
    /// further updates.
    pub fn detach(&mut self, id: EffectId) -> Option<EffectInstance<B>> {
        match self.position(id) {
            Some(index) => {
                self.pending_reloads.retain(|(pending, _)| *pending != id);
                let effect = self.effects.remove(index);
                log::debug!("Detached '{}' {}", effect.kind(), id);
                Some(effect)
            }
            None => {
                log::warn!("Cannot remove effect {}: not in the chain", id);
                None
            }
        }
    }

    pub fn move_to(&mut self, id: EffectId, index: usize) -> Result<(), ChainStateError> {
        let from = self.position(id).ok_or(ChainStateError::NotAttached(id))?;
        if index >= self.effects.len() {
            return Err(ChainStateError::IndexOutOfRange {
                index,
                len: self.effects.len(),
            });
        }
        let effect = self.effects.remove(from);
        self.effects.insert(index, effect);
        Ok(())
    }

    /// Replace an effect's body at the next frame boundary.
    pub fn schedule_reload(&mut self, id: EffectId, body: String) -> Result<(), ChainStateError> {
        if !self.contains(id) {
            return Err(ChainStateError::NotAttached(id));
        }
        self.pending_reloads.retain(|(pending, _)| *pending != id);
        self.pending_reloads.push((id, body));
        Ok(())
    }

    pub fn has_pending_reloads(&self) -> bool {
        !self.pending_reloads.is_empty()
    }

    fn process_reloads(&mut self, backend: &B) {
        for (id, body) in std::mem::take(&mut self.pending_reloads) {
            let Some(effect) = self.get_mut(id) else {
                continue;
            };
            match effect.program().recompile(backend, &body) {
                Ok(program) => {
                    log::info!("Reloaded '{}' {}", effect.kind(), id);
                    effect.replace_program(program);
                }
                Err(err) => {
                    log::warn!("Reload of '{}' {} failed, keeping previous program: {}", effect.kind(), id, err);
                }
            }
        }
    }

    fn ensure_targets(&mut self, backend: &B, size: (u32, u32)) {
        if self.targets.as_ref().is_some_and(|t| t.size == size) {
            return;
        }
        log::debug!("Allocating effect targets {}x{}", size.0, size.1);
        self.targets = Some(Targets {
            ping: backend.allocate_frame(size.0, size.1),
            pong: backend.allocate_frame(size.0, size.1),
            present: backend.allocate_frame(size.0, size.1),
            size,
        });
    }

    /// Run every attached effect over `input`, in order.
    ///
    /// Pass `i` reads the output of pass `i - 1` (the input for the first
    /// pass) and never the frame it writes. The last pass writes the
    /// present target.
    pub fn apply<'a>(
        &'a mut self,
        backend: &B,
        input: &'a B::Frame,
        ctx: &FrameContext,
    ) -> ApplyOutcome<'a, B::Frame> {
        self.process_reloads(backend);

        if self.effects.is_empty() {
            return ApplyOutcome::PassThrough(input);
        }

        let size = B::frame_size(input);
        if let Err(err) = backend.check_frame_size(size.0, size.1) {
            log::warn!("Cannot allocate effect targets, presenting unprocessed frame: {}", err);
            return ApplyOutcome::Fallback(input, err);
        }
        self.ensure_targets(backend, size);
        let info = FrameInfo {
            resolution: [size.0 as f32, size.1 as f32],
            time: ctx.time,
            delta_time: ctx.delta_time,
        };

        let count = self.effects.len();
        let Some(targets) = self.targets.as_mut() else {
            return ApplyOutcome::Fallback(input, PassError::Backend("no effect targets".into()));
        };

        for (i, effect) in self.effects.iter_mut().enumerate() {
            effect.update(backend, &info);

            let last = i + 1 == count;
            let Targets {
                ping,
                pong,
                present,
                ..
            } = &mut *targets;
            let (src, dst): (&B::Frame, &mut B::Frame) = match (i, last) {
                (0, true) => (input, present),
                (0, false) => (input, ping),
                (i, true) if i % 2 == 1 => (&*ping, present),
                (i, false) if i % 2 == 1 => (&*ping, pong),
                (_, true) => (&*pong, present),
                (_, false) => (&*pong, ping),
            };

            if let Err(err) = backend.run_pass(effect.program().program(), src, dst) {
                log::warn!(
                    "Effect '{}' {} failed, presenting unprocessed frame: {}",
                    effect.kind(),
                    effect.id(),
                    err
                );
                return ApplyOutcome::Fallback(input, err);
            }
        }

        ApplyOutcome::Processed(&targets.present)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fx::builtin;
    use crate::fx::param::ParamValue;
    use crate::render::cpu_backend::CpuBackend;
    use crate::render::frame::CpuFrame;
    use std::collections::BTreeSet;

    fn effect(backend: &CpuBackend, kind: &str) -> EffectInstance<CpuBackend> {
        let def = builtin::lookup(kind).unwrap();
        EffectInstance::create(backend, def.program_desc()).unwrap()
    }

    fn posterize(backend: &CpuBackend, steps: i32) -> EffectInstance<CpuBackend> {
        let mut fx = effect(backend, "posterize");
        fx.set_parameter("steps", ParamValue::Int(steps)).unwrap();
        fx
    }

    /// Horizontal gray ramp covering every 8-bit value.
    fn ramp() -> CpuFrame {
        let mut frame = CpuFrame::new(256, 2);
        for y in 0..2 {
            for x in 0..256u32 {
                let v = x as u8;
                frame.put(x, y, [v, v, v, 255]);
            }
        }
        frame
    }

    fn levels(frame: &CpuFrame) -> usize {
        frame.data().chunks(4).map(|px| px[0]).collect::<BTreeSet<u8>>().len()
    }

    fn ctx() -> FrameContext {
        FrameContext::at(0, 60)
    }

    #[test]
    fn empty_chain_passes_input_through() {
        let backend = CpuBackend::new();
        let mut chain = EffectChain::<CpuBackend>::new();
        let input = ramp();
        let outcome = chain.apply(&backend, &input, &ctx());
        assert!(matches!(outcome, ApplyOutcome::PassThrough(_)));
        assert!(std::ptr::eq(outcome.frame(), &input));
        assert_eq!(outcome.frame(), &ramp());
    }

    #[test]
    fn posterize_produces_requested_levels() {
        let backend = CpuBackend::new();
        let mut chain = EffectChain::new();
        chain.append(posterize(&backend, 4)).unwrap();
        let input = ramp();
        let outcome = chain.apply(&backend, &input, &ctx());
        assert!(matches!(outcome, ApplyOutcome::Processed(_)));
        assert_eq!(levels(outcome.frame()), 4);
    }

    #[test]
    fn single_step_posterize_is_flat_black() {
        let backend = CpuBackend::new();
        let mut chain = EffectChain::new();
        chain.append(posterize(&backend, 1)).unwrap();
        let input = ramp();
        let outcome = chain.apply(&backend, &input, &ctx());
        assert_eq!(levels(outcome.frame()), 1);
        assert!(outcome.frame().data().chunks(4).all(|px| px[..3] == [0, 0, 0]));
    }

    #[test]
    fn top_of_ramp_lands_on_the_last_level() {
        let backend = CpuBackend::new();
        let mut chain = EffectChain::new();
        chain.append(posterize(&backend, 2)).unwrap();
        let input = ramp();
        let out = chain.apply(&backend, &input, &ctx()).frame().clone();
        assert_eq!(levels(&out), 2);
        assert_eq!(out.get(0, 0)[0], 0);
        assert_eq!(out.get(255, 0)[0], 255);
    }

    #[test]
    fn oversized_input_falls_back_without_allocating() {
        let backend = CpuBackend::new().with_frame_limit(128);
        let mut chain = EffectChain::new();
        chain.append(effect(&backend, "invert")).unwrap();
        let input = ramp();
        let outcome = chain.apply(&backend, &input, &ctx());
        match outcome {
            ApplyOutcome::Fallback(frame, err) => {
                assert!(std::ptr::eq(frame, &input));
                assert_eq!(err, PassError::FrameTooLarge { size: (256, 2), max: 128 });
            }
            _ => panic!("expected a fallback"),
        }
    }

    #[test]
    fn instances_keep_their_own_steps_in_the_same_frame() {
        let backend = CpuBackend::new();
        let mut chain_a = EffectChain::new();
        let mut chain_b = EffectChain::new();
        chain_a.append(posterize(&backend, 4)).unwrap();
        chain_b.append(posterize(&backend, 12)).unwrap();

        let input = ramp();
        let frame = ctx();
        let a = chain_a.apply(&backend, &input, &frame).frame().clone();
        let b = chain_b.apply(&backend, &input, &frame).frame().clone();

        assert_eq!(levels(&a), 4);
        assert_eq!(levels(&b), 12);
    }

    #[test]
    fn removing_absent_effect_is_a_no_op() {
        let backend = CpuBackend::new();
        let mut chain = EffectChain::new();
        chain.append(posterize(&backend, 4)).unwrap();
        let stranger = posterize(&backend, 4);
        assert!(!chain.remove(stranger.id()));
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn detach_returns_the_effect() {
        let backend = CpuBackend::new();
        let mut chain = EffectChain::new();
        let id = chain.append(posterize(&backend, 5)).unwrap();
        let fx = chain.detach(id).unwrap();
        assert_eq!(fx.parameter("steps"), Some(ParamValue::Int(5)));
        assert!(chain.is_empty());
        assert_eq!(backend.live_programs(), 1);
        drop(fx);
        assert_eq!(backend.live_programs(), 0);
    }

    #[test]
    fn dropping_the_chain_releases_programs() {
        let backend = CpuBackend::new();
        let mut chain = EffectChain::new();
        chain.append(posterize(&backend, 4)).unwrap();
        chain.append(effect(&backend, "invert")).unwrap();
        assert_eq!(backend.live_programs(), 2);
        drop(chain);
        assert_eq!(backend.live_programs(), 0);
    }

    #[test]
    fn order_matters_for_non_commuting_effects() {
        let backend = CpuBackend::new();
        let mut grading = effect(&backend, "color_grading");
        grading.set_parameter("contrast", ParamValue::Float(1.5)).unwrap();
        grading.set_parameter("saturation", ParamValue::Float(1.0)).unwrap();
        grading.set_parameter("tint", ParamValue::Color([1.0; 4])).unwrap();
        let mut grading_first = effect(&backend, "color_grading");
        for (name, value) in grading.parameters() {
            grading_first.set_parameter(&name, value).unwrap();
        }

        let mut xy = EffectChain::new();
        xy.append(posterize(&backend, 4)).unwrap();
        xy.append(grading).unwrap();

        let mut yx = EffectChain::new();
        yx.append(grading_first).unwrap();
        yx.append(posterize(&backend, 4)).unwrap();

        let input = ramp();
        let a = xy.apply(&backend, &input, &ctx()).frame().checksum();
        let b = yx.apply(&backend, &input, &ctx()).frame().checksum();
        assert_ne!(a, b);
    }

    #[test]
    fn odd_and_even_chains_end_in_present_target() {
        let backend = CpuBackend::new();
        let input = ramp();
        for count in 1..=4 {
            let mut chain = EffectChain::new();
            for _ in 0..count {
                chain.append(effect(&backend, "invert")).unwrap();
            }
            let outcome = chain.apply(&backend, &input, &ctx());
            let expected = if count % 2 == 0 { ramp() } else { invert(&ramp()) };
            assert!(matches!(outcome, ApplyOutcome::Processed(_)));
            assert_eq!(outcome.frame(), &expected, "{} passes", count);
        }
    }

    fn invert(frame: &CpuFrame) -> CpuFrame {
        let mut out = frame.clone();
        for px in out.data_mut().chunks_mut(4) {
            for c in &mut px[..3] {
                *c = 255 - *c;
            }
        }
        out
    }

    #[test]
    fn failed_pass_falls_back_to_input() {
        let backend = CpuBackend::new();
        let mut chain = EffectChain::new();
        chain.append(posterize(&backend, 4)).unwrap();
        chain.append(effect(&backend, "invert")).unwrap();
        backend.fail_next_passes(1);

        let input = ramp();
        let outcome = chain.apply(&backend, &input, &ctx());
        assert!(matches!(outcome, ApplyOutcome::Fallback(_, _)));
        assert!(std::ptr::eq(outcome.frame(), &input));
    }

    #[test]
    fn detached_effect_can_be_reattached() {
        let backend = CpuBackend::new();
        let mut chain = EffectChain::new();
        let fx = posterize(&backend, 4);
        let id = fx.id();
        chain.append(fx).unwrap();
        let back = chain.detach(id).unwrap();
        assert_eq!(chain.insert(0, back), Ok(id));
        assert_eq!(
            chain.move_to(id, 3),
            Err(ChainStateError::IndexOutOfRange { index: 3, len: 1 })
        );
        let out_of_range = chain.insert(5, posterize(&backend, 2));
        assert!(matches!(out_of_range, Err(ChainStateError::IndexOutOfRange { .. })));
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn move_to_reorders() {
        let backend = CpuBackend::new();
        let mut chain = EffectChain::new();
        let a = chain.append(posterize(&backend, 4)).unwrap();
        let b = chain.append(effect(&backend, "invert")).unwrap();
        chain.move_to(b, 0).unwrap();
        assert_eq!(chain.ids(), vec![b, a]);
    }

    #[test]
    fn reload_is_applied_at_next_frame() {
        let backend = CpuBackend::new();
        let mut chain = EffectChain::new();
        let id = chain.append(effect(&backend, "invert")).unwrap();
        let body = builtin::lookup("invert").unwrap().body.replace("fx.amount", "0.0");
        chain.schedule_reload(id, body).unwrap();
        assert!(chain.has_pending_reloads());

        let input = ramp();
        chain.apply(&backend, &input, &ctx());
        assert!(!chain.has_pending_reloads());
        assert!(chain.get(id).unwrap().program().source().contains("mix(color.rgb, inverted, 0.0)"));
        assert_eq!(backend.live_programs(), 1);
    }

    #[test]
    fn failed_reload_keeps_previous_program() {
        let backend = CpuBackend::new();
        let mut chain = EffectChain::new();
        let id = chain.append(effect(&backend, "invert")).unwrap();
        let before = chain.get(id).unwrap().program().source().to_string();
        chain.schedule_reload(id, "fn fs_main( {".into()).unwrap();

        let input = ramp();
        let outcome = chain.apply(&backend, &input, &ctx());
        assert!(matches!(outcome, ApplyOutcome::Processed(_)));
        assert_eq!(chain.get(id).unwrap().program().source(), before);
    }

    #[test]
    fn reload_of_detached_effect_is_rejected() {
        let backend = CpuBackend::new();
        let mut chain = EffectChain::<CpuBackend>::new();
        let fx = effect(&backend, "invert");
        let id = fx.id();
        assert_eq!(
            chain.schedule_reload(id, String::new()),
            Err(ChainStateError::NotAttached(id))
        );
        assert_eq!(chain.move_to(id, 0), Err(ChainStateError::NotAttached(id)));
    }
}
