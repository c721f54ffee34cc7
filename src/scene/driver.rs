use anyhow::{Context, Result};

use crate::fx::backend::Backend;
use crate::fx::chain::EffectChain;
use crate::fx::instance::FrameContext;
use crate::render::frame::CpuFrame;

use super::city::City;
use super::raster::Rasterizer;

/// Owns the loop state: each tick advances the city, rasterizes it, runs
/// the effect chain and reads the presented frame back.
pub struct SceneDriver<B: Backend> {
    city: City,
    chain: EffectChain<B>,
    rasterizer: Rasterizer,
    canvas: CpuFrame,
    input: B::Frame,
    fps: u32,
    frame_index: u64,
}

impl<B: Backend> SceneDriver<B> {
    pub fn new(
        backend: &B,
        city: City,
        chain: EffectChain<B>,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<Self> {
        backend
            .check_frame_size(width, height)
            .with_context(|| format!("Cannot render {}x{} on the {} backend", width, height, backend.name()))?;
        Ok(Self {
            city,
            chain,
            rasterizer: Rasterizer::new(),
            canvas: CpuFrame::new(width, height),
            input: backend.allocate_frame(width, height),
            fps,
            frame_index: 0,
        })
    }

    pub fn chain(&self) -> &EffectChain<B> {
        &self.chain
    }

    pub fn chain_mut(&mut self) -> &mut EffectChain<B> {
        &mut self.chain
    }

    pub fn city(&self) -> &City {
        &self.city
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Render the current state without advancing it.
    pub fn render(&mut self, backend: &B) -> Result<CpuFrame> {
        self.rasterizer.render(&self.city.graph, &mut self.canvas);
        backend
            .upload_frame(&self.canvas, &mut self.input)
            .context("Failed to upload scene frame")?;

        let ctx = FrameContext::at(self.frame_index, self.fps);
        // A failed pass has already been logged; its input is presented.
        let presented = self.chain.apply(backend, &self.input, &ctx).frame();
        backend
            .read_frame(presented)
            .context("Failed to read back presented frame")
    }

    /// Advance vehicles one step, then render.
    pub fn tick(&mut self, backend: &B) -> Result<CpuFrame> {
        self.city.vehicles.advance_all(&mut self.city.graph);
        let frame = self.render(backend)?;
        self.frame_index += 1;
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fx::builtin;
    use crate::fx::instance::EffectInstance;
    use crate::render::cpu_backend::CpuBackend;
    use crate::scene::city;
    use std::collections::BTreeSet;

    fn levels(frame: &CpuFrame) -> usize {
        frame.data().chunks(4).map(|px| px[0]).collect::<BTreeSet<_>>().len()
    }

    #[test]
    fn tick_moves_vehicles_and_counts_frames() {
        let backend = CpuBackend::new();
        let city = city::build();
        let first = city.vehicles.iter().next().map(|v| v.node).unwrap();
        let before = city.graph.node(first).transform.translation;

        let mut driver = SceneDriver::new(&backend, city, EffectChain::new(), 16, 9, 30).unwrap();
        driver.tick(&backend).unwrap();
        driver.tick(&backend).unwrap();

        let after = driver.city().graph.node(first).transform.translation;
        assert!((after.z - before.z - 0.2).abs() < 1e-5);
        assert_eq!(driver.frame_index(), 2);
    }

    #[test]
    fn posterized_city_has_few_levels() {
        let backend = CpuBackend::new();
        let mut chain = EffectChain::new();
        let mut posterize =
            EffectInstance::create(&backend, builtin::lookup("posterize").unwrap().program_desc()).unwrap();
        posterize
            .set_parameter("steps", crate::fx::param::ParamValue::Int(3))
            .unwrap();
        chain.append(posterize).unwrap();

        let mut driver = SceneDriver::new(&backend, city::build(), chain, 64, 36, 30).unwrap();
        let frame = driver.tick(&backend).unwrap();
        assert_eq!(frame.size(), (64, 36));
        assert!(levels(&frame) <= 3);
    }

    #[test]
    fn empty_chain_presents_the_raster() {
        let backend = CpuBackend::new();
        let mut driver = SceneDriver::new(&backend, city::build(), EffectChain::new(), 32, 18, 30).unwrap();
        let presented = driver.render(&backend).unwrap();

        let mut expected = CpuFrame::new(32, 18);
        Rasterizer::new().render(&driver.city().graph, &mut expected);
        assert_eq!(presented, expected);
    }

    #[test]
    fn oversized_frames_are_an_error_not_a_crash() {
        let backend = CpuBackend::new().with_frame_limit(2048);
        let result = SceneDriver::new(&backend, city::build(), EffectChain::new(), 2560, 720, 30);
        let err = result.err().unwrap();
        assert!(matches!(
            err.downcast_ref::<crate::fx::error::PassError>(),
            Some(crate::fx::error::PassError::FrameTooLarge { max: 2048, .. })
        ));
    }
}
