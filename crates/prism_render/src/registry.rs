//! The set of available back-ends and which one is active.

use prism_accel::SceneIndex;
use prism_gpu::{Device, Extent2d};

use crate::renderer::{ExternalBindingLayouts, RenderError, Renderer, RendererKind};

pub struct RendererRegistry {
    device: Device,
    renderers: Vec<(RendererKind, Box<dyn Renderer>)>,
    active: RendererKind,
}

impl RendererRegistry {
    /// Instantiate every back-end and hand each the device. Nothing is created yet.
    pub fn new(device: &Device, active: RendererKind) -> Self {
        let renderers = RendererKind::ALL
            .iter()
            .map(|&kind| {
                let mut renderer = kind.instantiate();
                renderer.setup(device);
                (kind, renderer)
            })
            .collect();

        Self {
            device: device.clone(),
            renderers,
            active,
        }
    }

    pub fn active_kind(&self) -> RendererKind {
        self.active
    }

    pub fn kinds(&self) -> impl Iterator<Item = RendererKind> + '_ {
        self.renderers.iter().map(|(kind, _)| *kind)
    }

    fn get_mut(&mut self, kind: RendererKind) -> Option<&mut Box<dyn Renderer>> {
        self.renderers
            .iter_mut()
            .find(|(k, _)| *k == kind)
            .map(|(_, r)| r)
    }

    pub fn active_mut(&mut self) -> Option<&mut (dyn Renderer + 'static)> {
        let active = self.active;
        self.get_mut(active).map(|r| r.as_mut())
    }

    pub fn is_created(&self, kind: RendererKind) -> bool {
        self.renderers
            .iter()
            .any(|(k, r)| *k == kind && r.is_created())
    }

    /// Make `kind` the active back-end.
    ///
    /// Waits for the device to go idle, destroys the outgoing back-end's
    /// pipeline state and creates the incoming one. Switching to the active
    /// kind is a no-op when it is already created.
    pub fn switch(
        &mut self,
        kind: RendererKind,
        size: Extent2d,
        layouts: &ExternalBindingLayouts,
        scene: &SceneIndex,
    ) -> Result<bool, RenderError> {
        if kind == self.active && self.is_created(kind) {
            return Ok(false);
        }

        self.device.wait_idle()?;
        log::info!("Switching renderer: {:?} -> {:?}", self.active, kind);

        let previous = self.active;
        if let Some(old) = self.get_mut(previous) {
            old.destroy();
        }
        self.active = kind;
        if let Some(new) = self.get_mut(kind) {
            new.create(size, layouts, scene)?;
        }
        Ok(true)
    }

    /// Destroy every back-end and recreate the active one against new layouts.
    /// The device must be idle.
    pub fn recreate_all(
        &mut self,
        size: Extent2d,
        layouts: &ExternalBindingLayouts,
        scene: &SceneIndex,
    ) -> Result<(), RenderError> {
        for (_, renderer) in self.renderers.iter_mut() {
            renderer.destroy();
        }
        let active = self.active;
        if let Some(renderer) = self.get_mut(active) {
            renderer.create(size, layouts, scene)?;
        }
        Ok(())
    }

    /// Release every back-end's pipeline state. The device must be idle.
    pub fn destroy_all(&mut self) {
        for (_, renderer) in self.renderers.iter_mut() {
            renderer.destroy();
        }
    }
}
