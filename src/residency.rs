//! Model residency: who holds the sequence and codec models, and for how long.
//!
//! [`Residency`] is the only owner of the two model handles. With lazy
//! loading a model is built on first use and dropped as soon as the phase
//! that needed it ends (on error paths too), so at most one model occupies
//! device memory at a time. Without lazy loading both are loaded at
//! construction and stay resident for the pipeline's lifetime.

use std::path::{Path, PathBuf};

use crate::device::{DevicePlan, ModelRole, Placement};
use crate::model::ModelLoader;
use crate::{Error, Result};

/// One model's checkpoint, placement and (maybe) loaded instance.
pub struct ModelSlot<L: ModelLoader> {
    role: ModelRole,
    loader: L,
    path: PathBuf,
    placement: Placement,
    model: Option<L::Model>,
    loads: usize,
}

impl<L: ModelLoader> ModelSlot<L> {
    pub fn new(role: ModelRole, loader: L, path: impl Into<PathBuf>, placement: Placement) -> Self {
        Self {
            role,
            loader,
            path: path.into(),
            placement,
            model: None,
            loads: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn placement(&self) -> Placement {
        self.placement
    }

    pub fn is_resident(&self) -> bool {
        self.model.is_some()
    }

    /// How many times the model has been built.
    pub fn load_count(&self) -> usize {
        self.loads
    }

    /// Load the model if it is not resident and return it.
    pub fn acquire(&mut self) -> Result<&mut L::Model> {
        let model = match self.model.take() {
            Some(model) => model,
            None => self.load()?,
        };
        Ok(self.model.insert(model))
    }

    fn load(&mut self) -> Result<L::Model> {
        let device = self.placement.device.open()?;
        tracing::info!(
            role = %self.role,
            path = ?self.path,
            device = %self.placement.device,
            dtype = ?self.placement.dtype,
            "loading model"
        );
        let model = self
            .loader
            .load(&self.path, &device, self.placement.dtype)
            .map_err(Error::model_execution("model load"))?;
        self.loads += 1;
        Ok(model)
    }

    /// Drop the model, freeing its device memory.
    pub fn release(&mut self) {
        if self.model.take().is_some() {
            tracing::info!(role = %self.role, "unloaded model");
        }
    }
}

/// Residency state of both models.
pub struct Residency<S: ModelLoader, C: ModelLoader> {
    sequence: ModelSlot<S>,
    codec: ModelSlot<C>,
    lazy_load: bool,
}

impl<S: ModelLoader, C: ModelLoader> Residency<S, C> {
    /// Set up both slots from a plan.
    ///
    /// Without lazy loading both models are loaded here.
    pub fn new(
        plan: &DevicePlan,
        sequence_loader: S,
        sequence_path: impl Into<PathBuf>,
        codec_loader: C,
        codec_path: impl Into<PathBuf>,
    ) -> Result<Self> {
        let mut residency = Self {
            sequence: ModelSlot::new(
                ModelRole::Sequence,
                sequence_loader,
                sequence_path,
                plan.sequence,
            ),
            codec: ModelSlot::new(ModelRole::Codec, codec_loader, codec_path, plan.codec),
            lazy_load: plan.lazy_load,
        };
        if !residency.lazy_load {
            tracing::info!("lazy loading disabled, loading both models now");
            residency.sequence.acquire()?;
            residency.codec.acquire()?;
        }
        Ok(residency)
    }

    pub fn lazy_load(&self) -> bool {
        self.lazy_load
    }

    pub fn is_resident(&self, role: ModelRole) -> bool {
        match role {
            ModelRole::Sequence => self.sequence.is_resident(),
            ModelRole::Codec => self.codec.is_resident(),
        }
    }

    pub fn load_count(&self, role: ModelRole) -> usize {
        match role {
            ModelRole::Sequence => self.sequence.load_count(),
            ModelRole::Codec => self.codec.load_count(),
        }
    }

    /// Make a model resident without using it.
    pub fn acquire(&mut self, role: ModelRole) -> Result<()> {
        match role {
            ModelRole::Sequence => self.sequence.acquire().map(|_| ()),
            ModelRole::Codec => self.codec.acquire().map(|_| ()),
        }
    }

    /// Release a model if the lazy policy allows it.
    ///
    /// Eagerly loaded models stay resident for the pipeline's lifetime.
    pub fn release(&mut self, role: ModelRole) {
        if !self.lazy_load {
            tracing::debug!(%role, "lazy loading disabled, keeping model resident");
            return;
        }
        match role {
            ModelRole::Sequence => self.sequence.release(),
            ModelRole::Codec => self.codec.release(),
        }
    }

    /// Run `f` with the sequence model, releasing it afterwards under lazy loading.
    pub fn with_sequence<T>(&mut self, f: impl FnOnce(&mut S::Model) -> Result<T>) -> Result<T> {
        let result = self.sequence.acquire().and_then(f);
        self.release(ModelRole::Sequence);
        result
    }

    /// Run `f` with the codec model, releasing it afterwards under lazy loading.
    pub fn with_codec<T>(&mut self, f: impl FnOnce(&mut C::Model) -> Result<T>) -> Result<T> {
        let result = self.codec.acquire().and_then(f);
        self.release(ModelRole::Codec);
        result
    }
}
