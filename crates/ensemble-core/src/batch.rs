//! Batch loading: run one loader call per expanded argument set.
//!
//! The loader is any `Fn(&ArgMap) -> anyhow::Result<M>`. With no expansion
//! directive the loader runs once; otherwise once per expanded argument
//! map, and the results are returned as a list or wrapped into an
//! [`Ensemble`].

use std::sync::Arc;

use ensemble_expand::{expand_arguments, Expansion};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::ensemble::{Ensemble, EnsembleOptions};
use crate::error::{EnsembleError, Result};
use crate::member::{Member, TypeRegistry, DEFAULT_ID_KEY};
use crate::ArgMap;

/// Options controlling expansion and how the loaded items are returned.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchOptions {
    #[serde(flatten)]
    pub expansion: Expansion,
    /// Wrap the loaded items into an ensemble; defaults to whether
    /// `ens_name` is set.
    pub as_ensemble: Option<bool>,
    pub ens_name: Option<String>,
    pub ens_title: Option<String>,
    /// Overrides the basetype inferred from the loaded items.
    pub basetype: Option<String>,
    pub idkey: Option<String>,
    #[serde(skip)]
    pub registry: Arc<TypeRegistry>,
}

impl BatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_expansion(mut self, expansion: Expansion) -> Self {
        self.expansion = expansion;
        self
    }

    pub fn as_ensemble(mut self, as_ensemble: bool) -> Self {
        self.as_ensemble = Some(as_ensemble);
        self
    }

    pub fn with_ens_name(mut self, name: &str) -> Self {
        self.ens_name = Some(name.to_string());
        self
    }

    pub fn with_ens_title(mut self, title: &str) -> Self {
        self.ens_title = Some(title.to_string());
        self
    }

    pub fn with_basetype(mut self, basetype: &str) -> Self {
        self.basetype = Some(basetype.to_string());
        self
    }

    pub fn with_idkey(mut self, idkey: &str) -> Self {
        self.idkey = Some(idkey.to_string());
        self
    }

    pub fn with_registry(mut self, registry: Arc<TypeRegistry>) -> Self {
        self.registry = registry;
        self
    }

    fn ensemble_options(&self) -> EnsembleOptions {
        EnsembleOptions {
            basetype: self.basetype.clone(),
            idkey: self
                .idkey
                .clone()
                .unwrap_or_else(|| DEFAULT_ID_KEY.to_string()),
            name: self.ens_name.clone().unwrap_or_default(),
            title: self.ens_title.clone().unwrap_or_default(),
            extra: ArgMap::new(),
            registry: Arc::clone(&self.registry),
        }
    }
}

/// What a batch load produced.
#[derive(Debug)]
pub enum Loaded<M> {
    /// No expansion was requested.
    Single(M),
    Many(Vec<M>),
    Ensemble(Ensemble),
}

impl<M> Loaded<M> {
    pub fn into_single(self) -> Option<M> {
        match self {
            Loaded::Single(item) => Some(item),
            _ => None,
        }
    }

    pub fn into_many(self) -> Option<Vec<M>> {
        match self {
            Loaded::Many(items) => Some(items),
            _ => None,
        }
    }

    pub fn into_ensemble(self) -> Option<Ensemble> {
        match self {
            Loaded::Ensemble(ensemble) => Some(ensemble),
            _ => None,
        }
    }
}

/// A loader function lifted to batch form.
pub struct BatchLoad<F> {
    load: F,
}

impl<F, M> BatchLoad<F>
where
    F: Fn(&ArgMap) -> anyhow::Result<M>,
    M: Member,
{
    pub fn new(load: F) -> Self {
        Self { load }
    }

    /// Load once, or once per expanded argument map.
    pub fn load(&self, kwargs: &ArgMap, options: &BatchOptions) -> Result<Loaded<M>> {
        if !options.expansion.is_requested() {
            let item = (self.load)(kwargs).map_err(|source| EnsembleError::Load { index: 0, source })?;
            return Ok(Loaded::Single(item));
        }

        let arg_sets = expand_arguments(kwargs, &options.expansion)?;
        debug!(count = arg_sets.len(), "batch load expanded");
        let items = arg_sets
            .iter()
            .enumerate()
            .map(|(index, args)| {
                (self.load)(args).map_err(|source| EnsembleError::Load { index, source })
            })
            .collect::<Result<Vec<M>>>()?;
        info!(count = items.len(), "batch load finished");

        let as_ensemble = options
            .as_ensemble
            .unwrap_or(options.ens_name.is_some());
        if as_ensemble {
            Ensemble::from_members(items, options.ensemble_options()).map(Loaded::Ensemble)
        } else {
            Ok(Loaded::Many(items))
        }
    }
}
