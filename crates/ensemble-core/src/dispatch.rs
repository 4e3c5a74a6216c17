//! Collective method dispatch.
//!
//! [`Ensemble::dispatch`] resolves a name across all members. Methods come
//! back as a [`BoundDispatcher`] which distributes arguments (with optional
//! expansion) and calls every member, sequentially or through an
//! [`ExecutionBackend`].

use ensemble_expand::{expand_arguments, Expansion};
use serde_json::Value;
use tracing::Instrument;

use crate::ensemble::Ensemble;
use crate::error::{EnsembleError, Result};
use crate::member::{id_of, Item, Member};
use crate::metrics::METRICS;
use crate::obs::{dispatch_span, emit_dispatch_finished, emit_dispatch_started, DispatchSpan};
use crate::parallel::{ExecutionBackend, WorkUnit};
use crate::recast::{recast, Recast};
use crate::ArgMap;

/// Outcome of resolving a name across the ensemble.
#[derive(Debug)]
pub enum Dispatch<'a> {
    /// Plain attribute, already recast.
    Value(Recast),
    Method(BoundDispatcher<'a>),
}

impl<'a> Dispatch<'a> {
    pub fn into_value(self) -> Option<Recast> {
        match self {
            Dispatch::Value(recast) => Some(recast),
            Dispatch::Method(_) => None,
        }
    }

    pub fn into_method(self) -> Option<BoundDispatcher<'a>> {
        match self {
            Dispatch::Method(method) => Some(method),
            Dispatch::Value(_) => None,
        }
    }

    pub fn is_method(&self) -> bool {
        matches!(self, Dispatch::Method(_))
    }
}

/// Arguments for a collective call.
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    pub args: Vec<Value>,
    pub kwargs: ArgMap,
    pub expansion: Expansion,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_arg(mut self, arg: Value) -> Self {
        self.args.push(arg);
        self
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_kwarg(mut self, key: &str, value: Value) -> Self {
        self.kwargs.insert(key.to_string(), value);
        self
    }

    pub fn with_kwargs(mut self, kwargs: ArgMap) -> Self {
        self.kwargs = kwargs;
        self
    }

    pub fn with_expansion(mut self, expansion: Expansion) -> Self {
        self.expansion = expansion;
        self
    }
}

/// A method name bound to an ensemble, ready to be called on every member.
#[derive(Debug)]
pub struct BoundDispatcher<'a> {
    ensemble: &'a mut Ensemble,
    attr: String,
}

impl<'a> BoundDispatcher<'a> {
    pub(crate) fn new(ensemble: &'a mut Ensemble, attr: &str) -> Self {
        Self {
            ensemble,
            attr: attr.to_string(),
        }
    }

    pub fn attr(&self) -> &str {
        &self.attr
    }

    /// Call the method on each member in order; the first failure aborts.
    ///
    /// Calls run on a working copy of the members, committed once every
    /// call succeeded and the resulting ids still index.
    pub fn call(self, call: CallArgs) -> Result<Recast> {
        let _span = DispatchSpan::enter(self.ensemble.name(), &self.attr);
        METRICS.inc_dispatches();
        emit_dispatch_started(self.ensemble.name(), &self.attr, self.ensemble.len(), "sequential");

        let plan = self.plan(&call)?;
        let idkey = self.ensemble.idkey.clone();
        let mut members = self.ensemble.members.clone();
        let mut results = Vec::with_capacity(plan.len());
        for (member, (args, kwargs)) in members.iter_mut().zip(plan) {
            let id = id_of(member.as_ref(), &idkey)?;
            METRICS.inc_member_calls();
            let item = member
                .call(&self.attr, &args, &kwargs)
                .map_err(|source| EnsembleError::Member {
                    id,
                    method: self.attr.clone(),
                    source,
                })?;
            results.push(item);
        }
        finish(self.ensemble, &self.attr, members, results)
    }

    /// Call the method on clones of every member through `backend`.
    ///
    /// Updated members replace the originals only when every unit
    /// succeeded and their ids still index; otherwise the ensemble is left
    /// as it was.
    pub async fn call_parallel(
        self,
        call: CallArgs,
        backend: &dyn ExecutionBackend,
    ) -> Result<Recast> {
        let span = dispatch_span(self.ensemble.name(), &self.attr);
        async move {
            METRICS.inc_dispatches();
            emit_dispatch_started(self.ensemble.name(), &self.attr, self.ensemble.len(), "parallel");

            let plan = self.plan(&call)?;
            let units: Vec<WorkUnit> = self
                .ensemble
                .members
                .iter()
                .zip(plan)
                .enumerate()
                .map(|(position, (member, (args, kwargs)))| WorkUnit {
                    position,
                    member: member.clone_member(),
                    args,
                    kwargs,
                })
                .collect();
            let submitted = units.len();

            let completed = backend.execute(&self.attr, units).await?;
            if completed.len() != submitted {
                return Err(EnsembleError::LengthMismatch {
                    context: format!("parallel results of '{}'", self.attr),
                    expected: submitted,
                    actual: completed.len(),
                });
            }

            let (members, results): (Vec<Box<dyn Member>>, Vec<Item>) = completed
                .into_iter()
                .map(|done| (done.member, done.item))
                .unzip();
            finish(self.ensemble, &self.attr, members, results)
        }
        .instrument(span)
        .await
    }

    /// Per-member `(positional, keyword)` arguments.
    fn plan(&self, call: &CallArgs) -> Result<Vec<(Vec<Value>, ArgMap)>> {
        let size = self.ensemble.len();
        let mut kwargs_list = expand_arguments(&call.kwargs, &call.expansion)?;
        if kwargs_list.len() == 1 && size != 1 {
            let single = kwargs_list.remove(0);
            kwargs_list = vec![single; size];
        } else if kwargs_list.len() != size {
            return Err(EnsembleError::LengthMismatch {
                context: format!("expanded arguments for '{}'", self.attr),
                expected: size,
                actual: kwargs_list.len(),
            });
        }
        let positional = distribute_positional(&call.args, size);
        Ok(positional.into_iter().zip(kwargs_list).collect())
    }
}

/// Positional arguments per member.
///
/// When every positional argument is an array of exactly `size` elements,
/// member `i` receives element `i` of each; otherwise every member receives
/// the arguments unchanged.
pub fn distribute_positional(args: &[Value], size: usize) -> Vec<Vec<Value>> {
    let per_member = !args.is_empty()
        && args
            .iter()
            .all(|arg| arg.as_array().is_some_and(|seq| seq.len() == size));
    if !per_member {
        return vec![args.to_vec(); size];
    }
    (0..size)
        .map(|i| {
            args.iter()
                .filter_map(|arg| arg.as_array().and_then(|seq| seq.get(i)).cloned())
                .collect()
        })
        .collect()
}

fn finish(
    ensemble: &mut Ensemble,
    attr: &str,
    members: Vec<Box<dyn Member>>,
    results: Vec<Item>,
) -> Result<Recast> {
    if results.len() != ensemble.len() || members.len() != ensemble.len() {
        return Err(EnsembleError::LengthMismatch {
            context: format!("results of '{attr}'"),
            expected: ensemble.len(),
            actual: results.len().min(members.len()),
        });
    }
    // methods may have renamed members
    ensemble.commit_members(members)?;
    let outcome = recast(results, &ensemble.members, &ensemble.recast_context(attr))?;
    emit_dispatch_finished(ensemble.name(), attr, outcome.shape());
    Ok(outcome)
}
