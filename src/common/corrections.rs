//! Corrections are an opaque value threaded from the dispatcher through
//! `UDFMeta` to each UDF and to `Partition::set_corrections`. The engine
//! never inspects their contents.

/// Marker bound for correction data. Blanket-implemented for anything that
/// can be cloned onto a task and shipped to a worker.
pub trait Corrections: Clone + Send + Sync + 'static {}
impl<T: Clone + Send + Sync + 'static> Corrections for T {}

/// The absence of correction data, used as the default `Corrections` type
/// when a dataset has none to offer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NoCorrections;
