//! Element dtypes and the numeric-promotion rule used to pick the dtype a
//! UDF set reads a dataset at.

use serde::{Deserialize, Serialize};

/// The element type backing a `Buffer`'s storage.
///
/// Kind precedence for promotion is `Bool < Int < Float < Complex`; widths
/// widen to fit within a kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DType {
    Bool,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Complex64,
    Complex128,
}

impl DType {
    pub fn size_of(self) -> usize {
        match self {
            DType::Bool => 1,
            DType::Int16 => 2,
            DType::Int32 => 4,
            DType::Int64 => 8,
            DType::Float32 => 4,
            DType::Float64 => 8,
            DType::Complex64 => 8,
            DType::Complex128 => 16,
        }
    }

    fn kind_rank(self) -> u8 {
        match self {
            DType::Bool => 0,
            DType::Int16 | DType::Int32 | DType::Int64 => 1,
            DType::Float32 | DType::Float64 => 2,
            DType::Complex64 | DType::Complex128 => 3,
        }
    }

    fn width_rank(self) -> u8 {
        match self {
            DType::Bool => 0,
            DType::Int16 => 0,
            DType::Int32 => 1,
            DType::Int64 => 2,
            DType::Float32 => 0,
            DType::Float64 => 1,
            DType::Complex64 => 0,
            DType::Complex128 => 1,
        }
    }

    /// Whether values of `self` can always be represented in `other`
    /// without loss (the "safe cast" check the default merge relies on).
    pub fn can_cast_safely_to(self, other: DType) -> bool {
        if self.kind_rank() < other.kind_rank() {
            return true;
        }
        if self.kind_rank() == other.kind_rank() {
            return self.width_rank() <= other.width_rank();
        }
        false
    }

    /// Folds two dtypes into the promoted dtype both can be safely
    /// represented in (NumPy's `result_type`, restricted to the dtypes this
    /// engine supports): higher kind wins, and within a kind the wider
    /// representation wins.
    pub fn promote(self, other: DType) -> DType {
        if self.kind_rank() != other.kind_rank() {
            return if self.kind_rank() > other.kind_rank() {
                self
            } else {
                other
            };
        }
        let widest = if self.width_rank() >= other.width_rank() {
            self
        } else {
            other
        };
        widest
    }
}

/// Folds `get_preferred_input_dtype()` across a UDF set with the dataset's
/// native dtype, left to right, exactly as NumPy's `result_type` would be
/// folded over the same sequence.
pub fn fold_promote<I: IntoIterator<Item = DType>>(dataset_dtype: DType, preferred: I) -> DType {
    preferred
        .into_iter()
        .fold(dataset_dtype, DType::promote)
}
