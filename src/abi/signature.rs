//! Function signatures and return-strategy selection.

use std::fmt;
use std::sync::Arc;

use super::flat::FlatType;
use super::layout::TypeLayout;
use super::shape::TypeShape;

/// Parameter and result shapes of a boundary function.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Signature {
    pub params: Vec<TypeShape>,
    pub results: Vec<TypeShape>,
}

impl Signature {
    pub fn new(
        params: impl IntoIterator<Item = TypeShape>,
        results: impl IntoIterator<Item = TypeShape>,
    ) -> Self {
        Self {
            params: params.into_iter().collect(),
            results: results.into_iter().collect(),
        }
    }

    /// Shape of the indirect return area: the single result, or a tuple of
    /// all results when there are several.
    pub fn result_area_shape(&self) -> Option<TypeShape> {
        match self.results.as_slice() {
            [] => None,
            [single] => Some(single.clone()),
            many => Some(TypeShape::Tuple(many.to_vec())),
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list = |items: &[TypeShape]| {
            items
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        write!(f, "func({})", list(&self.params))?;
        match self.results.as_slice() {
            [] => Ok(()),
            [single] => write!(f, " -> {single}"),
            many => write!(f, " -> ({})", list(many)),
        }
    }
}

/// How results travel back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnStrategy {
    /// No results.
    None,
    /// One or two scalars returned directly as core results.
    Direct(Vec<FlatType>),
    /// Results are written to memory at a pointer passed as the last core
    /// parameter; the core function itself returns nothing.
    Indirect,
}

impl ReturnStrategy {
    /// Pick the strategy for a list of result layouts.
    ///
    /// Any string or list result forces an indirect return, as does a
    /// structured result spanning several scalars or more than two scalars
    /// in total. Everything else comes back directly.
    pub fn select(results: &[TypeShape], layouts: &[Arc<TypeLayout>]) -> Self {
        if results.is_empty() {
            return ReturnStrategy::None;
        }
        if results.iter().any(TypeShape::is_indirect) {
            return ReturnStrategy::Indirect;
        }
        let structured_multi = results
            .iter()
            .zip(layouts)
            .any(|(shape, layout)| !shape.is_primitive() && layout.flat_count() > 1);
        if structured_multi {
            return ReturnStrategy::Indirect;
        }
        let flat: Vec<FlatType> = layouts.iter().flat_map(|l| l.flat.iter().copied()).collect();
        if flat.len() > 2 {
            return ReturnStrategy::Indirect;
        }
        ReturnStrategy::Direct(flat)
    }

    pub fn is_indirect(&self) -> bool {
        matches!(self, ReturnStrategy::Indirect)
    }
}

/// Everything needed to call or implement a function at the core level,
/// computed once per signature.
#[derive(Debug, Clone, PartialEq)]
pub struct CallPlan {
    pub signature: Signature,
    pub params: Vec<Arc<TypeLayout>>,
    pub results: Vec<Arc<TypeLayout>>,
    /// Layout of the indirect return area, present only for
    /// [`ReturnStrategy::Indirect`].
    pub result_area: Option<Arc<TypeLayout>>,
    pub strategy: ReturnStrategy,
    /// Flattened parameters, not counting the return pointer.
    pub flat_params: Vec<FlatType>,
}

impl CallPlan {
    /// Core parameter types, including the trailing return pointer for
    /// indirect returns.
    pub fn core_params(&self) -> Vec<FlatType> {
        let mut params = self.flat_params.clone();
        if self.strategy.is_indirect() {
            params.push(FlatType::I32);
        }
        params
    }

    /// Core result types.
    pub fn core_results(&self) -> Vec<FlatType> {
        match &self.strategy {
            ReturnStrategy::Direct(flat) => flat.clone(),
            ReturnStrategy::None | ReturnStrategy::Indirect => Vec::new(),
        }
    }
}
