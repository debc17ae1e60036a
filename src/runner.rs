use crate::error::Result;

/// A restored model plus everything needed to run a forward pass on it.
///
/// Implementations own their parameters; two runners never share state.
pub trait InferenceRunner {
    type Input;
    type Output;

    fn run(&self, input: &Self::Input) -> Result<Self::Output>;
}
