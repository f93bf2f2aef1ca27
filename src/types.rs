use std::sync::Arc;

/// Type alias for a loaded expression, whichever backend produced it.
///
/// This represents a function that:
/// - Takes a slice of input values, `input[i]` being variable `x<i>`
/// - Returns the f64 result of evaluating the expression
/// - Is both Send and Sync for thread safety
///
/// The function does not check the input length. [`CompiledFunction`](crate::CompiledFunction)
/// does that before every call.
pub type JITFunction = Arc<dyn Fn(&[f64]) -> f64 + Send + Sync>;
