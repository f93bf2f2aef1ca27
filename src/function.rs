//! The callable handle returned by a successful compile.
//!
//! A `CompiledFunction` is immutable once created. Cloning it shares the loaded
//! code, and the code is released when the last clone is dropped. Any number of
//! threads may call it at once without locking.
//!
//! # Example
//!
//! ```
//! use exprc_jit::compile;
//!
//! let f = compile("2*x0 + x1^2", 2).unwrap();
//! assert_eq!(f.evaluate(&[1.0, 2.0]), 6.0);
//! assert!(f.try_evaluate(&[1.0]).is_err());
//! ```

use std::sync::Arc;

use colored::Colorize;
use rayon::prelude::*;

use crate::backends::vector::Vector;
use crate::errors::ExprError;
use crate::module::Module;
use crate::options::Backend;
use crate::types::JITFunction;

/// A compiled, loaded expression.
#[derive(Clone)]
pub struct CompiledFunction {
    fun: JITFunction,
    source: Arc<str>,
    n_inputs: usize,
    max_stack: usize,
    backend: Backend,
    names: Arc<[String]>,
}

impl std::fmt::Debug for CompiledFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledFunction")
            .field("source", &self.source)
            .field("n_inputs", &self.n_inputs)
            .field("max_stack", &self.max_stack)
            .field("backend", &self.backend)
            .field("names", &self.names)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Display for CompiledFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{{")?;
        writeln!(f, "    {}: {}", "Expression".cyan(), self.source)?;
        writeln!(f, "    {}: {}", "Inputs".cyan(), self.n_inputs)?;
        if !self.names.is_empty() {
            writeln!(f, "    {}: {:?}", "Names".cyan(), self.names)?;
        }
        writeln!(f, "    {}: {}", "Backend".cyan(), self.backend)?;
        writeln!(f, "    {}: {}", "Max stack".cyan(), self.max_stack)?;
        writeln!(f, "}}")
    }
}

impl CompiledFunction {
    pub(crate) fn new(fun: JITFunction, module: &Module, backend: Backend) -> Self {
        Self {
            fun,
            source: Arc::from(module.source()),
            n_inputs: module.n_inputs(),
            max_stack: module.max_stack(),
            backend,
            names: Arc::from(Vec::new()),
        }
    }

    pub(crate) fn with_names(mut self, names: Vec<String>) -> Self {
        self.names = Arc::from(names);
        self
    }

    /// Evaluates the expression at `x`, where `x[i]` is the value of `x<i>`.
    ///
    /// Domain issues never fail: `log(-1)` is NaN and `1/0` is infinite.
    ///
    /// # Panics
    /// Panics if `x.len()` is not the number of declared inputs. Use
    /// [`try_evaluate`](Self::try_evaluate) to get an error instead.
    #[inline]
    pub fn evaluate(&self, x: &[f64]) -> f64 {
        assert_eq!(
            x.len(),
            self.n_inputs,
            "expected {} inputs, got {}",
            self.n_inputs,
            x.len()
        );
        (self.fun)(x)
    }

    /// Evaluates the expression, reporting a length mismatch as an error.
    ///
    /// # Errors
    /// Returns `ExprError::InvalidInputLength` if `x.len()` is not the number of
    /// declared inputs.
    #[inline]
    pub fn try_evaluate(&self, x: &[f64]) -> Result<f64, ExprError> {
        self.validate_input_length(x)?;
        Ok((self.fun)(x))
    }

    /// Evaluates the expression on any [`Vector`] type.
    ///
    /// # Example
    /// ```
    /// # use exprc_jit::compile;
    /// let f = compile("x0 - x1", 2).unwrap();
    /// assert_eq!(f.eval(&vec![5.0, 3.0]).unwrap(), 2.0);
    /// assert_eq!(f.eval(&[5.0, 3.0]).unwrap(), 2.0);
    /// ```
    ///
    /// # Errors
    /// Returns `ExprError::InvalidInputLength` on a length mismatch.
    pub fn eval<V: Vector>(&self, values: &V) -> Result<f64, ExprError> {
        self.try_evaluate(values.as_slice())
    }

    /// Evaluates consecutive rows of `n_inputs` values stored back to back.
    ///
    /// An expression without inputs cannot be batched this way and yields an
    /// empty result.
    ///
    /// # Errors
    /// Returns `ExprError::InvalidInputLength` if `rows.len()` is not a multiple
    /// of the number of inputs.
    pub fn evaluate_batch(&self, rows: &[f64]) -> Result<Vec<f64>, ExprError> {
        let mut out = Vec::<f64>::zeros(self.batch_len(rows)?);
        self.evaluate_batch_into(rows, &mut out)?;
        Ok(out)
    }

    /// Like [`evaluate_batch`](Self::evaluate_batch), writing one result per row into `out`.
    ///
    /// # Errors
    /// Returns `ExprError::InvalidInputLength` if `rows.len()` is not a multiple
    /// of the number of inputs, or if `out` does not hold exactly one slot per row.
    pub fn evaluate_batch_into<V: Vector>(
        &self,
        rows: &[f64],
        out: &mut V,
    ) -> Result<(), ExprError> {
        let n_rows = self.batch_len(rows)?;
        if out.len() != n_rows {
            return Err(ExprError::InvalidInputLength {
                expected: n_rows,
                got: out.len(),
            });
        }
        if n_rows == 0 {
            return Ok(());
        }
        for (slot, row) in out
            .as_mut_slice()
            .iter_mut()
            .zip(rows.chunks_exact(self.n_inputs))
        {
            *slot = (self.fun)(row);
        }
        Ok(())
    }

    /// Number of rows in a flattened batch.
    fn batch_len(&self, rows: &[f64]) -> Result<usize, ExprError> {
        if self.n_inputs == 0 {
            return Ok(0);
        }
        if rows.len() % self.n_inputs != 0 {
            return Err(ExprError::InvalidInputLength {
                expected: rows.len().next_multiple_of(self.n_inputs),
                got: rows.len(),
            });
        }
        Ok(rows.len() / self.n_inputs)
    }

    /// Evaluates many input sets in parallel, preserving their order.
    ///
    /// # Example
    /// ```
    /// # use exprc_jit::compile;
    /// let f = compile("x0 * x1", 2).unwrap();
    /// let inputs = vec![vec![1.0, 2.0], vec![3.0, 4.0]];
    /// assert_eq!(f.evaluate_parallel(&inputs).unwrap(), vec![2.0, 12.0]);
    /// ```
    ///
    /// # Errors
    /// Returns `ExprError::InvalidInputLength` for the first input set of the wrong
    /// length. Nothing is evaluated in that case.
    pub fn evaluate_parallel(&self, input_sets: &[Vec<f64>]) -> Result<Vec<f64>, ExprError> {
        input_sets
            .iter()
            .try_for_each(|inputs| self.validate_input_length(inputs))?;

        let num_threads = rayon::current_num_threads();
        let chunk_size = (input_sets.len() / (num_threads * 4)).max(1);
        let fun = Arc::clone(&self.fun);

        Ok(input_sets
            .par_chunks(chunk_size)
            .flat_map_iter(|chunk| chunk.iter().map(|inputs| (fun)(inputs)).collect::<Vec<_>>())
            .collect())
    }

    pub fn n_inputs(&self) -> usize {
        self.n_inputs
    }

    /// The expression text this function was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn max_stack(&self) -> usize {
        self.max_stack
    }

    /// The backend that loaded the code. May differ from the requested one when
    /// the JIT fell back to the interpreter.
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Input names given to [`compile_with_names`](crate::compile_with_names), in slot order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    fn validate_input_length(&self, values: &[f64]) -> Result<(), ExprError> {
        if values.len() != self.n_inputs {
            return Err(ExprError::InvalidInputLength {
                expected: self.n_inputs,
                got: values.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{compile, compile_with};
    use crate::options::CompileOptions;

    #[test]
    fn test_evaluate_and_try_evaluate() {
        let f = compile("x0 + 2*x1", 2).unwrap();
        assert_eq!(f.evaluate(&[1.0, 2.0]), 5.0);
        assert_eq!(f.try_evaluate(&[1.0, 2.0]).unwrap(), 5.0);
        assert!(matches!(
            f.try_evaluate(&[1.0]),
            Err(ExprError::InvalidInputLength {
                expected: 2,
                got: 1
            })
        ));
    }

    #[test]
    #[should_panic(expected = "expected 2 inputs, got 3")]
    fn test_evaluate_panics_on_length_mismatch() {
        let f = compile("x0 + x1", 2).unwrap();
        f.evaluate(&[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_eval_vector_types() {
        let f = compile("x0 * x1 * x2", 3).unwrap();
        assert_eq!(f.eval(&vec![1.0, 2.0, 3.0]).unwrap(), 6.0);
        assert_eq!(f.eval(&[1.0, 2.0, 3.0]).unwrap(), 6.0);
        assert!(f.eval(&vec![1.0]).is_err());
    }

    #[test]
    fn test_evaluate_batch() {
        let f = compile("x0 - x1", 2).unwrap();
        assert_eq!(
            f.evaluate_batch(&[3.0, 1.0, 10.0, 4.0]).unwrap(),
            vec![2.0, 6.0]
        );
        assert!(matches!(
            f.evaluate_batch(&[1.0, 2.0, 3.0]),
            Err(ExprError::InvalidInputLength {
                expected: 4,
                got: 3
            })
        ));
        assert!(compile("42", 0)
            .unwrap()
            .evaluate_batch(&[])
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_evaluate_batch_into() {
        let f = compile("x0 * 10", 1).unwrap();
        let mut out = [0.0; 3];
        f.evaluate_batch_into(&[1.0, 2.0, 3.0], &mut out).unwrap();
        assert_eq!(out, [10.0, 20.0, 30.0]);

        let mut short = vec![0.0; 2];
        assert!(matches!(
            f.evaluate_batch_into(&[1.0, 2.0, 3.0], &mut short),
            Err(ExprError::InvalidInputLength {
                expected: 3,
                got: 2
            })
        ));
    }

    #[test]
    fn test_evaluate_parallel_matches_sequential() {
        let f = compile("sin(x0) * x1 + 1", 2).unwrap();
        let inputs: Vec<Vec<f64>> = (0..1000)
            .map(|i| vec![i as f64 * 0.01, (i % 7) as f64])
            .collect();
        let parallel = f.evaluate_parallel(&inputs).unwrap();
        let sequential: Vec<f64> = inputs.iter().map(|x| f.evaluate(x)).collect();
        assert_eq!(parallel, sequential);

        let mut bad = inputs.clone();
        bad[500].push(0.0);
        assert!(f.evaluate_parallel(&bad).is_err());
    }

    #[test]
    fn test_clone_shares_code() {
        let f = compile("x0^2", 1).unwrap();
        let g = f.clone();
        drop(f);
        assert_eq!(g.evaluate(&[3.0]), 9.0);
        assert_eq!(g.source(), "x0^2");
        assert_eq!(g.n_inputs(), 1);
    }

    #[test]
    fn test_display_and_debug() {
        colored::control::set_override(false);
        let f = compile_with("x0 + 1", 1, &CompileOptions::interpreter()).unwrap();
        let shown = f.to_string();
        assert!(shown.contains("Expression: x0 + 1"));
        assert!(shown.contains("Backend: interpreter"));
        assert!(format!("{f:?}").contains("CompiledFunction"));
    }
}
