//! Dense tableau simplex for `max c·x` subject to `A·x ≤ b`, `x ≥ 0`.
//!
//! Only the packing form with `b ≥ 0` is supported, which keeps the origin
//! feasible and removes the need for a phase-one search. Pivoting follows
//! Bland's rule so the method terminates on degenerate problems.

use thiserror::Error;

const PIVOT_EPSILON: f64 = 1e-9;

/// Reasons the relaxation could not be solved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum LpError {
    /// A right-hand side was negative, so the origin is not feasible.
    #[error("constraint {0} has a negative bound")]
    NegativeBound(usize),
    /// The objective grows without limit.
    #[error("relaxation is unbounded")]
    Unbounded,
    /// The pivot loop hit its iteration cap.
    #[error("simplex exceeded {0} pivots")]
    IterationLimit(usize),
    /// The problem has more variables than the solver accepts.
    #[error("relaxation has {variables} variables, limit is {limit}")]
    TooLarge {
        /// Variables in the rejected problem.
        variables: usize,
        /// Configured variable limit.
        limit: usize,
    },
    /// A pivot produced a non-finite value.
    #[error("simplex pivot produced a non-finite value")]
    Numerical,
}

/// Packing problem in inequality form.
#[derive(Clone, Debug, Default)]
pub(crate) struct PackingProblem {
    pub(crate) objective: Vec<f64>,
    pub(crate) rows: Vec<Vec<f64>>,
    pub(crate) bounds: Vec<f64>,
}

/// Solves the problem, returning the optimal structural variable values.
pub(crate) fn maximize(problem: &PackingProblem, max_pivots: usize) -> Result<Vec<f64>, LpError> {
    let variables = problem.objective.len();
    let constraints = problem.rows.len();
    if let Some(index) = problem.bounds.iter().position(|bound| *bound < 0.0) {
        return Err(LpError::NegativeBound(index));
    }

    let width = variables + constraints + 1;
    let rhs = width - 1;
    let mut tableau = vec![vec![0.0; width]; constraints + 1];
    for (index, row) in problem.rows.iter().enumerate() {
        for (column, coefficient) in row.iter().enumerate().take(variables) {
            tableau[index][column] = *coefficient;
        }
        tableau[index][variables + index] = 1.0;
        tableau[index][rhs] = problem.bounds.get(index).copied().unwrap_or(0.0);
    }
    for (column, weight) in problem.objective.iter().enumerate() {
        tableau[constraints][column] = -weight;
    }
    let mut basis: Vec<usize> = (variables..variables + constraints).collect();

    let mut pivots = 0;
    loop {
        let Some(entering) =
            (0..rhs).find(|column| tableau[constraints][*column] < -PIVOT_EPSILON)
        else {
            break;
        };

        if pivots == max_pivots {
            return Err(LpError::IterationLimit(max_pivots));
        }
        pivots += 1;

        let mut leaving: Option<(usize, f64)> = None;
        for row in 0..constraints {
            let coefficient = tableau[row][entering];
            if coefficient <= PIVOT_EPSILON {
                continue;
            }
            let ratio = tableau[row][rhs] / coefficient;
            let replace = match leaving {
                None => true,
                Some((current, best)) => {
                    ratio < best - PIVOT_EPSILON
                        || ((ratio - best).abs() <= PIVOT_EPSILON && basis[row] < basis[current])
                }
            };
            if replace {
                leaving = Some((row, ratio));
            }
        }
        let Some((pivot_row, _)) = leaving else {
            return Err(LpError::Unbounded);
        };

        pivot(&mut tableau, pivot_row, entering)?;
        basis[pivot_row] = entering;
    }

    let mut solution = vec![0.0; variables];
    for (row, column) in basis.iter().enumerate() {
        if *column < variables {
            solution[*column] = tableau[row][rhs];
        }
    }
    Ok(solution)
}

fn pivot(tableau: &mut [Vec<f64>], pivot_row: usize, entering: usize) -> Result<(), LpError> {
    let divisor = tableau[pivot_row][entering];
    for value in &mut tableau[pivot_row] {
        *value /= divisor;
        if !value.is_finite() {
            return Err(LpError::Numerical);
        }
    }

    let normalized = tableau[pivot_row].clone();
    for (index, row) in tableau.iter_mut().enumerate() {
        if index == pivot_row {
            continue;
        }
        let factor = row[entering];
        if factor.abs() <= f64::EPSILON {
            continue;
        }
        for (value, pivot_value) in row.iter_mut().zip(&normalized) {
            *value -= factor * pivot_value;
        }
    }
    Ok(())
}
