//! Step interval expressions such as `1:2`, `10` or `:100:5,200:`.

use std::{fmt, str::FromStr};

use crate::TriggerError;

/// One `start:stop:period` slice of steps; `stop` is inclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StepSlice {
    start: u64,
    stop: u64,
    period: u64,
}

impl StepSlice {
    /// Creates a slice; a zero period produces a slice that never matches.
    #[must_use]
    pub const fn new(start: u64, stop: u64, period: u64) -> Self {
        Self {
            start,
            stop,
            period,
        }
    }

    /// Reports whether `step` lies on the slice.
    #[must_use]
    pub fn contains(&self, step: u64) -> bool {
        self.period > 0
            && step >= self.start
            && step <= self.stop
            && (step - self.start) % self.period == 0
    }

    fn parse(text: &str) -> Result<Self, TriggerError> {
        let fields: Vec<&str> = text.split(':').map(str::trim).collect();
        let field = |index: usize, default: u64| -> Result<u64, TriggerError> {
            match fields.get(index).copied() {
                None | Some("") => Ok(default),
                Some(token) => token.parse().map_err(|_| TriggerError::InvalidInteger {
                    slice: text.to_owned(),
                    token: token.to_owned(),
                }),
            }
        };

        match fields.len() {
            // A bare integer is a period.
            1 => Ok(Self::new(0, u64::MAX, field(0, 0)?)),
            2 | 3 => Ok(Self::new(field(0, 0)?, field(1, u64::MAX)?, field(2, 1)?)),
            _ => Err(TriggerError::TooManyFields(text.to_owned())),
        }
    }
}

impl fmt::Display for StepSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.start)?;
        if self.stop != u64::MAX {
            write!(f, "{}", self.stop)?;
        }
        write!(f, ":{}", self.period)
    }
}

/// Union of step slices parsed from a comma-separated expression.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct IntervalSet {
    slices: Vec<StepSlice>,
}

impl IntervalSet {
    /// Parses a comma-separated list of slices.
    ///
    /// Each slice is `start:stop:period` with every field optional. A bare
    /// integer `k` matches every `k`-th step, and `0` or an empty expression
    /// never matches.
    pub fn parse(expression: &str) -> Result<Self, TriggerError> {
        let slices = expression
            .split(',')
            .map(str::trim)
            .filter(|slice| !slice.is_empty())
            .map(StepSlice::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { slices })
    }

    /// Interval set that never matches.
    #[must_use]
    pub fn never() -> Self {
        Self::default()
    }

    /// Reports whether any slice matches `step`.
    #[must_use]
    pub fn contains(&self, step: u64) -> bool {
        self.slices.iter().any(|slice| slice.contains(step))
    }

    /// Reports whether at least one slice can match a step.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.slices.iter().any(|slice| slice.period > 0)
    }

    /// Slices in the order they were written.
    #[must_use]
    pub fn slices(&self) -> &[StepSlice] {
        &self.slices
    }
}

impl FromStr for IntervalSet {
    type Err = TriggerError;

    fn from_str(expression: &str) -> Result<Self, Self::Err> {
        Self::parse(expression)
    }
}
