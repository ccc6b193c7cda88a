use serde::{Deserialize, Serialize};

use crate::error::SharpeQpError;
use crate::SharpeQpResult;

/// Options handed to the solver backend on every attempt.
///
/// Backends map what they understand and ignore the rest; the values are
/// never adjusted between retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    pub max_iter: u32,
    /// Iterations between convergence checks.
    pub check_termination: u32,
    pub eps_abs: f64,
    pub eps_rel: f64,
    /// Step-size (penalty) parameter.
    pub rho: f64,
    /// Regularization parameter.
    pub sigma: f64,
    /// Relaxation parameter, strictly between 0 and 2.
    pub alpha: f64,
    pub verbose: bool,
    /// Wall-clock limit per attempt, in seconds.
    pub time_limit: Option<f64>,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_iter: 1_000_000,
            check_termination: 500,
            eps_abs: 1e-5,
            eps_rel: 1e-5,
            rho: 1e-6,
            sigma: 1e-12,
            alpha: 1.6,
            verbose: false,
            time_limit: None,
        }
    }
}

impl SolverSettings {
    pub fn validate(&self) -> SharpeQpResult<()> {
        if self.max_iter == 0 {
            return Err(invalid("max_iter", "Must be at least 1"));
        }
        if self.check_termination == 0 {
            return Err(invalid("check_termination", "Must be at least 1"));
        }
        for (field, value) in [
            ("eps_abs", self.eps_abs),
            ("eps_rel", self.eps_rel),
            ("rho", self.rho),
            ("sigma", self.sigma),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(invalid(field, "Must be positive and finite"));
            }
        }
        if !(self.alpha > 0.0 && self.alpha < 2.0) {
            return Err(invalid("alpha", "Must lie strictly between 0 and 2"));
        }
        if let Some(t) = self.time_limit {
            if !t.is_finite() || t <= 0.0 {
                return Err(invalid("time_limit", "Must be positive and finite"));
            }
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> SharpeQpError {
    SharpeQpError::InvalidInput {
        field: format!("solver.{}", field),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_valid() {
        let s = SolverSettings::default();
        assert!(s.validate().is_ok());
        assert_eq!(s.max_iter, 1_000_000);
        assert_eq!(s.check_termination, 500);
        assert_eq!(s.alpha, 1.6);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let s: SolverSettings = serde_json::from_str(r#"{"eps_abs": 1e-7}"#).unwrap();
        assert_eq!(s.eps_abs, 1e-7);
        assert_eq!(s.eps_rel, 1e-5);
        assert!(!s.verbose);
    }

    #[test]
    fn test_rejects_bad_values() {
        let bad = [
            SolverSettings {
                max_iter: 0,
                ..Default::default()
            },
            SolverSettings {
                check_termination: 0,
                ..Default::default()
            },
            SolverSettings {
                eps_abs: -1.0,
                ..Default::default()
            },
            SolverSettings {
                alpha: 2.0,
                ..Default::default()
            },
            SolverSettings {
                time_limit: Some(0.0),
                ..Default::default()
            },
        ];
        for s in bad {
            assert!(s.validate().is_err(), "{:?}", s);
        }
    }
}
