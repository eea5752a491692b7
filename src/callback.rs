//! Callback contract (spec §6): observes a snapshot model plus metric
//! histories each iteration and may request early termination.

use std::collections::HashMap;

use crate::config::BoostConfig;
use crate::model::Model;
use crate::NumT;

pub struct CallbackContext<'a> {
    pub config: &'a BoostConfig,
    pub model: &'a Model,
    pub iteration: usize,
    pub train_history: &'a HashMap<String, Vec<NumT>>,
    pub test_history: &'a HashMap<String, Vec<NumT>>,
}

pub trait Callback: Send + Sync {
    /// Return `true` to request the boosting loop stop after this
    /// iteration.
    fn compute(&mut self, ctx: &CallbackContext) -> bool;
}

/// Stops once a tracked metric fails to improve for `patience` rounds.
pub struct EarlyStopping {
    pub metric: String,
    pub patience: usize,
    pub minimize: bool,
    best: Option<NumT>,
    rounds_since_best: usize,
}

impl EarlyStopping {
    pub fn new(metric: impl Into<String>, patience: usize, minimize: bool) -> EarlyStopping {
        EarlyStopping { metric: metric.into(), patience, minimize, best: None, rounds_since_best: 0 }
    }
}

impl Callback for EarlyStopping {
    fn compute(&mut self, ctx: &CallbackContext) -> bool {
        let history = if ctx.test_history.contains_key(&self.metric) {
            ctx.test_history
        } else {
            ctx.train_history
        };
        let values = match history.get(&self.metric) {
            Some(v) => v,
            None => return false,
        };
        let latest = match values.last() {
            Some(&v) => v,
            None => return false,
        };

        let improved = match self.best {
            None => true,
            Some(best) => {
                if self.minimize {
                    latest < best
                } else {
                    latest > best
                }
            }
        };
        if improved {
            self.best = Some(latest);
            self.rounds_since_best = 0;
        } else {
            self.rounds_since_best += 1;
        }
        self.rounds_since_best >= self.patience
    }
}
