use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{ReduceError, Result};

/// Packet loss applied by the loopback switch.
///
/// `ingress_drop` loses a contribution on its way to the switch;
/// `egress_drop` loses one participant's copy of a result.
/// `egress_duplicate` repeats a delivered result: the copy lands in the
/// slot's next posted receive, after the first copy has been consumed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossModel {
    pub ingress_drop: f64,
    pub egress_drop: f64,
    pub egress_duplicate: f64,
    pub seed: u64,
}

impl LossModel {
    pub const fn lossless() -> Self {
        Self {
            ingress_drop: 0.0,
            egress_drop: 0.0,
            egress_duplicate: 0.0,
            seed: 0,
        }
    }

    pub const fn new(ingress_drop: f64, egress_drop: f64, seed: u64) -> Self {
        Self {
            ingress_drop,
            egress_drop,
            egress_duplicate: 0.0,
            seed,
        }
    }

    pub const fn with_duplicates(mut self, egress_duplicate: f64) -> Self {
        self.egress_duplicate = egress_duplicate;
        self
    }

    pub fn is_lossless(&self) -> bool {
        self.ingress_drop == 0.0 && self.egress_drop == 0.0 && self.egress_duplicate == 0.0
    }

    /// Drop probabilities must lie in `[0, 1)`; certain loss never
    /// completes. Duplication may be certain.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.egress_duplicate) {
            return Err(ReduceError::invalid_config(
                "egress_duplicate",
                format!("duplicate probability {} not in [0, 1]", self.egress_duplicate),
            ));
        }
        for (field, p) in [
            ("ingress_drop", self.ingress_drop),
            ("egress_drop", self.egress_drop),
        ] {
            if !(0.0..1.0).contains(&p) {
                return Err(ReduceError::invalid_config(
                    field,
                    format!("drop probability {p} not in [0, 1)"),
                ));
            }
        }
        Ok(())
    }
}

impl Default for LossModel {
    fn default() -> Self {
        Self::lossless()
    }
}

/// Seeded sampler over a [`LossModel`].
#[derive(Debug)]
pub(crate) struct LossSampler {
    model: LossModel,
    rng: StdRng,
}

impl LossSampler {
    pub fn new(model: LossModel) -> Self {
        Self {
            model,
            rng: StdRng::seed_from_u64(model.seed),
        }
    }

    pub fn drop_ingress(&mut self) -> bool {
        self.model.ingress_drop > 0.0 && self.rng.gen_bool(self.model.ingress_drop)
    }

    pub fn drop_egress(&mut self) -> bool {
        self.model.egress_drop > 0.0 && self.rng.gen_bool(self.model.egress_drop)
    }

    pub fn duplicate_egress(&mut self) -> bool {
        self.model.egress_duplicate > 0.0 && self.rng.gen_bool(self.model.egress_duplicate)
    }
}
