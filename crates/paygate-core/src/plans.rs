//! Plan catalog
//!
//! Prices are held in minor units so the amount a user claims is exact.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A purchasable plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Plan id as submitted by clients (also its display name)
    pub id: String,
    /// Price in minor units
    pub amount_minor: i64,
    /// ISO currency code
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "INR".to_string()
}

impl Plan {
    /// Create a plan
    #[must_use]
    pub fn new(id: impl Into<String>, amount_minor: i64, currency: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            amount_minor,
            currency: currency.into(),
        }
    }

    /// Whole currency units, e.g. `2399` for Scale
    #[must_use]
    pub fn major_units(&self) -> i64 {
        self.amount_minor / 100
    }
}

/// Set of plans a client may request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanCatalog {
    plans: Vec<Plan>,
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self {
            plans: vec![
                Plan::new("Launch", 119_900, "INR"),
                Plan::new("Scale", 239_900, "INR"),
                Plan::new("Enterprise", 499_900, "INR"),
            ],
        }
    }
}

impl PlanCatalog {
    /// Build a catalog from configured plans
    pub fn new(plans: Vec<Plan>) -> Result<Self> {
        if plans.is_empty() {
            return Err(Error::Configuration("plan catalog is empty".to_string()));
        }
        for (i, plan) in plans.iter().enumerate() {
            if plan.id.trim().is_empty() {
                return Err(Error::Configuration("plan id must not be empty".to_string()));
            }
            if plan.amount_minor <= 0 {
                return Err(Error::Configuration(format!(
                    "plan {} must have a positive price",
                    plan.id
                )));
            }
            if plans[..i].iter().any(|p| p.id.eq_ignore_ascii_case(&plan.id)) {
                return Err(Error::Configuration(format!("duplicate plan id {}", plan.id)));
            }
        }
        Ok(Self { plans })
    }

    /// Look up a plan, ignoring ASCII case
    pub fn get(&self, plan_id: &str) -> Result<&Plan> {
        self.plans
            .iter()
            .find(|p| p.id.eq_ignore_ascii_case(plan_id.trim()))
            .ok_or_else(|| Error::UnknownPlan(plan_id.to_string()))
    }

    /// All plans in configured order
    #[must_use]
    pub fn plans(&self) -> &[Plan] {
        &self.plans
    }
}
