//! Bandit allocation and posterior-update engine: conjugate updates
//! (Beta-Binomial, Normal-Normal), Bayesian linear/logistic regression for
//! contextual arms, MAP treatment-effect estimation for Bayesian A/B, and
//! Thompson-style arm selection.

pub mod bayes_ab;
pub mod contextual;
pub mod distributions;
pub mod glm;
pub mod linalg;
pub mod optimizer;
pub mod strategy;

pub use optimizer::Lbfgs;
pub use strategy::{strategy_for, Observation, PriorRewardStrategy};
