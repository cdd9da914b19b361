//! Fiat/crypto quotes, advisory - populated from an external price feed

use crate::Level;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub level: Level,
    pub btc: f64,
    pub eur: f64,
    pub usd: f64,
    pub cny: f64,
    pub jpy: f64,
    pub krw: f64,
    pub eth: f64,
    pub gbp: f64,
}
