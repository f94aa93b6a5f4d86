//! Connection statistics

use serde::Serialize;
use std::collections::HashMap;

/// Connection statistics
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub total_connections: usize,
    pub channels: HashMap<String, usize>,
}
