// Utility functions for recommender-service

/// Half-life decay weight for an event `age_days` old.
pub fn half_life_decay(age_days: f64, half_life_days: f64) -> f64 {
    0.5f64.powf(age_days / half_life_days)
}

/// Resolve a user's send hour from `avg_purchase_hour`, clamped to [0, 23].
/// Missing or non-finite values resolve to `default_hour`.
pub fn send_hour(avg_purchase_hour: Option<f64>, default_hour: u8) -> u8 {
    match avg_purchase_hour {
        Some(h) if h.is_finite() => h.clamp(0.0, 23.0) as u8,
        _ => default_hour,
    }
}
