//! Pure sizing math: dynamic and static target-instance-count calculation,
//! ASG bound clamping, and safety-cap application. Kept free of I/O so the
//! scenarios in the concrete end-to-end table can be asserted directly.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClampDirection {
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizingResult {
    pub optimal: i64,
    pub clamped: Option<ClampDirection>,
}

fn clamp(optimal: i64, min: i64, max: i64) -> SizingResult {
    if optimal < min {
        SizingResult {
            optimal: min,
            clamped: Some(ClampDirection::Min),
        }
    } else if optimal > max {
        SizingResult {
            optimal: max,
            clamped: Some(ClampDirection::Max),
        }
    } else {
        SizingResult { optimal, clamped: None }
    }
}

/// `optimal = ceil(current_qps / target_qps_per_instance)`, clamped to ASG
/// bounds. A non-positive target is a misconfiguration: optimal collapses
/// to 0 rather than dividing by zero or going negative; callers are
/// expected to log this separately since this function has no I/O.
pub fn dynamic_optimal(current_qps: f64, target_qps_per_instance: f64, min: i64, max: i64) -> SizingResult {
    let raw = if target_qps_per_instance <= 0.0 {
        0
    } else {
        (current_qps / target_qps_per_instance).ceil() as i64
    };
    clamp(raw, min, max)
}

/// Single ±1 increment based on qps-per-instance vs thresholds, per the
/// fixed static-mode step size.
pub fn static_optimal(
    qps_per_instance: f64,
    current_instances: i64,
    target_qps_per_instance: f64,
    scale_up_threshold: f64,
    scale_down_threshold: f64,
    min: i64,
    max: i64,
) -> SizingResult {
    let optimal = if qps_per_instance > target_qps_per_instance * scale_up_threshold && current_instances < max {
        current_instances + 1
    } else if qps_per_instance < target_qps_per_instance * scale_down_threshold && current_instances > min {
        current_instances - 1
    } else {
        current_instances
    };
    clamp(optimal, min, max)
}

/// Applies `max_scale_up_per_action`/`max_scale_down_per_action` (0 =
/// unbounded) to a signed `required_change`. Returns the possibly-capped
/// change and whether capping occurred.
pub fn apply_safety_cap(required_change: i64, max_scale_up_per_action: i64, max_scale_down_per_action: i64) -> (i64, bool) {
    if required_change > 0 {
        if max_scale_up_per_action > 0 && required_change > max_scale_up_per_action {
            (max_scale_up_per_action, true)
        } else {
            (required_change, false)
        }
    } else if required_change < 0 {
        let magnitude = -required_change;
        if max_scale_down_per_action > 0 && magnitude > max_scale_down_per_action {
            (-max_scale_down_per_action, true)
        } else {
            (required_change, false)
        }
    } else {
        (0, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_1_basic_scale_up() {
        let result = dynamic_optimal(240.0, 50.0, 1, 10);
        assert_eq!(result.optimal, 5);
        assert_eq!(result.clamped, None);
        let (amount, limited) = apply_safety_cap(result.optimal - 3, 0, 0);
        assert_eq!(amount, 2);
        assert!(!limited);
    }

    #[test]
    fn scenario_2_safety_capped_scale_up() {
        let result = dynamic_optimal(500.0, 50.0, 1, 20);
        assert_eq!(result.optimal, 10);
        let (amount, limited) = apply_safety_cap(result.optimal - 2, 1, 0);
        assert_eq!(amount, 1);
        assert!(limited);
    }

    #[test]
    fn scenario_3_at_min_capacity() {
        let result = dynamic_optimal(30.0, 50.0, 3, 10);
        assert_eq!(result.optimal, 3);
        assert_eq!(result.clamped, Some(ClampDirection::Min));
        let (amount, _) = apply_safety_cap(result.optimal - 3, 0, 0);
        assert_eq!(amount, 0);
    }

    #[test]
    fn scenario_5_static_scale_up() {
        let qps_per_instance = 90.0;
        let result = static_optimal(qps_per_instance, 1, 100.0, 0.8, 0.4, 1, 5);
        assert_eq!(result.optimal, 2);
        let (amount, limited) = apply_safety_cap(result.optimal - 1, 0, 0);
        assert_eq!(amount, 1);
        assert!(!limited);
    }

    #[test]
    fn scenario_6_dry_run_sizing() {
        let result = dynamic_optimal(1000.0, 50.0, 1, 50);
        assert_eq!(result.optimal, 20);
    }

    #[test]
    fn nonpositive_target_collapses_to_zero() {
        let result = dynamic_optimal(500.0, 0.0, 0, 10);
        assert_eq!(result.optimal, 0);
        let result = dynamic_optimal(500.0, -5.0, 0, 10);
        assert_eq!(result.optimal, 0);
    }

    #[test]
    fn cold_start_never_divides_by_zero() {
        // current_instances == 0 is handled by the caller computing
        // qps_per_instance = 0.0 directly; dynamic_optimal itself never
        // divides by instance count.
        let result = dynamic_optimal(10.0, 50.0, 0, 5);
        assert_eq!(result.optimal, 1);
    }
}
