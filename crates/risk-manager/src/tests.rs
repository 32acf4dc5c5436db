#[cfg(test)]
mod risk_manager_tests {
    use crate::manager::RiskManager;
    use crate::models::*;
    use analysis_core::{Direction, InputAnomaly, TechnicalSnapshot};
    use approx::assert_relative_eq;

    fn rm() -> RiskManager {
        RiskManager::default()
    }

    fn admissible_snapshot() -> TechnicalSnapshot {
        let mut snap = TechnicalSnapshot::neutral(12.0);
        snap.adx = 28.0;
        snap.volume = 400_000.0;
        snap.volume_sma = 200_000.0;
        snap
    }

    #[test]
    fn penny_stock_stop_clamped_to_widest_bound() {
        // atr_pct = 5%, raw = -10% -> clamped to -8%
        let pct = rm().stop_loss_percent(3.00, 0.15);
        assert_relative_eq!(pct, -8.0, epsilon = 1e-9);
    }

    #[test]
    fn standard_stop_clamped_to_six_percent() {
        let pct = rm().stop_loss_percent(50.0, 2.5);
        assert_relative_eq!(pct, -6.0, epsilon = 1e-9);
    }

    #[test]
    fn low_volatility_stop_is_tightest_bound() {
        // atr_pct = 1% -> raw -2% -> clamped up to -4%
        let pct = rm().stop_loss_percent(20.0, 0.2);
        assert_relative_eq!(pct, -4.0, epsilon = 1e-9);
    }

    #[test]
    fn stop_inside_bounds_is_unclamped() {
        // atr_pct = 2.5% -> raw -5%
        let pct = rm().stop_loss_percent(40.0, 1.0);
        assert_relative_eq!(pct, -5.0, epsilon = 1e-9);
    }

    #[test]
    fn invalid_stop_inputs_fall_back_with_anomaly() {
        let a = rm().assess_stop_loss(0.0, 0.5);
        assert_eq!(a.percent, -4.0);
        assert_eq!(a.anomaly, Some(InputAnomaly::NonPositiveEntryPrice { value: 0.0 }));

        let a = rm().assess_stop_loss(10.0, -1.0);
        assert_eq!(a.percent, -4.0);
        assert_eq!(a.anomaly, Some(InputAnomaly::NonPositiveAtr { value: -1.0 }));
    }

    #[test]
    fn stop_loss_always_within_bounds() {
        let rm = rm();
        for entry in [0.2, 1.0, 2.5, 4.99, 5.0, 10.0, 80.0, 450.0] {
            for atr_frac in [0.0, 0.001, 0.01, 0.02, 0.03, 0.05, 0.2] {
                let pct = rm.stop_loss_percent(entry, entry * atr_frac);
                assert!(pct <= 0.0);
                if entry < 5.0 {
                    assert!((-8.0..=-4.0).contains(&pct), "entry {entry} -> {pct}");
                } else {
                    assert!((-6.0..=-4.0).contains(&pct), "entry {entry} -> {pct}");
                }
            }
        }
    }

    #[test]
    fn position_size_tiers() {
        let rm = rm();
        // atr_pct 1% -> full size
        assert_relative_eq!(rm.position_size_dollars(20.0, 0.2), 2000.0);
        // atr_pct 2.75% -> 0.75x
        assert_relative_eq!(rm.position_size_dollars(20.0, 0.55), 1500.0, epsilon = 1e-9);
        // atr_pct 3.5% -> 0.5x
        assert_relative_eq!(rm.position_size_dollars(20.0, 0.7), 1000.0, epsilon = 1e-9);
        // atr_pct 4.5% -> 0.35x = 700
        assert_relative_eq!(rm.position_size_dollars(20.0, 0.9), 700.0, epsilon = 1e-9);
        // atr_pct 6% -> 0.25x = 500
        assert_relative_eq!(rm.position_size_dollars(20.0, 1.2), 500.0, epsilon = 1e-9);
    }

    #[test]
    fn penny_stock_size_reduced_and_floored() {
        let rm = rm();
        // atr_pct 1% -> 2000 * 0.75
        let calc = rm.calculate_position_size(4.0, 0.04);
        assert_relative_eq!(calc.position_value, 1500.0, epsilon = 1e-9);
        assert!(calc.penny_stock_adjusted);

        // atr_pct 4.5% -> 0.35x * 0.75 = 525
        assert_relative_eq!(rm.position_size_dollars(4.0, 0.18), 525.0, epsilon = 1e-9);

        // atr_pct 10% -> 0.25x * 0.75 = 375 -> floored at 500
        let calc = rm.calculate_position_size(4.0, 0.4);
        assert_relative_eq!(calc.position_value, 500.0);
        assert!(calc.floored);
    }

    #[test]
    fn position_size_never_below_floor() {
        let rm = rm();
        for entry in [0.05, 0.5, 3.0, 7.0, 120.0] {
            for atr_frac in [0.0, 0.01, 0.03, 0.06, 0.5, 3.0] {
                assert!(rm.position_size_dollars(entry, entry * atr_frac) >= 500.0);
            }
        }
        assert!(rm.position_size_dollars(-1.0, 0.1) >= 500.0);
    }

    #[test]
    fn trailing_stop_width() {
        let rm = rm();
        // atr_pct 1% * 1.5 = 1.5
        assert_relative_eq!(rm.trailing_stop_percent(Direction::Long, 10.0, 0.1), 1.5, epsilon = 1e-9);
        // shorts widen x1.5
        assert_relative_eq!(rm.trailing_stop_percent(Direction::Short, 10.0, 0.1), 2.25, epsilon = 1e-9);
        // clamp long to 3.0, short capped at 4.0
        assert_relative_eq!(rm.trailing_stop_percent(Direction::Long, 10.0, 1.0), 3.0);
        assert_relative_eq!(rm.trailing_stop_percent(Direction::Short, 10.0, 1.0), 4.0);
        // tiny ATR clamps to 1.0
        assert_relative_eq!(rm.trailing_stop_percent(Direction::Long, 10.0, 0.001), 1.0);
        // unusable ATR falls back
        assert_relative_eq!(rm.trailing_stop_percent(Direction::Long, 10.0, 0.0), 2.0);
    }

    #[test]
    fn trailing_activation_depends_on_price() {
        assert_eq!(rm().trailing_activation_percent(4.0), 0.5);
        assert_eq!(rm().trailing_activation_percent(5.0), 1.0);
    }

    #[test]
    fn admission_filter() {
        let rm = rm();
        let snap = admissible_snapshot();
        assert!(rm.check_admission(12.0, 3.0, &snap).is_ok());
        assert!(rm.check_admission(12.0, -3.0, &snap).is_ok());

        assert!(matches!(
            rm.check_admission(12.0, 1.0, &snap),
            Err(AdmissionRejection::MomentumTooWeak { .. })
        ));
        assert!(matches!(
            rm.check_admission(12.0, 16.0, &snap),
            Err(AdmissionRejection::MomentumTooStrong { .. })
        ));
        assert!(matches!(
            rm.check_admission(0.05, 3.0, &snap),
            Err(AdmissionRejection::PriceTooLow { .. })
        ));

        let mut weak = snap.clone();
        weak.adx = 19.0;
        assert!(matches!(
            rm.check_admission(12.0, 3.0, &weak),
            Err(AdmissionRejection::WeakTrend { .. })
        ));

        // exactly 1.5x is not enough
        let mut quiet = snap;
        quiet.volume = 300_000.0;
        let err = rm.check_admission(12.0, 3.0, &quiet).unwrap_err();
        assert!(matches!(err, AdmissionRejection::InsufficientVolume { .. }));
        assert!(err.to_string().contains("1.5x"));
    }

    #[test]
    fn new_rejects_unordered_stop_bounds() {
        let params = RiskParameters {
            min_stop_loss_percent: -10.0,
            ..Default::default()
        };
        assert!(matches!(
            RiskManager::new(params),
            Err(analysis_core::ConfigError::Ordering(_))
        ));

        let manager = RiskManager::new(RiskParameters::default()).unwrap();
        assert_relative_eq!(manager.stop_loss_percent(20.0, 0.5), -5.0, epsilon = 1e-9);
    }
}
