//! Technical indicators over daily bars

use crate::tools::data::DailyBar;
use serde::{Deserialize, Serialize};

/// Fewer bars than this cannot support the analysis
pub const MIN_BARS: usize = 20;

const RSI_PERIOD: usize = 14;
const NEUTRAL_RSI: f64 = 50.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Up,
    Down,
    Sideways,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CrossSignal {
    GoldenCross,
    DeadCross,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VolumeTrend {
    Increasing,
    Decreasing,
    Flat,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatternReport {
    pub current_price: f64,
    pub ma5: f64,
    pub ma20: f64,
    pub ma60: Option<f64>,
    pub trend: Trend,
    pub cross: Option<CrossSignal>,
    pub volume_trend: VolumeTrend,
    pub rsi: f64,
}

/// Simple moving average of the last `window` values
pub fn moving_average(values: &[f64], window: usize) -> Option<f64> {
    if window == 0 || values.len() < window {
        return None;
    }
    let tail = &values[values.len() - window..];
    Some(tail.iter().sum::<f64>() / window as f64)
}

/// RSI with simple (non-smoothed) averages of gains and losses.
///
/// Returns `None` when there are not enough closes or the window is flat.
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let window = &closes[closes.len() - period - 1..];
    let (gains, losses) = window
        .windows(2)
        .map(|pair| pair[1] - pair[0])
        .fold((0.0, 0.0), |(g, l), diff| {
            if diff > 0.0 {
                (g + diff, l)
            } else {
                (g, l - diff)
            }
        });

    let avg_gain = gains / period as f64;
    let avg_loss = losses / period as f64;

    if avg_loss == 0.0 {
        return if avg_gain == 0.0 { None } else { Some(100.0) };
    }

    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

pub fn classify_trend(price: f64, ma5: f64, ma20: f64) -> Trend {
    if price > ma5 && ma5 > ma20 {
        Trend::Up
    } else if price < ma5 && ma5 < ma20 {
        Trend::Down
    } else {
        Trend::Sideways
    }
}

/// MA5 crossing MA20 between the previous and the latest session
pub fn detect_cross(closes: &[f64]) -> Option<CrossSignal> {
    if closes.len() < 21 {
        return None;
    }
    let previous = &closes[..closes.len() - 1];

    let ma5 = moving_average(closes, 5)?;
    let ma20 = moving_average(closes, 20)?;
    let prev_ma5 = moving_average(previous, 5)?;
    let prev_ma20 = moving_average(previous, 20)?;

    if ma5 > ma20 && prev_ma5 <= prev_ma20 {
        Some(CrossSignal::GoldenCross)
    } else if ma5 < ma20 && prev_ma5 >= prev_ma20 {
        Some(CrossSignal::DeadCross)
    } else {
        None
    }
}

/// Last five sessions against the five before them, with a 20% band
pub fn volume_trend(volumes: &[u64]) -> VolumeTrend {
    if volumes.len() < 10 {
        return VolumeTrend::Flat;
    }
    let recent = &volumes[volumes.len() - 5..];
    let previous = &volumes[volumes.len() - 10..volumes.len() - 5];

    let mean = |slice: &[u64]| slice.iter().sum::<u64>() as f64 / slice.len() as f64;
    let (recent, previous) = (mean(recent), mean(previous));

    if recent > previous * 1.2 {
        VolumeTrend::Increasing
    } else if recent < previous * 0.8 {
        VolumeTrend::Decreasing
    } else {
        VolumeTrend::Flat
    }
}

/// Full pattern analysis; `None` when fewer than [`MIN_BARS`] bars are given
pub fn analyze(bars: &[DailyBar]) -> Option<PatternReport> {
    if bars.len() < MIN_BARS {
        return None;
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<u64> = bars.iter().map(|b| b.volume).collect();

    let current_price = *closes.last()?;
    let ma5 = moving_average(&closes, 5)?;
    let ma20 = moving_average(&closes, 20)?;

    Some(PatternReport {
        current_price,
        ma5,
        ma20,
        ma60: moving_average(&closes, 60),
        trend: classify_trend(current_price, ma5, ma20),
        cross: detect_cross(&closes),
        volume_trend: volume_trend(&volumes),
        rsi: rsi(&closes, RSI_PERIOD).unwrap_or(NEUTRAL_RSI),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn bars_from(closes: &[f64], volumes: &[u64]) -> Vec<DailyBar> {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        closes
            .iter()
            .zip(volumes.iter())
            .enumerate()
            .map(|(i, (&close, &volume))| DailyBar {
                date: start + Duration::days(i as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume,
            })
            .collect()
    }

    #[test]
    fn test_moving_average() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(moving_average(&values, 5), Some(3.0));
        assert_eq!(moving_average(&values, 2), Some(4.5));
        assert_eq!(moving_average(&values, 6), None);
    }

    #[test]
    fn test_rsi_bounds() {
        let rising: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        assert_eq!(rsi(&rising, 14), Some(100.0));

        let flat = vec![100.0; 20];
        assert_eq!(rsi(&flat, 14), None);

        let alternating: Vec<f64> = (0..15).map(|i| if i % 2 == 0 { 100.0 } else { 101.0 }).collect();
        let value = rsi(&alternating, 14).unwrap();
        assert!((value - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_trend_classification() {
        assert_eq!(classify_trend(110.0, 105.0, 100.0), Trend::Up);
        assert_eq!(classify_trend(90.0, 95.0, 100.0), Trend::Down);
        assert_eq!(classify_trend(100.0, 105.0, 100.0), Trend::Sideways);
    }

    #[test]
    fn test_golden_cross_on_last_session() {
        // 20 flat sessions, then a jump that lifts MA5 above MA20
        let mut closes = vec![100.0; 20];
        closes.push(130.0);
        assert_eq!(detect_cross(&closes), Some(CrossSignal::GoldenCross));

        let mut closes = vec![100.0; 20];
        closes.push(70.0);
        assert_eq!(detect_cross(&closes), Some(CrossSignal::DeadCross));

        assert_eq!(detect_cross(&vec![100.0; 25]), None);
    }

    #[test]
    fn test_volume_trend_band() {
        let mut volumes = vec![1000; 5];
        volumes.extend(vec![1300; 5]);
        assert_eq!(volume_trend(&volumes), VolumeTrend::Increasing);

        let mut volumes = vec![1000; 5];
        volumes.extend(vec![1100; 5]);
        assert_eq!(volume_trend(&volumes), VolumeTrend::Flat);

        let mut volumes = vec![1000; 5];
        volumes.extend(vec![700; 5]);
        assert_eq!(volume_trend(&volumes), VolumeTrend::Decreasing);
    }

    #[test]
    fn test_analyze_requires_twenty_bars() {
        let bars = bars_from(&vec![100.0; 19], &vec![1000; 19]);
        assert!(analyze(&bars).is_none());

        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let bars = bars_from(&closes, &vec![1000; 30]);
        let report = analyze(&bars).unwrap();
        assert_eq!(report.trend, Trend::Up);
        assert_eq!(report.current_price, 129.0);
        assert!(report.ma60.is_none());
        assert_eq!(report.rsi, 100.0);
    }
}
