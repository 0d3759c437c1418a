use rand::{thread_rng, Rng};
use std::time::Duration;

use crate::cli::config::InteractSettings;

/// Ratio no generated scroll step goes beyond
const MAX_SCROLL_RATIO: f64 = 0.8;

/// Build the scroll positions for one interaction, as fractions of the page height.
///
/// The initial positions are kept verbatim. When `scroll_count` is positive,
/// `max(1, scroll_count + random(0..=2) - 1)` further steps are appended at
/// `min(0.8, 0.6 + 0.1 * i)`, so repeated fetches of a page do not produce
/// identical traces.
pub fn build_scroll_positions<R: Rng + ?Sized>(settings: &InteractSettings, rng: &mut R) -> Vec<f64> {
    let mut positions = settings.build_init_scroll_positions();

    let scroll_count = settings.scroll_count;
    if scroll_count <= 0 {
        return positions;
    }

    let jitter: i32 = rng.gen_range(0..3);
    let enhanced = (scroll_count + jitter - 1).max(1);
    positions.extend((0..enhanced).map(|i| (0.6 + 0.1 * f64::from(i)).min(MAX_SCROLL_RATIO)));

    positions
}

/// Human-like pacing for interactions with a page
#[derive(Debug, Clone)]
pub struct BehaviorSimulator {
    config: InteractSettings,
}

impl BehaviorSimulator {
    pub fn new(config: InteractSettings) -> Self {
        Self { config }
    }

    /// Random delay before clicking, simulating reaction time
    pub fn click_delay(&self) -> Duration {
        Duration::from_millis(Self::sample(self.config.click_delay))
    }

    /// Random delay between two typed characters
    pub fn typing_delay(&self) -> Duration {
        Duration::from_millis(Self::sample(self.config.typing_speed))
    }

    fn sample((min, max): (u64, u64)) -> u64 {
        if max <= min {
            return min;
        }
        thread_rng().gen_range(min..max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn settings(positions: &str, scroll_count: i32) -> InteractSettings {
        InteractSettings {
            init_scroll_positions: positions.to_string(),
            scroll_count,
            ..InteractSettings::default()
        }
    }

    #[test]
    fn test_non_positive_count_returns_initial_positions() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(build_scroll_positions(&settings("0.3,0.75", 0), &mut rng), vec![0.3, 0.75]);
        assert_eq!(build_scroll_positions(&settings("0.3,0.75", -2), &mut rng), vec![0.3, 0.75]);
    }

    #[test]
    fn test_length_is_bounded_and_ratios_capped() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..100 {
            let positions = build_scroll_positions(&settings("0.3,0.75", 5), &mut rng);
            assert_eq!(&positions[..2], &[0.3, 0.75]);

            let extra = &positions[2..];
            assert!((4..=6).contains(&extra.len()), "unexpected length {}", extra.len());
            assert!((extra[0] - 0.6).abs() < 1e-9);
            assert!(extra.iter().all(|r| *r <= MAX_SCROLL_RATIO + 1e-9));
        }
    }

    #[test]
    fn test_single_scroll_yields_at_least_one_step() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..50 {
            let positions = build_scroll_positions(&settings("", 1), &mut rng);
            assert!((1..=2).contains(&positions.len()));
        }
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let config = settings("0.3,0.75", 3);
        let a = build_scroll_positions(&config, &mut StdRng::seed_from_u64(11));
        let b = build_scroll_positions(&config, &mut StdRng::seed_from_u64(11));
        assert_eq!(a, b);
    }

    #[test]
    fn test_delays_respect_ranges() {
        let simulator = BehaviorSimulator::new(InteractSettings {
            click_delay: (100, 300),
            typing_speed: (20, 20),
            ..InteractSettings::default()
        });

        for _ in 0..20 {
            let click = simulator.click_delay();
            assert!(click >= Duration::from_millis(100) && click < Duration::from_millis(300));
            assert_eq!(simulator.typing_delay(), Duration::from_millis(20));
        }
    }
}
