//! Shared UI helper functions for the navigator.

use longrec_toolbox::navigation::NavState;
use ratatui::style::{Color, Style};
use ratatui::text::Span;

/// Truncate a string with ellipsis if it exceeds max length.
pub fn truncate_with_ellipsis(s: &str, max_len: usize) -> String {
    if s.chars().count() > max_len {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    } else {
        s.to_string()
    }
}

/// Status label and color of the navigation state.
pub fn state_indicator(state: NavState) -> (&'static str, Color) {
    match state {
        NavState::Stopped => ("STOPPED", Color::Yellow),
        NavState::Playing => ("PLAYING", Color::Green),
        NavState::Seeking => ("LOADING", Color::Cyan),
    }
}

/// Create a help item with key and description, e.g., "[Key] Action  ".
pub fn help_item(key: &str, action: &str) -> Vec<Span<'static>> {
    vec![
        Span::styled("[", Style::default().fg(Color::DarkGray)),
        Span::styled(key.to_string(), Style::default().fg(Color::Cyan)),
        Span::styled(format!("] {} ", action), Style::default().fg(Color::DarkGray)),
    ]
}

/// Create a compound help item with two keys separated by "/".
pub fn help_item_dual(key1: &str, key2: &str, action: &str) -> Vec<Span<'static>> {
    vec![
        Span::styled("[", Style::default().fg(Color::DarkGray)),
        Span::styled(key1.to_string(), Style::default().fg(Color::Cyan)),
        Span::styled("/", Style::default().fg(Color::DarkGray)),
        Span::styled(key2.to_string(), Style::default().fg(Color::Cyan)),
        Span::styled(format!("] {} ", action), Style::default().fg(Color::DarkGray)),
    ]
}

/// `hh:mm:ss.mmm` of a non-negative number of seconds.
pub fn format_elapsed(seconds: f64) -> String {
    let millis = (seconds.max(0.0) * 1000.0).round() as u64;
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        millis / 3_600_000,
        (millis / 60_000) % 60,
        (millis / 1000) % 60,
        millis % 1000
    )
}

/// Reduce a signal to `width` bars for a sparkline.
///
/// Each bar is the mean of its bucket, shifted and scaled to `0..=100`.
/// Buckets made only of gap samples (NaN) give 0.
pub fn sparkline_bars(values: &[f64], width: usize) -> Vec<u64> {
    if values.is_empty() || width == 0 {
        return Vec::new();
    }
    let buckets = width.min(values.len());
    let means: Vec<Option<f64>> = (0..buckets)
        .map(|b| {
            let lo = b * values.len() / buckets;
            let hi = ((b + 1) * values.len() / buckets).max(lo + 1);
            let finite: Vec<f64> = values[lo..hi].iter().copied().filter(|v| v.is_finite()).collect();
            (!finite.is_empty()).then(|| finite.iter().sum::<f64>() / finite.len() as f64)
        })
        .collect();

    let (min, max) = means
        .iter()
        .flatten()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = max - min;
    means
        .into_iter()
        .map(|mean| match mean {
            Some(v) if range > 0.0 => (1.0 + 99.0 * (v - min) / range).round() as u64,
            Some(_) => 50,
            None => 0,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_formatting() {
        assert_eq!(format_elapsed(0.0), "00:00:00.000");
        assert_eq!(format_elapsed(3725.5), "01:02:05.500");
    }

    #[test]
    fn sparkline_marks_gaps_as_empty() {
        let values = [f64::NAN, f64::NAN, 0.0, 1.0];
        let bars = sparkline_bars(&values, 2);
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0], 0);
        assert_eq!(bars[1], 50);
    }

    #[test]
    fn sparkline_scales_to_range() {
        let bars = sparkline_bars(&[0.0, 10.0], 2);
        assert_eq!(bars, vec![1, 100]);
    }

    #[test]
    fn truncation() {
        assert_eq!(truncate_with_ellipsis("camera_2000.mp4", 8), "camer...");
        assert_eq!(truncate_with_ellipsis("ecg", 8), "ecg");
    }
}
